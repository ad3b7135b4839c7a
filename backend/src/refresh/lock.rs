use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::LockError;
use crate::config::RefreshConfig;
use crate::store::{LockAcquisition, Store};
use crate::types::{AssetId, LockStatus, RefreshClass, RefreshLock};

/// Owns the `absent -> in_progress -> {completed | failed}` lifecycle of refresh locks.
pub struct RefreshLockCoordinator {
    store: Arc<dyn Store>,
    stale_after: Duration,
    retention: Duration,
}

fn to_chrono(duration: std::time::Duration, fallback: Duration) -> Duration {
    Duration::from_std(duration).unwrap_or(fallback)
}

impl RefreshLockCoordinator {
    pub fn new(store: Arc<dyn Store>, config: &RefreshConfig) -> Self {
        Self {
            store,
            stale_after: to_chrono(config.stale_lock_after, Duration::minutes(5)),
            retention: to_chrono(config.lock_retention, Duration::hours(1)),
        }
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    pub async fn acquire(
        &self,
        asset_id: AssetId,
        class: RefreshClass,
        owner: &str,
    ) -> Result<RefreshLock, LockError> {
        self.acquire_at(asset_id, class, owner, Utc::now()).await
    }

    #[instrument(skip(self))]
    pub async fn acquire_at(
        &self,
        asset_id: AssetId,
        class: RefreshClass,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<RefreshLock, LockError> {
        match self
            .store
            .try_acquire_lock(asset_id, class, owner, now, self.stale_after)
            .await?
        {
            LockAcquisition::Acquired { lock, reclaimed } => {
                if let Some(stale) = reclaimed {
                    warn!(
                        "Reclaimed stale {} lock {} for asset {} held by {} since {}",
                        class, stale.id, asset_id, stale.owner, stale.acquired_at
                    );
                }
                debug!("Lock {} acquired by {}", lock.id, owner);
                Ok(lock)
            }
            LockAcquisition::Contended { holder } => {
                info!(
                    "Refresh {} for asset {} already in progress (lock {} by {})",
                    class, asset_id, holder.id, holder.owner
                );
                Err(LockError::AlreadyInProgress {
                    asset_id,
                    refresh_class: class,
                })
            }
        }
    }

    /// Move the lock to a terminal status. Returns false when it was already terminal,
    /// e.g. reclaimed by another worker after going stale.
    pub async fn release(&self, lock: &RefreshLock, status: LockStatus) -> Result<bool, LockError> {
        let released = self.store.release_lock(lock.id, status, Utc::now()).await?;
        if !released {
            warn!("Lock {} for asset {} was already terminal on release", lock.id, lock.asset_id);
        }
        Ok(released)
    }

    /// The live in-progress lock for `(asset_id, class)`, ignoring stale ones.
    pub async fn current(
        &self,
        asset_id: AssetId,
        class: RefreshClass,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshLock>, LockError> {
        let locks = self.store.active_locks().await?;
        Ok(locks.into_iter().find(|lock| {
            lock.asset_id == asset_id && lock.refresh_class == class && now - lock.acquired_at < self.stale_after
        }))
    }

    pub async fn sweep(&self) -> Result<u64, LockError> {
        self.sweep_at(Utc::now()).await
    }

    /// Delete terminal locks released more than the retention window before `now`.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<u64, LockError> {
        let removed = self.store.delete_terminal_locks_before(now - self.retention).await?;
        if removed > 0 {
            info!("🧹 Swept {} terminal refresh locks", removed);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use uuid::Uuid;

    fn coordinator(store: Arc<MemoryStore>) -> RefreshLockCoordinator {
        RefreshLockCoordinator::new(store, &RefreshConfig::default())
    }

    #[tokio::test]
    async fn test_release_then_reacquire() {
        let store = Arc::new(MemoryStore::new());
        let locks = coordinator(store.clone());
        let asset = Uuid::new_v4();

        let first = locks.acquire(asset, RefreshClass::Volatile, "w1").await.unwrap();
        assert!(locks.release(&first, LockStatus::Completed).await.unwrap());
        assert!(!locks.release(&first, LockStatus::Failed).await.unwrap());

        let second = locks.acquire(asset, RefreshClass::Volatile, "w2").await.unwrap();
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_classes_lock_independently() {
        let store = Arc::new(MemoryStore::new());
        let locks = coordinator(store);
        let asset = Uuid::new_v4();

        locks.acquire(asset, RefreshClass::Full, "w1").await.unwrap();
        locks.acquire(asset, RefreshClass::Volatile, "w1").await.unwrap();
        let err = locks.acquire(asset, RefreshClass::Full, "w2").await.unwrap_err();
        assert!(err.is_contention());
    }

    #[tokio::test]
    async fn test_sweep_keeps_recent_and_live_locks() {
        let store = Arc::new(MemoryStore::new());
        let locks = coordinator(store.clone());
        let now = Utc::now();

        let old = locks
            .acquire_at(Uuid::new_v4(), RefreshClass::Full, "w", now - Duration::hours(3))
            .await
            .unwrap();
        store.release_lock(old.id, LockStatus::Completed, now - Duration::hours(2)).await.unwrap();
        let recent = locks.acquire_at(Uuid::new_v4(), RefreshClass::Full, "w", now).await.unwrap();
        store.release_lock(recent.id, LockStatus::Completed, now).await.unwrap();
        let live = locks.acquire_at(Uuid::new_v4(), RefreshClass::Full, "w", now).await.unwrap();

        assert_eq!(locks.sweep_at(now).await.unwrap(), 1);
        assert!(store.get_lock(old.id).await.unwrap().is_none());
        assert!(store.get_lock(recent.id).await.unwrap().is_some());
        assert!(store.get_lock(live.id).await.unwrap().is_some());
    }
}
