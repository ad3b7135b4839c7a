use alloy::primitives::Address;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::{LockAcquisition, Store, StoreError};
use crate::scoring::EvidenceSet;
use crate::types::{
    Asset, AssetId, AuditSnapshot, ChainStats, ContractIntrospection, GovernanceSnapshot, HoldersSnapshot, Job, JobId,
    JobStatus, LiquiditySnapshot, LockStatus, RefreshClass, RefreshLock, Score,
};

#[derive(Default)]
struct EvidenceTables {
    introspections: HashMap<AssetId, Vec<ContractIntrospection>>,
    holders: HashMap<AssetId, Vec<HoldersSnapshot>>,
    liquidity: HashMap<AssetId, Vec<LiquiditySnapshot>>,
    governance: HashMap<AssetId, GovernanceSnapshot>,
    chain_stats: HashMap<String, ChainStats>,
    audits: HashMap<AssetId, Vec<AuditSnapshot>>,
}

/// Process-local store for tests and database-less runs.
#[derive(Default)]
pub struct MemoryStore {
    assets: RwLock<HashMap<AssetId, Asset>>,
    evidence: RwLock<EvidenceTables>,
    scores: RwLock<HashMap<AssetId, Vec<Score>>>,
    locks: Mutex<Vec<RefreshLock>>,
    jobs: Mutex<Vec<Job>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewrite a lock's acquisition time, for exercising stale-lock handling.
    pub async fn backdate_lock(&self, lock_id: Uuid, acquired_at: DateTime<Utc>) -> bool {
        let mut locks = self.locks.lock().await;
        match locks.iter_mut().find(|l| l.id == lock_id) {
            Some(lock) => {
                lock.acquired_at = acquired_at;
                true
            }
            None => false,
        }
    }
}

/// Latest by block, ties broken by wall-clock observation.
fn latest_by_block<T: Clone>(rows: Option<&Vec<T>>, key: impl Fn(&T) -> (u64, DateTime<Utc>)) -> Option<T> {
    rows?.iter().max_by_key(|row| key(row)).cloned()
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_asset(&self, id: AssetId) -> Result<Option<Asset>, StoreError> {
        Ok(self.assets.read().await.get(&id).cloned())
    }

    async fn find_asset(&self, chain: &str, address: Address) -> Result<Option<Asset>, StoreError> {
        let chain = chain.to_lowercase();
        Ok(self
            .assets
            .read()
            .await
            .values()
            .find(|a| a.chain == chain && a.address == address)
            .cloned())
    }

    async fn ensure_asset(&self, chain: &str, address: Address, now: DateTime<Utc>) -> Result<Asset, StoreError> {
        let chain = chain.to_lowercase();
        let mut assets = self.assets.write().await;
        if let Some(existing) = assets.values().find(|a| a.chain == chain && a.address == address) {
            return Ok(existing.clone());
        }
        let asset = Asset::new_pending(&chain, address, now);
        assets.insert(asset.id, asset.clone());
        Ok(asset)
    }

    async fn update_asset(&self, asset: &Asset) -> Result<(), StoreError> {
        let mut assets = self.assets.write().await;
        match assets.get_mut(&asset.id) {
            Some(existing) => {
                *existing = asset.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("asset {}", asset.id))),
        }
    }

    async fn insert_introspection(&self, asset_id: AssetId, evidence: &ContractIntrospection) -> Result<(), StoreError> {
        let mut tables = self.evidence.write().await;
        tables.introspections.entry(asset_id).or_default().push(evidence.clone());
        Ok(())
    }

    async fn insert_holders(&self, asset_id: AssetId, evidence: &HoldersSnapshot) -> Result<(), StoreError> {
        let mut tables = self.evidence.write().await;
        tables.holders.entry(asset_id).or_default().push(evidence.clone());
        Ok(())
    }

    async fn insert_liquidity(&self, asset_id: AssetId, evidence: &LiquiditySnapshot) -> Result<(), StoreError> {
        let mut tables = self.evidence.write().await;
        tables.liquidity.entry(asset_id).or_default().push(evidence.clone());
        Ok(())
    }

    async fn upsert_governance(&self, asset_id: AssetId, evidence: &GovernanceSnapshot) -> Result<(), StoreError> {
        self.evidence.write().await.governance.insert(asset_id, evidence.clone());
        Ok(())
    }

    async fn upsert_chain_stats(&self, evidence: &ChainStats) -> Result<(), StoreError> {
        self.evidence
            .write()
            .await
            .chain_stats
            .insert(evidence.chain.to_lowercase(), evidence.clone());
        Ok(())
    }

    async fn insert_audits(&self, asset_id: AssetId, evidence: &AuditSnapshot) -> Result<(), StoreError> {
        let mut tables = self.evidence.write().await;
        tables.audits.entry(asset_id).or_default().push(evidence.clone());
        Ok(())
    }

    async fn latest_evidence(&self, asset_id: AssetId, chain: &str) -> Result<EvidenceSet, StoreError> {
        let tables = self.evidence.read().await;
        Ok(EvidenceSet {
            contract: latest_by_block(tables.introspections.get(&asset_id), |e| (e.observed_at_block, e.observed_at)),
            holders: latest_by_block(tables.holders.get(&asset_id), |e| (e.observed_at_block, e.observed_at)),
            liquidity: latest_by_block(tables.liquidity.get(&asset_id), |e| (e.observed_at_block, e.observed_at)),
            governance: tables.governance.get(&asset_id).cloned(),
            chain_stats: tables.chain_stats.get(&chain.to_lowercase()).cloned(),
            audits: latest_by_block(tables.audits.get(&asset_id), |e| (0, e.observed_at)),
        })
    }

    async fn insert_score(&self, score: &Score) -> Result<(), StoreError> {
        if !self.assets.read().await.contains_key(&score.asset_id) {
            return Err(StoreError::Integrity(format!("score for unknown asset {}", score.asset_id)));
        }
        self.scores.write().await.entry(score.asset_id).or_default().push(score.clone());
        Ok(())
    }

    async fn latest_score(&self, asset_id: AssetId) -> Result<Option<Score>, StoreError> {
        Ok(self
            .scores
            .read()
            .await
            .get(&asset_id)
            .and_then(|rows| rows.iter().max_by_key(|s| (s.created_at, s.observed_at_block)).cloned()))
    }

    async fn score_history(&self, asset_id: AssetId, limit: usize) -> Result<Vec<Score>, StoreError> {
        let scores = self.scores.read().await;
        let mut rows = scores.get(&asset_id).cloned().unwrap_or_default();
        // newest insert first on equal timestamps
        rows.reverse();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn try_acquire_lock(
        &self,
        asset_id: AssetId,
        class: RefreshClass,
        owner: &str,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<LockAcquisition, StoreError> {
        let mut locks = self.locks.lock().await;

        let mut reclaimed = None;
        if let Some(current) = locks
            .iter_mut()
            .find(|l| l.asset_id == asset_id && l.refresh_class == class && l.status == LockStatus::InProgress)
        {
            if now - current.acquired_at < stale_after {
                return Ok(LockAcquisition::Contended { holder: current.clone() });
            }
            current.status = LockStatus::Failed;
            current.released_at = Some(now);
            reclaimed = Some(current.clone());
        }

        let lock = RefreshLock {
            id: Uuid::new_v4(),
            asset_id,
            refresh_class: class,
            acquired_at: now,
            owner: owner.to_string(),
            status: LockStatus::InProgress,
            released_at: None,
        };
        locks.push(lock.clone());
        Ok(LockAcquisition::Acquired { lock, reclaimed })
    }

    async fn release_lock(&self, lock_id: Uuid, status: LockStatus, now: DateTime<Utc>) -> Result<bool, StoreError> {
        if !status.is_terminal() {
            return Err(StoreError::Integrity("locks can only be released to a terminal status".to_string()));
        }
        let mut locks = self.locks.lock().await;
        let lock = locks
            .iter_mut()
            .find(|l| l.id == lock_id)
            .ok_or_else(|| StoreError::NotFound(format!("lock {}", lock_id)))?;
        if lock.status != LockStatus::InProgress {
            return Ok(false);
        }
        lock.status = status;
        lock.released_at = Some(now);
        Ok(true)
    }

    async fn get_lock(&self, lock_id: Uuid) -> Result<Option<RefreshLock>, StoreError> {
        Ok(self.locks.lock().await.iter().find(|l| l.id == lock_id).cloned())
    }

    async fn active_locks(&self) -> Result<Vec<RefreshLock>, StoreError> {
        Ok(self
            .locks
            .lock()
            .await
            .iter()
            .filter(|l| l.status == LockStatus::InProgress)
            .cloned()
            .collect())
    }

    async fn delete_terminal_locks_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut locks = self.locks.lock().await;
        let before = locks.len();
        locks.retain(|l| !(l.status.is_terminal() && l.released_at.unwrap_or(l.acquired_at) < cutoff));
        Ok((before - locks.len()) as u64)
    }

    async fn enqueue_job(&self, job: &Job) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.lock().await;
        let duplicate = jobs.iter().any(|j| {
            j.status == JobStatus::Queued
                && j.params.asset_id == job.params.asset_id
                && j.params.refresh_class == job.params.refresh_class
        });
        if duplicate {
            return Ok(false);
        }
        jobs.push(job.clone());
        Ok(true)
    }

    async fn dequeue_jobs(&self, limit: usize, now: DateTime<Utc>) -> Result<Vec<Job>, StoreError> {
        let mut jobs = self.jobs.lock().await;
        let mut queued: Vec<usize> = jobs
            .iter()
            .enumerate()
            .filter(|(_, j)| j.status == JobStatus::Queued)
            .map(|(i, _)| i)
            .collect();
        queued.sort_by(|a, b| {
            jobs[*b]
                .priority
                .cmp(&jobs[*a].priority)
                .then(jobs[*a].created_at.cmp(&jobs[*b].created_at))
        });

        let mut claimed = Vec::new();
        for index in queued.into_iter().take(limit) {
            let job = &mut jobs[index];
            job.status = JobStatus::Running;
            job.updated_at = now;
            claimed.push(job.clone());
        }
        Ok(claimed)
    }

    async fn finish_job(
        &self,
        job_id: JobId,
        status: JobStatus,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if !status.is_terminal() {
            return Err(StoreError::Integrity(format!("{} is not a terminal job status", status.as_str())));
        }
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or_else(|| StoreError::NotFound(format!("job {}", job_id)))?;
        if job.status.is_terminal() {
            return Err(StoreError::Integrity(format!("job {} is already {}", job_id, job.status.as_str())));
        }
        job.status = status;
        job.error = error;
        job.updated_at = now;
        Ok(())
    }

    async fn get_job(&self, job_id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.lock().await.iter().find(|j| j.id == job_id).cloned())
    }

    async fn queued_jobs(&self) -> Result<Vec<Job>, StoreError> {
        Ok(self
            .jobs
            .lock()
            .await
            .iter()
            .filter(|j| j.status == JobStatus::Queued)
            .cloned()
            .collect())
    }
}
