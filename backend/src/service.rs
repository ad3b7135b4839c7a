//! The boundary external callers use: scorecard lookup, refresh requests, queue status.
//! Requests never run ingestion inline; they only enqueue jobs for the drain loop.

use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument};

use crate::chain::ChainReader;
use crate::config::RefreshConfig;
use crate::refresh::{LockError, RefreshLockCoordinator};
use crate::scoring::EvidenceSet;
use crate::store::{Store, StoreError};
use crate::types::{Asset, AssetId, Job, JobId, JobStatus, RefreshClass, RefreshParams, Score};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Refresh already in progress for asset {asset_id} ({refresh_class})")]
    AlreadyInProgress {
        asset_id: AssetId,
        refresh_class: RefreshClass,
    },
    #[error("Unsupported chain: {0}")]
    UnsupportedChain(String),
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Failed to enqueue refresh: {0}")]
    Enqueue(StoreError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl From<LockError> for ServiceError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::AlreadyInProgress { asset_id, refresh_class } => {
                ServiceError::AlreadyInProgress { asset_id, refresh_class }
            }
            LockError::Store(e) => ServiceError::Store(e),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Scorecard {
    pub asset: Asset,
    /// `None` until the first ingestion completes.
    pub score: Option<Score>,
    pub evidence: EvidenceSet,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTicket {
    pub job_id: JobId,
    pub asset_id: AssetId,
    pub refresh_class: RefreshClass,
    pub status: JobStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockView {
    pub asset_id: AssetId,
    pub refresh_class: RefreshClass,
    pub owner: String,
    pub acquired_at: DateTime<Utc>,
    /// Past the stale threshold; the next acquirer will reclaim it.
    pub stale: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedJobView {
    pub job_id: JobId,
    pub asset_id: AssetId,
    pub chain: String,
    pub address: Address,
    pub refresh_class: RefreshClass,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub queue_depth: usize,
    pub active_locks: Vec<LockView>,
    pub queued: Vec<QueuedJobView>,
}

pub struct BenchmarkService {
    store: Arc<dyn Store>,
    chain: Arc<dyn ChainReader>,
    locks: Arc<RefreshLockCoordinator>,
    config: RefreshConfig,
}

impl BenchmarkService {
    pub fn new(
        store: Arc<dyn Store>,
        chain: Arc<dyn ChainReader>,
        locks: Arc<RefreshLockCoordinator>,
        config: RefreshConfig,
    ) -> Self {
        Self {
            store,
            chain,
            locks,
            config,
        }
    }

    pub fn parse_address(raw: &str) -> Result<Address, ServiceError> {
        Address::from_str(raw.trim()).map_err(|_| ServiceError::InvalidAddress(raw.to_string()))
    }

    fn supported_chain(&self, chain: &str) -> Result<String, ServiceError> {
        let chain = chain.to_lowercase();
        if !self.chain.supports_chain(&chain) {
            return Err(ServiceError::UnsupportedChain(chain));
        }
        Ok(chain)
    }

    async fn known_asset(&self, chain: &str, address: &str) -> Result<Asset, ServiceError> {
        let chain = self.supported_chain(chain)?;
        let address = Self::parse_address(address)?;
        self.store
            .find_asset(&chain, address)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("asset {} on {}", address, chain)))
    }

    /// Latest score plus the most recent evidence of every kind. An unknown
    /// asset is registered as `pending` and comes back without a score.
    pub async fn scorecard(&self, chain: &str, address: &str) -> Result<Scorecard, ServiceError> {
        let chain = self.supported_chain(chain)?;
        let address = Self::parse_address(address)?;
        let asset = self.store.ensure_asset(&chain, address, Utc::now()).await?;
        let score = self.store.latest_score(asset.id).await?;
        let evidence = self.store.latest_evidence(asset.id, &asset.chain).await?;
        Ok(Scorecard { asset, score, evidence })
    }

    pub async fn score_history(&self, chain: &str, address: &str, limit: usize) -> Result<Vec<Score>, ServiceError> {
        let asset = self.known_asset(chain, address).await?;
        Ok(self.store.score_history(asset.id, limit).await?)
    }

    /// Enqueue a refresh, creating the asset when unknown. Rejected when the same
    /// class is already running or queued for this asset.
    #[instrument(skip(self))]
    pub async fn request_refresh(
        &self,
        chain: &str,
        address: &str,
        class: RefreshClass,
        priority: Option<i32>,
    ) -> Result<RefreshTicket, ServiceError> {
        let chain = self.supported_chain(chain)?;
        let address = Self::parse_address(address)?;
        let now = Utc::now();

        let asset = self.store.ensure_asset(&chain, address, now).await?;
        if self.locks.current(asset.id, class, now).await?.is_some() {
            info!("Refresh {} for {} rejected: lock held", class, asset.id);
            return Err(ServiceError::AlreadyInProgress {
                asset_id: asset.id,
                refresh_class: class,
            });
        }

        let job = Job::refresh(
            RefreshParams {
                asset_id: asset.id,
                chain: chain.clone(),
                address,
                refresh_class: class,
            },
            priority.unwrap_or(self.config.default_priority),
            now,
        );

        let enqueued = self.store.enqueue_job(&job).await.map_err(ServiceError::Enqueue)?;
        if !enqueued {
            info!("Refresh {} for {} rejected: already queued", class, asset.id);
            return Err(ServiceError::AlreadyInProgress {
                asset_id: asset.id,
                refresh_class: class,
            });
        }

        info!("Queued {} refresh job {} for {} on {}", class, job.id, address, chain);
        Ok(RefreshTicket {
            job_id: job.id,
            asset_id: asset.id,
            refresh_class: class,
            status: job.status,
        })
    }

    pub async fn job(&self, job_id: JobId) -> Result<Job, ServiceError> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("job {}", job_id)))
    }

    /// Lock state and queue depth, optionally narrowed to one asset.
    pub async fn queue_status(&self, asset_id: Option<AssetId>) -> Result<QueueStatus, ServiceError> {
        let now = Utc::now();
        let stale_after = self.locks.stale_after();
        let in_scope = |id: AssetId| asset_id.map_or(true, |wanted| wanted == id);

        let active_locks = self
            .store
            .active_locks()
            .await?
            .into_iter()
            .filter(|lock| in_scope(lock.asset_id))
            .map(|lock| LockView {
                asset_id: lock.asset_id,
                refresh_class: lock.refresh_class,
                stale: now - lock.acquired_at >= stale_after,
                owner: lock.owner,
                acquired_at: lock.acquired_at,
            })
            .collect();

        let queued: Vec<QueuedJobView> = self
            .store
            .queued_jobs()
            .await?
            .into_iter()
            .filter(|job| in_scope(job.params.asset_id))
            .map(|job| QueuedJobView {
                job_id: job.id,
                asset_id: job.params.asset_id,
                chain: job.params.chain,
                address: job.params.address,
                refresh_class: job.params.refresh_class,
                priority: job.priority,
                created_at: job.created_at,
            })
            .collect();

        Ok(QueueStatus {
            queue_depth: queued.len(),
            active_locks,
            queued,
        })
    }

    /// Resolve `(chain, address)` to an asset id for status filtering.
    pub async fn asset_id(&self, chain: &str, address: &str) -> Result<AssetId, ServiceError> {
        Ok(self.known_asset(chain, address).await?.id)
    }
}
