//! Append-only evidence and score records, refresh locks and the job queue.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use alloy::primitives::Address;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::scoring::EvidenceSet;
use crate::types::{
    Asset, AssetId, AuditSnapshot, ChainStats, ContractIntrospection, GovernanceSnapshot, HoldersSnapshot, Job, JobId,
    JobStatus, LiquiditySnapshot, LockStatus, RefreshClass, RefreshLock, Score,
};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Integrity violation: {0}")]
    Integrity(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Result of one atomic lock acquisition attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum LockAcquisition {
    Acquired {
        lock: RefreshLock,
        /// A stale in-progress lock that was marked failed to make room.
        reclaimed: Option<RefreshLock>,
    },
    Contended {
        holder: RefreshLock,
    },
}

#[async_trait]
pub trait Store: Send + Sync {
    // assets
    async fn get_asset(&self, id: AssetId) -> Result<Option<Asset>, StoreError>;
    async fn find_asset(&self, chain: &str, address: Address) -> Result<Option<Asset>, StoreError>;
    /// Existing asset for `(chain, address)`, or a new `pending` one.
    async fn ensure_asset(&self, chain: &str, address: Address, now: DateTime<Utc>) -> Result<Asset, StoreError>;
    async fn update_asset(&self, asset: &Asset) -> Result<(), StoreError>;

    // evidence
    async fn insert_introspection(&self, asset_id: AssetId, evidence: &ContractIntrospection) -> Result<(), StoreError>;
    async fn insert_holders(&self, asset_id: AssetId, evidence: &HoldersSnapshot) -> Result<(), StoreError>;
    async fn insert_liquidity(&self, asset_id: AssetId, evidence: &LiquiditySnapshot) -> Result<(), StoreError>;
    /// One logical row per asset, overwritten.
    async fn upsert_governance(&self, asset_id: AssetId, evidence: &GovernanceSnapshot) -> Result<(), StoreError>;
    /// One logical row per chain, overwritten.
    async fn upsert_chain_stats(&self, evidence: &ChainStats) -> Result<(), StoreError>;
    async fn insert_audits(&self, asset_id: AssetId, evidence: &AuditSnapshot) -> Result<(), StoreError>;
    /// Most recent row of every evidence kind for the asset.
    async fn latest_evidence(&self, asset_id: AssetId, chain: &str) -> Result<EvidenceSet, StoreError>;

    // scores
    async fn insert_score(&self, score: &Score) -> Result<(), StoreError>;
    async fn latest_score(&self, asset_id: AssetId) -> Result<Option<Score>, StoreError>;
    async fn score_history(&self, asset_id: AssetId, limit: usize) -> Result<Vec<Score>, StoreError>;

    // locks
    /// Atomically take the single in-progress slot for `(asset_id, class)`.
    /// An in-progress lock older than `stale_after` is marked failed first.
    async fn try_acquire_lock(
        &self,
        asset_id: AssetId,
        class: RefreshClass,
        owner: &str,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<LockAcquisition, StoreError>;
    /// Move an in-progress lock to `status`. Returns false if it was already terminal.
    async fn release_lock(&self, lock_id: uuid::Uuid, status: LockStatus, now: DateTime<Utc>) -> Result<bool, StoreError>;
    async fn get_lock(&self, lock_id: uuid::Uuid) -> Result<Option<RefreshLock>, StoreError>;
    async fn active_locks(&self) -> Result<Vec<RefreshLock>, StoreError>;
    async fn delete_terminal_locks_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    // jobs
    /// Enqueue unless a queued job for the same asset and refresh class exists.
    async fn enqueue_job(&self, job: &Job) -> Result<bool, StoreError>;
    /// Claim up to `limit` queued jobs, highest priority then oldest first.
    async fn dequeue_jobs(&self, limit: usize, now: DateTime<Utc>) -> Result<Vec<Job>, StoreError>;
    /// Running job to a terminal status. Terminal jobs are never modified.
    async fn finish_job(
        &self,
        job_id: JobId,
        status: JobStatus,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;
    async fn get_job(&self, job_id: JobId) -> Result<Option<Job>, StoreError>;
    async fn queued_jobs(&self) -> Result<Vec<Job>, StoreError>;
}
