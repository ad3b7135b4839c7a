//! Single-flight refresh locks and the queued-job drain loop.

pub mod lock;
pub mod worker;

pub use lock::RefreshLockCoordinator;
pub use worker::{spawn_lock_sweeper, DrainReport, RefreshWorker};

use thiserror::Error;

use crate::store::StoreError;
use crate::types::{AssetId, RefreshClass};

#[derive(Error, Debug)]
pub enum LockError {
    #[error("Refresh already in progress for asset {asset_id} ({refresh_class})")]
    AlreadyInProgress {
        asset_id: AssetId,
        refresh_class: RefreshClass,
    },
    #[error("Lock store error: {0}")]
    Store(#[from] StoreError),
}

impl LockError {
    pub fn is_contention(&self) -> bool {
        matches!(self, LockError::AlreadyInProgress { .. })
    }
}
