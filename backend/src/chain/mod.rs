//! Read-only blockchain access: storage slots, `eth_call`, bytecode and head block.

pub mod abi;
pub mod provider_cache;
pub mod rpc_client;

pub use abi::*;
pub use provider_cache::ProviderCache;
pub use rpc_client::RpcChainClient;

use alloy::primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChainError {
    #[error("Unsupported chain: {0}")]
    UnsupportedChain(String),
    #[error("RPC call failed: {0}")]
    Rpc(String),
    #[error("Request timeout: {0}")]
    Timeout(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("All RPC endpoints failed for chain: {0}")]
    AllEndpointsFailed(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ChainError {
    pub fn is_unsupported_chain(&self) -> bool {
        matches!(self, ChainError::UnsupportedChain(_))
    }
}

/// Raw node access. No business logic lives behind this trait.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Whether a node is configured for `chain` at all.
    fn supports_chain(&self, chain: &str) -> bool;

    async fn storage_at(&self, chain: &str, address: Address, slot: B256) -> Result<B256, ChainError>;

    /// `eth_call` against the latest block. A revert surfaces as `Err`.
    async fn call(&self, chain: &str, to: Address, data: Bytes) -> Result<Bytes, ChainError>;

    async fn code_at(&self, chain: &str, address: Address) -> Result<Bytes, ChainError>;

    async fn block_number(&self, chain: &str) -> Result<u64, ChainError>;
}
