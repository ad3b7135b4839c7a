use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::Provider;
use alloy::rpc::types::{BlockId, TransactionRequest};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use super::{ChainError, ChainReader, ProviderCache};
use crate::config::ChainRpcConfig;

/// JSON-RPC backed `ChainReader` over the cached, health-ordered providers.
#[derive(Clone)]
pub struct RpcChainClient {
    providers: ProviderCache,
    call_timeout: Duration,
}

impl RpcChainClient {
    pub fn new(config: &ChainRpcConfig) -> Self {
        Self {
            providers: ProviderCache::new(config),
            call_timeout: config.call_timeout,
        }
    }

    async fn with_timeout<T, E, F>(&self, chain: &str, what: &str, fut: F) -> Result<T, ChainError>
    where
        F: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                debug!("{} on {} failed: {}", what, chain, e);
                Err(ChainError::Rpc(format!("{}: {}", what, e)))
            }
            Err(_) => {
                self.providers.report_failure(chain);
                Err(ChainError::Timeout(format!("{} on {}", what, chain)))
            }
        }
    }
}

#[async_trait]
impl ChainReader for RpcChainClient {
    fn supports_chain(&self, chain: &str) -> bool {
        self.providers.supports_chain(chain)
    }

    async fn storage_at(&self, chain: &str, address: Address, slot: B256) -> Result<B256, ChainError> {
        let provider = self.providers.get_provider(chain).await?;
        let key = U256::from_be_bytes(slot.0);
        let value = self
            .with_timeout(chain, "eth_getStorageAt", async { provider.get_storage_at(address, key).await })
            .await?;
        Ok(B256::from(value.to_be_bytes::<32>()))
    }

    async fn call(&self, chain: &str, to: Address, data: Bytes) -> Result<Bytes, ChainError> {
        let provider = self.providers.get_provider(chain).await?;
        let tx = TransactionRequest::default().to(to).input(data.into());
        self.with_timeout(chain, "eth_call", async { provider.call(&tx).block(BlockId::latest()).await })
            .await
    }

    async fn code_at(&self, chain: &str, address: Address) -> Result<Bytes, ChainError> {
        let provider = self.providers.get_provider(chain).await?;
        self.with_timeout(chain, "eth_getCode", async { provider.get_code_at(address).await })
            .await
    }

    async fn block_number(&self, chain: &str) -> Result<u64, ChainError> {
        let provider = self.providers.get_provider(chain).await?;
        self.with_timeout(chain, "eth_blockNumber", async { provider.get_block_number().await })
            .await
    }
}
