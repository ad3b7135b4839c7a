use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::transports::http::{Client, Http};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, warn};

use super::ChainError;
use crate::config::ChainRpcConfig;

/// Provider cache with health monitoring and endpoint fallback
#[derive(Clone)]
pub struct ProviderCache {
    providers: Arc<RwLock<HashMap<String, CachedProvider>>>,
    rpc_endpoints: HashMap<String, Vec<String>>,
    health_tracker: Arc<RwLock<HashMap<String, EndpointHealth>>>,
    provider_ttl: Duration,
    probe_timeout: Duration,
}

#[derive(Clone)]
struct CachedProvider {
    provider: RootProvider<Http<Client>>,
    rpc_url: String,
    created_at: Instant,
}

#[derive(Clone, Debug)]
pub(crate) struct EndpointHealth {
    pub(crate) success_rate: f32,
    pub(crate) last_failure: Option<Instant>,
    pub(crate) consecutive_failures: u32,
}

impl Default for EndpointHealth {
    fn default() -> Self {
        Self {
            success_rate: 1.0,
            last_failure: None,
            consecutive_failures: 0,
        }
    }
}

impl ProviderCache {
    pub fn new(config: &ChainRpcConfig) -> Self {
        let rpc_endpoints = config
            .endpoints
            .iter()
            .map(|(chain, urls)| (chain.to_lowercase(), urls.clone()))
            .collect();

        Self {
            providers: Arc::new(RwLock::new(HashMap::new())),
            rpc_endpoints,
            health_tracker: Arc::new(RwLock::new(HashMap::new())),
            provider_ttl: config.provider_ttl,
            probe_timeout: config.call_timeout,
        }
    }

    pub fn supports_chain(&self, chain: &str) -> bool {
        self.rpc_endpoints
            .get(chain)
            .map(|urls| !urls.is_empty())
            .unwrap_or(false)
    }

    /// Get a provider for `chain`, trying endpoints healthiest-first.
    pub async fn get_provider(&self, chain: &str) -> Result<RootProvider<Http<Client>>, ChainError> {
        if let Some(provider) = self.get_cached_provider(chain) {
            return Ok(provider);
        }

        let endpoints = self
            .rpc_endpoints
            .get(chain)
            .filter(|urls| !urls.is_empty())
            .ok_or_else(|| ChainError::UnsupportedChain(chain.to_string()))?;

        let ordered_endpoints = self.order_endpoints_by_health(chain, endpoints);

        for (i, rpc_url) in ordered_endpoints.iter().enumerate() {
            match self.create_provider(rpc_url).await {
                Ok(provider) => {
                    self.cache_provider(chain, provider.clone(), rpc_url);
                    self.record_success(chain, rpc_url);
                    return Ok(provider);
                }
                Err(e) => {
                    warn!("RPC endpoint {} for {} unavailable: {}", rpc_url, chain, e);
                    self.record_failure(chain, rpc_url);
                    if i < ordered_endpoints.len() - 1 {
                        sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        }

        Err(ChainError::AllEndpointsFailed(chain.to_string()))
    }

    /// Drop the cached provider after a failed call so the next request re-probes.
    pub fn report_failure(&self, chain: &str) {
        let url = self
            .providers
            .write()
            .ok()
            .and_then(|mut providers| providers.remove(chain))
            .map(|cached| cached.rpc_url);
        if let Some(url) = url {
            self.record_failure(chain, &url);
        }
    }

    async fn create_provider(&self, rpc_url: &str) -> Result<RootProvider<Http<Client>>, ChainError> {
        let parsed_url = rpc_url
            .parse()
            .map_err(|e| ChainError::Config(format!("Invalid RPC URL {}: {}", rpc_url, e)))?;

        let provider = ProviderBuilder::new().on_http(parsed_url);

        match tokio::time::timeout(self.probe_timeout, provider.get_block_number()).await {
            Ok(Ok(block)) => {
                debug!("RPC endpoint {} healthy at block {}", rpc_url, block);
                Ok(provider)
            }
            Ok(Err(e)) => Err(ChainError::Rpc(format!("Provider probe failed: {}", e))),
            Err(_) => Err(ChainError::Timeout(format!("Provider probe timed out: {}", rpc_url))),
        }
    }

    fn get_cached_provider(&self, chain: &str) -> Option<RootProvider<Http<Client>>> {
        let providers = self.providers.read().ok()?;
        let cached = providers.get(chain)?;
        if cached.created_at.elapsed() < self.provider_ttl {
            Some(cached.provider.clone())
        } else {
            None
        }
    }

    fn cache_provider(&self, chain: &str, provider: RootProvider<Http<Client>>, rpc_url: &str) {
        if let Ok(mut providers) = self.providers.write() {
            providers.insert(
                chain.to_string(),
                CachedProvider {
                    provider,
                    rpc_url: rpc_url.to_string(),
                    created_at: Instant::now(),
                },
            );
        }
    }

    fn order_endpoints_by_health(&self, chain: &str, endpoints: &[String]) -> Vec<String> {
        let health = self.health_tracker.read().ok();
        let mut scored: Vec<(String, f32)> = endpoints
            .iter()
            .map(|url| {
                let score = health
                    .as_ref()
                    .and_then(|h| h.get(&health_key(chain, url)))
                    .map(health_score)
                    .unwrap_or(1.0);
                (url.clone(), score)
            })
            .collect();

        // Stable sort keeps configured order among equally healthy endpoints
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().map(|(url, _)| url).collect()
    }

    fn record_success(&self, chain: &str, rpc_url: &str) {
        if let Ok(mut health) = self.health_tracker.write() {
            let entry = health.entry(health_key(chain, rpc_url)).or_default();
            entry.success_rate = (entry.success_rate * 0.9 + 0.1).min(1.0);
            entry.consecutive_failures = 0;
        }
    }

    fn record_failure(&self, chain: &str, rpc_url: &str) {
        if let Ok(mut health) = self.health_tracker.write() {
            let entry = health.entry(health_key(chain, rpc_url)).or_default();
            entry.success_rate *= 0.9;
            entry.last_failure = Some(Instant::now());
            entry.consecutive_failures += 1;
        }
    }
}

fn health_key(chain: &str, url: &str) -> String {
    format!("{}:{}", chain, url)
}

/// 0.0 (worst) to 1.0 (best)
pub(crate) fn health_score(health: &EndpointHealth) -> f32 {
    let mut score = health.success_rate;

    if let Some(last_failure) = health.last_failure {
        if last_failure.elapsed() < Duration::from_secs(60) {
            score *= 0.5;
        }
    }

    if health.consecutive_failures > 0 {
        score *= 0.9_f32.powi(health.consecutive_failures as i32);
    }

    score.clamp(0.0, 1.0)
}
