use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use decentrascore_backend::{
    aggregator::HoldersAggregator,
    api::{create_router, ApiState},
    chain::{ChainReader, RpcChainClient},
    config::BenchmarkConfig,
    introspection::ProxyIntrospector,
    orchestrator::{EvidenceProviders, IngestionEvent, IngestionOrchestrator},
    providers::{
        AuditProvider, AuditRegistryProvider, ChainStatsProvider, DexPoolsLiquidityProvider, ExplorerHoldersProvider,
        ExplorerSourceVerifier, HoldersProvider, IndexerHoldersProvider, SnapshotGovernanceProvider, TtlCache,
        ValidatorStatsProvider,
    },
    refresh::{spawn_lock_sweeper, RefreshLockCoordinator, RefreshWorker},
    scoring::ScoringEngine,
    service::BenchmarkService,
    store::{MemoryStore, PgStore, Store},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let config = BenchmarkConfig::from_env();

    let store: Arc<dyn Store> = match &config.database {
        Some(db) => {
            let pg = PgStore::connect(db).await?;
            pg.initialize_schema().await?;
            info!("✅ Postgres store connected");
            Arc::new(pg)
        }
        None => {
            warn!("⚠️ DATABASE_URL not set, evidence and scores live in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let chain: Arc<dyn ChainReader> = Arc::new(RpcChainClient::new(&config.chains));
    info!("✅ Chain client initialized for {} chains", config.chains.endpoints.len());

    let introspector = ProxyIntrospector::new(Arc::clone(&chain))
        .with_verifier(Arc::new(ExplorerSourceVerifier::new(&config.providers)));

    let mut holder_sources: Vec<Arc<dyn HoldersProvider>> = vec![Arc::new(
        ExplorerHoldersProvider::new(&config.providers).with_chain_reader(Arc::clone(&chain)),
    )];
    if let Some(base_url) = &config.providers.indexer_base_url {
        holder_sources.push(Arc::new(IndexerHoldersProvider::new(
            base_url.clone(),
            config.providers.indexer_api_key.clone(),
            config.providers.http_timeout,
        )));
    }
    info!("✅ {} holder sources registered", holder_sources.len());

    let audits: Option<Arc<dyn AuditProvider>> = match &config.providers.audit_registry_path {
        Some(path) => match AuditRegistryProvider::from_path(path).await {
            Ok(registry) => Some(Arc::new(registry)),
            Err(e) => {
                warn!("⚠️ Audit registry {} unavailable: {}", path.display(), e);
                None
            }
        },
        None => None,
    };

    let chain_stats: Option<Arc<dyn ChainStatsProvider>> =
        config.providers.validator_stats_base_url.as_ref().map(|base_url| {
            Arc::new(ValidatorStatsProvider::new(base_url.clone(), config.providers.http_timeout))
                as Arc<dyn ChainStatsProvider>
        });

    let providers = EvidenceProviders {
        holders: HoldersAggregator::new(holder_sources),
        liquidity: Some(Arc::new(DexPoolsLiquidityProvider::new(&config.providers))),
        governance: Some(Arc::new(SnapshotGovernanceProvider::new(
            config.providers.governance_hub_url.clone(),
            Arc::clone(&chain),
            TtlCache::new(config.governance_cache.spaces_ttl),
            config.providers.http_timeout,
        ))),
        chain_stats,
        audits,
    };

    let locks = Arc::new(RefreshLockCoordinator::new(Arc::clone(&store), &config.refresh));
    let orchestrator = Arc::new(IngestionOrchestrator::new(
        Arc::clone(&store),
        Arc::clone(&chain),
        introspector,
        providers,
        ScoringEngine::new(config.scoring.clone()),
        Arc::clone(&locks),
    ));

    // Optional subscriber; ingestion does not depend on it
    let mut events = orchestrator.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(IngestionEvent::ScoreComputed {
                    asset_id,
                    chain,
                    address,
                    total,
                    calc_version,
                    ..
                }) => {
                    info!("📣 Score {:.2} ({}) published for {} on {} [{}]", total, calc_version, address, chain, asset_id);
                }
                Err(RecvError::Lagged(skipped)) => warn!("Event subscriber lagged, {} events skipped", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let worker = Arc::new(RefreshWorker::new(
        Arc::clone(&store),
        Arc::clone(&orchestrator),
        config.refresh.clone(),
        format!("worker-{}", std::process::id()),
    ));
    Arc::clone(&worker).start().await;
    spawn_lock_sweeper(Arc::clone(&locks), config.refresh.sweep_interval);
    info!("✅ Refresh worker and lock sweeper running");

    let service = Arc::new(BenchmarkService::new(store, chain, locks, config.refresh.clone()));
    let app = create_router(ApiState::new(service)).layer(CorsLayer::permissive());

    info!("🚀 Starting server on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
