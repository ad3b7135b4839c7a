use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::str::FromStr;
use tracing::{info, warn};
use uuid::Uuid;

use super::{LockAcquisition, Store, StoreError};
use crate::config::DatabaseConfig;
use crate::scoring::EvidenceSet;
use crate::types::{
    Asset, AssetId, AssetMetadata, AssetStatus, AuditReport, AuditSnapshot, CategoryValues, ChainStats,
    ConsensusStatus, ContractIntrospection, GovernanceFramework, GovernanceSnapshot, HolderShare, HoldersSnapshot,
    Job, JobId, JobStatus, JobType, LiquidityPool, LiquiditySnapshot, LockStatus, ProxyKind, RefreshClass,
    RefreshLock, RefreshParams, RoleHolder, Score, TokenStandard, TurnoutRecord,
};

const UNIQUE_VIOLATION: &str = "23505";

/// Postgres-backed store. Schema is created on startup by [`PgStore::initialize_schema`].
pub struct PgStore {
    pool: PgPool,
}

#[derive(Debug, FromRow)]
struct AssetRow {
    id: Uuid,
    chain: String,
    address: String,
    standard: String,
    symbol: Option<String>,
    name: Option<String>,
    decimals: Option<i16>,
    icon_url: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct IntrospectionRow {
    verified: bool,
    upgradeable: bool,
    proxy_kind: Option<String>,
    implementation_address: Option<String>,
    admin_address: Option<String>,
    owner_address: Option<String>,
    roles: Json<Vec<RoleHolder>>,
    pausable: bool,
    timelock_secs: Option<i64>,
    risk_estimate: f64,
    observed_at_block: i64,
    observed_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct HoldersRow {
    total_supply: String,
    free_float: String,
    top_holders: Json<Vec<HolderShare>>,
    top1_pct: f64,
    top3_pct: f64,
    top10_pct: f64,
    herfindahl_index: f64,
    gini_coefficient: f64,
    nakamoto_coefficient: i32,
    contract_share_pct: f64,
    eoa_share_pct: f64,
    coverage_pct: f64,
    sample_size: i32,
    source_name: String,
    contributing_sources: Json<Vec<String>>,
    consensus_status: String,
    observed_at_block: i64,
    observed_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct LiquidityRow {
    pools: Json<Vec<LiquidityPool>>,
    centralized_venue_share_pct: f64,
    source_name: String,
    observed_at_block: i64,
    observed_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct GovernanceRow {
    framework: Option<String>,
    quorum_pct: Option<f64>,
    turnout_history: Json<Vec<TurnoutRecord>>,
    observed_at_block: i64,
    observed_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct ChainStatsRow {
    chain: String,
    validator_count: Option<i32>,
    top_validators_share_pct: Option<f64>,
    nakamoto_coefficient: Option<i32>,
    observed_at_block: i64,
    observed_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct AuditsRow {
    audits: Json<Vec<AuditReport>>,
    observed_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct ScoreRow {
    id: Uuid,
    asset_id: Uuid,
    sub_scores: Json<CategoryValues>,
    weights: Json<CategoryValues>,
    confidence: Json<CategoryValues>,
    total: f64,
    calc_version: String,
    observed_at_block: i64,
    created_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct LockRow {
    id: Uuid,
    asset_id: Uuid,
    refresh_class: String,
    acquired_at: DateTime<Utc>,
    owner: String,
    status: String,
    released_at: Option<DateTime<Utc>>,
}

#[derive(Debug, FromRow)]
struct JobRow {
    id: Uuid,
    params: Json<RefreshParams>,
    status: String,
    priority: i32,
    error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn parse_address(raw: &str) -> Result<Address, StoreError> {
    Address::from_str(raw).map_err(|e| StoreError::Serialization(format!("bad address {:?}: {}", raw, e)))
}

fn parse_opt_address(raw: Option<String>) -> Result<Option<Address>, StoreError> {
    raw.as_deref().map(parse_address).transpose()
}

fn parse_u256(raw: &str) -> Result<U256, StoreError> {
    U256::from_str_radix(raw, 10).map_err(|e| StoreError::Serialization(format!("bad integer {:?}: {}", raw, e)))
}

fn address_text(address: Address) -> String {
    format!("{:#x}", address)
}

impl TryFrom<AssetRow> for Asset {
    type Error = StoreError;

    fn try_from(row: AssetRow) -> Result<Self, Self::Error> {
        Ok(Asset {
            id: row.id,
            chain: row.chain,
            address: parse_address(&row.address)?,
            standard: TokenStandard::from_str(&row.standard)
                .ok_or_else(|| StoreError::Serialization(format!("token standard {}", row.standard)))?,
            metadata: AssetMetadata {
                symbol: row.symbol,
                name: row.name,
                decimals: row.decimals.and_then(|d| u8::try_from(d).ok()),
                icon_url: row.icon_url,
            },
            status: AssetStatus::from_str(&row.status)
                .ok_or_else(|| StoreError::Serialization(format!("asset status {}", row.status)))?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl TryFrom<IntrospectionRow> for ContractIntrospection {
    type Error = StoreError;

    fn try_from(row: IntrospectionRow) -> Result<Self, Self::Error> {
        Ok(ContractIntrospection {
            verified: row.verified,
            upgradeable: row.upgradeable,
            proxy_kind: row.proxy_kind.as_deref().and_then(ProxyKind::from_str),
            implementation_address: parse_opt_address(row.implementation_address)?,
            admin_address: parse_opt_address(row.admin_address)?,
            owner_address: parse_opt_address(row.owner_address)?,
            roles: row.roles.0,
            pausable: row.pausable,
            timelock: row.timelock_secs.map(|s| s.max(0) as u64),
            risk_estimate: row.risk_estimate,
            observed_at_block: row.observed_at_block.max(0) as u64,
            observed_at: row.observed_at,
        })
    }
}

impl TryFrom<HoldersRow> for HoldersSnapshot {
    type Error = StoreError;

    fn try_from(row: HoldersRow) -> Result<Self, Self::Error> {
        Ok(HoldersSnapshot {
            total_supply: parse_u256(&row.total_supply)?,
            free_float: parse_u256(&row.free_float)?,
            top_holders: row.top_holders.0,
            top1_pct: row.top1_pct,
            top3_pct: row.top3_pct,
            top10_pct: row.top10_pct,
            herfindahl_index: row.herfindahl_index,
            gini_coefficient: row.gini_coefficient,
            nakamoto_coefficient: row.nakamoto_coefficient.max(0) as u32,
            contract_share_pct: row.contract_share_pct,
            eoa_share_pct: row.eoa_share_pct,
            coverage_pct: row.coverage_pct,
            sample_size: row.sample_size.max(0) as u32,
            source_name: row.source_name,
            contributing_sources: row.contributing_sources.0,
            consensus_status: ConsensusStatus::from_label(&row.consensus_status)
                .ok_or_else(|| StoreError::Serialization(format!("consensus status {}", row.consensus_status)))?,
            observed_at_block: row.observed_at_block.max(0) as u64,
            observed_at: row.observed_at,
        })
    }
}

impl From<LiquidityRow> for LiquiditySnapshot {
    fn from(row: LiquidityRow) -> Self {
        LiquiditySnapshot {
            pools: row.pools.0,
            centralized_venue_share_pct: row.centralized_venue_share_pct,
            source_name: row.source_name,
            observed_at_block: row.observed_at_block.max(0) as u64,
            observed_at: row.observed_at,
        }
    }
}

impl From<GovernanceRow> for GovernanceSnapshot {
    fn from(row: GovernanceRow) -> Self {
        GovernanceSnapshot {
            framework: row.framework.as_deref().map(GovernanceFramework::from_str),
            quorum_pct: row.quorum_pct,
            turnout_history: row.turnout_history.0,
            observed_at_block: row.observed_at_block.max(0) as u64,
            observed_at: row.observed_at,
        }
    }
}

impl From<ChainStatsRow> for ChainStats {
    fn from(row: ChainStatsRow) -> Self {
        ChainStats {
            chain: row.chain,
            validator_count: row.validator_count.map(|v| v.max(0) as u32),
            top_validators_share_pct: row.top_validators_share_pct,
            nakamoto_coefficient: row.nakamoto_coefficient.map(|v| v.max(0) as u32),
            observed_at_block: row.observed_at_block.max(0) as u64,
            observed_at: row.observed_at,
        }
    }
}

impl From<ScoreRow> for Score {
    fn from(row: ScoreRow) -> Self {
        Score {
            id: row.id,
            asset_id: row.asset_id,
            sub_scores: row.sub_scores.0,
            weights: row.weights.0,
            confidence: row.confidence.0,
            total: row.total,
            calc_version: row.calc_version,
            observed_at_block: row.observed_at_block.max(0) as u64,
            created_at: row.created_at,
        }
    }
}

impl TryFrom<LockRow> for RefreshLock {
    type Error = StoreError;

    fn try_from(row: LockRow) -> Result<Self, Self::Error> {
        Ok(RefreshLock {
            id: row.id,
            asset_id: row.asset_id,
            refresh_class: RefreshClass::from_str(&row.refresh_class)
                .ok_or_else(|| StoreError::Serialization(format!("refresh class {}", row.refresh_class)))?,
            acquired_at: row.acquired_at,
            owner: row.owner,
            status: LockStatus::from_str(&row.status)
                .ok_or_else(|| StoreError::Serialization(format!("lock status {}", row.status)))?,
            released_at: row.released_at,
        })
    }
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Job {
            id: row.id,
            job_type: JobType::Refresh,
            params: row.params.0,
            status: JobStatus::from_str(&row.status)
                .ok_or_else(|| StoreError::Serialization(format!("job status {}", row.status)))?,
            priority: row.priority,
            error: row.error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const LOCK_COLUMNS: &str = "id, asset_id, refresh_class, acquired_at, owner, status, released_at";
const JOB_COLUMNS: &str = "id, params, status, priority, error, created_at, updated_at";

impl PgStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connection_timeout)
            .connect(&config.url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn initialize_schema(&self) -> Result<(), StoreError> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS assets (
                id UUID PRIMARY KEY,
                chain VARCHAR(32) NOT NULL,
                address VARCHAR(42) NOT NULL,
                standard VARCHAR(16) NOT NULL,
                symbol TEXT,
                name TEXT,
                decimals SMALLINT,
                icon_url TEXT,
                status VARCHAR(16) NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                UNIQUE (chain, address)
            )"#,
            r#"
            CREATE TABLE IF NOT EXISTS contract_introspections (
                id BIGSERIAL PRIMARY KEY,
                asset_id UUID NOT NULL REFERENCES assets(id),
                verified BOOLEAN NOT NULL,
                upgradeable BOOLEAN NOT NULL,
                proxy_kind VARCHAR(32),
                implementation_address VARCHAR(42),
                admin_address VARCHAR(42),
                owner_address VARCHAR(42),
                roles JSONB NOT NULL,
                pausable BOOLEAN NOT NULL,
                timelock_secs BIGINT,
                risk_estimate DOUBLE PRECISION NOT NULL,
                observed_at_block BIGINT NOT NULL,
                observed_at TIMESTAMPTZ NOT NULL
            )"#,
            r#"
            CREATE TABLE IF NOT EXISTS holders_snapshots (
                id BIGSERIAL PRIMARY KEY,
                asset_id UUID NOT NULL REFERENCES assets(id),
                total_supply TEXT NOT NULL,
                free_float TEXT NOT NULL,
                top_holders JSONB NOT NULL,
                top1_pct DOUBLE PRECISION NOT NULL,
                top3_pct DOUBLE PRECISION NOT NULL,
                top10_pct DOUBLE PRECISION NOT NULL,
                herfindahl_index DOUBLE PRECISION NOT NULL,
                gini_coefficient DOUBLE PRECISION NOT NULL,
                nakamoto_coefficient INTEGER NOT NULL,
                contract_share_pct DOUBLE PRECISION NOT NULL,
                eoa_share_pct DOUBLE PRECISION NOT NULL,
                coverage_pct DOUBLE PRECISION NOT NULL,
                sample_size INTEGER NOT NULL,
                source_name TEXT NOT NULL,
                contributing_sources JSONB NOT NULL,
                consensus_status TEXT NOT NULL,
                observed_at_block BIGINT NOT NULL,
                observed_at TIMESTAMPTZ NOT NULL
            )"#,
            r#"
            CREATE TABLE IF NOT EXISTS liquidity_snapshots (
                id BIGSERIAL PRIMARY KEY,
                asset_id UUID NOT NULL REFERENCES assets(id),
                pools JSONB NOT NULL,
                centralized_venue_share_pct DOUBLE PRECISION NOT NULL,
                source_name TEXT NOT NULL,
                observed_at_block BIGINT NOT NULL,
                observed_at TIMESTAMPTZ NOT NULL
            )"#,
            r#"
            CREATE TABLE IF NOT EXISTS governance_snapshots (
                asset_id UUID PRIMARY KEY REFERENCES assets(id),
                framework VARCHAR(32),
                quorum_pct DOUBLE PRECISION,
                turnout_history JSONB NOT NULL,
                observed_at_block BIGINT NOT NULL,
                observed_at TIMESTAMPTZ NOT NULL
            )"#,
            r#"
            CREATE TABLE IF NOT EXISTS chain_stats (
                chain VARCHAR(32) PRIMARY KEY,
                validator_count INTEGER,
                top_validators_share_pct DOUBLE PRECISION,
                nakamoto_coefficient INTEGER,
                observed_at_block BIGINT NOT NULL,
                observed_at TIMESTAMPTZ NOT NULL
            )"#,
            r#"
            CREATE TABLE IF NOT EXISTS audit_snapshots (
                id BIGSERIAL PRIMARY KEY,
                asset_id UUID NOT NULL REFERENCES assets(id),
                audits JSONB NOT NULL,
                observed_at TIMESTAMPTZ NOT NULL
            )"#,
            r#"
            CREATE TABLE IF NOT EXISTS scores (
                id UUID PRIMARY KEY,
                asset_id UUID NOT NULL REFERENCES assets(id),
                sub_scores JSONB NOT NULL,
                weights JSONB NOT NULL,
                confidence JSONB NOT NULL,
                total DOUBLE PRECISION NOT NULL,
                calc_version VARCHAR(16) NOT NULL,
                observed_at_block BIGINT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )"#,
            r#"
            CREATE TABLE IF NOT EXISTS refresh_locks (
                id UUID PRIMARY KEY,
                asset_id UUID NOT NULL,
                refresh_class VARCHAR(16) NOT NULL,
                acquired_at TIMESTAMPTZ NOT NULL,
                owner TEXT NOT NULL,
                status VARCHAR(16) NOT NULL,
                released_at TIMESTAMPTZ
            )"#,
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id UUID PRIMARY KEY,
                job_type VARCHAR(16) NOT NULL,
                params JSONB NOT NULL,
                asset_id UUID NOT NULL,
                refresh_class VARCHAR(16) NOT NULL,
                status VARCHAR(16) NOT NULL,
                priority INTEGER NOT NULL DEFAULT 0,
                error TEXT,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )"#,
            // at most one in-flight lock and one queued job per (asset, class)
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_refresh_locks_in_progress ON refresh_locks (asset_id, refresh_class) WHERE status = 'in_progress'",
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_single_queued ON jobs (asset_id, refresh_class) WHERE status = 'queued'",
            "CREATE INDEX IF NOT EXISTS idx_jobs_drain ON jobs (status, priority DESC, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_introspections_asset_block ON contract_introspections (asset_id, observed_at_block DESC)",
            "CREATE INDEX IF NOT EXISTS idx_holders_asset_block ON holders_snapshots (asset_id, observed_at_block DESC)",
            "CREATE INDEX IF NOT EXISTS idx_liquidity_asset_block ON liquidity_snapshots (asset_id, observed_at_block DESC)",
            "CREATE INDEX IF NOT EXISTS idx_scores_asset_created ON scores (asset_id, created_at DESC)",
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("✅ Database schema initialized");
        Ok(())
    }

    async fn fetch_lock_holder(&self, asset_id: AssetId, class: RefreshClass) -> Result<Option<RefreshLock>, StoreError> {
        let row: Option<LockRow> = sqlx::query_as(&format!(
            "SELECT {} FROM refresh_locks WHERE asset_id = $1 AND refresh_class = $2 AND status = 'in_progress'",
            LOCK_COLUMNS
        ))
        .bind(asset_id)
        .bind(class.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(RefreshLock::try_from).transpose()
    }

    async fn insert_lock(tx: &mut Transaction<'_, Postgres>, lock: &RefreshLock) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO refresh_locks (id, asset_id, refresh_class, acquired_at, owner, status) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(lock.id)
        .bind(lock.asset_id)
        .bind(lock.refresh_class.as_str())
        .bind(lock.acquired_at)
        .bind(&lock.owner)
        .bind(lock.status.as_str())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION))
}

#[async_trait]
impl Store for PgStore {
    async fn get_asset(&self, id: AssetId) -> Result<Option<Asset>, StoreError> {
        let row: Option<AssetRow> = sqlx::query_as("SELECT * FROM assets WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Asset::try_from).transpose()
    }

    async fn find_asset(&self, chain: &str, address: Address) -> Result<Option<Asset>, StoreError> {
        let row: Option<AssetRow> = sqlx::query_as("SELECT * FROM assets WHERE chain = $1 AND address = $2")
            .bind(chain.to_lowercase())
            .bind(address_text(address))
            .fetch_optional(&self.pool)
            .await?;
        row.map(Asset::try_from).transpose()
    }

    async fn ensure_asset(&self, chain: &str, address: Address, now: DateTime<Utc>) -> Result<Asset, StoreError> {
        let asset = Asset::new_pending(chain, address, now);
        sqlx::query(
            r#"
            INSERT INTO assets (id, chain, address, standard, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            ON CONFLICT (chain, address) DO NOTHING
            "#,
        )
        .bind(asset.id)
        .bind(&asset.chain)
        .bind(address_text(address))
        .bind(asset.standard.as_str())
        .bind(asset.status.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.find_asset(chain, address)
            .await?
            .ok_or_else(|| StoreError::Integrity(format!("asset {} on {} vanished after insert", address, chain)))
    }

    async fn update_asset(&self, asset: &Asset) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE assets SET symbol = $2, name = $3, decimals = $4, icon_url = $5, status = $6, updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(asset.id)
        .bind(&asset.metadata.symbol)
        .bind(&asset.metadata.name)
        .bind(asset.metadata.decimals.map(i16::from))
        .bind(&asset.metadata.icon_url)
        .bind(asset.status.as_str())
        .bind(asset.updated_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("asset {}", asset.id)));
        }
        Ok(())
    }

    async fn insert_introspection(&self, asset_id: AssetId, evidence: &ContractIntrospection) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO contract_introspections
                (asset_id, verified, upgradeable, proxy_kind, implementation_address, admin_address, owner_address,
                 roles, pausable, timelock_secs, risk_estimate, observed_at_block, observed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(asset_id)
        .bind(evidence.verified)
        .bind(evidence.upgradeable)
        .bind(evidence.proxy_kind.map(|k| k.as_str()))
        .bind(evidence.implementation_address.map(address_text))
        .bind(evidence.admin_address.map(address_text))
        .bind(evidence.owner_address.map(address_text))
        .bind(Json(&evidence.roles))
        .bind(evidence.pausable)
        .bind(evidence.timelock.map(|s| s.min(i64::MAX as u64) as i64))
        .bind(evidence.risk_estimate)
        .bind(evidence.observed_at_block as i64)
        .bind(evidence.observed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_holders(&self, asset_id: AssetId, evidence: &HoldersSnapshot) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO holders_snapshots
                (asset_id, total_supply, free_float, top_holders, top1_pct, top3_pct, top10_pct, herfindahl_index,
                 gini_coefficient, nakamoto_coefficient, contract_share_pct, eoa_share_pct, coverage_pct, sample_size,
                 source_name, contributing_sources, consensus_status, observed_at_block, observed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(asset_id)
        .bind(evidence.total_supply.to_string())
        .bind(evidence.free_float.to_string())
        .bind(Json(&evidence.top_holders))
        .bind(evidence.top1_pct)
        .bind(evidence.top3_pct)
        .bind(evidence.top10_pct)
        .bind(evidence.herfindahl_index)
        .bind(evidence.gini_coefficient)
        .bind(evidence.nakamoto_coefficient as i32)
        .bind(evidence.contract_share_pct)
        .bind(evidence.eoa_share_pct)
        .bind(evidence.coverage_pct)
        .bind(evidence.sample_size as i32)
        .bind(&evidence.source_name)
        .bind(Json(&evidence.contributing_sources))
        .bind(evidence.consensus_status.to_string())
        .bind(evidence.observed_at_block as i64)
        .bind(evidence.observed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_liquidity(&self, asset_id: AssetId, evidence: &LiquiditySnapshot) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO liquidity_snapshots
                (asset_id, pools, centralized_venue_share_pct, source_name, observed_at_block, observed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(asset_id)
        .bind(Json(&evidence.pools))
        .bind(evidence.centralized_venue_share_pct)
        .bind(&evidence.source_name)
        .bind(evidence.observed_at_block as i64)
        .bind(evidence.observed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_governance(&self, asset_id: AssetId, evidence: &GovernanceSnapshot) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO governance_snapshots (asset_id, framework, quorum_pct, turnout_history, observed_at_block, observed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (asset_id) DO UPDATE SET
                framework = EXCLUDED.framework,
                quorum_pct = EXCLUDED.quorum_pct,
                turnout_history = EXCLUDED.turnout_history,
                observed_at_block = EXCLUDED.observed_at_block,
                observed_at = EXCLUDED.observed_at
            "#,
        )
        .bind(asset_id)
        .bind(evidence.framework.map(|f| f.as_str()))
        .bind(evidence.quorum_pct)
        .bind(Json(&evidence.turnout_history))
        .bind(evidence.observed_at_block as i64)
        .bind(evidence.observed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_chain_stats(&self, evidence: &ChainStats) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO chain_stats (chain, validator_count, top_validators_share_pct, nakamoto_coefficient, observed_at_block, observed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (chain) DO UPDATE SET
                validator_count = EXCLUDED.validator_count,
                top_validators_share_pct = EXCLUDED.top_validators_share_pct,
                nakamoto_coefficient = EXCLUDED.nakamoto_coefficient,
                observed_at_block = EXCLUDED.observed_at_block,
                observed_at = EXCLUDED.observed_at
            "#,
        )
        .bind(evidence.chain.to_lowercase())
        .bind(evidence.validator_count.map(|v| v as i32))
        .bind(evidence.top_validators_share_pct)
        .bind(evidence.nakamoto_coefficient.map(|v| v as i32))
        .bind(evidence.observed_at_block as i64)
        .bind(evidence.observed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_audits(&self, asset_id: AssetId, evidence: &AuditSnapshot) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO audit_snapshots (asset_id, audits, observed_at) VALUES ($1, $2, $3)")
            .bind(asset_id)
            .bind(Json(&evidence.audits))
            .bind(evidence.observed_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn latest_evidence(&self, asset_id: AssetId, chain: &str) -> Result<EvidenceSet, StoreError> {
        let contract: Option<IntrospectionRow> = sqlx::query_as(
            "SELECT * FROM contract_introspections WHERE asset_id = $1 ORDER BY observed_at_block DESC, observed_at DESC LIMIT 1",
        )
        .bind(asset_id)
        .fetch_optional(&self.pool)
        .await?;

        let holders: Option<HoldersRow> = sqlx::query_as(
            "SELECT * FROM holders_snapshots WHERE asset_id = $1 ORDER BY observed_at_block DESC, observed_at DESC LIMIT 1",
        )
        .bind(asset_id)
        .fetch_optional(&self.pool)
        .await?;

        let liquidity: Option<LiquidityRow> = sqlx::query_as(
            "SELECT * FROM liquidity_snapshots WHERE asset_id = $1 ORDER BY observed_at_block DESC, observed_at DESC LIMIT 1",
        )
        .bind(asset_id)
        .fetch_optional(&self.pool)
        .await?;

        let governance: Option<GovernanceRow> = sqlx::query_as("SELECT * FROM governance_snapshots WHERE asset_id = $1")
            .bind(asset_id)
            .fetch_optional(&self.pool)
            .await?;

        let chain_stats: Option<ChainStatsRow> = sqlx::query_as("SELECT * FROM chain_stats WHERE chain = $1")
            .bind(chain.to_lowercase())
            .fetch_optional(&self.pool)
            .await?;

        let audits: Option<AuditsRow> =
            sqlx::query_as("SELECT * FROM audit_snapshots WHERE asset_id = $1 ORDER BY observed_at DESC LIMIT 1")
                .bind(asset_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(EvidenceSet {
            contract: contract.map(ContractIntrospection::try_from).transpose()?,
            holders: holders.map(HoldersSnapshot::try_from).transpose()?,
            liquidity: liquidity.map(LiquiditySnapshot::from),
            governance: governance.map(GovernanceSnapshot::from),
            chain_stats: chain_stats.map(ChainStats::from),
            audits: audits.map(|row| AuditSnapshot {
                audits: row.audits.0,
                observed_at: row.observed_at,
            }),
        })
    }

    async fn insert_score(&self, score: &Score) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO scores (id, asset_id, sub_scores, weights, confidence, total, calc_version, observed_at_block, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(score.id)
        .bind(score.asset_id)
        .bind(Json(&score.sub_scores))
        .bind(Json(&score.weights))
        .bind(Json(&score.confidence))
        .bind(score.total)
        .bind(&score.calc_version)
        .bind(score.observed_at_block as i64)
        .bind(score.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_score(&self, asset_id: AssetId) -> Result<Option<Score>, StoreError> {
        let row: Option<ScoreRow> = sqlx::query_as(
            "SELECT * FROM scores WHERE asset_id = $1 ORDER BY created_at DESC, observed_at_block DESC LIMIT 1",
        )
        .bind(asset_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Score::from))
    }

    async fn score_history(&self, asset_id: AssetId, limit: usize) -> Result<Vec<Score>, StoreError> {
        let rows: Vec<ScoreRow> =
            sqlx::query_as("SELECT * FROM scores WHERE asset_id = $1 ORDER BY created_at DESC LIMIT $2")
                .bind(asset_id)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(Score::from).collect())
    }

    async fn try_acquire_lock(
        &self,
        asset_id: AssetId,
        class: RefreshClass,
        owner: &str,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<LockAcquisition, StoreError> {
        let mut tx = self.pool.begin().await?;

        let current: Option<LockRow> = sqlx::query_as(&format!(
            "SELECT {} FROM refresh_locks WHERE asset_id = $1 AND refresh_class = $2 AND status = 'in_progress' FOR UPDATE",
            LOCK_COLUMNS
        ))
        .bind(asset_id)
        .bind(class.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let mut reclaimed = None;
        if let Some(row) = current {
            let mut holder = RefreshLock::try_from(row)?;
            if now - holder.acquired_at < stale_after {
                tx.rollback().await?;
                return Ok(LockAcquisition::Contended { holder });
            }
            sqlx::query("UPDATE refresh_locks SET status = 'failed', released_at = $2 WHERE id = $1")
                .bind(holder.id)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            holder.status = LockStatus::Failed;
            holder.released_at = Some(now);
            reclaimed = Some(holder);
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

        match Self::insert_lock(&mut tx, &lock).await {
            Ok(()) => {
                tx.commit().await?;
                Ok(LockAcquisition::Acquired { lock, reclaimed })
            }
            Err(e) if is_unique_violation(&e) => {
                // a concurrent acquirer inserted first
                tx.rollback().await?;
                let holder = self
                    .fetch_lock_holder(asset_id, class)
                    .await?
                    .ok_or_else(|| StoreError::Integrity("lock conflict without a holder".to_string()))?;
                Ok(LockAcquisition::Contended { holder })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn release_lock(&self, lock_id: Uuid, status: LockStatus, now: DateTime<Utc>) -> Result<bool, StoreError> {
        if !status.is_terminal() {
            return Err(StoreError::Integrity("locks can only be released to a terminal status".to_string()));
        }
        let result = sqlx::query(
            "UPDATE refresh_locks SET status = $2, released_at = $3 WHERE id = $1 AND status = 'in_progress'",
        )
        .bind(lock_id)
        .bind(status.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        match self.get_lock(lock_id).await? {
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(format!("lock {}", lock_id))),
        }
    }

    async fn get_lock(&self, lock_id: Uuid) -> Result<Option<RefreshLock>, StoreError> {
        let row: Option<LockRow> = sqlx::query_as(&format!("SELECT {} FROM refresh_locks WHERE id = $1", LOCK_COLUMNS))
            .bind(lock_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(RefreshLock::try_from).transpose()
    }

    async fn active_locks(&self) -> Result<Vec<RefreshLock>, StoreError> {
        let rows: Vec<LockRow> = sqlx::query_as(&format!(
            "SELECT {} FROM refresh_locks WHERE status = 'in_progress' ORDER BY acquired_at",
            LOCK_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(RefreshLock::try_from).collect()
    }

    async fn delete_terminal_locks_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM refresh_locks WHERE status <> 'in_progress' AND COALESCE(released_at, acquired_at) < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn enqueue_job(&self, job: &Job) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO jobs (id, job_type, params, asset_id, refresh_class, status, priority, error, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (asset_id, refresh_class) WHERE status = 'queued' DO NOTHING
            "#,
        )
        .bind(job.id)
        .bind(job.job_type.as_str())
        .bind(Json(&job.params))
        .bind(job.params.asset_id)
        .bind(job.params.refresh_class.as_str())
        .bind(job.status.as_str())
        .bind(job.priority)
        .bind(&job.error)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn dequeue_jobs(&self, limit: usize, now: DateTime<Utc>) -> Result<Vec<Job>, StoreError> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            r#"
            UPDATE jobs SET status = 'running', updated_at = $2
            WHERE id IN (
                SELECT id FROM jobs
                WHERE status = 'queued'
                ORDER BY priority DESC, created_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {}
            "#,
            JOB_COLUMNS
        ))
        .bind(limit as i64)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        let mut jobs: Vec<Job> = rows.into_iter().map(Job::try_from).collect::<Result<_, _>>()?;
        jobs.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at)));
        Ok(jobs)
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
        let result = sqlx::query(
            "UPDATE jobs SET status = $2, error = $3, updated_at = $4 WHERE id = $1 AND status NOT IN ('done', 'error')",
        )
        .bind(job_id)
        .bind(status.as_str())
        .bind(&error)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.get_job(job_id).await? {
                Some(job) => {
                    warn!("Job {} already {}, not moving to {}", job_id, job.status.as_str(), status.as_str());
                    Err(StoreError::Integrity(format!("job {} is already {}", job_id, job.status.as_str())))
                }
                None => Err(StoreError::NotFound(format!("job {}", job_id))),
            };
        }
        Ok(())
    }

    async fn get_job(&self, job_id: JobId) -> Result<Option<Job>, StoreError> {
        let row: Option<JobRow> = sqlx::query_as(&format!("SELECT {} FROM jobs WHERE id = $1", JOB_COLUMNS))
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Job::try_from).transpose()
    }

    async fn queued_jobs(&self) -> Result<Vec<Job>, StoreError> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {} FROM jobs WHERE status = 'queued' ORDER BY priority DESC, created_at ASC",
            JOB_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Job::try_from).collect()
    }
}
