use alloy::primitives::{Address, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

pub type AssetId = Uuid;
pub type ScoreId = Uuid;
pub type JobId = Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TokenStandard {
    Erc20,
    Erc721,
    Erc1155,
}

impl TokenStandard {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenStandard::Erc20 => "erc20",
            TokenStandard::Erc721 => "erc721",
            TokenStandard::Erc1155 => "erc1155",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "erc20" => Some(TokenStandard::Erc20),
            "erc721" => Some(TokenStandard::Erc721),
            "erc1155" => Some(TokenStandard::Erc1155),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AssetStatus {
    Pending,
    Active,
}

impl AssetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetStatus::Pending => "pending",
            AssetStatus::Active => "active",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(AssetStatus::Pending),
            "active" => Some(AssetStatus::Active),
            _ => None,
        }
    }
}

/// Mutable token metadata, refreshed on every successful ingestion.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AssetMetadata {
    pub symbol: Option<String>,
    pub name: Option<String>,
    pub decimals: Option<u8>,
    pub icon_url: Option<String>,
}

impl AssetMetadata {
    /// Fields present in `newer` win; absent ones keep the current value.
    pub fn merged_with(&self, newer: &AssetMetadata) -> AssetMetadata {
        AssetMetadata {
            symbol: newer.symbol.clone().or_else(|| self.symbol.clone()),
            name: newer.name.clone().or_else(|| self.name.clone()),
            decimals: newer.decimals.or(self.decimals),
            icon_url: newer.icon_url.clone().or_else(|| self.icon_url.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Asset {
    pub id: AssetId,
    pub chain: String,
    pub address: Address,
    pub standard: TokenStandard,
    pub metadata: AssetMetadata,
    pub status: AssetStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Asset {
    pub fn new_pending(chain: &str, address: Address, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            chain: chain.to_lowercase(),
            address,
            standard: TokenStandard::Erc20,
            metadata: AssetMetadata::default(),
            status: AssetStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Evidence
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProxyKind {
    #[serde(rename = "eip1967-transparent")]
    Eip1967Transparent,
    #[serde(rename = "eip1967-uups")]
    Eip1967Uups,
}

impl ProxyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyKind::Eip1967Transparent => "eip1967-transparent",
            ProxyKind::Eip1967Uups => "eip1967-uups",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "eip1967-transparent" => Some(ProxyKind::Eip1967Transparent),
            "eip1967-uups" => Some(ProxyKind::Eip1967Uups),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoleHolder {
    pub role_name: String,
    pub holder_address: Address,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContractIntrospection {
    pub verified: bool,
    pub upgradeable: bool,
    pub proxy_kind: Option<ProxyKind>,
    pub implementation_address: Option<Address>,
    pub admin_address: Option<Address>,
    pub owner_address: Option<Address>,
    pub roles: Vec<RoleHolder>,
    pub pausable: bool,
    /// Timelock delay in seconds, when an admin-tier address answers `getMinDelay()`.
    pub timelock: Option<u64>,
    /// Internal 0-1 tuning estimate; not part of the published score.
    pub risk_estimate: f64,
    pub observed_at_block: u64,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HolderShare {
    pub address: Address,
    pub pct: f64,
    #[serde(default)]
    pub is_contract: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsensusStatus {
    SingleSource,
    Agree(usize),
    Conflict,
}

impl ConsensusStatus {
    pub fn from_label(s: &str) -> Option<Self> {
        match s {
            "single-source" => Some(ConsensusStatus::SingleSource),
            "data conflict detected" => Some(ConsensusStatus::Conflict),
            other => other
                .strip_suffix(" sources agree")
                .and_then(|n| n.parse().ok())
                .map(ConsensusStatus::Agree),
        }
    }
}

impl fmt::Display for ConsensusStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsensusStatus::SingleSource => write!(f, "single-source"),
            ConsensusStatus::Agree(n) => write!(f, "{} sources agree", n),
            ConsensusStatus::Conflict => write!(f, "data conflict detected"),
        }
    }
}

impl Serialize for ConsensusStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ConsensusStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        ConsensusStatus::from_label(&label)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown consensus status: {}", label)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HoldersSnapshot {
    pub total_supply: U256,
    pub free_float: U256,
    pub top_holders: Vec<HolderShare>,
    pub top1_pct: f64,
    pub top3_pct: f64,
    pub top10_pct: f64,
    pub herfindahl_index: f64,
    pub gini_coefficient: f64,
    pub nakamoto_coefficient: u32,
    pub contract_share_pct: f64,
    pub eoa_share_pct: f64,
    pub coverage_pct: f64,
    pub sample_size: u32,
    pub source_name: String,
    pub contributing_sources: Vec<String>,
    pub consensus_status: ConsensusStatus,
    pub observed_at_block: u64,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LiquidityPool {
    pub venue: String,
    pub pool_address: String,
    pub tvl_usd: f64,
    pub share_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LiquiditySnapshot {
    pub pools: Vec<LiquidityPool>,
    pub centralized_venue_share_pct: f64,
    pub source_name: String,
    pub observed_at_block: u64,
    pub observed_at: DateTime<Utc>,
}

impl LiquiditySnapshot {
    pub fn total_tvl_usd(&self) -> f64 {
        self.pools.iter().map(|p| p.tvl_usd).sum()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum GovernanceFramework {
    Snapshot,
    SafeSnap,
    Governor,
    Aragon,
    Other,
}

impl GovernanceFramework {
    /// Frameworks whose passed proposals execute on-chain rather than signal off-chain.
    pub fn executes_onchain(&self) -> bool {
        matches!(
            self,
            GovernanceFramework::SafeSnap | GovernanceFramework::Governor | GovernanceFramework::Aragon
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GovernanceFramework::Snapshot => "snapshot",
            GovernanceFramework::SafeSnap => "safe-snap",
            GovernanceFramework::Governor => "governor",
            GovernanceFramework::Aragon => "aragon",
            GovernanceFramework::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "snapshot" => GovernanceFramework::Snapshot,
            "safe-snap" | "safesnap" => GovernanceFramework::SafeSnap,
            "governor" | "governor-bravo" | "oz-governor" => GovernanceFramework::Governor,
            "aragon" => GovernanceFramework::Aragon,
            _ => GovernanceFramework::Other,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TurnoutRecord {
    pub proposal_id: String,
    pub turnout_pct: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GovernanceSnapshot {
    pub framework: Option<GovernanceFramework>,
    pub quorum_pct: Option<f64>,
    pub turnout_history: Vec<TurnoutRecord>,
    pub observed_at_block: u64,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChainStats {
    pub chain: String,
    pub validator_count: Option<u32>,
    pub top_validators_share_pct: Option<f64>,
    pub nakamoto_coefficient: Option<u32>,
    pub observed_at_block: u64,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub firm: String,
    pub date: DateTime<Utc>,
    pub report_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditSnapshot {
    pub audits: Vec<AuditReport>,
    pub observed_at: DateTime<Utc>,
}

impl AuditSnapshot {
    /// Firms compared case-insensitively, ignoring surrounding whitespace.
    pub fn distinct_firms(&self) -> usize {
        self.audits
            .iter()
            .map(|audit| audit.firm.trim().to_lowercase())
            .collect::<HashSet<_>>()
            .len()
    }
}

// ---------------------------------------------------------------------------
// Scores
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Category {
    Ownership,
    ControlRisk,
    Liquidity,
    Governance,
    ChainLevel,
    CodeAssurance,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Ownership,
        Category::ControlRisk,
        Category::Liquidity,
        Category::Governance,
        Category::ChainLevel,
        Category::CodeAssurance,
    ];
}

/// One value per scoring category.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CategoryValues {
    pub ownership: f64,
    pub control_risk: f64,
    pub liquidity: f64,
    pub governance: f64,
    pub chain_level: f64,
    pub code_assurance: f64,
}

impl CategoryValues {
    pub fn get(&self, category: Category) -> f64 {
        match category {
            Category::Ownership => self.ownership,
            Category::ControlRisk => self.control_risk,
            Category::Liquidity => self.liquidity,
            Category::Governance => self.governance,
            Category::ChainLevel => self.chain_level,
            Category::CodeAssurance => self.code_assurance,
        }
    }

    pub fn set(&mut self, category: Category, value: f64) {
        match category {
            Category::Ownership => self.ownership = value,
            Category::ControlRisk => self.control_risk = value,
            Category::Liquidity => self.liquidity = value,
            Category::Governance => self.governance = value,
            Category::ChainLevel => self.chain_level = value,
            Category::CodeAssurance => self.code_assurance = value,
        }
    }

    pub fn from_fn(mut f: impl FnMut(Category) -> f64) -> Self {
        let mut values = CategoryValues::default();
        for category in Category::ALL {
            values.set(category, f(category));
        }
        values
    }

    pub fn sum(&self) -> f64 {
        Category::ALL.iter().map(|c| self.get(*c)).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Score {
    pub id: ScoreId,
    pub asset_id: AssetId,
    pub sub_scores: CategoryValues,
    /// Post-renormalization weights; always sum to 1.
    pub weights: CategoryValues,
    pub confidence: CategoryValues,
    pub total: f64,
    pub calc_version: String,
    pub observed_at_block: u64,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Refresh locks & jobs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum RefreshClass {
    Full,
    Volatile,
    SemiVolatile,
}

impl RefreshClass {
    pub const ALL: [RefreshClass; 3] = [RefreshClass::Full, RefreshClass::Volatile, RefreshClass::SemiVolatile];

    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshClass::Full => "full",
            RefreshClass::Volatile => "volatile",
            RefreshClass::SemiVolatile => "semiVolatile",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "full" => Some(RefreshClass::Full),
            "volatile" => Some(RefreshClass::Volatile),
            "semiVolatile" | "semi_volatile" | "semivolatile" => Some(RefreshClass::SemiVolatile),
            _ => None,
        }
    }

    /// Whether a refresh of this class fetches the category fresh; others reuse stored evidence.
    pub fn refreshes(&self, kind: EvidenceKind) -> bool {
        match self {
            RefreshClass::Full => true,
            RefreshClass::Volatile => matches!(kind, EvidenceKind::Holders | EvidenceKind::Liquidity),
            RefreshClass::SemiVolatile => matches!(
                kind,
                EvidenceKind::Holders
                    | EvidenceKind::Liquidity
                    | EvidenceKind::Governance
                    | EvidenceKind::ChainStats
            ),
        }
    }
}

impl fmt::Display for RefreshClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum EvidenceKind {
    Contract,
    Holders,
    Liquidity,
    Governance,
    ChainStats,
    Audits,
}

impl EvidenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceKind::Contract => "contract",
            EvidenceKind::Holders => "holders",
            EvidenceKind::Liquidity => "liquidity",
            EvidenceKind::Governance => "governance",
            EvidenceKind::ChainStats => "chain_stats",
            EvidenceKind::Audits => "audits",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LockStatus {
    InProgress,
    Completed,
    Failed,
}

impl LockStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, LockStatus::InProgress)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LockStatus::InProgress => "in_progress",
            LockStatus::Completed => "completed",
            LockStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "in_progress" => Some(LockStatus::InProgress),
            "completed" => Some(LockStatus::Completed),
            "failed" => Some(LockStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RefreshLock {
    pub id: Uuid,
    pub asset_id: AssetId,
    pub refresh_class: RefreshClass,
    pub acquired_at: DateTime<Utc>,
    pub owner: String,
    pub status: LockStatus,
    pub released_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Error,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "done" => Some(JobStatus::Done),
            "error" => Some(JobStatus::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Refresh,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Refresh => "refresh",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RefreshParams {
    pub asset_id: AssetId,
    pub chain: String,
    pub address: Address,
    pub refresh_class: RefreshClass,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub job_type: JobType,
    pub params: RefreshParams,
    pub status: JobStatus,
    pub priority: i32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn refresh(params: RefreshParams, priority: i32, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_type: JobType::Refresh,
            params,
            status: JobStatus::Queued,
            priority,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consensus_status_labels() {
        assert_eq!(ConsensusStatus::SingleSource.to_string(), "single-source");
        assert_eq!(ConsensusStatus::Agree(2).to_string(), "2 sources agree");
        assert_eq!(ConsensusStatus::Conflict.to_string(), "data conflict detected");
        assert_eq!(ConsensusStatus::from_label("3 sources agree"), Some(ConsensusStatus::Agree(3)));

        let json = serde_json::to_string(&ConsensusStatus::Agree(2)).unwrap();
        assert_eq!(json, "\"2 sources agree\"");
    }

    #[test]
    fn test_refresh_class_coverage() {
        assert!(RefreshClass::Full.refreshes(EvidenceKind::Contract));
        assert!(RefreshClass::Volatile.refreshes(EvidenceKind::Liquidity));
        assert!(!RefreshClass::Volatile.refreshes(EvidenceKind::Governance));
        assert!(RefreshClass::SemiVolatile.refreshes(EvidenceKind::ChainStats));
        assert!(!RefreshClass::SemiVolatile.refreshes(EvidenceKind::Contract));
        assert_eq!(RefreshClass::from_str("semiVolatile"), Some(RefreshClass::SemiVolatile));
    }

    #[test]
    fn test_metadata_merge_keeps_known_fields() {
        let current = AssetMetadata {
            symbol: Some("UNI".into()),
            name: Some("Uniswap".into()),
            decimals: Some(18),
            icon_url: Some("https://example.org/uni.png".into()),
        };
        let newer = AssetMetadata { symbol: Some("UNI2".into()), ..Default::default() };
        let merged = current.merged_with(&newer);
        assert_eq!(merged.symbol.as_deref(), Some("UNI2"));
        assert_eq!(merged.decimals, Some(18));
        assert!(merged.icon_url.is_some());
    }
}
