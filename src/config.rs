use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::{OperatorId, SettlementAuthority};
use crate::clock::SECS_PER_DAY;
use crate::events::DEFAULT_EVENT_CAPACITY;
use crate::ledger::Amount;

/// Quota value standing in for "unlimited" at the top tier.
pub const UNLIMITED_QUOTA: u64 = 1_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LedgerConfig {
    /// Principals allowed to act through the operator path.
    pub operators: BTreeSet<OperatorId>,
    pub staking: StakingConfig,
    pub agreements: AgreementConfig,
    pub quota: QuotaConfig,
    pub authorization: AuthorizationPolicy,
    pub events: EventsConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StakingConfig {
    /// Stake size for tiers 1, 2 and 3.
    pub tier_amounts: [Amount; 3],
    pub min_stake_period_secs: u64,
}

impl Default for StakingConfig {
    fn default() -> Self {
        Self {
            tier_amounts: [5, 25, 100],
            min_stake_period_secs: 30 * SECS_PER_DAY,
        }
    }
}

/// Suggested agreement lock size per tier, published in the tier catalog.
/// `create_lock` accepts any positive amount.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgreementConfig {
    pub lock_amounts: [Amount; 3],
}

impl Default for AgreementConfig {
    fn default() -> Self {
        Self {
            lock_amounts: [10, 50, 250],
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EventsConfig {
    /// Events buffered per subscriber before the oldest are dropped.
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QuotaConfig {
    pub reset_window_secs: u64,
    pub daily: DailyQuotaTable,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            reset_window_secs: SECS_PER_DAY,
            daily: DailyQuotaTable::default(),
        }
    }
}

/// Daily allowance per entity type, indexed by tier 0..=3.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DailyQuotaTable {
    pub risk: [u64; 4],
    pub strategy: [u64; 4],
    pub memory: [u64; 4],
}

impl Default for DailyQuotaTable {
    fn default() -> Self {
        Self {
            risk: [1, 3, 10, UNLIMITED_QUOTA],
            strategy: [4, 12, 28, UNLIMITED_QUOTA],
            memory: [2, 7, 28, UNLIMITED_QUOTA],
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AuthorizationPolicy {
    pub release_lock: SettlementAuthority,
    pub consume_quota: SettlementAuthority,
}

impl Default for AuthorizationPolicy {
    fn default() -> Self {
        Self {
            release_lock: SettlementAuthority::OwnerOrOperator,
            consume_quota: SettlementAuthority::Operator,
        }
    }
}

impl LedgerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn with_operator(mut self, operator: impl Into<OperatorId>) -> Self {
        self.operators.insert(operator.into());
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let amounts = &self.staking.tier_amounts;
        if amounts.iter().any(|amount| *amount == 0) {
            return Err(ConfigError::Invalid("tier amounts must be non-zero".into()));
        }
        if amounts.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(ConfigError::Invalid(
                "tier amounts must strictly increase with tier".into(),
            ));
        }
        if self.agreements.lock_amounts.iter().any(|amount| *amount == 0) {
            return Err(ConfigError::Invalid("agreement lock amounts must be non-zero".into()));
        }
        if self.events.capacity == 0 {
            return Err(ConfigError::Invalid("event capacity must be non-zero".into()));
        }
        if self.quota.reset_window_secs == 0 {
            return Err(ConfigError::Invalid("quota reset window must be non-zero".into()));
        }
        let table = &self.quota.daily;
        for (name, row) in [
            ("risk", &table.risk),
            ("strategy", &table.strategy),
            ("memory", &table.memory),
        ] {
            if row.windows(2).any(|pair| pair[0] > pair[1]) {
                return Err(ConfigError::Invalid(format!(
                    "{name} quota must not decrease with tier"
                )));
            }
        }
        Ok(())
    }
}
