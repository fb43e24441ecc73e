//! Daily compute quota per (account, entity type).
//!
//! Allowances are never stored: each check looks up the configured table for
//! the requested tier. Counters reset lazily once a full window has passed
//! since the last reset.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{AccountState, Ledger, Timestamp, MAX_TIER};
use crate::auth::{self, Principal};
use crate::config::DailyQuotaTable;
use crate::error::LedgerError;
use crate::events::LedgerEvent;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Risk = 1,
    Strategy = 2,
    Memory = 3,
}

impl EntityType {
    pub const ALL: [EntityType; 3] = [EntityType::Risk, EntityType::Strategy, EntityType::Memory];

    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for EntityType {
    type Error = LedgerError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(EntityType::Risk),
            2 => Ok(EntityType::Strategy),
            3 => Ok(EntityType::Memory),
            other => Err(LedgerError::InvalidEntityType(other)),
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntityType::Risk => "risk",
            EntityType::Strategy => "strategy",
            EntityType::Memory => "memory",
        })
    }
}

impl DailyQuotaTable {
    /// Allowance for `tier`; callers validate the tier first.
    pub fn limit(&self, entity: EntityType, tier: u8) -> u64 {
        let row = match entity {
            EntityType::Risk => &self.risk,
            EntityType::Strategy => &self.strategy,
            EntityType::Memory => &self.memory,
        };
        row[usize::from(tier.min(MAX_TIER))]
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuotaCounter {
    pub used_today: u64,
    pub last_reset_at: Timestamp,
}

impl QuotaCounter {
    fn window_elapsed(&self, now: Timestamp, window: u64) -> bool {
        now.saturating_sub(self.last_reset_at) >= window
    }

    /// The counter as it would look after a lazy reset at `now`.
    fn effective(self, now: Timestamp, window: u64) -> (QuotaCounter, bool) {
        if self.window_elapsed(now, window) {
            let reset = QuotaCounter {
                used_today: 0,
                last_reset_at: now,
            };
            (reset, true)
        } else {
            (self, false)
        }
    }
}

/// Point-in-time view of one entity type's allowance.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuotaUsage {
    pub entity_type: EntityType,
    pub tier: u8,
    pub limit: u64,
    pub used_today: u64,
    pub remaining: u64,
    pub last_reset_at: Option<Timestamp>,
}

fn check_tier(tier: u8) -> Result<u8, LedgerError> {
    if tier > MAX_TIER {
        return Err(LedgerError::InvalidTier(tier));
    }
    Ok(tier)
}

impl Ledger {
    pub fn daily_quota(&self, entity_type: u8, tier: u8) -> Result<u64, LedgerError> {
        let entity = EntityType::try_from(entity_type)?;
        let tier = check_tier(tier)?;
        Ok(self.config.quota.daily.limit(entity, tier))
    }

    /// Allowance left today, with any due reset applied to the answer only.
    pub fn quota_remaining(
        &self,
        owner: &str,
        entity_type: u8,
        tier: u8,
    ) -> Result<u64, LedgerError> {
        let entity = EntityType::try_from(entity_type)?;
        let tier = check_tier(tier)?;
        let now = self.now();
        let usage = self
            .read_account(owner, |state| self.usage_in(state, entity, tier, now))
            .unwrap_or_else(|| self.fresh_usage(entity, tier));
        Ok(usage.remaining)
    }

    /// Meters `amount` units against the allowance of a caller-supplied tier.
    pub fn consume_quota(
        &self,
        caller: &Principal,
        owner: &str,
        entity_type: u8,
        tier: u8,
        amount: u64,
    ) -> Result<QuotaUsage, LedgerError> {
        let entity = EntityType::try_from(entity_type)?;
        let tier = check_tier(tier)?;
        self.authorize_metering(caller, owner)?;
        self.with_account(owner, |state| self.consume_in(state, owner, entity, tier, amount))
    }

    /// Meters against the owner's current highest active tier.
    pub fn consume_quota_at_active_tier(
        &self,
        caller: &Principal,
        owner: &str,
        entity_type: u8,
        amount: u64,
    ) -> Result<QuotaUsage, LedgerError> {
        let entity = EntityType::try_from(entity_type)?;
        self.authorize_metering(caller, owner)?;
        self.with_account(owner, |state| {
            let tier = state.highest_active_tier();
            self.consume_in(state, owner, entity, tier, amount)
        })
    }

    fn authorize_metering(&self, caller: &Principal, owner: &str) -> Result<(), LedgerError> {
        auth::require_authority(
            self.config.authorization.consume_quota,
            caller,
            &owner.to_string(),
            &self.config.operators,
            "consume quota",
        )
    }

    fn consume_in(
        &self,
        state: &mut AccountState,
        owner: &str,
        entity: EntityType,
        tier: u8,
        amount: u64,
    ) -> Result<QuotaUsage, LedgerError> {
        let now = self.now();
        let window = self.config.quota.reset_window_secs;
        let limit = self.config.quota.daily.limit(entity, tier);
        let (counter, reset) = match state.quota.get(&entity) {
            Some(counter) => counter.effective(now, window),
            None => (
                QuotaCounter {
                    used_today: 0,
                    last_reset_at: now,
                },
                false,
            ),
        };

        // Nothing is written until the request fits, including a due reset.
        let used = counter
            .used_today
            .checked_add(amount)
            .filter(|used| *used <= limit)
            .ok_or(LedgerError::QuotaExceeded {
                limit,
                used: counter.used_today,
                requested: amount,
            })?;

        if reset {
            info!(owner, %entity, at = now, "daily quota reset");
            self.events.publish(LedgerEvent::QuotaReset {
                owner: owner.to_string(),
                entity_type: entity,
                at: now,
            });
        }
        state.quota.insert(
            entity,
            QuotaCounter {
                used_today: used,
                last_reset_at: counter.last_reset_at,
            },
        );
        debug!(owner, %entity, tier, amount, used, limit, "quota consumed");
        self.events.publish(LedgerEvent::QuotaConsumed {
            owner: owner.to_string(),
            entity_type: entity,
            tier,
            amount,
            used_today: used,
            limit,
        });
        Ok(QuotaUsage {
            entity_type: entity,
            tier,
            limit,
            used_today: used,
            remaining: limit - used,
            last_reset_at: Some(counter.last_reset_at),
        })
    }

    pub(crate) fn usage_in(
        &self,
        state: &AccountState,
        entity: EntityType,
        tier: u8,
        now: Timestamp,
    ) -> QuotaUsage {
        let Some(stored) = state.quota.get(&entity) else {
            return self.fresh_usage(entity, tier);
        };
        let (counter, _) = stored.effective(now, self.config.quota.reset_window_secs);
        let limit = self.config.quota.daily.limit(entity, tier);
        QuotaUsage {
            entity_type: entity,
            tier,
            limit,
            used_today: counter.used_today,
            remaining: limit.saturating_sub(counter.used_today),
            last_reset_at: Some(counter.last_reset_at),
        }
    }

    fn fresh_usage(&self, entity: EntityType, tier: u8) -> QuotaUsage {
        let limit = self.config.quota.daily.limit(entity, tier);
        QuotaUsage {
            entity_type: entity,
            tier,
            limit,
            used_today: 0,
            remaining: limit,
            last_reset_at: None,
        }
    }
}
