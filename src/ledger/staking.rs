//! Tier staking.
//!
//! A stake commits a fixed, tier-dependent amount for at least the configured
//! holding period. While Active it grants its tier and every lower one.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{AccountId, AccountState, Amount, BucketMove, EntityType, Ledger, StakeId, Timestamp};
use crate::auth::{self, Principal};
use crate::error::LedgerError;
use crate::events::LedgerEvent;

pub const MAX_TIER: u8 = 3;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StakeStatus {
    Active,
    Unstaked,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Stake {
    pub stake_id: StakeId,
    pub owner: AccountId,
    pub tier: u8,
    pub amount: Amount,
    pub created_at: Timestamp,
    pub unlock_at: Timestamp,
    pub status: StakeStatus,
    pub unstaked_at: Option<Timestamp>,
}

impl Stake {
    pub fn is_active(&self) -> bool {
        self.status == StakeStatus::Active
    }
}

/// What a tier costs and what it unlocks.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TierInfo {
    pub tier: u8,
    pub required_amount: Amount,
    pub min_holding_secs: u64,
    /// Suggested lock size for an agreement entered at this tier.
    pub agreement_lock_amount: Amount,
    pub daily_quota: BTreeMap<EntityType, u64>,
}

impl AccountState {
    pub(crate) fn highest_active_tier(&self) -> u8 {
        self.stakes
            .values()
            .filter(|stake| stake.is_active())
            .map(|stake| stake.tier)
            .max()
            .unwrap_or(0)
    }
}

impl Ledger {
    pub fn tier_amount(&self, tier: u8) -> Result<Amount, LedgerError> {
        match tier {
            1..=MAX_TIER => Ok(self.config.staking.tier_amounts[usize::from(tier - 1)]),
            _ => Err(LedgerError::InvalidTier(tier)),
        }
    }

    pub fn tier_catalog(&self) -> Vec<TierInfo> {
        (1..=MAX_TIER)
            .map(|tier| TierInfo {
                tier,
                required_amount: self.config.staking.tier_amounts[usize::from(tier - 1)],
                min_holding_secs: self.config.staking.min_stake_period_secs,
                agreement_lock_amount: self.config.agreements.lock_amounts[usize::from(tier - 1)],
                daily_quota: EntityType::ALL
                    .into_iter()
                    .map(|entity| (entity, self.config.quota.daily.limit(entity, tier)))
                    .collect(),
            })
            .collect()
    }

    pub fn stake_for_tier(&self, owner: &str, tier: u8) -> Result<StakeId, LedgerError> {
        let amount = self.tier_amount(tier)?;
        let now = self.now();
        self.with_account(owner, |state| {
            state.balance.move_available_to_staked(amount)?;
            let stake = Stake {
                stake_id: self.ids.next_stake(),
                owner: owner.to_string(),
                tier,
                amount,
                created_at: now,
                unlock_at: now.saturating_add(self.config.staking.min_stake_period_secs),
                status: StakeStatus::Active,
                unstaked_at: None,
            };
            let stake_id = stake.stake_id;
            info!(%stake_id, owner, tier, amount, unlock_at = stake.unlock_at, "tier staked");
            self.stake_owners.insert(stake_id, owner.to_string());
            self.record_move(owner, BucketMove::AvailableToStaked, amount, state.balance);
            self.events.publish(LedgerEvent::Staked {
                stake_id,
                owner: owner.to_string(),
                tier,
                amount,
                unlock_at: stake.unlock_at,
            });
            state.stakes.insert(stake_id, stake);
            Ok(stake_id)
        })
    }

    pub fn unstake(&self, caller: &Principal, stake_id: StakeId) -> Result<(), LedgerError> {
        let owner = self.stake_owner(stake_id)?;
        auth::require_owner(caller, &owner, "unstake")?;
        let now = self.now();
        self.with_account(&owner, |state| {
            let stake = state
                .stakes
                .get(&stake_id)
                .ok_or(LedgerError::UnknownStake(stake_id))?;
            if !stake.is_active() {
                return Err(LedgerError::AlreadySettled);
            }
            if now < stake.unlock_at {
                return Err(LedgerError::PeriodNotElapsed {
                    unlocks_at: stake.unlock_at,
                    now,
                });
            }
            let (tier, amount) = (stake.tier, stake.amount);
            state.balance.move_staked_to_available(amount)?;
            if let Some(stake) = state.stakes.get_mut(&stake_id) {
                stake.status = StakeStatus::Unstaked;
                stake.unstaked_at = Some(now);
            }
            info!(%stake_id, %owner, tier, amount, "stake withdrawn");
            self.record_move(&owner, BucketMove::StakedToAvailable, amount, state.balance);
            self.events.publish(LedgerEvent::Unstaked {
                stake_id,
                owner: owner.clone(),
                tier,
                amount,
            });
            Ok(())
        })
    }

    /// True if any active stake is at `tier` or above.
    pub fn has_active_tier(&self, owner: &str, tier: u8) -> bool {
        self.read_account(owner, |state| {
            state
                .stakes
                .values()
                .any(|stake| stake.is_active() && stake.tier >= tier)
        })
        .unwrap_or(false)
    }

    /// Highest tier among active stakes, 0 when there are none.
    pub fn highest_active_tier(&self, owner: &str) -> u8 {
        self.read_account(owner, AccountState::highest_active_tier)
            .unwrap_or(0)
    }

    pub fn stake(&self, stake_id: StakeId) -> Option<Stake> {
        let owner = self.stake_owner(stake_id).ok()?;
        self.read_account(&owner, |state| state.stakes.get(&stake_id).cloned())
            .flatten()
    }

    pub fn stakes_of(&self, owner: &str) -> Vec<Stake> {
        self.read_account(owner, |state| state.stakes.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn all_stakes(&self) -> Vec<Stake> {
        let mut ids: Vec<StakeId> = self.stake_owners.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids.into_iter().filter_map(|id| self.stake(id)).collect()
    }

    fn stake_owner(&self, stake_id: StakeId) -> Result<AccountId, LedgerError> {
        self.stake_owners
            .get(&stake_id)
            .map(|owner| owner.value().clone())
            .ok_or(LedgerError::UnknownStake(stake_id))
    }
}
