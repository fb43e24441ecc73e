use serde::{Deserialize, Serialize};

use super::{
    AccountId, AccountState, Balance, EntityType, Ledger, Lock, LockStatus, QuotaUsage, Stake,
    Timestamp,
};

/// Everything a gateway needs to decide what an account may do right now.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessStatus {
    pub account: AccountId,
    pub balance: Balance,
    pub current_tier: u8,
    /// Earliest moment the stake backing `current_tier` can be withdrawn.
    pub tier_unlocks_at: Option<Timestamp>,
    pub open_locks: Vec<Lock>,
    pub active_stakes: Vec<Stake>,
    pub quotas: Vec<QuotaUsage>,
}

impl Ledger {
    /// Reports an unopened account as empty at tier 0 with full allowances.
    pub fn access_status(&self, owner: &str) -> AccessStatus {
        let now = self.now();
        let empty = AccountState::new(0);
        let build = |state: &AccountState| {
            let current_tier = state.highest_active_tier();
            let active_stakes: Vec<Stake> = state
                .stakes
                .values()
                .filter(|stake| stake.is_active())
                .cloned()
                .collect();
            let tier_unlocks_at = active_stakes
                .iter()
                .filter(|stake| stake.tier == current_tier)
                .map(|stake| stake.unlock_at)
                .min();
            AccessStatus {
                account: owner.to_string(),
                balance: state.balance,
                current_tier,
                tier_unlocks_at,
                open_locks: state
                    .locks
                    .values()
                    .filter(|lock| lock.status == LockStatus::Active)
                    .cloned()
                    .collect(),
                active_stakes,
                quotas: EntityType::ALL
                    .into_iter()
                    .map(|entity| self.usage_in(state, entity, current_tier, now))
                    .collect(),
            }
        };
        self.read_account(owner, &build)
            .unwrap_or_else(|| build(&empty))
    }
}
