//! Agreement-linked time locks.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{AccountId, Amount, BucketMove, Ledger, LockId, Timestamp};
use crate::auth::{self, Principal};
use crate::error::LedgerError;
use crate::events::LedgerEvent;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LockStatus {
    Active,
    Released,
    Terminated,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Lock {
    pub lock_id: LockId,
    pub owner: AccountId,
    pub amount: Amount,
    pub created_at: Timestamp,
    pub duration: u64,
    pub expires_at: Timestamp,
    /// Opaque identifier of the external agreement this lock backs.
    pub agreement_ref: String,
    pub status: LockStatus,
    pub settled_at: Option<Timestamp>,
}

impl Lock {
    /// Unsettled and not yet expired.
    pub fn is_active_at(&self, now: Timestamp) -> bool {
        self.status == LockStatus::Active && now < self.expires_at
    }
}

impl Ledger {
    pub fn create_lock(
        &self,
        owner: &str,
        amount: Amount,
        duration: u64,
        agreement_ref: &str,
    ) -> Result<LockId, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }
        if agreement_ref.trim().is_empty() {
            return Err(LedgerError::MissingReference);
        }
        let now = self.now();
        self.with_account(owner, |state| {
            state.balance.move_available_to_locked(amount)?;
            let lock = Lock {
                lock_id: self.ids.next_lock(),
                owner: owner.to_string(),
                amount,
                created_at: now,
                duration,
                expires_at: now.saturating_add(duration),
                agreement_ref: agreement_ref.to_string(),
                status: LockStatus::Active,
                settled_at: None,
            };
            let lock_id = lock.lock_id;
            info!(%lock_id, owner, amount, expires_at = lock.expires_at, agreement_ref, "lock created");
            self.lock_owners.insert(lock_id, owner.to_string());
            self.record_move(owner, BucketMove::AvailableToLocked, amount, state.balance);
            self.events.publish(LedgerEvent::LockCreated {
                lock_id,
                owner: owner.to_string(),
                amount,
                expires_at: lock.expires_at,
                agreement_ref: lock.agreement_ref.clone(),
            });
            state.locks.insert(lock_id, lock);
            Ok(lock_id)
        })
    }

    /// Returns an expired lock's credit to the owner's available balance.
    pub fn release_after_expiry(
        &self,
        caller: &Principal,
        lock_id: LockId,
    ) -> Result<(), LedgerError> {
        let owner = self.lock_owner(lock_id)?;
        auth::require_authority(
            self.config.authorization.release_lock,
            caller,
            &owner,
            &self.config.operators,
            "release lock",
        )?;
        self.settle_lock(&owner, lock_id, caller, LockStatus::Released, |lock, now| {
            if now < lock.expires_at {
                return Err(LedgerError::PeriodNotElapsed {
                    unlocks_at: lock.expires_at,
                    now,
                });
            }
            Ok(())
        })?;
        info!(%lock_id, %owner, %caller, "lock released");
        Ok(())
    }

    /// Owner-initiated settlement at any time, expired or not.
    pub fn early_terminate(&self, caller: &Principal, lock_id: LockId) -> Result<(), LedgerError> {
        let owner = self.lock_owner(lock_id)?;
        auth::require_owner(caller, &owner, "terminate lock")?;
        self.settle_lock(&owner, lock_id, caller, LockStatus::Terminated, |_, _| Ok(()))?;
        info!(%lock_id, %owner, "lock terminated early");
        Ok(())
    }

    pub fn is_active(&self, lock_id: LockId) -> bool {
        let now = self.now();
        self.lock(lock_id)
            .is_some_and(|lock| lock.is_active_at(now))
    }

    pub fn lock(&self, lock_id: LockId) -> Option<Lock> {
        let owner = self.lock_owner(lock_id).ok()?;
        self.read_account(&owner, |state| state.locks.get(&lock_id).cloned())
            .flatten()
    }

    pub fn locks_of(&self, owner: &str) -> Vec<Lock> {
        self.read_account(owner, |state| state.locks.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn all_locks(&self) -> Vec<Lock> {
        let mut ids: Vec<LockId> = self.lock_owners.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids.into_iter().filter_map(|id| self.lock(id)).collect()
    }

    fn lock_owner(&self, lock_id: LockId) -> Result<AccountId, LedgerError> {
        self.lock_owners
            .get(&lock_id)
            .map(|owner| owner.value().clone())
            .ok_or(LedgerError::UnknownLock(lock_id))
    }

    fn settle_lock(
        &self,
        owner: &str,
        lock_id: LockId,
        caller: &Principal,
        outcome: LockStatus,
        precondition: impl FnOnce(&Lock, Timestamp) -> Result<(), LedgerError>,
    ) -> Result<(), LedgerError> {
        let now = self.now();
        self.with_account(owner, |state| {
            let lock = state
                .locks
                .get(&lock_id)
                .ok_or(LedgerError::UnknownLock(lock_id))?;
            if lock.status != LockStatus::Active {
                return Err(LedgerError::AlreadySettled);
            }
            precondition(lock, now)?;
            let amount = lock.amount;
            state.balance.move_locked_to_available(amount)?;
            if let Some(lock) = state.locks.get_mut(&lock_id) {
                lock.status = outcome;
                lock.settled_at = Some(now);
            }
            self.record_move(owner, BucketMove::LockedToAvailable, amount, state.balance);
            let owner = owner.to_string();
            self.events.publish(match outcome {
                LockStatus::Terminated => LedgerEvent::LockTerminated {
                    lock_id,
                    owner,
                    amount,
                },
                _ => LedgerEvent::LockReleased {
                    lock_id,
                    owner,
                    amount,
                    settled_by: caller.clone(),
                },
            });
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::SettlementAuthority;
    use crate::config::LedgerConfig;
    use crate::events::drain;
    use crate::ledger::test_support::*;

    #[test]
    fn create_lock_validates_before_touching_balance() {
        let (ledger, _) = ledger();
        assert_eq!(ledger.create_lock("alice", 0, 10, "A1"), Err(LedgerError::InvalidAmount));
        assert_eq!(ledger.create_lock("alice", 10, 10, ""), Err(LedgerError::MissingReference));
        assert_eq!(ledger.create_lock("alice", 10, 10, "   "), Err(LedgerError::MissingReference));
        assert!(matches!(
            ledger.create_lock("alice", 2_000, 10, "A1"),
            Err(LedgerError::InsufficientBalance { required: 2_000, have: 1_000, .. })
        ));
        assert_eq!(ledger.available("alice"), 1_000);
        assert!(ledger.all_locks().is_empty());
    }

    #[test]
    fn lock_records_agreement_and_expiry() {
        let (ledger, _) = ledger();
        let id = ledger.create_lock("alice", 10, 100, "agreement-1").unwrap();
        let lock = ledger.lock(id).unwrap();
        assert_eq!(lock.owner, "alice");
        assert_eq!(lock.agreement_ref, "agreement-1");
        assert_eq!(lock.expires_at, START + 100);
        assert_eq!(lock.status, LockStatus::Active);
        assert!(ledger.is_active(id));
        assert_eq!(ledger.locked("alice"), 10);
    }

    #[test]
    fn release_waits_for_expiry_then_settles_once() {
        let (ledger, clock) = ledger();
        let alice = Principal::account("alice");
        let id = ledger.create_lock("alice", 10, 100, "A1").unwrap();

        assert_eq!(
            ledger.release_after_expiry(&alice, id),
            Err(LedgerError::PeriodNotElapsed { unlocks_at: START + 100, now: START })
        );
        clock.advance(100);
        ledger.release_after_expiry(&alice, id).unwrap();

        let lock = ledger.lock(id).unwrap();
        assert_eq!(lock.status, LockStatus::Released);
        assert_eq!(lock.settled_at, Some(START + 100));
        assert_eq!(ledger.available("alice"), 1_000);
        assert_eq!(ledger.release_after_expiry(&alice, id), Err(LedgerError::AlreadySettled));
        assert_eq!(ledger.early_terminate(&alice, id), Err(LedgerError::AlreadySettled));
    }

    #[test]
    fn expired_lock_is_inactive_before_settlement() {
        let (ledger, clock) = ledger();
        let id = ledger.create_lock("alice", 10, 2, "A1").unwrap();
        clock.advance(3);
        assert!(!ledger.is_active(id));
        assert_eq!(ledger.lock(id).unwrap().status, LockStatus::Active);
        assert_eq!(ledger.locked("alice"), 10);
    }

    #[test]
    fn early_termination_is_owner_only_and_ignores_expiry() {
        let (ledger, _) = ledger();
        let id = ledger.create_lock("alice", 10, 100, "A1").unwrap();
        let unauthorized = Err(LedgerError::Unauthorized { action: "terminate lock" });
        assert_eq!(ledger.early_terminate(&Principal::account("bob"), id), unauthorized);
        assert_eq!(ledger.early_terminate(&Principal::operator("metering"), id), unauthorized);

        ledger.early_terminate(&Principal::account("alice"), id).unwrap();
        assert_eq!(ledger.lock(id).unwrap().status, LockStatus::Terminated);
        assert_eq!(ledger.available("alice"), 1_000);
        assert!(!ledger.is_active(id));
    }

    #[test]
    fn release_follows_configured_authority() {
        let (ledger, clock) = ledger();
        let id = ledger.create_lock("alice", 10, 1, "A1").unwrap();
        clock.advance(1);
        assert!(matches!(
            ledger.release_after_expiry(&Principal::account("bob"), id),
            Err(LedgerError::Unauthorized { .. })
        ));
        assert!(matches!(
            ledger.release_after_expiry(&Principal::operator("stranger"), id),
            Err(LedgerError::Unauthorized { .. })
        ));
        ledger.release_after_expiry(&Principal::operator("metering"), id).unwrap();

        let mut config = LedgerConfig::default().with_operator("metering");
        config.authorization.release_lock = SettlementAuthority::Owner;
        let (ledger, clock) = ledger_with(config);
        let id = ledger.create_lock("alice", 10, 1, "A1").unwrap();
        clock.advance(1);
        assert!(matches!(
            ledger.release_after_expiry(&Principal::operator("metering"), id),
            Err(LedgerError::Unauthorized { .. })
        ));
        ledger.release_after_expiry(&Principal::account("alice"), id).unwrap();
    }

    #[test]
    fn settled_status_is_reported_before_the_expiry_gate() {
        let (ledger, _) = ledger();
        let alice = Principal::account("alice");
        let id = ledger.create_lock("alice", 10, 100, "A1").unwrap();
        ledger.early_terminate(&alice, id).unwrap();
        assert_eq!(ledger.release_after_expiry(&alice, id), Err(LedgerError::AlreadySettled));
    }

    #[test]
    fn unknown_lock_ids_are_reported() {
        let (ledger, _) = ledger();
        let alice = Principal::account("alice");
        assert_eq!(ledger.release_after_expiry(&alice, LockId(9)), Err(LedgerError::UnknownLock(LockId(9))));
        assert!(!ledger.is_active(LockId(9)));
        assert!(ledger.lock(LockId(9)).is_none());
    }

    #[test]
    fn queries_index_by_owner_and_globally() {
        let (ledger, _) = ledger();
        ledger.create_lock("alice", 10, 100, "agreement-1").unwrap();
        ledger.create_lock("alice", 10, 100, "agreement-2").unwrap();
        ledger.create_lock("bob", 10, 100, "agreement-3").unwrap();
        assert_eq!(ledger.locks_of("alice").len(), 2);
        assert_eq!(ledger.locks_of("bob").len(), 1);
        assert!(ledger.locks_of("carol").is_empty());
        let all: Vec<LockId> = ledger.all_locks().iter().map(|l| l.lock_id).collect();
        assert_eq!(all, vec![LockId(1), LockId(2), LockId(3)]);
    }

    #[test]
    fn settlement_publishes_balance_and_lock_events() {
        let (ledger, _) = ledger();
        let mut events = ledger.subscribe();
        let id = ledger.create_lock("alice", 10, 100, "A1").unwrap();
        ledger.early_terminate(&Principal::account("alice"), id).unwrap();
        let seen = drain(&mut events);
        assert_eq!(seen.len(), 4);
        assert!(matches!(
            seen[0],
            LedgerEvent::BalanceChanged { movement: BucketMove::AvailableToLocked, amount: 10, .. }
        ));
        assert!(matches!(seen[1], LedgerEvent::LockCreated { lock_id, .. } if lock_id == id));
        assert!(matches!(
            seen[2],
            LedgerEvent::BalanceChanged { movement: BucketMove::LockedToAvailable, .. }
        ));
        assert!(matches!(seen[3], LedgerEvent::LockTerminated { amount: 10, .. }));
    }
}
