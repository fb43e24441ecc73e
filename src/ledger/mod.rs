//! Per-account TST credit ledger.
//!
//! Each account's credit is split into available, locked and staked buckets
//! whose sum never changes after the account is opened. Locks, stakes and
//! quota counters are stored with their owning account and mutated under that
//! account's mutex, so operations on one account serialize while different
//! accounts proceed in parallel. Global id indexes map record ids back to
//! their owners.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::events::{EventBus, LedgerEvent};

mod account;
mod locks;
mod quota;
mod reservations;
mod snapshot;
mod staking;
mod status;

pub use account::{Balance, Bucket, BucketMove};
pub use locks::{Lock, LockStatus};
pub use quota::{EntityType, QuotaCounter, QuotaUsage};
pub use reservations::{Reservation, ReservationStatus};
pub use snapshot::{AccountSnapshot, LedgerSnapshot};
pub use staking::{Stake, StakeStatus, TierInfo, MAX_TIER};
pub use status::AccessStatus;

use reservations::ReservationDirectory;

pub type AccountId = String;
pub type Amount = u64;
/// Seconds since the UNIX epoch.
pub type Timestamp = u64;

macro_rules! record_id {
    ($name:ident, $prefix:literal) => {
        #[derive(
            Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "-{}"), self.0)
            }
        }
    };
}

record_id!(LockId, "lock");
record_id!(StakeId, "stake");
record_id!(ReservationId, "res");

/// Composite state guarded by one account mutex: the bucket split plus every
/// record whose settlement moves credit between those buckets.
#[derive(Debug)]
pub(crate) struct AccountState {
    pub(crate) balance: Balance,
    pub(crate) locks: BTreeMap<LockId, Lock>,
    pub(crate) stakes: BTreeMap<StakeId, Stake>,
    pub(crate) quota: BTreeMap<EntityType, QuotaCounter>,
}

impl AccountState {
    fn new(total: Amount) -> Self {
        Self {
            balance: Balance::new(total),
            locks: BTreeMap::new(),
            stakes: BTreeMap::new(),
            quota: BTreeMap::new(),
        }
    }
}

type SharedAccount = Arc<Mutex<AccountState>>;

#[derive(Debug, Default)]
struct IdAllocator {
    locks: AtomicU64,
    stakes: AtomicU64,
}

impl IdAllocator {
    fn next_lock(&self) -> LockId {
        LockId(self.locks.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn next_stake(&self) -> StakeId {
        StakeId(self.stakes.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

pub struct Ledger {
    config: LedgerConfig,
    clock: Arc<dyn Clock>,
    accounts: DashMap<AccountId, SharedAccount>,
    lock_owners: DashMap<LockId, AccountId>,
    stake_owners: DashMap<StakeId, AccountId>,
    reservations: ReservationDirectory,
    ids: IdAllocator,
    events: EventBus,
}

impl Ledger {
    pub fn new(config: LedgerConfig, clock: Arc<dyn Clock>) -> Self {
        let events = EventBus::with_capacity(config.events.capacity);
        Self {
            config,
            clock,
            accounts: DashMap::new(),
            lock_owners: DashMap::new(),
            stake_owners: DashMap::new(),
            reservations: ReservationDirectory::new(),
            ids: IdAllocator::default(),
            events,
        }
    }

    pub fn with_system_clock(config: LedgerConfig) -> Self {
        Self::new(config, Arc::new(SystemClock))
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events.subscribe()
    }

    /// Registers an account holding `total` credit, all of it available.
    pub fn open_account(&self, account: &str, total: Amount) -> Result<(), LedgerError> {
        match self.accounts.entry(account.to_string()) {
            Entry::Occupied(_) => Err(LedgerError::AccountExists(account.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(Mutex::new(AccountState::new(total))));
                info!(account, total, "account opened");
                self.events.publish(LedgerEvent::AccountOpened {
                    account: account.to_string(),
                    total,
                });
                Ok(())
            }
        }
    }

    /// Current bucket split; all zero for an account that was never opened.
    pub fn balance(&self, owner: &str) -> Balance {
        self.read_account(owner, |state| state.balance)
            .unwrap_or_default()
    }

    pub fn available(&self, owner: &str) -> Amount {
        self.balance(owner).available
    }

    pub fn locked(&self, owner: &str) -> Amount {
        self.balance(owner).locked
    }

    pub fn staked(&self, owner: &str) -> Amount {
        self.balance(owner).staked
    }

    pub fn total(&self, owner: &str) -> Amount {
        self.balance(owner).total
    }

    pub fn has_available(&self, owner: &str, amount: Amount) -> bool {
        self.available(owner) >= amount
    }

    pub fn accounts(&self) -> Vec<AccountId> {
        let mut ids: Vec<AccountId> = self.accounts.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    fn account(&self, owner: &str) -> Option<SharedAccount> {
        self.accounts.get(owner).map(|entry| Arc::clone(entry.value()))
    }

    fn read_account<R>(&self, owner: &str, f: impl FnOnce(&AccountState) -> R) -> Option<R> {
        let account = self.account(owner)?;
        let state = lock_state(&account);
        Some(f(&state))
    }

    /// Runs `f` with exclusive access to one account. `f` must validate
    /// everything before its first mutation so a rejected call leaves no trace.
    fn with_account<R>(
        &self,
        owner: &str,
        f: impl FnOnce(&mut AccountState) -> Result<R, LedgerError>,
    ) -> Result<R, LedgerError> {
        let account = self
            .account(owner)
            .ok_or_else(|| LedgerError::UnknownAccount(owner.to_string()))?;
        let mut state = lock_state(&account);
        f(&mut state)
    }

    fn record_move(&self, owner: &str, movement: BucketMove, amount: Amount, balance: Balance) {
        self.events.publish(LedgerEvent::BalanceChanged {
            account: owner.to_string(),
            movement,
            amount,
            balance,
        });
    }
}

fn lock_state(account: &Mutex<AccountState>) -> MutexGuard<'_, AccountState> {
    // Mutations validate before writing, so a poisoned guard still holds a
    // consistent split.
    account
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
