//! TST access-control ledger.
//!
//! Tracks each account's fixed credit across available, locked and staked
//! buckets, time locks backing external agreements, tier stakes, daily
//! per-entity compute quotas and entity reservations.

pub mod auth;
pub mod clock;
pub mod command;
pub mod config;
pub mod error;
pub mod events;
pub mod ledger;

pub use auth::{OperatorId, Principal, SettlementAuthority};
pub use clock::{Clock, ManualClock, SystemClock};
pub use command::{CommandOutcome, LedgerCommand, ScriptStep};
pub use config::{ConfigError, LedgerConfig};
pub use error::LedgerError;
pub use events::{EventBus, LedgerEvent};
pub use ledger::{
    AccessStatus, AccountId, Amount, Balance, EntityType, Ledger, LedgerSnapshot, LockId,
    ReservationId, StakeId, Timestamp,
};
