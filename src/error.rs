use thiserror::Error;

use crate::ledger::{AccountId, Amount, Bucket, LockId, ReservationId, StakeId, Timestamp};

/// Every way a ledger operation can be rejected.
///
/// A rejected operation never mutates state, so callers may retry any of
/// these after fixing the cause.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("amount must be greater than zero")]
    InvalidAmount,
    #[error("invalid tier {0}")]
    InvalidTier(u8),
    #[error("invalid entity type {0}")]
    InvalidEntityType(u8),
    #[error("agreement reference is required")]
    MissingReference,
    #[error("insufficient {bucket} balance: required {required}, have {have}")]
    InsufficientBalance {
        bucket: Bucket,
        required: Amount,
        have: Amount,
    },
    #[error("caller is not permitted to {action}")]
    Unauthorized { action: &'static str },
    #[error("holding period not elapsed: unlocks at {unlocks_at}, now {now}")]
    PeriodNotElapsed { unlocks_at: Timestamp, now: Timestamp },
    #[error("record already settled")]
    AlreadySettled,
    #[error("reservation already ended")]
    AlreadyEnded,
    #[error("daily quota exceeded: limit {limit}, used {used}, requested {requested}")]
    QuotaExceeded {
        limit: u64,
        used: u64,
        requested: u64,
    },
    #[error("unknown account {0}")]
    UnknownAccount(AccountId),
    #[error("account {0} already exists")]
    AccountExists(AccountId),
    #[error("unknown lock {0}")]
    UnknownLock(LockId),
    #[error("unknown stake {0}")]
    UnknownStake(StakeId),
    #[error("unknown reservation {0}")]
    UnknownReservation(ReservationId),
}

impl LedgerError {
    /// Stable identifier for mapping onto an external error encoding.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InvalidAmount => "invalid_amount",
            LedgerError::InvalidTier(_) => "invalid_tier",
            LedgerError::InvalidEntityType(_) => "invalid_entity_type",
            LedgerError::MissingReference => "missing_reference",
            LedgerError::InsufficientBalance { .. } => "insufficient_balance",
            LedgerError::Unauthorized { .. } => "unauthorized",
            LedgerError::PeriodNotElapsed { .. } => "period_not_elapsed",
            LedgerError::AlreadySettled => "already_settled",
            LedgerError::AlreadyEnded => "already_ended",
            LedgerError::QuotaExceeded { .. } => "quota_exceeded",
            LedgerError::UnknownAccount(_) => "unknown_account",
            LedgerError::AccountExists(_) => "account_exists",
            LedgerError::UnknownLock(_) => "unknown_lock",
            LedgerError::UnknownStake(_) => "unknown_stake",
            LedgerError::UnknownReservation(_) => "unknown_reservation",
        }
    }
}
