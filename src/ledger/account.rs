use std::fmt;

use serde::{Deserialize, Serialize};

use super::Amount;
use crate::error::LedgerError;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    Available,
    Locked,
    Staked,
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Bucket::Available => "available",
            Bucket::Locked => "locked",
            Bucket::Staked => "staked",
        })
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BucketMove {
    AvailableToLocked,
    LockedToAvailable,
    AvailableToStaked,
    StakedToAvailable,
}

impl BucketMove {
    fn endpoints(self) -> (Bucket, Bucket) {
        match self {
            BucketMove::AvailableToLocked => (Bucket::Available, Bucket::Locked),
            BucketMove::LockedToAvailable => (Bucket::Locked, Bucket::Available),
            BucketMove::AvailableToStaked => (Bucket::Available, Bucket::Staked),
            BucketMove::StakedToAvailable => (Bucket::Staked, Bucket::Available),
        }
    }
}

/// One account's credit split. `total` is fixed when the account is opened.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Balance {
    pub total: Amount,
    pub available: Amount,
    pub locked: Amount,
    pub staked: Amount,
}

impl Balance {
    pub fn new(total: Amount) -> Self {
        Self {
            total,
            available: total,
            locked: 0,
            staked: 0,
        }
    }

    pub fn is_conserved(&self) -> bool {
        self.available
            .checked_add(self.locked)
            .and_then(|sum| sum.checked_add(self.staked))
            == Some(self.total)
    }

    pub fn bucket(&self, bucket: Bucket) -> Amount {
        match bucket {
            Bucket::Available => self.available,
            Bucket::Locked => self.locked,
            Bucket::Staked => self.staked,
        }
    }

    fn bucket_mut(&mut self, bucket: Bucket) -> &mut Amount {
        match bucket {
            Bucket::Available => &mut self.available,
            Bucket::Locked => &mut self.locked,
            Bucket::Staked => &mut self.staked,
        }
    }

    // The four moves below are the only writers of the split. They are
    // reachable from the lock and stake modules, never from the public API.

    pub(super) fn move_available_to_locked(&mut self, amount: Amount) -> Result<(), LedgerError> {
        self.shift(BucketMove::AvailableToLocked, amount)
    }

    pub(super) fn move_locked_to_available(&mut self, amount: Amount) -> Result<(), LedgerError> {
        self.shift(BucketMove::LockedToAvailable, amount)
    }

    pub(super) fn move_available_to_staked(&mut self, amount: Amount) -> Result<(), LedgerError> {
        self.shift(BucketMove::AvailableToStaked, amount)
    }

    pub(super) fn move_staked_to_available(&mut self, amount: Amount) -> Result<(), LedgerError> {
        self.shift(BucketMove::StakedToAvailable, amount)
    }

    fn shift(&mut self, movement: BucketMove, amount: Amount) -> Result<(), LedgerError> {
        let (from, to) = movement.endpoints();
        let have = self.bucket(from);
        if have < amount {
            return Err(LedgerError::InsufficientBalance {
                bucket: from,
                required: amount,
                have,
            });
        }
        *self.bucket_mut(from) -= amount;
        // Cannot overflow: the destination plus `amount` is bounded by `total`.
        *self.bucket_mut(to) += amount;
        debug_assert!(self.is_conserved());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moves_shift_credit_between_buckets() {
        let mut balance = Balance::new(100);
        balance.move_available_to_locked(30).unwrap();
        balance.move_available_to_staked(20).unwrap();
        assert_eq!(
            balance,
            Balance {
                total: 100,
                available: 50,
                locked: 30,
                staked: 20
            }
        );
        balance.move_locked_to_available(30).unwrap();
        balance.move_staked_to_available(20).unwrap();
        assert_eq!(balance, Balance::new(100));
    }

    #[test]
    fn overdraw_fails_without_touching_either_bucket() {
        let mut balance = Balance::new(100);
        balance.move_available_to_locked(60).unwrap();
        let before = balance;
        assert_eq!(
            balance.move_available_to_staked(50),
            Err(LedgerError::InsufficientBalance {
                bucket: Bucket::Available,
                required: 50,
                have: 40
            })
        );
        assert_eq!(
            balance.move_staked_to_available(1),
            Err(LedgerError::InsufficientBalance {
                bucket: Bucket::Staked,
                required: 1,
                have: 0
            })
        );
        assert_eq!(balance, before);
        assert!(balance.is_conserved());
    }

    #[test]
    fn conservation_detects_a_broken_split() {
        let broken = Balance {
            total: 10,
            available: 5,
            locked: 5,
            staked: 1,
        };
        assert!(!broken.is_conserved());
        assert!(Balance::default().is_conserved());
    }
}
