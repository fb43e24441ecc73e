use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{
    AccountId, Balance, EntityType, Ledger, Lock, LockStatus, QuotaCounter, Reservation,
    ReservationStatus, Stake, StakeStatus, Timestamp,
};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountSnapshot {
    pub balance: Balance,
    pub quota: BTreeMap<EntityType, QuotaCounter>,
}

/// Point-in-time copy of the whole ledger with a root hash over every record.
///
/// Each account is copied under its own lock, so every per-account view is
/// internally consistent.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub taken_at: Timestamp,
    pub accounts: BTreeMap<AccountId, AccountSnapshot>,
    pub locks: Vec<Lock>,
    pub stakes: Vec<Stake>,
    pub reservations: Vec<Reservation>,
    #[serde(with = "hex_root")]
    pub state_root: [u8; 32],
}

impl Ledger {
    pub fn snapshot(&self) -> LedgerSnapshot {
        let mut accounts = BTreeMap::new();
        let mut locks = Vec::new();
        let mut stakes = Vec::new();
        for id in self.accounts() {
            let copied = self.read_account(&id, |state| {
                locks.extend(state.locks.values().cloned());
                stakes.extend(state.stakes.values().cloned());
                AccountSnapshot {
                    balance: state.balance,
                    quota: state.quota.clone(),
                }
            });
            if let Some(account) = copied {
                accounts.insert(id, account);
            }
        }
        locks.sort_by_key(|lock: &Lock| lock.lock_id);
        stakes.sort_by_key(|stake: &Stake| stake.stake_id);
        let reservations = self.all_reservations();
        let state_root = compute_state_root(&accounts, &locks, &stakes, &reservations);
        LedgerSnapshot {
            taken_at: self.now(),
            accounts,
            locks,
            stakes,
            reservations,
            state_root,
        }
    }
}

impl LedgerSnapshot {
    pub fn state_root_hex(&self) -> String {
        hex::encode(self.state_root)
    }
}

fn compute_state_root(
    accounts: &BTreeMap<AccountId, AccountSnapshot>,
    locks: &[Lock],
    stakes: &[Stake],
    reservations: &[Reservation],
) -> [u8; 32] {
    let mut leaves: Vec<[u8; 32]> = Vec::new();
    for (account, snapshot) in accounts {
        let balance = &snapshot.balance;
        let mut hasher = Sha256::new();
        hasher.update(b"acct");
        hasher.update(account.as_bytes());
        hasher.update(balance.total.to_le_bytes());
        hasher.update(balance.available.to_le_bytes());
        hasher.update(balance.locked.to_le_bytes());
        hasher.update(balance.staked.to_le_bytes());
        for (entity, counter) in &snapshot.quota {
            hasher.update([entity.code()]);
            hasher.update(counter.used_today.to_le_bytes());
            hasher.update(counter.last_reset_at.to_le_bytes());
        }
        leaves.push(hasher.finalize().into());
    }
    for lock in locks {
        let mut hasher = Sha256::new();
        hasher.update(b"lock");
        hasher.update(lock.lock_id.0.to_le_bytes());
        hasher.update(lock.owner.as_bytes());
        hasher.update(lock.amount.to_le_bytes());
        hasher.update(lock.expires_at.to_le_bytes());
        hasher.update(lock.agreement_ref.as_bytes());
        hasher.update([match lock.status {
            LockStatus::Active => 0u8,
            LockStatus::Released => 1,
            LockStatus::Terminated => 2,
        }]);
        leaves.push(hasher.finalize().into());
    }
    for stake in stakes {
        let mut hasher = Sha256::new();
        hasher.update(b"stake");
        hasher.update(stake.stake_id.0.to_le_bytes());
        hasher.update(stake.owner.as_bytes());
        hasher.update([stake.tier]);
        hasher.update(stake.amount.to_le_bytes());
        hasher.update(stake.unlock_at.to_le_bytes());
        hasher.update([u8::from(stake.status == StakeStatus::Active)]);
        leaves.push(hasher.finalize().into());
    }
    for reservation in reservations {
        let mut hasher = Sha256::new();
        hasher.update(b"res");
        hasher.update(reservation.reservation_id.0.to_le_bytes());
        hasher.update(reservation.owner.as_bytes());
        hasher.update([reservation.entity_type.code()]);
        hasher.update([u8::from(reservation.status == ReservationStatus::Active)]);
        leaves.push(hasher.finalize().into());
    }
    build_merkle(leaves)
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"tst-ledger-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity((leaves.len() + 1) / 2);
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            hasher.update(chunk.get(1).unwrap_or(&chunk[0]));
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}

mod hex_root {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let bytes = hex::decode(&encoded).map_err(D::Error::custom)?;
        <[u8; 32]>::try_from(bytes.as_slice())
            .map_err(|_| D::Error::custom(format!("state root must be 32 bytes, got {}", bytes.len())))
    }
}
