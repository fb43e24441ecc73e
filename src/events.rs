//! Ledger notifications for audit and telemetry observers.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tracing::{debug, warn};

use crate::auth::Principal;
use crate::ledger::{
    AccountId, Amount, Balance, BucketMove, EntityType, LockId, ReservationId, StakeId, Timestamp,
};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    AccountOpened {
        account: AccountId,
        total: Amount,
    },
    BalanceChanged {
        account: AccountId,
        movement: BucketMove,
        amount: Amount,
        balance: Balance,
    },
    LockCreated {
        lock_id: LockId,
        owner: AccountId,
        amount: Amount,
        expires_at: Timestamp,
        agreement_ref: String,
    },
    LockReleased {
        lock_id: LockId,
        owner: AccountId,
        amount: Amount,
        settled_by: Principal,
    },
    LockTerminated {
        lock_id: LockId,
        owner: AccountId,
        amount: Amount,
    },
    Staked {
        stake_id: StakeId,
        owner: AccountId,
        tier: u8,
        amount: Amount,
        unlock_at: Timestamp,
    },
    Unstaked {
        stake_id: StakeId,
        owner: AccountId,
        tier: u8,
        amount: Amount,
    },
    ReservationOpened {
        reservation_id: ReservationId,
        owner: AccountId,
        entity_type: EntityType,
    },
    ReservationEnded {
        reservation_id: ReservationId,
        owner: AccountId,
        entity_type: EntityType,
    },
    QuotaReset {
        owner: AccountId,
        entity_type: EntityType,
        at: Timestamp,
    },
    QuotaConsumed {
        owner: AccountId,
        entity_type: EntityType,
        tier: u8,
        amount: u64,
        used_today: u64,
        limit: u64,
    },
}

/// Events a subscriber may fall behind by before it starts losing the oldest.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Fan-out of ledger events to any number of subscribers.
///
/// Each subscriber sees events in publish order. One that stops reading keeps
/// at most `capacity` events and gets `TryRecvError::Lagged` on its next read.
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<LedgerEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn publish(&self, event: LedgerEvent) {
        debug!(?event, "ledger event");
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Takes every event currently buffered for `events`, skipping past any lag.
pub fn drain(events: &mut broadcast::Receiver<LedgerEvent>) -> Vec<LedgerEvent> {
    let mut seen = Vec::new();
    loop {
        match events.try_recv() {
            Ok(event) => seen.push(event),
            Err(TryRecvError::Lagged(skipped)) => {
                warn!(skipped, "event subscriber lagged");
            }
            Err(TryRecvError::Empty | TryRecvError::Closed) => return seen,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opened(account: &str) -> LedgerEvent {
        LedgerEvent::AccountOpened {
            account: account.into(),
            total: 10,
        }
    }

    #[test]
    fn every_subscriber_sees_every_event() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.publish(opened("alice"));
        bus.publish(opened("bob"));
        assert_eq!(drain(&mut a), vec![opened("alice"), opened("bob")]);
        assert_eq!(drain(&mut b), vec![opened("alice"), opened("bob")]);
    }

    #[test]
    fn publishing_without_subscribers_is_harmless() {
        let bus = EventBus::new();
        bus.publish(opened("alice"));
        let dropped = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(dropped);
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(opened("bob"));
    }

    #[test]
    fn idle_subscriber_keeps_only_the_newest_events() {
        let bus = EventBus::with_capacity(16);
        let mut idle = bus.subscribe();
        for n in 0..200 {
            bus.publish(opened(&format!("acct-{n}")));
        }
        assert!(matches!(idle.try_recv(), Err(TryRecvError::Lagged(184))));
        let kept = drain(&mut idle);
        assert_eq!(kept.len(), 16);
        assert_eq!(kept[0], opened("acct-184"));
        assert_eq!(kept[15], opened("acct-199"));
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let bus = EventBus::with_capacity(0);
        let mut events = bus.subscribe();
        bus.publish(opened("alice"));
        assert_eq!(drain(&mut events), vec![opened("alice")]);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(opened("alice")).unwrap();
        assert_eq!(json["type"], "account_opened");
        assert_eq!(json["account"], "alice");
    }
}
