//! Entity reservations.
//!
//! A reservation records that an account claimed an entity slot of some type.
//! It carries no balance effect and no limit on how many an owner may hold.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{AccountId, EntityType, Ledger, ReservationId, Timestamp};
use crate::auth::{self, Principal};
use crate::error::LedgerError;
use crate::events::LedgerEvent;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Active,
    Ended,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reservation {
    pub reservation_id: ReservationId,
    pub owner: AccountId,
    pub entity_type: EntityType,
    pub created_at: Timestamp,
    pub status: ReservationStatus,
    pub ended_at: Option<Timestamp>,
}

#[derive(Debug, Default)]
pub(crate) struct ReservationDirectory {
    records: DashMap<ReservationId, Reservation>,
    by_owner: DashMap<AccountId, Vec<ReservationId>>,
    next: AtomicU64,
}

impl ReservationDirectory {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn insert(&self, owner: &str, entity_type: EntityType, now: Timestamp) -> Reservation {
        let reservation = Reservation {
            reservation_id: ReservationId(self.next.fetch_add(1, Ordering::SeqCst) + 1),
            owner: owner.to_string(),
            entity_type,
            created_at: now,
            status: ReservationStatus::Active,
            ended_at: None,
        };
        self.records
            .insert(reservation.reservation_id, reservation.clone());
        self.by_owner
            .entry(owner.to_string())
            .or_default()
            .push(reservation.reservation_id);
        reservation
    }

    fn get(&self, id: ReservationId) -> Option<Reservation> {
        self.records.get(&id).map(|entry| entry.value().clone())
    }

    fn ids_of(&self, owner: &str) -> Vec<ReservationId> {
        self.by_owner
            .get(owner)
            .map(|ids| ids.value().clone())
            .unwrap_or_default()
    }

    fn all(&self) -> Vec<Reservation> {
        let mut all: Vec<Reservation> = self.records.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|r| r.reservation_id);
        all
    }
}

impl Ledger {
    pub fn reserve_for_entity(
        &self,
        owner: &str,
        entity_type: u8,
    ) -> Result<ReservationId, LedgerError> {
        let entity = EntityType::try_from(entity_type)?;
        if self.account(owner).is_none() {
            return Err(LedgerError::UnknownAccount(owner.to_string()));
        }
        let reservation = self.reservations.insert(owner, entity, self.now());
        let reservation_id = reservation.reservation_id;
        info!(%reservation_id, owner, %entity, "entity reserved");
        self.events.publish(LedgerEvent::ReservationOpened {
            reservation_id,
            owner: reservation.owner,
            entity_type: entity,
        });
        Ok(reservation_id)
    }

    pub fn end_reservation(
        &self,
        caller: &Principal,
        reservation_id: ReservationId,
    ) -> Result<(), LedgerError> {
        let mut entry = self
            .reservations
            .records
            .get_mut(&reservation_id)
            .ok_or(LedgerError::UnknownReservation(reservation_id))?;
        let reservation = entry.value_mut();
        auth::require_owner(caller, &reservation.owner, "end reservation")?;
        if reservation.status == ReservationStatus::Ended {
            return Err(LedgerError::AlreadyEnded);
        }
        reservation.status = ReservationStatus::Ended;
        reservation.ended_at = Some(self.now());
        info!(%reservation_id, owner = %reservation.owner, "reservation ended");
        let event = LedgerEvent::ReservationEnded {
            reservation_id,
            owner: reservation.owner.clone(),
            entity_type: reservation.entity_type,
        };
        drop(entry);
        self.events.publish(event);
        Ok(())
    }

    pub fn reservation(&self, reservation_id: ReservationId) -> Option<Reservation> {
        self.reservations.get(reservation_id)
    }

    pub fn reservations_of(&self, owner: &str) -> Vec<Reservation> {
        self.reservations
            .ids_of(owner)
            .into_iter()
            .filter_map(|id| self.reservations.get(id))
            .collect()
    }

    pub fn all_reservations(&self) -> Vec<Reservation> {
        self.reservations.all()
    }
}
