//! Ledger operations as data, for replay and remote coordinators.

use serde::{Deserialize, Serialize};

use crate::auth::Principal;
use crate::error::LedgerError;
use crate::ledger::{
    AccountId, Amount, Ledger, LockId, QuotaUsage, ReservationId, StakeId, Timestamp,
};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LedgerCommand {
    OpenAccount {
        account: AccountId,
        total: Amount,
    },
    CreateLock {
        owner: AccountId,
        amount: Amount,
        duration: u64,
        agreement_ref: String,
    },
    ReleaseLock {
        caller: Principal,
        lock_id: LockId,
    },
    TerminateLock {
        caller: Principal,
        lock_id: LockId,
    },
    Stake {
        owner: AccountId,
        tier: u8,
    },
    Unstake {
        caller: Principal,
        stake_id: StakeId,
    },
    Reserve {
        owner: AccountId,
        entity_type: u8,
    },
    EndReservation {
        caller: Principal,
        reservation_id: ReservationId,
    },
    /// Meters at `tier`, or at the owner's active tier when omitted.
    ConsumeQuota {
        caller: Principal,
        owner: AccountId,
        entity_type: u8,
        #[serde(default)]
        tier: Option<u8>,
        amount: u64,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CommandOutcome {
    Done,
    LockCreated { lock_id: LockId },
    Staked { stake_id: StakeId },
    Reserved { reservation_id: ReservationId },
    QuotaConsumed { usage: QuotaUsage },
}

/// One line of a replay script.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScriptStep {
    /// Clock reading to apply before the command runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at: Option<Timestamp>,
    #[serde(flatten)]
    pub command: LedgerCommand,
}

impl Ledger {
    pub fn execute(&self, command: &LedgerCommand) -> Result<CommandOutcome, LedgerError> {
        match command {
            LedgerCommand::OpenAccount { account, total } => {
                self.open_account(account, *total)?;
                Ok(CommandOutcome::Done)
            }
            LedgerCommand::CreateLock {
                owner,
                amount,
                duration,
                agreement_ref,
            } => {
                let lock_id = self.create_lock(owner, *amount, *duration, agreement_ref)?;
                Ok(CommandOutcome::LockCreated { lock_id })
            }
            LedgerCommand::ReleaseLock { caller, lock_id } => {
                self.release_after_expiry(caller, *lock_id)?;
                Ok(CommandOutcome::Done)
            }
            LedgerCommand::TerminateLock { caller, lock_id } => {
                self.early_terminate(caller, *lock_id)?;
                Ok(CommandOutcome::Done)
            }
            LedgerCommand::Stake { owner, tier } => {
                let stake_id = self.stake_for_tier(owner, *tier)?;
                Ok(CommandOutcome::Staked { stake_id })
            }
            LedgerCommand::Unstake { caller, stake_id } => {
                self.unstake(caller, *stake_id)?;
                Ok(CommandOutcome::Done)
            }
            LedgerCommand::Reserve { owner, entity_type } => {
                let reservation_id = self.reserve_for_entity(owner, *entity_type)?;
                Ok(CommandOutcome::Reserved { reservation_id })
            }
            LedgerCommand::EndReservation {
                caller,
                reservation_id,
            } => {
                self.end_reservation(caller, *reservation_id)?;
                Ok(CommandOutcome::Done)
            }
            LedgerCommand::ConsumeQuota {
                caller,
                owner,
                entity_type,
                tier,
                amount,
            } => {
                let usage = match tier {
                    Some(tier) => self.consume_quota(caller, owner, *entity_type, *tier, *amount)?,
                    None => self.consume_quota_at_active_tier(caller, owner, *entity_type, *amount)?,
                };
                Ok(CommandOutcome::QuotaConsumed { usage })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::test_support::*;

    fn step(line: &str) -> ScriptStep {
        serde_json::from_str(line).unwrap()
    }

    #[test]
    fn script_lines_parse_into_commands() {
        let parsed = step(r#"{"at":5,"op":"create_lock","owner":"alice","amount":10,"duration":2,"agreement_ref":"A1"}"#);
        assert_eq!(parsed.at, Some(5));
        assert_eq!(
            parsed.command,
            LedgerCommand::CreateLock {
                owner: "alice".into(),
                amount: 10,
                duration: 2,
                agreement_ref: "A1".into(),
            }
        );

        let parsed = step(r#"{"op":"release_lock","caller":{"kind":"operator","id":"metering"},"lock_id":1}"#);
        assert_eq!(parsed.at, None);
        assert_eq!(
            parsed.command,
            LedgerCommand::ReleaseLock {
                caller: Principal::operator("metering"),
                lock_id: LockId(1),
            }
        );
    }

    #[test]
    fn execute_runs_the_agreement_flow() {
        let (ledger, clock) = ledger();
        let alice = Principal::account("alice");
        let staked = ledger
            .execute(&LedgerCommand::Stake { owner: "alice".into(), tier: 2 })
            .unwrap();
        assert_eq!(staked, CommandOutcome::Staked { stake_id: StakeId(1) });

        let created = ledger
            .execute(&LedgerCommand::CreateLock {
                owner: "alice".into(),
                amount: 10,
                duration: 2,
                agreement_ref: "A1".into(),
            })
            .unwrap();
        assert_eq!(created, CommandOutcome::LockCreated { lock_id: LockId(1) });

        clock.advance(3);
        let release = LedgerCommand::ReleaseLock { caller: alice, lock_id: LockId(1) };
        assert_eq!(ledger.execute(&release), Ok(CommandOutcome::Done));
        assert_eq!(ledger.execute(&release), Err(LedgerError::AlreadySettled));
        assert_eq!(ledger.available("alice"), 975);
    }

    #[test]
    fn consume_without_tier_uses_the_active_tier() {
        let (ledger, _) = ledger();
        ledger.stake_for_tier("alice", 1).unwrap();
        let outcome = ledger
            .execute(&LedgerCommand::ConsumeQuota {
                caller: Principal::operator("metering"),
                owner: "alice".into(),
                entity_type: 3,
                tier: None,
                amount: 2,
            })
            .unwrap();
        let CommandOutcome::QuotaConsumed { usage } = outcome else {
            panic!("unexpected outcome {outcome:?}");
        };
        assert_eq!((usage.tier, usage.limit, usage.remaining), (1, 7, 5));
    }

    #[test]
    fn reservation_commands_round_through_execute() {
        let (ledger, _) = ledger();
        let reserved = ledger
            .execute(&LedgerCommand::Reserve { owner: "bob".into(), entity_type: 2 })
            .unwrap();
        assert_eq!(reserved, CommandOutcome::Reserved { reservation_id: ReservationId(1) });
        let end = LedgerCommand::EndReservation {
            caller: Principal::account("bob"),
            reservation_id: ReservationId(1),
        };
        assert_eq!(ledger.execute(&end), Ok(CommandOutcome::Done));
        assert_eq!(ledger.execute(&end), Err(LedgerError::AlreadyEnded));
    }

    #[test]
    fn outcomes_serialize_with_result_tag() {
        let json = serde_json::to_value(CommandOutcome::LockCreated { lock_id: LockId(4) }).unwrap();
        assert_eq!(json, serde_json::json!({"result": "lock_created", "lock_id": 4}));
    }
}
