//! Who may settle, terminate and meter.
//!
//! Owner-only operations compare the caller with the record owner. Settlement
//! and metering go through a configurable [`SettlementAuthority`], so the
//! integrating system decides whether the owner, a registered operator, or
//! either may invoke them.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::LedgerError;
use crate::ledger::AccountId;

pub type OperatorId = String;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Principal {
    Account(AccountId),
    Operator(OperatorId),
}

impl Principal {
    pub fn account(id: impl Into<AccountId>) -> Self {
        Principal::Account(id.into())
    }

    pub fn operator(id: impl Into<OperatorId>) -> Self {
        Principal::Operator(id.into())
    }

    pub fn is_account(&self, owner: &AccountId) -> bool {
        matches!(self, Principal::Account(id) if id == owner)
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Principal::Account(id) => write!(f, "account:{id}"),
            Principal::Operator(id) => write!(f, "operator:{id}"),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SettlementAuthority {
    Owner,
    Operator,
    OwnerOrOperator,
}

impl SettlementAuthority {
    pub fn permits(
        self,
        caller: &Principal,
        owner: &AccountId,
        operators: &BTreeSet<OperatorId>,
    ) -> bool {
        let as_owner = caller.is_account(owner);
        let as_operator = matches!(caller, Principal::Operator(id) if operators.contains(id));
        match self {
            SettlementAuthority::Owner => as_owner,
            SettlementAuthority::Operator => as_operator,
            SettlementAuthority::OwnerOrOperator => as_owner || as_operator,
        }
    }
}

pub(crate) fn require_owner(
    caller: &Principal,
    owner: &AccountId,
    action: &'static str,
) -> Result<(), LedgerError> {
    if caller.is_account(owner) {
        return Ok(());
    }
    warn!(%caller, %owner, action, "rejected non-owner caller");
    Err(LedgerError::Unauthorized { action })
}

pub(crate) fn require_authority(
    authority: SettlementAuthority,
    caller: &Principal,
    owner: &AccountId,
    operators: &BTreeSet<OperatorId>,
    action: &'static str,
) -> Result<(), LedgerError> {
    if authority.permits(caller, owner, operators) {
        return Ok(());
    }
    warn!(%caller, %owner, action, ?authority, "rejected caller outside settlement authority");
    Err(LedgerError::Unauthorized { action })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn operators() -> BTreeSet<OperatorId> {
        ["metering".to_string()].into_iter().collect()
    }

    #[test]
    fn authority_matrix() {
        let owner = "alice".to_string();
        let ops = operators();
        let alice = Principal::account("alice");
        let bob = Principal::account("bob");
        let metering = Principal::operator("metering");
        let rogue = Principal::operator("rogue");

        assert!(SettlementAuthority::Owner.permits(&alice, &owner, &ops));
        assert!(!SettlementAuthority::Owner.permits(&metering, &owner, &ops));

        assert!(SettlementAuthority::Operator.permits(&metering, &owner, &ops));
        assert!(!SettlementAuthority::Operator.permits(&alice, &owner, &ops));
        assert!(!SettlementAuthority::Operator.permits(&rogue, &owner, &ops));

        assert!(SettlementAuthority::OwnerOrOperator.permits(&alice, &owner, &ops));
        assert!(SettlementAuthority::OwnerOrOperator.permits(&metering, &owner, &ops));
        assert!(!SettlementAuthority::OwnerOrOperator.permits(&bob, &owner, &ops));
    }

    #[test]
    fn owner_check_rejects_operators_too() {
        let owner = "alice".to_string();
        assert!(require_owner(&Principal::account("alice"), &owner, "unstake").is_ok());
        assert_eq!(
            require_owner(&Principal::operator("metering"), &owner, "unstake"),
            Err(LedgerError::Unauthorized { action: "unstake" })
        );
    }

    #[test]
    fn principal_serializes_with_kind_tag() {
        let json = serde_json::to_string(&Principal::operator("gate")).unwrap();
        assert_eq!(json, r#"{"kind":"operator","id":"gate"}"#);
    }
}
