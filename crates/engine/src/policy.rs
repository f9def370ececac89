//! What a transfer may do to the source account's balance.

use serde::{Deserialize, Serialize};

use crate::{Account, EngineError, ResultEngine};

/// Negative-balance policy applied at the end of every transfer.
///
/// The default lets balances go below zero; deployments that treat an
/// overdraft as a business error pick [`BalancePolicy::RejectOverdraft`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BalancePolicy {
    #[default]
    #[serde(rename = "allow")]
    AllowNegative,
    #[serde(rename = "reject")]
    RejectOverdraft,
}

impl BalancePolicy {
    /// Check the source account as it stands after both balance updates.
    pub(crate) fn check_debited(self, account: &Account) -> ResultEngine<()> {
        match self {
            Self::AllowNegative => Ok(()),
            Self::RejectOverdraft if account.balance < 0 => {
                Err(EngineError::InsufficientFunds(format!(
                    "account {} would end at {} {}",
                    account.id, account.balance, account.currency
                )))
            }
            Self::RejectOverdraft => Ok(()),
        }
    }
}

impl TryFrom<&str> for BalancePolicy {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim() {
            "allow" => Ok(Self::AllowNegative),
            "reject" => Ok(Self::RejectOverdraft),
            other => Err(EngineError::InvalidPolicy(format!(
                "{other:?} (expected \"allow\" or \"reject\")"
            ))),
        }
    }
}
