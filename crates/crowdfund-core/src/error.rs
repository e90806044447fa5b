use crate::types::{AccountId, Brand, Phase};
use thiserror::Error;

/// Crowdfund engine errors.
///
/// Every failure is terminal for the specific call; the engine never leaves
/// partial state behind a returned error. Callers are expected to retry
/// `claim`/`settle` after the gating condition becomes true.
#[derive(Debug, Error)]
pub enum CrowdfundError {
    #[error("a beneficiary is already registered for this campaign")]
    AlreadyRegistered,

    #[error("invalid claim condition: {0}")]
    InvalidCondition(String),

    #[error("wrong campaign phase: expected '{expected}', got '{actual}'")]
    WrongPhase { expected: Phase, actual: Phase },

    #[error("claim gate not satisfied: {0}")]
    GateNotSatisfied(String),

    #[error("escrow already claimed")]
    AlreadyClaimed,

    #[error("insufficient balance in account {account}: needed {needed} '{brand}', available {available}")]
    InsufficientBalance {
        account: AccountId,
        brand: Brand,
        needed: u64,
        available: u64,
    },

    #[error("unknown account {0}")]
    UnknownAccount(AccountId),

    #[error("invitation was not issued by this engine, or was already redeemed")]
    UnknownInvitation,

    #[error("no beneficiary registered")]
    NoBeneficiary,

    #[error("balance overflow on account {account} for brand '{brand}'")]
    Overflow { account: AccountId, brand: Brand },

    #[error("audit log error: {0}")]
    Audit(String),
}

impl CrowdfundError {
    pub fn wrong_phase(expected: Phase, actual: Phase) -> Self {
        Self::WrongPhase { expected, actual }
    }
}
