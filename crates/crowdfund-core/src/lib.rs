//! Crowdfund settlement core.
//!
//! A single-campaign conditional-commitment engine: contributors escrow value
//! under a published rule and one registered beneficiary claims the pool once
//! the claim gate (deadline, optionally a funding goal) is satisfied. Value
//! moves only through atomic all-or-nothing batches, claims happen exactly
//! once, and every participant action lands in a hash-chained audit log.

#![deny(unsafe_code)]

pub mod audit;
pub mod book;
pub mod campaign;
pub mod clock;
pub mod engine;
pub mod error;
pub mod gate;
pub mod invitation;
pub mod reward;
pub mod threshold;
pub mod types;

pub use audit::{AuditEntry, AuditKind, AuditLog};
pub use book::{AccountBook, TransferInstruction};
pub use campaign::Campaign;
pub use clock::{ManualClock, SystemClock, TimeOracle};
pub use engine::{ClaimRight, CrowdfundEngine, EngineConfig, ThresholdEngine};
pub use error::CrowdfundError;
pub use gate::ClaimGate;
pub use invitation::{
    BeneficiaryInvitation, ClaimInvitation, ContributeInvitation, InvitationBook, PledgeInvitation,
};
pub use reward::{Mint, RewardCalculator};
pub use threshold::ThresholdCampaign;
pub use types::{
    AccountId, Allocation, Amount, Brand, ClaimCondition, ContributionRecord, ExitRule, Phase,
    PledgeRecord, Proposal, SettlementSummary,
};
