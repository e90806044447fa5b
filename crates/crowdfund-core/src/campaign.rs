use crate::book::{AccountBook, TransferInstruction};
use crate::error::CrowdfundError;
use crate::gate::ClaimGate;
use crate::types::{
    AccountId, Allocation, Amount, ClaimCondition, ContributionRecord, Phase, Proposal,
};
use chrono::{DateTime, Utc};

/// Registered beneficiary state shared by both campaign variants.
///
/// The slot is never cleared once filled, so a second registration fails in
/// any phase. Cancelling withdraws the pending registration but keeps the
/// slot occupied; cancellation rights are revoked at claim/settlement.
#[derive(Debug, Clone)]
pub(crate) struct BeneficiaryRecord {
    pub account: AccountId,
    pub condition: ClaimCondition,
    pub cancelled: bool,
    pub cancellation_revoked: bool,
}

impl BeneficiaryRecord {
    pub(crate) fn new(account: AccountId, condition: ClaimCondition) -> Self {
        Self {
            account,
            condition,
            cancelled: false,
            cancellation_revoked: false,
        }
    }

    pub(crate) fn cancel(&mut self) -> Result<(), CrowdfundError> {
        if self.cancellation_revoked {
            return Err(CrowdfundError::AlreadyClaimed);
        }
        self.cancelled = true;
        Ok(())
    }
}

/// Simple-variant campaign state machine: Open -> Claimed, terminal.
///
/// Contributions flow into the escrow pool while Open; after the deadline
/// the beneficiary claims the pool's entire balance in one atomic batch.
#[derive(Debug)]
pub struct Campaign {
    phase: Phase,
    escrow: AccountId,
    beneficiary: Option<BeneficiaryRecord>,
    contributors: Vec<ContributionRecord>,
}

impl Campaign {
    /// Start a campaign with a fresh empty escrow pool in `book`. One
    /// campaign per engine instance; it is never recreated.
    pub fn start(book: &mut AccountBook) -> Self {
        Self {
            phase: Phase::Open,
            escrow: book.open_account(),
            beneficiary: None,
            contributors: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn escrow(&self) -> AccountId {
        self.escrow
    }

    pub fn contributors(&self) -> &[ContributionRecord] {
        &self.contributors
    }

    pub fn condition(&self) -> Option<&ClaimCondition> {
        self.beneficiary.as_ref().map(|b| &b.condition)
    }

    /// Register the single beneficiary. The claim condition is captured from
    /// the proposal's exit rule and is immutable afterwards. No phase change.
    pub fn register_beneficiary(
        &mut self,
        account: AccountId,
        proposal: &Proposal,
    ) -> Result<(), CrowdfundError> {
        if self.beneficiary.is_some() {
            return Err(CrowdfundError::AlreadyRegistered);
        }
        let condition = ClaimCondition::from_proposal(proposal)?;
        self.beneficiary = Some(BeneficiaryRecord::new(account, condition));
        Ok(())
    }

    /// Record a contribution and move it into escrow atomically.
    ///
    /// No minimum or maximum is enforced on the amount or the aggregate.
    pub fn contribute(
        &mut self,
        book: &mut AccountBook,
        account: AccountId,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<(), CrowdfundError> {
        if self.phase != Phase::Open {
            return Err(CrowdfundError::wrong_phase(Phase::Open, self.phase));
        }
        book.transfer_batch(&[TransferInstruction::new(account, self.escrow, amount.clone())])?;
        self.contributors.push(ContributionRecord {
            account,
            amount,
            recorded_at: now,
        });
        Ok(())
    }

    /// Claim the escrowed total into `payout`. Gated on the deadline;
    /// succeeds at most once, then reports `AlreadyClaimed`.
    pub fn claim(
        &mut self,
        book: &mut AccountBook,
        now: DateTime<Utc>,
        payout: AccountId,
    ) -> Result<Allocation, CrowdfundError> {
        if self.phase == Phase::Claimed {
            return Err(CrowdfundError::AlreadyClaimed);
        }
        let beneficiary = self
            .beneficiary
            .as_mut()
            .ok_or(CrowdfundError::NoBeneficiary)?;
        if beneficiary.cancelled {
            return Err(CrowdfundError::NoBeneficiary);
        }

        let gate = ClaimGate::AfterDeadline {
            deadline: beneficiary.condition.deadline,
        };
        let escrowed = book.allocation(self.escrow)?.clone();
        gate.evaluate(now, &escrowed)?;

        let batch: Vec<TransferInstruction> = escrowed
            .amounts()
            .map(|amount| TransferInstruction::new(self.escrow, payout, amount))
            .collect();
        book.transfer_batch(&batch)?;

        beneficiary.cancellation_revoked = true;
        self.phase = Phase::Claimed;
        Ok(escrowed)
    }

    /// Withdraw a pending registration. Fails with `AlreadyClaimed` once the
    /// claim has gone through; the beneficiary slot stays occupied either way.
    pub fn cancel_registration(&mut self) -> Result<(), CrowdfundError> {
        self.beneficiary
            .as_mut()
            .ok_or(CrowdfundError::NoBeneficiary)?
            .cancel()
    }
}
