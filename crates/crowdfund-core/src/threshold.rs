use crate::book::{AccountBook, TransferInstruction};
use crate::campaign::BeneficiaryRecord;
use crate::error::CrowdfundError;
use crate::gate::ClaimGate;
use crate::reward::{Mint, RewardCalculator};
use crate::types::{
    AccountId, Allocation, Amount, Brand, ClaimCondition, Phase, PledgeRecord, Proposal,
    SettlementSummary,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Threshold-pledge campaign state machine: Open -> Settled, terminal.
///
/// Pledged value stays in each pledger's account until settlement. At
/// settlement every pledge moves into escrow, every positive pledger
/// receives one freshly minted product unit, and the escrow total pays out
/// to the beneficiary, all in a single atomic batch.
#[derive(Debug)]
pub struct ThresholdCampaign {
    phase: Phase,
    escrow: AccountId,
    beneficiary: Option<BeneficiaryRecord>,
    pledges: Vec<PledgeRecord>,
    reward: RewardCalculator,
}

impl ThresholdCampaign {
    pub fn start(book: &mut AccountBook, reward: RewardCalculator) -> Self {
        Self {
            phase: Phase::Open,
            escrow: book.open_account(),
            beneficiary: None,
            pledges: Vec::new(),
            reward,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn escrow(&self) -> AccountId {
        self.escrow
    }

    pub fn pledges(&self) -> &[PledgeRecord] {
        &self.pledges
    }

    pub fn condition(&self) -> Option<&ClaimCondition> {
        self.beneficiary.as_ref().map(|b| &b.condition)
    }

    /// Aggregate pledged so far, per brand. Settlement feeds this to the gate.
    pub fn pledged_total(&self) -> Allocation {
        self.pledges.iter().map(|p| p.give.clone()).collect()
    }

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

    /// Record a pledge. Funds are not moved yet; they leave the pledger's
    /// account only when settlement commits.
    pub fn pledge(
        &mut self,
        book: &AccountBook,
        account: AccountId,
        give: Amount,
        now: DateTime<Utc>,
    ) -> Result<(), CrowdfundError> {
        if self.phase != Phase::Open {
            return Err(CrowdfundError::wrong_phase(Phase::Open, self.phase));
        }
        if !book.has_account(account) {
            return Err(CrowdfundError::UnknownAccount(account));
        }
        self.pledges.push(PledgeRecord {
            account,
            give,
            rewarded: false,
            recorded_at: now,
        });
        Ok(())
    }

    /// Settle the campaign: collect every pledge into escrow, hand each
    /// positive pledger its reward, pay the escrow total to `payout`.
    ///
    /// Gated on the deadline and, when the registration carried a goal, on
    /// the aggregate pledged reaching it. Exactly one settlement per
    /// campaign; afterwards every call reports `WrongPhase`.
    pub fn settle(
        &mut self,
        book: &mut AccountBook,
        mint: &dyn Mint,
        now: DateTime<Utc>,
        payout: AccountId,
    ) -> Result<SettlementSummary, CrowdfundError> {
        if self.phase != Phase::Open {
            return Err(CrowdfundError::wrong_phase(Phase::Open, self.phase));
        }
        let beneficiary = self
            .beneficiary
            .as_ref()
            .ok_or(CrowdfundError::NoBeneficiary)?;
        if beneficiary.cancelled {
            return Err(CrowdfundError::NoBeneficiary);
        }

        let gate = ClaimGate::for_condition(&beneficiary.condition);
        gate.evaluate(now, &self.pledged_total())?;

        // All preconditions must hold before anything mutates, including the
        // reward mint: the payout account must exist and every pledger must
        // cover its cumulative gives.
        if !book.has_account(payout) {
            return Err(CrowdfundError::UnknownAccount(payout));
        }
        precheck_pledge_balances(book, &self.pledges)?;

        // Everything the escrow will hold once the pledges land: its prior
        // balance plus the pledged totals.
        let payout_total: Allocation = book
            .allocation(self.escrow)?
            .amounts()
            .chain(self.pledges.iter().map(|p| p.give.clone()))
            .collect();

        let units = self.reward.total_units(self.pledges.iter().map(|p| &p.give));
        let mint_source = book.open_account();
        if units > 0 {
            mint.mint_into(book, mint_source, units)?;
        }

        // One batch for the whole settlement, never per-pledge batches. The
        // in-order staging lets the pledge credits fund the escrow->payout
        // moves at the tail, so a failure anywhere voids the entire
        // settlement instead of stranding value in escrow.
        let mut batch = Vec::with_capacity(self.pledges.len() * 2 + 1);
        for pledge in &self.pledges {
            if !pledge.give.is_empty() {
                batch.push(TransferInstruction::new(
                    pledge.account,
                    self.escrow,
                    pledge.give.clone(),
                ));
            }
            if let Some(reward) = self.reward.reward_for(&pledge.give) {
                batch.push(TransferInstruction::new(mint_source, pledge.account, reward));
            }
        }
        for amount in payout_total.amounts() {
            batch.push(TransferInstruction::new(self.escrow, payout, amount));
        }
        book.transfer_batch(&batch)?;
        for pledge in &mut self.pledges {
            pledge.rewarded = !pledge.give.is_empty();
        }

        if let Some(beneficiary) = self.beneficiary.as_mut() {
            beneficiary.cancellation_revoked = true;
        }
        self.phase = Phase::Settled;
        Ok(SettlementSummary {
            count: self.pledges.len(),
        })
    }

    pub fn cancel_registration(&mut self) -> Result<(), CrowdfundError> {
        self.beneficiary
            .as_mut()
            .ok_or(CrowdfundError::NoBeneficiary)?
            .cancel()
    }
}

/// Verify every pledger can cover the sum of its pledges before settlement
/// mints or moves anything.
fn precheck_pledge_balances(
    book: &AccountBook,
    pledges: &[PledgeRecord],
) -> Result<(), CrowdfundError> {
    let mut needed: HashMap<(AccountId, Brand), u64> = HashMap::new();
    for pledge in pledges {
        if pledge.give.is_empty() {
            continue;
        }
        let slot = needed
            .entry((pledge.account, pledge.give.brand.clone()))
            .or_insert(0);
        *slot = slot.saturating_add(pledge.give.value);
    }
    for ((account, brand), total) in needed {
        let available = book.balance(account, &brand)?;
        if available < total {
            return Err(CrowdfundError::InsufficientBalance {
                account,
                brand,
                needed: total,
                available,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn money(value: u64) -> Amount {
        Amount::new(Brand::new("M"), value)
    }

    fn tokens() -> Brand {
        Brand::new("Tokens")
    }

    /// Minimal mint capability for state-machine tests.
    struct TestMint(Brand);

    impl Mint for TestMint {
        fn brand(&self) -> &Brand {
            &self.0
        }

        fn mint_into(
            &self,
            book: &mut AccountBook,
            account: AccountId,
            value: u64,
        ) -> Result<Amount, CrowdfundError> {
            let amount = Amount::new(self.0.clone(), value);
            book.deposit(account, &amount)?;
            Ok(amount)
        }
    }

    struct Fixture {
        book: AccountBook,
        campaign: ThresholdCampaign,
        mint: TestMint,
        now: DateTime<Utc>,
    }

    fn fixture() -> Fixture {
        let mut book = AccountBook::new();
        let campaign =
            ThresholdCampaign::start(&mut book, RewardCalculator::flat_unit(tokens()));
        Fixture {
            book,
            campaign,
            mint: TestMint(tokens()),
            now: Utc::now(),
        }
    }

    fn funded(book: &mut AccountBook, value: u64) -> AccountId {
        let account = book.open_account();
        book.deposit(account, &money(value)).unwrap();
        account
    }

    fn register(f: &mut Fixture, days: i64, goal: u64) -> AccountId {
        let beneficiary = f.book.open_account();
        let proposal = Proposal::default()
            .wanting(money(goal))
            .exiting_after(f.now + Duration::days(days));
        f.campaign.register_beneficiary(beneficiary, &proposal).unwrap();
        beneficiary
    }

    #[test]
    fn settlement_pays_beneficiary_and_rewards_each_pledger() {
        let mut f = fixture();
        let beneficiary = register(&mut f, 14, 100_000);
        let alice = funded(&mut f.book, 60_000);
        let bob = funded(&mut f.book, 30_000);
        let charlie = funded(&mut f.book, 50_000);

        f.campaign.pledge(&f.book, alice, money(60_000), f.now).unwrap();
        f.campaign.pledge(&f.book, bob, money(30_000), f.now).unwrap();
        f.campaign.pledge(&f.book, charlie, money(50_000), f.now).unwrap();

        // Pledged funds stay put until settlement.
        assert_eq!(f.book.balance(alice, &Brand::new("M")).unwrap(), 60_000);

        let err = f
            .campaign
            .settle(&mut f.book, &f.mint, f.now, beneficiary)
            .unwrap_err();
        assert!(matches!(err, CrowdfundError::GateNotSatisfied(_)));

        let later = f.now + Duration::days(15);
        let summary = f
            .campaign
            .settle(&mut f.book, &f.mint, later, beneficiary)
            .unwrap();
        assert_eq!(summary, SettlementSummary { count: 3 });

        assert_eq!(f.book.balance(beneficiary, &Brand::new("M")).unwrap(), 140_000);
        for account in [alice, bob, charlie] {
            assert_eq!(f.book.balance(account, &Brand::new("M")).unwrap(), 0);
            assert_eq!(f.book.balance(account, &tokens()).unwrap(), 1);
        }
        assert_eq!(f.book.balance(f.campaign.escrow(), &Brand::new("M")).unwrap(), 0);
        assert!(f.campaign.pledges().iter().all(|p| p.rewarded));

        let again = f
            .campaign
            .settle(&mut f.book, &f.mint, later, beneficiary)
            .unwrap_err();
        assert!(matches!(
            again,
            CrowdfundError::WrongPhase { expected: Phase::Open, actual: Phase::Settled }
        ));
    }

    #[test]
    fn settlement_below_goal_is_gated() {
        let mut f = fixture();
        let beneficiary = register(&mut f, 1, 100_000);
        let alice = funded(&mut f.book, 60_000);
        f.campaign.pledge(&f.book, alice, money(60_000), f.now).unwrap();

        let later = f.now + Duration::days(2);
        let err = f
            .campaign
            .settle(&mut f.book, &f.mint, later, beneficiary)
            .unwrap_err();
        assert!(matches!(err, CrowdfundError::GateNotSatisfied(_)));
        // Nothing moved, nothing minted.
        assert_eq!(f.book.balance(alice, &Brand::new("M")).unwrap(), 60_000);
        assert_eq!(f.book.total_of(&tokens()), 0);
    }

    #[test]
    fn pledge_after_settlement_fails_with_wrong_phase() {
        let mut f = fixture();
        let beneficiary = register(&mut f, 1, 10);
        let alice = funded(&mut f.book, 100);
        f.campaign.pledge(&f.book, alice, money(100), f.now).unwrap();
        f.campaign
            .settle(&mut f.book, &f.mint, f.now + Duration::days(2), beneficiary)
            .unwrap();

        assert!(matches!(
            f.campaign.pledge(&f.book, alice, money(1), f.now),
            Err(CrowdfundError::WrongPhase { .. })
        ));
    }

    #[test]
    fn overcommitted_pledger_voids_settlement_before_minting() {
        let mut f = fixture();
        let beneficiary = register(&mut f, 1, 10);
        // Alice pledges 60k twice against a 60k balance.
        let alice = funded(&mut f.book, 60_000);
        f.campaign.pledge(&f.book, alice, money(60_000), f.now).unwrap();
        f.campaign.pledge(&f.book, alice, money(60_000), f.now).unwrap();

        let err = f
            .campaign
            .settle(&mut f.book, &f.mint, f.now + Duration::days(2), beneficiary)
            .unwrap_err();
        assert!(matches!(
            err,
            CrowdfundError::InsufficientBalance { needed: 120_000, available: 60_000, .. }
        ));
        assert_eq!(f.campaign.phase(), Phase::Open);
        assert_eq!(f.book.balance(alice, &Brand::new("M")).unwrap(), 60_000);
        assert_eq!(f.book.total_of(&tokens()), 0);
        assert!(f.campaign.pledges().iter().all(|p| !p.rewarded));
    }

    #[test]
    fn unknown_payout_account_voids_the_whole_settlement() {
        let mut f = fixture();
        let beneficiary = register(&mut f, 1, 10);
        let alice = funded(&mut f.book, 100);
        f.campaign.pledge(&f.book, alice, money(100), f.now).unwrap();

        // A payout account from some other book is unknown here.
        let ghost = AccountBook::new().open_account();
        let later = f.now + Duration::days(2);
        let err = f
            .campaign
            .settle(&mut f.book, &f.mint, later, ghost)
            .unwrap_err();
        assert!(matches!(err, CrowdfundError::UnknownAccount(account) if account == ghost));

        // No partial state: the pledge stayed put, nothing was minted, and
        // the campaign is still open.
        assert_eq!(f.campaign.phase(), Phase::Open);
        assert_eq!(f.book.balance(alice, &Brand::new("M")).unwrap(), 100);
        assert_eq!(f.book.balance(f.campaign.escrow(), &Brand::new("M")).unwrap(), 0);
        assert_eq!(f.book.total_of(&tokens()), 0);
        assert!(f.campaign.pledges().iter().all(|p| !p.rewarded));

        // The same campaign still settles cleanly with a real payout account.
        let summary = f
            .campaign
            .settle(&mut f.book, &f.mint, later, beneficiary)
            .unwrap();
        assert_eq!(summary.count, 1);
        assert_eq!(f.book.balance(beneficiary, &Brand::new("M")).unwrap(), 100);
        assert_eq!(f.book.balance(alice, &tokens()).unwrap(), 1);
    }

    #[test]
    fn zero_value_pledge_settles_without_reward() {
        let mut f = fixture();
        let beneficiary = register(&mut f, 1, 100);
        let alice = funded(&mut f.book, 100);
        let freeloader = f.book.open_account();
        f.campaign.pledge(&f.book, alice, money(100), f.now).unwrap();
        f.campaign.pledge(&f.book, freeloader, money(0), f.now).unwrap();

        let summary = f
            .campaign
            .settle(&mut f.book, &f.mint, f.now + Duration::days(2), beneficiary)
            .unwrap();
        assert_eq!(summary.count, 2);
        assert_eq!(f.book.balance(freeloader, &tokens()).unwrap(), 0);
        assert_eq!(f.book.balance(alice, &tokens()).unwrap(), 1);
        let rewarded: Vec<bool> = f.campaign.pledges().iter().map(|p| p.rewarded).collect();
        assert_eq!(rewarded, vec![true, false]);
    }

    #[test]
    fn conservation_of_money_across_settlement() {
        let mut f = fixture();
        let beneficiary = register(&mut f, 1, 10);
        let alice = funded(&mut f.book, 60_000);
        let bob = funded(&mut f.book, 30_000);
        f.campaign.pledge(&f.book, alice, money(25_000), f.now).unwrap();
        f.campaign.pledge(&f.book, bob, money(30_000), f.now).unwrap();
        let total_before = f.book.total_of(&Brand::new("M"));

        f.campaign
            .settle(&mut f.book, &f.mint, f.now + Duration::days(2), beneficiary)
            .unwrap();

        // Money is conserved; only the product brand was minted.
        assert_eq!(f.book.total_of(&Brand::new("M")), total_before);
        assert_eq!(f.book.total_of(&tokens()), 2);
        assert_eq!(f.book.balance(beneficiary, &Brand::new("M")).unwrap(), 55_000);
    }
}
