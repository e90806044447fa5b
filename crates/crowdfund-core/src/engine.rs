use crate::audit::{AuditEntry, AuditKind, AuditLog};
use crate::book::AccountBook;
use crate::campaign::Campaign;
use crate::clock::TimeOracle;
use crate::error::CrowdfundError;
use crate::invitation::{
    BeneficiaryInvitation, ClaimInvitation, ContributeInvitation, InvitationBook, PledgeInvitation,
};
use crate::reward::{Mint, RewardCalculator};
use crate::threshold::ThresholdCampaign;
use crate::types::{
    AccountId, Allocation, Amount, Brand, Phase, Proposal, SettlementSummary,
};
use serde_json::json;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

/// Engine tunables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Token amount handed out by the creator's `mint_payment`.
    pub mint_payment_value: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mint_payment_value: 1000,
        }
    }
}

/// One-time capability returned to the beneficiary on successful
/// registration. Not cloneable; the holder mints claim invitations from it.
#[derive(Debug)]
pub struct ClaimRight {
    pub(crate) id: Uuid,
}

/// Shared engine internals. One mutex serializes every state-mutating
/// operation against the single campaign instance, per the host's
/// one-logical-thread contract.
struct EngineState<C> {
    book: AccountBook,
    campaign: C,
    invitations: InvitationBook,
    audit: AuditLog,
    claim_right: Option<Uuid>,
}

impl<C> EngineState<C> {
    fn grant_claim_right(&mut self) -> ClaimRight {
        let id = Uuid::new_v4();
        self.claim_right = Some(id);
        ClaimRight { id }
    }

    fn check_claim_right(&self, right: &ClaimRight) -> Result<(), CrowdfundError> {
        if self.claim_right != Some(right.id) {
            return Err(CrowdfundError::UnknownInvitation);
        }
        Ok(())
    }
}

fn lock<C>(state: &Mutex<EngineState<C>>) -> MutexGuard<'_, EngineState<C>> {
    // A poisoned lock means a panic mid-operation in this process; the
    // campaign data itself is still consistent (mutations are all-or-nothing).
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Simple-variant engine: contribute while open, beneficiary claims the
/// escrow total after the deadline.
pub struct CrowdfundEngine {
    state: Mutex<EngineState<Campaign>>,
    clock: Arc<dyn TimeOracle>,
    mint: Arc<dyn Mint>,
    config: EngineConfig,
}

impl CrowdfundEngine {
    pub fn new(config: EngineConfig, clock: Arc<dyn TimeOracle>, mint: Arc<dyn Mint>) -> Self {
        let mut book = AccountBook::new();
        let campaign = Campaign::start(&mut book);
        info!(escrow = %campaign.escrow(), "crowdfund campaign started");
        Self {
            state: Mutex::new(EngineState {
                book,
                campaign,
                invitations: InvitationBook::new(),
                audit: AuditLog::new(),
                claim_right: None,
            }),
            clock,
            mint,
            config,
        }
    }

    pub fn token_brand(&self) -> Brand {
        self.mint.brand().clone()
    }

    pub fn phase(&self) -> Phase {
        lock(&self.state).campaign.phase()
    }

    // ---- host hooks -------------------------------------------------------

    pub fn open_account(&self) -> AccountId {
        lock(&self.state).book.open_account()
    }

    /// Entry point for value escrowed by the host (a purse withdrawal or
    /// issuer payment landing in a participant account).
    pub fn deposit(&self, account: AccountId, amount: &Amount) -> Result<(), CrowdfundError> {
        lock(&self.state).book.deposit(account, amount)
    }

    pub fn balance(&self, account: AccountId, brand: &Brand) -> Result<u64, CrowdfundError> {
        lock(&self.state).book.balance(account, brand)
    }

    pub fn total_of(&self, brand: &Brand) -> u64 {
        lock(&self.state).book.total_of(brand)
    }

    // ---- public surface ---------------------------------------------------

    pub fn make_contribute_invitation(&self) -> ContributeInvitation {
        ContributeInvitation(lock(&self.state).invitations.issue())
    }

    /// Redeem a contribute invitation: move `give` from `account` into escrow.
    pub fn contribute(
        &self,
        invitation: ContributeInvitation,
        account: AccountId,
        give: Amount,
    ) -> Result<(), CrowdfundError> {
        let now = self.clock.now();
        let mut state = lock(&self.state);
        state.invitations.redeem(invitation.0)?;
        let state = &mut *state;
        state
            .campaign
            .contribute(&mut state.book, account, give.clone(), now)?;
        info!(%account, amount = %give, "contribution escrowed");
        state.audit.record(
            AuditKind::Contribution,
            Some(account),
            now,
            &json!({ "give": give }),
        )?;
        Ok(())
    }

    // ---- creator surface --------------------------------------------------

    pub fn make_beneficiary_invitation(&self) -> BeneficiaryInvitation {
        BeneficiaryInvitation(lock(&self.state).invitations.issue())
    }

    /// Redeem a beneficiary invitation. The proposal must carry an
    /// `AfterDeadline` exit; at most one registration ever succeeds.
    pub fn register_beneficiary(
        &self,
        invitation: BeneficiaryInvitation,
        account: AccountId,
        proposal: &Proposal,
    ) -> Result<ClaimRight, CrowdfundError> {
        let now = self.clock.now();
        let mut state = lock(&self.state);
        state.invitations.redeem(invitation.0)?;
        state.campaign.register_beneficiary(account, proposal)?;
        info!(%account, "beneficiary registered");
        state.audit.record(
            AuditKind::Registration,
            Some(account),
            now,
            &json!({ "proposal": proposal }),
        )?;
        Ok(state.grant_claim_right())
    }

    pub fn make_claim_invitation(
        &self,
        right: &ClaimRight,
    ) -> Result<ClaimInvitation, CrowdfundError> {
        let mut state = lock(&self.state);
        state.check_claim_right(right)?;
        Ok(ClaimInvitation(state.invitations.issue()))
    }

    /// Redeem a claim invitation. A gate failure consumes the invitation;
    /// the right holder makes a new one and retries after the deadline.
    pub fn claim(
        &self,
        invitation: ClaimInvitation,
        payout: AccountId,
    ) -> Result<Allocation, CrowdfundError> {
        let now = self.clock.now();
        let mut state = lock(&self.state);
        state.invitations.redeem(invitation.0)?;
        let state = &mut *state;
        let paid = state.campaign.claim(&mut state.book, now, payout)?;
        info!(%payout, "escrow claimed");
        state
            .audit
            .record(AuditKind::Claim, Some(payout), now, &json!({ "paid": &paid }))?;
        Ok(paid)
    }

    pub fn cancel_registration(&self, right: &ClaimRight) -> Result<(), CrowdfundError> {
        let mut state = lock(&self.state);
        state.check_claim_right(right)?;
        state.campaign.cancel_registration()
    }

    /// Creator-only token faucet carried over from the original contract:
    /// mints a fixed token payment into `account`.
    pub fn mint_payment(&self, account: AccountId) -> Result<Amount, CrowdfundError> {
        let now = self.clock.now();
        let mut state = lock(&self.state);
        let minted =
            self.mint
                .mint_into(&mut state.book, account, self.config.mint_payment_value)?;
        debug!(%account, amount = %minted, "token payment minted");
        state.audit.record(
            AuditKind::MintPayment,
            Some(account),
            now,
            &json!({ "minted": &minted }),
        )?;
        Ok(minted)
    }

    // ---- audit ------------------------------------------------------------

    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        lock(&self.state).audit.entries().to_vec()
    }

    pub fn verify_audit_chain(&self) -> bool {
        lock(&self.state).audit.verify_chain()
    }
}

/// Threshold-pledge engine: pledges are recorded while open and settle in
/// one batch after the deadline (and goal, when the registration named one).
pub struct ThresholdEngine {
    state: Mutex<EngineState<ThresholdCampaign>>,
    clock: Arc<dyn TimeOracle>,
    mint: Arc<dyn Mint>,
    config: EngineConfig,
}

impl ThresholdEngine {
    pub fn new(config: EngineConfig, clock: Arc<dyn TimeOracle>, mint: Arc<dyn Mint>) -> Self {
        let mut book = AccountBook::new();
        let reward = RewardCalculator::flat_unit(mint.brand().clone());
        let campaign = ThresholdCampaign::start(&mut book, reward);
        info!(escrow = %campaign.escrow(), "threshold campaign started");
        Self {
            state: Mutex::new(EngineState {
                book,
                campaign,
                invitations: InvitationBook::new(),
                audit: AuditLog::new(),
                claim_right: None,
            }),
            clock,
            mint,
            config,
        }
    }

    pub fn token_brand(&self) -> Brand {
        self.mint.brand().clone()
    }

    pub fn phase(&self) -> Phase {
        lock(&self.state).campaign.phase()
    }

    pub fn pledged_total(&self) -> Allocation {
        lock(&self.state).campaign.pledged_total()
    }

    // ---- host hooks -------------------------------------------------------

    pub fn open_account(&self) -> AccountId {
        lock(&self.state).book.open_account()
    }

    pub fn deposit(&self, account: AccountId, amount: &Amount) -> Result<(), CrowdfundError> {
        lock(&self.state).book.deposit(account, amount)
    }

    pub fn balance(&self, account: AccountId, brand: &Brand) -> Result<u64, CrowdfundError> {
        lock(&self.state).book.balance(account, brand)
    }

    pub fn total_of(&self, brand: &Brand) -> u64 {
        lock(&self.state).book.total_of(brand)
    }

    // ---- public surface ---------------------------------------------------

    pub fn make_pledge_invitation(&self) -> PledgeInvitation {
        PledgeInvitation(lock(&self.state).invitations.issue())
    }

    /// Redeem a pledge invitation. The pledged amount stays in the pledger's
    /// account until settlement; there is no withdrawal right afterwards.
    pub fn pledge(
        &self,
        invitation: PledgeInvitation,
        account: AccountId,
        give: Amount,
    ) -> Result<(), CrowdfundError> {
        let now = self.clock.now();
        let mut state = lock(&self.state);
        state.invitations.redeem(invitation.0)?;
        let state = &mut *state;
        state.campaign.pledge(&state.book, account, give.clone(), now)?;
        info!(%account, amount = %give, "pledge recorded");
        state
            .audit
            .record(AuditKind::Pledge, Some(account), now, &json!({ "give": give }))?;
        Ok(())
    }

    // ---- creator surface --------------------------------------------------

    pub fn make_beneficiary_invitation(&self) -> BeneficiaryInvitation {
        BeneficiaryInvitation(lock(&self.state).invitations.issue())
    }

    pub fn register_beneficiary(
        &self,
        invitation: BeneficiaryInvitation,
        account: AccountId,
        proposal: &Proposal,
    ) -> Result<ClaimRight, CrowdfundError> {
        let now = self.clock.now();
        let mut state = lock(&self.state);
        state.invitations.redeem(invitation.0)?;
        state.campaign.register_beneficiary(account, proposal)?;
        info!(%account, "beneficiary registered");
        state.audit.record(
            AuditKind::Registration,
            Some(account),
            now,
            &json!({ "proposal": proposal }),
        )?;
        Ok(state.grant_claim_right())
    }

    pub fn make_claim_invitation(
        &self,
        right: &ClaimRight,
    ) -> Result<ClaimInvitation, CrowdfundError> {
        let mut state = lock(&self.state);
        state.check_claim_right(right)?;
        Ok(ClaimInvitation(state.invitations.issue()))
    }

    /// Redeem a claim invitation for settlement: one atomic batch collects
    /// every pledge, distributes rewards, and pays the escrow out.
    pub fn settle(
        &self,
        invitation: ClaimInvitation,
        payout: AccountId,
    ) -> Result<SettlementSummary, CrowdfundError> {
        let now = self.clock.now();
        let mut state = lock(&self.state);
        state.invitations.redeem(invitation.0)?;
        let state = &mut *state;
        let summary = state
            .campaign
            .settle(&mut state.book, self.mint.as_ref(), now, payout)?;
        info!(%payout, count = summary.count, "campaign settled");
        state.audit.record(
            AuditKind::Settlement,
            Some(payout),
            now,
            &json!({ "count": summary.count }),
        )?;
        Ok(summary)
    }

    pub fn cancel_registration(&self, right: &ClaimRight) -> Result<(), CrowdfundError> {
        let mut state = lock(&self.state);
        state.check_claim_right(right)?;
        state.campaign.cancel_registration()
    }

    pub fn mint_payment(&self, account: AccountId) -> Result<Amount, CrowdfundError> {
        let now = self.clock.now();
        let mut state = lock(&self.state);
        let minted =
            self.mint
                .mint_into(&mut state.book, account, self.config.mint_payment_value)?;
        debug!(%account, amount = %minted, "token payment minted");
        state.audit.record(
            AuditKind::MintPayment,
            Some(account),
            now,
            &json!({ "minted": &minted }),
        )?;
        Ok(minted)
    }

    // ---- audit ------------------------------------------------------------

    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        lock(&self.state).audit.entries().to_vec()
    }

    pub fn verify_audit_chain(&self) -> bool {
        lock(&self.state).audit.verify_chain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{Duration, Utc};

    fn money(value: u64) -> Amount {
        Amount::new(Brand::new("M"), value)
    }

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

    fn engine_with_clock() -> (CrowdfundEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_at(Utc::now()));
        let mint = Arc::new(TestMint(Brand::new("Tokens")));
        let engine = CrowdfundEngine::new(EngineConfig::default(), clock.clone(), mint);
        (engine, clock)
    }

    #[test]
    fn simple_campaign_end_to_end() {
        let (engine, clock) = engine_with_clock();
        let deadline = clock.now() + Duration::days(14);

        let beneficiary = engine.open_account();
        let right = engine
            .register_beneficiary(
                engine.make_beneficiary_invitation(),
                beneficiary,
                &Proposal::default().exiting_after(deadline),
            )
            .unwrap();

        let alice = engine.open_account();
        engine.deposit(alice, &money(60_000)).unwrap();
        let bob = engine.open_account();
        engine.deposit(bob, &money(30_000)).unwrap();

        engine
            .contribute(engine.make_contribute_invitation(), alice, money(60_000))
            .unwrap();
        engine
            .contribute(engine.make_contribute_invitation(), bob, money(30_000))
            .unwrap();

        // Early claim: gate holds, invitation is spent, right still works.
        let early = engine.make_claim_invitation(&right).unwrap();
        assert!(matches!(
            engine.claim(early, beneficiary),
            Err(CrowdfundError::GateNotSatisfied(_))
        ));

        clock.advance(Duration::days(15));
        let paid = engine
            .claim(engine.make_claim_invitation(&right).unwrap(), beneficiary)
            .unwrap();
        assert_eq!(paid.of(&Brand::new("M")), 90_000);
        assert_eq!(engine.balance(beneficiary, &Brand::new("M")).unwrap(), 90_000);
        assert_eq!(engine.phase(), Phase::Claimed);

        let again = engine.make_claim_invitation(&right).unwrap();
        assert!(matches!(
            engine.claim(again, beneficiary),
            Err(CrowdfundError::AlreadyClaimed)
        ));
        assert!(matches!(
            engine.cancel_registration(&right),
            Err(CrowdfundError::AlreadyClaimed)
        ));

        assert!(engine.verify_audit_chain());
        assert_eq!(engine.audit_entries().len(), 4); // registration, 2 contributions, claim
    }

    #[test]
    fn invitations_are_single_use_and_engine_issued() {
        let (engine, _clock) = engine_with_clock();
        let alice = engine.open_account();
        engine.deposit(alice, &money(100)).unwrap();

        let invitation = engine.make_contribute_invitation();
        engine.contribute(invitation, alice, money(40)).unwrap();

        // A fabricated handle is rejected; so is a foreign claim right.
        let forged = ContributeInvitation(Uuid::new_v4());
        assert!(matches!(
            engine.contribute(forged, alice, money(1)),
            Err(CrowdfundError::UnknownInvitation)
        ));
        let foreign_right = ClaimRight { id: Uuid::new_v4() };
        assert!(matches!(
            engine.make_claim_invitation(&foreign_right),
            Err(CrowdfundError::UnknownInvitation)
        ));
    }

    #[test]
    fn failed_contribution_consumes_invitation_but_moves_nothing() {
        let (engine, _clock) = engine_with_clock();
        let alice = engine.open_account();
        engine.deposit(alice, &money(10)).unwrap();

        let invitation = engine.make_contribute_invitation();
        assert!(matches!(
            engine.contribute(invitation, alice, money(11)),
            Err(CrowdfundError::InsufficientBalance { .. })
        ));
        assert_eq!(engine.balance(alice, &Brand::new("M")).unwrap(), 10);
        // No audit entry for the rejected contribution.
        assert!(engine.audit_entries().is_empty());
    }

    #[test]
    fn audit_timestamps_follow_the_engine_clock() {
        let (engine, clock) = engine_with_clock();
        let registered_at = clock.now();
        engine
            .register_beneficiary(
                engine.make_beneficiary_invitation(),
                engine.open_account(),
                &Proposal::default().exiting_after(registered_at + Duration::days(7)),
            )
            .unwrap();

        clock.advance(Duration::days(3));
        let contributed_at = clock.now();
        let alice = engine.open_account();
        engine.deposit(alice, &money(100)).unwrap();
        engine
            .contribute(engine.make_contribute_invitation(), alice, money(100))
            .unwrap();

        let entries = engine.audit_entries();
        assert_eq!(entries[0].timestamp, registered_at);
        assert_eq!(entries[1].timestamp, contributed_at);
    }

    #[test]
    fn mint_payment_issues_configured_amount() {
        let (engine, _clock) = engine_with_clock();
        let bob = engine.open_account();
        let minted = engine.mint_payment(bob).unwrap();
        assert_eq!(minted, Amount::new(Brand::new("Tokens"), 1000));
        assert_eq!(engine.balance(bob, &Brand::new("Tokens")).unwrap(), 1000);
    }

    #[test]
    fn threshold_engine_settles_once() {
        let clock = Arc::new(ManualClock::starting_at(Utc::now()));
        let mint = Arc::new(TestMint(Brand::new("Tokens")));
        let engine = ThresholdEngine::new(EngineConfig::default(), clock.clone(), mint);

        let deadline = clock.now() + Duration::days(14);
        let beneficiary = engine.open_account();
        let right = engine
            .register_beneficiary(
                engine.make_beneficiary_invitation(),
                beneficiary,
                &Proposal::default()
                    .wanting(money(100_000))
                    .exiting_after(deadline),
            )
            .unwrap();

        let pledgers: Vec<AccountId> = [60_000u64, 30_000, 50_000]
            .iter()
            .map(|value| {
                let account = engine.open_account();
                engine.deposit(account, &money(*value)).unwrap();
                engine
                    .pledge(engine.make_pledge_invitation(), account, money(*value))
                    .unwrap();
                account
            })
            .collect();
        assert_eq!(engine.pledged_total().of(&Brand::new("M")), 140_000);

        clock.advance(Duration::days(15));
        let summary = engine
            .settle(engine.make_claim_invitation(&right).unwrap(), beneficiary)
            .unwrap();
        assert_eq!(summary, SettlementSummary { count: 3 });
        assert_eq!(engine.balance(beneficiary, &Brand::new("M")).unwrap(), 140_000);
        for account in pledgers {
            assert_eq!(engine.balance(account, &Brand::new("Tokens")).unwrap(), 1);
        }

        let again = engine.make_claim_invitation(&right).unwrap();
        assert!(matches!(
            engine.settle(again, beneficiary),
            Err(CrowdfundError::WrongPhase { .. })
        ));
        assert!(engine.verify_audit_chain());
    }
}
