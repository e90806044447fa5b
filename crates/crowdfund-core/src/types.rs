use crate::error::CrowdfundError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Verified asset-kind tag distinguishing one fungible value series from
/// another. Two amounts interact only when their brands match.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Brand(String);

impl Brand {
    pub fn new(alleged_name: impl Into<String>) -> Self {
        Self(alleged_name.into())
    }

    pub fn alleged_name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Brand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A non-negative quantity of a single brand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amount {
    pub brand: Brand,
    pub value: u64,
}

impl Amount {
    pub fn new(brand: Brand, value: u64) -> Self {
        Self { brand, value }
    }

    pub fn is_empty(&self) -> bool {
        self.value == 0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.brand)
    }
}

/// Per-account holdings, keyed by brand. Values are always non-negative and
/// every mutation goes through the account book so totals stay conserved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation(BTreeMap<Brand, u64>);

impl Allocation {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn of(&self, brand: &Brand) -> u64 {
        self.0.get(brand).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|v| *v == 0)
    }

    pub fn amounts(&self) -> impl Iterator<Item = Amount> + '_ {
        self.0
            .iter()
            .filter(|(_, v)| **v > 0)
            .map(|(brand, v)| Amount::new(brand.clone(), *v))
    }

    pub(crate) fn credit(&mut self, amount: &Amount) -> Option<()> {
        let slot = self.0.entry(amount.brand.clone()).or_insert(0);
        *slot = slot.checked_add(amount.value)?;
        Some(())
    }

    /// Returns the available balance on shortfall instead of mutating.
    pub(crate) fn debit(&mut self, amount: &Amount) -> Result<(), u64> {
        let available = self.of(&amount.brand);
        if available < amount.value {
            return Err(available);
        }
        self.0.insert(amount.brand.clone(), available - amount.value);
        Ok(())
    }
}

impl FromIterator<Amount> for Allocation {
    fn from_iter<I: IntoIterator<Item = Amount>>(iter: I) -> Self {
        let mut allocation = Allocation::new();
        for amount in iter {
            // Building an allocation from literals; saturate rather than panic.
            let slot = allocation.0.entry(amount.brand).or_insert(0);
            *slot = slot.saturating_add(amount.value);
        }
        allocation
    }
}

/// Participant or pool account handle within the account book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(Uuid);

impl AccountId {
    pub(crate) fn fresh() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Exit rule carried by a beneficiary registration offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitRule {
    OnDemand,
    AfterDeadline { deadline: DateTime<Utc> },
}

/// Offer shape carried by an invitation redemption: what the party escrows,
/// what it wants back, and (for the beneficiary) when it may exit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub give: Allocation,
    pub want: Allocation,
    pub exit: Option<ExitRule>,
}

impl Proposal {
    pub fn give(amount: Amount) -> Self {
        Self {
            give: [amount].into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn wanting(mut self, amount: Amount) -> Self {
        self.want = [amount].into_iter().collect();
        self
    }

    pub fn exiting_after(mut self, deadline: DateTime<Utc>) -> Self {
        self.exit = Some(ExitRule::AfterDeadline { deadline });
        self
    }
}

/// Claim condition captured at beneficiary registration, immutable once set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimCondition {
    pub deadline: DateTime<Utc>,
    pub goal: Option<Amount>,
}

impl ClaimCondition {
    /// Extract the condition from a registration proposal.
    ///
    /// The exit rule must be `AfterDeadline`; the optional goal is the single
    /// wanted amount, when one is present.
    pub fn from_proposal(proposal: &Proposal) -> Result<Self, CrowdfundError> {
        let deadline = match proposal.exit {
            Some(ExitRule::AfterDeadline { deadline }) => deadline,
            Some(ExitRule::OnDemand) => {
                return Err(CrowdfundError::InvalidCondition(
                    "onDemand exit carries no deadline".to_string(),
                ))
            }
            None => {
                return Err(CrowdfundError::InvalidCondition(
                    "registration proposal has no exit deadline".to_string(),
                ))
            }
        };
        Ok(Self {
            deadline,
            goal: proposal.want.amounts().next(),
        })
    }
}

/// Campaign phase. A campaign starts Open and ends in exactly one terminal
/// phase: Claimed for the simple variant, Settled for the threshold variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Open,
    Claimed,
    Settled,
}

impl Phase {
    pub fn name(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Claimed => "claimed",
            Self::Settled => "settled",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A recorded contribution (simple variant). Order of records reflects call
/// arrival order and carries no priority semantics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContributionRecord {
    pub account: AccountId,
    pub amount: Amount,
    pub recorded_at: DateTime<Utc>,
}

/// A recorded pledge (threshold variant). `rewarded` flips false -> true
/// exactly once, when settlement distributes the product reward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PledgeRecord {
    pub account: AccountId,
    pub give: Amount,
    pub rewarded: bool,
    pub recorded_at: DateTime<Utc>,
}

/// Settlement summary returned by the threshold variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementSummary {
    pub count: usize,
}
