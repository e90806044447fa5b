use crate::book::AccountBook;
use crate::error::CrowdfundError;
use crate::types::{AccountId, Amount, Brand};

/// Mint capability for a fungible value series (the external `ValueLedger`
/// collaborator). Implementations issue brand-new value into an account;
/// the engine uses it for product rewards and creator token payments.
pub trait Mint: Send + Sync {
    fn brand(&self) -> &Brand;

    /// Mint `value` units of this mint's brand into `account`.
    fn mint_into(
        &self,
        book: &mut AccountBook,
        account: AccountId,
        value: u64,
    ) -> Result<Amount, CrowdfundError>;
}

/// Computes the product reward owed per pledge.
///
/// One flat unit per positive pledge, regardless of size. Deliberately not a
/// proportional rebate.
#[derive(Debug, Clone)]
pub struct RewardCalculator {
    product_brand: Brand,
    unit: u64,
}

impl RewardCalculator {
    pub fn flat_unit(product_brand: Brand) -> Self {
        Self {
            product_brand,
            unit: 1,
        }
    }

    pub fn product_brand(&self) -> &Brand {
        &self.product_brand
    }

    /// Reward for a single pledge; `None` when the pledge gave nothing.
    pub fn reward_for(&self, pledged: &Amount) -> Option<Amount> {
        if pledged.is_empty() {
            return None;
        }
        Some(Amount::new(self.product_brand.clone(), self.unit))
    }

    /// Total units to mint for a settlement over the given pledge amounts.
    pub fn total_units<'a>(&self, pledged: impl Iterator<Item = &'a Amount>) -> u64 {
        pledged.filter(|amount| !amount.is_empty()).count() as u64 * self.unit
    }
}
