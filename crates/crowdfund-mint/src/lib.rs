//! Mint and issuer implementations for the crowdfund engine.
//!
//! `TokenMint` is the in-memory realization of the engine's `Mint`
//! collaborator: it issues fresh value of one brand and keeps a running
//! total of everything it has ever issued. `IssuerKit` covers the test/host
//! side of the money supply, handing out payments a host deposits into
//! participant accounts.

#![deny(unsafe_code)]

use crowdfund_core::{AccountBook, AccountId, Amount, Brand, CrowdfundError, Mint};
use std::sync::Mutex;

/// In-memory mint for a single fungible token series.
#[derive(Debug)]
pub struct TokenMint {
    brand: Brand,
    issued: Mutex<u64>,
}

impl TokenMint {
    pub fn new(alleged_name: impl Into<String>) -> Self {
        Self {
            brand: Brand::new(alleged_name),
            issued: Mutex::new(0),
        }
    }

    /// Total value this mint has ever issued. Together with the book's
    /// per-brand totals this pins down conservation for the minted brand.
    pub fn total_issued(&self) -> u64 {
        *self.issued.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Mint for TokenMint {
    fn brand(&self) -> &Brand {
        &self.brand
    }

    fn mint_into(
        &self,
        book: &mut AccountBook,
        account: AccountId,
        value: u64,
    ) -> Result<Amount, CrowdfundError> {
        let amount = Amount::new(self.brand.clone(), value);
        book.deposit(account, &amount)?;
        let mut issued = self.issued.lock().unwrap_or_else(|e| e.into_inner());
        *issued = issued.saturating_add(value);
        Ok(amount)
    }
}

/// Issuer kit for externally supplied money: makes brand-tagged payments a
/// host then deposits into engine accounts (the faucet/purse path in tests).
#[derive(Debug)]
pub struct IssuerKit {
    brand: Brand,
    issued: Mutex<u64>,
}

impl IssuerKit {
    pub fn new(alleged_name: impl Into<String>) -> Self {
        Self {
            brand: Brand::new(alleged_name),
            issued: Mutex::new(0),
        }
    }

    pub fn brand(&self) -> &Brand {
        &self.brand
    }

    /// A brand-tagged amount without any supply effect (for wants/goals).
    pub fn units(&self, value: u64) -> Amount {
        Amount::new(self.brand.clone(), value)
    }

    /// Issue a payment, counting it against this issuer's supply.
    pub fn payment(&self, value: u64) -> Amount {
        let mut issued = self.issued.lock().unwrap_or_else(|e| e.into_inner());
        *issued = issued.saturating_add(value);
        self.units(value)
    }

    pub fn total_issued(&self) -> u64 {
        *self.issued.lock().unwrap_or_else(|e| e.into_inner())
    }
}
