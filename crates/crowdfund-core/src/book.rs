use crate::error::CrowdfundError;
use crate::types::{AccountId, Allocation, Amount, Brand};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One pairwise value move inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferInstruction {
    pub from: AccountId,
    pub to: AccountId,
    pub amount: Amount,
}

impl TransferInstruction {
    pub fn new(from: AccountId, to: AccountId, amount: Amount) -> Self {
        Self { from, to, amount }
    }
}

/// In-process realization of the host's atomic multi-party reallocation
/// primitive.
///
/// All participant and pool balances live here; the only mutation paths are
/// `deposit` (value entering the book from an issuer/mint) and
/// `transfer_batch`, which applies a whole batch of debit/credit pairs or
/// none of it. The sum of balances per brand is unchanged by any batch.
#[derive(Debug, Clone, Default)]
pub struct AccountBook {
    accounts: HashMap<AccountId, Allocation>,
}

impl AccountBook {
    pub fn new() -> Self {
        Self {
            accounts: HashMap::new(),
        }
    }

    /// Open a fresh empty account.
    pub fn open_account(&mut self) -> AccountId {
        let id = AccountId::fresh();
        self.accounts.insert(id, Allocation::new());
        id
    }

    pub fn has_account(&self, account: AccountId) -> bool {
        self.accounts.contains_key(&account)
    }

    pub fn allocation(&self, account: AccountId) -> Result<&Allocation, CrowdfundError> {
        self.accounts
            .get(&account)
            .ok_or(CrowdfundError::UnknownAccount(account))
    }

    pub fn balance(&self, account: AccountId, brand: &Brand) -> Result<u64, CrowdfundError> {
        Ok(self.allocation(account)?.of(brand))
    }

    /// Sum of one brand across every account. Transfers never change this;
    /// only `deposit` does.
    pub fn total_of(&self, brand: &Brand) -> u64 {
        self.accounts
            .values()
            .map(|allocation| allocation.of(brand))
            .sum()
    }

    /// Credit value entering the book from outside (an issuer payment or a
    /// freshly minted gain). This is the only source of new value.
    pub fn deposit(&mut self, account: AccountId, amount: &Amount) -> Result<(), CrowdfundError> {
        let allocation = self
            .accounts
            .get_mut(&account)
            .ok_or(CrowdfundError::UnknownAccount(account))?;
        allocation
            .credit(amount)
            .ok_or_else(|| CrowdfundError::Overflow {
                account,
                brand: amount.brand.clone(),
            })
    }

    /// Apply a batch of pairwise moves, all-or-nothing.
    ///
    /// The batch is staged against a scratch copy of the touched accounts in
    /// instruction order, so an earlier credit can fund a later debit within
    /// the same batch. Any shortfall or unknown account voids the whole
    /// batch and the book is left exactly as it was.
    pub fn transfer_batch(
        &mut self,
        batch: &[TransferInstruction],
    ) -> Result<(), CrowdfundError> {
        let mut staged: HashMap<AccountId, Allocation> = HashMap::new();
        for instruction in batch {
            for account in [instruction.from, instruction.to] {
                if !staged.contains_key(&account) {
                    staged.insert(account, self.allocation(account)?.clone());
                }
            }
        }

        for instruction in batch {
            let from = staged
                .get_mut(&instruction.from)
                .expect("staged above");
            from.debit(&instruction.amount).map_err(|available| {
                CrowdfundError::InsufficientBalance {
                    account: instruction.from,
                    brand: instruction.amount.brand.clone(),
                    needed: instruction.amount.value,
                    available,
                }
            })?;

            let to = staged.get_mut(&instruction.to).expect("staged above");
            to.credit(&instruction.amount)
                .ok_or_else(|| CrowdfundError::Overflow {
                    account: instruction.to,
                    brand: instruction.amount.brand.clone(),
                })?;
        }

        // Every debit and credit validated; commit the staged allocations.
        for (account, allocation) in staged {
            self.accounts.insert(account, allocation);
        }
        Ok(())
    }
}
