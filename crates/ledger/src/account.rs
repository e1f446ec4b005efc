use serde::{Deserialize, Serialize};

use cornucopia_core::{AccountId, DomainError, DomainResult, Entity};

/// Points account: balance + overdraft policy.
///
/// Balances are in the smallest indivisible point unit. The non-negative
/// invariant is only enforced on withdrawal; deposits never violate it.
/// Mutations are in-memory only, persisting them is the caller's job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    id: AccountId,
    balance: i64,
    can_overdraft: bool,
}

impl Account {
    /// New account with a zero balance.
    pub fn new(id: AccountId, can_overdraft: bool) -> Self {
        Self {
            id,
            balance: 0,
            can_overdraft,
        }
    }

    /// Rebuild an account from persisted state.
    pub fn restore(id: AccountId, balance: i64, can_overdraft: bool) -> Self {
        Self {
            id,
            balance,
            can_overdraft,
        }
    }

    pub fn id_typed(&self) -> AccountId {
        self.id
    }

    pub fn balance(&self) -> i64 {
        self.balance
    }

    pub fn can_overdraft(&self) -> bool {
        self.can_overdraft
    }

    /// Add `amount` to the balance.
    pub fn deposit(&mut self, amount: i64) -> DomainResult<()> {
        if amount <= 0 {
            return Err(DomainError::InvalidAmount);
        }
        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or(DomainError::BalanceOverflow)?;
        Ok(())
    }

    /// Subtract `amount` from the balance.
    ///
    /// Without overdraft the balance must cover the full amount. With
    /// overdraft the balance may go negative, down to `i64::MIN`.
    pub fn withdraw(&mut self, amount: i64) -> DomainResult<()> {
        if amount <= 0 {
            return Err(DomainError::InvalidAmount);
        }
        if !self.can_overdraft && self.balance < amount {
            return Err(DomainError::InsufficientBalance);
        }
        self.balance = self
            .balance
            .checked_sub(amount)
            .ok_or(DomainError::BalanceOverflow)?;
        Ok(())
    }
}

impl Entity for Account {
    type Id = AccountId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
