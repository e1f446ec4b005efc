//! Account lifecycle: open accounts and read them back.

use tracing::{info, instrument};

use cornucopia_core::{AccountId, DomainError};
use cornucopia_ledger::Account;

use crate::error::TransferError;
use crate::store::{AccountStore, TransactionCoordinator, finish};

#[derive(Debug, Clone)]
pub struct AccountService<A, C> {
    accounts: A,
    coordinator: C,
}

impl<A, C> AccountService<A, C>
where
    C: TransactionCoordinator,
    A: AccountStore<C::Tx>,
{
    pub fn new(accounts: A, coordinator: C) -> Self {
        Self {
            accounts,
            coordinator,
        }
    }

    /// Open a new account with a zero balance and a fresh time-ordered id.
    #[instrument(skip(self), err)]
    pub async fn create_account(&self, can_overdraft: bool) -> Result<Account, TransferError> {
        let account = Account::new(AccountId::new(), can_overdraft);

        let mut tx = self.coordinator.begin().await?;
        let result = self
            .accounts
            .save(&mut tx, &account)
            .await
            .map_err(TransferError::from);
        finish(&self.coordinator, tx, result).await?;

        info!(account_id = %account.id_typed(), "account created");
        Ok(account)
    }

    #[instrument(skip(self), fields(account_id = %id), err)]
    pub async fn account(&self, id: AccountId) -> Result<Account, TransferError> {
        self.accounts
            .find_by_id(id)
            .await?
            .ok_or(TransferError::Domain(DomainError::AccountNotFound))
    }

    /// Batch read in request order; unknown ids are left out.
    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    pub async fn accounts(&self, ids: &[AccountId]) -> Result<Vec<Account>, TransferError> {
        Ok(self.accounts.find_by_ids(ids).await?)
    }
}
