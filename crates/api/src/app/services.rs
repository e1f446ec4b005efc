use std::sync::Arc;

use async_trait::async_trait;

use cornucopia_core::{AccountId, JournalEntryId};
use cornucopia_infra::store::{
    AccountStore, InMemoryStore, JournalStore, PostgresStore, StoreError, TransactionCoordinator,
};
use cornucopia_infra::{AccountService, LedgerConfig, TransferCommand, TransferEngine, TransferError};
use cornucopia_ledger::{Account, JournalEntry};

/// Everything the handlers need, independent of the storage backend.
#[async_trait]
pub trait LedgerApi: Send + Sync {
    async fn create_account(&self, can_overdraft: bool) -> Result<Account, TransferError>;

    async fn account(&self, id: AccountId) -> Result<Account, TransferError>;

    async fn accounts(&self, ids: &[AccountId]) -> Result<Vec<Account>, TransferError>;

    async fn transfer(&self, command: TransferCommand) -> Result<JournalEntry, TransferError>;

    async fn journal_entries(
        &self,
        account_id: AccountId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<JournalEntry>, TransferError>;

    async fn journal_entry(&self, id: JournalEntryId) -> Result<JournalEntry, TransferError>;
}

/// Account service and transfer engine sharing one store.
pub struct LedgerServices<S: TransactionCoordinator> {
    accounts: AccountService<Arc<S>, Arc<S>>,
    transfers: TransferEngine<Arc<S>, Arc<S>, Arc<S>>,
}

impl<S> LedgerServices<S>
where
    S: TransactionCoordinator + AccountStore<S::Tx> + JournalStore<S::Tx> + 'static,
{
    pub fn new(store: Arc<S>) -> Self {
        Self {
            accounts: AccountService::new(store.clone(), store.clone()),
            transfers: TransferEngine::new(store.clone(), store.clone(), store),
        }
    }
}

#[async_trait]
impl<S> LedgerApi for LedgerServices<S>
where
    S: TransactionCoordinator + AccountStore<S::Tx> + JournalStore<S::Tx> + 'static,
{
    async fn create_account(&self, can_overdraft: bool) -> Result<Account, TransferError> {
        self.accounts.create_account(can_overdraft).await
    }

    async fn account(&self, id: AccountId) -> Result<Account, TransferError> {
        self.accounts.account(id).await
    }

    async fn accounts(&self, ids: &[AccountId]) -> Result<Vec<Account>, TransferError> {
        self.accounts.accounts(ids).await
    }

    async fn transfer(&self, command: TransferCommand) -> Result<JournalEntry, TransferError> {
        self.transfers.transfer(command).await
    }

    async fn journal_entries(
        &self,
        account_id: AccountId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<JournalEntry>, TransferError> {
        self.transfers
            .journal_entries(account_id, limit, offset)
            .await
    }

    async fn journal_entry(&self, id: JournalEntryId) -> Result<JournalEntry, TransferError> {
        self.transfers.journal_entry(id).await
    }
}

/// In-memory wiring (tests/dev).
pub fn in_memory_services(store: Arc<InMemoryStore>) -> Arc<dyn LedgerApi> {
    Arc::new(LedgerServices::new(store))
}

/// Pick the backend named by `config`; Postgres gets its schema ensured.
pub async fn build_services(config: &LedgerConfig) -> Result<Arc<dyn LedgerApi>, StoreError> {
    if config.use_in_memory {
        tracing::warn!("using in-memory store; data is lost on restart");
        return Ok(in_memory_services(Arc::new(InMemoryStore::with_lock_timeout(
            config.lock_timeout,
        ))));
    }

    let url = config
        .database_url
        .as_deref()
        .ok_or_else(|| StoreError::Database("DATABASE_URL is not set".to_string()))?;
    let store = PostgresStore::connect(url, config.max_connections)
        .await?
        .with_lock_timeout(config.lock_timeout);
    store.ensure_schema().await?;
    tracing::info!(max_connections = config.max_connections, "connected to postgres");

    Ok(Arc::new(LedgerServices::new(Arc::new(store))))
}
