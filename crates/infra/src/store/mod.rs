//! Persistence boundary for accounts and the journal.
//!
//! Stores never open transactions on their own. Every write (and every read
//! that must observe uncommitted writes or take a row lock) receives the
//! coordinator's transaction handle explicitly, so one `Tx` value is the
//! whole unit of atomicity:
//!
//! ```text
//! begin() -> Tx
//!   TransactionCoordinator::lock_named(&mut Tx, ..)     named lock
//!   AccountStore::find_by_id_for_update(&mut Tx, ..)   row lock
//!   JournalStore::latest_entry(&mut Tx)                 chain head lock
//!   AccountStore::save / JournalStore::save(&mut Tx, ..)
//! commit(Tx) | rollback(Tx)
//! ```
//!
//! Locks taken through a `Tx` are held until it commits or rolls back.
//! Dropping a `Tx` without either rolls it back.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use cornucopia_core::{AccountId, JournalEntryId};
use cornucopia_ledger::{Account, JournalEntry};

pub use in_memory::{InMemoryStore, InMemoryTx};
pub use postgres::PostgresStore;

/// Default wait for a named lock or row lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Infrastructure failure raised by a store or coordinator.
///
/// Business failures (missing account, insufficient balance) are not
/// represented here; they live in `DomainError`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A journal entry with the same idempotency key is already persisted.
    #[error("duplicate idempotency key: {0}")]
    DuplicateIdempotencyKey(String),

    /// A named lock or row lock could not be taken within the lock timeout.
    #[error("timed out waiting for lock '{0}'")]
    LockTimeout(String),

    /// Persisted data could not be turned back into domain values.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// Connection, pool or query failure.
    #[error("database error: {0}")]
    Database(String),
}

/// Transaction boundaries plus named locks shared across processes.
#[async_trait]
pub trait TransactionCoordinator: Send + Sync {
    /// Handle of one open transaction.
    type Tx: Send + 'static;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    async fn commit(&self, tx: Self::Tx) -> Result<(), StoreError>;

    async fn rollback(&self, tx: Self::Tx) -> Result<(), StoreError>;

    /// Wait for exclusive ownership of `name`, up to the lock timeout, and
    /// keep it until `tx` commits, rolls back or is dropped.
    ///
    /// Dropping the returned future while it waits abandons the attempt.
    async fn lock_named(&self, tx: &mut Self::Tx, name: &str) -> Result<(), StoreError>;
}

/// Account persistence.
#[async_trait]
pub trait AccountStore<Tx: Send + 'static>: Send + Sync {
    /// Insert or overwrite the account.
    async fn save(&self, tx: &mut Tx, account: &Account) -> Result<(), StoreError>;

    async fn find_by_id(&self, id: AccountId) -> Result<Option<Account>, StoreError>;

    /// Batch read in the order of `ids`. Unknown ids are omitted and a
    /// repeated id is returned once, at its first position.
    async fn find_by_ids(&self, ids: &[AccountId]) -> Result<Vec<Account>, StoreError>;

    /// Read the account and hold an exclusive lock on it until `tx` ends.
    async fn find_by_id_for_update(
        &self,
        tx: &mut Tx,
        id: AccountId,
    ) -> Result<Option<Account>, StoreError>;
}

/// Journal persistence (append-only, hash chained).
#[async_trait]
pub trait JournalStore<Tx: Send + 'static>: Send + Sync {
    /// Append an entry and advance the chain head to it.
    ///
    /// Fails with [`StoreError::DuplicateIdempotencyKey`] if the key exists.
    async fn save(&self, tx: &mut Tx, entry: &JournalEntry) -> Result<(), StoreError>;

    async fn find_by_id(&self, id: JournalEntryId) -> Result<Option<JournalEntry>, StoreError>;

    /// Committed lookup, outside any transaction.
    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<JournalEntry>, StoreError>;

    /// Lookup that also sees writes staged in `tx`.
    async fn find_by_idempotency_key_in(
        &self,
        tx: &mut Tx,
        key: &str,
    ) -> Result<Option<JournalEntry>, StoreError>;

    /// Tail of the chain, or `None` for an empty journal.
    ///
    /// Locks the chain head until `tx` ends, including when the journal is
    /// empty.
    async fn latest_entry(&self, tx: &mut Tx) -> Result<Option<JournalEntry>, StoreError>;

    /// Entries where the account is source or destination, newest first.
    async fn find_by_account_id(
        &self,
        account_id: AccountId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<JournalEntry>, StoreError>;
}

#[async_trait]
impl<C> TransactionCoordinator for Arc<C>
where
    C: TransactionCoordinator + ?Sized,
{
    type Tx = C::Tx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        (**self).begin().await
    }

    async fn commit(&self, tx: Self::Tx) -> Result<(), StoreError> {
        (**self).commit(tx).await
    }

    async fn rollback(&self, tx: Self::Tx) -> Result<(), StoreError> {
        (**self).rollback(tx).await
    }

    async fn lock_named(&self, tx: &mut Self::Tx, name: &str) -> Result<(), StoreError> {
        (**self).lock_named(tx, name).await
    }
}

#[async_trait]
impl<Tx, S> AccountStore<Tx> for Arc<S>
where
    Tx: Send + 'static,
    S: AccountStore<Tx> + ?Sized,
{
    async fn save(&self, tx: &mut Tx, account: &Account) -> Result<(), StoreError> {
        (**self).save(tx, account).await
    }

    async fn find_by_id(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        (**self).find_by_id(id).await
    }

    async fn find_by_ids(&self, ids: &[AccountId]) -> Result<Vec<Account>, StoreError> {
        (**self).find_by_ids(ids).await
    }

    async fn find_by_id_for_update(
        &self,
        tx: &mut Tx,
        id: AccountId,
    ) -> Result<Option<Account>, StoreError> {
        (**self).find_by_id_for_update(tx, id).await
    }
}

#[async_trait]
impl<Tx, S> JournalStore<Tx> for Arc<S>
where
    Tx: Send + 'static,
    S: JournalStore<Tx> + ?Sized,
{
    async fn save(&self, tx: &mut Tx, entry: &JournalEntry) -> Result<(), StoreError> {
        (**self).save(tx, entry).await
    }

    async fn find_by_id(&self, id: JournalEntryId) -> Result<Option<JournalEntry>, StoreError> {
        (**self).find_by_id(id).await
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<JournalEntry>, StoreError> {
        (**self).find_by_idempotency_key(key).await
    }

    async fn find_by_idempotency_key_in(
        &self,
        tx: &mut Tx,
        key: &str,
    ) -> Result<Option<JournalEntry>, StoreError> {
        (**self).find_by_idempotency_key_in(tx, key).await
    }

    async fn latest_entry(&self, tx: &mut Tx) -> Result<Option<JournalEntry>, StoreError> {
        (**self).latest_entry(tx).await
    }

    async fn find_by_account_id(
        &self,
        account_id: AccountId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<JournalEntry>, StoreError> {
        (**self).find_by_account_id(account_id, limit, offset).await
    }
}

/// Close `tx` according to `result`: commit on `Ok`, roll back on `Err`.
///
/// The original error is returned even if the rollback itself fails; the
/// rollback failure is only logged.
pub async fn finish<C, T, E>(coordinator: &C, tx: C::Tx, result: Result<T, E>) -> Result<T, E>
where
    C: TransactionCoordinator + ?Sized,
    E: From<StoreError>,
{
    match result {
        Ok(value) => {
            coordinator.commit(tx).await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = coordinator.rollback(tx).await {
                warn!(error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}

/// Open a transaction that holds the named lock `name` until it ends.
///
/// The lock goes away with the transaction on every path (commit, rollback,
/// drop), so nothing has to release it. If the lock cannot be taken the
/// transaction is rolled back and the lock error returned.
pub async fn begin_serialized<C>(coordinator: &C, name: &str) -> Result<C::Tx, StoreError>
where
    C: TransactionCoordinator + ?Sized,
{
    let mut tx = coordinator.begin().await?;
    match coordinator.lock_named(&mut tx, name).await {
        Ok(()) => Ok(tx),
        Err(err) => {
            if let Err(rollback_err) = coordinator.rollback(tx).await {
                warn!(lock = name, error = %rollback_err, "rollback after failed lock failed");
            }
            Err(err)
        }
    }
}
