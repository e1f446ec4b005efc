//! Postgres-backed accounts, journal and coordinator.
//!
//! ## Locking
//!
//! - Account rows: `SELECT ... FOR UPDATE` inside the caller's transaction.
//! - Chain head: the singleton `journal_chain_head` row (`id = 1`) is locked
//!   with `FOR UPDATE`. The row always exists, so writers serialize on it
//!   even while the journal is still empty.
//! - Named locks: transaction-level advisory locks
//!   (`pg_try_advisory_xact_lock(hashtextextended(name, 0))`) taken on the
//!   transaction's own connection and polled until the lock timeout. The
//!   server drops them when the transaction ends, and a waiter holds no
//!   connection beyond the one its transaction already uses.
//! - Every transaction runs with `SET LOCAL lock_timeout`, so row-lock waits
//!   are bounded by the same timeout.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation on the idempotency key) | `23505` | `DuplicateIdempotencyKey` |
//! | Database (lock not available) | `55P03` | `LockTimeout` |
//! | Database (other) | Any other | `Database` |
//! | PoolTimedOut / PoolClosed / Io / other | N/A | `Database` |
//! | Row decode failure | N/A | `Corrupt` |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::{debug, instrument};
use uuid::Uuid;

use cornucopia_core::{AccountId, JournalEntryId};
use cornucopia_ledger::{Account, JournalEntry};

use super::{AccountStore, DEFAULT_LOCK_TIMEOUT, JournalStore, StoreError, TransactionCoordinator};

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);
const LOCK_NOT_AVAILABLE: &str = "55P03";
const IDEMPOTENCY_KEY_CONSTRAINT: &str = "journal_entries_idempotency_key_uq";

const JOURNAL_COLUMNS: &str = "id, from_account_id, to_account_id, amount, description, \
     idempotency_key, previous_hash, hash, created_at";

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS accounts (
        id UUID PRIMARY KEY,
        balance BIGINT NOT NULL DEFAULT 0,
        can_overdraft BOOLEAN NOT NULL DEFAULT FALSE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS journal_entries (
        id UUID PRIMARY KEY,
        from_account_id UUID NOT NULL,
        to_account_id UUID NOT NULL,
        amount BIGINT NOT NULL CHECK (amount > 0),
        description TEXT NOT NULL DEFAULT '',
        idempotency_key TEXT NOT NULL,
        previous_hash TEXT NOT NULL DEFAULT '',
        hash CHAR(64) NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        CONSTRAINT journal_entries_idempotency_key_uq UNIQUE (idempotency_key)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS journal_entries_from_account_idx ON journal_entries (from_account_id)",
    "CREATE INDEX IF NOT EXISTS journal_entries_to_account_idx ON journal_entries (to_account_id)",
    r#"
    CREATE TABLE IF NOT EXISTS journal_chain_head (
        id SMALLINT PRIMARY KEY CHECK (id = 1),
        last_entry_id UUID NULL
    )
    "#,
    "INSERT INTO journal_chain_head (id, last_entry_id) VALUES (1, NULL) ON CONFLICT (id) DO NOTHING",
];

/// Postgres implementation of every store trait plus the coordinator.
///
/// Transactions run at READ COMMITTED (the server default); correctness
/// comes from the row locks and the chain-head lock, not from isolation.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
    lock_timeout: Duration,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Open a pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// `lock_timeout` setting for new transactions; never `0`, which would
    /// mean "wait forever" to the server.
    fn lock_timeout_setting(&self) -> String {
        format!("{}ms", self.lock_timeout.as_millis().max(1))
    }

    /// Create tables, indexes and the chain-head row if missing.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl TransactionCoordinator for PostgresStore {
    type Tx = Transaction<'static, Postgres>;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(self.lock_timeout_setting())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_lock_timeout", e))?;
        Ok(tx)
    }

    async fn commit(&self, tx: Self::Tx) -> Result<(), StoreError> {
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn rollback(&self, tx: Self::Tx) -> Result<(), StoreError> {
        tx.rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }

    #[instrument(skip(self, tx), err)]
    async fn lock_named(&self, tx: &mut Self::Tx, name: &str) -> Result<(), StoreError> {
        let deadline = tokio::time::Instant::now() + self.lock_timeout;
        loop {
            let locked: bool =
                sqlx::query_scalar("SELECT pg_try_advisory_xact_lock(hashtextextended($1, 0))")
                    .bind(name)
                    .fetch_one(&mut **tx)
                    .await
                    .map_err(|e| map_sqlx_error("lock_named", e))?;

            if locked {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(StoreError::LockTimeout(name.to_string()));
            }
            tokio::time::sleep(LOCK_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl AccountStore<Transaction<'static, Postgres>> for PostgresStore {
    #[instrument(skip(self, tx, account), fields(account_id = %account.id_typed()), err)]
    async fn save(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        account: &Account,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, balance, can_overdraft)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET
                balance = EXCLUDED.balance,
                can_overdraft = EXCLUDED.can_overdraft
            "#,
        )
        .bind(account.id_typed().as_uuid())
        .bind(account.balance())
        .bind(account.can_overdraft())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("save_account", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(account_id = %id), err)]
    async fn find_by_id(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query("SELECT id, balance, can_overdraft FROM accounts WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_account", e))?;
        row.map(|r| decode::<AccountRow>(&r)).transpose()
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    async fn find_by_ids(&self, ids: &[AccountId]) -> Result<Vec<Account>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let uuids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
        let rows = sqlx::query(
            r#"
            SELECT id, balance, can_overdraft
            FROM accounts
            WHERE id = ANY($1)
            ORDER BY array_position($1, id)
            "#,
        )
        .bind(&uuids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_accounts", e))?;
        rows.iter().map(decode::<AccountRow>).collect()
    }

    #[instrument(skip(self, tx), fields(account_id = %id), err)]
    async fn find_by_id_for_update(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        id: AccountId,
    ) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query(
            "SELECT id, balance, can_overdraft FROM accounts WHERE id = $1 FOR UPDATE",
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_lock_error(&format!("account {id}"), "lock_account", e))?;
        row.map(|r| decode::<AccountRow>(&r)).transpose()
    }
}

#[async_trait]
impl JournalStore<Transaction<'static, Postgres>> for PostgresStore {
    #[instrument(
        skip(self, tx, entry),
        fields(entry_id = %entry.id_typed(), idempotency_key = %entry.idempotency_key()),
        err
    )]
    async fn save(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        entry: &JournalEntry,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO journal_entries (
                id,
                from_account_id,
                to_account_id,
                amount,
                description,
                idempotency_key,
                previous_hash,
                hash,
                created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(entry.id_typed().as_uuid())
        .bind(entry.from_account_id().as_uuid())
        .bind(entry.to_account_id().as_uuid())
        .bind(entry.amount())
        .bind(entry.description())
        .bind(entry.idempotency_key())
        .bind(entry.previous_hash())
        .bind(entry.hash())
        .bind(entry.timestamp())
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e, IDEMPOTENCY_KEY_CONSTRAINT) {
                StoreError::DuplicateIdempotencyKey(entry.idempotency_key().to_string())
            } else {
                map_sqlx_error("insert_journal_entry", e)
            }
        })?;

        sqlx::query(
            r#"
            INSERT INTO journal_chain_head (id, last_entry_id) VALUES (1, $1)
            ON CONFLICT (id) DO UPDATE SET last_entry_id = EXCLUDED.last_entry_id
            "#,
        )
        .bind(entry.id_typed().as_uuid())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("advance_chain_head", e))?;

        Ok(())
    }

    #[instrument(skip(self), fields(entry_id = %id), err)]
    async fn find_by_id(&self, id: JournalEntryId) -> Result<Option<JournalEntry>, StoreError> {
        let sql = format!("SELECT {JOURNAL_COLUMNS} FROM journal_entries WHERE id = $1");
        let row = sqlx::query(&sql)
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_journal_entry", e))?;
        row.map(|r| decode::<JournalEntryRow>(&r)).transpose()
    }

    #[instrument(skip(self), err)]
    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<JournalEntry>, StoreError> {
        let sql = format!("SELECT {JOURNAL_COLUMNS} FROM journal_entries WHERE idempotency_key = $1");
        let row = sqlx::query(&sql)
        .bind(key)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_by_idempotency_key", e))?;
        row.map(|r| decode::<JournalEntryRow>(&r)).transpose()
    }

    #[instrument(skip(self, tx), err)]
    async fn find_by_idempotency_key_in(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        key: &str,
    ) -> Result<Option<JournalEntry>, StoreError> {
        let sql = format!("SELECT {JOURNAL_COLUMNS} FROM journal_entries WHERE idempotency_key = $1");
        let row = sqlx::query(&sql)
        .bind(key)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("find_by_idempotency_key_in", e))?;
        row.map(|r| decode::<JournalEntryRow>(&r)).transpose()
    }

    #[instrument(skip(self, tx), err)]
    async fn latest_entry(
        &self,
        tx: &mut Transaction<'static, Postgres>,
    ) -> Result<Option<JournalEntry>, StoreError> {
        sqlx::query(
            "INSERT INTO journal_chain_head (id, last_entry_id) VALUES (1, NULL) ON CONFLICT (id) DO NOTHING",
        )
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("init_chain_head", e))?;

        let head: Option<Uuid> =
            sqlx::query_scalar("SELECT last_entry_id FROM journal_chain_head WHERE id = 1 FOR UPDATE")
                .fetch_one(&mut **tx)
                .await
                .map_err(|e| map_lock_error("journal_chain_head", "lock_chain_head", e))?;

        let Some(head) = head else {
            debug!("journal is empty");
            return Ok(None);
        };

        let sql = format!("SELECT {JOURNAL_COLUMNS} FROM journal_entries WHERE id = $1");
        let row = sqlx::query(&sql)
        .bind(head)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("load_chain_tail", e))?;

        match row {
            Some(row) => decode::<JournalEntryRow>(&row).map(Some),
            None => Err(StoreError::Corrupt(format!(
                "chain head points to missing entry {head}"
            ))),
        }
    }

    #[instrument(skip(self), fields(account_id = %account_id), err)]
    async fn find_by_account_id(
        &self,
        account_id: AccountId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<JournalEntry>, StoreError> {
        let sql = format!(
            r#"
            SELECT {JOURNAL_COLUMNS}
            FROM journal_entries
            WHERE from_account_id = $1 OR to_account_id = $1
            ORDER BY id DESC
            LIMIT $2 OFFSET $3
            "#
        );
        let rows = sqlx::query(&sql)
        .bind(account_id.as_uuid())
        .bind(limit)
        .bind(offset)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_by_account_id", e))?;
        rows.iter().map(decode::<JournalEntryRow>).collect()
    }
}

/// Map SQLx errors to `StoreError`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => StoreError::Database(format!(
            "database error in {}: {} (code {})",
            operation,
            db_err.message(),
            db_err.code().as_deref().unwrap_or("none"),
        )),
        sqlx::Error::PoolTimedOut => {
            StoreError::Database(format!("connection pool timed out in {}", operation))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Database(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Corrupt(format!("row decode failed in {}: {}", operation, err))
        }
        _ => StoreError::Database(format!("sqlx error in {}: {}", operation, err)),
    }
}

/// Like [`map_sqlx_error`], but a `lock_timeout` expiry becomes
/// [`StoreError::LockTimeout`] naming `lock`.
fn map_lock_error(lock: &str, operation: &str, err: sqlx::Error) -> StoreError {
    if is_lock_not_available(&err) {
        return StoreError::LockTimeout(lock.to_string());
    }
    map_sqlx_error(operation, err)
}

fn is_lock_not_available(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some(LOCK_NOT_AVAILABLE),
        _ => false,
    }
}

/// Check if an error is a unique violation of `constraint`.
fn is_unique_violation(err: &sqlx::Error, constraint: &str) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().as_deref() == Some("23505")
            && db_err.constraint() == Some(constraint);
    }
    false
}

fn decode<'r, T>(row: &'r PgRow) -> Result<T::Domain, StoreError>
where
    T: FromRow<'r, PgRow> + IntoDomain,
{
    T::from_row(row)
        .map_err(|e| StoreError::Corrupt(format!("failed to decode row: {e}")))?
        .into_domain()
}

trait IntoDomain {
    type Domain;

    fn into_domain(self) -> Result<Self::Domain, StoreError>;
}

// SQLx row types

#[derive(Debug)]
struct AccountRow {
    id: Uuid,
    balance: i64,
    can_overdraft: bool,
}

impl<'r> FromRow<'r, PgRow> for AccountRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            balance: row.try_get("balance")?,
            can_overdraft: row.try_get("can_overdraft")?,
        })
    }
}

impl IntoDomain for AccountRow {
    type Domain = Account;

    fn into_domain(self) -> Result<Account, StoreError> {
        Ok(Account::restore(
            AccountId::from_uuid(self.id),
            self.balance,
            self.can_overdraft,
        ))
    }
}

#[derive(Debug)]
struct JournalEntryRow {
    id: Uuid,
    from_account_id: Uuid,
    to_account_id: Uuid,
    amount: i64,
    description: String,
    idempotency_key: String,
    previous_hash: String,
    hash: String,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for JournalEntryRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            from_account_id: row.try_get("from_account_id")?,
            to_account_id: row.try_get("to_account_id")?,
            amount: row.try_get("amount")?,
            description: row.try_get("description")?,
            idempotency_key: row.try_get("idempotency_key")?,
            previous_hash: row.try_get("previous_hash")?,
            hash: row.try_get("hash")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl IntoDomain for JournalEntryRow {
    type Domain = JournalEntry;

    fn into_domain(self) -> Result<JournalEntry, StoreError> {
        if self.amount <= 0 {
            return Err(StoreError::Corrupt(format!(
                "journal entry {} has non-positive amount {}",
                self.id, self.amount
            )));
        }
        Ok(JournalEntry::restore(
            JournalEntryId::from_uuid(self.id),
            AccountId::from_uuid(self.from_account_id),
            AccountId::from_uuid(self.to_account_id),
            self.amount,
            self.description,
            self.idempotency_key,
            self.previous_hash,
            // CHAR(64) pads; stored hashes are always exactly 64 chars.
            self.hash.trim_end().to_string(),
            self.created_at,
        ))
    }
}
