use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use cornucopia_core::{AccountId, Entity, JournalEntryId};
use cornucopia_ledger::{Account, JournalEntry};

use super::{AccountStore, DEFAULT_LOCK_TIMEOUT, JournalStore, StoreError, TransactionCoordinator};

#[derive(Debug, Default)]
struct Committed {
    accounts: HashMap<AccountId, Account>,
    /// Insertion order, i.e. chain order.
    entries: Vec<JournalEntry>,
    by_key: HashMap<String, usize>,
    by_id: HashMap<JournalEntryId, usize>,
}

impl Committed {
    fn entry_by_key(&self, key: &str) -> Option<&JournalEntry> {
        self.by_key.get(key).map(|&idx| &self.entries[idx])
    }
}

type LockTable<K> = Mutex<HashMap<K, Arc<AsyncMutex<()>>>>;

fn upsert<E>(map: &mut HashMap<E::Id, E>, item: E)
where
    E: Entity,
{
    map.insert(*item.id(), item);
}

/// In-memory accounts, journal and coordinator in one value.
///
/// Intended for tests/dev. Writes are staged in the [`InMemoryTx`] and
/// applied all at once on commit. Row locks, the chain head and named locks
/// are async mutexes owned by the transaction, so contention behaves like the
/// relational backend: waiters park up to the lock timeout, then fail with
/// [`StoreError::LockTimeout`].
#[derive(Debug)]
pub struct InMemoryStore {
    committed: RwLock<Committed>,
    row_locks: LockTable<AccountId>,
    chain_head: Arc<AsyncMutex<()>>,
    named_locks: LockTable<String>,
    lock_timeout: Duration,
}

/// Open transaction of an [`InMemoryStore`].
#[derive(Debug, Default)]
pub struct InMemoryTx {
    named_guards: HashMap<String, OwnedMutexGuard<()>>,
    row_guards: Vec<OwnedMutexGuard<()>>,
    locked_rows: HashSet<AccountId>,
    chain_guard: Option<OwnedMutexGuard<()>>,
    staged_accounts: HashMap<AccountId, Account>,
    staged_entries: Vec<JournalEntry>,
}

impl InMemoryTx {
    fn staged_entry_by_key(&self, key: &str) -> Option<&JournalEntry> {
        self.staged_entries
            .iter()
            .find(|e| e.idempotency_key() == key)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            committed: RwLock::new(Committed::default()),
            row_locks: Mutex::new(HashMap::new()),
            chain_head: Arc::new(AsyncMutex::new(())),
            named_locks: Mutex::new(HashMap::new()),
            lock_timeout,
        }
    }

    /// Every committed entry in chain order (oldest first).
    pub fn journal(&self) -> Result<Vec<JournalEntry>, StoreError> {
        Ok(self.read()?.entries.clone())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Committed>, StoreError> {
        self.committed
            .read()
            .map_err(|_| StoreError::Database("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Committed>, StoreError> {
        self.committed
            .write()
            .map_err(|_| StoreError::Database("lock poisoned".to_string()))
    }

    fn mutex_for<K>(table: &LockTable<K>, key: &K) -> Result<Arc<AsyncMutex<()>>, StoreError>
    where
        K: std::hash::Hash + Eq + Clone,
    {
        let mut table = table
            .lock()
            .map_err(|_| StoreError::Database("lock poisoned".to_string()))?;
        Ok(table.entry(key.clone()).or_default().clone())
    }

    async fn wait_for(
        &self,
        mutex: Arc<AsyncMutex<()>>,
        name: impl Into<String>,
    ) -> Result<OwnedMutexGuard<()>, StoreError> {
        tokio::time::timeout(self.lock_timeout, mutex.lock_owned())
            .await
            .map_err(|_| StoreError::LockTimeout(name.into()))
    }

    async fn lock_chain_head(&self, tx: &mut InMemoryTx) -> Result<(), StoreError> {
        if tx.chain_guard.is_none() {
            let guard = self.wait_for(self.chain_head.clone(), "journal_chain_head").await?;
            tx.chain_guard = Some(guard);
        }
        Ok(())
    }
}

#[async_trait]
impl TransactionCoordinator for InMemoryStore {
    type Tx = InMemoryTx;

    async fn begin(&self) -> Result<InMemoryTx, StoreError> {
        Ok(InMemoryTx::default())
    }

    async fn commit(&self, tx: InMemoryTx) -> Result<(), StoreError> {
        let mut committed = self.write()?;

        let mut seen = HashSet::new();
        for entry in &tx.staged_entries {
            let key = entry.idempotency_key();
            if committed.by_key.contains_key(key) || !seen.insert(key) {
                return Err(StoreError::DuplicateIdempotencyKey(key.to_string()));
            }
        }

        for account in tx.staged_accounts.into_values() {
            upsert(&mut committed.accounts, account);
        }
        for entry in tx.staged_entries {
            let idx = committed.entries.len();
            committed.by_key.insert(entry.idempotency_key().to_string(), idx);
            committed.by_id.insert(entry.id_typed(), idx);
            committed.entries.push(entry);
        }
        // Named, row and chain guards drop here, after the writes are visible.
        Ok(())
    }

    async fn rollback(&self, tx: InMemoryTx) -> Result<(), StoreError> {
        drop(tx);
        Ok(())
    }

    async fn lock_named(&self, tx: &mut InMemoryTx, name: &str) -> Result<(), StoreError> {
        if tx.named_guards.contains_key(name) {
            return Ok(());
        }
        let mutex = Self::mutex_for(&self.named_locks, &name.to_string())?;
        let guard = self.wait_for(mutex, name).await?;
        tx.named_guards.insert(name.to_string(), guard);
        Ok(())
    }
}

#[async_trait]
impl AccountStore<InMemoryTx> for InMemoryStore {
    async fn save(&self, tx: &mut InMemoryTx, account: &Account) -> Result<(), StoreError> {
        upsert(&mut tx.staged_accounts, account.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        Ok(self.read()?.accounts.get(&id).cloned())
    }

    async fn find_by_ids(&self, ids: &[AccountId]) -> Result<Vec<Account>, StoreError> {
        let committed = self.read()?;
        let mut seen = HashSet::new();
        Ok(ids
            .iter()
            .filter(|id| seen.insert(**id))
            .filter_map(|id| committed.accounts.get(id).cloned())
            .collect())
    }

    async fn find_by_id_for_update(
        &self,
        tx: &mut InMemoryTx,
        id: AccountId,
    ) -> Result<Option<Account>, StoreError> {
        if let Some(staged) = tx.staged_accounts.get(&id) {
            return Ok(Some(staged.clone()));
        }
        let exists = self.read()?.accounts.contains_key(&id);
        if !exists {
            return Ok(None);
        }

        if tx.locked_rows.insert(id) {
            let mutex = Self::mutex_for(&self.row_locks, &id)?;
            match self.wait_for(mutex, format!("account {id}")).await {
                Ok(guard) => tx.row_guards.push(guard),
                Err(err) => {
                    tx.locked_rows.remove(&id);
                    return Err(err);
                }
            }
        }

        // Re-read after the lock: the previous holder may have committed.
        Ok(self.read()?.accounts.get(&id).cloned())
    }
}

#[async_trait]
impl JournalStore<InMemoryTx> for InMemoryStore {
    async fn save(&self, tx: &mut InMemoryTx, entry: &JournalEntry) -> Result<(), StoreError> {
        let key = entry.idempotency_key();
        let duplicate =
            tx.staged_entry_by_key(key).is_some() || self.read()?.by_key.contains_key(key);
        if duplicate {
            return Err(StoreError::DuplicateIdempotencyKey(key.to_string()));
        }
        self.lock_chain_head(tx).await?;
        tx.staged_entries.push(entry.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: JournalEntryId) -> Result<Option<JournalEntry>, StoreError> {
        let committed = self.read()?;
        Ok(committed
            .by_id
            .get(&id)
            .map(|&idx| committed.entries[idx].clone()))
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<JournalEntry>, StoreError> {
        Ok(self.read()?.entry_by_key(key).cloned())
    }

    async fn find_by_idempotency_key_in(
        &self,
        tx: &mut InMemoryTx,
        key: &str,
    ) -> Result<Option<JournalEntry>, StoreError> {
        if let Some(staged) = tx.staged_entry_by_key(key) {
            return Ok(Some(staged.clone()));
        }
        self.find_by_idempotency_key(key).await
    }

    async fn latest_entry(&self, tx: &mut InMemoryTx) -> Result<Option<JournalEntry>, StoreError> {
        self.lock_chain_head(tx).await?;
        if let Some(staged) = tx.staged_entries.last() {
            return Ok(Some(staged.clone()));
        }
        Ok(self.read()?.entries.last().cloned())
    }

    async fn find_by_account_id(
        &self,
        account_id: AccountId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<JournalEntry>, StoreError> {
        let limit = usize::try_from(limit).unwrap_or(0);
        let offset = usize::try_from(offset).unwrap_or(0);

        let committed = self.read()?;
        let mut matching: Vec<&JournalEntry> = committed
            .entries
            .iter()
            .filter(|e| e.involves(account_id))
            .collect();
        matching.sort_by(|a, b| b.id_typed().cmp(&a.id_typed()));

        Ok(matching
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cornucopia_ledger::NewJournalEntry;

    fn funded(balance: i64) -> Account {
        Account::restore(AccountId::new(), balance, false)
    }

    fn entry(key: &str, previous_hash: &str) -> JournalEntry {
        JournalEntry::create(
            NewJournalEntry {
                from_account_id: AccountId::new(),
                to_account_id: AccountId::new(),
                amount: 1,
                description: String::new(),
                idempotency_key: key.to_string(),
            },
            previous_hash,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn writes_are_invisible_until_commit() {
        let store = InMemoryStore::new();
        let account = funded(10);

        let mut tx = store.begin().await.unwrap();
        AccountStore::save(&store, &mut tx, &account).await.unwrap();
        assert!(AccountStore::find_by_id(&store, account.id_typed()).await.unwrap().is_none());

        store.commit(tx).await.unwrap();
        assert_eq!(
            AccountStore::find_by_id(&store, account.id_typed()).await.unwrap(),
            Some(account)
        );
    }

    #[tokio::test]
    async fn rollback_discards_staged_writes() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let e = entry("k1", "");
        JournalStore::save(&store, &mut tx, &e).await.unwrap();
        assert_eq!(
            store.find_by_idempotency_key_in(&mut tx, "k1").await.unwrap(),
            Some(e)
        );

        store.rollback(tx).await.unwrap();
        assert!(store.find_by_idempotency_key("k1").await.unwrap().is_none());
        assert!(store.journal().unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_key_is_rejected_on_save() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        JournalStore::save(&store, &mut tx, &entry("k1", "")).await.unwrap();
        store.commit(tx).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let err = JournalStore::save(&store, &mut tx, &entry("k1", ""))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::DuplicateIdempotencyKey("k1".to_string()));
    }

    #[tokio::test]
    async fn commit_rechecks_key_uniqueness() {
        let store = Arc::new(InMemoryStore::new());

        // Staged directly, past the save-time check.
        let mut first = store.begin().await.unwrap();
        JournalStore::save(&*store, &mut first, &entry("dup", "")).await.unwrap();
        let mut second = store.begin().await.unwrap();
        second.staged_entries.push(entry("dup", ""));
        store.commit(first).await.unwrap();

        assert_eq!(
            store.commit(second).await,
            Err(StoreError::DuplicateIdempotencyKey("dup".to_string()))
        );
        assert_eq!(store.journal().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn latest_entry_sees_staged_then_committed_tail() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        assert!(store.latest_entry(&mut tx).await.unwrap().is_none());

        let first = entry("k1", "");
        JournalStore::save(&store, &mut tx, &first).await.unwrap();
        assert_eq!(store.latest_entry(&mut tx).await.unwrap(), Some(first.clone()));
        store.commit(tx).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(store.latest_entry(&mut tx).await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn row_lock_blocks_second_transaction_until_commit() {
        let store = Arc::new(InMemoryStore::new());
        let account = funded(100);
        let id = account.id_typed();
        let mut tx = store.begin().await.unwrap();
        AccountStore::save(&*store, &mut tx, &account).await.unwrap();
        store.commit(tx).await.unwrap();

        let mut holder = store.begin().await.unwrap();
        let mut locked = store.find_by_id_for_update(&mut holder, id).await.unwrap().unwrap();

        let contender = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut tx = store.begin().await.unwrap();
                let seen = store.find_by_id_for_update(&mut tx, id).await.unwrap().unwrap();
                store.rollback(tx).await.unwrap();
                seen.balance()
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        locked.withdraw(40).unwrap();
        AccountStore::save(&*store, &mut holder, &locked).await.unwrap();
        store.commit(holder).await.unwrap();

        assert_eq!(contender.await.unwrap(), 60);
    }

    #[tokio::test]
    async fn row_lock_wait_is_bounded_by_lock_timeout() {
        let store = InMemoryStore::with_lock_timeout(Duration::from_millis(50));
        let account = funded(100);
        let id = account.id_typed();
        let mut tx = store.begin().await.unwrap();
        AccountStore::save(&store, &mut tx, &account).await.unwrap();
        store.commit(tx).await.unwrap();

        let mut holder = store.begin().await.unwrap();
        store.find_by_id_for_update(&mut holder, id).await.unwrap().unwrap();

        let mut waiter = store.begin().await.unwrap();
        let started = tokio::time::Instant::now();
        let err = store.find_by_id_for_update(&mut waiter, id).await.unwrap_err();
        assert_eq!(err, StoreError::LockTimeout(format!("account {id}")));
        assert!(started.elapsed() < Duration::from_millis(500));

        // The timed-out transaction can still take the row once it is free.
        store.rollback(holder).await.unwrap();
        assert!(store.find_by_id_for_update(&mut waiter, id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn chain_head_wait_is_bounded_by_lock_timeout() {
        let store = InMemoryStore::with_lock_timeout(Duration::from_millis(20));
        let mut holder = store.begin().await.unwrap();
        assert!(store.latest_entry(&mut holder).await.unwrap().is_none());

        let mut waiter = store.begin().await.unwrap();
        assert_eq!(
            store.latest_entry(&mut waiter).await.unwrap_err(),
            StoreError::LockTimeout("journal_chain_head".to_string())
        );
    }

    #[tokio::test]
    async fn named_lock_lives_as_long_as_its_transaction() {
        let store = InMemoryStore::with_lock_timeout(Duration::from_millis(20));
        let mut holder = store.begin().await.unwrap();
        store.lock_named(&mut holder, "chain").await.unwrap();
        // Re-entrant within the same transaction.
        store.lock_named(&mut holder, "chain").await.unwrap();

        let mut other = store.begin().await.unwrap();
        assert_eq!(
            store.lock_named(&mut other, "chain").await.unwrap_err(),
            StoreError::LockTimeout("chain".to_string())
        );
        store.lock_named(&mut other, "unrelated").await.unwrap();

        store.commit(holder).await.unwrap();
        store.lock_named(&mut other, "chain").await.unwrap();
    }

    #[tokio::test]
    async fn named_lock_is_freed_by_rollback_and_drop() {
        let store = InMemoryStore::with_lock_timeout(Duration::from_millis(20));

        let mut tx = store.begin().await.unwrap();
        store.lock_named(&mut tx, "chain").await.unwrap();
        store.rollback(tx).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        store.lock_named(&mut tx, "chain").await.unwrap();
        drop(tx);

        let mut tx = store.begin().await.unwrap();
        assert!(store.lock_named(&mut tx, "chain").await.is_ok());
    }

    #[tokio::test]
    async fn find_by_account_id_pages_newest_first() {
        let store = InMemoryStore::new();
        let from = AccountId::new();
        let to = AccountId::new();

        let mut previous = String::new();
        let mut tx = store.begin().await.unwrap();
        for i in 0..5 {
            let e = JournalEntry::create(
                NewJournalEntry {
                    from_account_id: from,
                    to_account_id: to,
                    amount: 1,
                    description: String::new(),
                    idempotency_key: format!("k{i}"),
                },
                previous.clone(),
            )
            .unwrap();
            previous = e.hash().to_string();
            JournalStore::save(&store, &mut tx, &e).await.unwrap();
        }
        store.commit(tx).await.unwrap();

        let page = store.find_by_account_id(to, 2, 1).await.unwrap();
        let keys: Vec<_> = page.iter().map(|e| e.idempotency_key()).collect();
        assert_eq!(keys, vec!["k3", "k2"]);

        assert!(store.find_by_account_id(AccountId::new(), 10, 0).await.unwrap().is_empty());
    }
}
