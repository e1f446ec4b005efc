//! Transfer engine: moves points between two accounts and appends the
//! matching journal entry, atomically.
//!
//! ```text
//! TransferCommand
//!   ↓
//! 1. Validate input (no storage access)
//!   ↓
//! 2. Idempotency fast path (committed lookup, no lock)
//!   ↓
//! 3. begin()
//!      named lock "journal_entry_chain"          ── total order of appends
//!      re-check idempotency (authoritative)
//!      lock both accounts, smaller id first      ── no A→B / B→A deadlock
//!      withdraw / deposit
//!      latest_entry() → previous_hash            ── chain head locked
//!      save accounts + entry
//!    commit() | rollback()                      ── frees every lock
//! ```
//!
//! There is no internal retry. A failed transfer leaves no trace; the caller
//! may resend it with the same idempotency key.

use tracing::{debug, info, instrument};

use cornucopia_core::{AccountId, DomainError, JournalEntryId};
use cornucopia_ledger::{Account, JournalEntry, NewJournalEntry, clamp_page};

use crate::error::TransferError;
use crate::store::{AccountStore, JournalStore, TransactionCoordinator, begin_serialized, finish};

/// Name of the named lock that serializes every chain append.
pub const CHAIN_LOCK_NAME: &str = "journal_entry_chain";

/// Input of [`TransferEngine::transfer`].
pub type TransferCommand = NewJournalEntry;

enum Applied {
    Created(JournalEntry),
    Replayed(JournalEntry),
}

/// Orchestrates transfers over injected stores and a coordinator.
///
/// Generic parameters:
/// - `A`: account store
/// - `J`: journal store
/// - `C`: transaction coordinator whose `Tx` both stores accept
#[derive(Debug, Clone)]
pub struct TransferEngine<A, J, C> {
    accounts: A,
    journal: J,
    coordinator: C,
}

impl<A, J, C> TransferEngine<A, J, C>
where
    C: TransactionCoordinator,
    A: AccountStore<C::Tx>,
    J: JournalStore<C::Tx>,
{
    pub fn new(accounts: A, journal: J, coordinator: C) -> Self {
        Self {
            accounts,
            journal,
            coordinator,
        }
    }

    /// Move `command.amount` from source to destination and record it.
    ///
    /// Replaying an already-committed idempotency key returns the original
    /// entry unchanged, whatever the other fields of the replay say.
    #[instrument(
        skip(self, command),
        fields(
            from_account_id = %command.from_account_id,
            to_account_id = %command.to_account_id,
            amount = command.amount,
            idempotency_key = %command.idempotency_key
        ),
        err
    )]
    pub async fn transfer(&self, command: TransferCommand) -> Result<JournalEntry, TransferError> {
        command.validate()?;

        if let Some(existing) = self
            .journal
            .find_by_idempotency_key(&command.idempotency_key)
            .await?
        {
            debug!(entry_id = %existing.id_typed(), "idempotent replay");
            return Ok(existing);
        }

        self.transfer_serialized(command).await
    }

    #[instrument(skip(self), fields(entry_id = %id), err)]
    pub async fn journal_entry(&self, id: JournalEntryId) -> Result<JournalEntry, TransferError> {
        self.journal
            .find_by_id(id)
            .await?
            .ok_or(TransferError::Domain(DomainError::JournalEntryNotFound))
    }

    /// Entries touching `account_id`, newest first.
    ///
    /// `limit <= 0` means 50, anything above 1000 is capped, a negative
    /// `offset` is treated as 0.
    #[instrument(skip(self), fields(account_id = %account_id), err)]
    pub async fn journal_entries(
        &self,
        account_id: AccountId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<JournalEntry>, TransferError> {
        let (limit, offset) = clamp_page(limit, offset);
        Ok(self
            .journal
            .find_by_account_id(account_id, limit, offset)
            .await?)
    }

    async fn transfer_serialized(
        &self,
        command: TransferCommand,
    ) -> Result<JournalEntry, TransferError> {
        let mut tx = begin_serialized(&self.coordinator, CHAIN_LOCK_NAME).await?;
        let result = self.apply(&mut tx, command).await;

        match finish(&self.coordinator, tx, result).await? {
            Applied::Created(entry) => {
                info!(
                    entry_id = %entry.id_typed(),
                    previous_hash = %entry.previous_hash(),
                    "transfer committed"
                );
                Ok(entry)
            }
            Applied::Replayed(entry) => {
                debug!(entry_id = %entry.id_typed(), "idempotent replay inside the chain lock");
                Ok(entry)
            }
        }
    }

    async fn apply(
        &self,
        tx: &mut C::Tx,
        command: TransferCommand,
    ) -> Result<Applied, TransferError> {
        if let Some(existing) = self
            .journal
            .find_by_idempotency_key_in(tx, &command.idempotency_key)
            .await?
        {
            return Ok(Applied::Replayed(existing));
        }

        let from_id = command.from_account_id;
        let to_id = command.to_account_id;

        // Canonical order: smaller id first, whatever the direction.
        let (first, second) = if from_id < to_id {
            (from_id, to_id)
        } else {
            (to_id, from_id)
        };
        let first = self.lock_account(tx, first).await?;
        let second = self.lock_account(tx, second).await?;
        let (mut from, mut to) = if first.id_typed() == from_id {
            (first, second)
        } else {
            (second, first)
        };

        from.withdraw(command.amount)?;
        to.deposit(command.amount)?;

        let previous_hash = self
            .journal
            .latest_entry(tx)
            .await?
            .map(|tail| tail.hash().to_string())
            .unwrap_or_default();
        let entry = JournalEntry::create(command, previous_hash)?;

        self.accounts.save(tx, &from).await?;
        self.accounts.save(tx, &to).await?;
        self.journal.save(tx, &entry).await?;

        Ok(Applied::Created(entry))
    }

    async fn lock_account(&self, tx: &mut C::Tx, id: AccountId) -> Result<Account, TransferError> {
        self.accounts
            .find_by_id_for_update(tx, id)
            .await?
            .ok_or(TransferError::Domain(DomainError::AccountNotFound))
    }
}
