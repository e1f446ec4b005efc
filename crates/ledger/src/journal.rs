//! Journal entries and the hash chain that links them.
//!
//! Every entry embeds the hash of the entry persisted right before it, so the
//! journal forms a single linear chain. The hash payload is
//!
//! ```text
//! previous_hash:id:from:to:amount:unix_nanos:idempotency_key
//! ```
//!
//! hashed with SHA-256 and rendered as lowercase hex. Ids use the canonical
//! UUID text form. This layout is the external audit format, keep it stable.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use cornucopia_core::{AccountId, DomainError, DomainResult, Entity, JournalEntryId};

use crate::limits::{MAX_DESCRIPTION_LENGTH, MAX_TRANSFER_AMOUNT};

/// Caller-supplied part of a journal entry (what the transfer is about).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJournalEntry {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: i64,
    pub description: String,
    pub idempotency_key: String,
}

impl NewJournalEntry {
    /// Check transfer preconditions. The first violation wins:
    /// amount, ceiling, self-transfer, idempotency key, description length.
    pub fn validate(&self) -> DomainResult<()> {
        if self.amount <= 0 {
            return Err(DomainError::InvalidAmount);
        }
        if self.amount > MAX_TRANSFER_AMOUNT {
            return Err(DomainError::AmountTooLarge);
        }
        if self.from_account_id == self.to_account_id {
            return Err(DomainError::SelfTransfer);
        }
        if self.idempotency_key.trim().is_empty() {
            return Err(DomainError::InvalidIdempotencyKey);
        }
        // Length is measured in bytes of the UTF-8 encoding.
        if self.description.len() > MAX_DESCRIPTION_LENGTH {
            return Err(DomainError::DescriptionTooLong);
        }
        Ok(())
    }
}

/// Immutable record of a completed transfer.
///
/// There are no setters: once built, an entry only changes by being
/// replaced with a different entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    id: JournalEntryId,
    from_account_id: AccountId,
    to_account_id: AccountId,
    amount: i64,
    description: String,
    idempotency_key: String,
    previous_hash: String,
    hash: String,
    timestamp: DateTime<Utc>,
}

impl JournalEntry {
    /// Build the next link of the chain with a fresh id and the current time.
    ///
    /// The timestamp is truncated to whole microseconds so it survives a
    /// round trip through storage without changing the hash.
    pub fn create(new: NewJournalEntry, previous_hash: impl Into<String>) -> DomainResult<Self> {
        Self::create_at(
            JournalEntryId::new(),
            Utc::now().trunc_subsecs(6),
            new,
            previous_hash,
        )
    }

    /// Same as [`JournalEntry::create`] with explicit id and timestamp.
    pub fn create_at(
        id: JournalEntryId,
        timestamp: DateTime<Utc>,
        new: NewJournalEntry,
        previous_hash: impl Into<String>,
    ) -> DomainResult<Self> {
        new.validate()?;

        let mut entry = Self {
            id,
            from_account_id: new.from_account_id,
            to_account_id: new.to_account_id,
            amount: new.amount,
            description: new.description,
            idempotency_key: new.idempotency_key,
            previous_hash: previous_hash.into(),
            hash: String::new(),
            timestamp,
        };
        entry.hash = entry.compute_hash();
        Ok(entry)
    }

    /// Rebuild an entry from persisted columns. The stored hash is kept as-is
    /// so that tampering stays detectable through [`JournalEntry::validate`].
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: JournalEntryId,
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: i64,
        description: String,
        idempotency_key: String,
        previous_hash: String,
        hash: String,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            from_account_id,
            to_account_id,
            amount,
            description,
            idempotency_key,
            previous_hash,
            hash,
            timestamp,
        }
    }

    pub fn id_typed(&self) -> JournalEntryId {
        self.id
    }

    pub fn from_account_id(&self) -> AccountId {
        self.from_account_id
    }

    pub fn to_account_id(&self) -> AccountId {
        self.to_account_id
    }

    pub fn amount(&self) -> i64 {
        self.amount
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn idempotency_key(&self) -> &str {
        &self.idempotency_key
    }

    pub fn previous_hash(&self) -> &str {
        &self.previous_hash
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Whether the entry touches `account_id` on either side.
    pub fn involves(&self, account_id: AccountId) -> bool {
        self.from_account_id == account_id || self.to_account_id == account_id
    }

    /// SHA-256 over the canonical payload, lowercase hex.
    pub fn compute_hash(&self) -> String {
        let payload = format!(
            "{}:{}:{}:{}:{}:{}:{}",
            self.previous_hash,
            self.id,
            self.from_account_id,
            self.to_account_id,
            self.amount,
            self.timestamp.timestamp_nanos_opt().unwrap_or(0),
            self.idempotency_key,
        );
        hex::encode(Sha256::digest(payload.as_bytes()))
    }

    /// Recompute the hash and compare it to the stored one.
    pub fn validate(&self) -> bool {
        self.hash == self.compute_hash()
    }
}

impl Entity for JournalEntry {
    type Id = JournalEntryId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// First defect found while auditing a chain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainBreak {
    #[error("entry {id} at position {index} does not match its own hash")]
    HashMismatch { index: usize, id: JournalEntryId },

    #[error("entry {id} at position {index} links to {found:?}, expected {expected:?}")]
    BrokenLink {
        index: usize,
        id: JournalEntryId,
        expected: String,
        found: String,
    },
}

/// Audit a chain given in insertion order (oldest first).
///
/// The first entry must have an empty `previous_hash`; every later entry
/// must link to the hash of the one before it.
pub fn verify_chain(entries: &[JournalEntry]) -> Result<(), ChainBreak> {
    let mut expected = String::new();
    for (index, entry) in entries.iter().enumerate() {
        if entry.previous_hash != expected {
            return Err(ChainBreak::BrokenLink {
                index,
                id: entry.id,
                expected,
                found: entry.previous_hash.clone(),
            });
        }
        if !entry.validate() {
            return Err(ChainBreak::HashMismatch { index, id: entry.id });
        }
        expected = entry.hash.clone();
    }
    Ok(())
}
