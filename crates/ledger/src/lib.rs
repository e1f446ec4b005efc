//! Points ledger domain (accounts + hash-chained journal).
//!
//! Pure domain logic only: no IO, no HTTP, no persistence concerns.

pub mod account;
pub mod journal;
pub mod limits;

pub use account::Account;
pub use journal::{verify_chain, ChainBreak, JournalEntry, NewJournalEntry};
pub use limits::{
    clamp_page, DEFAULT_PAGE_LIMIT, MAX_DESCRIPTION_LENGTH, MAX_PAGE_LIMIT, MAX_TRANSFER_AMOUNT,
};
