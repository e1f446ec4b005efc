//! Infrastructure layer: stores, transactions, named locks, config and the
//! services that orchestrate them.

pub mod accounts;
pub mod config;
pub mod error;
pub mod store;
pub mod transfer;

mod integration_tests;

pub use accounts::AccountService;
pub use config::{ConfigError, LedgerConfig};
pub use error::{ErrorCategory, TransferError};
pub use transfer::{CHAIN_LOCK_NAME, TransferCommand, TransferEngine};
