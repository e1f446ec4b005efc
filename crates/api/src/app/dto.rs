use axum::http::StatusCode;
use chrono::SecondsFormat;
use serde::Deserialize;
use serde_json::{Value, json};

use cornucopia_core::{AccountId, JournalEntryId};
use cornucopia_infra::TransferCommand;
use cornucopia_ledger::{Account, JournalEntry};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Default, Deserialize)]
pub struct CreateAccountRequest {
    #[serde(default)]
    pub can_overdraft: bool,
}

#[derive(Debug, Deserialize)]
pub struct BatchAccountsRequest {
    pub account_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    pub from_account_id: String,
    pub to_account_id: String,
    pub amount: i64,
    #[serde(default)]
    pub description: String,
    pub idempotency_key: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct JournalQuery {
    #[serde(default)]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

impl TransferRequest {
    pub fn into_command(self) -> Result<TransferCommand, axum::response::Response> {
        Ok(TransferCommand {
            from_account_id: parse_account_id(&self.from_account_id)?,
            to_account_id: parse_account_id(&self.to_account_id)?,
            amount: self.amount,
            description: self.description,
            idempotency_key: self.idempotency_key,
        })
    }
}

// -------------------------
// Parsing helpers
// -------------------------

pub fn parse_account_id(raw: &str) -> Result<AccountId, axum::response::Response> {
    raw.parse::<AccountId>().map_err(|e| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_argument", e.to_string())
    })
}

pub fn parse_journal_entry_id(raw: &str) -> Result<JournalEntryId, axum::response::Response> {
    raw.parse::<JournalEntryId>().map_err(|e| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_argument", e.to_string())
    })
}

pub fn parse_account_ids(raw: &[String]) -> Result<Vec<AccountId>, axum::response::Response> {
    raw.iter().map(|id| parse_account_id(id)).collect()
}

// -------------------------
// Response mapping
// -------------------------

pub fn account_to_json(account: &Account) -> Value {
    json!({
        "id": account.id_typed().to_string(),
        "balance": account.balance(),
        "can_overdraft": account.can_overdraft(),
    })
}

pub fn journal_entry_to_json(entry: &JournalEntry) -> Value {
    json!({
        "id": entry.id_typed().to_string(),
        "from_account_id": entry.from_account_id().to_string(),
        "to_account_id": entry.to_account_id().to_string(),
        "amount": entry.amount(),
        "description": entry.description(),
        "idempotency_key": entry.idempotency_key(),
        "previous_hash": entry.previous_hash(),
        "hash": entry.hash(),
        "timestamp": entry.timestamp().to_rfc3339_opts(SecondsFormat::Micros, true),
    })
}
