use axum::{
    Router,
    routing::{get, post},
};

pub mod accounts;
pub mod system;
pub mod transfers;

/// Router for all endpoints behind the API key check.
pub fn router() -> Router {
    Router::new()
        .route("/accounts", post(accounts::create_account))
        .route("/accounts/batch", post(accounts::batch_accounts))
        .route("/accounts/:id", get(accounts::get_account))
        .route("/accounts/:id/journal", get(transfers::list_journal_entries))
        .route("/transfers", post(transfers::create_transfer))
        .route("/journal/:id", get(transfers::get_journal_entry))
}
