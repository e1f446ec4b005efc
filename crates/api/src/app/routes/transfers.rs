use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
};

use crate::app::services::LedgerApi;
use crate::app::{dto, errors};

pub async fn create_transfer(
    Extension(services): Extension<Arc<dyn LedgerApi>>,
    Json(body): Json<dto::TransferRequest>,
) -> axum::response::Response {
    let command = match body.into_command() {
        Ok(cmd) => cmd,
        Err(resp) => return resp,
    };

    match services.transfer(command).await {
        Ok(entry) => (StatusCode::OK, Json(dto::journal_entry_to_json(&entry))).into_response(),
        Err(e) => errors::transfer_error_to_response(e),
    }
}

pub async fn list_journal_entries(
    Extension(services): Extension<Arc<dyn LedgerApi>>,
    Path(id): Path<String>,
    Query(query): Query<dto::JournalQuery>,
) -> axum::response::Response {
    let id = match dto::parse_account_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.journal_entries(id, query.limit, query.offset).await {
        Ok(entries) => {
            let items = entries
                .iter()
                .map(dto::journal_entry_to_json)
                .collect::<Vec<_>>();
            (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
        }
        Err(e) => errors::transfer_error_to_response(e),
    }
}

pub async fn get_journal_entry(
    Extension(services): Extension<Arc<dyn LedgerApi>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match dto::parse_journal_entry_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.journal_entry(id).await {
        Ok(entry) => (StatusCode::OK, Json(dto::journal_entry_to_json(&entry))).into_response(),
        Err(e) => errors::transfer_error_to_response(e),
    }
}
