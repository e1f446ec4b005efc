use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
};

use crate::app::services::LedgerApi;
use crate::app::{dto, errors};

pub async fn create_account(
    Extension(services): Extension<Arc<dyn LedgerApi>>,
    body: Option<Json<dto::CreateAccountRequest>>,
) -> axum::response::Response {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    match services.create_account(body.can_overdraft).await {
        Ok(account) => (StatusCode::CREATED, Json(dto::account_to_json(&account))).into_response(),
        Err(e) => errors::transfer_error_to_response(e),
    }
}

pub async fn get_account(
    Extension(services): Extension<Arc<dyn LedgerApi>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match dto::parse_account_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.account(id).await {
        Ok(account) => (StatusCode::OK, Json(dto::account_to_json(&account))).into_response(),
        Err(e) => errors::transfer_error_to_response(e),
    }
}

pub async fn batch_accounts(
    Extension(services): Extension<Arc<dyn LedgerApi>>,
    Json(body): Json<dto::BatchAccountsRequest>,
) -> axum::response::Response {
    let ids = match dto::parse_account_ids(&body.account_ids) {
        Ok(ids) => ids,
        Err(resp) => return resp,
    };

    match services.accounts(&ids).await {
        Ok(accounts) => {
            let items = accounts.iter().map(dto::account_to_json).collect::<Vec<_>>();
            (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
        }
        Err(e) => errors::transfer_error_to_response(e),
    }
}
