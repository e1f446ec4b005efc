//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store selection and the type-erased ledger facade
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
///
/// An empty `api_keys` list disables the `x-api-key` check.
pub fn build_app(services: Arc<dyn services::LedgerApi>, api_keys: Vec<String>) -> Router {
    let key_state = middleware::ApiKeyState::new(api_keys);

    let protected = routes::router()
        .layer(Extension(services))
        .layer(axum::middleware::from_fn_with_state(
            key_state,
            middleware::api_key_middleware,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
        .layer(ServiceBuilder::new().layer(axum::middleware::from_fn(middleware::trace_requests)))
}
