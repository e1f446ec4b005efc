use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::app::errors;

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Clone)]
pub struct ApiKeyState {
    keys: Arc<HashSet<String>>,
}

impl ApiKeyState {
    pub fn new(keys: impl IntoIterator<Item = String>) -> Self {
        Self {
            keys: Arc::new(keys.into_iter().collect()),
        }
    }

    /// No configured keys means the check is off.
    pub fn is_enabled(&self) -> bool {
        !self.keys.is_empty()
    }
}

pub async fn api_key_middleware(
    State(state): State<ApiKeyState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if state.is_enabled() {
        match extract_api_key(req.headers()) {
            Some(key) if state.keys.contains(key) => {}
            Some(_) => {
                return errors::json_error(StatusCode::UNAUTHORIZED, "unauthenticated", "invalid api key");
            }
            None => {
                return errors::json_error(StatusCode::UNAUTHORIZED, "unauthenticated", "missing api key");
            }
        }
    }

    next.run(req).await
}

/// One span-free log line per request with status and latency.
pub async fn trace_requests(req: Request<axum::body::Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(req).await;

    tracing::info!(
        %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request handled"
    );
    response
}

fn extract_api_key(headers: &HeaderMap) -> Option<&str> {
    let key = headers.get(API_KEY_HEADER)?.to_str().ok()?.trim();
    (!key.is_empty()).then_some(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn empty_key_list_disables_the_check() {
        assert!(!ApiKeyState::new(Vec::new()).is_enabled());
        assert!(ApiKeyState::new(vec!["k".to_string()]).is_enabled());
    }

    #[test]
    fn header_is_trimmed_and_blank_is_missing() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_api_key(&headers), None);

        headers.insert(API_KEY_HEADER, HeaderValue::from_static("  "));
        assert_eq!(extract_api_key(&headers), None);

        headers.insert(API_KEY_HEADER, HeaderValue::from_static(" secret "));
        assert_eq!(extract_api_key(&headers), Some("secret"));
    }
}
