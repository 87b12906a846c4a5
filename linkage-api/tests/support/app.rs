//! Router construction and request helpers for HTTP-level tests.

#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use linkage_api::{create_api_router, ApiConfig, AppState, StoreBackend};
use linkage_resolver::Reconciler;
use linkage_storage::{ContactStore, InMemoryContactStore};
use serde_json::Value;
use tower::ServiceExt;

/// API config with rate limiting switched off.
pub fn unlimited_config() -> ApiConfig {
    ApiConfig {
        rate_limit_enabled: false,
        store_backend: StoreBackend::Memory,
        ..ApiConfig::default()
    }
}

/// Router over `store` plus a handle on the same store for inspection.
pub fn app_with_store(store: Arc<dyn ContactStore>, config: &ApiConfig) -> Result<Router, String> {
    let state = AppState::from_reconciler(Reconciler::with_defaults(store), StoreBackend::Memory);
    create_api_router(state, config).map_err(|e| format!("router: {}", e))
}

/// Fresh in-memory router and its store.
pub fn test_app() -> Result<(Router, Arc<InMemoryContactStore>), String> {
    let store = Arc::new(InMemoryContactStore::new());
    let app = app_with_store(store.clone(), &unlimited_config())?;
    Ok((app, store))
}

/// Send a request and return the status with the body parsed as JSON
/// (`Value::Null` for an empty or non-JSON body).
pub async fn send(app: &Router, request: Request<Body>) -> Result<(StatusCode, Value), String> {
    let response = app
        .clone()
        .oneshot(request)
        .await
        .map_err(|e| format!("request failed: {}", e))?;
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .map_err(|e| format!("body read failed: {}", e))?;
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    Ok((status, body))
}

pub fn post_json(uri: &str, body: &Value) -> Result<Request<Body>, String> {
    post_raw(uri, body.to_string())
}

pub fn post_raw(uri: &str, body: impl Into<String>) -> Result<Request<Body>, String> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.into()))
        .map_err(|e| format!("request build failed: {}", e))
}

pub fn get(uri: &str) -> Result<Request<Body>, String> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .map_err(|e| format!("request build failed: {}", e))
}

/// POST /identify and return the `contact` object of a 200 response.
pub async fn identify(app: &Router, body: Value) -> Result<Value, String> {
    let (status, response) = send(app, post_json("/identify", &body)?).await?;
    if status != StatusCode::OK {
        return Err(format!("identify {} returned {}: {}", body, status, response));
    }
    response
        .get("contact")
        .cloned()
        .ok_or_else(|| format!("response has no contact: {}", response))
}
