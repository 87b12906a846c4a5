//! LINKAGE API - HTTP Layer for Identity Reconciliation
//!
//! Exposes `POST /identify` over Axum, backed by the reconciler in
//! `linkage-resolver` and either the Postgres contact store in [`db`] or the
//! in-memory store from `linkage-storage`.

pub mod config;
pub mod db;
pub mod error;
pub mod macros;
pub mod middleware;
#[cfg(feature = "openapi")]
pub mod openapi;
pub mod routes;
pub mod state;
pub mod telemetry;
pub mod types;
pub mod validation;

// Re-export commonly used types
pub use config::{bind_addr_from_env, bind_addr_from_lookup, ApiConfig, StoreBackend};
pub use db::{DbConfig, PgContactStore};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use middleware::{rate_limit_middleware, RateLimitKey, RateLimitState};
#[cfg(feature = "openapi")]
pub use openapi::ApiDoc;
pub use routes::create_api_router;
pub use state::AppState;
pub use types::*;
