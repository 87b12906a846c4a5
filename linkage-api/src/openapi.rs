//! OpenAPI Specification for LINKAGE API
//!
//! Generated by utoipa from the route annotations and schema derives.

use utoipa::{Modify, OpenApi};

use crate::error::{ApiError, ErrorCode};
use crate::routes::{contacts, health, identify};
use crate::telemetry::metrics;
use crate::types::{IdentifyRequest, IdentifyResponse, ListContactsResponse};

use linkage_core::{Contact, ContactId, ContactSummary, LinkPrecedence};

/// OpenAPI document for LINKAGE API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "LINKAGE API",
        version = "0.4.0",
        description = "Identity reconciliation: links contacts that share an email or phone number into one cluster",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "http://localhost:3000", description = "Local Development")
    ),
    tags(
        (name = "Identity", description = "Contact reconciliation"),
        (name = "Contacts", description = "Stored contact listing"),
        (name = "Health", description = "Liveness and readiness probes"),
        (name = "Observability", description = "Prometheus metrics")
    ),
    paths(
        identify::identify,
        contacts::list_contacts,
        health::ping,
        health::liveness,
        health::readiness,
        metrics::metrics_handler,
    ),
    components(
        schemas(
            // === Error Types ===
            ApiError, ErrorCode,

            // === Request / Response Types ===
            IdentifyRequest, IdentifyResponse, ListContactsResponse,

            // === Health Types ===
            health::HealthResponse, health::HealthStatus, health::HealthDetails,
            health::ComponentHealth,

            // === Core Domain Types (from linkage-core) ===
            Contact, ContactId, ContactSummary, LinkPrecedence
        )
    ),
    modifiers(&IdentifyAlias)
)]
pub struct ApiDoc;

/// Documents the `/api/identify` mount of the identify handler.
struct IdentifyAlias;

impl Modify for IdentifyAlias {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(item) = openapi.paths.paths.get("/identify").cloned() {
            openapi.paths.paths.insert("/api/identify".to_string(), item);
        }
    }
}

impl ApiDoc {
    /// Generate OpenAPI spec as JSON string.
    pub fn to_json() -> Result<String, serde_json::Error> {
        let openapi = Self::openapi();
        serde_json::to_string_pretty(&openapi)
    }
}
