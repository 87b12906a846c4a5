//! Identify REST API Route
//!
//! `POST /identify` reconciles one identifier pair and returns the
//! consolidated contact.

use axum::{extract::rejection::JsonRejection, extract::State, Json};
use linkage_resolver::Reconciler;

use crate::{
    error::{ApiError, ApiResult},
    telemetry::METRICS,
    types::{IdentifyRequest, IdentifyResponse},
};

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// POST /identify - Reconcile an email / phone number pair
#[utoipa::path(
    post,
    path = "/identify",
    tag = "Identity",
    request_body = IdentifyRequest,
    responses(
        (status = 200, description = "Consolidated contact for the submitted identifiers", body = IdentifyResponse),
        (status = 400, description = "Malformed body, invalid email, or no identifier", body = ApiError),
        (status = 409, description = "Concurrent writers kept conflicting", body = ApiError),
        (status = 429, description = "Rate limit exceeded", body = ApiError),
        (status = 500, description = "Stored contacts are inconsistent or the store failed", body = ApiError),
        (status = 503, description = "Contact store unavailable", body = ApiError),
    ),
)]
pub async fn identify(
    State(reconciler): State<Reconciler>,
    payload: Result<Json<IdentifyRequest>, JsonRejection>,
) -> ApiResult<Json<IdentifyResponse>> {
    let Json(request) = payload.map_err(|rejection| {
        ApiError::invalid_input(rejection.body_text())
            .with_details(serde_json::json!({ "status": rejection.status().as_u16() }))
    })?;

    let identifiers = request.into_identifiers()?;
    let reconciliation = reconciler.reconcile(&identifiers).await?;

    if let Ok(metrics) = METRICS.as_ref() {
        metrics.record_reconciliation(&reconciliation);
    }

    Ok(Json(IdentifyResponse {
        contact: reconciliation.summary,
    }))
}
