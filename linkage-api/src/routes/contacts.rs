//! Contact listing route.

use axum::{extract::State, Json};
use linkage_storage::ContactStore;
use std::sync::Arc;

use crate::{
    error::{ApiError, ApiResult},
    types::ListContactsResponse,
};

/// GET /contacts - Every stored contact, ordered by id
#[utoipa::path(
    get,
    path = "/contacts",
    tag = "Contacts",
    responses(
        (status = 200, description = "All stored contacts", body = ListContactsResponse),
        (status = 503, description = "Contact store unavailable", body = ApiError),
    ),
)]
pub async fn list_contacts(
    State(store): State<Arc<dyn ContactStore>>,
) -> ApiResult<Json<ListContactsResponse>> {
    let contacts = store.list_all().await?;
    Ok(Json(contacts.into()))
}
