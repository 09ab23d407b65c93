use axum::{
    extract::{Path, State},
    response::Json,
};

use crate::{
    errors::ServiceError,
    services::reconciliation::{ConfirmationResponse, TriggerSource},
    AppState,
};

/// Redirect-confirmation trigger: the user lands back from the provider's
/// hosted checkout and the frontend confirms the session. May race the
/// webhook for the same session; the reconciliation service arbitrates.
// GET /api/v1/checkout/sessions/:session_id/confirm
#[utoipa::path(
    get,
    path = "/api/v1/checkout/sessions/{session_id}/confirm",
    params(
        ("session_id" = String, Path, description = "Provider checkout session identifier")
    ),
    responses(
        (status = 200, description = "Session reconciled", body = ConfirmationResponse),
        (status = 400, description = "Invalid session or identity", body = crate::errors::ErrorResponse),
        (status = 404, description = "No matching user", body = crate::errors::ErrorResponse),
        (status = 502, description = "Provider unavailable", body = crate::errors::ErrorResponse),
        (status = 503, description = "Store unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn confirm_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<ConfirmationResponse>, ServiceError> {
    let response = state
        .reconciliation
        .reconcile(&session_id, TriggerSource::Redirect)
        .await?;
    Ok(Json(response))
}
