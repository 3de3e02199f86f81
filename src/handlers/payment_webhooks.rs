//! Webhook endpoint the M-Pesa gateway posts STK callbacks to.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use tracing::info;

use crate::errors::ServiceError;
use crate::services::reconciliation::{CallbackOutcome, StkCallbackEnvelope};
use crate::AppState;

/// Receive an STK push result callback
///
/// The gateway retries on non-2xx, so every recognized callback is
/// acknowledged with 200 regardless of the payment's outcome. Only an
/// unknown correlation id gets 404.
#[utoipa::path(
    post,
    path = "/api/v1/payments/mpesa/callback",
    responses(
        (status = 200, description = "Callback accepted"),
        (status = 404, description = "No matching payment record")
    ),
    tag = "payments"
)]
pub async fn mpesa_callback(
    State(state): State<AppState>,
    Json(envelope): Json<StkCallbackEnvelope>,
) -> Result<impl IntoResponse, ServiceError> {
    info!(
        checkout_request_id = ?envelope.body.stk_callback.checkout_request_id,
        result_code = ?envelope.body.stk_callback.result_code,
        "STK callback received"
    );

    let outcome = state
        .services
        .reconciliation
        .process_callback(&envelope)
        .await?;

    let (status, message) = match outcome {
        CallbackOutcome::NotFound => (StatusCode::NOT_FOUND, "Payment not found"),
        CallbackOutcome::AlreadyProcessed => (StatusCode::OK, "Already processed"),
        CallbackOutcome::Failed => (StatusCode::OK, "Payment failed"),
        CallbackOutcome::Reconciled { .. } => (StatusCode::OK, "Payment processed"),
    };

    Ok((status, Json(json!({ "message": message }))))
}
