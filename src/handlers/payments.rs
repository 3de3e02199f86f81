//! HTTP surface for M-Pesa push payments: initiation and read-side queries.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::errors::ServiceError;
use crate::{ApiResponse, AppState, PaginatedResponse};

/// Request body for initiating an STK push.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct InitiateMpesaPaymentRequest {
    /// Sale to reconcile the payment against, if one exists yet
    pub sale_id: Option<Uuid>,

    /// Subscriber phone number; normalized to 2547XXXXXXXX before submission
    #[validate(length(min = 9, max = 15, message = "Phone number must be 9-15 characters"))]
    pub phone: String,

    /// Amount due; rounded to whole currency units for the gateway
    #[validate(custom = "validate_positive_amount")]
    pub amount: Decimal,

    /// Account reference shown on the customer's statement (truncated to 20)
    pub reference: Option<String>,

    /// Transaction description (truncated to 40)
    pub description: Option<String>,
}

fn validate_positive_amount(amount: &Decimal) -> Result<(), ValidationError> {
    if *amount <= Decimal::ZERO {
        return Err(ValidationError::new("amount_not_positive"));
    }
    Ok(())
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct PaymentListQuery {
    /// Filter to payments for one sale
    pub sale_id: Option<Uuid>,
    /// 1-based page number
    pub page: Option<u64>,
    /// Page size (default 20, max 100)
    pub limit: Option<u64>,
}

/// Initiate an M-Pesa STK push
#[utoipa::path(
    post,
    path = "/api/v1/payments/mpesa",
    request_body = InitiateMpesaPaymentRequest,
    responses(
        (status = 202, description = "STK push accepted, pending confirmation"),
        (status = 400, description = "Validation failed", body = crate::errors::ErrorResponse),
        (status = 402, description = "Gateway rejected the push", body = crate::errors::ErrorResponse),
        (status = 404, description = "Sale not found", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway unreachable", body = crate::errors::ErrorResponse)
    ),
    tag = "payments"
)]
pub async fn initiate_mpesa_payment(
    State(state): State<AppState>,
    Json(payload): Json<InitiateMpesaPaymentRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    payload.validate()?;

    let initiated = state
        .services
        .payments
        .initiate_payment(
            payload.sale_id,
            &payload.phone,
            payload.amount,
            payload.reference.as_deref(),
            payload.description.as_deref(),
        )
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::success_with_message(
            initiated,
            "STK push sent, awaiting customer confirmation",
        )),
    ))
}

/// Get one payment record by id
#[utoipa::path(
    get,
    path = "/api/v1/payments/mpesa/{id}",
    params(("id" = Uuid, Path, description = "Payment record id")),
    responses(
        (status = 200, description = "Payment record"),
        (status = 404, description = "Payment not found", body = crate::errors::ErrorResponse)
    ),
    tag = "payments"
)]
pub async fn get_mpesa_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let payment = state.services.payments.get_payment(id).await?;
    Ok(Json(ApiResponse::success(payment)))
}

/// List payment records, newest first
#[utoipa::path(
    get,
    path = "/api/v1/payments/mpesa",
    params(PaymentListQuery),
    responses((status = 200, description = "Page of payment records")),
    tag = "payments"
)]
pub async fn list_mpesa_payments(
    State(state): State<AppState>,
    Query(query): Query<PaymentListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(20).clamp(1, 100);

    let (payments, total) = state
        .services
        .payments
        .list_payments(query.sale_id, page, limit)
        .await?;

    Ok(Json(ApiResponse::success(PaginatedResponse {
        items: payments,
        total,
        page,
        limit,
    })))
}

pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(initiate_mpesa_payment).get(list_mpesa_payments))
        .route("/:id", get(get_mpesa_payment))
}
