//! OpenAPI document and Swagger UI wiring.

use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "StockFlow API",
        description = "POS back office: sales, ledger transactions, and M-Pesa push-payment reconciliation",
        license(name = "MIT")
    ),
    paths(
        crate::handlers::payments::initiate_mpesa_payment,
        crate::handlers::payments::get_mpesa_payment,
        crate::handlers::payments::list_mpesa_payments,
        crate::handlers::payment_webhooks::mpesa_callback,
    ),
    components(schemas(
        crate::handlers::payments::InitiateMpesaPaymentRequest,
        crate::services::payments::InitiatedPayment,
        crate::services::payments::PaymentView,
        crate::services::reconciliation::StkCallbackEnvelope,
        crate::errors::ErrorResponse,
    )),
    tags(
        (name = "payments", description = "M-Pesa push payments and callbacks")
    )
)]
pub struct ApiDoc;

/// Serves the Swagger UI at /docs backed by the generated document.
pub fn swagger_routes() -> SwaggerUi {
    SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi())
}
