//! Shared test harness: in-memory database, app router, seed helpers.

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use stockflow_api::config::AppConfig;
use stockflow_api::db::{establish_connection_with_config, run_migrations, DbConfig, DbPool};
use stockflow_api::entities::mpesa_payment::{self, PaymentStatus};
use stockflow_api::entities::{sale, transaction};
use stockflow_api::events::{Event, EventSender};
use stockflow_api::{app_router, AppState};

pub struct TestApp {
    pub db: Arc<DbPool>,
    pub router: Router,
    // Held so the event channel stays open for the app's lifetime.
    pub events: mpsc::Receiver<Event>,
}

/// Boots the app against a fresh in-memory SQLite database.
///
/// A single connection keeps every query on the same in-memory instance.
pub async fn spawn_app() -> TestApp {
    let db_config = DbConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
        min_connections: 1,
        connect_timeout: Duration::from_secs(5),
        idle_timeout: Duration::from_secs(600),
        acquire_timeout: Duration::from_secs(5),
    };
    let db = establish_connection_with_config(&db_config)
        .await
        .expect("failed to open in-memory database");
    run_migrations(&db).await.expect("migrations failed");

    let db = Arc::new(db);
    let config = AppConfig::new(
        db_config.url.clone(),
        "127.0.0.1".to_string(),
        0,
        "test".to_string(),
    );

    let (event_tx, events) = mpsc::channel(64);
    let state = AppState::new(db.clone(), Arc::new(config), EventSender::new(event_tx));
    let router = app_router(state);

    TestApp { db, router, events }
}

pub async fn seed_sale(db: &DbPool, total: Decimal, received: Decimal) -> sale::Model {
    let now = Utc::now();
    sale::ActiveModel {
        id: Set(Uuid::new_v4()),
        invoice_number: Set(Some(format!("INV-{}", &Uuid::new_v4().to_string()[..8]))),
        store_id: Set(Uuid::new_v4()),
        contact_id: Set(Some(Uuid::new_v4())),
        sale_date: Set(now),
        total_amount: Set(total),
        discount: Set(Decimal::ZERO),
        amount_received: Set(received),
        status: Set("pending".to_string()),
        payment_status: Set("pending".to_string()),
        note: Set(None),
        created_at: Set(now),
        updated_at: Set(Some(now)),
    }
    .insert(db)
    .await
    .expect("failed to seed sale")
}

pub async fn seed_payment(
    db: &DbPool,
    sale_id: Option<Uuid>,
    amount: Decimal,
    checkout_request_id: &str,
    merchant_request_id: &str,
    status: PaymentStatus,
) -> mpesa_payment::Model {
    let now = Utc::now();
    mpesa_payment::ActiveModel {
        id: Set(Uuid::new_v4()),
        sale_id: Set(sale_id),
        phone: Set(Some("254712345678".to_string())),
        amount: Set(amount),
        status: Set(status),
        merchant_request_id: Set(Some(merchant_request_id.to_string())),
        checkout_request_id: Set(Some(checkout_request_id.to_string())),
        result_code: Set(None),
        result_description: Set(None),
        payload: Set(None),
        created_at: Set(now),
        updated_at: Set(Some(now)),
    }
    .insert(db)
    .await
    .expect("failed to seed payment")
}

pub async fn find_sale(db: &DbPool, id: Uuid) -> sale::Model {
    sale::Entity::find_by_id(id)
        .one(db)
        .await
        .expect("query failed")
        .expect("sale missing")
}

pub async fn find_payment(db: &DbPool, id: Uuid) -> mpesa_payment::Model {
    mpesa_payment::Entity::find_by_id(id)
        .one(db)
        .await
        .expect("query failed")
        .expect("payment missing")
}

pub async fn ledger_entries(db: &DbPool, sale_id: Uuid) -> Vec<transaction::Model> {
    use sea_orm::{ColumnTrait, QueryFilter};
    transaction::Entity::find()
        .filter(transaction::Column::SaleId.eq(sale_id))
        .all(db)
        .await
        .expect("query failed")
}

/// Sends a JSON POST through the router and returns status plus parsed body.
pub async fn post_json(
    router: &Router,
    uri: &str,
    body: &serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("failed to build request");

    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("request failed");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read body");
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("body was not JSON")
    };
    (status, json)
}

pub async fn get_json(router: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("failed to build request");

    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("request failed");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read body");
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("body was not JSON")
    };
    (status, json)
}

/// Builds a Daraja STK callback envelope for tests.
pub fn callback_envelope(
    checkout_request_id: Option<&str>,
    merchant_request_id: Option<&str>,
    result_code: serde_json::Value,
    result_desc: &str,
) -> serde_json::Value {
    let success = result_code == serde_json::json!(0);
    let mut stk = serde_json::json!({
        "ResultCode": result_code,
        "ResultDesc": result_desc,
    });
    if let Some(id) = checkout_request_id {
        stk["CheckoutRequestID"] = serde_json::json!(id);
    }
    if let Some(id) = merchant_request_id {
        stk["MerchantRequestID"] = serde_json::json!(id);
    }
    if success {
        stk["CallbackMetadata"] = serde_json::json!({
            "Item": [
                { "Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV" },
                { "Name": "PhoneNumber", "Value": 254712345678u64 }
            ]
        });
    }
    serde_json::json!({ "Body": { "stkCallback": stk } })
}

pub const CALLBACK_URI: &str = "/api/v1/payments/mpesa/callback";
