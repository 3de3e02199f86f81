//! End-to-end tests for the STK callback reconciler: payment, sale, and
//! ledger state after each callback variant.

mod common;

use axum::http::StatusCode;
use rust_decimal_macros::dec;
use serde_json::json;

use common::*;
use stockflow_api::entities::mpesa_payment::PaymentStatus;
use stockflow_api::entities::transaction::PAYMENT_METHOD_MPESA;

#[tokio::test]
async fn successful_callback_settles_the_sale() {
    let app = spawn_app().await;
    let sale = seed_sale(&app.db, dec!(1000), dec!(0)).await;
    let payment = seed_payment(
        &app.db,
        Some(sale.id),
        dec!(1000),
        "ws_CO_001",
        "29115-001",
        PaymentStatus::Pending,
    )
    .await;

    let envelope = callback_envelope(Some("ws_CO_001"), Some("29115-001"), json!(0), "Success");
    let (status, body) = post_json(&app.router, CALLBACK_URI, &envelope).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Payment processed");

    let payment = find_payment(&app.db, payment.id).await;
    assert_eq!(payment.status, PaymentStatus::Success);
    assert_eq!(payment.result_code.as_deref(), Some("0"));
    assert!(payment.payload.is_some());

    let sale = find_sale(&app.db, sale.id).await;
    assert_eq!(sale.amount_received, dec!(1000));
    assert_eq!(sale.status, "completed");
    assert_eq!(sale.payment_status, "completed");

    let entries = ledger_entries(&app.db, sale.id).await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].payment_method, PAYMENT_METHOD_MPESA);
    assert_eq!(entries[0].amount, dec!(1000));
    assert_eq!(entries[0].store_id, sale.store_id);
    assert_eq!(entries[0].transaction_date, sale.sale_date);
    assert_eq!(
        entries[0].note.as_deref(),
        Some("M-Pesa receipt NLJ7RT61SV")
    );
}

#[tokio::test]
async fn partial_payment_leaves_sale_open() {
    let app = spawn_app().await;
    let sale = seed_sale(&app.db, dec!(1000), dec!(0)).await;
    seed_payment(
        &app.db,
        Some(sale.id),
        dec!(400),
        "ws_CO_002",
        "29115-002",
        PaymentStatus::Pending,
    )
    .await;

    let envelope = callback_envelope(Some("ws_CO_002"), Some("29115-002"), json!(0), "Success");
    let (status, _) = post_json(&app.router, CALLBACK_URI, &envelope).await;
    assert_eq!(status, StatusCode::OK);

    let sale = find_sale(&app.db, sale.id).await;
    assert_eq!(sale.amount_received, dec!(400));
    assert_eq!(sale.status, "pending");
    assert_eq!(sale.payment_status, "pending");
    assert_eq!(ledger_entries(&app.db, sale.id).await.len(), 1);
}

#[tokio::test]
async fn duplicate_callback_is_acknowledged_without_reposting() {
    let app = spawn_app().await;
    let sale = seed_sale(&app.db, dec!(1000), dec!(0)).await;
    seed_payment(
        &app.db,
        Some(sale.id),
        dec!(1000),
        "ws_CO_003",
        "29115-003",
        PaymentStatus::Pending,
    )
    .await;

    let envelope = callback_envelope(Some("ws_CO_003"), Some("29115-003"), json!(0), "Success");
    let (first, _) = post_json(&app.router, CALLBACK_URI, &envelope).await;
    assert_eq!(first, StatusCode::OK);

    let (second, body) = post_json(&app.router, CALLBACK_URI, &envelope).await;
    assert_eq!(second, StatusCode::OK);
    assert_eq!(body["message"], "Already processed");

    let sale = find_sale(&app.db, sale.id).await;
    assert_eq!(sale.amount_received, dec!(1000));
    assert_eq!(ledger_entries(&app.db, sale.id).await.len(), 1);
}

#[tokio::test]
async fn failed_callback_never_touches_the_sale() {
    let app = spawn_app().await;
    let sale = seed_sale(&app.db, dec!(1000), dec!(0)).await;
    let payment = seed_payment(
        &app.db,
        Some(sale.id),
        dec!(1000),
        "ws_CO_004",
        "29115-004",
        PaymentStatus::Pending,
    )
    .await;

    let envelope = callback_envelope(
        Some("ws_CO_004"),
        Some("29115-004"),
        json!(1032),
        "Request cancelled by user",
    );
    let (status, body) = post_json(&app.router, CALLBACK_URI, &envelope).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Payment failed");

    let payment = find_payment(&app.db, payment.id).await;
    assert_eq!(payment.status, PaymentStatus::Failed);
    assert_eq!(payment.result_code.as_deref(), Some("1032"));
    assert_eq!(
        payment.result_description.as_deref(),
        Some("Request cancelled by user")
    );

    let sale = find_sale(&app.db, sale.id).await;
    assert_eq!(sale.amount_received, dec!(0));
    assert_eq!(sale.status, "pending");
    assert!(ledger_entries(&app.db, sale.id).await.is_empty());
}

#[tokio::test]
async fn failed_payment_is_not_resurrected_by_a_later_success() {
    let app = spawn_app().await;
    let sale = seed_sale(&app.db, dec!(1000), dec!(0)).await;
    let payment = seed_payment(
        &app.db,
        Some(sale.id),
        dec!(1000),
        "ws_CO_005",
        "29115-005",
        PaymentStatus::Failed,
    )
    .await;

    let envelope = callback_envelope(Some("ws_CO_005"), Some("29115-005"), json!(0), "Success");
    let (status, body) = post_json(&app.router, CALLBACK_URI, &envelope).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Already processed");

    let payment = find_payment(&app.db, payment.id).await;
    assert_eq!(payment.status, PaymentStatus::Failed);
    let sale = find_sale(&app.db, sale.id).await;
    assert_eq!(sale.amount_received, dec!(0));
    assert!(ledger_entries(&app.db, sale.id).await.is_empty());
}

#[tokio::test]
async fn unknown_correlation_id_returns_not_found() {
    let app = spawn_app().await;

    let envelope = callback_envelope(Some("ws_CO_nope"), Some("29115-nope"), json!(0), "Success");
    let (status, body) = post_json(&app.router, CALLBACK_URI, &envelope).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Payment not found");
}

#[tokio::test]
async fn callback_without_correlation_ids_returns_not_found() {
    let app = spawn_app().await;
    seed_sale(&app.db, dec!(1000), dec!(0)).await;

    let envelope = callback_envelope(None, None, json!(0), "Success");
    let (status, body) = post_json(&app.router, CALLBACK_URI, &envelope).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Payment not found");
}

#[tokio::test]
async fn merchant_request_id_alone_matches_the_payment() {
    let app = spawn_app().await;
    let sale = seed_sale(&app.db, dec!(500), dec!(0)).await;
    let payment = seed_payment(
        &app.db,
        Some(sale.id),
        dec!(500),
        "ws_CO_006",
        "29115-006",
        PaymentStatus::Pending,
    )
    .await;

    // String result code, merchant id only
    let envelope = callback_envelope(None, Some("29115-006"), json!("0"), "Success");
    let (status, body) = post_json(&app.router, CALLBACK_URI, &envelope).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Payment processed");

    let payment = find_payment(&app.db, payment.id).await;
    assert_eq!(payment.status, PaymentStatus::Success);
}

#[tokio::test]
async fn payment_without_sale_is_marked_success_only() {
    let app = spawn_app().await;
    let payment = seed_payment(
        &app.db,
        None,
        dec!(250),
        "ws_CO_007",
        "29115-007",
        PaymentStatus::Pending,
    )
    .await;

    let envelope = callback_envelope(Some("ws_CO_007"), Some("29115-007"), json!(0), "Success");
    let (status, body) = post_json(&app.router, CALLBACK_URI, &envelope).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Payment processed");

    let payment = find_payment(&app.db, payment.id).await;
    assert_eq!(payment.status, PaymentStatus::Success);
    assert!(payment.sale_id.is_none());
}

#[tokio::test]
async fn equal_amount_payments_both_credit_the_sale() {
    let app = spawn_app().await;
    let sale = seed_sale(&app.db, dec!(1000), dec!(0)).await;
    seed_payment(
        &app.db,
        Some(sale.id),
        dec!(500),
        "ws_CO_010a",
        "29115-010a",
        PaymentStatus::Pending,
    )
    .await;
    seed_payment(
        &app.db,
        Some(sale.id),
        dec!(500),
        "ws_CO_010b",
        "29115-010b",
        PaymentStatus::Pending,
    )
    .await;

    let first = callback_envelope(Some("ws_CO_010a"), Some("29115-010a"), json!(0), "Success");
    let (status, body) = post_json(&app.router, CALLBACK_URI, &first).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Payment processed");

    let second = callback_envelope(Some("ws_CO_010b"), Some("29115-010b"), json!(0), "Success");
    let (status, body) = post_json(&app.router, CALLBACK_URI, &second).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Payment processed");

    // Both payments credit the balance even though the second one matches
    // an existing (sale, method, amount) ledger entry.
    let sale = find_sale(&app.db, sale.id).await;
    assert_eq!(sale.amount_received, dec!(1000));
    assert_eq!(sale.status, "completed");
    assert_eq!(sale.payment_status, "completed");
    assert_eq!(ledger_entries(&app.db, sale.id).await.len(), 1);
}

#[tokio::test]
async fn concurrent_duplicate_callbacks_post_exactly_once() {
    let app = spawn_app().await;
    let sale = seed_sale(&app.db, dec!(1000), dec!(0)).await;
    seed_payment(
        &app.db,
        Some(sale.id),
        dec!(1000),
        "ws_CO_009",
        "29115-009",
        PaymentStatus::Pending,
    )
    .await;

    let envelope = callback_envelope(Some("ws_CO_009"), Some("29115-009"), json!(0), "Success");
    let (first, second) = tokio::join!(
        post_json(&app.router, CALLBACK_URI, &envelope),
        post_json(&app.router, CALLBACK_URI, &envelope),
    );

    assert_eq!(first.0, StatusCode::OK);
    assert_eq!(second.0, StatusCode::OK);

    let mut messages = vec![
        first.1["message"].as_str().unwrap().to_string(),
        second.1["message"].as_str().unwrap().to_string(),
    ];
    messages.sort();
    assert_eq!(messages, vec!["Already processed", "Payment processed"]);

    let sale = find_sale(&app.db, sale.id).await;
    assert_eq!(sale.amount_received, dec!(1000));
    assert_eq!(ledger_entries(&app.db, sale.id).await.len(), 1);
}

#[tokio::test]
async fn two_partial_payments_accumulate_to_completion() {
    let app = spawn_app().await;
    let sale = seed_sale(&app.db, dec!(1000), dec!(0)).await;
    seed_payment(
        &app.db,
        Some(sale.id),
        dec!(400),
        "ws_CO_008a",
        "29115-008a",
        PaymentStatus::Pending,
    )
    .await;
    seed_payment(
        &app.db,
        Some(sale.id),
        dec!(600),
        "ws_CO_008b",
        "29115-008b",
        PaymentStatus::Pending,
    )
    .await;

    let first = callback_envelope(Some("ws_CO_008a"), Some("29115-008a"), json!(0), "Success");
    post_json(&app.router, CALLBACK_URI, &first).await;

    let sale_mid = find_sale(&app.db, sale.id).await;
    assert_eq!(sale_mid.amount_received, dec!(400));
    assert_eq!(sale_mid.status, "pending");

    let second = callback_envelope(Some("ws_CO_008b"), Some("29115-008b"), json!(0), "Success");
    post_json(&app.router, CALLBACK_URI, &second).await;

    let sale = find_sale(&app.db, sale.id).await;
    assert_eq!(sale.amount_received, dec!(1000));
    assert_eq!(sale.status, "completed");
    assert_eq!(ledger_entries(&app.db, sale.id).await.len(), 2);
}
