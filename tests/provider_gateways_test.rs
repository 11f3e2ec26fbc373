//! Provider round trips against mocked MTN, PayPal and MercadoPago APIs.
//!
//! Tests cover:
//! - Opening checkout sessions with each provider's API
//! - PayPal signature verification through the verification API
//! - Capturing approved PayPal orders
//! - MercadoPago payment lookups after a signed notification

mod common;

use axum::http::{Method, StatusCode};
use common::{response_json, ShopTerms, TestApp};
use hmac::{Hmac, Mac};
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde_json::{json, Value};
use sha2::Sha256;
use wiremock::{
    matchers::{body_partial_json, header, header_exists, method, path},
    Mock, MockServer, ResponseTemplate,
};

use marketplace_payments::{
    entities::{transaction, PayableRef, PaymentTag, TransactionStatus},
    services::pricing::{Chargeable, PricingContext, PricingModifiers},
};

const USER: i64 = 8;

/// Order of `USER` priced at 110.00.
async fn priced_order(app: &TestApp) -> i64 {
    let shop = app
        .seed_shop(ShopTerms {
            tax: dec!(10),
            percentage: dec!(5),
            by_subscription: false,
        })
        .await;
    let order = app
        .seed_order(USER, shop.id, &[(dec!(100.00), dec!(0))])
        .await;
    app.state
        .pricing
        .calculate_order(
            Chargeable::Order(order.id),
            &PricingModifiers::default(),
            PricingContext::create(USER, 1),
        )
        .await
        .expect("pricing succeeds");
    order.id
}

/// Order with an in-progress transaction for `tag` correlated by `token`.
async fn pending_transaction(app: &TestApp, tag: PaymentTag, payload: Value, token: &str) -> i64 {
    let shop = app.seed_shop(ShopTerms::default()).await;
    let provider = app.seed_payment(tag, payload).await;
    let order = app.seed_order(USER, shop.id, &[(dec!(20.00), dec!(0))]).await;
    app.seed_transaction(PayableRef::order(order.id), USER, provider.id, dec!(20.00), token)
        .await
        .id
}

async fn tracked_transaction(app: &TestApp, token: &str) -> transaction::Model {
    transaction::Entity::find()
        .filter(transaction::Column::PaymentTrxId.eq(token))
        .one(app.db.as_ref())
        .await
        .expect("query transactions")
        .expect("transaction carries the provider token")
}

async fn mount_paypal_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v1/oauth2/token"))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "A21-paypal",
            "token_type": "Bearer",
        })))
        .mount(server)
        .await;
}

fn paypal_payload(server: &MockServer) -> Value {
    json!({
        "client_id": "pp-client",
        "client_secret": "pp-secret",
        "webhook_id": "WH-42",
        "base_url": server.uri(),
    })
}

const PAYPAL_HEADERS: [(&str, &str); 5] = [
    ("paypal-auth-algo", "SHA256withRSA"),
    ("paypal-cert-url", "https://api.paypal.com/v1/notifications/certs/CERT-1"),
    ("paypal-transmission-id", "tx-1"),
    ("paypal-transmission-sig", "c2lnbmF0dXJl"),
    ("paypal-transmission-time", "2026-10-16T10:00:00Z"),
];

fn mercado_pago_signature(secret: &str, data_id: &str, request_id: &str, ts: i64) -> String {
    let manifest = format!("id:{};request-id:{};ts:{};", data_id, request_id, ts);
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("hmac accepts any key");
    mac.update(manifest.as_bytes());
    format!("ts={},v1={}", ts, hex::encode(mac.finalize().into_bytes()))
}

// ==================== MTN Tests ====================

#[tokio::test]
async fn mtn_request_to_pay_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/collection/token/"))
        .and(header("Ocp-Apim-Subscription-Key", "sub-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "mtn-access",
            "expires_in": 3600,
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/collection/v1_0/requesttopay"))
        .and(header("authorization", "Bearer mtn-access"))
        .and(header("X-Target-Environment", "mtnghana"))
        .and(header(
            "X-Callback-Url",
            "https://pay.example.test/api/v1/webhooks/mtn?token=cb-secret",
        ))
        .and(header_exists("X-Reference-Id"))
        .and(body_partial_json(json!({
            "amount": "110",
            "currency": "USD",
            "payer": {"partyIdType": "MSISDN", "partyId": "233240000000"},
        })))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    let app = TestApp::new().await;
    app.seed_payment(
        PaymentTag::Mtn,
        json!({
            "api_user": "mtn-user",
            "api_key": "mtn-key",
            "subscription_key": "sub-key",
            "callback_secret": "cb-secret",
            "target_environment": "mtnghana",
            "base_url": server.uri(),
        }),
    )
    .await;
    let order_id = priced_order(&app).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/mtn/checkout",
            Some(json!({"order_id": order_id, "phone": "+233240000000"})),
            Some(USER),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = response_json(response).await;
    let reference = body["data"]["id"].as_str().expect("process id").to_string();
    assert_eq!(body["data"]["data"]["reference_id"], reference.as_str());

    let requests = server.received_requests().await.unwrap_or_default();
    let sent = requests
        .iter()
        .find(|r| r.url.path() == "/collection/v1_0/requesttopay")
        .expect("request-to-pay was sent");
    assert_eq!(
        sent.headers.get("X-Reference-Id").and_then(|v| v.to_str().ok()),
        Some(reference.as_str())
    );

    let trx = tracked_transaction(&app, &reference).await;
    assert_eq!(trx.status, TransactionStatus::Progress);

    let callback = app
        .post_webhook(
            "/api/v1/webhooks/mtn?token=cb-secret",
            "application/json",
            json!({"externalId": reference, "status": "SUCCESSFUL"}).to_string(),
            &[],
        )
        .await;
    assert_eq!(callback.status(), StatusCode::OK);
    assert_eq!(app.transaction(trx.id).await.status, TransactionStatus::Paid);
    assert_eq!(app.notifier.calls(), 1);
}

#[tokio::test]
async fn mtn_rejection_is_a_provider_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/collection/token/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "mtn-access"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/collection/v1_0/requesttopay"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"code": "PAYER_NOT_FOUND"})))
        .expect(1)
        .mount(&server)
        .await;

    let app = TestApp::new().await;
    app.seed_payment(
        PaymentTag::Mtn,
        json!({
            "api_user": "mtn-user",
            "api_key": "mtn-key",
            "subscription_key": "sub-key",
            "callback_secret": "cb-secret",
            "target_environment": "mtnghana",
            "base_url": server.uri(),
        }),
    )
    .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/mtn/checkout",
            Some(json!({"wallet_id": 4, "total_price": "12.00", "phone": "233240000000"})),
            Some(USER),
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

// ==================== PayPal Tests ====================

#[tokio::test]
async fn paypal_checkout_creates_order() {
    let server = MockServer::start().await;
    mount_paypal_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/v2/checkout/orders"))
        .and(header("authorization", "Bearer A21-paypal"))
        .and(body_partial_json(json!({
            "intent": "CAPTURE",
            "purchase_units": [{"amount": {"currency_code": "USD", "value": "110.00"}}],
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "5O190127TN364715T",
            "status": "CREATED",
            "links": [
                {"rel": "self", "href": "https://api.paypal.test/v2/checkout/orders/5O190127TN364715T"},
                {"rel": "approve", "href": "https://www.paypal.test/checkoutnow?token=5O190127TN364715T"},
            ],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let app = TestApp::new().await;
    app.seed_payment(PaymentTag::Paypal, paypal_payload(&server)).await;
    let order_id = priced_order(&app).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/paypal/checkout",
            Some(json!({"order_id": order_id})),
            Some(USER),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = response_json(response).await;
    assert_eq!(body["data"]["id"], "5O190127TN364715T");
    assert_eq!(
        body["data"]["data"]["url"],
        "https://www.paypal.test/checkoutnow?token=5O190127TN364715T"
    );
    let trx = tracked_transaction(&app, "5O190127TN364715T").await;
    assert_eq!(trx.price, dec!(110.00));
}

#[tokio::test]
async fn approved_paypal_order_is_captured_and_settled() {
    let server = MockServer::start().await;
    mount_paypal_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/v1/notifications/verify-webhook-signature"))
        .and(header("authorization", "Bearer A21-paypal"))
        .and(body_partial_json(json!({
            "webhook_id": "WH-42",
            "transmission_id": "tx-1",
            "auth_algo": "SHA256withRSA",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"verification_status": "SUCCESS"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/checkout/orders/ORDER-9/capture"))
        .and(header("PayPal-Request-Id", "capture-ORDER-9"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "ORDER-9",
            "status": "COMPLETED",
            "purchase_units": [{"payments": {"captures": [{"id": "CAP-1", "status": "COMPLETED"}]}}],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let app = TestApp::new().await;
    let trx_id = pending_transaction(&app, PaymentTag::Paypal, paypal_payload(&server), "ORDER-9").await;

    let body = json!({
        "id": "WH-EVT-1",
        "event_type": "CHECKOUT.ORDER.APPROVED",
        "resource": {"id": "ORDER-9", "status": "APPROVED"},
    })
    .to_string();
    let response = app
        .post_webhook("/api/v1/webhooks/paypal", "application/json", body, &PAYPAL_HEADERS)
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.transaction(trx_id).await.status, TransactionStatus::Paid);
    assert_eq!(app.notifier.calls(), 1);
}

#[tokio::test]
async fn paypal_capture_event_settles_related_order() {
    let server = MockServer::start().await;
    mount_paypal_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/v1/notifications/verify-webhook-signature"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"verification_status": "SUCCESS"})))
        .expect(1)
        .mount(&server)
        .await;

    let app = TestApp::new().await;
    let trx_id = pending_transaction(&app, PaymentTag::Paypal, paypal_payload(&server), "ORDER-10").await;

    let body = json!({
        "event_type": "PAYMENT.CAPTURE.COMPLETED",
        "resource": {
            "id": "CAP-10",
            "status": "COMPLETED",
            "supplementary_data": {"related_ids": {"order_id": "ORDER-10"}},
        },
    })
    .to_string();
    let response = app
        .post_webhook("/api/v1/webhooks/paypal", "application/json", body, &PAYPAL_HEADERS)
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.transaction(trx_id).await.status, TransactionStatus::Paid);
    let captures = server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.url.path().ends_with("/capture"))
        .count();
    assert_eq!(captures, 0);
}

#[tokio::test]
async fn failed_paypal_verification_is_unauthorized() {
    let server = MockServer::start().await;
    mount_paypal_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/v1/notifications/verify-webhook-signature"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"verification_status": "FAILURE"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/checkout/orders/ORDER-11/capture"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"status": "COMPLETED"})))
        .expect(0)
        .mount(&server)
        .await;

    let app = TestApp::new().await;
    let trx_id = pending_transaction(&app, PaymentTag::Paypal, paypal_payload(&server), "ORDER-11").await;

    let body = json!({
        "event_type": "CHECKOUT.ORDER.APPROVED",
        "resource": {"id": "ORDER-11", "status": "APPROVED"},
    })
    .to_string();
    let response = app
        .post_webhook("/api/v1/webhooks/paypal", "application/json", body, &PAYPAL_HEADERS)
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response_json(response).await["code"], "webhook_rejected");
    assert_eq!(app.transaction(trx_id).await.status, TransactionStatus::Progress);
    assert_eq!(app.notifier.calls(), 0);
}

#[tokio::test]
async fn paypal_delivery_without_transmission_headers_is_unauthorized() {
    let server = MockServer::start().await;
    let app = TestApp::new().await;
    pending_transaction(&app, PaymentTag::Paypal, paypal_payload(&server), "ORDER-12").await;

    let body = json!({
        "event_type": "CHECKOUT.ORDER.APPROVED",
        "resource": {"id": "ORDER-12", "status": "APPROVED"},
    })
    .to_string();
    let response = app
        .post_webhook("/api/v1/webhooks/paypal", "application/json", body, &PAYPAL_HEADERS[..4])
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

// ==================== MercadoPago Tests ====================

#[tokio::test]
async fn mercado_pago_checkout_creates_preference() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/checkout/preferences"))
        .and(header("authorization", "Bearer APP_USR-token"))
        .and(body_partial_json(json!({
            "items": [{"quantity": 1, "currency_id": "USD", "unit_price": 110.0}],
            "notification_url": "https://pay.example.test/api/v1/webhooks/mercado-pago",
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "pref-123",
            "init_point": "https://www.mercadopago.test/checkout?pref_id=pref-123",
            "sandbox_init_point": "https://sandbox.mercadopago.test/checkout?pref_id=pref-123",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let app = TestApp::new().await;
    app.seed_payment(
        PaymentTag::MercadoPago,
        json!({
            "access_token": "APP_USR-token",
            "webhook_secret": "mp-secret",
            "base_url": server.uri(),
        }),
    )
    .await;
    let order_id = priced_order(&app).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/payments/mercado-pago/checkout",
            Some(json!({"order_id": order_id})),
            Some(USER),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = response_json(response).await;
    assert_eq!(body["data"]["data"]["preference_id"], "pref-123");
    assert_eq!(
        body["data"]["data"]["url"],
        "https://www.mercadopago.test/checkout?pref_id=pref-123"
    );

    let requests = server.received_requests().await.unwrap_or_default();
    let sent: Value = requests[0].body_json().expect("preference body is json");
    let reference = sent["external_reference"].as_str().expect("external reference");
    assert_eq!(body["data"]["id"], reference);
    assert_eq!(tracked_transaction(&app, reference).await.status, TransactionStatus::Progress);
}

#[tokio::test]
async fn signed_mercado_pago_notification_fetches_payment() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/payments/123456"))
        .and(header("authorization", "Bearer APP_USR-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 123456,
            "status": "approved",
            "external_reference": "mp-ref-1",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let app = TestApp::new().await;
    let trx_id = pending_transaction(
        &app,
        PaymentTag::MercadoPago,
        json!({
            "access_token": "APP_USR-token",
            "webhook_secret": "mp-secret",
            "base_url": server.uri(),
        }),
        "mp-ref-1",
    )
    .await;

    let signature = mercado_pago_signature("mp-secret", "123456", "req-1", 1_704_908_010);
    let body = json!({"type": "payment", "data": {"id": "123456"}}).to_string();
    let response = app
        .post_webhook(
            "/api/v1/webhooks/mercado-pago",
            "application/json",
            body,
            &[("x-signature", signature.as_str()), ("x-request-id", "req-1")],
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.transaction(trx_id).await.status, TransactionStatus::Paid);
    assert_eq!(app.notifier.calls(), 1);
}

#[tokio::test]
async fn forged_mercado_pago_notification_is_not_fetched() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/payments/123456"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "approved",
            "external_reference": "mp-ref-2",
        })))
        .expect(0)
        .mount(&server)
        .await;

    let app = TestApp::new().await;
    let trx_id = pending_transaction(
        &app,
        PaymentTag::MercadoPago,
        json!({
            "access_token": "APP_USR-token",
            "webhook_secret": "mp-secret",
            "base_url": server.uri(),
        }),
        "mp-ref-2",
    )
    .await;

    let signature = mercado_pago_signature("not-the-secret", "123456", "req-2", 1_704_908_010);
    let body = json!({"type": "payment", "data": {"id": "123456"}}).to_string();
    let response = app
        .post_webhook(
            "/api/v1/webhooks/mercado-pago",
            "application/json",
            body,
            &[("x-signature", signature.as_str()), ("x-request-id", "req-2")],
        )
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(app.transaction(trx_id).await.status, TransactionStatus::Progress);
}
