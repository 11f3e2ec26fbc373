#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request},
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use sea_orm_migration::MigratorTrait;
use serde_json::Value;
use tower::ServiceExt;

use marketplace_payments::{
    config::AppConfig,
    db,
    entities::{
        booking, booking_extra_time,
        coupon::{self, CouponTarget, CouponType},
        order::{self, DeliveryType, OrderStatus},
        order_detail, payment, payment_payload, payment_process, shop, shop_subscription,
        transaction, PayableRef, PaymentTag,
    },
    errors::ServiceError,
    events,
    handlers::USER_ID_HEADER,
    services::{
        notifications::{Notifier, PaidNotice},
        payments::{CheckoutService, GatewayRegistry},
        pricing::PricingService,
        transactions::TransactionService,
    },
    webhooks::WebhookService,
    AppState,
};

/// Notifier that records every paid notice it receives.
#[derive(Default)]
pub struct RecordingNotifier {
    calls: AtomicUsize,
    notices: Mutex<Vec<PaidNotice>>,
}

impl RecordingNotifier {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn notices(&self) -> Vec<PaidNotice> {
        self.notices.lock().expect("notices lock").clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn transaction_paid(&self, notice: &PaidNotice) -> Result<(), ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.notices.lock().expect("notices lock").push(notice.clone());
        Ok(())
    }
}

/// Line item seed: (total_price, discount).
pub type Line = (Decimal, Decimal);

/// Shop terms for a seeded shop.
#[derive(Clone, Copy, Debug)]
pub struct ShopTerms {
    pub tax: Decimal,
    pub percentage: Decimal,
    pub by_subscription: bool,
}

impl Default for ShopTerms {
    fn default() -> Self {
        Self {
            tax: Decimal::ZERO,
            percentage: Decimal::ZERO,
            by_subscription: false,
        }
    }
}

/// Application state backed by a migrated test database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub db: Arc<DatabaseConnection>,
    pub notifier: Arc<RecordingNotifier>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_service_fee(Decimal::ZERO).await
    }

    /// Test application whose platform service fee is `service_fee`.
    pub async fn with_service_fee(service_fee: Decimal) -> Self {
        let mut cfg = test_config("sqlite::memory:");
        cfg.service_fee = service_fee;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        Self::from_pool(pool, cfg)
    }

    /// Test application on an external database with a connection pool, so
    /// concurrent requests really overlap. The schema is rebuilt from scratch.
    pub async fn on_database(database_url: &str) -> Self {
        let mut cfg = test_config(database_url);
        cfg.db_max_connections = 16;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to connect to test database");
        migrations::Migrator::fresh(&pool)
            .await
            .expect("failed to rebuild test schema");
        Self::from_pool(pool, cfg)
    }

    fn from_pool(pool: DatabaseConnection, cfg: AppConfig) -> Self {
        let db = Arc::new(pool);
        let cfg = Arc::new(cfg);
        let (event_sender, event_rx) = events::channel(256);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateways = GatewayRegistry::standard(reqwest::Client::new(), Duration::from_secs(300));
        let notifier = Arc::new(RecordingNotifier::default());

        let state = AppState {
            db: db.clone(),
            config: cfg.clone(),
            pricing: PricingService::new(db.clone(), cfg.service_fee)
                .with_events(event_sender.clone()),
            checkout: CheckoutService::new(db.clone(), gateways.clone(), cfg.clone()),
            webhooks: WebhookService::new(db.clone(), gateways, notifier.clone())
                .with_events(event_sender),
        };

        Self {
            router: marketplace_payments::app_router(state.clone()),
            state,
            db,
            notifier,
            _event_task: event_task,
        }
    }

    pub async fn seed_shop(&self, terms: ShopTerms) -> shop::Model {
        let now = Utc::now();
        shop::ActiveModel {
            user_id: Set(900),
            tax: Set(terms.tax),
            percentage: Set(terms.percentage),
            by_subscription: Set(terms.by_subscription),
            visibility: Set(true),
            delivery_price: Set(Decimal::ZERO),
            price_per_km: Set(Decimal::ZERO),
            latitude: Set(None),
            longitude: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await
        .expect("seed shop")
    }

    pub async fn seed_subscription(&self, shop_id: i64, order_limit: i64) {
        shop_subscription::ActiveModel {
            shop_id: Set(shop_id),
            order_limit: Set(order_limit),
            active: Set(true),
            expired_at: Set(Utc::now() + chrono::Duration::days(30)),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await
        .expect("seed shop subscription");
    }

    pub async fn seed_order(&self, user_id: i64, shop_id: i64, lines: &[Line]) -> order::Model {
        let now = Utc::now();
        let order = order::ActiveModel {
            user_id: Set(user_id),
            shop_id: Set(shop_id),
            status: Set(OrderStatus::New),
            currency: Set("USD".to_string()),
            delivery_type: Set(DeliveryType::Pickup),
            total_price: Set(Decimal::ZERO),
            total_discount: Set(Decimal::ZERO),
            total_tax: Set(Decimal::ZERO),
            commission_fee: Set(Decimal::ZERO),
            delivery_fee: Set(Decimal::ZERO),
            coupon_price: Set(Decimal::ZERO),
            service_fee: Set(Decimal::ZERO),
            tips: Set(Decimal::ZERO),
            paid_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await
        .expect("seed order");

        for (total_price, discount) in lines {
            order_detail::ActiveModel {
                order_id: Set(order.id),
                origin_price: Set(*total_price),
                quantity: Set(1),
                discount: Set(*discount),
                total_price: Set(*total_price),
                ..Default::default()
            }
            .insert(self.db.as_ref())
            .await
            .expect("seed order detail");
        }
        order
    }

    pub async fn seed_booking(&self, user_id: i64, shop_id: i64, lines: &[Line]) -> booking::Model {
        let now = Utc::now();
        let booking = booking::ActiveModel {
            user_id: Set(user_id),
            shop_id: Set(shop_id),
            status: Set(OrderStatus::New),
            currency: Set("USD".to_string()),
            total_price: Set(Decimal::ZERO),
            total_discount: Set(Decimal::ZERO),
            total_tax: Set(Decimal::ZERO),
            commission_fee: Set(Decimal::ZERO),
            delivery_fee: Set(Decimal::ZERO),
            coupon_price: Set(Decimal::ZERO),
            service_fee: Set(Decimal::ZERO),
            tips: Set(Decimal::ZERO),
            paid_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await
        .expect("seed booking");

        for (total_price, discount) in lines {
            booking_extra_time::ActiveModel {
                booking_id: Set(booking.id),
                origin_price: Set(*total_price),
                quantity: Set(1),
                discount: Set(*discount),
                total_price: Set(*total_price),
                ..Default::default()
            }
            .insert(self.db.as_ref())
            .await
            .expect("seed booking extra time");
        }
        booking
    }

    pub async fn seed_coupon(
        &self,
        shop_id: i64,
        name: &str,
        target: CouponTarget,
        coupon_type: CouponType,
        price: Decimal,
        qty: i32,
    ) -> coupon::Model {
        let now = Utc::now();
        coupon::ActiveModel {
            shop_id: Set(shop_id),
            name: Set(name.to_string()),
            target: Set(target),
            coupon_type: Set(coupon_type),
            price: Set(price),
            qty: Set(qty),
            expired_at: Set(now + chrono::Duration::days(7)),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await
        .expect("seed coupon")
    }

    /// Active, non-sandbox provider with the given payload.
    pub async fn seed_payment(&self, tag: PaymentTag, payload: Value) -> payment::Model {
        let provider = payment::ActiveModel {
            tag: Set(tag),
            active: Set(true),
            sandbox: Set(false),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await
        .expect("seed payment");

        payment_payload::ActiveModel {
            payment_id: Set(provider.id),
            payload: Set(payload),
        }
        .insert(self.db.as_ref())
        .await
        .expect("seed payment payload");
        provider
    }

    /// In-progress transaction for `payable` correlated by `token`.
    pub async fn seed_transaction(
        &self,
        payable: PayableRef,
        user_id: i64,
        payment_id: i64,
        price: Decimal,
        token: &str,
    ) -> transaction::Model {
        let service = TransactionService::new();
        let trx = service
            .upsert_for_payable(self.db.as_ref(), payable, user_id, payment_id, price)
            .await
            .expect("seed transaction");
        service
            .attach_token(self.db.as_ref(), trx.id, payment_id, token)
            .await
            .expect("attach token");
        self.transaction(trx.id).await
    }

    /// Pending payment process for a payable without a stored total.
    pub async fn seed_process(
        &self,
        token: &str,
        user_id: i64,
        payable: PayableRef,
        price: &str,
    ) -> payment_process::Model {
        let now = Utc::now();
        payment_process::ActiveModel {
            id: Set(token.to_string()),
            user_id: Set(user_id),
            model_type: Set(payable.kind),
            model_id: Set(payable.id),
            data: Set(serde_json::json!({"price": price, "currency": "SAR"})),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.db.as_ref())
        .await
        .expect("seed payment process")
    }

    pub async fn transaction(&self, id: i64) -> transaction::Model {
        transaction::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .expect("load transaction")
            .expect("transaction exists")
    }

    pub async fn order(&self, id: i64) -> order::Model {
        order::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .expect("load order")
            .expect("order exists")
    }

    pub async fn shop(&self, id: i64) -> shop::Model {
        shop::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .expect("load shop")
            .expect("shop exists")
    }

    /// Send a request against the router, optionally as `user_id`.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        user_id: Option<i64>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user_id) = user_id {
            builder = builder.header(USER_ID_HEADER, user_id.to_string());
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Post a raw webhook body with extra headers.
    pub async fn post_webhook(
        &self,
        uri: &str,
        content_type: &str,
        body: impl Into<Body>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", content_type);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let request = builder.body(body.into()).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }
}

fn test_config(database_url: &str) -> AppConfig {
    let mut cfg = AppConfig::new(
        database_url.to_string(),
        "127.0.0.1".to_string(),
        18_080,
        "test".to_string(),
    );
    cfg.default_currency = "USD".to_string();
    cfg.public_url = "https://pay.example.test".to_string();
    cfg
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn response_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("response body is json")
}
