//! Seed data script - populates the database with a payment catalog and a
//! small demo marketplace
//!
//! Run with: cargo run --bin seed-data
//!
//! This creates:
//! - one catalog row per supported provider, inactive and in sandbox mode
//! - a demo shop with a live subscription
//! - one priced order with two line items

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Iterable, Set};
use tracing::info;

use marketplace_payments::{
    config, db,
    entities::{
        order::{self, DeliveryType, OrderStatus},
        order_detail, payment, shop, shop_subscription, PaymentTag,
    },
    services::pricing::{Chargeable, PricingContext, PricingModifiers, PricingService},
};

const DEMO_USER_ID: i64 = 1;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load_config()?;
    config::init_tracing(cfg.log_level(), cfg.log_json);

    info!("=== Marketplace Payments Seed Data ===");
    let pool = db::establish_connection_from_app_config(&cfg).await?;
    db::run_migrations(&pool).await?;
    let db = Arc::new(pool);

    info!("Creating payment catalog...");
    let providers = seed_payment_catalog(&db).await?;
    info!("  {} providers in catalog", providers);

    info!("Creating demo shop...");
    let shop = create_shop(&db).await?;
    info!("  Shop {} created", shop.id);

    info!("Creating demo order...");
    let order_id = create_order(&db, shop.id).await?;
    let effects = PricingService::new(db.clone(), cfg.service_fee)
        .calculate_order(
            Chargeable::Order(order_id),
            &PricingModifiers {
                tips: Some(dec!(2.00)),
                ..Default::default()
            },
            PricingContext::create(DEMO_USER_ID, 1),
        )
        .await?;
    info!(
        "  Order {} priced at {}",
        order_id, effects.breakdown.total_price
    );

    info!("Done. Activate a provider and store its payload before checking out.");
    Ok(())
}

/// Inserts a catalog row for every provider that does not have one yet.
async fn seed_payment_catalog(db: &DatabaseConnection) -> anyhow::Result<usize> {
    let rows: Vec<payment::ActiveModel> = PaymentTag::iter()
        .map(|tag| payment::ActiveModel {
            tag: Set(tag),
            active: Set(false),
            sandbox: Set(true),
            ..Default::default()
        })
        .collect();
    let count = rows.len();

    payment::Entity::insert_many(rows)
        .on_conflict(
            OnConflict::column(payment::Column::Tag)
                .do_nothing()
                .to_owned(),
        )
        .do_nothing()
        .exec(db)
        .await?;
    Ok(count)
}

async fn create_shop(db: &DatabaseConnection) -> anyhow::Result<shop::Model> {
    let now = Utc::now();
    let shop = shop::ActiveModel {
        user_id: Set(DEMO_USER_ID),
        tax: Set(dec!(10)),
        percentage: Set(dec!(5)),
        by_subscription: Set(true),
        visibility: Set(true),
        delivery_price: Set(dec!(3.50)),
        price_per_km: Set(dec!(0.80)),
        latitude: Set(Some(-26.2041)),
        longitude: Set(Some(28.0473)),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?;

    shop_subscription::ActiveModel {
        shop_id: Set(shop.id),
        order_limit: Set(100),
        active: Set(true),
        expired_at: Set(now + Duration::days(30)),
        ..Default::default()
    }
    .insert(db)
    .await?;

    Ok(shop)
}

async fn create_order(db: &DatabaseConnection, shop_id: i64) -> anyhow::Result<i64> {
    let now = Utc::now();
    let order = order::ActiveModel {
        user_id: Set(DEMO_USER_ID),
        shop_id: Set(shop_id),
        status: Set(OrderStatus::New),
        currency: Set("ZAR".to_string()),
        delivery_type: Set(DeliveryType::Pickup),
        total_price: Set(dec!(0)),
        total_discount: Set(dec!(0)),
        total_tax: Set(dec!(0)),
        commission_fee: Set(dec!(0)),
        delivery_fee: Set(dec!(0)),
        coupon_price: Set(dec!(0)),
        service_fee: Set(dec!(0)),
        tips: Set(dec!(0)),
        paid_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?;

    for (origin_price, quantity) in [(dec!(45.00), 2), (dec!(19.90), 1)] {
        order_detail::ActiveModel {
            order_id: Set(order.id),
            origin_price: Set(origin_price),
            quantity: Set(quantity),
            discount: Set(dec!(0)),
            total_price: Set(origin_price * Decimal::from(quantity)),
            ..Default::default()
        }
        .insert(db)
        .await?;
    }

    Ok(order.id)
}
