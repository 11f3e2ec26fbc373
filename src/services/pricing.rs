use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    entities::{
        booking, booking_extra_time,
        coupon::CouponTarget,
        order::{self, DeliveryType},
        order_detail, payment, shop, shop_subscription, PayableRef, TransactionStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    pricing::{self, LineItem, PriceBreakdown, PricingInput},
    services::{
        coupons::{CouponClaim, CouponService},
        delivery::{DeliveryAddress, DeliveryFeeResolver, ShopDeliveryRates},
        stats::StatsRecorder,
        transactions::TransactionService,
    },
};

/// An order or booking whose total is computed by the pricing engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Chargeable {
    Order(i64),
    Booking(i64),
}

impl Chargeable {
    pub fn payable(self) -> PayableRef {
        match self {
            Chargeable::Order(id) => PayableRef::order(id),
            Chargeable::Booking(id) => PayableRef::booking(id),
        }
    }

    fn coupon_target(self) -> CouponTarget {
        match self {
            Chargeable::Order(_) => CouponTarget::OrderTotal,
            Chargeable::Booking(_) => CouponTarget::BookingTotal,
        }
    }
}

/// Optional inputs of a pricing run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PricingModifiers {
    pub tips: Option<Decimal>,
    /// Provider the subject will be paid with; creates its transaction.
    pub payment_id: Option<i64>,
    pub coupon: Option<String>,
    pub delivery: Option<DeliveryAddress>,
    /// Caller-managed transaction status; suppresses transaction creation.
    pub trx_status: Option<TransactionStatus>,
}

/// Who is pricing and in which phase of the checkout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PricingContext {
    pub user_id: i64,
    pub is_update: bool,
    /// Orders created together in one multi-shop checkout.
    pub sibling_count: u32,
}

impl PricingContext {
    pub fn create(user_id: i64, sibling_count: u32) -> Self {
        Self {
            user_id,
            is_update: false,
            sibling_count,
        }
    }

    pub fn update(user_id: i64) -> Self {
        Self {
            user_id,
            is_update: true,
            sibling_count: 1,
        }
    }
}

/// Everything a pricing run changed, for callers to act on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PricingEffects {
    pub breakdown: PriceBreakdown,
    /// The shop was hidden because it passed its subscription order limit.
    pub visibility_changed: bool,
    pub coupon_applied: bool,
    pub transaction_id: Option<i64>,
}

/// The stored state pricing reads from an order or booking.
struct Subject {
    user_id: i64,
    shop_id: i64,
    delivery_type: Option<DeliveryType>,
    total_price: Decimal,
    service_fee: Decimal,
    tips: Decimal,
    line_items: Vec<LineItem>,
}

/// Computes and persists the totals of orders and bookings.
#[derive(Clone)]
pub struct PricingService {
    db: Arc<DatabaseConnection>,
    platform_service_fee: Decimal,
    delivery: Arc<dyn DeliveryFeeResolver>,
    coupons: CouponService,
    transactions: TransactionService,
    stats: StatsRecorder,
    events: Option<EventSender>,
}

impl PricingService {
    pub fn new(db: Arc<DatabaseConnection>, platform_service_fee: Decimal) -> Self {
        Self {
            db,
            platform_service_fee,
            delivery: Arc::new(ShopDeliveryRates),
            coupons: CouponService::new(),
            transactions: TransactionService::new(),
            stats: StatsRecorder::new(),
            events: None,
        }
    }

    pub fn with_delivery_resolver(mut self, delivery: Arc<dyn DeliveryFeeResolver>) -> Self {
        self.delivery = delivery;
        self
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Recomputes the subject's totals from its line items and persists the
    /// breakdown, coupon redemption, transaction and user stats in one
    /// database transaction. Any failure leaves nothing behind.
    #[instrument(skip(self, modifiers), fields(payable = %subject.payable(), user_id = ctx.user_id))]
    pub async fn calculate_order(
        &self,
        subject: Chargeable,
        modifiers: &PricingModifiers,
        ctx: PricingContext,
    ) -> Result<PricingEffects, ServiceError> {
        let txn = self.db.begin().await.map_err(|e| {
            error!("Failed to begin transaction: {}", e);
            ServiceError::DatabaseError(e)
        })?;

        let result = self.price_in(&txn, subject, modifiers, ctx).await;
        let (effects, shop_id) = match result {
            Ok(priced) => priced,
            Err(err) => {
                if let Err(rollback_err) = txn.rollback().await {
                    error!("Failed to roll back pricing: {}", rollback_err);
                }
                return Err(err);
            }
        };

        txn.commit().await.map_err(|e| {
            error!("Failed to commit pricing: {}", e);
            ServiceError::DatabaseError(e)
        })?;

        if effects.visibility_changed {
            if let Some(events) = &self.events {
                if let Err(e) = events.send(Event::ShopHidden { shop_id }).await {
                    warn!("{}", e);
                }
            }
        }

        info!(total_price = %effects.breakdown.total_price, "order priced");
        Ok(effects)
    }

    async fn price_in(
        &self,
        txn: &DatabaseTransaction,
        subject: Chargeable,
        modifiers: &PricingModifiers,
        ctx: PricingContext,
    ) -> Result<(PricingEffects, i64), ServiceError> {
        let stored = load_subject(txn, subject).await?;
        let shop = shop::Entity::find_by_id(stored.shop_id).one(txn).await?;
        if shop.is_none() {
            warn!(shop_id = stored.shop_id, "shop not found; pricing with zero rates");
        }

        let delivery_fee =
            self.delivery
                .delivery_fee(shop.as_ref(), stored.delivery_type, modifiers.delivery.as_ref());

        let coupon_code = modifiers
            .coupon
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty());
        let coupon_price = match coupon_code {
            Some(code) => {
                self.coupons
                    .apply(
                        txn,
                        CouponClaim {
                            code,
                            shop_id: stored.shop_id,
                            target: subject.coupon_target(),
                            user_id: ctx.user_id,
                            payable: subject.payable(),
                            line_total: pricing::line_total(&stored.line_items),
                        },
                    )
                    .await?
            }
            None => Decimal::ZERO,
        };

        let input = PricingInput {
            tax_percent: shop.as_ref().map(|s| s.tax).unwrap_or_default(),
            commission_percent: shop.as_ref().map(|s| s.percentage).unwrap_or_default(),
            by_subscription: shop.as_ref().map(|s| s.by_subscription).unwrap_or(false),
            delivery_fee,
            coupon_price,
            service_fee: pricing::resolve_service_fee(
                ctx.is_update,
                stored.service_fee,
                self.platform_service_fee,
                ctx.sibling_count,
            ),
            tips: pricing::resolve_tips(
                ctx.is_update,
                stored.tips,
                modifiers.tips,
                ctx.sibling_count,
            ),
            line_items: stored.line_items.clone(),
        };
        let breakdown = PriceBreakdown::compute(&input);
        debug!(?breakdown, "computed price breakdown");

        let visibility_changed = match &shop {
            Some(shop) => enforce_order_limit(txn, shop).await?,
            None => false,
        };

        save_breakdown(txn, subject, &breakdown).await?;

        let transaction_id = match (modifiers.payment_id, modifiers.trx_status) {
            (Some(payment_id), None) => {
                let provider = payment::Entity::find_by_id(payment_id)
                    .filter(payment::Column::Active.eq(true))
                    .one(txn)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::ValidationError(format!(
                            "Payment method {} is not available",
                            payment_id
                        ))
                    })?;
                let transaction = self
                    .transactions
                    .upsert_for_payable(
                        txn,
                        subject.payable(),
                        ctx.user_id,
                        provider.id,
                        breakdown.total_price,
                    )
                    .await?;
                Some(transaction.id)
            }
            _ => None,
        };

        self.stats
            .record_priced(
                txn,
                stored.user_id,
                ctx.is_update,
                breakdown.total_price,
                stored.total_price,
            )
            .await?;

        Ok((
            PricingEffects {
                breakdown,
                visibility_changed,
                coupon_applied: coupon_code.is_some(),
                transaction_id,
            },
            stored.shop_id,
        ))
    }
}

async fn load_subject<C: ConnectionTrait>(
    conn: &C,
    subject: Chargeable,
) -> Result<Subject, ServiceError> {
    match subject {
        Chargeable::Order(id) => {
            let order = order::Entity::find_by_id(id)
                .one(conn)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", id)))?;
            let line_items = order_detail::Entity::find()
                .filter(order_detail::Column::OrderId.eq(id))
                .order_by_asc(order_detail::Column::Id)
                .all(conn)
                .await?
                .into_iter()
                .map(|detail| LineItem::new(detail.total_price, detail.discount))
                .collect();
            Ok(Subject {
                user_id: order.user_id,
                shop_id: order.shop_id,
                delivery_type: Some(order.delivery_type),
                total_price: order.total_price,
                service_fee: order.service_fee,
                tips: order.tips,
                line_items,
            })
        }
        Chargeable::Booking(id) => {
            let booking = booking::Entity::find_by_id(id)
                .one(conn)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("Booking {} not found", id)))?;
            let line_items = booking_extra_time::Entity::find()
                .filter(booking_extra_time::Column::BookingId.eq(id))
                .order_by_asc(booking_extra_time::Column::Id)
                .all(conn)
                .await?
                .into_iter()
                .map(|extra| LineItem::new(extra.total_price, extra.discount))
                .collect();
            Ok(Subject {
                user_id: booking.user_id,
                shop_id: booking.shop_id,
                delivery_type: None,
                total_price: booking.total_price,
                service_fee: booking.service_fee,
                tips: booking.tips,
                line_items,
            })
        }
    }
}

async fn save_breakdown<C: ConnectionTrait>(
    conn: &C,
    subject: Chargeable,
    breakdown: &PriceBreakdown,
) -> Result<(), ServiceError> {
    let now = Utc::now();
    match subject {
        Chargeable::Order(id) => {
            order::ActiveModel {
                id: Set(id),
                total_price: Set(breakdown.total_price),
                total_discount: Set(breakdown.total_discount),
                total_tax: Set(breakdown.total_tax),
                commission_fee: Set(breakdown.commission_fee),
                delivery_fee: Set(breakdown.delivery_fee),
                coupon_price: Set(breakdown.coupon_price),
                service_fee: Set(breakdown.service_fee),
                tips: Set(breakdown.tips),
                updated_at: Set(now),
                ..Default::default()
            }
            .update(conn)
            .await?;
        }
        Chargeable::Booking(id) => {
            booking::ActiveModel {
                id: Set(id),
                total_price: Set(breakdown.total_price),
                total_discount: Set(breakdown.total_discount),
                total_tax: Set(breakdown.total_tax),
                commission_fee: Set(breakdown.commission_fee),
                delivery_fee: Set(breakdown.delivery_fee),
                coupon_price: Set(breakdown.coupon_price),
                service_fee: Set(breakdown.service_fee),
                tips: Set(breakdown.tips),
                updated_at: Set(now),
                ..Default::default()
            }
            .update(conn)
            .await?;
        }
    }
    Ok(())
}

/// Hides a subscription shop once its order count passes the limit of its
/// active subscription. Returns true only when this call hid the shop.
async fn enforce_order_limit<C: ConnectionTrait>(
    conn: &C,
    shop: &shop::Model,
) -> Result<bool, ServiceError> {
    if !shop.by_subscription || !shop.visibility {
        return Ok(false);
    }

    let subscription = shop_subscription::Entity::find()
        .filter(shop_subscription::Column::ShopId.eq(shop.id))
        .filter(shop_subscription::Column::Active.eq(true))
        .filter(shop_subscription::Column::ExpiredAt.gt(Utc::now()))
        .order_by_desc(shop_subscription::Column::Id)
        .one(conn)
        .await?;
    let Some(subscription) = subscription else {
        return Ok(false);
    };

    let order_count = order::Entity::find()
        .filter(order::Column::ShopId.eq(shop.id))
        .count(conn)
        .await?;
    if order_count <= subscription.order_limit.max(0) as u64 {
        return Ok(false);
    }

    let hidden = shop::Entity::update_many()
        .set(shop::ActiveModel {
            visibility: Set(false),
            updated_at: Set(Utc::now()),
            ..Default::default()
        })
        .filter(shop::Column::Id.eq(shop.id))
        .filter(shop::Column::Visibility.eq(true))
        .exec(conn)
        .await?;

    if hidden.rows_affected > 0 {
        info!(
            shop_id = shop.id,
            order_count,
            order_limit = subscription.order_limit,
            "shop hidden after passing its order limit"
        );
    }
    Ok(hidden.rows_affected > 0)
}
