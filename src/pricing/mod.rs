//! Pure price computation for orders and bookings.
//!
//! Every call recomputes the breakdown from the line items. Nothing here
//! touches the database; resolved amounts (delivery fee, coupon value,
//! service fee) are passed in by the caller.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::entities::coupon::CouponType;

/// Decimal places every computed amount is rounded to. Columns store up to
/// four, so rounded values persist unchanged.
pub const MONEY_SCALE: u32 = 2;

const HUNDRED: Decimal = dec!(100);

/// The two numbers of a line item the engine reads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LineItem {
    pub total_price: Decimal,
    pub discount: Decimal,
}

impl LineItem {
    pub fn new(total_price: Decimal, discount: Decimal) -> Self {
        Self {
            total_price,
            discount,
        }
    }
}

/// Shop terms plus the modifier amounts already resolved for this subject.
#[derive(Clone, Debug, Default)]
pub struct PricingInput {
    pub line_items: Vec<LineItem>,
    pub tax_percent: Decimal,
    pub commission_percent: Decimal,
    pub by_subscription: bool,
    pub delivery_fee: Decimal,
    pub coupon_price: Decimal,
    pub service_fee: Decimal,
    pub tips: Decimal,
}

/// Persisted monetary fields of an order or booking.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PriceBreakdown {
    pub total_price: Decimal,
    pub total_discount: Decimal,
    pub total_tax: Decimal,
    /// Stored beside `total_price`, never part of it.
    pub commission_fee: Decimal,
    pub delivery_fee: Decimal,
    pub coupon_price: Decimal,
    pub service_fee: Decimal,
    pub tips: Decimal,
}

impl PriceBreakdown {
    /// Runs the pricing steps in their fixed order: line totals, tax on the
    /// line total, tax added, commission on the tax-inclusive total, then
    /// delivery minus coupon plus service fee and tips.
    pub fn compute(input: &PricingInput) -> Self {
        let mut total_price = line_total(&input.line_items);
        let discount: Decimal = input.line_items.iter().map(|item| item.discount).sum();

        let shop_tax = percent_of(total_price, input.tax_percent).max(Decimal::ZERO);

        total_price += shop_tax;

        let commission_fee = if input.by_subscription {
            Decimal::ZERO
        } else {
            percent_of(total_price, input.commission_percent).max(Decimal::ZERO)
        };

        // Not clamped: a coupon larger than the order is surfaced as is.
        total_price += input.delivery_fee - input.coupon_price + input.service_fee + input.tips;

        Self {
            total_price: money(total_price),
            total_discount: money(discount.max(Decimal::ZERO)),
            total_tax: money(shop_tax),
            commission_fee: money(commission_fee),
            delivery_fee: money(input.delivery_fee),
            coupon_price: money(input.coupon_price),
            service_fee: money(input.service_fee),
            tips: money(input.tips),
        }
    }
}

/// Sum of line-item totals.
pub fn line_total(items: &[LineItem]) -> Decimal {
    items.iter().map(|item| item.total_price).sum()
}

pub fn percent_of(amount: Decimal, percent: Decimal) -> Decimal {
    amount * percent / HUNDRED
}

/// Value of a coupon against the pre-tax line total.
pub fn coupon_value(coupon_type: CouponType, price: Decimal, line_total: Decimal) -> Decimal {
    match coupon_type {
        CouponType::Fix => price,
        CouponType::Percent => percent_of(line_total, price),
    }
}

/// Divides a checkout-wide amount across the sibling orders created with it.
pub fn split_evenly(amount: Decimal, parts: u32) -> Decimal {
    let parts = Decimal::from(parts.max(1));
    (amount / parts).round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Service fee for a pricing run. On creation the platform fee is split
/// across siblings; on update the stored fee is kept.
pub fn resolve_service_fee(
    is_update: bool,
    stored: Decimal,
    platform_fee: Decimal,
    sibling_count: u32,
) -> Decimal {
    if is_update {
        stored
    } else {
        split_evenly(platform_fee, sibling_count)
    }
}

/// Tips for a pricing run. Checkout tips are split like the service fee;
/// an update without new tips keeps the stored ones.
pub fn resolve_tips(
    is_update: bool,
    stored: Decimal,
    requested: Option<Decimal>,
    sibling_count: u32,
) -> Decimal {
    match (is_update, requested) {
        (true, Some(tips)) => tips,
        (true, None) => stored,
        (false, Some(tips)) => split_evenly(tips, sibling_count),
        (false, None) => Decimal::ZERO,
    }
}

fn money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}
