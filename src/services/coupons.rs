use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set, SqlErr,
};
use tracing::{debug, info, instrument, warn};

use crate::{
    entities::{
        coupon::{self, CouponTarget},
        coupon_redemption, PayableRef,
    },
    errors::ServiceError,
    pricing::coupon_value,
};

/// A coupon code presented for one order or booking.
#[derive(Clone, Debug)]
pub struct CouponClaim<'a> {
    pub code: &'a str,
    pub shop_id: i64,
    pub target: CouponTarget,
    pub user_id: i64,
    pub payable: PayableRef,
    /// Pre-tax line total the coupon value is computed on.
    pub line_total: Decimal,
}

/// Validates and redeems coupons on the caller's connection, so a redemption
/// commits or rolls back with the pricing run that made it.
#[derive(Clone, Copy, Debug, Default)]
pub struct CouponService;

impl CouponService {
    pub fn new() -> Self {
        Self
    }

    /// Returns the coupon amount for the claim.
    ///
    /// A first redemption decrements `qty` atomically and records the user.
    /// Re-pricing the subject that already holds the redemption recomputes
    /// the amount without consuming another unit.
    #[instrument(skip(self, conn, claim), fields(code = %claim.code, payable = %claim.payable))]
    pub async fn apply<C: ConnectionTrait>(
        &self,
        conn: &C,
        claim: CouponClaim<'_>,
    ) -> Result<Decimal, ServiceError> {
        let name = claim.code.trim();
        let unavailable = || ServiceError::CouponUnavailable(name.to_string());

        let coupon = coupon::Entity::find()
            .filter(coupon::Column::ShopId.eq(claim.shop_id))
            .filter(coupon::Column::Name.eq(name))
            .filter(coupon::Column::Target.eq(claim.target))
            .one(conn)
            .await?
            .ok_or_else(unavailable)?;

        let value = coupon_value(coupon.coupon_type, coupon.price, claim.line_total);

        let previous = coupon_redemption::Entity::find()
            .filter(coupon_redemption::Column::UserId.eq(claim.user_id))
            .filter(coupon_redemption::Column::Name.eq(name))
            .one(conn)
            .await?;

        if let Some(redemption) = previous {
            let same_subject = redemption.payable_type == claim.payable.kind
                && redemption.payable_id == claim.payable.id;
            if !same_subject {
                warn!(user_id = claim.user_id, "coupon already redeemed by user");
                return Err(unavailable());
            }
            debug!(%value, "coupon re-applied to its redeeming subject");
            let mut active: coupon_redemption::ActiveModel = redemption.into();
            active.price = Set(value);
            active.update(conn).await?;
            return Ok(value);
        }

        let now = Utc::now();
        if !coupon.is_usable_at(now) {
            warn!(qty = coupon.qty, "coupon exhausted or expired");
            return Err(unavailable());
        }

        let decremented = coupon::Entity::update_many()
            .col_expr(coupon::Column::Qty, Expr::col(coupon::Column::Qty).sub(1))
            .filter(coupon::Column::Id.eq(coupon.id))
            .filter(coupon::Column::Qty.gt(0))
            .filter(coupon::Column::ExpiredAt.gt(now))
            .exec(conn)
            .await?;

        if decremented.rows_affected == 0 {
            warn!("coupon exhausted by a concurrent redemption");
            return Err(unavailable());
        }

        let redemption = coupon_redemption::ActiveModel {
            user_id: Set(claim.user_id),
            coupon_id: Set(coupon.id),
            name: Set(name.to_string()),
            payable_type: Set(claim.payable.kind),
            payable_id: Set(claim.payable.id),
            price: Set(value),
            created_at: Set(now),
            ..Default::default()
        };

        if let Err(err) = redemption.insert(conn).await {
            return Err(match err.sql_err() {
                Some(SqlErr::UniqueConstraintViolation(_)) => unavailable(),
                _ => ServiceError::DatabaseError(err),
            });
        }

        info!(coupon_id = coupon.id, %value, "coupon redeemed");
        Ok(value)
    }
}
