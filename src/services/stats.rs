use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{ConnectionTrait, EntityTrait, Set};
use tracing::{debug, instrument};

use crate::{
    entities::user_order_stats::{self, Column, Entity as UserOrderStats},
    errors::ServiceError,
};

/// Keeps `user_order_stats` in step with pricing and payment.
///
/// Every update is a single upsert so concurrent writers for the same user
/// add to the stored counters instead of overwriting them.
#[derive(Clone, Copy, Debug, Default)]
pub struct StatsRecorder;

impl StatsRecorder {
    pub fn new() -> Self {
        Self
    }

    /// Records a pricing run. A new order counts once with its total; a
    /// re-priced order only moves `total_spent` by the change in total.
    #[instrument(skip(self, conn))]
    pub async fn record_priced<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: i64,
        is_update: bool,
        new_total: Decimal,
        previous_total: Decimal,
    ) -> Result<(), ServiceError> {
        let (count_delta, spent_delta) = if is_update {
            (0, new_total - previous_total)
        } else {
            (1, new_total)
        };
        debug!(count_delta, %spent_delta, "updating order stats");

        self.upsert(conn, user_id, count_delta, spent_delta, 0, Decimal::ZERO)
            .await
    }

    /// Records the first successful payment of a transaction.
    #[instrument(skip(self, conn))]
    pub async fn record_paid<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: i64,
        amount: Decimal,
    ) -> Result<(), ServiceError> {
        self.upsert(conn, user_id, 0, Decimal::ZERO, 1, amount).await
    }

    async fn upsert<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: i64,
        order_count: i64,
        total_spent: Decimal,
        paid_count: i64,
        paid_total: Decimal,
    ) -> Result<(), ServiceError> {
        let now = Utc::now();
        let row = user_order_stats::ActiveModel {
            user_id: Set(user_id),
            order_count: Set(order_count),
            total_spent: Set(total_spent),
            paid_count: Set(paid_count),
            paid_total: Set(paid_total),
            updated_at: Set(now),
        };

        let on_conflict = OnConflict::column(Column::UserId)
            .value(
                Column::OrderCount,
                Expr::col((UserOrderStats, Column::OrderCount)).add(order_count),
            )
            .value(
                Column::TotalSpent,
                Expr::col((UserOrderStats, Column::TotalSpent)).add(total_spent),
            )
            .value(
                Column::PaidCount,
                Expr::col((UserOrderStats, Column::PaidCount)).add(paid_count),
            )
            .value(
                Column::PaidTotal,
                Expr::col((UserOrderStats, Column::PaidTotal)).add(paid_total),
            )
            .value(Column::UpdatedAt, Expr::value(now))
            .to_owned();

        UserOrderStats::insert(row)
            .on_conflict(on_conflict)
            .exec_without_returning(conn)
            .await?;
        Ok(())
    }
}
