use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Coupons::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Coupons::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Coupons::ShopId).big_integer().not_null())
                    .col(ColumnDef::new(Coupons::Name).string_len(191).not_null())
                    .col(
                        ColumnDef::new(Coupons::Target)
                            .string_len(32)
                            .not_null()
                            .default("order_total"),
                    )
                    .col(
                        ColumnDef::new(Coupons::CouponType)
                            .string_len(16)
                            .not_null()
                            .default("fix"),
                    )
                    .col(
                        ColumnDef::new(Coupons::Price)
                            .decimal_len(20, 4)
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Coupons::Qty)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Coupons::ExpiredAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Coupons::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_coupons_shop_name")
                    .table(Coupons::Table)
                    .col(Coupons::ShopId)
                    .col(Coupons::Name)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(CouponRedemptions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CouponRedemptions::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(CouponRedemptions::UserId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CouponRedemptions::CouponId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CouponRedemptions::Name)
                            .string_len(191)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CouponRedemptions::PayableType)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CouponRedemptions::PayableId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CouponRedemptions::Price)
                            .decimal_len(20, 4)
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(CouponRedemptions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // One redemption per user and coupon name.
        manager
            .create_index(
                Index::create()
                    .name("uq_coupon_redemptions_user_name")
                    .table(CouponRedemptions::Table)
                    .col(CouponRedemptions::UserId)
                    .col(CouponRedemptions::Name)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CouponRedemptions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Coupons::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Coupons {
    Table,
    Id,
    ShopId,
    Name,
    Target,
    CouponType,
    Price,
    Qty,
    ExpiredAt,
    CreatedAt,
}

#[derive(DeriveIden)]
enum CouponRedemptions {
    Table,
    Id,
    UserId,
    CouponId,
    Name,
    PayableType,
    PayableId,
    Price,
    CreatedAt,
}
