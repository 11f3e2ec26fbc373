use sea_orm_migration::prelude::*;

use crate::m20250101_000001_create_shop_tables::Shops;

#[derive(DeriveMigrationName)]
pub struct Migration;

fn money<T: IntoIden>(name: T) -> ColumnDef {
    ColumnDef::new(name)
        .decimal_len(20, 4)
        .not_null()
        .default(0)
        .to_owned()
}

fn id_column<T: IntoIden>(name: T) -> ColumnDef {
    ColumnDef::new(name)
        .big_integer()
        .not_null()
        .auto_increment()
        .primary_key()
        .to_owned()
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Orders::Table)
                    .if_not_exists()
                    .col(&mut id_column(Orders::Id))
                    .col(ColumnDef::new(Orders::UserId).big_integer().not_null())
                    .col(ColumnDef::new(Orders::ShopId).big_integer().not_null())
                    .col(
                        ColumnDef::new(Orders::Status)
                            .string_len(32)
                            .not_null()
                            .default("new"),
                    )
                    .col(ColumnDef::new(Orders::Currency).string_len(3).not_null())
                    .col(
                        ColumnDef::new(Orders::DeliveryType)
                            .string_len(32)
                            .not_null()
                            .default("delivery"),
                    )
                    .col(&mut money(Orders::TotalPrice))
                    .col(&mut money(Orders::TotalDiscount))
                    .col(&mut money(Orders::TotalTax))
                    .col(&mut money(Orders::CommissionFee))
                    .col(&mut money(Orders::DeliveryFee))
                    .col(&mut money(Orders::CouponPrice))
                    .col(&mut money(Orders::ServiceFee))
                    .col(&mut money(Orders::Tips))
                    .col(
                        ColumnDef::new(Orders::PaidAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Orders::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Orders::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_orders_shop_id")
                            .from(Orders::Table, Orders::ShopId)
                            .to(Shops::Table, Shops::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(OrderDetails::Table)
                    .if_not_exists()
                    .col(&mut id_column(OrderDetails::Id))
                    .col(
                        ColumnDef::new(OrderDetails::OrderId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(&mut money(OrderDetails::OriginPrice))
                    .col(
                        ColumnDef::new(OrderDetails::Quantity)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(&mut money(OrderDetails::Discount))
                    .col(&mut money(OrderDetails::TotalPrice))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_order_details_order_id")
                            .from(OrderDetails::Table, OrderDetails::OrderId)
                            .to(Orders::Table, Orders::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Bookings::Table)
                    .if_not_exists()
                    .col(&mut id_column(Bookings::Id))
                    .col(ColumnDef::new(Bookings::UserId).big_integer().not_null())
                    .col(ColumnDef::new(Bookings::ShopId).big_integer().not_null())
                    .col(
                        ColumnDef::new(Bookings::Status)
                            .string_len(32)
                            .not_null()
                            .default("new"),
                    )
                    .col(ColumnDef::new(Bookings::Currency).string_len(3).not_null())
                    .col(&mut money(Bookings::TotalPrice))
                    .col(&mut money(Bookings::TotalDiscount))
                    .col(&mut money(Bookings::TotalTax))
                    .col(&mut money(Bookings::CommissionFee))
                    .col(&mut money(Bookings::DeliveryFee))
                    .col(&mut money(Bookings::CouponPrice))
                    .col(&mut money(Bookings::ServiceFee))
                    .col(&mut money(Bookings::Tips))
                    .col(
                        ColumnDef::new(Bookings::PaidAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Bookings::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Bookings::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_bookings_shop_id")
                            .from(Bookings::Table, Bookings::ShopId)
                            .to(Shops::Table, Shops::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(BookingExtraTimes::Table)
                    .if_not_exists()
                    .col(&mut id_column(BookingExtraTimes::Id))
                    .col(
                        ColumnDef::new(BookingExtraTimes::BookingId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(&mut money(BookingExtraTimes::OriginPrice))
                    .col(
                        ColumnDef::new(BookingExtraTimes::Quantity)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(&mut money(BookingExtraTimes::Discount))
                    .col(&mut money(BookingExtraTimes::TotalPrice))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_booking_extra_times_booking_id")
                            .from(BookingExtraTimes::Table, BookingExtraTimes::BookingId)
                            .to(Bookings::Table, Bookings::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_orders_shop_id")
                    .table(Orders::Table)
                    .col(Orders::ShopId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(BookingExtraTimes::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Bookings::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(OrderDetails::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Orders::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Orders {
    Table,
    Id,
    UserId,
    ShopId,
    Status,
    Currency,
    DeliveryType,
    TotalPrice,
    TotalDiscount,
    TotalTax,
    CommissionFee,
    DeliveryFee,
    CouponPrice,
    ServiceFee,
    Tips,
    PaidAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum OrderDetails {
    Table,
    Id,
    OrderId,
    OriginPrice,
    Quantity,
    Discount,
    TotalPrice,
}

#[derive(DeriveIden)]
enum Bookings {
    Table,
    Id,
    UserId,
    ShopId,
    Status,
    Currency,
    TotalPrice,
    TotalDiscount,
    TotalTax,
    CommissionFee,
    DeliveryFee,
    CouponPrice,
    ServiceFee,
    Tips,
    PaidAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum BookingExtraTimes {
    Table,
    Id,
    BookingId,
    OriginPrice,
    Quantity,
    Discount,
    TotalPrice,
}
