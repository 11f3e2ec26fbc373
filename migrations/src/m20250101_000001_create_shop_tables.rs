use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Shops::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Shops::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Shops::UserId).big_integer().not_null())
                    .col(
                        ColumnDef::new(Shops::Tax)
                            .decimal_len(20, 4)
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Shops::Percentage)
                            .decimal_len(20, 4)
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Shops::BySubscription)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Shops::Visibility)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Shops::DeliveryPrice)
                            .decimal_len(20, 4)
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Shops::PricePerKm)
                            .decimal_len(20, 4)
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Shops::Latitude).double().null())
                    .col(ColumnDef::new(Shops::Longitude).double().null())
                    .col(
                        ColumnDef::new(Shops::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Shops::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ShopSubscriptions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ShopSubscriptions::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ShopSubscriptions::ShopId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ShopSubscriptions::OrderLimit)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ShopSubscriptions::Active)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(ShopSubscriptions::ExpiredAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_shop_subscriptions_shop_id")
                            .from(ShopSubscriptions::Table, ShopSubscriptions::ShopId)
                            .to(Shops::Table, Shops::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ShopSubscriptions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Shops::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Shops {
    Table,
    Id,
    UserId,
    Tax,
    Percentage,
    BySubscription,
    Visibility,
    DeliveryPrice,
    PricePerKm,
    Latitude,
    Longitude,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum ShopSubscriptions {
    Table,
    Id,
    ShopId,
    OrderLimit,
    Active,
    ExpiredAt,
}
