use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(UserOrderStats::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(UserOrderStats::UserId)
                            .big_integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(UserOrderStats::OrderCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(UserOrderStats::TotalSpent)
                            .decimal_len(20, 4)
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(UserOrderStats::PaidCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(UserOrderStats::PaidTotal)
                            .decimal_len(20, 4)
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(UserOrderStats::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(UserOrderStats::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum UserOrderStats {
    Table,
    UserId,
    OrderCount,
    TotalSpent,
    PaidCount,
    PaidTotal,
    UpdatedAt,
}
