pub use sea_orm_migration::prelude::*;

mod m20250101_000001_create_shop_tables;
mod m20250101_000002_create_chargeable_tables;
mod m20250101_000003_create_coupon_tables;
mod m20250101_000004_create_payment_tables;
mod m20250101_000005_create_user_order_stats_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250101_000001_create_shop_tables::Migration),
            Box::new(m20250101_000002_create_chargeable_tables::Migration),
            Box::new(m20250101_000003_create_coupon_tables::Migration),
            Box::new(m20250101_000004_create_payment_tables::Migration),
            Box::new(m20250101_000005_create_user_order_stats_table::Migration),
        ]
    }
}
