use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Payments::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Payments::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Payments::Tag)
                            .string_len(32)
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(Payments::Active)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Payments::Sandbox)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(PaymentPayloads::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PaymentPayloads::PaymentId)
                            .big_integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(PaymentPayloads::Payload).json().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_payment_payloads_payment_id")
                            .from(PaymentPayloads::Table, PaymentPayloads::PaymentId)
                            .to(Payments::Table, Payments::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(PaymentProcesses::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PaymentProcesses::Id)
                            .string_len(191)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(PaymentProcesses::UserId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PaymentProcesses::ModelType)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PaymentProcesses::ModelId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(PaymentProcesses::Data).json().not_null())
                    .col(
                        ColumnDef::new(PaymentProcesses::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PaymentProcesses::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_payment_processes_owner_model")
                    .table(PaymentProcesses::Table)
                    .col(PaymentProcesses::UserId)
                    .col(PaymentProcesses::ModelType)
                    .col(PaymentProcesses::ModelId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Transactions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Transactions::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Transactions::PayableType)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Transactions::PayableId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Transactions::UserId).big_integer().not_null())
                    .col(
                        ColumnDef::new(Transactions::PaymentSysId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Transactions::PaymentTrxId)
                            .string_len(191)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Transactions::Price)
                            .decimal_len(20, 4)
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Transactions::Status)
                            .string_len(16)
                            .not_null()
                            .default("progress"),
                    )
                    .col(ColumnDef::new(Transactions::Note).text().null())
                    .col(
                        ColumnDef::new(Transactions::PerformTime)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Transactions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Transactions::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_transactions_payment_sys_id")
                            .from(Transactions::Table, Transactions::PaymentSysId)
                            .to(Payments::Table, Payments::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_transactions_payable")
                    .table(Transactions::Table)
                    .col(Transactions::PayableType)
                    .col(Transactions::PayableId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_transactions_provider_token")
                    .table(Transactions::Table)
                    .col(Transactions::PaymentSysId)
                    .col(Transactions::PaymentTrxId)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Transactions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(PaymentProcesses::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(PaymentPayloads::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Payments::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Payments {
    Table,
    Id,
    Tag,
    Active,
    Sandbox,
}

#[derive(DeriveIden)]
enum PaymentPayloads {
    Table,
    PaymentId,
    Payload,
}

#[derive(DeriveIden)]
enum PaymentProcesses {
    Table,
    Id,
    UserId,
    ModelType,
    ModelId,
    Data,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Transactions {
    Table,
    Id,
    PayableType,
    PayableId,
    UserId,
    PaymentSysId,
    PaymentTrxId,
    Price,
    Status,
    Note,
    PerformTime,
    CreatedAt,
    UpdatedAt,
}
