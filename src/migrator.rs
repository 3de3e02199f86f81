use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250201_000001_create_sales_table::Migration),
            Box::new(m20250201_000002_create_transactions_table::Migration),
            Box::new(m20250201_000003_create_mpesa_payments_table::Migration),
        ]
    }
}

// Migration implementations

mod m20250201_000001_create_sales_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250201_000001_create_sales_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Sales ledger the payment reconciler settles against
            manager
                .create_table(
                    Table::create()
                        .table(Sales::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Sales::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Sales::InvoiceNumber).string().null())
                        .col(ColumnDef::new(Sales::StoreId).uuid().not_null())
                        .col(ColumnDef::new(Sales::ContactId).uuid().null())
                        .col(ColumnDef::new(Sales::SaleDate).timestamp_with_time_zone().not_null())
                        .col(
                            ColumnDef::new(Sales::TotalAmount)
                                .decimal_len(12, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Sales::Discount)
                                .decimal_len(12, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Sales::AmountReceived)
                                .decimal_len(12, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Sales::Status).string().not_null())
                        .col(ColumnDef::new(Sales::PaymentStatus).string().not_null())
                        .col(ColumnDef::new(Sales::Note).text().null())
                        .col(ColumnDef::new(Sales::CreatedAt).timestamp_with_time_zone().not_null())
                        .col(ColumnDef::new(Sales::UpdatedAt).timestamp_with_time_zone().null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx-sales-invoice-number")
                        .table(Sales::Table)
                        .col(Sales::InvoiceNumber)
                        .to_owned(),
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Sales::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    pub enum Sales {
        Table,
        Id,
        InvoiceNumber,
        StoreId,
        ContactId,
        SaleDate,
        TotalAmount,
        Discount,
        AmountReceived,
        Status,
        PaymentStatus,
        Note,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20250201_000002_create_transactions_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250201_000002_create_transactions_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // One row per confirmed payment event, written by the reconciler
            manager
                .create_table(
                    Table::create()
                        .table(Transactions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Transactions::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Transactions::SaleId).uuid().null())
                        .col(ColumnDef::new(Transactions::StoreId).uuid().not_null())
                        .col(ColumnDef::new(Transactions::ContactId).uuid().null())
                        .col(
                            ColumnDef::new(Transactions::TransactionDate)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Transactions::Amount)
                                .decimal_len(12, 2)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Transactions::PaymentMethod)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Transactions::TransactionType).string().null())
                        .col(ColumnDef::new(Transactions::Note).text().null())
                        .col(
                            ColumnDef::new(Transactions::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Transactions::UpdatedAt).timestamp_with_time_zone().null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk-transactions-sale-id")
                                .from(Transactions::Table, Transactions::SaleId)
                                .to(
                                    super::m20250201_000001_create_sales_table::Sales::Table,
                                    super::m20250201_000001_create_sales_table::Sales::Id,
                                )
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx-transactions-sale-id")
                        .table(Transactions::Table)
                        .col(Transactions::SaleId)
                        .to_owned(),
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Transactions::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    pub enum Transactions {
        Table,
        Id,
        SaleId,
        StoreId,
        ContactId,
        TransactionDate,
        Amount,
        PaymentMethod,
        TransactionType,
        Note,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20250201_000003_create_mpesa_payments_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250201_000003_create_mpesa_payments_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Durable record of every push-payment request; rows are never deleted
            manager
                .create_table(
                    Table::create()
                        .table(MpesaPayments::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(MpesaPayments::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(MpesaPayments::SaleId).uuid().null())
                        .col(ColumnDef::new(MpesaPayments::Phone).string().null())
                        .col(
                            ColumnDef::new(MpesaPayments::Amount)
                                .decimal_len(12, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(MpesaPayments::Status).string().not_null())
                        .col(
                            ColumnDef::new(MpesaPayments::MerchantRequestId)
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(MpesaPayments::CheckoutRequestId)
                                .string()
                                .null(),
                        )
                        .col(ColumnDef::new(MpesaPayments::ResultCode).string().null())
                        .col(
                            ColumnDef::new(MpesaPayments::ResultDescription)
                                .string()
                                .null(),
                        )
                        .col(ColumnDef::new(MpesaPayments::Payload).json().null())
                        .col(
                            ColumnDef::new(MpesaPayments::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(MpesaPayments::UpdatedAt).timestamp_with_time_zone().null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk-mpesa-payments-sale-id")
                                .from(MpesaPayments::Table, MpesaPayments::SaleId)
                                .to(
                                    super::m20250201_000001_create_sales_table::Sales::Table,
                                    super::m20250201_000001_create_sales_table::Sales::Id,
                                )
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            // Either correlation id is a valid lookup key for the callback
            manager
                .create_index(
                    Index::create()
                        .name("idx-mpesa-payments-merchant-request-id")
                        .table(MpesaPayments::Table)
                        .col(MpesaPayments::MerchantRequestId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx-mpesa-payments-checkout-request-id")
                        .table(MpesaPayments::Table)
                        .col(MpesaPayments::CheckoutRequestId)
                        .to_owned(),
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(MpesaPayments::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    pub enum MpesaPayments {
        Table,
        Id,
        SaleId,
        Phone,
        Amount,
        Status,
        MerchantRequestId,
        CheckoutRequestId,
        ResultCode,
        ResultDescription,
        Payload,
        CreatedAt,
        UpdatedAt,
    }
}
