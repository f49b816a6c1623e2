//! Migration to create the user_customers join table.
//!
//! The composite primary key guarantees at most one grant per
//! `(user_id, customer_id)` pair.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(UserCustomers::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(UserCustomers::UserId).uuid().not_null())
                    .col(ColumnDef::new(UserCustomers::CustomerId).uuid().not_null())
                    .col(
                        ColumnDef::new(UserCustomers::AssignedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .primary_key(
                        Index::create()
                            .name("pk_user_customers")
                            .col(UserCustomers::UserId)
                            .col(UserCustomers::CustomerId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_user_customers_user_id")
                            .from(UserCustomers::Table, UserCustomers::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_user_customers_customer_id")
                            .from(UserCustomers::Table, UserCustomers::CustomerId)
                            .to(Customers::Table, Customers::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_user_customers_customer_id")
                    .table(UserCustomers::Table)
                    .col(UserCustomers::CustomerId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_user_customers_customer_id")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(UserCustomers::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum UserCustomers {
    Table,
    UserId,
    CustomerId,
    AssignedAt,
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum Customers {
    Table,
    Id,
}
