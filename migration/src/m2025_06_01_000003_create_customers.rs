//! Migration to create the customers table.
//!
//! The infrastructure column keeps its historical `infraestructure_type`
//! spelling so existing databases line up with the entity.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Customers::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Customers::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Customers::CustomerName).text().not_null())
                    .col(ColumnDef::new(Customers::ImageBase64).text().null())
                    .col(
                        ColumnDef::new(Customers::InfraestructureType)
                            .text()
                            .not_null()
                            .default("Saas"),
                    )
                    .col(ColumnDef::new(Customers::Description).text().null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_customers_customer_name")
                    .table(Customers::Table)
                    .col(Customers::CustomerName)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_customers_customer_name").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Customers::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Customers {
    Table,
    Id,
    CustomerName,
    ImageBase64,
    InfraestructureType,
    Description,
}
