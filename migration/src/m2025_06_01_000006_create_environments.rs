//! Migration to create the environments table.
//!
//! An environment is identified by its name within a tenant.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Environments::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Environments::TenantId).uuid().not_null())
                    .col(ColumnDef::new(Environments::Name).text().not_null())
                    .col(ColumnDef::new(Environments::Type).text().not_null())
                    .col(ColumnDef::new(Environments::Status).text().not_null())
                    .col(ColumnDef::new(Environments::WebClientUrl).text().null())
                    .col(ColumnDef::new(Environments::LocationName).text().null())
                    .col(ColumnDef::new(Environments::ApplicationVersion).text().null())
                    .col(ColumnDef::new(Environments::PlatformVersion).text().null())
                    .primary_key(
                        Index::create()
                            .name("pk_environments")
                            .col(Environments::TenantId)
                            .col(Environments::Name),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_environments_tenant_id")
                            .from(Environments::Table, Environments::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Environments::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Environments {
    Table,
    TenantId,
    Name,
    Type,
    Status,
    WebClientUrl,
    LocationName,
    ApplicationVersion,
    PlatformVersion,
}

#[derive(DeriveIden)]
enum Tenants {
    Table,
    Id,
}
