//! Migration to create the installed_apps table.
//!
//! Rows are keyed by `(tenant_id, environment_name, id)` and removed together
//! with their environment.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(InstalledApps::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(InstalledApps::TenantId).uuid().not_null())
                    .col(ColumnDef::new(InstalledApps::EnvironmentName).text().not_null())
                    .col(ColumnDef::new(InstalledApps::Id).uuid().not_null())
                    .col(ColumnDef::new(InstalledApps::Name).text().not_null())
                    .col(ColumnDef::new(InstalledApps::Version).text().not_null())
                    .col(ColumnDef::new(InstalledApps::Publisher).text().not_null())
                    .col(ColumnDef::new(InstalledApps::PublishedAs).text().null())
                    .col(ColumnDef::new(InstalledApps::State).text().null())
                    .primary_key(
                        Index::create()
                            .name("pk_installed_apps")
                            .col(InstalledApps::TenantId)
                            .col(InstalledApps::EnvironmentName)
                            .col(InstalledApps::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_installed_apps_environment")
                            .from(
                                InstalledApps::Table,
                                (InstalledApps::TenantId, InstalledApps::EnvironmentName),
                            )
                            .to(
                                Environments::Table,
                                (Environments::TenantId, Environments::Name),
                            )
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Lookup of every installation of a catalog application
        manager
            .create_index(
                Index::create()
                    .name("idx_installed_apps_id")
                    .table(InstalledApps::Table)
                    .col(InstalledApps::Id)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_installed_apps_id").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(InstalledApps::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum InstalledApps {
    Table,
    TenantId,
    EnvironmentName,
    Id,
    Name,
    Version,
    Publisher,
    PublishedAs,
    State,
}

#[derive(DeriveIden)]
enum Environments {
    Table,
    TenantId,
    Name,
}
