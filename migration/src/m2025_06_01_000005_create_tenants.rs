//! Migration to create the tenants table.
//!
//! A tenant belongs to a customer and carries the OAuth client-credential
//! connection used to reach the tenant's admin API. `client_secret` and
//! `token` hold AES-GCM ciphertext.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Tenants::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Tenants::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Tenants::CustomerId).uuid().not_null())
                    .col(ColumnDef::new(Tenants::Description).text().null())
                    .col(
                        ColumnDef::new(Tenants::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Tenants::ModifiedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(Tenants::ConnectionId).text().null())
                    .col(
                        ColumnDef::new(Tenants::GrantType)
                            .text()
                            .not_null()
                            .default("client_credentials"),
                    )
                    .col(ColumnDef::new(Tenants::ClientId).text().null())
                    .col(ColumnDef::new(Tenants::ClientSecret).binary().null())
                    .col(ColumnDef::new(Tenants::Scope).text().null())
                    .col(ColumnDef::new(Tenants::Token).binary().null())
                    .col(
                        ColumnDef::new(Tenants::TokenExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Tenants::AuthContext).text().null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_tenants_customer_id")
                            .from(Tenants::Table, Tenants::CustomerId)
                            .to(Customers::Table, Customers::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_tenants_customer_id")
                    .table(Tenants::Table)
                    .col(Tenants::CustomerId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_tenants_token_expires_at")
                    .table(Tenants::Table)
                    .col(Tenants::TokenExpiresAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_tenants_customer_id").to_owned())
            .await?;

        manager
            .drop_index(Index::drop().name("idx_tenants_token_expires_at").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Tenants::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Tenants {
    Table,
    Id,
    CustomerId,
    Description,
    CreatedAt,
    ModifiedAt,
    ConnectionId,
    GrantType,
    ClientId,
    ClientSecret,
    Scope,
    Token,
    TokenExpiresAt,
    AuthContext,
}

#[derive(DeriveIden)]
enum Customers {
    Table,
    Id,
}
