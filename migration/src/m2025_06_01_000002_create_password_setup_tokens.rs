//! Migration to create the password_setup_tokens table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PasswordSetupTokens::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PasswordSetupTokens::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(PasswordSetupTokens::Token).text().not_null())
                    .col(ColumnDef::new(PasswordSetupTokens::UserId).uuid().not_null())
                    .col(
                        ColumnDef::new(PasswordSetupTokens::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PasswordSetupTokens::UsedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PasswordSetupTokens::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_password_setup_tokens_user_id")
                            .from(PasswordSetupTokens::Table, PasswordSetupTokens::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_password_setup_tokens_token")
                    .table(PasswordSetupTokens::Table)
                    .col(PasswordSetupTokens::Token)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_password_setup_tokens_user_id")
                    .table(PasswordSetupTokens::Table)
                    .col(PasswordSetupTokens::UserId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_password_setup_tokens_token")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_password_setup_tokens_user_id")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(PasswordSetupTokens::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum PasswordSetupTokens {
    Table,
    Id,
    Token,
    UserId,
    ExpiresAt,
    UsedAt,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
}
