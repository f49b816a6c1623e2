//! Migration to create the applications catalog table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Applications::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Applications::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Applications::Name).text().not_null())
                    .col(ColumnDef::new(Applications::Publisher).text().not_null())
                    .col(ColumnDef::new(Applications::GithubRepoName).text().null())
                    .col(ColumnDef::new(Applications::GithubUrl).text().null())
                    .col(
                        ColumnDef::new(Applications::LatestReleaseVersion)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Applications::LatestReleaseDate)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Applications::LatestPrereleaseVersion)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Applications::LatestPrereleaseDate)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Applications::LogoBase64).text().null())
                    .col(ColumnDef::new(Applications::IdRanges).json_binary().null())
                    .col(
                        ColumnDef::new(Applications::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Applications::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_applications_github_repo_name")
                    .table(Applications::Table)
                    .col(Applications::GithubRepoName)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_applications_github_repo_name")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(Applications::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Applications {
    Table,
    Id,
    Name,
    Publisher,
    GithubRepoName,
    GithubUrl,
    LatestReleaseVersion,
    LatestReleaseDate,
    LatestPrereleaseVersion,
    LatestPrereleaseDate,
    LogoBase64,
    IdRanges,
    CreatedAt,
    UpdatedAt,
}
