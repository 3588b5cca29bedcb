//! Migration to create the integrations table.
//!
//! An integration is one (user, provider) delegated-access relationship.
//! Superseded rows are status-flipped, never deleted, so the table carries
//! the full connection history for a user.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Integrations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Integrations::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Integrations::UserId).uuid().not_null())
                    .col(ColumnDef::new(Integrations::Provider).text().not_null())
                    .col(
                        ColumnDef::new(Integrations::ProviderAccountId)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Integrations::Status)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(Integrations::GrantedScopes)
                            .json_binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Integrations::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Integrations::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Integrations::LastRefreshedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Index on user_id for listing a user's integrations
        manager
            .create_index(
                Index::create()
                    .name("idx_integrations_user_id")
                    .table(Integrations::Table)
                    .col(Integrations::UserId)
                    .to_owned(),
            )
            .await?;

        // Composite index backing the "at most one active per (user, provider)"
        // lookups done on every begin/callback/refresh
        manager
            .create_index(
                Index::create()
                    .name("idx_integrations_user_provider_status")
                    .table(Integrations::Table)
                    .col(Integrations::UserId)
                    .col(Integrations::Provider)
                    .col(Integrations::Status)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_integrations_user_provider_status")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(Index::drop().name("idx_integrations_user_id").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Integrations::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Integrations {
    Table,
    Id,
    UserId,
    Provider,
    ProviderAccountId,
    Status,
    GrantedScopes,
    CreatedAt,
    UpdatedAt,
    LastRefreshedAt,
}
