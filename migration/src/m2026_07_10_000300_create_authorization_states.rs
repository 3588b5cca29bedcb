//! Migration to create the authorization_states table.
//!
//! Short-lived, single-use rows binding a CSRF nonce to the user, provider,
//! requested scopes and redirect target of an in-flight authorization.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AuthorizationStates::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AuthorizationStates::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(AuthorizationStates::UserId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AuthorizationStates::Provider)
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(AuthorizationStates::State).text().not_null())
                    .col(
                        ColumnDef::new(AuthorizationStates::RequestedScopes)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AuthorizationStates::RedirectUri)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AuthorizationStates::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(AuthorizationStates::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // The nonce is the lookup key for consume and must be unique
        manager
            .create_index(
                Index::create()
                    .name("idx_authorization_states_state")
                    .table(AuthorizationStates::Table)
                    .col(AuthorizationStates::State)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Index on expires_at for the cleanup sweep
        manager
            .create_index(
                Index::create()
                    .name("idx_authorization_states_expires_at")
                    .table(AuthorizationStates::Table)
                    .col(AuthorizationStates::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_authorization_states_state")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_authorization_states_expires_at")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(AuthorizationStates::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum AuthorizationStates {
    Table,
    Id,
    UserId,
    Provider,
    State,
    RequestedScopes,
    RedirectUri,
    CreatedAt,
    ExpiresAt,
}
