//! Migration to create the token_records table.
//!
//! Each integration owns at most one current token pair. Token material is
//! stored only as AES-GCM ciphertext; cascade delete ties the record's
//! lifetime to its integration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(TokenRecords::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TokenRecords::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(TokenRecords::IntegrationId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TokenRecords::AccessTokenCiphertext)
                            .binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TokenRecords::RefreshTokenCiphertext)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(TokenRecords::TokenType)
                            .text()
                            .not_null()
                            .default("Bearer"),
                    )
                    .col(
                        ColumnDef::new(TokenRecords::ExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(TokenRecords::GrantedScope).text().null())
                    .col(
                        ColumnDef::new(TokenRecords::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(TokenRecords::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_token_records_integration_id")
                            .from(TokenRecords::Table, TokenRecords::IntegrationId)
                            .to(Integrations::Table, Integrations::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // One current token pair per integration
        manager
            .create_index(
                Index::create()
                    .name("idx_token_records_integration_id")
                    .table(TokenRecords::Table)
                    .col(TokenRecords::IntegrationId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Index on expires_at for the proactive refresh sweep
        manager
            .create_index(
                Index::create()
                    .name("idx_token_records_expires_at")
                    .table(TokenRecords::Table)
                    .col(TokenRecords::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_token_records_integration_id")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(Index::drop().name("idx_token_records_expires_at").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(TokenRecords::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum TokenRecords {
    Table,
    Id,
    IntegrationId,
    AccessTokenCiphertext,
    RefreshTokenCiphertext,
    TokenType,
    ExpiresAt,
    GrantedScope,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Integrations {
    Table,
    Id,
}
