//! Migration to create the consent_records table.
//!
//! Append-only history of the scopes a user approved, one row per grant.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ConsentRecords::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ConsentRecords::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ConsentRecords::IntegrationId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ConsentRecords::Scopes)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ConsentRecords::GrantedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_consent_records_integration_id")
                            .from(ConsentRecords::Table, ConsentRecords::IntegrationId)
                            .to(Integrations::Table, Integrations::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_consent_records_integration_id")
                    .table(ConsentRecords::Table)
                    .col(ConsentRecords::IntegrationId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_consent_records_integration_id")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(ConsentRecords::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ConsentRecords {
    Table,
    Id,
    IntegrationId,
    Scopes,
    GrantedAt,
}

#[derive(DeriveIden)]
enum Integrations {
    Table,
    Id,
}
