//! Migration to create the audit_entries table.
//!
//! Append-only log of every credential-affecting action. No foreign key to
//! integrations: audit rows must survive administrative deletion, and failed
//! pre-integration attempts have no integration id at all.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AuditEntries::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AuditEntries::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(AuditEntries::Actor).text().not_null())
                    .col(ColumnDef::new(AuditEntries::IntegrationId).uuid().null())
                    .col(ColumnDef::new(AuditEntries::Provider).text().null())
                    .col(ColumnDef::new(AuditEntries::Action).text().not_null())
                    .col(ColumnDef::new(AuditEntries::Outcome).text().not_null())
                    .col(ColumnDef::new(AuditEntries::Metadata).json_binary().null())
                    .col(
                        ColumnDef::new(AuditEntries::CreatedAt)
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
                    .name("idx_audit_entries_integration_id")
                    .table(AuditEntries::Table)
                    .col(AuditEntries::IntegrationId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_audit_entries_created_at")
                    .table(AuditEntries::Table)
                    .col(AuditEntries::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_audit_entries_integration_id")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(Index::drop().name("idx_audit_entries_created_at").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(AuditEntries::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum AuditEntries {
    Table,
    Id,
    Actor,
    IntegrationId,
    Provider,
    Action,
    Outcome,
    Metadata,
    CreatedAt,
}
