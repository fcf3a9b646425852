//! Migration: Create audit_logs table

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AuditLogs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AuditLogs::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(AuditLogs::UserId).big_integer())
                    .col(ColumnDef::new(AuditLogs::Action).string().not_null())
                    .col(ColumnDef::new(AuditLogs::ModelId).string())
                    .col(ColumnDef::new(AuditLogs::ModelName).string())
                    .col(ColumnDef::new(AuditLogs::RecordId).string())
                    .col(ColumnDef::new(AuditLogs::Details).json())
                    .col(
                        ColumnDef::new(AuditLogs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        for (name, col) in [
            ("idx_audit_logs_user", AuditLogs::UserId),
            ("idx_audit_logs_model", AuditLogs::ModelId),
            ("idx_audit_logs_created", AuditLogs::CreatedAt),
        ] {
            manager
                .create_index(
                    Index::create()
                        .name(name)
                        .table(AuditLogs::Table)
                        .col(col)
                        .if_not_exists()
                        .to_owned(),
                )
                .await?;
        }

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(AuditLogs::Table).if_exists().to_owned())
            .await
    }
}

#[derive(Iden, Clone, Copy)]
#[iden = "audit_logs"]
pub enum AuditLogs {
    Table,
    Id,
    #[iden = "user_id"]
    UserId,
    Action,
    #[iden = "model_id"]
    ModelId,
    #[iden = "model_name"]
    ModelName,
    #[iden = "record_id"]
    RecordId,
    Details,
    #[iden = "created_at"]
    CreatedAt,
}
