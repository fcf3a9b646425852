//! Migration: Create records table

use sea_orm_migration::prelude::*;

use super::m20250601_000002_create_users::Users;
use super::m20250601_000006_create_model_definitions::ModelDefinitions;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Records::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Records::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Records::ModelId).string().not_null())
                    .col(ColumnDef::new(Records::ModelName).string().not_null())
                    .col(ColumnDef::new(Records::ModelVersionId).string())
                    .col(ColumnDef::new(Records::Data).json().not_null())
                    .col(ColumnDef::new(Records::OwnerId).big_integer())
                    .col(
                        ColumnDef::new(Records::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Records::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Records::DeletedAt).timestamp_with_time_zone())
                    .foreign_key(
                        ForeignKey::create()
                            .from(Records::Table, Records::ModelId)
                            .to(ModelDefinitions::Table, ModelDefinitions::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(Records::Table, Records::OwnerId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        for (name, col) in [
            ("idx_records_model", Records::ModelId),
            ("idx_records_model_name", Records::ModelName),
            ("idx_records_owner", Records::OwnerId),
            ("idx_records_model_version", Records::ModelVersionId),
        ] {
            manager
                .create_index(
                    Index::create()
                        .name(name)
                        .table(Records::Table)
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
            .drop_table(Table::drop().table(Records::Table).if_exists().to_owned())
            .await
    }
}

#[derive(Iden, Clone, Copy)]
#[iden = "records"]
pub enum Records {
    Table,
    Id,
    #[iden = "model_id"]
    ModelId,
    #[iden = "model_name"]
    ModelName,
    #[iden = "model_version_id"]
    ModelVersionId,
    Data,
    #[iden = "owner_id"]
    OwnerId,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
    #[iden = "deleted_at"]
    DeletedAt,
}
