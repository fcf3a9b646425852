//! Migration: Create model_versions table

use sea_orm_migration::prelude::*;

use super::m20250601_000006_create_model_definitions::ModelDefinitions;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ModelVersions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ModelVersions::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ModelVersions::ModelId).string().not_null())
                    .col(
                        ColumnDef::new(ModelVersions::VersionNumber)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ModelVersions::Json).json().not_null())
                    .col(ColumnDef::new(ModelVersions::CreatedBy).big_integer())
                    .col(
                        ColumnDef::new(ModelVersions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(ModelVersions::Table, ModelVersions::ModelId)
                            .to(ModelDefinitions::Table, ModelDefinitions::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_model_versions_model")
                    .table(ModelVersions::Table)
                    .col(ModelVersions::ModelId)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_model_versions_unique")
                    .table(ModelVersions::Table)
                    .col(ModelVersions::ModelId)
                    .col(ModelVersions::VersionNumber)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(
                Table::drop()
                    .table(ModelVersions::Table)
                    .if_exists()
                    .to_owned(),
            )
            .await
    }
}

#[derive(Iden)]
#[iden = "model_versions"]
pub enum ModelVersions {
    Table,
    Id,
    #[iden = "model_id"]
    ModelId,
    #[iden = "version_number"]
    VersionNumber,
    Json,
    #[iden = "created_by"]
    CreatedBy,
    #[iden = "created_at"]
    CreatedAt,
}
