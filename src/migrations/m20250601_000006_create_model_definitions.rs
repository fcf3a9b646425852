//! Migration: Create model_definitions table

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ModelDefinitions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ModelDefinitions::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ModelDefinitions::Name)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(ModelDefinitions::TableName).string())
                    .col(ColumnDef::new(ModelDefinitions::OwnerField).string())
                    .col(ColumnDef::new(ModelDefinitions::Json).json().not_null())
                    .col(
                        ColumnDef::new(ModelDefinitions::Version)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ModelDefinitions::Published)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(ModelDefinitions::PublishedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(ModelDefinitions::PublishedBy).big_integer())
                    .col(
                        ColumnDef::new(ModelDefinitions::IsSystem)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(ModelDefinitions::FilePath).string())
                    .col(
                        ColumnDef::new(ModelDefinitions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ModelDefinitions::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_model_definitions_name")
                    .table(ModelDefinitions::Table)
                    .col(ModelDefinitions::Name)
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
                    .table(ModelDefinitions::Table)
                    .if_exists()
                    .to_owned(),
            )
            .await
    }
}

#[derive(Iden)]
#[iden = "model_definitions"]
pub enum ModelDefinitions {
    Table,
    Id,
    Name,
    #[iden = "table_name"]
    TableName,
    #[iden = "owner_field"]
    OwnerField,
    Json,
    Version,
    Published,
    #[iden = "published_at"]
    PublishedAt,
    #[iden = "published_by"]
    PublishedBy,
    #[iden = "is_system"]
    IsSystem,
    #[iden = "file_path"]
    FilePath,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
}
