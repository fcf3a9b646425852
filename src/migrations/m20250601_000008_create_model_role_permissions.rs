//! Migration: Create model_role_permissions table

use sea_orm_migration::prelude::*;

use super::m20250601_000001_create_roles::Roles;
use super::m20250601_000003_create_permissions::Permissions;
use super::m20250601_000006_create_model_definitions::ModelDefinitions;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ModelRolePermissions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ModelRolePermissions::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ModelRolePermissions::ModelId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ModelRolePermissions::RoleId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ModelRolePermissions::PermissionId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ModelRolePermissions::Allowed)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(ModelRolePermissions::Table, ModelRolePermissions::ModelId)
                            .to(ModelDefinitions::Table, ModelDefinitions::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(ModelRolePermissions::Table, ModelRolePermissions::RoleId)
                            .to(Roles::Table, Roles::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(
                                ModelRolePermissions::Table,
                                ModelRolePermissions::PermissionId,
                            )
                            .to(Permissions::Table, Permissions::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_model_role_permissions_unique")
                    .table(ModelRolePermissions::Table)
                    .col(ModelRolePermissions::ModelId)
                    .col(ModelRolePermissions::RoleId)
                    .col(ModelRolePermissions::PermissionId)
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
                    .table(ModelRolePermissions::Table)
                    .if_exists()
                    .to_owned(),
            )
            .await
    }
}

#[derive(Iden)]
#[iden = "model_role_permissions"]
pub enum ModelRolePermissions {
    Table,
    Id,
    #[iden = "model_id"]
    ModelId,
    #[iden = "role_id"]
    RoleId,
    #[iden = "permission_id"]
    PermissionId,
    Allowed,
}
