//! Migration: Seed default roles, the permission catalog, and the
//! protected system model definitions (User, Role).

use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::{ActiveModelTrait, EntityTrait, PaginatorTrait, Set};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();

        seed_roles(db).await?;
        seed_permissions(db).await?;
        seed_system_models(db).await?;

        Ok(())
    }

    async fn down(&self, _manager: &SchemaManager) -> Result<(), DbErr> {
        // Seeding is not reversible - data may have been modified
        Ok(())
    }
}

async fn seed_roles(db: &SchemaManagerConnection<'_>) -> Result<(), DbErr> {
    use crate::models::prelude::*;
    use crate::models::role;

    let role_count = Role::find().count(db).await?;
    if role_count > 0 {
        return Ok(());
    }

    let now = chrono::Utc::now();

    let default_roles = [
        ("Admin", "Full administrator access"),
        ("Viewer", "Default role for new accounts"),
    ];

    for (name, description) in default_roles {
        let new_role = role::ActiveModel {
            name: Set(name.to_string()),
            description: Set(Some(description.to_string())),
            created_at: Set(now),
            ..Default::default()
        };
        new_role.insert(db).await?;
    }

    Ok(())
}

async fn seed_permissions(db: &SchemaManagerConnection<'_>) -> Result<(), DbErr> {
    use crate::models::permission;
    use crate::models::prelude::*;

    let count = Permission::find().count(db).await?;
    if count > 0 {
        return Ok(());
    }

    let catalog = [
        ("MODEL.CREATE", "Create records", permission::CATEGORY_MODEL_ACTION),
        ("MODEL.READ", "Read records", permission::CATEGORY_MODEL_ACTION),
        ("MODEL.UPDATE", "Update records", permission::CATEGORY_MODEL_ACTION),
        ("MODEL.DELETE", "Delete records", permission::CATEGORY_MODEL_ACTION),
        ("CREATE_ROLE", "Create roles", permission::CATEGORY_FEATURE),
        ("CREATE_USER", "Register users", permission::CATEGORY_FEATURE),
        ("MANAGE_MODELS", "Author model definitions", permission::CATEGORY_FEATURE),
        ("PUBLISH_MODEL", "Publish and unpublish models", permission::CATEGORY_FEATURE),
        ("MANAGE_FEATURES", "Manage feature grants", permission::CATEGORY_FEATURE),
        ("VIEW_SUPPORT", "View support statistics", permission::CATEGORY_FEATURE),
        ("VIEW_AUDIT", "View the audit log", permission::CATEGORY_FEATURE),
    ];

    for (key, name, category) in catalog {
        let row = permission::ActiveModel {
            id: Set(uuid::Uuid::new_v4().to_string()),
            key: Set(key.to_string()),
            name: Set(name.to_string()),
            category: Set(category.to_string()),
        };
        row.insert(db).await?;
    }

    Ok(())
}

/// System models are published from first boot so the dynamic fabric can
/// serve /api/user and /api/role. Their schemas double as the built-in
/// field lists relation validation falls back to.
async fn seed_system_models(db: &SchemaManagerConnection<'_>) -> Result<(), DbErr> {
    use crate::models::prelude::*;
    use crate::models::{model_definition, model_version};

    let count = ModelDefinition::find().count(db).await?;
    if count > 0 {
        return Ok(());
    }

    let now = chrono::Utc::now();

    let system_models = [
        (
            "User",
            serde_json::json!({
                "fields": [
                    {"name": "id", "type": "string", "required": true, "unique": true},
                    {"name": "email", "type": "string", "required": true, "unique": true},
                    {"name": "name", "type": "string"},
                    {"name": "roleId", "type": "string"},
                    {"name": "isActive", "type": "boolean"}
                ]
            }),
        ),
        (
            "Role",
            serde_json::json!({
                "fields": [
                    {"name": "id", "type": "string", "required": true, "unique": true},
                    {"name": "name", "type": "string", "required": true, "unique": true},
                    {"name": "description", "type": "string"}
                ]
            }),
        ),
    ];

    for (name, schema) in system_models {
        let model_id = uuid::Uuid::new_v4().to_string();

        let definition = model_definition::ActiveModel {
            id: Set(model_id.clone()),
            name: Set(name.to_string()),
            table_name: Set(None),
            owner_field: Set(None),
            json: Set(schema.clone()),
            version: Set(1),
            published: Set(true),
            published_at: Set(Some(now)),
            published_by: Set(None),
            is_system: Set(true),
            file_path: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        definition.insert(db).await?;

        let version = model_version::ActiveModel {
            id: Set(uuid::Uuid::new_v4().to_string()),
            model_id: Set(model_id),
            version_number: Set(1),
            json: Set(schema),
            created_by: Set(None),
            created_at: Set(now),
        };
        version.insert(db).await?;
    }

    Ok(())
}
