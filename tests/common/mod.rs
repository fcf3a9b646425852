//! Test helpers shared by the integration suites.

#![allow(dead_code)]

use sea_orm::{Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;

use modelforge::migrations::Migrator;
use modelforge::services::identity::{self, UserWithRole};
use modelforge::services::registry;

/// Create an in-memory SQLite database with migrations applied. The
/// seed migration provides the Admin/Viewer roles, the permission
/// catalog, and the system User/Role model definitions.
pub async fn create_test_db() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:")
        .await
        .expect("Failed to create test database");

    Migrator::up(&db, None)
        .await
        .expect("Failed to run test migrations");

    db
}

/// Create a user with the given role and return it with the role
/// resolved.
pub async fn create_user(
    db: &DatabaseConnection,
    email: &str,
    role_name: &str,
) -> UserWithRole {
    identity::register_user(db, email, "passw0rd", None, Some(role_name))
        .await
        .expect("register_user failed");
    identity::find_user_by_email(db, email)
        .await
        .unwrap()
        .expect("user not found after registration")
}

pub async fn admin_user(db: &DatabaseConnection) -> UserWithRole {
    create_user(db, "admin@test.local", "Admin").await
}

pub async fn viewer_user(db: &DatabaseConnection) -> UserWithRole {
    create_user(db, "viewer@test.local", "Viewer").await
}

/// Create a draft model from a plain `{fields: [...]}` schema
pub async fn create_draft(
    db: &DatabaseConnection,
    name: &str,
    json: serde_json::Value,
) -> modelforge::models::model_definition::Model {
    registry::create_model(
        db,
        None,
        registry::CreateModelInput {
            name: name.to_string(),
            table_name: None,
            owner_field: None,
            json,
        },
    )
    .await
    .expect("create_model failed")
}

/// Create and immediately publish a model, writing its artifact into
/// `dir`.
pub async fn publish_model(
    db: &DatabaseConnection,
    dir: &std::path::Path,
    name: &str,
    json: serde_json::Value,
) -> modelforge::models::model_definition::Model {
    let draft = create_draft(db, name, json).await;
    registry::publish_model(db, dir, None, &draft.id)
        .await
        .expect("publish_model failed")
}
