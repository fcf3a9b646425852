//! System-model dual-write tests: the User and Role models are served
//! from the identity origin tables with mirror records in the generic
//! record space, and role references are remapped between origin ids
//! and record ids at the boundary.

mod common;
use common::{admin_user, create_test_db};

use modelforge::error::AppError;
use modelforge::models::prelude::*;
use modelforge::models::record;
use modelforge::services::records::{self, ListParams};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde_json::json;

async fn resolve_system(
    db: &sea_orm::DatabaseConnection,
) -> (records::ResolvedModel, records::ResolvedModel) {
    let users = records::resolve_published_model(db, "user").await.unwrap();
    let roles = records::resolve_published_model(db, "role").await.unwrap();
    assert!(users.definition.is_system);
    assert!(roles.definition.is_system);
    (users, roles)
}

#[tokio::test]
async fn create_role_dual_writes_origin_and_mirror() {
    let db = create_test_db().await;
    let actor = admin_user(&db).await;
    let (_, roles_model) = resolve_system(&db).await;

    let view = records::create_record(
        &db,
        &roles_model,
        json!({"name": "Editor", "description": "Can edit"}),
        &actor,
    )
    .await
    .unwrap();

    // Origin row exists
    let origin = modelforge::services::identity::find_role_by_name(&db, "Editor")
        .await
        .unwrap()
        .expect("origin role row");

    // Mirror record mirrors the origin id and carries the origin marker
    assert_eq!(view.data["id"], json!(origin.id));
    assert_eq!(view.data["_origin"]["table"], "roles");
    assert_eq!(view.data["_origin"]["id"], json!(origin.id));
    assert_ne!(view.id, origin.id.to_string(), "record id != origin id");
}

#[tokio::test]
async fn create_user_accepts_role_record_id_and_strips_password() {
    let db = create_test_db().await;
    let actor = admin_user(&db).await;
    let (users_model, roles_model) = resolve_system(&db).await;

    // Mirror the Viewer role so a role-record id exists
    let viewer_origin = modelforge::services::identity::find_role_by_name(&db, "Viewer")
        .await
        .unwrap()
        .unwrap();
    let viewer_record = records::create_record(
        &db,
        &roles_model,
        json!({"name": "Support", "description": "support desk"}),
        &actor,
    )
    .await
    .unwrap();

    // Create a user whose roleId is the role-record id
    let bob = records::create_record(
        &db,
        &users_model,
        json!({
            "name": "Bob",
            "email": "bob@x",
            "password": "p",
            "roleId": viewer_record.id,
        }),
        &actor,
    )
    .await
    .unwrap();

    // Origin user row holds the origin role id
    let origin = modelforge::services::identity::find_user_by_email(&db, "bob@x")
        .await
        .unwrap()
        .expect("origin user row");
    let support_origin = modelforge::services::identity::find_role_by_name(&db, "Support")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(origin.user.role_id, support_origin.id);
    assert_ne!(origin.user.role_id, viewer_origin.id);

    // Mirror: data.id mirrors the origin id, no password anywhere
    assert_eq!(bob.data["id"], json!(origin.user.id));
    assert!(bob.data.get("password").is_none());

    let mirror = Record::find_by_id(&bob.id).one(&db).await.unwrap().unwrap();
    assert!(mirror.data.get("password").is_none());

    // Read back: roleId is remapped to the role-record id
    let fetched = records::get_record(&db, &users_model, &origin.user.id.to_string())
        .await
        .unwrap();
    assert_eq!(fetched.data["roleId"], json!(viewer_record.id));
}

#[tokio::test]
async fn get_accepts_origin_id_or_record_id() {
    let db = create_test_db().await;
    let actor = admin_user(&db).await;
    let (users_model, _) = resolve_system(&db).await;

    let created = records::create_record(
        &db,
        &users_model,
        json!({"email": "carol@x", "password": "p"}),
        &actor,
    )
    .await
    .unwrap();

    let origin_id = created.data["id"].as_i64().unwrap();

    let by_origin = records::get_record(&db, &users_model, &origin_id.to_string())
        .await
        .unwrap();
    let by_record = records::get_record(&db, &users_model, &created.id).await.unwrap();
    assert_eq!(by_origin.data["email"], by_record.data["email"]);
}

#[tokio::test]
async fn update_via_record_id_updates_origin_and_mirror() {
    let db = create_test_db().await;
    let actor = admin_user(&db).await;
    let (users_model, _) = resolve_system(&db).await;

    let created = records::create_record(
        &db,
        &users_model,
        json!({"email": "dave@x", "password": "p", "name": "Dave"}),
        &actor,
    )
    .await
    .unwrap();

    records::update_record(
        &db,
        &users_model,
        &created.id,
        json!({"name": "David", "password": "new-secret"}),
        &actor,
    )
    .await
    .unwrap();

    let origin = modelforge::services::identity::find_user_by_email(&db, "dave@x")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(origin.user.name.as_deref(), Some("David"));

    let mirror = Record::find_by_id(&created.id).one(&db).await.unwrap().unwrap();
    assert_eq!(mirror.data["name"], "David");
    assert!(mirror.data.get("password").is_none());
}

#[tokio::test]
async fn delete_removes_origin_and_all_mirrors() {
    let db = create_test_db().await;
    let actor = admin_user(&db).await;
    let (users_model, _) = resolve_system(&db).await;

    let created = records::create_record(
        &db,
        &users_model,
        json!({"email": "erin@x", "password": "p"}),
        &actor,
    )
    .await
    .unwrap();
    let origin_id = created.data["id"].as_i64().unwrap();

    records::delete_record(&db, &users_model, &created.id, &actor)
        .await
        .unwrap();

    assert!(
        modelforge::services::identity::find_user_by_email(&db, "erin@x")
            .await
            .unwrap()
            .is_none(),
        "origin row deleted"
    );

    let mirrors = Record::find()
        .filter(record::Column::ModelName.eq("User"))
        .all(&db)
        .await
        .unwrap();
    let stale: Vec<_> = mirrors
        .iter()
        .filter(|r| r.data["id"] == json!(origin_id))
        .collect();
    assert!(stale.is_empty(), "no mirror outlives its origin");
}

#[tokio::test]
async fn list_reads_from_origin_table() {
    let db = create_test_db().await;
    let actor = admin_user(&db).await;
    let (users_model, _) = resolve_system(&db).await;

    // One user created through the dual-write path, one directly in the
    // identity store (no mirror exists for the latter).
    records::create_record(
        &db,
        &users_model,
        json!({"email": "frank@x", "password": "p"}),
        &actor,
    )
    .await
    .unwrap();

    let (items, total) = records::list_records(
        &db,
        &users_model,
        &ListParams {
            limit: 20,
            skip: 0,
            owner_only: false,
        },
        &actor,
    )
    .await
    .unwrap();

    // admin (identity-only) + frank (dual-write)
    assert_eq!(total, 2);
    assert_eq!(items.len(), 2);
    for item in &items {
        assert!(item.data.get("email").is_some());
        assert!(item.data.get("password").is_none());
    }
}

#[tokio::test]
async fn system_user_requires_email() {
    let db = create_test_db().await;
    let actor = admin_user(&db).await;
    let (users_model, _) = resolve_system(&db).await;

    let err = records::create_record(&db, &users_model, json!({"name": "NoMail"}), &actor)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
}

#[tokio::test]
async fn duplicate_system_user_email_conflicts() {
    let db = create_test_db().await;
    let actor = admin_user(&db).await;
    let (users_model, _) = resolve_system(&db).await;

    records::create_record(
        &db,
        &users_model,
        json!({"email": "gina@x", "password": "p"}),
        &actor,
    )
    .await
    .unwrap();

    let err = records::create_record(
        &db,
        &users_model,
        json!({"email": "gina@x", "password": "p"}),
        &actor,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Conflict { .. }));
}
