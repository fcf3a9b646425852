//! Model registry lifecycle tests: draft/publish/unpublish, version
//! contiguity, revert semantics, relation-graph validation, and system
//! model protection.

mod common;
use common::{create_draft, create_test_db, publish_model};

use modelforge::error::AppError;
use modelforge::models::prelude::*;
use modelforge::models::{model_role_permission, model_version};
use modelforge::services::{artifacts, registry};
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use serde_json::json;

fn product_schema() -> serde_json::Value {
    json!({
        "fields": [
            {"name": "name", "type": "string", "required": true},
            {"name": "price", "type": "number"}
        ]
    })
}

// ---------------------------------------------------------------------------
// Draft creation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_makes_a_draft_without_versions() {
    let db = create_test_db().await;

    let draft = create_draft(&db, "Product", product_schema()).await;

    assert_eq!(draft.version, 0);
    assert!(!draft.published);

    let versions = ModelVersion::find()
        .filter(model_version::Column::ModelId.eq(&draft.id))
        .count(&db)
        .await
        .unwrap();
    assert_eq!(versions, 0, "create must not snapshot a version");
}

#[tokio::test]
async fn create_rejects_duplicate_names() {
    let db = create_test_db().await;
    create_draft(&db, "Product", product_schema()).await;

    let err = registry::create_model(
        &db,
        None,
        registry::CreateModelInput {
            name: "Product".to_string(),
            table_name: None,
            owner_field: None,
            json: product_schema(),
        },
    )
    .await
    .unwrap_err();

    assert!(matches!(err, AppError::Conflict { .. }));
}

// ---------------------------------------------------------------------------
// Publish: versioning, artifact, rbac rows
// ---------------------------------------------------------------------------

#[tokio::test]
async fn first_publish_is_version_one_with_artifact() {
    let db = create_test_db().await;
    let dir = tempfile::tempdir().unwrap();

    let published = publish_model(&db, dir.path(), "Product", product_schema()).await;

    assert_eq!(published.version, 1);
    assert!(published.published);
    assert!(published.published_at.is_some());

    let snapshot = registry::get_version(&db, &published.id, 1).await.unwrap();
    assert_eq!(snapshot.version_number, 1);

    let artifact = artifacts::load(&artifacts::final_path(dir.path(), "Product"))
        .unwrap()
        .unwrap();
    assert_eq!(artifact.version, 1);
    assert_eq!(artifact.name, "Product");
}

#[tokio::test]
async fn publish_numbers_are_contiguous_and_monotonic() {
    let db = create_test_db().await;
    let dir = tempfile::tempdir().unwrap();

    let published = publish_model(&db, dir.path(), "Product", product_schema()).await;
    for expected in 2..=4 {
        let again = registry::publish_model(&db, dir.path(), None, &published.id)
            .await
            .unwrap();
        assert_eq!(again.version, expected);
    }

    let numbers: Vec<i32> = registry::list_versions(&db, &published.id, 50)
        .await
        .unwrap()
        .into_iter()
        .map(|v| v.version_number)
        .collect();
    assert_eq!(numbers, vec![4, 3, 2, 1], "versions 1..=k with no gaps");
}

#[tokio::test]
async fn publish_builds_rbac_rows_from_schema() {
    let db = create_test_db().await;
    let dir = tempfile::tempdir().unwrap();

    let schema = json!({
        "definition": {"fields": [{"name": "name", "type": "string"}]},
        "rbac": {"Viewer": ["READ"]}
    });
    let published = publish_model(&db, dir.path(), "Doc", schema).await;

    let rows = ModelRolePermission::find()
        .filter(model_role_permission::Column::ModelId.eq(&published.id))
        .all(&db)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].allowed);
}

#[tokio::test]
async fn update_draft_keeps_version_and_history() {
    let db = create_test_db().await;
    let dir = tempfile::tempdir().unwrap();

    let published = publish_model(&db, dir.path(), "Product", product_schema()).await;

    let updated = registry::update_model(
        &db,
        None,
        &published.id,
        registry::UpdateModelInput {
            table_name: None,
            owner_field: None,
            json: Some(json!({
                "fields": [{"name": "name", "type": "string"}]
            })),
        },
    )
    .await
    .unwrap();

    assert_eq!(updated.version, 1, "draft updates never bump the version");
    let versions = ModelVersion::find()
        .filter(model_version::Column::ModelId.eq(&published.id))
        .count(&db)
        .await
        .unwrap();
    assert_eq!(versions, 1, "draft updates never snapshot");
}

// ---------------------------------------------------------------------------
// Unpublish
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unpublish_clears_grants_but_not_version() {
    let db = create_test_db().await;
    let dir = tempfile::tempdir().unwrap();

    let schema = json!({
        "definition": {"fields": [{"name": "name", "type": "string"}]},
        "rbac": {"Viewer": ["ALL"]}
    });
    let published = publish_model(&db, dir.path(), "Doc", schema).await;
    assert!(artifacts::final_path(dir.path(), "Doc").exists());

    let unpublished = registry::unpublish_model(&db, dir.path(), None, &published.id)
        .await
        .unwrap();

    assert!(!unpublished.published);
    assert_eq!(unpublished.version, 1, "version is not decremented");

    let grants = ModelRolePermission::find()
        .filter(model_role_permission::Column::ModelId.eq(&published.id))
        .count(&db)
        .await
        .unwrap();
    assert_eq!(grants, 0, "unpublish removes every model-role grant");

    assert!(!artifacts::final_path(dir.path(), "Doc").exists());
}

// ---------------------------------------------------------------------------
// Relation-graph validation
// ---------------------------------------------------------------------------

fn order_schema() -> serde_json::Value {
    json!({
        "fields": [
            {"name": "customerId", "type": "relation",
             "relation": {"model": "Customer", "field": "id", "type": "many-to-one"}}
        ]
    })
}

#[tokio::test]
async fn relation_to_unpublished_target_is_rejected_until_target_publishes() {
    let db = create_test_db().await;
    let dir = tempfile::tempdir().unwrap();

    // Customer exists as a draft only
    let customer = create_draft(
        &db,
        "Customer",
        json!({"fields": [{"name": "id", "type": "string"}, {"name": "name", "type": "string"}]}),
    )
    .await;

    let err = registry::create_model(
        &db,
        None,
        registry::CreateModelInput {
            name: "Order".to_string(),
            table_name: None,
            owner_field: None,
            json: order_schema(),
        },
    )
    .await
    .unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("customerId") && msg.contains("Customer"));

    // Publish the target; now the draft is accepted and publishable
    registry::publish_model(&db, dir.path(), None, &customer.id)
        .await
        .unwrap();

    let order = create_draft(&db, "Order", order_schema()).await;
    let published = registry::publish_model(&db, dir.path(), None, &order.id)
        .await
        .unwrap();
    assert_eq!(published.version, 1);
}

#[tokio::test]
async fn publish_fails_when_a_target_was_unpublished_in_the_meantime() {
    let db = create_test_db().await;
    let dir = tempfile::tempdir().unwrap();

    let customer = publish_model(
        &db,
        dir.path(),
        "Customer",
        json!({"fields": [{"name": "id", "type": "string"}]}),
    )
    .await;
    let order = create_draft(&db, "Order", order_schema()).await;

    registry::unpublish_model(&db, dir.path(), None, &customer.id)
        .await
        .unwrap();

    let err = registry::publish_model(&db, dir.path(), None, &order.id)
        .await
        .unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("customerId") && msg.contains("Customer"));
}

#[tokio::test]
async fn self_reference_and_many_to_many_are_rejected() {
    let db = create_test_db().await;

    let self_ref = registry::create_model(
        &db,
        None,
        registry::CreateModelInput {
            name: "Node".to_string(),
            table_name: None,
            owner_field: None,
            json: json!({
                "fields": [
                    {"name": "parent", "type": "relation",
                     "relation": {"model": "Node", "field": "id", "type": "many-to-one"}}
                ]
            }),
        },
    )
    .await;
    assert!(self_ref.unwrap_err().to_string().contains("itself"));

    let m2m = registry::create_model(
        &db,
        None,
        registry::CreateModelInput {
            name: "Tagging".to_string(),
            table_name: None,
            owner_field: None,
            json: json!({
                "fields": [
                    {"name": "users", "type": "relation",
                     "relation": {"model": "User", "field": "id", "type": "many-to-many"}}
                ]
            }),
        },
    )
    .await;
    assert!(m2m.unwrap_err().to_string().contains("many-to-many"));
}

#[tokio::test]
async fn relation_to_system_user_model_is_allowed() {
    let db = create_test_db().await;

    // The seeded system User model is published, so drafts may point at it
    let draft = registry::create_model(
        &db,
        None,
        registry::CreateModelInput {
            name: "Task".to_string(),
            table_name: None,
            owner_field: None,
            json: json!({
                "fields": [
                    {"name": "assignee", "type": "relation",
                     "relation": {"model": "User", "field": "email", "type": "many-to-one"}}
                ]
            }),
        },
    )
    .await;
    assert!(draft.is_ok());
}

// ---------------------------------------------------------------------------
// Delete
// ---------------------------------------------------------------------------

#[tokio::test]
async fn delete_refuses_referenced_models_without_force() {
    let db = create_test_db().await;
    let dir = tempfile::tempdir().unwrap();

    let customer = publish_model(
        &db,
        dir.path(),
        "Customer",
        json!({"fields": [{"name": "id", "type": "string"}]}),
    )
    .await;
    publish_model(&db, dir.path(), "Order", order_schema()).await;

    let err = registry::delete_model(&db, dir.path(), None, &customer.id, false)
        .await
        .unwrap_err();
    match err {
        AppError::Conflict { details, .. } => {
            let details = details.unwrap();
            let refs = details["referencedBy"].as_array().unwrap();
            assert_eq!(refs[0]["modelName"], "Order");
            assert_eq!(refs[0]["fieldName"], "customerId");
        }
        other => panic!("expected Conflict, got {:?}", other),
    }

    // Force removes the definition, its versions, and the artifact
    registry::delete_model(&db, dir.path(), None, &customer.id, true)
        .await
        .unwrap();
    assert!(registry::get_model(&db, &customer.id).await.is_err());
    assert!(!artifacts::final_path(dir.path(), "Customer").exists());
}

// ---------------------------------------------------------------------------
// Revert and historical publish
// ---------------------------------------------------------------------------

#[tokio::test]
async fn revert_restores_snapshot_without_bumping_version() {
    let db = create_test_db().await;
    let dir = tempfile::tempdir().unwrap();

    let published = publish_model(&db, dir.path(), "Product", product_schema()).await;

    // v2 drops the price field
    registry::update_model(
        &db,
        None,
        &published.id,
        registry::UpdateModelInput {
            table_name: None,
            owner_field: None,
            json: Some(json!({"fields": [{"name": "name", "type": "string"}]})),
        },
    )
    .await
    .unwrap();
    let v2 = registry::publish_model(&db, dir.path(), None, &published.id)
        .await
        .unwrap();
    assert_eq!(v2.version, 2);

    let reverted = registry::revert_model(&db, None, &published.id, 1).await.unwrap();
    assert_eq!(reverted.version, 2, "revert does not change the version");
    assert!(
        reverted.json.to_string().contains("price"),
        "draft holds the v1 schema again"
    );

    // Publishing the reverted draft yields v3, never a re-used number
    let v3 = registry::publish_model(&db, dir.path(), None, &published.id)
        .await
        .unwrap();
    assert_eq!(v3.version, 3);
}

#[tokio::test]
async fn publish_historical_creates_a_new_version() {
    let db = create_test_db().await;
    let dir = tempfile::tempdir().unwrap();

    let published = publish_model(&db, dir.path(), "Product", product_schema()).await;
    registry::publish_model(&db, dir.path(), None, &published.id)
        .await
        .unwrap();

    let republished = registry::publish_historical(&db, dir.path(), None, &published.id, 1)
        .await
        .unwrap();
    assert_eq!(republished.version, 3);

    let count = ModelVersion::find()
        .filter(model_version::Column::ModelId.eq(&published.id))
        .count(&db)
        .await
        .unwrap();
    assert_eq!(count, 3, "history is append-only");
}

// ---------------------------------------------------------------------------
// System model protection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn system_models_refuse_destructive_operations() {
    let db = create_test_db().await;
    let dir = tempfile::tempdir().unwrap();

    let user_model = registry::find_model_by_name(&db, "User")
        .await
        .unwrap()
        .expect("system User model is seeded");
    assert!(user_model.is_system);

    let update = registry::update_model(
        &db,
        None,
        &user_model.id,
        registry::UpdateModelInput {
            table_name: None,
            owner_field: None,
            json: Some(json!({"fields": [{"name": "x", "type": "string"}]})),
        },
    )
    .await;
    assert!(matches!(update.unwrap_err(), AppError::Forbidden(_)));

    let unpublish = registry::unpublish_model(&db, dir.path(), None, &user_model.id).await;
    assert!(matches!(unpublish.unwrap_err(), AppError::Forbidden(_)));

    let delete = registry::delete_model(&db, dir.path(), None, &user_model.id, true).await;
    assert!(matches!(delete.unwrap_err(), AppError::Forbidden(_)));

    let revert = registry::revert_model(&db, None, &user_model.id, 1).await;
    assert!(matches!(revert.unwrap_err(), AppError::Forbidden(_)));

    let historical =
        registry::publish_historical(&db, dir.path(), None, &user_model.id, 1).await;
    assert!(matches!(historical.unwrap_err(), AppError::Forbidden(_)));
}

// ---------------------------------------------------------------------------
// Artifact round-trip law
// ---------------------------------------------------------------------------

#[tokio::test]
async fn artifact_round_trip_preserves_field_descriptors() {
    let db = create_test_db().await;
    let dir = tempfile::tempdir().unwrap();

    let published = publish_model(&db, dir.path(), "Product", product_schema()).await;

    let artifact = artifacts::load(&artifacts::final_path(dir.path(), "Product"))
        .unwrap()
        .unwrap();

    let snapshot = registry::get_version(&db, &published.id, 1).await.unwrap();
    let from_db = modelforge::services::schema::parse_schema(&snapshot.json).unwrap();

    assert_eq!(artifact.definition, from_db);
}
