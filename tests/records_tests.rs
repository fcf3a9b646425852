//! Record service tests: payload validation, relation resolution and
//! canonicalization, linking-model uniqueness, owner resolution, and
//! plain CRUD over non-system models.

mod common;
use common::{admin_user, create_test_db, publish_model, viewer_user};

use modelforge::error::AppError;
use modelforge::services::records::{self, ListParams};
use serde_json::json;

fn tmpdir() -> tempfile::TempDir {
    tempfile::tempdir().unwrap()
}

// ---------------------------------------------------------------------------
// Model resolution
// ---------------------------------------------------------------------------

#[tokio::test]
async fn resolves_by_name_and_table_name_case_insensitively() {
    let db = create_test_db().await;
    let dir = tmpdir();

    let draft = modelforge::services::registry::create_model(
        &db,
        None,
        modelforge::services::registry::CreateModelInput {
            name: "Product".to_string(),
            table_name: Some("catalog_items".to_string()),
            owner_field: None,
            json: json!({"fields": [{"name": "name", "type": "string"}]}),
        },
    )
    .await
    .unwrap();
    modelforge::services::registry::publish_model(&db, dir.path(), None, &draft.id)
        .await
        .unwrap();

    for route in ["product", "PRODUCT", "catalog_items", "Catalog_Items"] {
        let resolved = records::resolve_published_model(&db, route).await;
        assert!(resolved.is_ok(), "route '{}' should resolve", route);
    }

    assert!(records::resolve_published_model(&db, "nope").await.is_err());
}

#[tokio::test]
async fn unpublished_models_do_not_resolve() {
    let db = create_test_db().await;

    common::create_draft(
        &db,
        "Draft",
        json!({"fields": [{"name": "name", "type": "string"}]}),
    )
    .await;

    let err = records::resolve_published_model(&db, "draft").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_enforces_required_and_primitive_types() {
    let db = create_test_db().await;
    let dir = tmpdir();
    let actor = admin_user(&db).await;

    publish_model(
        &db,
        dir.path(),
        "Product",
        json!({
            "fields": [
                {"name": "name", "type": "string", "required": true},
                {"name": "price", "type": "number"}
            ]
        }),
    )
    .await;
    let resolved = records::resolve_published_model(&db, "product").await.unwrap();

    let missing = records::create_record(&db, &resolved, json!({"price": 5}), &actor).await;
    assert!(missing.unwrap_err().to_string().contains("required"));

    let wrong_type =
        records::create_record(&db, &resolved, json!({"name": "X", "price": "cheap"}), &actor)
            .await;
    assert!(wrong_type.unwrap_err().to_string().contains("wrong type"));

    let ok = records::create_record(&db, &resolved, json!({"name": "X", "price": 5}), &actor)
        .await
        .unwrap();
    assert_eq!(ok.data["name"], "X");
    assert_eq!(ok.model_name, "Product");
    assert!(ok.model_version_id.is_some());
}

// ---------------------------------------------------------------------------
// Relation resolution
// ---------------------------------------------------------------------------

async fn setup_order_ecosystem(
    db: &sea_orm::DatabaseConnection,
    dir: &std::path::Path,
) -> (records::ResolvedModel, records::ResolvedModel) {
    publish_model(
        db,
        dir,
        "Customer",
        json!({
            "fields": [
                {"name": "code", "type": "string", "unique": true},
                {"name": "name", "type": "string"}
            ]
        }),
    )
    .await;
    publish_model(
        db,
        dir,
        "Order",
        json!({
            "fields": [
                {"name": "customerId", "type": "relation",
                 "relation": {"model": "Customer", "field": "code", "type": "many-to-one"}},
                {"name": "total", "type": "number"}
            ]
        }),
    )
    .await;

    let customers = records::resolve_published_model(db, "customer").await.unwrap();
    let orders = records::resolve_published_model(db, "order").await.unwrap();
    (customers, orders)
}

#[tokio::test]
async fn relation_values_canonicalize_to_record_ids() {
    let db = create_test_db().await;
    let dir = tmpdir();
    let actor = admin_user(&db).await;
    let (customers, orders) = setup_order_ecosystem(&db, dir.path()).await;

    let acme = records::create_record(
        &db,
        &customers,
        json!({"code": "ACME", "name": "Acme Corp"}),
        &actor,
    )
    .await
    .unwrap();

    // By target-field value
    let by_value = records::create_record(
        &db,
        &orders,
        json!({"customerId": "ACME", "total": 10}),
        &actor,
    )
    .await
    .unwrap();
    assert_eq!(by_value.data["customerId"], json!(acme.id));

    // By direct record id
    let by_id = records::create_record(
        &db,
        &orders,
        json!({"customerId": acme.id, "total": 11}),
        &actor,
    )
    .await
    .unwrap();
    assert_eq!(by_id.data["customerId"], json!(acme.id));
}

#[tokio::test]
async fn unresolvable_and_ambiguous_relations_fail() {
    let db = create_test_db().await;
    let dir = tmpdir();
    let actor = admin_user(&db).await;
    let (customers, orders) = setup_order_ecosystem(&db, dir.path()).await;

    let none = records::create_record(
        &db,
        &orders,
        json!({"customerId": "GHOST", "total": 1}),
        &actor,
    )
    .await;
    assert!(matches!(none.unwrap_err(), AppError::BadRequest(_)));

    // Two customers share the same code value
    records::create_record(&db, &customers, json!({"code": "DUP"}), &actor)
        .await
        .unwrap();
    records::create_record(&db, &customers, json!({"code": "DUP"}), &actor)
        .await
        .unwrap();

    let ambiguous = records::create_record(
        &db,
        &orders,
        json!({"customerId": "DUP", "total": 1}),
        &actor,
    )
    .await;
    match ambiguous.unwrap_err() {
        AppError::Conflict { message, .. } => assert!(message.contains("more than one")),
        other => panic!("expected Conflict, got {:?}", other),
    }
}

#[tokio::test]
async fn multi_relations_require_arrays_and_resolve_each_element() {
    let db = create_test_db().await;
    let dir = tmpdir();
    let actor = admin_user(&db).await;

    publish_model(
        &db,
        dir.path(),
        "Tag",
        json!({"fields": [{"name": "slug", "type": "string"}]}),
    )
    .await;
    publish_model(
        &db,
        dir.path(),
        "Post",
        json!({
            "fields": [
                {"name": "title", "type": "string"},
                {"name": "tagIds", "type": "relation",
                 "relation": {"model": "Tag", "field": "slug", "type": "one-to-many"}}
            ]
        }),
    )
    .await;

    let tags = records::resolve_published_model(&db, "tag").await.unwrap();
    let posts = records::resolve_published_model(&db, "post").await.unwrap();

    let rust = records::create_record(&db, &tags, json!({"slug": "rust"}), &actor)
        .await
        .unwrap();
    let web = records::create_record(&db, &tags, json!({"slug": "web"}), &actor)
        .await
        .unwrap();

    let scalar = records::create_record(
        &db,
        &posts,
        json!({"title": "T", "tagIds": "rust"}),
        &actor,
    )
    .await;
    assert!(scalar.unwrap_err().to_string().contains("array"));

    let post = records::create_record(
        &db,
        &posts,
        json!({"title": "T", "tagIds": ["rust", "web"]}),
        &actor,
    )
    .await
    .unwrap();
    assert_eq!(post.data["tagIds"], json!([rust.id, web.id]));
}

#[tokio::test]
async fn user_relations_resolve_by_id_and_email() {
    let db = create_test_db().await;
    let dir = tmpdir();
    let actor = admin_user(&db).await;
    let assignee = viewer_user(&db).await;

    publish_model(
        &db,
        dir.path(),
        "Task",
        json!({
            "fields": [
                {"name": "title", "type": "string"},
                {"name": "assignee", "type": "relation",
                 "relation": {"model": "User", "field": "id", "type": "many-to-one"}}
            ]
        }),
    )
    .await;
    let tasks = records::resolve_published_model(&db, "task").await.unwrap();

    let by_email = records::create_record(
        &db,
        &tasks,
        json!({"title": "a", "assignee": assignee.user.email}),
        &actor,
    )
    .await
    .unwrap();
    assert_eq!(by_email.data["assignee"], json!(assignee.user.id.to_string()));

    let by_id = records::create_record(
        &db,
        &tasks,
        json!({"title": "b", "assignee": assignee.user.id}),
        &actor,
    )
    .await
    .unwrap();
    assert_eq!(by_id.data["assignee"], json!(assignee.user.id.to_string()));

    let unknown = records::create_record(
        &db,
        &tasks,
        json!({"title": "c", "assignee": "nobody@test.local"}),
        &actor,
    )
    .await;
    assert!(matches!(unknown.unwrap_err(), AppError::BadRequest(_)));
}

// ---------------------------------------------------------------------------
// Linking-model uniqueness
// ---------------------------------------------------------------------------

#[tokio::test]
async fn linking_model_tuples_are_unique() {
    let db = create_test_db().await;
    let dir = tmpdir();
    let actor = admin_user(&db).await;

    publish_model(
        &db,
        dir.path(),
        "Student",
        json!({"fields": [{"name": "code", "type": "string"}]}),
    )
    .await;
    publish_model(
        &db,
        dir.path(),
        "Course",
        json!({"fields": [{"name": "code", "type": "string"}]}),
    )
    .await;
    publish_model(
        &db,
        dir.path(),
        "Enrollment",
        json!({
            "fields": [
                {"name": "studentId", "type": "relation",
                 "relation": {"model": "Student", "field": "code", "type": "many-to-one"}},
                {"name": "courseId", "type": "relation",
                 "relation": {"model": "Course", "field": "code", "type": "many-to-one"}}
            ]
        }),
    )
    .await;

    let students = records::resolve_published_model(&db, "student").await.unwrap();
    let courses = records::resolve_published_model(&db, "course").await.unwrap();
    let enrollments = records::resolve_published_model(&db, "enrollment").await.unwrap();

    records::create_record(&db, &students, json!({"code": "S1"}), &actor)
        .await
        .unwrap();
    records::create_record(&db, &courses, json!({"code": "C1"}), &actor)
        .await
        .unwrap();
    records::create_record(&db, &courses, json!({"code": "C2"}), &actor)
        .await
        .unwrap();

    records::create_record(
        &db,
        &enrollments,
        json!({"studentId": "S1", "courseId": "C1"}),
        &actor,
    )
    .await
    .unwrap();

    // The exact same tuple is a conflict naming both fields
    let dup = records::create_record(
        &db,
        &enrollments,
        json!({"studentId": "S1", "courseId": "C1"}),
        &actor,
    )
    .await;
    match dup.unwrap_err() {
        AppError::Conflict { details, .. } => {
            let details = details.unwrap();
            assert!(details.get("studentId").is_some());
            assert!(details.get("courseId").is_some());
        }
        other => panic!("expected Conflict, got {:?}", other),
    }

    // A different tuple is fine
    records::create_record(
        &db,
        &enrollments,
        json!({"studentId": "S1", "courseId": "C2"}),
        &actor,
    )
    .await
    .unwrap();
}

// ---------------------------------------------------------------------------
// Owner resolution
// ---------------------------------------------------------------------------

#[tokio::test]
async fn owner_defaults_to_actor_and_fills_owner_field() {
    let db = create_test_db().await;
    let dir = tmpdir();
    let actor = admin_user(&db).await;

    let draft = modelforge::services::registry::create_model(
        &db,
        None,
        modelforge::services::registry::CreateModelInput {
            name: "Note".to_string(),
            table_name: None,
            owner_field: Some("authorId".to_string()),
            json: json!({
                "fields": [
                    {"name": "text", "type": "string"},
                    {"name": "authorId", "type": "number"}
                ]
            }),
        },
    )
    .await
    .unwrap();
    modelforge::services::registry::publish_model(&db, dir.path(), None, &draft.id)
        .await
        .unwrap();
    let notes = records::resolve_published_model(&db, "note").await.unwrap();

    let note = records::create_record(&db, &notes, json!({"text": "hi"}), &actor)
        .await
        .unwrap();
    assert_eq!(note.owner_id, Some(actor.user.id));
    assert_eq!(note.data["authorId"], json!(actor.user.id));
}

#[tokio::test]
async fn explicit_owner_resolves_by_email_and_bad_owner_fails() {
    let db = create_test_db().await;
    let dir = tmpdir();
    let actor = admin_user(&db).await;
    let other = viewer_user(&db).await;

    publish_model(
        &db,
        dir.path(),
        "Note",
        json!({"fields": [{"name": "text", "type": "string"}]}),
    )
    .await;
    let notes = records::resolve_published_model(&db, "note").await.unwrap();

    let owned = records::create_record(
        &db,
        &notes,
        json!({"text": "hi", "ownerId": other.user.email}),
        &actor,
    )
    .await
    .unwrap();
    assert_eq!(owned.owner_id, Some(other.user.id));

    let bad = records::create_record(
        &db,
        &notes,
        json!({"text": "hi", "ownerId": "ghost@test.local"}),
        &actor,
    )
    .await;
    assert!(matches!(bad.unwrap_err(), AppError::BadRequest(_)));
}

// ---------------------------------------------------------------------------
// CRUD round trip
// ---------------------------------------------------------------------------

#[tokio::test]
async fn update_merges_and_delete_soft_deletes() {
    let db = create_test_db().await;
    let dir = tmpdir();
    let actor = admin_user(&db).await;

    publish_model(
        &db,
        dir.path(),
        "Product",
        json!({
            "fields": [
                {"name": "name", "type": "string", "required": true},
                {"name": "price", "type": "number"}
            ]
        }),
    )
    .await;
    let products = records::resolve_published_model(&db, "product").await.unwrap();

    let created = records::create_record(
        &db,
        &products,
        json!({"name": "Widget", "price": 5}),
        &actor,
    )
    .await
    .unwrap();

    // Partial update keeps the unmentioned fields
    let updated = records::update_record(
        &db,
        &products,
        &created.id,
        json!({"price": 9}),
        &actor,
    )
    .await
    .unwrap();
    assert_eq!(updated.data["name"], "Widget");
    assert_eq!(updated.data["price"], 9);

    let fetched = records::get_record(&db, &products, &created.id).await.unwrap();
    assert_eq!(fetched.data["price"], 9);

    records::delete_record(&db, &products, &created.id, &actor)
        .await
        .unwrap();
    assert!(records::get_record(&db, &products, &created.id).await.is_err());

    let (items, total) = records::list_records(
        &db,
        &products,
        &ListParams {
            limit: 20,
            skip: 0,
            owner_only: false,
        },
        &actor,
    )
    .await
    .unwrap();
    assert_eq!(total, 0);
    assert!(items.is_empty());
}

#[tokio::test]
async fn list_paginates_and_filters_by_owner() {
    let db = create_test_db().await;
    let dir = tmpdir();
    let actor = admin_user(&db).await;
    let other = viewer_user(&db).await;

    publish_model(
        &db,
        dir.path(),
        "Item",
        json!({"fields": [{"name": "n", "type": "number"}]}),
    )
    .await;
    let items_model = records::resolve_published_model(&db, "item").await.unwrap();

    for n in 0..5 {
        records::create_record(&db, &items_model, json!({"n": n}), &actor)
            .await
            .unwrap();
    }
    records::create_record(
        &db,
        &items_model,
        json!({"n": 99, "ownerId": other.user.id}),
        &actor,
    )
    .await
    .unwrap();

    let (page, total) = records::list_records(
        &db,
        &items_model,
        &ListParams {
            limit: 2,
            skip: 1,
            owner_only: false,
        },
        &actor,
    )
    .await
    .unwrap();
    assert_eq!(total, 6);
    assert_eq!(page.len(), 2);

    let (mine, _) = records::list_records(
        &db,
        &items_model,
        &ListParams {
            limit: 20,
            skip: 0,
            owner_only: true,
        },
        &other,
    )
    .await
    .unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].data["n"], 99);
}
