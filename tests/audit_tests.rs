//! Audit service tests: append, redacted reads, and count clamping.

mod common;
use common::create_test_db;

use modelforge::models::audit_log::AuditAction;
use modelforge::services::audit::{self, AuditService};
use serde_json::json;

#[tokio::test]
async fn append_then_read_back_newest_first() {
    let db = create_test_db().await;
    let service = AuditService::new(db.clone());

    audit::append(
        &db,
        Some(1),
        AuditAction::ModelCreate,
        Some("m1".to_string()),
        Some("Product".to_string()),
        None,
        None,
    )
    .await
    .unwrap();
    audit::append(
        &db,
        Some(1),
        AuditAction::ModelPublish,
        Some("m1".to_string()),
        Some("Product".to_string()),
        None,
        Some(json!({"version": 1})),
    )
    .await
    .unwrap();

    let entries = service.recent(10).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].action, "MODEL_PUBLISH");
    assert_eq!(entries[1].action, "MODEL_CREATE");
    assert_eq!(entries[0].model_name.as_deref(), Some("Product"));
}

#[tokio::test]
async fn sensitive_keys_never_reach_the_reader() {
    let db = create_test_db().await;
    let service = AuditService::new(db.clone());

    audit::append(
        &db,
        Some(1),
        AuditAction::SystemUserCreate,
        None,
        None,
        None,
        Some(json!({
            "email": "secret@example.com",
            "password": "hunter2",
            "nested": {"tokenHash": "abc", "keep": "this"},
            "list": [{"refreshToken": "xyz"}],
            "note": "x".repeat(2000),
        })),
    )
    .await
    .unwrap();

    let entries = service.recent(10).await.unwrap();
    let details = entries[0].details.as_ref().unwrap();

    assert_eq!(details["email"], "[REDACTED]");
    assert_eq!(details["password"], "[REDACTED]");
    assert_eq!(details["nested"]["tokenHash"], "[REDACTED]");
    assert_eq!(details["nested"]["keep"], "this");
    assert_eq!(details["list"][0]["refreshToken"], "[REDACTED]");
    assert_eq!(details["note"], "[REDACTED]", "oversized strings are cut");
}

#[tokio::test]
async fn read_count_is_clamped() {
    let db = create_test_db().await;
    let service = AuditService::new(db.clone());

    for i in 0..5 {
        audit::append(
            &db,
            None,
            AuditAction::Login,
            None,
            None,
            None,
            Some(json!({"n": i})),
        )
        .await
        .unwrap();
    }

    // limit 0 clamps to 1, oversized limits clamp to 100
    assert_eq!(service.recent(0).await.unwrap().len(), 1);
    assert_eq!(service.recent(10_000).await.unwrap().len(), 5);
}
