//! End-to-end auth flow over the full application router: password
//! grant, bearer-protected management routes, refresh rotation, and
//! logout.

mod common;
use common::{admin_user, create_test_db, viewer_user};

use std::sync::Arc;
use std::sync::Once;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use modelforge::endpoints;
use modelforge::services::audit::AuditService;
use modelforge::services::security;
use modelforge::state::{AppState, SharedRouter};

static KEYS: Once = Once::new();

fn init_keys() {
    KEYS.call_once(|| {
        security::init_jwt_keys().expect("key init failed");
    });
}

fn make_app(db: sea_orm::DatabaseConnection) -> axum::Router {
    let audit = AuditService::new(db.clone());
    let dynamic: SharedRouter = Arc::new(parking_lot::RwLock::new(axum::Router::new()));
    endpoints::create_router(AppState::new(db, audit, dynamic))
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn password_grant_returns_a_usable_pair() {
    init_keys();
    let db = create_test_db().await;
    admin_user(&db).await;
    let app = make_app(db);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/token",
            json!({"email": "admin@test.local", "password": "passw0rd"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["user"]["role"], "Admin");
    let access = body["accessToken"].as_str().unwrap().to_string();
    let refresh = body["refreshToken"].as_str().unwrap().to_string();
    assert!(refresh.contains("::"));

    // The access token opens a protected route
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/models/all")
                .header(header::AUTHORIZATION, format!("Bearer {}", access))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Refresh rotation yields a fresh pair; the old refresh is dead
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/token",
            json!({"refreshToken": refresh}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let rotated = body_json(response).await;
    assert_ne!(rotated["refreshToken"], json!(refresh));

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/token",
            json!({"refreshToken": refresh}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn bad_credentials_are_unauthorized() {
    init_keys();
    let db = create_test_db().await;
    admin_user(&db).await;
    let app = make_app(db);

    let response = app
        .oneshot(json_request(
            "POST",
            "/auth/token",
            json!({"email": "admin@test.local", "password": "wrong"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn protected_routes_reject_anonymous_callers() {
    init_keys();
    let db = create_test_db().await;
    let app = make_app(db);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/models/all")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn register_requires_the_create_user_feature() {
    init_keys();
    let db = create_test_db().await;
    let viewer = viewer_user(&db).await;
    let viewer_token = security::create_access_token(&viewer).unwrap();
    let admin = admin_user(&db).await;
    let admin_token = security::create_access_token(&admin).unwrap();
    let app = make_app(db);

    let payload = json!({"email": "new@test.local", "password": "s3cret"});

    let forbidden = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/register")
                .header(header::AUTHORIZATION, format!("Bearer {}", viewer_token))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

    let allowed = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/register")
                .header(header::AUTHORIZATION, format!("Bearer {}", admin_token))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(allowed.status(), StatusCode::OK);
    let body = body_json(allowed).await;
    assert_eq!(body["user"]["email"], "new@test.local");
}

#[tokio::test]
async fn logout_revokes_the_refresh_token() {
    init_keys();
    let db = create_test_db().await;
    let admin = admin_user(&db).await;
    let (_, wire) = security::issue_refresh_token(&db, admin.user.id, None)
        .await
        .unwrap();
    let app = make_app(db.clone());

    let response = app
        .oneshot(json_request(
            "POST",
            "/auth/logout",
            json!({"refreshToken": wire}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert!(security::validate_refresh_token(&db, &wire).await.is_err());
}
