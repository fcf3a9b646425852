//! Model management endpoints: the draft/publish lifecycle, version
//! history, and relation suggestions.
//!
//! All operations require the MANAGE_MODELS feature except publish and
//! unpublish, which require PUBLISH_MODEL.

use axum::{
    extract::{Extension, Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::CONFIG;
use crate::error::Result;
use crate::middleware::AuthenticatedUser;
use crate::services::{access, registry, suggest};
use crate::state::AppState;

pub fn models_routes(state: AppState) -> Router {
    Router::new()
        .route("/create", post(create_model))
        .route("/all", get(list_models))
        .route("/{id}", get(get_model).put(update_model).delete(delete_model))
        .route("/{id}/publish", post(publish_model))
        .route("/{id}/unpublish", post(unpublish_model))
        .route("/{id}/relation-suggestions", get(relation_suggestions))
        .route("/{id}/versions", get(list_versions))
        .route("/{id}/versions/{n}", get(get_version))
        .route("/{id}/versions/{n}/revert", post(revert_version))
        .route("/{id}/versions/{n}/publish", post(publish_version))
        .with_state(state)
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateModelRequest {
    pub name: String,
    pub table_name: Option<String>,
    pub owner_field: Option<String>,
    pub json: Value,
}

/// Double-Option fields distinguish "absent" from an explicit null that
/// clears the value.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateModelRequest {
    #[serde(default)]
    pub table_name: Option<Option<String>>,
    #[serde(default)]
    pub owner_field: Option<Option<String>>,
    pub json: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct ListModelsQuery {
    #[serde(rename = "onlyPublished", default)]
    pub only_published: bool,
}

#[derive(Debug, Deserialize)]
pub struct DeleteModelQuery {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize)]
pub struct VersionsQuery {
    pub limit: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionsQuery {
    pub q: Option<String>,
    pub limit: Option<u64>,
    pub sample_limit: Option<u64>,
}

// ============================================================================
// Endpoint Handlers
// ============================================================================

async fn create_model(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthenticatedUser>,
    Json(req): Json<CreateModelRequest>,
) -> Result<Json<Value>> {
    access::require_feature(&state.db, &auth_user.0, "MANAGE_MODELS").await?;

    let model = registry::create_model(
        &state.db,
        Some(auth_user.0.user.id),
        registry::CreateModelInput {
            name: req.name,
            table_name: req.table_name,
            owner_field: req.owner_field,
            json: req.json,
        },
    )
    .await?;

    Ok(Json(json!({ "success": true, "model": model })))
}

async fn list_models(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthenticatedUser>,
    Query(query): Query<ListModelsQuery>,
) -> Result<Json<Value>> {
    access::require_feature(&state.db, &auth_user.0, "MANAGE_MODELS").await?;

    let models = registry::list_models(&state.db, query.only_published).await?;
    Ok(Json(json!({ "success": true, "models": models })))
}

async fn get_model(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    access::require_feature(&state.db, &auth_user.0, "MANAGE_MODELS").await?;

    let model = registry::get_model(&state.db, &id).await?;
    Ok(Json(json!({ "success": true, "model": model })))
}

async fn update_model(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    Json(req): Json<UpdateModelRequest>,
) -> Result<Json<Value>> {
    access::require_feature(&state.db, &auth_user.0, "MANAGE_MODELS").await?;

    let model = registry::update_model(
        &state.db,
        Some(auth_user.0.user.id),
        &id,
        registry::UpdateModelInput {
            table_name: req.table_name,
            owner_field: req.owner_field,
            json: req.json,
        },
    )
    .await?;

    Ok(Json(json!({ "success": true, "model": model })))
}

async fn delete_model(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    Query(query): Query<DeleteModelQuery>,
) -> Result<Json<Value>> {
    access::require_feature(&state.db, &auth_user.0, "MANAGE_MODELS").await?;

    registry::delete_model(
        &state.db,
        &CONFIG.models.dir,
        Some(auth_user.0.user.id),
        &id,
        query.force,
    )
    .await?;

    Ok(Json(json!({ "success": true })))
}

async fn publish_model(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    access::require_feature(&state.db, &auth_user.0, "PUBLISH_MODEL").await?;

    let model =
        registry::publish_model(&state.db, &CONFIG.models.dir, Some(auth_user.0.user.id), &id)
            .await?;

    Ok(Json(json!({ "success": true, "model": model })))
}

async fn unpublish_model(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    access::require_feature(&state.db, &auth_user.0, "PUBLISH_MODEL").await?;

    let model = registry::unpublish_model(
        &state.db,
        &CONFIG.models.dir,
        Some(auth_user.0.user.id),
        &id,
    )
    .await?;

    Ok(Json(json!({ "success": true, "model": model })))
}

async fn relation_suggestions(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    Query(query): Query<SuggestionsQuery>,
) -> Result<Json<Value>> {
    access::require_feature(&state.db, &auth_user.0, "MANAGE_MODELS").await?;

    let candidates = suggest::suggest(
        &state.db,
        &id,
        query.q.as_deref(),
        query.limit.unwrap_or(20),
        query.sample_limit.unwrap_or(5),
    )
    .await?;

    Ok(Json(json!({ "success": true, "candidates": candidates })))
}

async fn list_versions(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    Query(query): Query<VersionsQuery>,
) -> Result<Json<Value>> {
    access::require_feature(&state.db, &auth_user.0, "MANAGE_MODELS").await?;

    let versions =
        registry::list_versions(&state.db, &id, query.limit.unwrap_or(50).min(200)).await?;
    Ok(Json(json!({ "success": true, "versions": versions })))
}

async fn get_version(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthenticatedUser>,
    Path((id, n)): Path<(String, i32)>,
) -> Result<Json<Value>> {
    access::require_feature(&state.db, &auth_user.0, "MANAGE_MODELS").await?;

    let version = registry::get_version(&state.db, &id, n).await?;
    Ok(Json(json!({ "success": true, "version": version })))
}

async fn revert_version(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthenticatedUser>,
    Path((id, n)): Path<(String, i32)>,
) -> Result<Json<Value>> {
    access::require_feature(&state.db, &auth_user.0, "MANAGE_MODELS").await?;

    let model = registry::revert_model(&state.db, Some(auth_user.0.user.id), &id, n).await?;
    Ok(Json(json!({ "success": true, "model": model })))
}

async fn publish_version(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthenticatedUser>,
    Path((id, n)): Path<(String, i32)>,
) -> Result<Json<Value>> {
    access::require_feature(&state.db, &auth_user.0, "PUBLISH_MODEL").await?;

    let model = registry::publish_historical(
        &state.db,
        &CONFIG.models.dir,
        Some(auth_user.0.user.id),
        &id,
        n,
    )
    .await?;

    Ok(Json(json!({ "success": true, "model": model })))
}
