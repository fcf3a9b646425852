//! RBAC endpoints: feature grants at role and user scope, per-model
//! role permissions, and the merged permission views.

use axum::{
    extract::{Extension, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{AppError, Result};
use crate::middleware::AuthenticatedUser;
use crate::models::audit_log::AuditAction;
use crate::models::permission::CATEGORY_FEATURE;
use crate::models::prelude::*;
use crate::services::identity::{self, UserWithRole};
use crate::services::{access, audit, registry};
use crate::state::AppState;
use sea_orm::EntityTrait;

pub fn rbac_routes(state: AppState) -> Router {
    Router::new()
        .route("/grant/role", post(grant_role))
        .route("/grant/user", post(grant_user))
        .route("/grant/user/merged", get(merged_features))
        .route("/models/permissions", post(set_model_permissions))
        .route("/models/merged", get(merged_models))
        .with_state(state)
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantRoleRequest {
    pub role_name: String,
    pub feature: String,
    #[serde(default = "default_true")]
    pub granted: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantUserRequest {
    pub user_id: i64,
    pub feature: String,
    #[serde(default = "default_true")]
    pub granted: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetModelPermissionsRequest {
    pub model_name: String,
    pub role_name: String,
    pub permissions: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedQuery {
    pub user_id: Option<i64>,
    #[serde(default)]
    pub include_unpublished: bool,
}

fn default_true() -> bool {
    true
}

/// Resolve the target of a merged-view query: yourself freely, someone
/// else only with MANAGE_FEATURES.
async fn resolve_target(
    state: &AppState,
    caller: &UserWithRole,
    user_id: Option<i64>,
) -> Result<UserWithRole> {
    let target_id = user_id.unwrap_or(caller.user.id);
    if target_id != caller.user.id {
        access::require_feature(&state.db, caller, "MANAGE_FEATURES").await?;
    }
    identity::find_user_by_id(&state.db, target_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No user with id {}", target_id)))
}

// ============================================================================
// Endpoint Handlers
// ============================================================================

async fn grant_role(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthenticatedUser>,
    Json(req): Json<GrantRoleRequest>,
) -> Result<Json<Value>> {
    access::require_feature(&state.db, &auth_user.0, "MANAGE_FEATURES").await?;

    let role = identity::find_role_by_name(&state.db, &req.role_name)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No role named '{}'", req.role_name)))?;

    let row = access::grant_role_feature(&state.db, role.id, &req.feature, req.granted).await?;

    audit::append(
        &state.db,
        Some(auth_user.0.user.id),
        AuditAction::FeatureGrantRole,
        None,
        None,
        None,
        Some(json!({ "roleName": req.role_name, "feature": req.feature, "granted": req.granted })),
    )
    .await?;

    Ok(Json(json!({ "success": true, "grant": row })))
}

async fn grant_user(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthenticatedUser>,
    Json(req): Json<GrantUserRequest>,
) -> Result<Json<Value>> {
    access::require_feature(&state.db, &auth_user.0, "MANAGE_FEATURES").await?;

    let target = identity::find_user_by_id(&state.db, req.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No user with id {}", req.user_id)))?;

    let outcome = access::grant_user_feature(&state.db, &target, &req.feature, req.granted).await?;

    audit::append(
        &state.db,
        Some(auth_user.0.user.id),
        AuditAction::FeatureGrantUser,
        None,
        None,
        None,
        Some(json!({
            "userId": req.user_id,
            "feature": req.feature,
            "granted": req.granted,
            "outcome": outcome,
        })),
    )
    .await?;

    Ok(Json(json!({ "success": true, "outcome": outcome })))
}

/// Effective feature grants for a user: every catalog feature with its
/// merged granted flag.
async fn merged_features(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthenticatedUser>,
    Query(query): Query<MergedQuery>,
) -> Result<Json<Value>> {
    let target = resolve_target(&state, &auth_user.0, query.user_id).await?;

    let mut features = Vec::new();
    for permission in Permission::find().all(&state.db).await? {
        if permission.category != CATEGORY_FEATURE {
            continue;
        }
        let allowed = access::is_feature_allowed(&state.db, &target, &permission.key).await?;
        features.push(json!({ "feature": permission.key, "granted": allowed }));
    }

    Ok(Json(json!({
        "success": true,
        "userId": target.user.id,
        "features": features,
    })))
}

async fn set_model_permissions(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthenticatedUser>,
    Json(req): Json<SetModelPermissionsRequest>,
) -> Result<Json<Value>> {
    access::require_feature(&state.db, &auth_user.0, "MANAGE_FEATURES").await?;

    let model = registry::find_model_by_name(&state.db, &req.model_name)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No model named '{}'", req.model_name)))?;
    let role = identity::find_role_by_name(&state.db, &req.role_name)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No role named '{}'", req.role_name)))?;

    access::set_model_role_permissions(&state.db, &model.id, role.id, &req.permissions).await?;

    audit::append(
        &state.db,
        Some(auth_user.0.user.id),
        AuditAction::ModelPermissionsSet,
        Some(model.id.clone()),
        Some(model.name.clone()),
        None,
        Some(json!({ "roleName": req.role_name, "permissions": req.permissions })),
    )
    .await?;

    Ok(Json(json!({ "success": true })))
}

async fn merged_models(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthenticatedUser>,
    Query(query): Query<MergedQuery>,
) -> Result<Json<Value>> {
    let target = resolve_target(&state, &auth_user.0, query.user_id).await?;

    let merged =
        access::merged_model_permissions(&state.db, &target, query.include_unpublished).await?;

    Ok(Json(json!({
        "success": true,
        "userId": target.user.id,
        "models": merged,
    })))
}
