//! Support endpoints: platform statistics and the redacted audit feed.

use axum::{
    extract::{Extension, Query, State},
    routing::get,
    Json, Router,
};
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::Result;
use crate::middleware::AuthenticatedUser;
use crate::models::prelude::*;
use crate::models::{model_definition, record};
use crate::services::access;
use crate::state::AppState;

pub fn support_routes(state: AppState) -> Router {
    Router::new()
        .route("/stats", get(stats))
        .route("/audit", get(audit_feed))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<u64>,
}

async fn stats(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthenticatedUser>,
) -> Result<Json<Value>> {
    access::require_feature(&state.db, &auth_user.0, "VIEW_SUPPORT").await?;

    let models_total = ModelDefinition::find().count(&state.db).await?;
    let models_published = ModelDefinition::find()
        .filter(model_definition::Column::Published.eq(true))
        .count(&state.db)
        .await?;
    let records_total = Record::find()
        .filter(record::Column::DeletedAt.is_null())
        .count(&state.db)
        .await?;
    let users_total = User::find().count(&state.db).await?;
    let roles_total = Role::find().count(&state.db).await?;

    let today_start = chrono::Utc::now()
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|t| chrono::DateTime::from_naive_utc_and_offset(t, chrono::Utc))
        .unwrap_or_else(chrono::Utc::now);

    let audit_total = state.audit.total_events().await?;
    let audit_today = state.audit.events_since(today_start).await?;

    Ok(Json(json!({
        "success": true,
        "stats": {
            "models": { "total": models_total, "published": models_published },
            "records": records_total,
            "users": users_total,
            "roles": roles_total,
            "audit": { "total": audit_total, "today": audit_today },
        }
    })))
}

async fn audit_feed(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthenticatedUser>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Value>> {
    access::require_feature(&state.db, &auth_user.0, "VIEW_AUDIT").await?;

    let entries = state.audit.recent(query.limit.unwrap_or(50)).await?;
    Ok(Json(json!({ "success": true, "entries": entries })))
}
