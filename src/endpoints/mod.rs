pub mod auth;
pub mod dynamic;
pub mod models;
pub mod rbac;
pub mod support;

use axum::{extract::State, middleware as axum_middleware, routing::any, Router};
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};

use crate::config::CONFIG;
use crate::middleware::require_auth;
use crate::models::model_definition;
use crate::models::prelude::*;
use crate::state::AppState;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    // Health route (for probes; no auth)
    let health_routes = Router::new()
        .route("/api/health", axum::routing::get(health_check))
        .route("/api/system/version", axum::routing::get(get_version))
        .with_state(state.clone());

    // Auth routes (registration enforces auth at the route level)
    let public_routes = Router::new().nest("/auth", auth::auth_routes(state.clone()));

    // Protected management routes
    let protected_routes = Router::new()
        .nest("/models", models::models_routes(state.clone()))
        .nest("/rbac", rbac::rbac_routes(state.clone()))
        .nest("/support", support::support_routes(state.clone()))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            require_auth,
        ));

    // The dynamic fabric: everything else under /api goes through the
    // hot-swappable router.
    let dynamic_routes = Router::new()
        .route("/api", any(dynamic::dispatch))
        .route("/api/{*rest}", any(dynamic::dispatch))
        .with_state(state);

    health_routes
        .merge(public_routes)
        .merge(protected_routes)
        .merge(dynamic_routes)
}

/// Simple health check endpoint with publish state
async fn health_check(State(state): State<AppState>) -> axum::Json<serde_json::Value> {
    let published = ModelDefinition::find()
        .filter(model_definition::Column::Published.eq(true))
        .count(&state.db)
        .await
        .unwrap_or(0);

    axum::Json(serde_json::json!({
        "status": "ok",
        "publishedModels": published,
    }))
}

/// Version info endpoint
async fn get_version() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "version": CONFIG.version,
        "backend": "rust"
    }))
}
