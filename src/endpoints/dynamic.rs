//! Dynamic route fabric.
//!
//! The `/api` surface is a hot-swappable router built from the artifact
//! directory: five CRUD handlers per published model, mounted under the
//! model's table name. A stable dispatch handler delegates every request
//! to whatever router value is current at that instant; the watcher task
//! is the only writer and replaces the value wholesale after a quiet
//! debounce window. A failed rebuild keeps the previous router in
//! service.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use axum::{
    extract::{Extension, Path as AxumPath, Query, Request, State},
    http::StatusCode,
    middleware as axum_middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::watch;
use tower::ServiceExt;

use crate::config::CONFIG;
use crate::error::Result;
use crate::middleware::{require_auth, AuthenticatedUser};
use crate::services::catalog::ModelAction;
use crate::services::{access, artifacts, records};
use crate::state::AppState;

const DEFAULT_LIMIT: u64 = 20;
const MAX_LIMIT: u64 = 200;

/// The model a dynamic route is bound to, stored as a router-local
/// extension when the router is built.
#[derive(Clone)]
struct ModelBinding {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    limit: Option<u64>,
    skip: Option<u64>,
    #[serde(default)]
    owner_only: bool,
}

/// Stable entry point mounted at `/api/{*rest}`: reads the current
/// router under the lock, releases it, and dispatches. In-flight
/// requests keep running against the router they were dispatched into.
pub async fn dispatch(State(state): State<AppState>, req: Request) -> Response {
    let router = state.dynamic.read().clone();
    match router.oneshot(req).await {
        Ok(response) => response,
        Err(infallible) => match infallible {},
    }
}

/// Build a fresh `/api` router from the artifact directory.
///
/// Artifacts without a top-level name are skipped; any other unreadable
/// file fails the whole build so a half-written state never reaches the
/// dispatch path.
pub fn build_router(state: &AppState, dir: &Path) -> Result<Router> {
    let mut mounted: BTreeMap<String, String> = BTreeMap::new();
    let mut router = Router::new();

    for path in artifacts::enumerate(dir) {
        let Some(artifact) = artifacts::load(&path)? else {
            tracing::debug!(path = %path.display(), "Skipping file without a model name");
            continue;
        };

        let segment = artifact.route_segment();
        if let Some(previous) = mounted.get(&segment) {
            tracing::warn!(
                segment = %segment,
                first = %previous,
                second = %artifact.name,
                "Two artifacts map to the same route segment; keeping the first"
            );
            continue;
        }

        let model_routes = Router::new()
            .route("/", post(create_record).get(list_records))
            .route(
                "/{id}",
                get(read_record).put(update_record).delete(delete_record),
            )
            .layer(Extension(ModelBinding {
                name: artifact.name.clone(),
            }));

        router = router.nest(&format!("/api/{}", segment), model_routes);
        mounted.insert(segment, artifact.name);
    }

    tracing::info!(models = mounted.len(), "Dynamic router built");

    Ok(router
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            require_auth,
        ))
        .fallback(not_found)
        .with_state(state.clone()))
}

async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "success": false, "message": "No such API route" })),
    )
        .into_response()
}

// ============================================================================
// CRUD Handlers
// ============================================================================

async fn create_record(
    State(state): State<AppState>,
    Extension(binding): Extension<ModelBinding>,
    Extension(auth_user): Extension<AuthenticatedUser>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>> {
    access::authorize(
        &state.db,
        &auth_user.0,
        &binding.name,
        ModelAction::Create,
        None,
    )
    .await?;

    let resolved = records::resolve_published_model(&state.db, &binding.name).await?;
    let record = records::create_record(&state.db, &resolved, payload, &auth_user.0).await?;

    Ok(Json(json!({ "success": true, "record": record })))
}

async fn list_records(
    State(state): State<AppState>,
    Extension(binding): Extension<ModelBinding>,
    Extension(auth_user): Extension<AuthenticatedUser>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>> {
    access::authorize(
        &state.db,
        &auth_user.0,
        &binding.name,
        ModelAction::Read,
        None,
    )
    .await?;

    let resolved = records::resolve_published_model(&state.db, &binding.name).await?;
    let params = records::ListParams {
        limit: query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT),
        skip: query.skip.unwrap_or(0),
        owner_only: query.owner_only,
    };
    let (items, total) = records::list_records(&state.db, &resolved, &params, &auth_user.0).await?;

    Ok(Json(json!({ "success": true, "total": total, "items": items })))
}

async fn read_record(
    State(state): State<AppState>,
    Extension(binding): Extension<ModelBinding>,
    Extension(auth_user): Extension<AuthenticatedUser>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<Value>> {
    access::authorize(
        &state.db,
        &auth_user.0,
        &binding.name,
        ModelAction::Read,
        Some(&id),
    )
    .await?;

    let resolved = records::resolve_published_model(&state.db, &binding.name).await?;
    let record = records::get_record(&state.db, &resolved, &id).await?;

    Ok(Json(json!({ "success": true, "record": record })))
}

async fn update_record(
    State(state): State<AppState>,
    Extension(binding): Extension<ModelBinding>,
    Extension(auth_user): Extension<AuthenticatedUser>,
    AxumPath(id): AxumPath<String>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>> {
    access::authorize(
        &state.db,
        &auth_user.0,
        &binding.name,
        ModelAction::Update,
        Some(&id),
    )
    .await?;

    let resolved = records::resolve_published_model(&state.db, &binding.name).await?;
    let record = records::update_record(&state.db, &resolved, &id, payload, &auth_user.0).await?;

    Ok(Json(json!({ "success": true, "record": record })))
}

async fn delete_record(
    State(state): State<AppState>,
    Extension(binding): Extension<ModelBinding>,
    Extension(auth_user): Extension<AuthenticatedUser>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<Value>> {
    access::authorize(
        &state.db,
        &auth_user.0,
        &binding.name,
        ModelAction::Delete,
        Some(&id),
    )
    .await?;

    let resolved = records::resolve_published_model(&state.db, &binding.name).await?;
    records::delete_record(&state.db, &resolved, &id, &auth_user.0).await?;

    Ok(Json(json!({ "success": true })))
}

// ============================================================================
// Watcher
// ============================================================================

type DirSnapshot = BTreeMap<PathBuf, (Option<SystemTime>, u64)>;

fn snapshot(dir: &Path) -> DirSnapshot {
    let mut snap = DirSnapshot::new();
    for path in artifacts::enumerate(dir) {
        if let Ok(meta) = std::fs::metadata(&path) {
            snap.insert(path, (meta.modified().ok(), meta.len()));
        }
    }
    snap
}

/// Rebuild the dynamic router and swap it in. A build failure retains
/// the previous router.
pub fn rebuild_and_swap(state: &AppState, dir: &Path) {
    match build_router(state, dir) {
        Ok(router) => {
            *state.dynamic.write() = router;
            tracing::info!("Dynamic router swapped");
        }
        Err(e) => {
            tracing::error!("Dynamic router rebuild failed, retaining previous router: {}", e);
        }
    }
}

/// Watch the artifact directory and rebuild the router after changes
/// settle. Polls on the settle interval so a file still being written
/// keeps pushing the quiet window forward; the rebuild fires once the
/// directory has been stable for the debounce duration.
pub fn spawn_watcher(
    state: AppState,
    dir: PathBuf,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let settle = Duration::from_millis(CONFIG.models.watch_settle_ms.max(10));
        let debounce = Duration::from_millis(CONFIG.models.watch_debounce_ms);

        let mut ticker = tokio::time::interval(settle);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut last_seen = snapshot(&dir);
        let mut quiet_since: Option<Instant> = None;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Artifact watcher stopping");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let current = snapshot(&dir);
                    if current != last_seen {
                        last_seen = current;
                        quiet_since = Some(Instant::now());
                    } else if let Some(since) = quiet_since {
                        if since.elapsed() >= debounce {
                            quiet_since = None;
                            rebuild_and_swap(&state, &dir);
                        }
                    }
                }
            }
        }
    })
}
