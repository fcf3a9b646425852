//! Application bootstrapper.
//!
//! Handles all initialization and setup: tracing, database, permission
//! catalog, JWT keys, the seed admin, artifact reconciliation, the
//! initial dynamic-router build, the watcher task, and the HTTP server
//! with graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::sync::watch;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::CONFIG;
use crate::db;
use crate::endpoints;
use crate::endpoints::dynamic;
use crate::services::{audit::AuditService, catalog, identity, registry, security};
use crate::state::{AppState, SharedRouter};

/// Bootstrap and run the application
pub async fn run() -> anyhow::Result<()> {
    init_tracing();

    tracing::info!("Starting modelforge v{}", CONFIG.version);

    let state = init_services().await?;

    // Initial dynamic-router build, then hand the directory to the watcher
    dynamic::rebuild_and_swap(&state, &CONFIG.models.dir);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watcher = dynamic::spawn_watcher(state.clone(), CONFIG.models.dir.clone(), shutdown_rx);
    tracing::info!("Artifact watcher started");

    let app = create_app(state);

    serve(app, shutdown_tx, watcher).await
}

/// Initialize tracing/logging
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("modelforge={}", CONFIG.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_ansi(false))
        .init();
}

/// Initialize all application services
async fn init_services() -> anyhow::Result<AppState> {
    let conn = db::connect().await?;
    tracing::info!("Database connection established");

    catalog::ensure_catalog(&conn).await?;
    tracing::info!("Permission catalog verified");

    security::init_jwt_keys()?;
    tracing::info!("JWT signing keys initialized");

    seed_admin(&conn).await?;

    let audit = AuditService::new(conn.clone());

    let dynamic: SharedRouter = Arc::new(parking_lot::RwLock::new(Router::new()));
    let state = AppState::new(conn, audit, dynamic);

    // Published models whose artifact is missing (first boot, failed
    // rename) get their files re-materialized before routing starts.
    registry::reconcile_artifacts(&state.db, &CONFIG.models.dir).await?;
    tracing::info!("Artifacts reconciled");

    Ok(state)
}

/// Create the initial admin account when no users exist
async fn seed_admin(db: &sea_orm::DatabaseConnection) -> anyhow::Result<()> {
    use crate::models::prelude::*;
    use sea_orm::{EntityTrait, PaginatorTrait};

    if User::find().count(db).await? > 0 {
        return Ok(());
    }

    identity::register_user(
        db,
        &CONFIG.auth.seed_admin_email,
        &CONFIG.auth.seed_admin_password,
        Some("Administrator"),
        Some(identity::ADMIN_ROLE),
    )
    .await?;

    tracing::info!(email = %CONFIG.auth.seed_admin_email, "Seeded initial admin user");
    Ok(())
}

/// Create the main application router
fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    endpoints::create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Start the HTTP server; on shutdown stop the watcher first, then
/// drain in-flight requests.
async fn serve(
    app: Router,
    shutdown_tx: watch::Sender<bool>,
    watcher: tokio::task::JoinHandle<()>,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], CONFIG.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = tokio::time::timeout(
        std::time::Duration::from_secs(CONFIG.server.shutdown_grace_secs),
        watcher,
    )
    .await;

    Ok(())
}
