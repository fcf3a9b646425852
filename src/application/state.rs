use std::sync::Arc;

use axum::Router;
use parking_lot::RwLock;
use sea_orm::DatabaseConnection;

use crate::services::audit::AuditService;

/// Database connection type alias
pub type DbConn = DatabaseConnection;

/// The hot-swappable router serving `/api/*`. Exactly one writer (the
/// artifact watcher task); every request thread reads. The lock is only
/// held long enough to clone the router value, never across an await.
pub type SharedRouter = Arc<RwLock<Router>>;

/// Application state containing all shared resources
#[derive(Clone)]
pub struct AppState {
    pub db: DbConn,
    pub audit: AuditService,
    pub dynamic: SharedRouter,
}

impl AppState {
    pub fn new(db: DbConn, audit: AuditService, dynamic: SharedRouter) -> Self {
        Self { db, audit, dynamic }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::create_test_db;

    #[tokio::test]
    async fn app_state_is_cloneable_and_shares_router() {
        let db = create_test_db().await;
        let audit = AuditService::new(db.clone());
        let dynamic: SharedRouter = Arc::new(RwLock::new(Router::new()));

        let state1 = AppState::new(db, audit, dynamic);
        let state2 = state1.clone();

        assert!(Arc::ptr_eq(&state1.dynamic, &state2.dynamic));
    }
}
