use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ModelsConfig {
    /// Directory holding published model artifacts
    pub dir: PathBuf,
    /// Quiet window before the watcher rebuilds the router
    pub watch_debounce_ms: u64,
    /// Poll interval for the artifact directory; also the write-settle
    /// threshold, since a file still being written changes between polls
    pub watch_settle_ms: u64,
}

impl ModelsConfig {
    pub fn from_env() -> Self {
        Self {
            dir: env::var("MODELS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./models")),
            watch_debounce_ms: env::var("MODEL_WATCH_DEBOUNCE_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(250),
            watch_settle_ms: env::var("MODEL_WATCH_SETTLE_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(200),
        }
    }
}
