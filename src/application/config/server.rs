use std::env;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Deadline for draining in-flight requests on shutdown
    pub shutdown_grace_secs: u64,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8000),
            shutdown_grace_secs: env::var("SHUTDOWN_GRACE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(15),
        }
    }
}
