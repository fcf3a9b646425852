use std::env;

#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Access-token lifetime in seconds
    pub access_token_ttl: i64,
    /// Refresh-token lifetime in seconds
    pub refresh_token_ttl: i64,
    /// bcrypt cost for passwords and refresh secrets
    pub hash_rounds: u32,
    pub jwt_issuer: String,
    pub jwt_private_key_path: Option<String>,
    pub jwt_public_key_path: Option<String>,
    pub cookie_secure: bool,
    pub cookie_samesite: String,
    /// Initial admin account, created when the users table is empty
    pub seed_admin_email: String,
    pub seed_admin_password: String,
}

impl AuthConfig {
    pub fn from_env() -> Self {
        Self {
            access_token_ttl: env::var("ACCESS_TOKEN_TTL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(900),
            refresh_token_ttl: env::var("REFRESH_TOKEN_TTL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2_592_000),
            hash_rounds: env::var("HASH_ROUNDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(12),
            jwt_issuer: env::var("JWT_ISSUER").unwrap_or_else(|_| "modelforge".to_string()),
            jwt_private_key_path: env::var("JWT_PRIVATE_KEY_PATH").ok(),
            jwt_public_key_path: env::var("JWT_PUBLIC_KEY_PATH").ok(),
            cookie_secure: env::var("COOKIE_SECURE")
                .map(|v| v.to_lowercase() == "true")
                .unwrap_or(false),
            cookie_samesite: env::var("COOKIE_SAMESITE").unwrap_or_else(|_| "Lax".to_string()),
            seed_admin_email: env::var("SEED_ADMIN_EMAIL")
                .unwrap_or_else(|_| "admin@modelforge.local".to_string()),
            seed_admin_password: env::var("SEED_ADMIN_PASSWORD")
                .unwrap_or_else(|_| "changeme".to_string()),
        }
    }
}
