//! Authentication middleware.
//!
//! Validates the Bearer access token, loads the user with its role, and
//! stores it in request extensions for handlers and the authorization
//! engine.

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

use crate::services::identity::{self, UserWithRole};
use crate::services::security::decode_token;
use crate::state::AppState;

/// Authenticated user stored in request extensions
#[derive(Clone)]
pub struct AuthenticatedUser(pub UserWithRole);

/// Auth middleware that validates Bearer tokens.
///
/// Returns 401 Unauthorized if the token is missing, invalid, or the
/// user no longer exists or is inactive.
pub async fn require_auth(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let token = match extract_bearer_token(&req) {
        Some(t) => t,
        None => {
            return unauthorized_response("Missing or invalid Authorization header");
        }
    };

    let user = match validate_token_and_get_user(&state, &token).await {
        Ok(u) => u,
        Err(msg) => {
            return unauthorized_response(&msg);
        }
    };

    req.extensions_mut().insert(AuthenticatedUser(user));

    next.run(req).await
}

fn extract_bearer_token(req: &Request) -> Option<String> {
    let auth_header = req.headers().get(AUTHORIZATION)?;
    let auth_str = auth_header.to_str().ok()?;
    let token = auth_str.strip_prefix("Bearer ")?;
    Some(token.to_string())
}

async fn validate_token_and_get_user(state: &AppState, token: &str) -> Result<UserWithRole, String> {
    let claims = decode_token(token).map_err(|_| "Invalid or expired token".to_string())?;

    let user_id: i64 = claims
        .sub
        .parse()
        .map_err(|_| "Invalid token subject".to_string())?;

    let found = identity::find_user_by_id(&state.db, user_id)
        .await
        .map_err(|e| format!("Database error: {}", e))?;

    match found {
        Some(user) if user.user.is_active => Ok(user),
        Some(_) => Err("User account is inactive".to_string()),
        None => Err("User not found".to_string()),
    }
}

fn unauthorized_response(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({
            "success": false,
            "message": message
        })),
    )
        .into_response()
}
