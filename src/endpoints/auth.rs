//! Authentication endpoints: token issuance, rotation, logout, and
//! operator-driven registration.

use axum::{
    extract::{Extension, State},
    http::{header, HeaderMap, HeaderValue},
    middleware as axum_middleware,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::CONFIG;
use crate::error::{AppError, Result};
use crate::middleware::{require_auth, AuthenticatedUser};
use crate::models::audit_log::AuditAction;
use crate::services::identity::{self, UserWithRole};
use crate::services::{access, audit, security};
use crate::state::AppState;

const REFRESH_COOKIE: &str = "refresh_token";

/// Auth routes. Token issuance and logout authenticate by themselves;
/// registration requires a Bearer token, enforced at the route level.
pub fn auth_routes(state: AppState) -> Router {
    Router::new()
        .route("/token", post(issue_token))
        .route("/logout", post(logout))
        .route(
            "/register",
            post(register).route_layer(axum_middleware::from_fn_with_state(
                state.clone(),
                require_auth,
            )),
        )
        .with_state(state)
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub use_cookie: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub id: i64,
    pub email: String,
    pub name: Option<String>,
    pub role: String,
}

impl From<&UserWithRole> for UserInfo {
    fn from(u: &UserWithRole) -> Self {
        Self {
            id: u.user.id,
            email: u.user.email.clone(),
            name: u.user.name.clone(),
            role: u.role.name.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: Option<String>,
    pub role_name: Option<String>,
}

// ============================================================================
// Cookie Helpers
// ============================================================================

fn refresh_cookie(token: &str, max_age: i64) -> HeaderValue {
    let cookie = format!(
        "{}={}; HttpOnly; SameSite={}; Path=/auth; Max-Age={}{}",
        REFRESH_COOKIE,
        token,
        CONFIG.auth.cookie_samesite,
        max_age,
        if CONFIG.auth.cookie_secure {
            "; Secure"
        } else {
            ""
        }
    );
    HeaderValue::from_str(&cookie).unwrap_or_else(|_| HeaderValue::from_static(""))
}

fn clear_refresh_cookie() -> HeaderValue {
    refresh_cookie("", 0)
}

fn cookie_refresh_token(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    for cookie in cookies.split(';') {
        if let Some(value) = cookie.trim().strip_prefix(&format!("{}=", REFRESH_COOKIE)) {
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

// ============================================================================
// Endpoint Handlers
// ============================================================================

/// `POST /auth/token` — password grant or refresh rotation, depending on
/// which fields the body carries.
async fn issue_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<TokenRequest>>,
) -> Result<Response> {
    let req = body.map(|Json(b)| b).unwrap_or_default();

    let user = match (&req.email, &req.password) {
        (Some(email), Some(password)) => login(&state, email, password).await?,
        _ => {
            let wire = req
                .refresh_token
                .clone()
                .or_else(|| cookie_refresh_token(&headers))
                .ok_or_else(|| {
                    AppError::BadRequest(
                        "Provide email and password, or a refresh token".to_string(),
                    )
                })?;
            // Rotation validates and revokes the old row in one
            // transaction; the loser of a concurrent rotation observes
            // the revoked row and gets 401.
            let (new_row, new_wire) =
                security::rotate_refresh_token(&state.db, &wire, None).await?;
            let user = identity::find_user_by_id(&state.db, new_row.user_id)
                .await?
                .ok_or_else(|| {
                    AppError::Unauthorized(
                        "User no longer exists. Please sign in again.".to_string(),
                    )
                })?;
            return token_response(&state, &user, new_row, new_wire, req.use_cookie).await;
        }
    };

    let (row, wire) = security::issue_refresh_token(&state.db, user.user.id, None).await?;

    audit::append(
        &state.db,
        Some(user.user.id),
        AuditAction::Login,
        None,
        None,
        None,
        None,
    )
    .await?;

    token_response(&state, &user, row, wire, req.use_cookie).await
}

async fn login(state: &AppState, email: &str, password: &str) -> Result<UserWithRole> {
    let found = identity::find_user_by_email(&state.db, email).await?;

    let Some(user) = found else {
        audit::append(
            &state.db,
            None,
            AuditAction::LoginFailed,
            None,
            None,
            None,
            Some(json!({ "reason": "unknown user" })),
        )
        .await?;
        return Err(AppError::Unauthorized("Invalid credentials".to_string()));
    };

    if !user.user.is_active || !security::verify_password(password, &user.user.hashed_password) {
        audit::append(
            &state.db,
            Some(user.user.id),
            AuditAction::LoginFailed,
            None,
            None,
            None,
            None,
        )
        .await?;
        return Err(AppError::Unauthorized("Invalid credentials".to_string()));
    }

    Ok(user)
}

async fn token_response(
    _state: &AppState,
    user: &UserWithRole,
    refresh_row: crate::models::refresh_token::Model,
    refresh_wire: String,
    use_cookie: bool,
) -> Result<Response> {
    let access_token = security::create_access_token(user)?;

    let mut body = json!({
        "success": true,
        "accessToken": access_token,
        "refreshExpiresAt": refresh_row.expires_at,
        "user": UserInfo::from(user),
    });

    let mut headers = HeaderMap::new();
    if use_cookie {
        headers.insert(
            header::SET_COOKIE,
            refresh_cookie(&refresh_wire, CONFIG.auth.refresh_token_ttl),
        );
    } else {
        body["refreshToken"] = json!(refresh_wire);
    }

    Ok((headers, Json(body)).into_response())
}

/// `POST /auth/logout` — revoke the refresh token from body or cookie
async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<LogoutRequest>>,
) -> Result<Response> {
    let wire = body
        .and_then(|Json(b)| b.refresh_token)
        .or_else(|| cookie_refresh_token(&headers));

    if let Some(wire) = wire {
        if let Ok(row) = security::validate_refresh_token(&state.db, &wire).await {
            audit::append(
                &state.db,
                Some(row.user_id),
                AuditAction::Logout,
                None,
                None,
                None,
                None,
            )
            .await?;
        }
        security::revoke_refresh_token(&state.db, &wire).await?;
    }

    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::SET_COOKIE, clear_refresh_cookie());

    Ok((response_headers, Json(json!({ "success": true }))).into_response())
}

/// `POST /auth/register` — authenticated; requires the CREATE_USER
/// feature (Admin bypasses).
async fn register(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthenticatedUser>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<serde_json::Value>> {
    access::require_feature(&state.db, &auth_user.0, "CREATE_USER").await?;

    let created = identity::register_user(
        &state.db,
        &req.email,
        &req.password,
        req.name.as_deref(),
        req.role_name.as_deref(),
    )
    .await?;

    audit::append(
        &state.db,
        Some(auth_user.0.user.id),
        AuditAction::UserRegister,
        None,
        None,
        None,
        Some(json!({ "createdUserId": created.id })),
    )
    .await?;

    Ok(Json(json!({
        "success": true,
        "user": { "id": created.id, "email": created.email, "name": created.name }
    })))
}
