use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use rand::Rng;
use rsa::{
    pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding},
    RsaPrivateKey, RsaPublicKey,
};
use sea_orm::{ActiveModelTrait, ConnectionTrait, DatabaseConnection, EntityTrait, Set, TransactionTrait};
use serde::{Deserialize, Serialize};

use crate::config::CONFIG;
use crate::error::{AppError, Result};
use crate::models::audit_log::AuditAction;
use crate::models::prelude::*;
use crate::models::refresh_token;
use crate::services::audit;
use crate::services::identity::UserWithRole;

/// Refresh secrets are 48 random bytes, 96 hex characters on the wire
const REFRESH_SECRET_BYTES: usize = 48;

// In-memory key cache. The verification key is read by every request
// path; the signing key only by token issuance.
static PRIVATE_KEY: Lazy<RwLock<Option<String>>> = Lazy::new(|| RwLock::new(None));
static PUBLIC_KEY: Lazy<RwLock<Option<String>>> = Lazy::new(|| RwLock::new(None));

/// JWT access-token claims
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub role: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

/// Initialize JWT keys (call once during startup). Loads the PEM pair
/// from the configured paths when both are set; otherwise generates an
/// ephemeral pair, which is fine for development but means tokens do not
/// survive a restart.
pub fn init_jwt_keys() -> Result<()> {
    let (private_pem, public_pem) = match (
        &CONFIG.auth.jwt_private_key_path,
        &CONFIG.auth.jwt_public_key_path,
    ) {
        (Some(private_path), Some(public_path)) => {
            tracing::info!("Loading JWT key pair from configured paths");
            (
                std::fs::read_to_string(private_path)?,
                std::fs::read_to_string(public_path)?,
            )
        }
        _ => {
            tracing::warn!("JWT key paths not configured, generating an ephemeral pair");
            generate_rsa_key_pair()?
        }
    };

    *PRIVATE_KEY.write() = Some(private_pem);
    *PUBLIC_KEY.write() = Some(public_pem);
    Ok(())
}

fn get_private_key() -> Result<String> {
    PRIVATE_KEY.read().clone().ok_or_else(|| {
        AppError::Internal("JWT keys not initialized. Call init_jwt_keys() first.".to_string())
    })
}

fn get_public_key() -> Result<String> {
    PUBLIC_KEY.read().clone().ok_or_else(|| {
        AppError::Internal("JWT keys not initialized. Call init_jwt_keys() first.".to_string())
    })
}

/// Generate an RSA key pair for JWT signing
pub fn generate_rsa_key_pair() -> Result<(String, String)> {
    let mut rng = rand::thread_rng();
    let private_key = RsaPrivateKey::new(&mut rng, 2048)
        .map_err(|e| AppError::Internal(format!("Failed to generate RSA key: {}", e)))?;

    let public_key = RsaPublicKey::from(&private_key);

    let private_pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| AppError::Internal(format!("Failed to serialize private key: {}", e)))?
        .to_string();

    let public_pem = public_key
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| AppError::Internal(format!("Failed to serialize public key: {}", e)))?;

    Ok((private_pem, public_pem))
}

/// Hash a password using bcrypt with the configured cost
pub fn hash_password(password: &str) -> Result<String> {
    bcrypt::hash(password, CONFIG.auth.hash_rounds)
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))
}

/// Verify a password against its hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

/// Create a signed access token for a user
pub fn create_access_token(user: &UserWithRole) -> Result<String> {
    let now = Utc::now();
    let exp = now + Duration::seconds(CONFIG.auth.access_token_ttl);

    let claims = Claims {
        sub: user.user.id.to_string(),
        email: user.user.email.clone(),
        role: user.role.name.clone(),
        iss: CONFIG.auth.jwt_issuer.clone(),
        iat: now.timestamp(),
        exp: exp.timestamp(),
    };

    let private_key = get_private_key()?;
    let encoding_key = EncodingKey::from_rsa_pem(private_key.as_bytes())
        .map_err(|e| AppError::Internal(format!("Invalid private key: {}", e)))?;

    let header = Header::new(jsonwebtoken::Algorithm::RS256);
    encode(&header, &claims, &encoding_key).map_err(|e| e.into())
}

/// Decode and validate an access token
pub fn decode_token(token: &str) -> Result<Claims> {
    let public_key = get_public_key()?;
    let decoding_key = DecodingKey::from_rsa_pem(public_key.as_bytes())
        .map_err(|e| AppError::Internal(format!("Invalid public key: {}", e)))?;

    let mut validation = Validation::new(jsonwebtoken::Algorithm::RS256);
    validation.validate_exp = true;
    validation.validate_aud = false;
    validation.leeway = 0;

    let token_data = decode::<Claims>(token, &decoding_key, &validation)?;
    Ok(token_data.claims)
}

/// Generate a cryptographically random hex string of `bytes * 2` chars
fn generate_secret(bytes: usize) -> String {
    let mut rng = rand::thread_rng();
    let raw: Vec<u8> = (0..bytes).map(|_| rng.gen()).collect();
    hex::encode(raw)
}

/// Issue a fresh refresh token. Returns the persisted row and the wire
/// representation `"<row_id>::<secret>"`; only the hash is stored.
pub async fn issue_refresh_token<C: ConnectionTrait>(
    db: &C,
    user_id: i64,
    created_by_ip: Option<String>,
) -> Result<(refresh_token::Model, String)> {
    let secret = generate_secret(REFRESH_SECRET_BYTES);
    let id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now();

    let row = refresh_token::ActiveModel {
        id: Set(id.clone()),
        token_hash: Set(bcrypt::hash(&secret, CONFIG.auth.hash_rounds)?),
        user_id: Set(user_id),
        created_at: Set(now),
        expires_at: Set(now + Duration::seconds(CONFIG.auth.refresh_token_ttl)),
        revoked: Set(false),
        revoked_at: Set(None),
        replaced_by_id: Set(None),
        created_by_ip: Set(created_by_ip),
    };
    let model = row.insert(db).await?;

    Ok((model, format!("{}::{}", id, secret)))
}

fn parse_wire(wire: &str) -> Result<(&str, &str)> {
    wire.split_once("::").ok_or_else(|| {
        AppError::Unauthorized("Malformed refresh token. Please sign in again.".to_string())
    })
}

/// Validate a wire-format refresh token against its stored row
pub async fn validate_refresh_token<C: ConnectionTrait>(
    db: &C,
    wire: &str,
) -> Result<refresh_token::Model> {
    let (id, secret) = parse_wire(wire)?;

    let row = RefreshToken::find_by_id(id).one(db).await?.ok_or_else(|| {
        AppError::Unauthorized("Unknown refresh token. Please sign in again.".to_string())
    })?;

    if row.revoked {
        return Err(AppError::Unauthorized(
            "Refresh token has been revoked or rotated. Please sign in again.".to_string(),
        ));
    }
    if row.expires_at < Utc::now() {
        return Err(AppError::Unauthorized(
            "Refresh token has expired. Please sign in again.".to_string(),
        ));
    }
    if !bcrypt::verify(secret, &row.token_hash).unwrap_or(false) {
        return Err(AppError::Unauthorized(
            "Refresh token is invalid. Please sign in again.".to_string(),
        ));
    }

    Ok(row)
}

/// Rotate a refresh token: validate the old one, issue a replacement,
/// and revoke the old row — all in one transaction. Of two concurrent
/// rotations of the same token, the loser observes the revoked row and
/// gets `Unauthorized`.
pub async fn rotate_refresh_token(
    db: &DatabaseConnection,
    wire: &str,
    created_by_ip: Option<String>,
) -> Result<(refresh_token::Model, String)> {
    let txn = db.begin().await?;

    let old = validate_refresh_token(&txn, wire).await?;
    let (new_row, new_wire) = issue_refresh_token(&txn, old.user_id, created_by_ip).await?;

    let mut revoke: refresh_token::ActiveModel = old.clone().into();
    revoke.revoked = Set(true);
    revoke.revoked_at = Set(Some(Utc::now()));
    revoke.replaced_by_id = Set(Some(new_row.id.clone()));
    revoke.update(&txn).await?;

    audit::append(
        &txn,
        Some(old.user_id),
        AuditAction::RefreshTokenRotated,
        None,
        None,
        None,
        Some(serde_json::json!({ "rotatedTokenId": old.id, "newTokenId": new_row.id })),
    )
    .await?;

    txn.commit().await?;
    Ok((new_row, new_wire))
}

/// Mark a refresh token revoked. Unknown or already-revoked tokens are
/// not an error on logout.
pub async fn revoke_refresh_token<C: ConnectionTrait>(db: &C, wire: &str) -> Result<()> {
    let Ok((id, _)) = parse_wire(wire) else {
        return Ok(());
    };
    let Some(row) = RefreshToken::find_by_id(id).one(db).await? else {
        return Ok(());
    };
    if row.revoked {
        return Ok(());
    }

    let mut revoke: refresh_token::ActiveModel = row.into();
    revoke.revoked = Set(true);
    revoke.revoked_at = Set(Some(Utc::now()));
    revoke.update(db).await?;
    Ok(())
}
