//! Append-only audit log.
//!
//! Writers pass structured details and log inside the same transaction
//! as the mutation they describe. Sensitive-key suppression happens at
//! read time so operators with storage access can still inspect the raw
//! rows.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;
use crate::models::audit_log::{self, AuditAction};
use crate::models::prelude::*;
use crate::state::DbConn;

/// Keys whose values are suppressed before audit details reach a client
const SENSITIVE_KEYS: [&str; 14] = [
    "password",
    "pwd",
    "token",
    "refreshtoken",
    "tokenhash",
    "ssn",
    "creditcard",
    "cvv",
    "ipaddress",
    "authorization",
    "headers",
    "body",
    "payload",
    "email",
];

const MAX_STRING_LEN: usize = 1_000;
const REDACTED: &str = "[REDACTED]";

/// Append an audit entry. Generic over the connection so callers can
/// log inside an open transaction.
pub async fn append<C: ConnectionTrait>(
    db: &C,
    user_id: Option<i64>,
    action: AuditAction,
    model_id: Option<String>,
    model_name: Option<String>,
    record_id: Option<String>,
    details: Option<Value>,
) -> Result<()> {
    let entry = audit_log::ActiveModel {
        id: Set(uuid::Uuid::new_v4().to_string()),
        user_id: Set(user_id),
        action: Set(action.to_string()),
        model_id: Set(model_id),
        model_name: Set(model_name),
        record_id: Set(record_id),
        details: Set(details),
        created_at: Set(Utc::now()),
    };
    entry.insert(db).await?;
    Ok(())
}

/// Recursively redact sensitive keys and oversized strings. Key matching
/// is case-insensitive.
pub fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, inner) in map {
                if SENSITIVE_KEYS.contains(&key.to_lowercase().as_str()) {
                    out.insert(key.clone(), Value::String(REDACTED.to_string()));
                } else {
                    out.insert(key.clone(), redact(inner));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        Value::String(s) if s.len() > MAX_STRING_LEN => Value::String(REDACTED.to_string()),
        other => other.clone(),
    }
}

/// A redacted audit entry as returned to support clients
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntryView {
    pub id: String,
    #[serde(rename = "userId")]
    pub user_id: Option<i64>,
    pub action: String,
    #[serde(rename = "modelId")]
    pub model_id: Option<String>,
    #[serde(rename = "modelName")]
    pub model_name: Option<String>,
    #[serde(rename = "recordId")]
    pub record_id: Option<String>,
    pub details: Option<Value>,
    #[serde(rename = "createdAt")]
    pub created_at: chrono::DateTime<Utc>,
}

/// Audit service: read side for the support endpoints
#[derive(Clone)]
pub struct AuditService {
    db: DbConn,
}

impl AuditService {
    pub fn new(db: DbConn) -> Self {
        Self { db }
    }

    /// Most recent entries, newest first, redacted. The requested count
    /// is clamped to [1, 100].
    pub async fn recent(&self, limit: u64) -> Result<Vec<AuditEntryView>> {
        let limit = limit.clamp(1, 100);

        let rows = AuditLog::find()
            .order_by_desc(audit_log::Column::CreatedAt)
            .limit(limit)
            .all(&self.db)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| AuditEntryView {
                id: row.id,
                user_id: row.user_id,
                action: row.action,
                model_id: row.model_id,
                model_name: row.model_name,
                record_id: row.record_id,
                details: row.details.as_ref().map(redact),
                created_at: row.created_at,
            })
            .collect())
    }

    pub async fn total_events(&self) -> Result<u64> {
        Ok(AuditLog::find().count(&self.db).await?)
    }

    pub async fn events_since(&self, since: chrono::DateTime<Utc>) -> Result<u64> {
        Ok(AuditLog::find()
            .filter(audit_log::Column::CreatedAt.gte(since))
            .count(&self.db)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn redacts_sensitive_keys_case_insensitively() {
        let out = redact(&json!({
            "password": "hunter2",
            "RefreshToken": "abc",
            "Email": "a@b.c",
            "kept": "value"
        }));
        assert_eq!(out["password"], REDACTED);
        assert_eq!(out["RefreshToken"], REDACTED);
        assert_eq!(out["Email"], REDACTED);
        assert_eq!(out["kept"], "value");
    }

    #[test]
    fn redacts_nested_objects_and_arrays() {
        let out = redact(&json!({
            "outer": {"inner": {"tokenHash": "xyz"}},
            "list": [{"cvv": "123"}, {"ok": 1}]
        }));
        assert_eq!(out["outer"]["inner"]["tokenHash"], REDACTED);
        assert_eq!(out["list"][0]["cvv"], REDACTED);
        assert_eq!(out["list"][1]["ok"], 1);
    }

    #[test]
    fn redacts_oversized_strings() {
        let long = "x".repeat(MAX_STRING_LEN + 1);
        let out = redact(&json!({ "note": long }));
        assert_eq!(out["note"], REDACTED);

        let short = "x".repeat(MAX_STRING_LEN);
        let out = redact(&json!({ "note": short.clone() }));
        assert_eq!(out["note"], short);
    }
}
