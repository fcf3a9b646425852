//! Permission catalog: the canonical set of permission keys.
//!
//! Initialized at startup and treated as immutable afterwards; the four
//! model-action keys are a hard invariant — authorization and publish
//! fail with `NotInitialized` when one is missing.

use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set};

use crate::error::{AppError, Result};
use crate::models::permission::{self, CATEGORY_FEATURE, CATEGORY_MODEL_ACTION};
use crate::models::prelude::*;

/// The four dynamic-CRUD actions, keyed `MODEL.<ACTION>` in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelAction {
    Create,
    Read,
    Update,
    Delete,
}

pub const ALL_ACTIONS: [ModelAction; 4] = [
    ModelAction::Create,
    ModelAction::Read,
    ModelAction::Update,
    ModelAction::Delete,
];

impl ModelAction {
    pub fn key(&self) -> &'static str {
        match self {
            ModelAction::Create => "MODEL.CREATE",
            ModelAction::Read => "MODEL.READ",
            ModelAction::Update => "MODEL.UPDATE",
            ModelAction::Delete => "MODEL.DELETE",
        }
    }

    /// Short form used in rbac maps ("CREATE", "READ", ...)
    pub fn short(&self) -> &'static str {
        match self {
            ModelAction::Create => "CREATE",
            ModelAction::Read => "READ",
            ModelAction::Update => "UPDATE",
            ModelAction::Delete => "DELETE",
        }
    }

    pub fn from_short(raw: &str) -> Option<Self> {
        match raw.to_uppercase().as_str() {
            "CREATE" => Some(ModelAction::Create),
            "READ" => Some(ModelAction::Read),
            "UPDATE" => Some(ModelAction::Update),
            "DELETE" => Some(ModelAction::Delete),
            _ => None,
        }
    }
}

/// Idempotent upsert; the key is normalized to upper-case.
pub async fn ensure<C: ConnectionTrait>(
    db: &C,
    key: &str,
    name: &str,
    category: &str,
) -> Result<permission::Model> {
    let key = key.to_uppercase();

    if let Some(existing) = Permission::find()
        .filter(permission::Column::Key.eq(&key))
        .one(db)
        .await?
    {
        return Ok(existing);
    }

    let row = permission::ActiveModel {
        id: Set(uuid::Uuid::new_v4().to_string()),
        key: Set(key),
        name: Set(name.to_string()),
        category: Set(category.to_string()),
    };
    Ok(row.insert(db).await?)
}

pub async fn resolve<C: ConnectionTrait>(db: &C, key: &str) -> Result<Option<permission::Model>> {
    Ok(Permission::find()
        .filter(permission::Column::Key.eq(key.to_uppercase()))
        .one(db)
        .await?)
}

/// Resolve a key that is required to exist (seeded at startup).
pub async fn require<C: ConnectionTrait>(db: &C, key: &str) -> Result<permission::Model> {
    resolve(db, key).await?.ok_or_else(|| {
        AppError::NotInitialized(format!("Permission catalog is missing '{}'", key))
    })
}

/// Ensure every required catalog entry exists. Run once at startup; the
/// seed migration normally provides these, this covers databases created
/// before a key was introduced.
pub async fn ensure_catalog<C: ConnectionTrait>(db: &C) -> Result<()> {
    for action in ALL_ACTIONS {
        ensure(db, action.key(), action.short(), CATEGORY_MODEL_ACTION).await?;
    }

    let features = [
        ("CREATE_ROLE", "Create roles"),
        ("CREATE_USER", "Register users"),
        ("MANAGE_MODELS", "Author model definitions"),
        ("PUBLISH_MODEL", "Publish and unpublish models"),
        ("MANAGE_FEATURES", "Manage feature grants"),
        ("VIEW_SUPPORT", "View support statistics"),
        ("VIEW_AUDIT", "View the audit log"),
    ];
    for (key, name) in features {
        ensure(db, key, name, CATEGORY_FEATURE).await?;
    }

    Ok(())
}
