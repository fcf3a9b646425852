use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "audit_logs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub user_id: Option<i64>,
    pub action: String,
    pub model_id: Option<String>,
    pub model_name: Option<String>,
    pub record_id: Option<String>,
    pub details: Option<Json>,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Audit action types
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum AuditAction {
    // Authentication
    Login,
    LoginFailed,
    Logout,
    UserRegister,
    RefreshTokenRotated,

    // Model lifecycle
    ModelCreate,
    ModelUpdate,
    ModelPublish,
    ModelPublishFileFailed,
    ModelUnpublish,
    ModelDelete,
    ModelRevert,

    // Generic records
    RecordCreate,
    RecordUpdate,
    RecordDelete,

    // System dual-writes
    SystemUserCreate,
    SystemUserUpdate,
    SystemUserDelete,
    SystemRoleCreate,
    SystemRoleUpdate,
    SystemRoleDelete,

    // RBAC
    FeatureGrantRole,
    FeatureGrantUser,
    ModelPermissionsSet,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditAction::Login => write!(f, "LOGIN"),
            AuditAction::LoginFailed => write!(f, "LOGIN_FAILED"),
            AuditAction::Logout => write!(f, "LOGOUT"),
            AuditAction::UserRegister => write!(f, "USER_REGISTER"),
            AuditAction::RefreshTokenRotated => write!(f, "REFRESH_TOKEN_ROTATED"),
            AuditAction::ModelCreate => write!(f, "MODEL_CREATE"),
            AuditAction::ModelUpdate => write!(f, "MODEL_UPDATE"),
            AuditAction::ModelPublish => write!(f, "MODEL_PUBLISH"),
            AuditAction::ModelPublishFileFailed => write!(f, "MODEL_PUBLISH_FILE_FAILED"),
            AuditAction::ModelUnpublish => write!(f, "MODEL_UNPUBLISH"),
            AuditAction::ModelDelete => write!(f, "MODEL_DELETE"),
            AuditAction::ModelRevert => write!(f, "MODEL_REVERT"),
            AuditAction::RecordCreate => write!(f, "RECORD_CREATE"),
            AuditAction::RecordUpdate => write!(f, "RECORD_UPDATE"),
            AuditAction::RecordDelete => write!(f, "RECORD_DELETE"),
            AuditAction::SystemUserCreate => write!(f, "SYSTEM_USER_CREATE"),
            AuditAction::SystemUserUpdate => write!(f, "SYSTEM_USER_UPDATE"),
            AuditAction::SystemUserDelete => write!(f, "SYSTEM_USER_DELETE"),
            AuditAction::SystemRoleCreate => write!(f, "SYSTEM_ROLE_CREATE"),
            AuditAction::SystemRoleUpdate => write!(f, "SYSTEM_ROLE_UPDATE"),
            AuditAction::SystemRoleDelete => write!(f, "SYSTEM_ROLE_DELETE"),
            AuditAction::FeatureGrantRole => write!(f, "FEATURE_GRANT_ROLE"),
            AuditAction::FeatureGrantUser => write!(f, "FEATURE_GRANT_USER"),
            AuditAction::ModelPermissionsSet => write!(f, "MODEL_PERMISSIONS_SET"),
        }
    }
}
