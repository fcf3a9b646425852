//! Layered authorization engine.
//!
//! Grant resolution order, most specific first: user-level override,
//! per-model role grant, role-level grant. The Admin role short-circuits
//! every check. For READ/UPDATE/DELETE on models with an owner field,
//! row ownership is the final fallback.

use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set,
};
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::models::prelude::*;
use crate::models::{
    model_definition, model_role_permission, record, role_permission, user_permission,
};
use crate::services::catalog::{self, ModelAction, ALL_ACTIONS};
use crate::services::identity::UserWithRole;

async fn user_override<C: ConnectionTrait>(
    db: &C,
    user_id: i64,
    permission_id: &str,
) -> Result<Option<bool>> {
    Ok(UserPermission::find()
        .filter(user_permission::Column::UserId.eq(user_id))
        .filter(user_permission::Column::PermissionId.eq(permission_id))
        .one(db)
        .await?
        .map(|row| row.granted))
}

async fn role_grant<C: ConnectionTrait>(
    db: &C,
    role_id: i64,
    permission_id: &str,
) -> Result<Option<bool>> {
    Ok(RolePermission::find()
        .filter(role_permission::Column::RoleId.eq(role_id))
        .filter(role_permission::Column::PermissionId.eq(permission_id))
        .one(db)
        .await?
        .map(|row| row.granted))
}

async fn model_role_grant<C: ConnectionTrait>(
    db: &C,
    model_id: &str,
    role_id: i64,
    permission_id: &str,
) -> Result<Option<bool>> {
    Ok(ModelRolePermission::find()
        .filter(model_role_permission::Column::ModelId.eq(model_id))
        .filter(model_role_permission::Column::RoleId.eq(role_id))
        .filter(model_role_permission::Column::PermissionId.eq(permission_id))
        .one(db)
        .await?
        .map(|row| row.allowed))
}

/// Feature check: Admin, else user override, else role grant, else deny.
pub async fn is_feature_allowed<C: ConnectionTrait>(
    db: &C,
    user: &UserWithRole,
    feature_key: &str,
) -> Result<bool> {
    if user.is_admin() {
        return Ok(true);
    }

    let Some(permission) = catalog::resolve(db, feature_key).await? else {
        return Ok(false);
    };

    if let Some(granted) = user_override(db, user.user.id, &permission.id).await? {
        return Ok(granted);
    }
    if let Some(granted) = role_grant(db, user.role.id, &permission.id).await? {
        return Ok(granted);
    }
    Ok(false)
}

/// Require a feature; 403 when it is not granted.
pub async fn require_feature<C: ConnectionTrait>(
    db: &C,
    user: &UserWithRole,
    feature_key: &str,
) -> Result<()> {
    if is_feature_allowed(db, user, feature_key).await? {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "Feature '{}' required",
            feature_key
        )))
    }
}

/// Model-action check for the dynamic CRUD surface.
///
/// The record id is only consulted for the ownership fallback; handlers
/// pass it for READ/UPDATE/DELETE of a single row.
pub async fn authorize<C: ConnectionTrait>(
    db: &C,
    user: &UserWithRole,
    model_name: &str,
    action: ModelAction,
    record_id: Option<&str>,
) -> Result<()> {
    let model = ModelDefinition::find()
        .filter(model_definition::Column::Name.eq(model_name))
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Model '{}' not found", model_name)))?;

    if user.is_admin() {
        return Ok(());
    }

    let permission = catalog::require(db, action.key()).await?;

    if let Some(granted) = user_override(db, user.user.id, &permission.id).await? {
        return decide(granted, model_name, action);
    }
    if let Some(allowed) = model_role_grant(db, &model.id, user.role.id, &permission.id).await? {
        return decide(allowed, model_name, action);
    }
    if let Some(granted) = role_grant(db, user.role.id, &permission.id).await? {
        return decide(granted, model_name, action);
    }

    // Ownership fallback for row-scoped reads and writes
    if !matches!(action, ModelAction::Create) {
        if let (Some(owner_field), Some(record_id)) = (&model.owner_field, record_id) {
            if let Some(row) = Record::find_by_id(record_id)
                .filter(record::Column::ModelId.eq(&model.id))
                .one(db)
                .await?
            {
                if is_owner(&row, owner_field, user.user.id) {
                    return Ok(());
                }
            }
        }
    }

    Err(AppError::Forbidden(format!(
        "Not allowed to {} on '{}'",
        action.short(),
        model_name
    )))
}

fn decide(allowed: bool, model_name: &str, action: ModelAction) -> Result<()> {
    if allowed {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "Not allowed to {} on '{}'",
            action.short(),
            model_name
        )))
    }
}

/// Ownership match: the record's owner column, or the owner field inside
/// its data payload (stored as a number or a string).
fn is_owner(row: &record::Model, owner_field: &str, user_id: i64) -> bool {
    if row.owner_id == Some(user_id) {
        return true;
    }
    match row.data.get(owner_field) {
        Some(serde_json::Value::Number(n)) => n.as_i64() == Some(user_id),
        Some(serde_json::Value::String(s)) => s == &user_id.to_string(),
        _ => false,
    }
}

/// One row of the merged permission view
#[derive(Debug, Clone, Serialize)]
pub struct MergedModelPermissions {
    #[serde(rename = "modelId")]
    pub model_id: String,
    #[serde(rename = "modelName")]
    pub model_name: String,
    pub published: bool,
    pub create: bool,
    pub read: bool,
    pub update: bool,
    pub delete: bool,
}

/// Effective CREATE/READ/UPDATE/DELETE per model for a user, with
/// priority user override → model-role grant → role grant → false.
/// Admin short-circuits to all-true.
pub async fn merged_model_permissions<C: ConnectionTrait>(
    db: &C,
    target: &UserWithRole,
    include_unpublished: bool,
) -> Result<Vec<MergedModelPermissions>> {
    let mut query = ModelDefinition::find();
    if !include_unpublished {
        query = query.filter(model_definition::Column::Published.eq(true));
    }
    let models = query.all(db).await?;

    let mut out = Vec::with_capacity(models.len());
    for model in models {
        let mut flags = [false; 4];
        for (i, action) in ALL_ACTIONS.iter().enumerate() {
            flags[i] = if target.is_admin() {
                true
            } else {
                let permission = catalog::require(db, action.key()).await?;
                if let Some(granted) = user_override(db, target.user.id, &permission.id).await? {
                    granted
                } else if let Some(allowed) =
                    model_role_grant(db, &model.id, target.role.id, &permission.id).await?
                {
                    allowed
                } else {
                    role_grant(db, target.role.id, &permission.id)
                        .await?
                        .unwrap_or(false)
                }
            };
        }
        out.push(MergedModelPermissions {
            model_id: model.id,
            model_name: model.name,
            published: model.published,
            create: flags[0],
            read: flags[1],
            update: flags[2],
            delete: flags[3],
        });
    }
    Ok(out)
}

/// Outcome of a user-level feature grant request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum GrantOutcome {
    Created,
    Updated,
    AlreadyGrantedViaRole,
}

/// Upsert a role-level feature grant
pub async fn grant_role_feature<C: ConnectionTrait>(
    db: &C,
    role_id: i64,
    feature_key: &str,
    granted: bool,
) -> Result<role_permission::Model> {
    let permission = catalog::require(db, feature_key).await?;

    if let Some(existing) = RolePermission::find()
        .filter(role_permission::Column::RoleId.eq(role_id))
        .filter(role_permission::Column::PermissionId.eq(&permission.id))
        .one(db)
        .await?
    {
        let mut row: role_permission::ActiveModel = existing.into();
        row.granted = Set(granted);
        return Ok(row.update(db).await?);
    }

    let row = role_permission::ActiveModel {
        role_id: Set(role_id),
        permission_id: Set(permission.id),
        granted: Set(granted),
        ..Default::default()
    };
    Ok(row.insert(db).await?)
}

/// User-level feature grant with the role-grant safety rule: granting a
/// feature the role already grants is a no-op; revoking one is refused —
/// the role itself must change.
pub async fn grant_user_feature<C: ConnectionTrait>(
    db: &C,
    user: &UserWithRole,
    feature_key: &str,
    granted: bool,
) -> Result<GrantOutcome> {
    let permission = catalog::require(db, feature_key).await?;

    let via_role = role_grant(db, user.role.id, &permission.id)
        .await?
        .unwrap_or(false);

    if via_role {
        if granted {
            return Ok(GrantOutcome::AlreadyGrantedViaRole);
        }
        return Err(AppError::conflict(format!(
            "Cannot revoke role-granted feature '{}' at user level; adjust the role or change the user's role",
            feature_key
        )));
    }

    if let Some(existing) = UserPermission::find()
        .filter(user_permission::Column::UserId.eq(user.user.id))
        .filter(user_permission::Column::PermissionId.eq(&permission.id))
        .one(db)
        .await?
    {
        let mut row: user_permission::ActiveModel = existing.into();
        row.granted = Set(granted);
        row.update(db).await?;
        return Ok(GrantOutcome::Updated);
    }

    let row = user_permission::ActiveModel {
        user_id: Set(user.user.id),
        permission_id: Set(permission.id),
        granted: Set(granted),
        ..Default::default()
    };
    row.insert(db).await?;
    Ok(GrantOutcome::Created)
}

/// Replace the per-model action grants for one role. `ALL` expands to
/// the four actions; unknown entries are rejected.
pub async fn set_model_role_permissions<C: ConnectionTrait>(
    db: &C,
    model_id: &str,
    role_id: i64,
    permissions: &[String],
) -> Result<()> {
    let mut actions: Vec<ModelAction> = Vec::new();
    for raw in permissions {
        if raw.eq_ignore_ascii_case("ALL") {
            actions = ALL_ACTIONS.to_vec();
            break;
        }
        let action = ModelAction::from_short(raw)
            .ok_or_else(|| AppError::BadRequest(format!("Unknown model action '{}'", raw)))?;
        if !actions.contains(&action) {
            actions.push(action);
        }
    }

    ModelRolePermission::delete_many()
        .filter(model_role_permission::Column::ModelId.eq(model_id))
        .filter(model_role_permission::Column::RoleId.eq(role_id))
        .exec(db)
        .await?;

    for action in actions {
        let permission = catalog::require(db, action.key()).await?;
        let row = model_role_permission::ActiveModel {
            model_id: Set(model_id.to_string()),
            role_id: Set(role_id),
            permission_id: Set(permission.id),
            allowed: Set(true),
            ..Default::default()
        };
        row.insert(db).await?;
    }

    Ok(())
}
