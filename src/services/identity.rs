//! Identity store: users, roles, and their persistence.
//!
//! The origin tables here are the source of truth for system entities;
//! the record service mirrors them into the generic record space.

use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set};

use crate::error::{AppError, Result};
use crate::models::prelude::*;
use crate::models::{role, user};
use crate::services::security;

pub const DEFAULT_ROLE: &str = "Viewer";
pub const ADMIN_ROLE: &str = "Admin";

/// A user with its role eagerly resolved
#[derive(Debug, Clone)]
pub struct UserWithRole {
    pub user: user::Model,
    pub role: role::Model,
}

impl UserWithRole {
    pub fn is_admin(&self) -> bool {
        self.role.name == ADMIN_ROLE
    }
}

pub async fn find_role_by_name<C: ConnectionTrait>(
    db: &C,
    name: &str,
) -> Result<Option<role::Model>> {
    Ok(Role::find()
        .filter(role::Column::Name.eq(name))
        .one(db)
        .await?)
}

pub async fn find_user_by_id<C: ConnectionTrait>(db: &C, id: i64) -> Result<Option<UserWithRole>> {
    let Some(user) = User::find_by_id(id).one(db).await? else {
        return Ok(None);
    };
    let role = Role::find_by_id(user.role_id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::Internal(format!("User {} has a dangling role", user.id)))?;
    Ok(Some(UserWithRole { user, role }))
}

pub async fn find_user_by_email<C: ConnectionTrait>(
    db: &C,
    email: &str,
) -> Result<Option<UserWithRole>> {
    let Some(user) = User::find()
        .filter(user::Column::Email.eq(email))
        .one(db)
        .await?
    else {
        return Ok(None);
    };
    let role = Role::find_by_id(user.role_id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::Internal(format!("User {} has a dangling role", user.id)))?;
    Ok(Some(UserWithRole { user, role }))
}

/// Create a user with a salted-hash password. The role defaults to
/// "Viewer" when unspecified; a duplicate email is a conflict.
pub async fn register_user<C: ConnectionTrait>(
    db: &C,
    email: &str,
    password: &str,
    name: Option<&str>,
    role_name: Option<&str>,
) -> Result<user::Model> {
    if User::find()
        .filter(user::Column::Email.eq(email))
        .one(db)
        .await?
        .is_some()
    {
        return Err(AppError::conflict(format!(
            "A user with email '{}' already exists",
            email
        )));
    }

    let role_name = role_name.unwrap_or(DEFAULT_ROLE);
    let role = find_role_by_name(db, role_name)
        .await?
        .ok_or_else(|| AppError::BadRequest(format!("Unknown role '{}'", role_name)))?;

    let now = Utc::now();
    let new_user = user::ActiveModel {
        email: Set(email.to_string()),
        hashed_password: Set(security::hash_password(password)?),
        name: Set(name.map(|n| n.to_string())),
        is_active: Set(true),
        role_id: Set(role.id),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };

    Ok(new_user.insert(db).await?)
}
