//! Model registry: the draft/publish lifecycle of model definitions.
//!
//! State machine per definition:
//!
//! ```text
//!   (absent) --create--> DRAFT --publish--> PUBLISHED --unpublish--> DRAFT
//!                          ^                    |
//!                          |                    +--publish (new version)--> PUBLISHED
//!                          +--revert(version)---+
//!                          +--update(json)------+
//! ```
//!
//! Version numbers are append-only: every publish takes max+1, reverts
//! and unpublishes never decrement, historical publishes re-snapshot
//! under a fresh number.

use std::path::Path;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::audit_log::AuditAction;
use crate::models::prelude::*;
use crate::models::{model_definition, model_role_permission, model_version, record};
use crate::services::artifacts::{self, ModelArtifact};
use crate::services::audit;
use crate::services::schema::{parse_schema, ModelSchema, RelationKind};
use crate::state::DbConn;

/// Built-in field lists for the reserved system targets, used when the
/// target has no snapshot yet.
const SYSTEM_USER_FIELDS: [&str; 5] = ["id", "email", "name", "roleId", "isActive"];
const SYSTEM_ROLE_FIELDS: [&str; 3] = ["id", "name", "description"];

#[derive(Debug, Clone)]
pub struct CreateModelInput {
    pub name: String,
    pub table_name: Option<String>,
    pub owner_field: Option<String>,
    pub json: Value,
}

#[derive(Debug, Clone)]
pub struct UpdateModelInput {
    pub table_name: Option<Option<String>>,
    pub owner_field: Option<Option<String>>,
    pub json: Option<Value>,
}

pub async fn get_model<C: ConnectionTrait>(
    db: &C,
    id: &str,
) -> Result<model_definition::Model> {
    ModelDefinition::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Model '{}' not found", id)))
}

pub async fn find_model_by_name<C: ConnectionTrait>(
    db: &C,
    name: &str,
) -> Result<Option<model_definition::Model>> {
    Ok(ModelDefinition::find()
        .filter(model_definition::Column::Name.eq(name))
        .one(db)
        .await?)
}

pub async fn list_models<C: ConnectionTrait>(
    db: &C,
    only_published: bool,
) -> Result<Vec<model_definition::Model>> {
    let mut query = ModelDefinition::find().order_by_asc(model_definition::Column::Name);
    if only_published {
        query = query.filter(model_definition::Column::Published.eq(true));
    }
    Ok(query.all(db).await?)
}

/// Latest snapshot of a model (highest version number)
pub async fn latest_version<C: ConnectionTrait>(
    db: &C,
    model_id: &str,
) -> Result<Option<model_version::Model>> {
    Ok(ModelVersion::find()
        .filter(model_version::Column::ModelId.eq(model_id))
        .order_by_desc(model_version::Column::VersionNumber)
        .one(db)
        .await?)
}

pub async fn list_versions<C: ConnectionTrait>(
    db: &C,
    model_id: &str,
    limit: u64,
) -> Result<Vec<model_version::Model>> {
    Ok(ModelVersion::find()
        .filter(model_version::Column::ModelId.eq(model_id))
        .order_by_desc(model_version::Column::VersionNumber)
        .limit(limit)
        .all(db)
        .await?)
}

pub async fn get_version<C: ConnectionTrait>(
    db: &C,
    model_id: &str,
    version_number: i32,
) -> Result<model_version::Model> {
    ModelVersion::find()
        .filter(model_version::Column::ModelId.eq(model_id))
        .filter(model_version::Column::VersionNumber.eq(version_number))
        .one(db)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "Version {} does not exist for this model",
                version_number
            ))
        })
}

/// Validate every relation field against the currently published
/// ecosystem: the target model must exist and be published, and the
/// referenced field must exist in its latest snapshot. Self-references
/// and many-to-many are rejected outright.
pub async fn validate_relation_targets<C: ConnectionTrait>(
    db: &C,
    model_name: &str,
    schema: &ModelSchema,
) -> Result<()> {
    for (field, rel) in schema.relation_fields() {
        if rel.kind == RelationKind::ManyToMany {
            return Err(AppError::BadRequest(format!(
                "Field '{}': many-to-many relations are not supported; use an explicit linking model",
                field.name
            )));
        }
        if rel.model == model_name {
            return Err(AppError::BadRequest(format!(
                "Field '{}': a model cannot reference itself",
                field.name
            )));
        }

        let target = find_model_by_name(db, &rel.model).await?.ok_or_else(|| {
            AppError::BadRequest(format!(
                "Field '{}': target model '{}' does not exist",
                field.name, rel.model
            ))
        })?;
        if !target.published {
            return Err(AppError::BadRequest(format!(
                "Field '{}': target model '{}' is not published",
                field.name, rel.model
            )));
        }

        let target_fields: Vec<String> = match latest_version(db, &target.id).await? {
            Some(snapshot) => parse_schema(&snapshot.json)?
                .fields
                .iter()
                .map(|f| f.name.clone())
                .collect(),
            None => match rel.model.as_str() {
                "User" => SYSTEM_USER_FIELDS.iter().map(|s| s.to_string()).collect(),
                "Role" => SYSTEM_ROLE_FIELDS.iter().map(|s| s.to_string()).collect(),
                _ => {
                    return Err(AppError::BadRequest(format!(
                        "Field '{}': target model '{}' has no published snapshot",
                        field.name, rel.model
                    )))
                }
            },
        };

        if !target_fields.iter().any(|f| f == &rel.field) {
            return Err(AppError::BadRequest(format!(
                "Field '{}': target model '{}' has no field '{}'",
                field.name, rel.model, rel.field
            )));
        }
    }
    Ok(())
}

/// Create a new draft. No ModelVersion row is created until publish.
pub async fn create_model(
    db: &DbConn,
    actor_id: Option<i64>,
    input: CreateModelInput,
) -> Result<model_definition::Model> {
    let schema = parse_schema(&input.json)?;
    validate_relation_targets(db, &input.name, &schema).await?;

    if find_model_by_name(db, &input.name).await?.is_some() {
        return Err(AppError::conflict(format!(
            "A model named '{}' already exists",
            input.name
        )));
    }

    let now = Utc::now();
    let model = model_definition::ActiveModel {
        id: Set(uuid::Uuid::new_v4().to_string()),
        name: Set(input.name.clone()),
        table_name: Set(input.table_name),
        owner_field: Set(input.owner_field),
        json: Set(schema.to_definition_json()),
        version: Set(0),
        published: Set(false),
        published_at: Set(None),
        published_by: Set(None),
        is_system: Set(false),
        file_path: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    };
    let created = model.insert(db).await?;

    audit::append(
        db,
        actor_id,
        AuditAction::ModelCreate,
        Some(created.id.clone()),
        Some(created.name.clone()),
        None,
        None,
    )
    .await?;

    Ok(created)
}

/// Update the working draft. The version is untouched and no snapshot
/// is taken; publish does that.
pub async fn update_model(
    db: &DbConn,
    actor_id: Option<i64>,
    id: &str,
    input: UpdateModelInput,
) -> Result<model_definition::Model> {
    let existing = get_model(db, id).await?;
    if existing.is_system {
        return Err(AppError::Forbidden(
            "System models cannot be structurally edited".to_string(),
        ));
    }

    let mut active: model_definition::ActiveModel = existing.clone().into();

    if let Some(json) = input.json {
        let schema = parse_schema(&json)?;
        validate_relation_targets(db, &existing.name, &schema).await?;
        active.json = Set(schema.to_definition_json());
    }
    if let Some(table_name) = input.table_name {
        active.table_name = Set(table_name);
    }
    if let Some(owner_field) = input.owner_field {
        active.owner_field = Set(owner_field);
    }
    active.updated_at = Set(Utc::now());

    let updated = active.update(db).await?;

    audit::append(
        db,
        actor_id,
        AuditAction::ModelUpdate,
        Some(updated.id.clone()),
        Some(updated.name.clone()),
        None,
        None,
    )
    .await?;

    Ok(updated)
}

/// Publish the current draft.
///
/// In one transaction: bump to max(version)+1, snapshot the draft as a
/// new ModelVersion, rebuild the model's role grants from the draft's
/// rbac map, and stage the artifact as a temp file (a write failure
/// aborts everything). The rename onto the final path happens after
/// commit; if it fails the database remains authoritative and the call
/// reports a partial failure for the operator to reconcile by
/// re-publishing.
pub async fn publish_model(
    db: &DbConn,
    models_dir: &Path,
    actor_id: Option<i64>,
    id: &str,
) -> Result<model_definition::Model> {
    let existing = get_model(db, id).await?;
    let schema = parse_schema(&existing.json)?;
    validate_relation_targets(db, &existing.name, &schema).await?;

    let new_version = latest_version(db, id)
        .await?
        .map(|v| v.version_number)
        .unwrap_or(0)
        + 1;

    let now = Utc::now();
    let final_path = artifacts::final_path(models_dir, &existing.name);

    let txn = db.begin().await?;

    let mut active: model_definition::ActiveModel = existing.clone().into();
    active.version = Set(new_version);
    active.published = Set(true);
    active.published_at = Set(Some(now));
    active.published_by = Set(actor_id);
    active.file_path = Set(Some(final_path.display().to_string()));
    active.updated_at = Set(now);
    let published = active.update(&txn).await?;

    let snapshot = model_version::ActiveModel {
        id: Set(uuid::Uuid::new_v4().to_string()),
        model_id: Set(published.id.clone()),
        version_number: Set(new_version),
        json: Set(schema.to_definition_json()),
        created_by: Set(actor_id),
        created_at: Set(now),
    };
    snapshot.insert(&txn).await?;

    replace_rbac_rows(&txn, &published.id, &schema).await?;

    audit::append(
        &txn,
        actor_id,
        AuditAction::ModelPublish,
        Some(published.id.clone()),
        Some(published.name.clone()),
        None,
        Some(serde_json::json!({ "version": new_version })),
    )
    .await?;

    // Stage the artifact while the transaction is still open so a write
    // failure aborts the publish entirely.
    let artifact = ModelArtifact::from_definition(&published, &schema);
    let temp_path = match artifacts::write_temp(models_dir, &artifact) {
        Ok(path) => path,
        Err(e) => {
            txn.rollback().await?;
            return Err(e);
        }
    };

    txn.commit().await?;

    if let Err(e) = artifacts::promote(&temp_path, &final_path) {
        artifacts::discard_temp(&temp_path);
        audit::append(
            db,
            actor_id,
            AuditAction::ModelPublishFileFailed,
            Some(published.id.clone()),
            Some(published.name.clone()),
            None,
            Some(serde_json::json!({ "version": new_version, "error": e.to_string() })),
        )
        .await?;
        return Err(AppError::PartialFailure {
            message: format!(
                "Model '{}' published as version {} but the artifact could not be written; re-publish to reconcile",
                published.name, new_version
            ),
            details: Some(serde_json::json!({ "path": final_path.display().to_string() })),
        });
    }

    Ok(published)
}

/// Rebuild ModelRolePermission rows from a schema's rbac map
async fn replace_rbac_rows<C: ConnectionTrait>(
    db: &C,
    model_id: &str,
    schema: &ModelSchema,
) -> Result<()> {
    ModelRolePermission::delete_many()
        .filter(model_role_permission::Column::ModelId.eq(model_id))
        .exec(db)
        .await?;

    for (role_name, actions) in &schema.rbac {
        let Some(role) = crate::services::identity::find_role_by_name(db, role_name).await? else {
            return Err(AppError::BadRequest(format!(
                "rbac references unknown role '{}'",
                role_name
            )));
        };
        crate::services::access::set_model_role_permissions(db, model_id, role.id, actions)
            .await?;
    }
    Ok(())
}

/// Take a model out of service. The version number is not decremented.
pub async fn unpublish_model(
    db: &DbConn,
    models_dir: &Path,
    actor_id: Option<i64>,
    id: &str,
) -> Result<model_definition::Model> {
    let existing = get_model(db, id).await?;
    if existing.is_system {
        return Err(AppError::Forbidden(
            "System models cannot be unpublished".to_string(),
        ));
    }

    let txn = db.begin().await?;

    let mut active: model_definition::ActiveModel = existing.clone().into();
    active.published = Set(false);
    active.published_at = Set(None);
    active.published_by = Set(None);
    active.file_path = Set(None);
    active.updated_at = Set(Utc::now());
    let updated = active.update(&txn).await?;

    ModelRolePermission::delete_many()
        .filter(model_role_permission::Column::ModelId.eq(id))
        .exec(&txn)
        .await?;

    audit::append(
        &txn,
        actor_id,
        AuditAction::ModelUnpublish,
        Some(updated.id.clone()),
        Some(updated.name.clone()),
        None,
        None,
    )
    .await?;

    txn.commit().await?;

    artifacts::remove(models_dir, &existing.name);

    Ok(updated)
}

/// Delete a model. Without `force` the call fails when other drafts
/// reference it or records exist, naming the blockers.
pub async fn delete_model(
    db: &DbConn,
    models_dir: &Path,
    actor_id: Option<i64>,
    id: &str,
    force: bool,
) -> Result<()> {
    let existing = get_model(db, id).await?;
    if existing.is_system {
        return Err(AppError::Forbidden(
            "System models cannot be deleted".to_string(),
        ));
    }

    // Relations in any definition's draft that point at this model
    let mut referencing: Vec<Value> = Vec::new();
    for other in ModelDefinition::find().all(db).await? {
        if other.id == existing.id {
            continue;
        }
        let Ok(schema) = parse_schema(&other.json) else {
            continue;
        };
        for (field, rel) in schema.relation_fields() {
            if rel.model == existing.name {
                referencing.push(serde_json::json!({
                    "modelName": other.name,
                    "fieldName": field.name,
                }));
            }
        }
    }
    if !referencing.is_empty() && !force {
        return Err(AppError::conflict_with(
            format!("Model '{}' is referenced by other models", existing.name),
            serde_json::json!({ "referencedBy": referencing }),
        ));
    }

    let record_count = Record::find()
        .filter(record::Column::ModelId.eq(id))
        .count(db)
        .await?;
    if record_count > 0 && !force {
        return Err(AppError::conflict_with(
            format!(
                "Model '{}' still has {} records",
                existing.name, record_count
            ),
            serde_json::json!({ "recordCount": record_count }),
        ));
    }

    let txn = db.begin().await?;

    ModelRolePermission::delete_many()
        .filter(model_role_permission::Column::ModelId.eq(id))
        .exec(&txn)
        .await?;
    Record::delete_many()
        .filter(record::Column::ModelId.eq(id))
        .exec(&txn)
        .await?;
    ModelVersion::delete_many()
        .filter(model_version::Column::ModelId.eq(id))
        .exec(&txn)
        .await?;
    ModelDefinition::delete_by_id(id).exec(&txn).await?;

    audit::append(
        &txn,
        actor_id,
        AuditAction::ModelDelete,
        Some(existing.id.clone()),
        Some(existing.name.clone()),
        None,
        Some(serde_json::json!({ "force": force })),
    )
    .await?;

    txn.commit().await?;

    artifacts::remove(models_dir, &existing.name);

    Ok(())
}

/// Load a historical snapshot back into the draft. The version counter
/// is not bumped; publishing the reverted draft assigns a fresh number.
pub async fn revert_model(
    db: &DbConn,
    actor_id: Option<i64>,
    id: &str,
    target_version: i32,
) -> Result<model_definition::Model> {
    let existing = get_model(db, id).await?;
    if existing.is_system {
        return Err(AppError::Forbidden(
            "System models cannot be reverted".to_string(),
        ));
    }

    let snapshot = get_version(db, id, target_version).await?;
    let schema = parse_schema(&snapshot.json)?;
    // The ecosystem may have changed since this snapshot was taken; a
    // target model may no longer be published.
    validate_relation_targets(db, &existing.name, &schema).await?;

    let mut active: model_definition::ActiveModel = existing.into();
    active.json = Set(schema.to_definition_json());
    active.updated_at = Set(Utc::now());
    let updated = active.update(db).await?;

    audit::append(
        db,
        actor_id,
        AuditAction::ModelRevert,
        Some(updated.id.clone()),
        Some(updated.name.clone()),
        None,
        Some(serde_json::json!({ "revertedToVersion": target_version })),
    )
    .await?;

    Ok(updated)
}

/// Publish a historical version: restore its snapshot into the draft,
/// then run a normal publish. History is append-only — the result is a
/// new version number, never a re-used one.
pub async fn publish_historical(
    db: &DbConn,
    models_dir: &Path,
    actor_id: Option<i64>,
    id: &str,
    target_version: i32,
) -> Result<model_definition::Model> {
    let existing = get_model(db, id).await?;
    if existing.is_system {
        return Err(AppError::Forbidden(
            "Historical versions of system models cannot be published".to_string(),
        ));
    }

    let snapshot = get_version(db, id, target_version).await?;
    let schema = parse_schema(&snapshot.json)?;

    let mut active: model_definition::ActiveModel = existing.into();
    active.json = Set(schema.to_definition_json());
    active.updated_at = Set(Utc::now());
    active.update(db).await?;

    publish_model(db, models_dir, actor_id, id).await
}

/// Write artifacts for published models that have none on disk (first
/// boot with seeded system models, or recovery after a failed rename).
pub async fn reconcile_artifacts(db: &DbConn, models_dir: &Path) -> Result<()> {
    for model in list_models(db, true).await? {
        let path = artifacts::final_path(models_dir, &model.name);
        if path.exists() {
            continue;
        }
        let schema = parse_schema(&model.json)?;
        let artifact = ModelArtifact::from_definition(&model, &schema);
        let temp = artifacts::write_temp(models_dir, &artifact)?;
        artifacts::promote(&temp, &path)?;

        let mut active: model_definition::ActiveModel = model.clone().into();
        active.file_path = Set(Some(path.display().to_string()));
        active.update(db).await?;

        tracing::info!(model = %model.name, "Reconciled missing artifact");
    }
    Ok(())
}
