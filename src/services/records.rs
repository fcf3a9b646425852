//! Generic record service.
//!
//! Five coupled layers: published-model resolution, payload validation
//! with relation resolution, linking-model uniqueness, owner resolution,
//! and the dual-write path that keeps system entities (User, Role)
//! mirrored between the identity origin tables and the generic record
//! space.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, ModelTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::error::{AppError, Result};
use crate::models::audit_log::AuditAction;
use crate::models::prelude::*;
use crate::models::{model_definition, record, role, user};
use crate::services::audit;
use crate::services::identity::{self, UserWithRole};
use crate::services::registry;
use crate::services::schema::{parse_schema, FieldDef, FieldType, ModelSchema, RelationDef};
use crate::state::DbConn;

/// Bounded scans: linking-uniqueness checks and relation lookups never
/// read more than this many rows.
const SCAN_CAP: u64 = 2_000;

pub const SYSTEM_USER_MODEL: &str = "User";
pub const SYSTEM_ROLE_MODEL: &str = "Role";

const ORIGIN_USERS_TABLE: &str = "users";
const ORIGIN_ROLES_TABLE: &str = "roles";

/// Email-bearing keys consulted when a record id stands in for a user
const USER_EMAIL_KEYS: [&str; 5] = ["email", "emailAddress", "userEmail", "username", "name"];

/// A published model resolved for a dynamic request. The snapshot is
/// authoritative for validation; the definition for ownership, system
/// status and routing.
#[derive(Debug, Clone)]
pub struct ResolvedModel {
    pub definition: model_definition::Model,
    pub schema: ModelSchema,
    pub version_id: Option<String>,
}

impl ResolvedModel {
    pub fn is_system_user(&self) -> bool {
        self.definition.is_system && self.definition.name == SYSTEM_USER_MODEL
    }

    pub fn is_system_role(&self) -> bool {
        self.definition.is_system && self.definition.name == SYSTEM_ROLE_MODEL
    }
}

/// Record shape returned to dynamic CRUD clients
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordView {
    pub id: String,
    pub model_id: String,
    pub model_name: String,
    pub model_version_id: Option<String>,
    pub data: Value,
    pub owner_id: Option<i64>,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: chrono::DateTime<Utc>,
}

impl From<record::Model> for RecordView {
    fn from(row: record::Model) -> Self {
        Self {
            id: row.id,
            model_id: row.model_id,
            model_name: row.model_name,
            model_version_id: row.model_version_id,
            data: row.data,
            owner_id: row.owner_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListParams {
    pub limit: u64,
    pub skip: u64,
    pub owner_only: bool,
}

// ---------------------------------------------------------------------------
// 1. Model resolution
// ---------------------------------------------------------------------------

/// Match a route segment against a published model's name or tableName,
/// case-insensitively, and load its latest snapshot.
pub async fn resolve_published_model<C: ConnectionTrait>(
    db: &C,
    route: &str,
) -> Result<ResolvedModel> {
    let wanted = route.to_lowercase();
    let published = ModelDefinition::find()
        .filter(model_definition::Column::Published.eq(true))
        .all(db)
        .await?;

    let definition = published
        .into_iter()
        .find(|m| {
            m.name.to_lowercase() == wanted
                || m.table_name
                    .as_deref()
                    .map(|t| t.to_lowercase() == wanted)
                    .unwrap_or(false)
        })
        .ok_or_else(|| AppError::NotFound(format!("No published model for '{}'", route)))?;

    let version = registry::latest_version(db, &definition.id).await?;
    let schema = match &version {
        Some(v) => parse_schema(&v.json)?,
        None => parse_schema(&definition.json)?,
    };

    Ok(ResolvedModel {
        definition,
        schema,
        version_id: version.map(|v| v.id),
    })
}

// ---------------------------------------------------------------------------
// 2. Payload validation and relation resolution
// ---------------------------------------------------------------------------

fn as_object(payload: &Value) -> Result<&Map<String, Value>> {
    payload
        .as_object()
        .ok_or_else(|| AppError::BadRequest("Record payload must be a JSON object".to_string()))
}

/// String normalization for id comparison: numbers and strings compare
/// by their string form.
fn value_id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn check_primitive(field: &FieldDef, value: &Value) -> Result<()> {
    let ok = match field.field_type {
        FieldType::String | FieldType::Date => value.is_string(),
        FieldType::Number => value.is_number(),
        FieldType::Boolean => value.is_boolean(),
        FieldType::Json => true,
        FieldType::StringArray => {
            value.is_array()
                && value
                    .as_array()
                    .map(|a| a.iter().all(Value::is_string))
                    .unwrap_or(false)
        }
        FieldType::Relation => true,
    };
    if ok {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!(
            "Field '{}' has the wrong type",
            field.name
        )))
    }
}

/// Validate a payload against the snapshot and canonicalize every
/// relation value to a target id string (or list of them). Returns the
/// mutated payload.
pub async fn validate_and_resolve<C: ConnectionTrait>(
    db: &C,
    schema: &ModelSchema,
    payload: Value,
) -> Result<Value> {
    let obj = as_object(&payload)?;
    let mut out = obj.clone();

    for field in &schema.fields {
        let provided = obj.get(&field.name).filter(|v| !v.is_null());

        if field.required && provided.is_none() {
            return Err(AppError::BadRequest(format!(
                "Field '{}' is required",
                field.name
            )));
        }
        let Some(value) = provided else { continue };

        match &field.relation {
            None => check_primitive(field, value)?,
            Some(rel) => {
                let canonical = if rel.kind.is_multi() {
                    let items = value.as_array().ok_or_else(|| {
                        AppError::BadRequest(format!(
                            "Field '{}' expects an array of target references",
                            field.name
                        ))
                    })?;
                    let mut ids = Vec::with_capacity(items.len());
                    for item in items {
                        ids.push(Value::String(
                            resolve_relation_value(db, &field.name, rel, item).await?,
                        ));
                    }
                    Value::Array(ids)
                } else {
                    if value.is_array() {
                        return Err(AppError::BadRequest(format!(
                            "Field '{}' expects a single target reference",
                            field.name
                        )));
                    }
                    Value::String(resolve_relation_value(db, &field.name, rel, value).await?)
                };
                out.insert(field.name.clone(), canonical);
            }
        }
    }

    Ok(Value::Object(out))
}

/// Resolve one relation reference to a canonical target id.
async fn resolve_relation_value<C: ConnectionTrait>(
    db: &C,
    field_name: &str,
    rel: &RelationDef,
    value: &Value,
) -> Result<String> {
    let raw = value_id_string(value).ok_or_else(|| {
        AppError::BadRequest(format!(
            "Field '{}' holds an unresolvable target reference",
            field_name
        ))
    })?;

    if rel.model == SYSTEM_USER_MODEL {
        let user = resolve_user_reference(db, &raw).await.map_err(|_| {
            AppError::BadRequest(format!(
                "Field '{}': no user matches '{}'",
                field_name, raw
            ))
        })?;
        return Ok(user.id.to_string());
    }

    let target = registry::find_model_by_name(db, &rel.model)
        .await?
        .filter(|m| m.published)
        .ok_or_else(|| {
            AppError::BadRequest(format!(
                "Field '{}': target model '{}' is not published",
                field_name, rel.model
            ))
        })?;

    // A direct record id is always unambiguous
    if let Some(row) = Record::find_by_id(&raw)
        .filter(record::Column::ModelId.eq(&target.id))
        .filter(record::Column::DeletedAt.is_null())
        .one(db)
        .await?
    {
        return Ok(row.id);
    }

    // Otherwise match on the referenced target field
    let candidates = Record::find()
        .filter(record::Column::ModelId.eq(&target.id))
        .filter(record::Column::DeletedAt.is_null())
        .limit(SCAN_CAP)
        .all(db)
        .await?;

    let mut matches = candidates.into_iter().filter(|row| {
        row.data
            .get(&rel.field)
            .and_then(|v| value_id_string(v))
            .map(|v| v == raw)
            .unwrap_or(false)
    });

    let first = matches.next().ok_or_else(|| {
        AppError::BadRequest(format!(
            "Field '{}': no {} record has {} = '{}'",
            field_name, rel.model, rel.field, raw
        ))
    })?;
    if matches.next().is_some() {
        return Err(AppError::conflict(format!(
            "Field '{}': more than one {} record has {} = '{}'; pass an explicit record id",
            field_name, rel.model, rel.field, raw
        )));
    }

    Ok(first.id)
}

/// User-target resolution: direct id, then email, then a user-record id
/// whose data carries an email-like key.
async fn resolve_user_reference<C: ConnectionTrait>(db: &C, raw: &str) -> Result<user::Model> {
    if let Ok(id) = raw.parse::<i64>() {
        if let Some(found) = User::find_by_id(id).one(db).await? {
            return Ok(found);
        }
    }

    if let Some(found) = User::find()
        .filter(user::Column::Email.eq(raw))
        .one(db)
        .await?
    {
        return Ok(found);
    }

    if let Some(row) = Record::find_by_id(raw).one(db).await? {
        for key in USER_EMAIL_KEYS {
            if let Some(candidate) = row.data.get(key).and_then(Value::as_str) {
                if let Some(found) = User::find()
                    .filter(user::Column::Email.eq(candidate))
                    .one(db)
                    .await?
                {
                    return Ok(found);
                }
            }
        }
    }

    Err(AppError::BadRequest(format!("No user matches '{}'", raw)))
}

// ---------------------------------------------------------------------------
// 3. Linking-model composite uniqueness
// ---------------------------------------------------------------------------

/// A model with two or more single-target relation fields is a linking
/// model: when a payload provides all of them, the tuple must be unique
/// within the model.
async fn check_linking_uniqueness<C: ConnectionTrait>(
    db: &C,
    resolved: &ResolvedModel,
    data: &Value,
    exclude_record_id: Option<&str>,
) -> Result<()> {
    let singles = resolved.schema.single_relation_fields();
    if singles.len() < 2 {
        return Ok(());
    }

    let mut tuple: Vec<(String, String)> = Vec::with_capacity(singles.len());
    for (field, _) in &singles {
        match data.get(&field.name).and_then(value_id_string) {
            Some(v) => tuple.push((field.name.clone(), v)),
            None => return Ok(()), // a partial tuple is not constrained
        }
    }

    let existing = Record::find()
        .filter(record::Column::ModelId.eq(&resolved.definition.id))
        .filter(record::Column::DeletedAt.is_null())
        .limit(SCAN_CAP)
        .all(db)
        .await?;

    for row in existing {
        if exclude_record_id == Some(row.id.as_str()) {
            continue;
        }
        let all_equal = tuple.iter().all(|(name, wanted)| {
            row.data
                .get(name)
                .and_then(|v| value_id_string(v))
                .map(|v| &v == wanted)
                .unwrap_or(false)
        });
        if all_equal {
            let details: Map<String, Value> = tuple
                .iter()
                .map(|(name, v)| (name.clone(), Value::String(v.clone())))
                .collect();
            return Err(AppError::conflict_with(
                format!(
                    "A '{}' record with this combination already exists",
                    resolved.definition.name
                ),
                Value::Object(details),
            ));
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// 4. Owner resolution
// ---------------------------------------------------------------------------

/// Determine the owning user for a write: explicit `ownerId`, then the
/// model's owner field, then the acting user. An explicit candidate
/// that cannot be resolved is an error; the acting-user fallback is
/// silent.
async fn resolve_owner<C: ConnectionTrait>(
    db: &C,
    resolved: &ResolvedModel,
    data: &mut Value,
    actor: &UserWithRole,
) -> Result<Option<i64>> {
    let explicit = data
        .get("ownerId")
        .filter(|v| !v.is_null())
        .and_then(value_id_string);

    let from_owner_field = resolved.definition.owner_field.as_ref().and_then(|field| {
        data.get(field)
            .filter(|v| !v.is_null())
            .and_then(value_id_string)
    });

    let owner = if let Some(candidate) = explicit.or(from_owner_field) {
        let user = resolve_user_reference(db, &candidate)
            .await
            .map_err(|_| {
                AppError::BadRequest(format!("Owner '{}' cannot be resolved", candidate))
            })?;
        Some(user.id)
    } else {
        // The acting user, when the identity store still knows it
        identity::find_user_by_id(db, actor.user.id)
            .await?
            .map(|u| u.user.id)
    };

    // Inject into the declared owner field when the payload left it unset
    if let (Some(owner_id), Some(field)) = (owner, &resolved.definition.owner_field) {
        let obj = data.as_object_mut().expect("validated payload is an object");
        if !obj.contains_key(field) || obj[field].is_null() {
            obj.insert(field.clone(), json!(owner_id));
        }
    }

    Ok(owner)
}

// ---------------------------------------------------------------------------
// Generic CRUD (non-system models)
// ---------------------------------------------------------------------------

fn map_write_err(e: sea_orm::DbErr) -> AppError {
    match e.sql_err() {
        Some(sea_orm::SqlErr::UniqueConstraintViolation(msg)) => AppError::Conflict {
            message: "Unique constraint failed".to_string(),
            details: Some(json!({ "constraint": msg })),
        },
        Some(sea_orm::SqlErr::ForeignKeyConstraintViolation(msg)) => {
            AppError::BadRequest(format!("Foreign key constraint failed: {}", msg))
        }
        _ => AppError::Database(e),
    }
}

pub async fn create_record(
    db: &DbConn,
    resolved: &ResolvedModel,
    payload: Value,
    actor: &UserWithRole,
) -> Result<RecordView> {
    if resolved.is_system_user() {
        return create_system_user(db, resolved, payload, actor).await;
    }
    if resolved.is_system_role() {
        return create_system_role(db, resolved, payload, actor).await;
    }

    let mut data = validate_and_resolve(db, &resolved.schema, payload).await?;
    check_linking_uniqueness(db, resolved, &data, None).await?;
    let owner_id = resolve_owner(db, resolved, &mut data, actor).await?;

    let now = Utc::now();
    let id = uuid::Uuid::new_v4().to_string();

    let txn = db.begin().await?;

    let row = record::ActiveModel {
        id: Set(id.clone()),
        model_id: Set(resolved.definition.id.clone()),
        model_name: Set(resolved.definition.name.clone()),
        model_version_id: Set(resolved.version_id.clone()),
        data: Set(data),
        owner_id: Set(owner_id),
        created_at: Set(now),
        updated_at: Set(now),
        deleted_at: Set(None),
    };
    let created = row.insert(&txn).await.map_err(map_write_err)?;

    audit::append(
        &txn,
        Some(actor.user.id),
        AuditAction::RecordCreate,
        Some(resolved.definition.id.clone()),
        Some(resolved.definition.name.clone()),
        Some(id),
        None,
    )
    .await?;

    txn.commit().await?;
    Ok(created.into())
}

pub async fn update_record(
    db: &DbConn,
    resolved: &ResolvedModel,
    record_id: &str,
    payload: Value,
    actor: &UserWithRole,
) -> Result<RecordView> {
    if resolved.is_system_user() {
        return update_system_user(db, resolved, record_id, payload, actor).await;
    }
    if resolved.is_system_role() {
        return update_system_role(db, resolved, record_id, payload, actor).await;
    }

    let existing = find_live_record(db, resolved, record_id).await?;

    // Merge-then-write inside one transaction-equivalent path: the merge
    // result is what gets validated and stored.
    let mut merged = existing.data.clone();
    {
        let target = merged
            .as_object_mut()
            .ok_or_else(|| AppError::Internal("Stored record data is not an object".to_string()))?;
        for (key, value) in as_object(&payload)? {
            target.insert(key.clone(), value.clone());
        }
    }

    let mut data = validate_and_resolve(db, &resolved.schema, merged).await?;
    check_linking_uniqueness(db, resolved, &data, Some(record_id)).await?;

    let owner_id = if payload.get("ownerId").is_some()
        || resolved
            .definition
            .owner_field
            .as_ref()
            .map(|f| payload.get(f).is_some())
            .unwrap_or(false)
    {
        resolve_owner(db, resolved, &mut data, actor).await?
    } else {
        existing.owner_id
    };

    let txn = db.begin().await?;

    let mut active: record::ActiveModel = existing.into();
    active.data = Set(data);
    active.owner_id = Set(owner_id);
    active.model_version_id = Set(resolved.version_id.clone());
    active.updated_at = Set(Utc::now());
    let updated = active.update(&txn).await.map_err(map_write_err)?;

    audit::append(
        &txn,
        Some(actor.user.id),
        AuditAction::RecordUpdate,
        Some(resolved.definition.id.clone()),
        Some(resolved.definition.name.clone()),
        Some(record_id.to_string()),
        None,
    )
    .await?;

    txn.commit().await?;
    Ok(updated.into())
}

pub async fn delete_record(
    db: &DbConn,
    resolved: &ResolvedModel,
    record_id: &str,
    actor: &UserWithRole,
) -> Result<()> {
    if resolved.is_system_user() {
        return delete_system_user(db, resolved, record_id, actor).await;
    }
    if resolved.is_system_role() {
        return delete_system_role(db, resolved, record_id, actor).await;
    }

    let existing = find_live_record(db, resolved, record_id).await?;

    let txn = db.begin().await?;

    let mut active: record::ActiveModel = existing.into();
    active.deleted_at = Set(Some(Utc::now()));
    active.update(&txn).await?;

    audit::append(
        &txn,
        Some(actor.user.id),
        AuditAction::RecordDelete,
        Some(resolved.definition.id.clone()),
        Some(resolved.definition.name.clone()),
        Some(record_id.to_string()),
        None,
    )
    .await?;

    txn.commit().await?;
    Ok(())
}

pub async fn get_record<C: ConnectionTrait>(
    db: &C,
    resolved: &ResolvedModel,
    record_id: &str,
) -> Result<RecordView> {
    if resolved.is_system_user() {
        return get_system_user(db, record_id).await;
    }
    if resolved.is_system_role() {
        return get_system_role(db, record_id).await;
    }

    Ok(find_live_record(db, resolved, record_id).await?.into())
}

pub async fn list_records<C: ConnectionTrait>(
    db: &C,
    resolved: &ResolvedModel,
    params: &ListParams,
    actor: &UserWithRole,
) -> Result<(Vec<RecordView>, u64)> {
    if resolved.is_system_user() {
        return list_system_users(db, params).await;
    }
    if resolved.is_system_role() {
        return list_system_roles(db, params).await;
    }

    let mut query = Record::find()
        .filter(record::Column::ModelId.eq(&resolved.definition.id))
        .filter(record::Column::DeletedAt.is_null());
    if params.owner_only {
        query = query.filter(record::Column::OwnerId.eq(actor.user.id));
    }

    let total = query.clone().count(db).await?;

    let rows = query
        .order_by_desc(record::Column::CreatedAt)
        .offset(params.skip)
        .limit(params.limit)
        .all(db)
        .await?;

    Ok((rows.into_iter().map(Into::into).collect(), total))
}

async fn find_live_record<C: ConnectionTrait>(
    db: &C,
    resolved: &ResolvedModel,
    record_id: &str,
) -> Result<record::Model> {
    Record::find_by_id(record_id)
        .filter(record::Column::ModelId.eq(&resolved.definition.id))
        .filter(record::Column::DeletedAt.is_null())
        .one(db)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "No '{}' record with id '{}'",
                resolved.definition.name, record_id
            ))
        })
}

// ---------------------------------------------------------------------------
// 5. System-model dual-write
// ---------------------------------------------------------------------------

fn origin_marker(table: &str, id: i64) -> Value {
    json!({ "table": table, "id": id })
}

/// Find the mirror record for an origin row by its mirrored `data.id`
async fn find_mirror<C: ConnectionTrait>(
    db: &C,
    model_name: &str,
    origin_id: i64,
) -> Result<Option<record::Model>> {
    let rows = Record::find()
        .filter(record::Column::ModelName.eq(model_name))
        .filter(record::Column::DeletedAt.is_null())
        .limit(SCAN_CAP)
        .all(db)
        .await?;
    Ok(rows.into_iter().find(|row| {
        row.data
            .get("id")
            .and_then(value_id_string)
            .map(|v| v == origin_id.to_string())
            .unwrap_or(false)
    }))
}

/// Map an origin role id to its role-record id, so clients only ever see
/// record ids.
async fn role_record_id_for<C: ConnectionTrait>(
    db: &C,
    origin_role_id: i64,
) -> Result<Option<String>> {
    Ok(find_mirror(db, SYSTEM_ROLE_MODEL, origin_role_id)
        .await?
        .map(|r| r.id))
}

/// Resolve a client-supplied role reference (origin id or role-record
/// id) to the origin role id.
async fn resolve_role_reference<C: ConnectionTrait>(db: &C, raw: &Value) -> Result<i64> {
    let raw = value_id_string(raw)
        .ok_or_else(|| AppError::BadRequest("roleId must be a string or number".to_string()))?;

    if let Ok(id) = raw.parse::<i64>() {
        if Role::find_by_id(id).one(db).await?.is_some() {
            return Ok(id);
        }
    }

    if let Some(row) = Record::find_by_id(&raw)
        .filter(record::Column::ModelName.eq(SYSTEM_ROLE_MODEL))
        .one(db)
        .await?
    {
        let origin = row
            .data
            .get("_origin")
            .and_then(|o| o.get("id"))
            .or_else(|| row.data.get("id"))
            .and_then(Value::as_i64);
        if let Some(id) = origin {
            if Role::find_by_id(id).one(db).await?.is_some() {
                return Ok(id);
            }
        }
    }

    Err(AppError::BadRequest(format!(
        "roleId '{}' matches neither a role nor a role record",
        raw
    )))
}

/// Resolve a path id that may be a record id or an origin id
async fn resolve_origin_id<C: ConnectionTrait>(
    db: &C,
    model_name: &str,
    supplied: &str,
) -> Result<i64> {
    if let Some(row) = Record::find_by_id(supplied)
        .filter(record::Column::ModelName.eq(model_name))
        .one(db)
        .await?
    {
        let origin = row
            .data
            .get("_origin")
            .and_then(|o| o.get("id"))
            .or_else(|| row.data.get("id"))
            .and_then(Value::as_i64);
        if let Some(id) = origin {
            return Ok(id);
        }
    }

    supplied.parse::<i64>().map_err(|_| {
        AppError::NotFound(format!(
            "'{}' is neither a {} record id nor an origin id",
            supplied, model_name
        ))
    })
}

fn strip_password(data: &mut Map<String, Value>) {
    data.remove("password");
}

async fn create_system_user(
    db: &DbConn,
    resolved: &ResolvedModel,
    payload: Value,
    actor: &UserWithRole,
) -> Result<RecordView> {
    let obj = as_object(&payload)?.clone();

    let email = obj
        .get("email")
        .and_then(Value::as_str)
        .filter(|e| !e.is_empty())
        .ok_or_else(|| AppError::BadRequest("'email' is required".to_string()))?
        .to_string();

    let role_id = match obj.get("roleId").filter(|v| !v.is_null()) {
        Some(raw) => resolve_role_reference(db, raw).await?,
        None => identity::find_role_by_name(db, identity::DEFAULT_ROLE)
            .await?
            .ok_or_else(|| AppError::NotInitialized("Default role is missing".to_string()))?
            .id,
    };

    if User::find()
        .filter(user::Column::Email.eq(&email))
        .one(db)
        .await?
        .is_some()
    {
        return Err(AppError::conflict(format!(
            "A user with email '{}' already exists",
            email
        )));
    }

    let hashed = match obj.get("password").and_then(Value::as_str) {
        Some(pw) => crate::services::security::hash_password(pw)?,
        None => crate::services::security::hash_password(&uuid::Uuid::new_v4().to_string())?,
    };

    let now = Utc::now();
    let txn = db.begin().await?;

    let origin = user::ActiveModel {
        email: Set(email.clone()),
        hashed_password: Set(hashed),
        name: Set(obj.get("name").and_then(Value::as_str).map(String::from)),
        is_active: Set(obj.get("isActive").and_then(Value::as_bool).unwrap_or(true)),
        role_id: Set(role_id),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    let created_user = origin.insert(&txn).await.map_err(map_write_err)?;

    let mut mirror_data = obj;
    strip_password(&mut mirror_data);
    mirror_data.insert("id".to_string(), json!(created_user.id));
    mirror_data.insert("email".to_string(), json!(created_user.email));
    mirror_data.insert("roleId".to_string(), json!(created_user.role_id));
    mirror_data.insert("isActive".to_string(), json!(created_user.is_active));
    mirror_data.insert(
        "_origin".to_string(),
        origin_marker(ORIGIN_USERS_TABLE, created_user.id),
    );

    let mirror = record::ActiveModel {
        id: Set(uuid::Uuid::new_v4().to_string()),
        model_id: Set(resolved.definition.id.clone()),
        model_name: Set(resolved.definition.name.clone()),
        model_version_id: Set(resolved.version_id.clone()),
        data: Set(Value::Object(mirror_data)),
        owner_id: Set(Some(created_user.id)),
        created_at: Set(now),
        updated_at: Set(now),
        deleted_at: Set(None),
    };
    let mirror_row = mirror.insert(&txn).await?;

    audit::append(
        &txn,
        Some(actor.user.id),
        AuditAction::SystemUserCreate,
        Some(resolved.definition.id.clone()),
        Some(resolved.definition.name.clone()),
        Some(mirror_row.id.clone()),
        Some(json!({ "originId": created_user.id })),
    )
    .await?;

    txn.commit().await?;

    system_user_view(db, &created_user, Some(mirror_row)).await
}

async fn create_system_role(
    db: &DbConn,
    resolved: &ResolvedModel,
    payload: Value,
    actor: &UserWithRole,
) -> Result<RecordView> {
    let obj = as_object(&payload)?.clone();

    let name = obj
        .get("name")
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| AppError::BadRequest("'name' is required".to_string()))?
        .to_string();

    if identity::find_role_by_name(db, &name).await?.is_some() {
        return Err(AppError::conflict(format!(
            "A role named '{}' already exists",
            name
        )));
    }

    let now = Utc::now();
    let txn = db.begin().await?;

    let origin = role::ActiveModel {
        name: Set(name.clone()),
        description: Set(obj
            .get("description")
            .and_then(Value::as_str)
            .map(String::from)),
        created_at: Set(now),
        ..Default::default()
    };
    let created_role = origin.insert(&txn).await.map_err(map_write_err)?;

    let mut mirror_data = obj;
    mirror_data.insert("id".to_string(), json!(created_role.id));
    mirror_data.insert("name".to_string(), json!(created_role.name));
    mirror_data.insert(
        "_origin".to_string(),
        origin_marker(ORIGIN_ROLES_TABLE, created_role.id),
    );

    let mirror = record::ActiveModel {
        id: Set(uuid::Uuid::new_v4().to_string()),
        model_id: Set(resolved.definition.id.clone()),
        model_name: Set(resolved.definition.name.clone()),
        model_version_id: Set(resolved.version_id.clone()),
        data: Set(Value::Object(mirror_data)),
        owner_id: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        deleted_at: Set(None),
    };
    let mirror_row = mirror.insert(&txn).await?;

    audit::append(
        &txn,
        Some(actor.user.id),
        AuditAction::SystemRoleCreate,
        Some(resolved.definition.id.clone()),
        Some(resolved.definition.name.clone()),
        Some(mirror_row.id.clone()),
        Some(json!({ "originId": created_role.id })),
    )
    .await?;

    txn.commit().await?;

    Ok(mirror_row.into())
}

async fn update_system_user(
    db: &DbConn,
    resolved: &ResolvedModel,
    supplied_id: &str,
    payload: Value,
    actor: &UserWithRole,
) -> Result<RecordView> {
    let origin_id = resolve_origin_id(db, SYSTEM_USER_MODEL, supplied_id).await?;
    let existing = User::find_by_id(origin_id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No user with id {}", origin_id)))?;

    let obj = as_object(&payload)?.clone();

    let role_id = match obj.get("roleId").filter(|v| !v.is_null()) {
        Some(raw) => Some(resolve_role_reference(db, raw).await?),
        None => None,
    };

    let txn = db.begin().await?;

    let mut active: user::ActiveModel = existing.clone().into();
    if let Some(email) = obj.get("email").and_then(Value::as_str) {
        active.email = Set(email.to_string());
    }
    if let Some(name) = obj.get("name") {
        active.name = Set(name.as_str().map(String::from));
    }
    if let Some(is_active) = obj.get("isActive").and_then(Value::as_bool) {
        active.is_active = Set(is_active);
    }
    if let Some(role_id) = role_id {
        active.role_id = Set(role_id);
    }
    if let Some(password) = obj.get("password").and_then(Value::as_str) {
        active.hashed_password = Set(crate::services::security::hash_password(password)?);
    }
    active.updated_at = Set(Utc::now());
    let updated_user = active.update(&txn).await.map_err(map_write_err)?;

    // Re-derive the mirror: merge the payload, strip secrets, and let the
    // origin row win on the fields it owns so the mirror cannot drift.
    let mirror_row = match find_mirror(&txn, SYSTEM_USER_MODEL, origin_id).await? {
        Some(mirror) => {
            let mut data = mirror.data.clone();
            let map = data.as_object_mut().expect("mirror data is an object");
            for (key, value) in &obj {
                map.insert(key.clone(), value.clone());
            }
            strip_password(map);
            map.insert("id".to_string(), json!(updated_user.id));
            map.insert("email".to_string(), json!(updated_user.email));
            map.insert("roleId".to_string(), json!(updated_user.role_id));
            map.insert("isActive".to_string(), json!(updated_user.is_active));
            map.insert(
                "_origin".to_string(),
                origin_marker(ORIGIN_USERS_TABLE, updated_user.id),
            );

            let mut active: record::ActiveModel = mirror.into();
            active.data = Set(data);
            active.updated_at = Set(Utc::now());
            active.update(&txn).await?
        }
        None => {
            let mut data = obj.clone();
            strip_password(&mut data);
            data.insert("id".to_string(), json!(updated_user.id));
            data.insert("email".to_string(), json!(updated_user.email));
            data.insert("roleId".to_string(), json!(updated_user.role_id));
            data.insert("isActive".to_string(), json!(updated_user.is_active));
            data.insert(
                "_origin".to_string(),
                origin_marker(ORIGIN_USERS_TABLE, updated_user.id),
            );

            let now = Utc::now();
            let mirror = record::ActiveModel {
                id: Set(uuid::Uuid::new_v4().to_string()),
                model_id: Set(resolved.definition.id.clone()),
                model_name: Set(resolved.definition.name.clone()),
                model_version_id: Set(resolved.version_id.clone()),
                data: Set(Value::Object(data)),
                owner_id: Set(Some(updated_user.id)),
                created_at: Set(now),
                updated_at: Set(now),
                deleted_at: Set(None),
            };
            mirror.insert(&txn).await?
        }
    };

    audit::append(
        &txn,
        Some(actor.user.id),
        AuditAction::SystemUserUpdate,
        Some(resolved.definition.id.clone()),
        Some(resolved.definition.name.clone()),
        Some(mirror_row.id.clone()),
        Some(json!({ "originId": updated_user.id })),
    )
    .await?;

    txn.commit().await?;

    system_user_view(db, &updated_user, Some(mirror_row)).await
}

async fn update_system_role(
    db: &DbConn,
    resolved: &ResolvedModel,
    supplied_id: &str,
    payload: Value,
    actor: &UserWithRole,
) -> Result<RecordView> {
    let origin_id = resolve_origin_id(db, SYSTEM_ROLE_MODEL, supplied_id).await?;
    let existing = Role::find_by_id(origin_id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No role with id {}", origin_id)))?;

    let obj = as_object(&payload)?.clone();

    let txn = db.begin().await?;

    let mut active: role::ActiveModel = existing.clone().into();
    if let Some(name) = obj.get("name").and_then(Value::as_str) {
        active.name = Set(name.to_string());
    }
    if let Some(description) = obj.get("description") {
        active.description = Set(description.as_str().map(String::from));
    }
    let updated_role = active.update(&txn).await.map_err(map_write_err)?;

    let mirror_row = match find_mirror(&txn, SYSTEM_ROLE_MODEL, origin_id).await? {
        Some(mirror) => {
            let mut data = mirror.data.clone();
            let map = data.as_object_mut().expect("mirror data is an object");
            for (key, value) in &obj {
                map.insert(key.clone(), value.clone());
            }
            map.insert("id".to_string(), json!(updated_role.id));
            map.insert("name".to_string(), json!(updated_role.name));
            map.insert(
                "_origin".to_string(),
                origin_marker(ORIGIN_ROLES_TABLE, updated_role.id),
            );

            let mut active: record::ActiveModel = mirror.into();
            active.data = Set(data);
            active.updated_at = Set(Utc::now());
            active.update(&txn).await?
        }
        None => {
            let mut data = obj.clone();
            data.insert("id".to_string(), json!(updated_role.id));
            data.insert("name".to_string(), json!(updated_role.name));
            data.insert(
                "_origin".to_string(),
                origin_marker(ORIGIN_ROLES_TABLE, updated_role.id),
            );

            let now = Utc::now();
            let mirror = record::ActiveModel {
                id: Set(uuid::Uuid::new_v4().to_string()),
                model_id: Set(resolved.definition.id.clone()),
                model_name: Set(resolved.definition.name.clone()),
                model_version_id: Set(resolved.version_id.clone()),
                data: Set(Value::Object(data)),
                owner_id: Set(None),
                created_at: Set(now),
                updated_at: Set(now),
                deleted_at: Set(None),
            };
            mirror.insert(&txn).await?
        }
    };

    audit::append(
        &txn,
        Some(actor.user.id),
        AuditAction::SystemRoleUpdate,
        Some(resolved.definition.id.clone()),
        Some(resolved.definition.name.clone()),
        Some(mirror_row.id.clone()),
        Some(json!({ "originId": updated_role.id })),
    )
    .await?;

    txn.commit().await?;

    Ok(mirror_row.into())
}

async fn delete_system_user(
    db: &DbConn,
    resolved: &ResolvedModel,
    supplied_id: &str,
    actor: &UserWithRole,
) -> Result<()> {
    let origin_id = resolve_origin_id(db, SYSTEM_USER_MODEL, supplied_id).await?;
    let existing = User::find_by_id(origin_id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No user with id {}", origin_id)))?;

    let txn = db.begin().await?;

    existing.delete(&txn).await?;
    delete_mirrors(&txn, SYSTEM_USER_MODEL, origin_id).await?;

    audit::append(
        &txn,
        Some(actor.user.id),
        AuditAction::SystemUserDelete,
        Some(resolved.definition.id.clone()),
        Some(resolved.definition.name.clone()),
        None,
        Some(json!({ "originId": origin_id })),
    )
    .await?;

    txn.commit().await?;
    Ok(())
}

async fn delete_system_role(
    db: &DbConn,
    resolved: &ResolvedModel,
    supplied_id: &str,
    actor: &UserWithRole,
) -> Result<()> {
    let origin_id = resolve_origin_id(db, SYSTEM_ROLE_MODEL, supplied_id).await?;
    let existing = Role::find_by_id(origin_id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No role with id {}", origin_id)))?;

    let txn = db.begin().await?;

    existing.delete(&txn).await.map_err(map_write_err)?;
    delete_mirrors(&txn, SYSTEM_ROLE_MODEL, origin_id).await?;

    audit::append(
        &txn,
        Some(actor.user.id),
        AuditAction::SystemRoleDelete,
        Some(resolved.definition.id.clone()),
        Some(resolved.definition.name.clone()),
        None,
        Some(json!({ "originId": origin_id })),
    )
    .await?;

    txn.commit().await?;
    Ok(())
}

async fn delete_mirrors<C: ConnectionTrait>(
    db: &C,
    model_name: &str,
    origin_id: i64,
) -> Result<()> {
    let rows = Record::find()
        .filter(record::Column::ModelName.eq(model_name))
        .limit(SCAN_CAP)
        .all(db)
        .await?;
    for row in rows {
        let matches = row
            .data
            .get("id")
            .and_then(|v| value_id_string(v))
            .map(|v| v == origin_id.to_string())
            .unwrap_or(false);
        if matches {
            row.delete(db).await?;
        }
    }
    Ok(())
}

/// Project an origin user into the record shape: authoritative fields
/// come from the origin row, and the role id is remapped to the role
/// record id so clients see uniform record ids.
async fn system_user_view<C: ConnectionTrait>(
    db: &C,
    origin: &user::Model,
    mirror: Option<record::Model>,
) -> Result<RecordView> {
    let mirror = match mirror {
        Some(m) => Some(m),
        None => find_mirror(db, SYSTEM_USER_MODEL, origin.id).await?,
    };

    let role_record_id = role_record_id_for(db, origin.role_id).await?;

    let mut view = match mirror {
        Some(m) => RecordView::from(m),
        None => RecordView {
            id: origin.id.to_string(),
            model_id: String::new(),
            model_name: SYSTEM_USER_MODEL.to_string(),
            model_version_id: None,
            data: json!({}),
            owner_id: Some(origin.id),
            created_at: origin.created_at,
            updated_at: origin.updated_at,
        },
    };

    let map = view
        .data
        .as_object_mut()
        .ok_or_else(|| AppError::Internal("Mirror data is not an object".to_string()))?;
    map.insert("id".to_string(), json!(origin.id));
    map.insert("email".to_string(), json!(origin.email));
    map.insert("name".to_string(), json!(origin.name));
    map.insert("isActive".to_string(), json!(origin.is_active));
    match &role_record_id {
        Some(record_id) => map.insert("roleId".to_string(), json!(record_id)),
        None => map.insert("roleId".to_string(), json!(origin.role_id)),
    };
    strip_password(map);

    Ok(view)
}

async fn system_role_view<C: ConnectionTrait>(
    db: &C,
    origin: &role::Model,
) -> Result<RecordView> {
    let mirror = find_mirror(db, SYSTEM_ROLE_MODEL, origin.id).await?;

    let mut view = match mirror {
        Some(m) => RecordView::from(m),
        None => RecordView {
            id: origin.id.to_string(),
            model_id: String::new(),
            model_name: SYSTEM_ROLE_MODEL.to_string(),
            model_version_id: None,
            data: json!({}),
            owner_id: None,
            created_at: origin.created_at,
            updated_at: origin.created_at,
        },
    };

    let map = view
        .data
        .as_object_mut()
        .ok_or_else(|| AppError::Internal("Mirror data is not an object".to_string()))?;
    map.insert("id".to_string(), json!(origin.id));
    map.insert("name".to_string(), json!(origin.name));
    map.insert("description".to_string(), json!(origin.description));

    Ok(view)
}

async fn get_system_user<C: ConnectionTrait>(db: &C, supplied_id: &str) -> Result<RecordView> {
    let origin_id = resolve_origin_id(db, SYSTEM_USER_MODEL, supplied_id).await?;
    let origin = User::find_by_id(origin_id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No user with id {}", origin_id)))?;
    system_user_view(db, &origin, None).await
}

async fn get_system_role<C: ConnectionTrait>(db: &C, supplied_id: &str) -> Result<RecordView> {
    let origin_id = resolve_origin_id(db, SYSTEM_ROLE_MODEL, supplied_id).await?;
    let origin = Role::find_by_id(origin_id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No role with id {}", origin_id)))?;
    system_role_view(db, &origin).await
}

/// System entities list from the origin table, not the mirror
async fn list_system_users<C: ConnectionTrait>(
    db: &C,
    params: &ListParams,
) -> Result<(Vec<RecordView>, u64)> {
    let total = User::find().count(db).await?;
    let rows = User::find()
        .order_by_desc(user::Column::CreatedAt)
        .offset(params.skip)
        .limit(params.limit)
        .all(db)
        .await?;

    let mut views = Vec::with_capacity(rows.len());
    for origin in &rows {
        views.push(system_user_view(db, origin, None).await?);
    }
    Ok((views, total))
}

async fn list_system_roles<C: ConnectionTrait>(
    db: &C,
    params: &ListParams,
) -> Result<(Vec<RecordView>, u64)> {
    let total = Role::find().count(db).await?;
    let rows = Role::find()
        .order_by_desc(role::Column::CreatedAt)
        .offset(params.skip)
        .limit(params.limit)
        .all(db)
        .await?;

    let mut views = Vec::with_capacity(rows.len());
    for origin in &rows {
        views.push(system_role_view(db, origin).await?);
    }
    Ok((views, total))
}
