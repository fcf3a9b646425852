//! Relation suggestor: candidate targets for the model-authoring UI's
//! relation picker.

use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect};
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;
use crate::models::prelude::*;
use crate::models::{record, role, user};
use crate::services::records::{SYSTEM_ROLE_MODEL, SYSTEM_USER_MODEL};
use crate::services::registry;
use crate::services::schema::parse_schema;

const MAX_LIMIT: u64 = 100;
const MAX_SAMPLES: u64 = 10;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleRecord {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationCandidate {
    pub id: String,
    pub name: String,
    pub table_name: Option<String>,
    pub version: i32,
    pub display_field: String,
    pub fields: Vec<String>,
    pub record_count: u64,
    pub samples: Vec<SampleRecord>,
}

fn stringify_label(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// Enumerate candidate target models for a relation on `base_model_id`.
/// The base model itself is excluded; system models carry synthetic
/// `system:<key>` ids so the picker can render them distinctly.
pub async fn suggest<C: ConnectionTrait>(
    db: &C,
    base_model_id: &str,
    q: Option<&str>,
    limit: u64,
    sample_limit: u64,
) -> Result<Vec<RelationCandidate>> {
    let limit = limit.clamp(1, MAX_LIMIT) as usize;
    let sample_limit = sample_limit.min(MAX_SAMPLES);
    let filter = q.map(|s| s.to_lowercase());

    let mut out = Vec::new();

    for model in registry::list_models(db, true).await? {
        if model.id == base_model_id {
            continue;
        }
        if let Some(needle) = &filter {
            if !model.name.to_lowercase().contains(needle) {
                continue;
            }
        }

        let candidate = if model.is_system && model.name == SYSTEM_USER_MODEL {
            system_user_candidate(db, &model, sample_limit).await?
        } else if model.is_system && model.name == SYSTEM_ROLE_MODEL {
            system_role_candidate(db, &model, sample_limit).await?
        } else {
            model_candidate(db, &model, sample_limit).await?
        };

        out.push(candidate);
        if out.len() >= limit {
            break;
        }
    }

    Ok(out)
}

async fn model_candidate<C: ConnectionTrait>(
    db: &C,
    model: &crate::models::model_definition::Model,
    sample_limit: u64,
) -> Result<RelationCandidate> {
    let schema = match registry::latest_version(db, &model.id).await? {
        Some(v) => parse_schema(&v.json)?,
        None => parse_schema(&model.json)?,
    };

    let mut fields: Vec<String> = schema.fields.iter().map(|f| f.name.clone()).collect();
    if !fields.iter().any(|f| f == "id") {
        fields.insert(0, "id".to_string());
    }
    let display_field = schema.display_field().unwrap_or("id").to_string();

    let record_count = Record::find()
        .filter(record::Column::ModelId.eq(&model.id))
        .filter(record::Column::DeletedAt.is_null())
        .count(db)
        .await?;

    let samples = if sample_limit > 0 {
        Record::find()
            .filter(record::Column::ModelId.eq(&model.id))
            .filter(record::Column::DeletedAt.is_null())
            .order_by_desc(record::Column::CreatedAt)
            .limit(sample_limit)
            .all(db)
            .await?
            .into_iter()
            .map(|row| SampleRecord {
                label: stringify_label(row.data.get(&display_field)),
                id: row.id,
            })
            .collect()
    } else {
        Vec::new()
    };

    Ok(RelationCandidate {
        id: model.id.clone(),
        name: model.name.clone(),
        table_name: model.table_name.clone(),
        version: model.version,
        display_field,
        fields,
        record_count,
        samples,
    })
}

async fn system_user_candidate<C: ConnectionTrait>(
    db: &C,
    model: &crate::models::model_definition::Model,
    sample_limit: u64,
) -> Result<RelationCandidate> {
    let record_count = User::find().count(db).await?;
    let samples = if sample_limit > 0 {
        User::find()
            .order_by_desc(user::Column::CreatedAt)
            .limit(sample_limit)
            .all(db)
            .await?
            .into_iter()
            .map(|u| SampleRecord {
                id: u.id.to_string(),
                label: u.name.unwrap_or(u.email),
            })
            .collect()
    } else {
        Vec::new()
    };

    Ok(RelationCandidate {
        id: "system:user".to_string(),
        name: model.name.clone(),
        table_name: model.table_name.clone(),
        version: model.version,
        display_field: "name".to_string(),
        fields: vec![
            "id".to_string(),
            "email".to_string(),
            "name".to_string(),
            "roleId".to_string(),
            "isActive".to_string(),
        ],
        record_count,
        samples,
    })
}

async fn system_role_candidate<C: ConnectionTrait>(
    db: &C,
    model: &crate::models::model_definition::Model,
    sample_limit: u64,
) -> Result<RelationCandidate> {
    let record_count = Role::find().count(db).await?;
    let samples = if sample_limit > 0 {
        Role::find()
            .order_by_desc(role::Column::CreatedAt)
            .limit(sample_limit)
            .all(db)
            .await?
            .into_iter()
            .map(|r| SampleRecord {
                id: r.id.to_string(),
                label: r.name,
            })
            .collect()
    } else {
        Vec::new()
    };

    Ok(RelationCandidate {
        id: "system:role".to_string(),
        name: model.name.clone(),
        table_name: model.table_name.clone(),
        version: model.version,
        display_field: "name".to_string(),
        fields: vec![
            "id".to_string(),
            "name".to_string(),
            "description".to_string(),
        ],
        record_count,
        samples,
    })
}
