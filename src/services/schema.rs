//! Model schema parsing and validation.
//!
//! Schemas are authored at runtime as JSON, either directly as
//! `{"fields": [...]}` or wrapped as
//! `{"definition": {"fields": [...]}, "rbac": {...}}`. Parsing converts
//! them into tagged types; everything downstream (relation resolution,
//! payload validation, artifacts) works on [`ModelSchema`], never on raw
//! JSON shapes.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    #[serde(rename = "string")]
    String,
    #[serde(rename = "number")]
    Number,
    #[serde(rename = "boolean")]
    Boolean,
    #[serde(rename = "date")]
    Date,
    #[serde(rename = "json")]
    Json,
    #[serde(rename = "string[]")]
    StringArray,
    #[serde(rename = "relation")]
    Relation,
}

impl FieldType {
    fn from_str(raw: &str) -> Option<Self> {
        match raw {
            "string" => Some(FieldType::String),
            "number" => Some(FieldType::Number),
            "boolean" => Some(FieldType::Boolean),
            "date" => Some(FieldType::Date),
            "json" => Some(FieldType::Json),
            "string[]" => Some(FieldType::StringArray),
            "relation" => Some(FieldType::Relation),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationKind {
    #[serde(rename = "one-to-one")]
    OneToOne,
    #[serde(rename = "one-to-many")]
    OneToMany,
    #[serde(rename = "many-to-one")]
    ManyToOne,
    #[serde(rename = "many-to-many")]
    ManyToMany,
}

impl RelationKind {
    fn from_str(raw: &str) -> Option<Self> {
        match raw {
            "one-to-one" => Some(RelationKind::OneToOne),
            "one-to-many" => Some(RelationKind::OneToMany),
            "many-to-one" => Some(RelationKind::ManyToOne),
            "many-to-many" => Some(RelationKind::ManyToMany),
            _ => None,
        }
    }

    /// Relation kinds whose stored value is a list of target ids
    pub fn is_multi(&self) -> bool {
        matches!(self, RelationKind::OneToMany | RelationKind::ManyToMany)
    }

    /// Relation kinds whose stored value is a single target id; these
    /// participate in linking-model uniqueness
    pub fn is_single(&self) -> bool {
        matches!(self, RelationKind::OneToOne | RelationKind::ManyToOne)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationDef {
    pub model: String,
    pub field: String,
    #[serde(rename = "type")]
    pub kind: RelationKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<RelationDef>,
}

/// Parsed model schema: field list plus the per-role RBAC map that
/// publish turns into ModelRolePermission rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ModelSchema {
    pub fields: Vec<FieldDef>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub rbac: BTreeMap<String, Vec<String>>,
}

impl ModelSchema {
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn relation_fields(&self) -> impl Iterator<Item = (&FieldDef, &RelationDef)> {
        self.fields
            .iter()
            .filter_map(|f| f.relation.as_ref().map(|r| (f, r)))
    }

    /// Fields holding a single target id (many-to-one / one-to-one)
    pub fn single_relation_fields(&self) -> Vec<(&FieldDef, &RelationDef)> {
        self.relation_fields()
            .filter(|(_, r)| r.kind.is_single())
            .collect()
    }

    /// Display field for pickers: first of name|title|label|displayName,
    /// else the first string field, else the first field.
    pub fn display_field(&self) -> Option<&str> {
        for candidate in ["name", "title", "label", "displayName"] {
            if self.field(candidate).is_some() {
                return Some(candidate);
            }
        }
        self.fields
            .iter()
            .find(|f| f.field_type == FieldType::String)
            .or_else(|| self.fields.first())
            .map(|f| f.name.as_str())
    }

    /// Serialize back to the canonical `{"fields": [...], "rbac": {...}}`
    /// shape used by artifacts and stored drafts.
    pub fn to_definition_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Validate and parse a schema payload.
///
/// Accepts the direct and the wrapped form; rejects non-object payloads,
/// missing `fields`, fields without `name`/`type`, unknown types, relation
/// fields missing any of `relation.{model,field,type}`, relation types
/// outside the allowed four, and duplicate field names.
pub fn parse_schema(payload: &Value) -> Result<ModelSchema> {
    let obj = payload
        .as_object()
        .ok_or_else(|| AppError::BadRequest("Schema must be a JSON object".to_string()))?;

    // Unwrap {definition: {...}, rbac: {...}}; rbac may live beside or
    // inside the definition (artifacts use the inner position).
    let (fields_holder, rbac_value) = match obj.get("definition") {
        Some(def) => {
            let def_obj = def.as_object().ok_or_else(|| {
                AppError::BadRequest("Schema 'definition' must be a JSON object".to_string())
            })?;
            let rbac = obj.get("rbac").or_else(|| def_obj.get("rbac"));
            (def_obj, rbac)
        }
        None => (obj, obj.get("rbac")),
    };

    let raw_fields = fields_holder
        .get("fields")
        .ok_or_else(|| AppError::BadRequest("Schema is missing 'fields'".to_string()))?
        .as_array()
        .ok_or_else(|| AppError::BadRequest("Schema 'fields' must be an array".to_string()))?;

    let mut fields = Vec::with_capacity(raw_fields.len());
    let mut seen = HashSet::new();

    for raw in raw_fields {
        let field = parse_field(raw)?;
        if !seen.insert(field.name.clone()) {
            return Err(AppError::BadRequest(format!(
                "Duplicate field name '{}'",
                field.name
            )));
        }
        fields.push(field);
    }

    let rbac = match rbac_value {
        Some(value) => parse_rbac(value)?,
        None => BTreeMap::new(),
    };

    Ok(ModelSchema { fields, rbac })
}

fn parse_field(raw: &Value) -> Result<FieldDef> {
    let obj = raw
        .as_object()
        .ok_or_else(|| AppError::BadRequest("Each field must be a JSON object".to_string()))?;

    let name = obj
        .get("name")
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| AppError::BadRequest("Field is missing a non-empty 'name'".to_string()))?
        .to_string();

    let type_raw = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::BadRequest(format!("Field '{}' is missing 'type'", name)))?;

    let field_type = FieldType::from_str(type_raw).ok_or_else(|| {
        AppError::BadRequest(format!("Field '{}' has unknown type '{}'", name, type_raw))
    })?;

    let relation = if field_type == FieldType::Relation {
        Some(parse_relation(&name, obj.get("relation"))?)
    } else {
        None
    };

    Ok(FieldDef {
        name,
        field_type,
        required: obj.get("required").and_then(Value::as_bool).unwrap_or(false),
        unique: obj.get("unique").and_then(Value::as_bool).unwrap_or(false),
        default: obj.get("default").cloned(),
        relation,
    })
}

fn parse_relation(field_name: &str, raw: Option<&Value>) -> Result<RelationDef> {
    let obj = raw
        .and_then(Value::as_object)
        .ok_or_else(|| {
            AppError::BadRequest(format!(
                "Relation field '{}' is missing its 'relation' object",
                field_name
            ))
        })?;

    let model = obj
        .get("model")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| {
            AppError::BadRequest(format!(
                "Relation field '{}' is missing 'relation.model'",
                field_name
            ))
        })?
        .to_string();

    let target_field = obj
        .get("field")
        .and_then(Value::as_str)
        .filter(|f| !f.is_empty())
        .ok_or_else(|| {
            AppError::BadRequest(format!(
                "Relation field '{}' is missing 'relation.field'",
                field_name
            ))
        })?
        .to_string();

    let kind_raw = obj.get("type").and_then(Value::as_str).ok_or_else(|| {
        AppError::BadRequest(format!(
            "Relation field '{}' is missing 'relation.type'",
            field_name
        ))
    })?;

    let kind = RelationKind::from_str(kind_raw).ok_or_else(|| {
        AppError::BadRequest(format!(
            "Relation field '{}' has unknown relation type '{}'",
            field_name, kind_raw
        ))
    })?;

    Ok(RelationDef {
        model,
        field: target_field,
        kind,
    })
}

fn parse_rbac(value: &Value) -> Result<BTreeMap<String, Vec<String>>> {
    let obj = value
        .as_object()
        .ok_or_else(|| AppError::BadRequest("Schema 'rbac' must be a JSON object".to_string()))?;

    let mut rbac = BTreeMap::new();
    for (role, actions) in obj {
        let list = actions.as_array().ok_or_else(|| {
            AppError::BadRequest(format!("rbac entry for role '{}' must be an array", role))
        })?;
        let actions: Vec<String> = list
            .iter()
            .filter_map(Value::as_str)
            .map(|a| a.to_uppercase())
            .collect();
        rbac.insert(role.clone(), actions);
    }
    Ok(rbac)
}
