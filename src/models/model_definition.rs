use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A named draft/published schema container. `json` is the working draft;
/// `version` is the last published version number (0 when never published).
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "model_definitions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    #[sea_orm(unique)]
    pub name: String,
    pub table_name: Option<String>,
    pub owner_field: Option<String>,
    pub json: Json,
    pub version: i32,
    pub published: bool,
    pub published_at: Option<DateTimeUtc>,
    pub published_by: Option<i64>,
    pub is_system: bool,
    pub file_path: Option<String>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::model_version::Entity")]
    ModelVersions,
    #[sea_orm(has_many = "super::record::Entity")]
    Records,
    #[sea_orm(has_many = "super::model_role_permission::Entity")]
    ModelRolePermissions,
}

impl Related<super::model_version::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ModelVersions.def()
    }
}

impl Related<super::record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Records.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
