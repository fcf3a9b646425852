use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Per-(model, role, permission) grant. `allowed=false` is an explicit
/// deny that shadows any role-level grant.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "model_role_permissions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub model_id: String,
    pub role_id: i64,
    pub permission_id: String,
    pub allowed: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::model_definition::Entity",
        from = "Column::ModelId",
        to = "super::model_definition::Column::Id"
    )]
    ModelDefinition,
    #[sea_orm(
        belongs_to = "super::role::Entity",
        from = "Column::RoleId",
        to = "super::role::Column::Id"
    )]
    Role,
    #[sea_orm(
        belongs_to = "super::permission::Entity",
        from = "Column::PermissionId",
        to = "super::permission::Column::Id"
    )]
    Permission,
}

impl Related<super::model_definition::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ModelDefinition.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
