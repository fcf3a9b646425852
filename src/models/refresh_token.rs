use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Rotating opaque refresh token. The wire form is `"<id>::<secret>"`;
/// only the salted hash of the secret is stored. Rotation links
/// `replaced_by_id` and revokes the old row in the same transaction.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "refresh_tokens")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub user_id: i64,
    pub created_at: DateTimeUtc,
    pub expires_at: DateTimeUtc,
    pub revoked: bool,
    pub revoked_at: Option<DateTimeUtc>,
    pub replaced_by_id: Option<String>,
    pub created_by_ip: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
