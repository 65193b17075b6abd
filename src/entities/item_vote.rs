use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "item_votes")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub item_id: i64,
    pub voter_id: String,
    pub choice: String, // for/against/abstain or approve/reject/abstain
    pub reason: Option<String>,
    pub cast_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::votable_item::Entity",
        from = "Column::ItemId",
        to = "super::votable_item::Column::Id",
        on_delete = "Cascade"
    )]
    VotableItem,
}

impl Related<super::votable_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::VotableItem.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
