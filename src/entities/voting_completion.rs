//! Completion outbox: one row per item that reached a terminal status.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "voting_completions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub item_id: i64,
    pub item_kind: String,
    /// "passed" or "failed"
    pub final_status: String,
    pub votes_for: i64,
    pub votes_against: i64,
    pub votes_abstain: i64,
    pub total_votes: i64,
    pub total_eligible_voters: i64,
    pub completed_at: DateTimeWithTimeZone,
    /// Set once the notifier accepted the event
    pub notified_at: Option<DateTimeWithTimeZone>,
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
