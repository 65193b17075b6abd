use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "votable_items")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub kind: String,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub voting_deadline: Option<DateTimeWithTimeZone>,
    pub approval_threshold_percent: i32,
    pub minimum_quorum_percent: i32,
    pub total_eligible_voters: i64,
    // Projection of item_votes; written only by the tally engine.
    pub votes_for: i64,
    pub votes_against: i64,
    pub votes_abstain: i64,
    pub total_votes: i64,
    pub completed_at: Option<DateTimeWithTimeZone>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::item_vote::Entity")]
    ItemVote,
    #[sea_orm(has_one = "super::voting_completion::Entity")]
    VotingCompletion,
}

impl Related<super::item_vote::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ItemVote.def()
    }
}

impl Related<super::voting_completion::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::VotingCompletion.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
