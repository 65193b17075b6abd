use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemView {
    pub item_id: i64,
    pub kind: String, // resolution | minutes
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub voting_deadline: Option<i64>,
    pub approval_threshold_percent: i32,
    pub minimum_quorum_percent: i32,
    pub total_eligible_voters: i64,
    pub votes_for: i64,
    pub votes_against: i64,
    pub votes_abstain: i64,
    pub total_votes: i64,
    pub approval_rate: f64,
    pub participation_rate: f64,
    pub completed_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteView {
    pub item_id: i64,
    pub voter_id: String,
    pub choice: String,
    pub reason: Option<String>,
    pub cast_at: i64,
    pub updated_at: i64,
}

// Request/Response types for the voting HTTP API

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemCreateRequest {
    pub kind: String,
    pub title: String,
    pub description: Option<String>,
    pub voting_deadline: Option<i64>, // unix seconds
    pub approval_threshold_percent: Option<i32>,
    pub minimum_quorum_percent: Option<i32>,
    /// Create directly in `voting` instead of `draft`
    #[serde(default)]
    pub open: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteCastRequest {
    pub voter_id: String,
    pub choice: String, // for/against/abstain or approve/reject/abstain
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementView {
    pub item_id: i64,
    pub kind: String,
    pub status: String,
    pub votes_for: i64,
    pub votes_against: i64,
    pub votes_abstain: i64,
    pub total_votes: i64,
    pub total_eligible_voters: i64,
    pub ledger_changed: bool,
    pub voting_closed: bool,
}
