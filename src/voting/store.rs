use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};

use super::notify::VotingCompleted;
use super::threshold::Thresholds;
use super::{ItemKind, ItemStatus, Tally, VoteChoice, VotingError};

/// State of a votable item as read under its row lock.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemRecord {
    pub id: i64,
    pub kind: ItemKind,
    pub status: ItemStatus,
    pub voting_deadline: Option<DateTime<FixedOffset>>,
    pub thresholds: Thresholds,
    pub tally: Tally,
    pub total_eligible_voters: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ballot {
    pub voter_id: String,
    pub choice: VoteChoice,
    pub reason: Option<String>,
}

/// Everything the engine writes back onto an item after a recount.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemStateUpdate {
    pub tally: Tally,
    pub total_eligible_voters: i64,
    /// Present only on the `voting -> passed/failed` transition.
    pub completed: Option<ItemStatus>,
    pub updated_at: DateTime<FixedOffset>,
}

/// One atomic unit of work over the ledger and item tables. Dropping a
/// transaction without calling [`VotingTransaction::commit`] discards it.
#[async_trait]
pub trait VotingTransaction: Send {
    /// Reads the item and holds it exclusively until commit or drop.
    async fn lock_item(&mut self, item_id: i64) -> Result<Option<ItemRecord>, VotingError>;

    /// Whether `voter_id` is an active profile holding one of `roles`.
    async fn is_eligible_voter(
        &mut self,
        voter_id: &str,
        roles: &[String],
    ) -> Result<bool, VotingError>;

    /// Inserts the ballot, or updates the voter's existing ballot for the item.
    async fn upsert_vote(
        &mut self,
        item: &ItemRecord,
        ballot: &Ballot,
        now: DateTime<FixedOffset>,
    ) -> Result<(), VotingError>;

    /// Returns whether a ballot existed.
    async fn delete_vote(&mut self, item_id: i64, voter_id: &str) -> Result<bool, VotingError>;

    async fn count_votes(&mut self, item_id: i64) -> Result<Tally, VotingError>;

    async fn count_eligible_voters(&mut self, roles: &[String]) -> Result<i64, VotingError>;

    async fn write_item_state(
        &mut self,
        item_id: i64,
        update: &ItemStateUpdate,
    ) -> Result<(), VotingError>;

    /// Returns `false` when a completion was already recorded for the item.
    async fn record_completion(&mut self, completion: &VotingCompleted)
    -> Result<bool, VotingError>;

    async fn commit(self) -> Result<(), VotingError>;
}

#[async_trait]
pub trait VotingRepository: Send + Sync {
    type Transaction: VotingTransaction;

    async fn begin(&self) -> Result<Self::Transaction, VotingError>;

    /// Completions whose notification has not been acknowledged yet.
    async fn pending_completions(&self) -> Result<Vec<VotingCompleted>, VotingError>;

    async fn mark_notified(
        &self,
        item_id: i64,
        at: DateTime<FixedOffset>,
    ) -> Result<(), VotingError>;
}
