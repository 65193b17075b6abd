//! Vote tally and completion engine.
//!
//! Every ledger command (cast, withdraw, evaluate) runs as one transaction:
//! the item row is locked, the ledger is mutated, the tally is recounted
//! from the ledger for that item only, and while the item is still
//! `voting` the completion rule decides whether it becomes `passed` or
//! `failed`. A terminal transition records a completion row in the same
//! transaction; the notifier is called after commit.

use chrono::{DateTime, FixedOffset};
use sea_orm::DbErr;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub mod notify;
pub mod postgres;
pub mod store;
pub mod tally;
pub mod threshold;

#[cfg(test)]
pub mod memory;

pub use notify::{CompletionNotifier, VotingCompleted};
pub use store::{Ballot, ItemStateUpdate, VotingRepository, VotingTransaction};
pub use tally::Tally;
pub use threshold::Decision;

pub const MAX_VOTER_ID_LEN: usize = 128;
pub const MAX_REASON_LEN: usize = 2_000;

#[derive(Debug, thiserror::Error)]
pub enum VotingError {
    #[error("database error: {0}")]
    Database(#[from] DbErr),
    #[error("stored item {item_id} is malformed: {detail}")]
    CorruptItem { item_id: i64, detail: String },
    #[error("completion notification failed: {0}")]
    Notification(String),
}

/// Rejects tallies that are not a count projection of a ledger.
pub(crate) fn ensure_projection(item_id: i64, tally: &Tally) -> Result<(), VotingError> {
    if tally.is_consistent() {
        return Ok(());
    }
    Err(VotingError::CorruptItem {
        item_id,
        detail: format!(
            "tally {}/{}/{} does not sum to {}",
            tally.votes_for, tally.votes_against, tally.votes_abstain, tally.total_votes
        ),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Resolution,
    Minutes,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resolution => "resolution",
            Self::Minutes => "minutes",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "resolution" | "resolutions" => Some(Self::Resolution),
            "minutes" | "meeting_minutes" => Some(Self::Minutes),
            _ => None,
        }
    }

    /// Canonical ledger spelling of a choice for this kind of item.
    pub fn choice_label(&self, choice: VoteChoice) -> &'static str {
        match (self, choice) {
            (Self::Resolution, VoteChoice::Affirmative) => "for",
            (Self::Resolution, VoteChoice::Negative) => "against",
            (Self::Minutes, VoteChoice::Affirmative) => "approve",
            (Self::Minutes, VoteChoice::Negative) => "reject",
            (_, VoteChoice::Abstain) => "abstain",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Draft,
    Voting,
    Passed,
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Voting => "voting",
            Self::Passed => "passed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "draft" => Some(Self::Draft),
            "voting" => Some(Self::Voting),
            "passed" => Some(Self::Passed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Passed | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteChoice {
    Affirmative,
    Negative,
    Abstain,
}

impl VoteChoice {
    /// Accepts both the resolution and the minutes vocabularies.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "for" | "approve" | "yes" => Some(Self::Affirmative),
            "against" | "reject" | "no" => Some(Self::Negative),
            "abstain" => Some(Self::Abstain),
            _ => None,
        }
    }
}

/// Result of a ledger command once its transaction committed.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// The item does not exist; nothing was written.
    ItemMissing,
    /// Ballots are not accepted while the item is a draft.
    NotOpen,
    /// The voter is not an active profile with a voting role; nothing was written.
    NotEligible,
    Applied(Settlement),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub item_id: i64,
    pub kind: ItemKind,
    pub status: ItemStatus,
    pub tally: Tally,
    pub total_eligible_voters: i64,
    pub ledger_changed: bool,
    /// True only for the command that moved the item out of `voting`.
    pub transitioned: bool,
}

enum LedgerMutation<'a> {
    Cast(&'a Ballot),
    Withdraw(&'a str),
    Recount,
}

pub struct VoteService<R, N> {
    repository: R,
    notifier: N,
    eligible_roles: Vec<String>,
}

impl<R, N> VoteService<R, N>
where
    R: VotingRepository,
    N: CompletionNotifier,
{
    pub fn new(repository: R, notifier: N, eligible_roles: Vec<String>) -> Self {
        assert!(
            eligible_roles.iter().all(|role| !role.trim().is_empty()),
            "Eligible roles must be non-empty strings"
        );
        Self {
            repository,
            notifier,
            eligible_roles,
        }
    }

    /// Records `ballot` for `item_id`, replacing the voter's earlier ballot.
    pub async fn cast_vote(
        &self,
        item_id: i64,
        ballot: &Ballot,
        now: DateTime<FixedOffset>,
    ) -> Result<CommandOutcome, VotingError> {
        assert!(!ballot.voter_id.is_empty(), "Voter id must be present");
        assert!(
            ballot.voter_id.len() <= MAX_VOTER_ID_LEN,
            "Voter id exceeds defensive bound"
        );
        self.execute(item_id, LedgerMutation::Cast(ballot), now)
            .await
    }

    pub async fn withdraw_vote(
        &self,
        item_id: i64,
        voter_id: &str,
        now: DateTime<FixedOffset>,
    ) -> Result<CommandOutcome, VotingError> {
        assert!(!voter_id.is_empty(), "Voter id must be present");
        self.execute(item_id, LedgerMutation::Withdraw(voter_id), now)
            .await
    }

    /// Recounts and re-evaluates without touching the ledger, which closes
    /// items whose deadline passed after the last ballot.
    pub async fn evaluate(
        &self,
        item_id: i64,
        now: DateTime<FixedOffset>,
    ) -> Result<CommandOutcome, VotingError> {
        self.execute(item_id, LedgerMutation::Recount, now).await
    }

    /// Re-sends completions the notifier has not acknowledged. Returns the
    /// number delivered.
    pub async fn redeliver_pending(
        &self,
        now: DateTime<FixedOffset>,
    ) -> Result<usize, VotingError> {
        let pending = self.repository.pending_completions().await?;
        let mut delivered = 0;
        for completion in &pending {
            if self.deliver(completion, now).await {
                delivered += 1;
            }
        }
        if !pending.is_empty() {
            info!(
                pending = pending.len(),
                delivered, "Redelivered voting completions"
            );
        }
        Ok(delivered)
    }

    async fn execute(
        &self,
        item_id: i64,
        mutation: LedgerMutation<'_>,
        now: DateTime<FixedOffset>,
    ) -> Result<CommandOutcome, VotingError> {
        let mut txn = self.repository.begin().await?;

        let Some(item) = txn.lock_item(item_id).await? else {
            debug!(item_id, "Ledger command for missing item ignored");
            return Ok(CommandOutcome::ItemMissing);
        };

        let ledger_changed = match mutation {
            LedgerMutation::Cast(_) if item.status == ItemStatus::Draft => {
                debug!(item_id, "Ballot rejected for draft item");
                return Ok(CommandOutcome::NotOpen);
            }
            LedgerMutation::Cast(ballot) => {
                if !txn
                    .is_eligible_voter(&ballot.voter_id, &self.eligible_roles)
                    .await?
                {
                    debug!(
                        item_id,
                        voter_id = %ballot.voter_id,
                        "Ballot from ineligible voter rejected"
                    );
                    return Ok(CommandOutcome::NotEligible);
                }
                txn.upsert_vote(&item, ballot, now).await?;
                true
            }
            LedgerMutation::Withdraw(voter_id) => txn.delete_vote(item_id, voter_id).await?,
            LedgerMutation::Recount => false,
        };

        let tally = txn.count_votes(item_id).await?;
        ensure_projection(item_id, &tally)?;
        if !ledger_changed && item.tally != tally {
            warn!(item_id, "Stored tally drifted from the ledger; recount corrects it");
        }

        let (total_eligible_voters, completed) = if item.status == ItemStatus::Voting {
            let eligible = txn.count_eligible_voters(&self.eligible_roles).await?;
            let evaluation = threshold::evaluate(
                &tally,
                eligible,
                &item.thresholds,
                item.voting_deadline,
                now,
            );
            let completed = match evaluation.decision {
                Decision::Pass => Some(ItemStatus::Passed),
                Decision::Fail => Some(ItemStatus::Failed),
                Decision::Continue => None,
            };
            debug!(
                item_id,
                approval_met = evaluation.approval_met,
                quorum_met = evaluation.quorum_met,
                approval_rate = evaluation.approval_rate,
                participation_rate = evaluation.participation_rate,
                "Evaluated completion thresholds"
            );
            (eligible, completed)
        } else {
            // Terminal and draft items keep their status and snapshot.
            (item.total_eligible_voters, None)
        };

        let update = ItemStateUpdate {
            tally,
            total_eligible_voters,
            completed,
            updated_at: now,
        };
        txn.write_item_state(item_id, &update).await?;

        let completion = match completed {
            Some(final_status) => {
                let completion = VotingCompleted::new(
                    item.kind,
                    item_id,
                    final_status,
                    tally,
                    total_eligible_voters,
                    now,
                );
                txn.record_completion(&completion)
                    .await?
                    .then_some(completion)
            }
            None => None,
        };

        txn.commit().await?;

        let status = completed.unwrap_or(item.status);
        if let Some(completion) = completion.as_ref() {
            info!(
                item_id,
                kind = item.kind.as_str(),
                status = status.as_str(),
                votes_for = tally.votes_for,
                votes_against = tally.votes_against,
                votes_abstain = tally.votes_abstain,
                total_eligible_voters,
                "Voting closed"
            );
            self.deliver(completion, now).await;
        }

        Ok(CommandOutcome::Applied(Settlement {
            item_id,
            kind: item.kind,
            status,
            tally,
            total_eligible_voters,
            ledger_changed,
            transitioned: completion.is_some(),
        }))
    }

    async fn deliver(&self, completion: &VotingCompleted, now: DateTime<FixedOffset>) -> bool {
        if let Err(err) = self.notifier.voting_completed(completion).await {
            warn!(
                item_id = completion.item_id,
                "Completion notification left pending: {err}"
            );
            return false;
        }
        if let Err(err) = self
            .repository
            .mark_notified(completion.item_id, now)
            .await
        {
            warn!(
                item_id = completion.item_id,
                "Failed to acknowledge completion notification: {err}"
            );
        }
        true
    }
}
