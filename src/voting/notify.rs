use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::threshold::rate;
use super::{ItemKind, ItemStatus, Tally, VotingError};

/// Emitted once per item when it leaves the `voting` status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VotingCompleted {
    pub item_kind: ItemKind,
    pub item_id: i64,
    pub final_status: ItemStatus,
    pub tally: Tally,
    pub total_eligible_voters: i64,
    pub approval_rate: f64,
    pub participation_rate: f64,
    pub completed_at: DateTime<FixedOffset>,
}

impl VotingCompleted {
    /// Builds the event for a closed item; the rates are derived from `tally`.
    pub fn new(
        item_kind: ItemKind,
        item_id: i64,
        final_status: ItemStatus,
        tally: Tally,
        total_eligible_voters: i64,
        completed_at: DateTime<FixedOffset>,
    ) -> Self {
        Self {
            item_kind,
            item_id,
            final_status,
            tally,
            total_eligible_voters,
            approval_rate: rate(tally.votes_for, tally.total_votes),
            participation_rate: rate(tally.total_votes, total_eligible_voters),
            completed_at,
        }
    }
}

/// Receiver of completion events, typically the summary mailer.
#[async_trait]
pub trait CompletionNotifier: Send + Sync {
    async fn voting_completed(&self, event: &VotingCompleted) -> Result<(), VotingError>;
}

/// Writes completion summaries to the log stream. Mail delivery picks them
/// up from the `voting_completions` table.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl CompletionNotifier for LogNotifier {
    async fn voting_completed(&self, event: &VotingCompleted) -> Result<(), VotingError> {
        let payload = serde_json::to_string(event)
            .map_err(|err| VotingError::Notification(err.to_string()))?;
        info!(
            item_id = event.item_id,
            kind = event.item_kind.as_str(),
            status = event.final_status.as_str(),
            approval_rate = event.approval_rate,
            participation_rate = event.participation_rate,
            "Voting completed: {payload}"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::voting::VoteChoice;

    #[test]
    fn serialized_event_carries_rates() {
        let tally = Tally::from_choice_counts([
            (VoteChoice::Affirmative, 3),
            (VoteChoice::Negative, 1),
        ]);
        let completed_at = Utc
            .with_ymd_and_hms(2026, 6, 1, 12, 0, 0)
            .unwrap()
            .fixed_offset();
        let event = VotingCompleted::new(
            ItemKind::Resolution,
            9,
            ItemStatus::Passed,
            tally,
            8,
            completed_at,
        );

        let payload = serde_json::to_value(&event).unwrap();
        assert_eq!(payload["approval_rate"], 0.75);
        assert_eq!(payload["participation_rate"], 0.5);
        assert_eq!(payload["final_status"], "passed");
        assert_eq!(payload["item_kind"], "resolution");
    }
}
