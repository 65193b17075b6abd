use serde::{Deserialize, Serialize};

use super::VoteChoice;

/// Aggregate counts for one item, always derived from its vote ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub votes_for: i64,
    pub votes_against: i64,
    pub votes_abstain: i64,
    pub total_votes: i64,
}

impl Tally {
    /// Builds a tally from grouped `(choice, count)` rows of a single item.
    ///
    /// Rows for the same choice are summed, so a grouping that splits one
    /// choice across several spellings (`for` and `approve`) still lands in
    /// the right bucket.
    pub fn from_choice_counts<I>(counts: I) -> Self
    where
        I: IntoIterator<Item = (VoteChoice, i64)>,
    {
        let mut tally = Self::default();
        for (choice, count) in counts {
            assert!(count >= 0, "Vote count must be non-negative");
            match choice {
                VoteChoice::Affirmative => tally.votes_for += count,
                VoteChoice::Negative => tally.votes_against += count,
                VoteChoice::Abstain => tally.votes_abstain += count,
            }
        }
        tally.total_votes = tally.votes_for + tally.votes_against + tally.votes_abstain;
        debug_assert!(tally.is_consistent());
        tally
    }

    pub fn from_choices<'a, I>(choices: I) -> Self
    where
        I: IntoIterator<Item = &'a VoteChoice>,
    {
        Self::from_choice_counts(choices.into_iter().map(|choice| (*choice, 1)))
    }

    pub fn is_consistent(&self) -> bool {
        self.votes_for >= 0
            && self.votes_against >= 0
            && self.votes_abstain >= 0
            && self.total_votes == self.votes_for + self.votes_against + self.votes_abstain
    }
}
