//! Completion rule for items in the `voting` status.
//!
//! Rates are compared with integer cross-multiplication so that boundary
//! cases such as `1/2 >= 50%` hold exactly.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use super::Tally;

pub const MAX_PERCENT: i32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    pub approval_threshold_percent: i32,
    pub minimum_quorum_percent: i32,
}

impl Thresholds {
    pub fn new(approval_threshold_percent: i32, minimum_quorum_percent: i32) -> Option<Self> {
        let valid = |percent: i32| (0..=MAX_PERCENT).contains(&percent);
        if !valid(approval_threshold_percent) || !valid(minimum_quorum_percent) {
            return None;
        }
        Some(Self {
            approval_threshold_percent,
            minimum_quorum_percent,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Pass,
    Fail,
    /// Deadline not reached and thresholds not yet met.
    Continue,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub decision: Decision,
    pub approval_met: bool,
    pub quorum_met: bool,
    pub approval_rate: f64,
    pub participation_rate: f64,
}

/// Decides the next status of an open item from a fresh tally and a single
/// eligible-voter snapshot.
pub fn evaluate(
    tally: &Tally,
    eligible_voters: i64,
    thresholds: &Thresholds,
    deadline: Option<DateTime<FixedOffset>>,
    now: DateTime<FixedOffset>,
) -> Evaluation {
    assert!(tally.is_consistent(), "Tally must be a ledger projection");
    assert!(eligible_voters >= 0, "Eligible voter count cannot be negative");

    let approval_rate = rate(tally.votes_for, tally.total_votes);
    let participation_rate = rate(tally.total_votes, eligible_voters);

    // An empty ledger never satisfies either threshold, even at 0%.
    let has_votes = tally.total_votes > 0;
    let approval_met = has_votes
        && meets(
            tally.votes_for,
            tally.total_votes,
            thresholds.approval_threshold_percent,
        );
    let quorum_met = has_votes
        && meets(
            tally.total_votes,
            eligible_voters,
            thresholds.minimum_quorum_percent,
        );

    let deadline_passed = deadline.is_some_and(|deadline| deadline <= now);
    let decision = match (approval_met && quorum_met, deadline_passed) {
        (true, _) => Decision::Pass,
        (false, true) => Decision::Fail,
        (false, false) => Decision::Continue,
    };

    Evaluation {
        decision,
        approval_met,
        quorum_met,
        approval_rate,
        participation_rate,
    }
}

pub fn rate(numerator: i64, denominator: i64) -> f64 {
    if denominator <= 0 {
        return 0.0;
    }
    numerator as f64 / denominator as f64
}

fn meets(numerator: i64, denominator: i64, percent: i32) -> bool {
    if denominator <= 0 {
        return percent <= 0;
    }
    i128::from(numerator) * i128::from(MAX_PERCENT) >= i128::from(percent) * i128::from(denominator)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::*;
    use crate::voting::VoteChoice;

    fn now() -> DateTime<FixedOffset> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
            .unwrap()
            .fixed_offset()
    }

    fn tally(for_votes: usize, against: usize, abstain: usize) -> Tally {
        let mut choices = Vec::new();
        choices.extend(std::iter::repeat_n(VoteChoice::Affirmative, for_votes));
        choices.extend(std::iter::repeat_n(VoteChoice::Negative, against));
        choices.extend(std::iter::repeat_n(VoteChoice::Abstain, abstain));
        Tally::from_choices(&choices)
    }

    fn half_and_half() -> Thresholds {
        Thresholds::new(50, 50).unwrap()
    }

    #[test]
    fn early_completion_when_both_thresholds_met() {
        let future = Some(now() + Duration::days(3));
        let outcome = evaluate(&tally(2, 1, 0), 4, &half_and_half(), future, now());
        assert_eq!(outcome.decision, Decision::Pass);
        assert!((outcome.approval_rate - 2.0 / 3.0).abs() < f64::EPSILON);
        assert!((outcome.participation_rate - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn open_item_keeps_voting_below_quorum() {
        let future = Some(now() + Duration::days(3));
        let outcome = evaluate(&tally(1, 0, 0), 4, &half_and_half(), future, now());
        assert!(outcome.approval_met);
        assert!(!outcome.quorum_met);
        assert_eq!(outcome.decision, Decision::Continue);
    }

    #[test]
    fn no_deadline_behaves_like_open_deadline() {
        let outcome = evaluate(&tally(0, 2, 0), 4, &half_and_half(), None, now());
        assert_eq!(outcome.decision, Decision::Continue);
    }

    #[test]
    fn boundary_rates_pass_after_deadline() {
        let past = Some(now() - Duration::hours(1));
        let outcome = evaluate(&tally(1, 1, 0), 4, &half_and_half(), past, now());
        assert_eq!(outcome.decision, Decision::Pass);
    }

    #[test]
    fn zero_approval_fails_after_deadline() {
        let past = Some(now() - Duration::hours(1));
        let outcome = evaluate(&tally(0, 1, 1), 4, &half_and_half(), past, now());
        assert_eq!(outcome.approval_rate, 0.0);
        assert_eq!(outcome.decision, Decision::Fail);
    }

    #[test]
    fn deadline_equal_to_now_counts_as_passed() {
        let outcome = evaluate(&tally(0, 1, 0), 4, &half_and_half(), Some(now()), now());
        assert_eq!(outcome.decision, Decision::Fail);
    }

    #[test]
    fn empty_ledger_never_passes() {
        let past = Some(now() - Duration::hours(1));
        let zero = Thresholds::new(0, 0).unwrap();
        for thresholds in [half_and_half(), zero] {
            let outcome = evaluate(&Tally::default(), 4, &thresholds, past, now());
            assert_eq!(outcome.approval_rate, 0.0);
            assert_eq!(outcome.participation_rate, 0.0);
            assert_eq!(outcome.decision, Decision::Fail);
        }
    }

    #[test]
    fn zero_eligible_voters_is_zero_participation() {
        let outcome = evaluate(&tally(3, 0, 0), 0, &half_and_half(), None, now());
        assert_eq!(outcome.participation_rate, 0.0);
        assert!(!outcome.quorum_met);
        assert_eq!(outcome.decision, Decision::Continue);
    }

    #[test]
    fn abstentions_count_toward_quorum_but_not_approval() {
        let outcome = evaluate(&tally(1, 0, 2), 4, &half_and_half(), None, now());
        assert!(outcome.quorum_met);
        assert!(!outcome.approval_met);
        assert_eq!(outcome.decision, Decision::Continue);
    }

    #[test]
    fn thresholds_reject_out_of_range_percentages() {
        assert!(Thresholds::new(101, 50).is_none());
        assert!(Thresholds::new(50, -1).is_none());
        assert!(Thresholds::new(100, 0).is_some());
    }
}
