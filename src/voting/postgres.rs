use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use sea_orm::ActiveValue::Set;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait, Insert, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Select, TransactionTrait, UpdateMany,
};
use tracing::warn;

use super::notify::VotingCompleted;
use super::store::{Ballot, ItemRecord, ItemStateUpdate, VotingRepository, VotingTransaction};
use super::threshold::Thresholds;
use super::{ItemKind, ItemStatus, Tally, VoteChoice, VotingError, ensure_projection};
use crate::entities::{item_vote, profile, votable_item, voting_completion};

const MAX_REDELIVERY_BATCH: u64 = 256;

#[derive(Clone)]
pub struct PgVotingRepository {
    database: DatabaseConnection,
}

impl PgVotingRepository {
    pub fn new(database: DatabaseConnection) -> Self {
        Self { database }
    }
}

pub struct PgVotingTransaction {
    txn: DatabaseTransaction,
}

#[async_trait]
impl VotingRepository for PgVotingRepository {
    type Transaction = PgVotingTransaction;

    async fn begin(&self) -> Result<Self::Transaction, VotingError> {
        let txn = self.database.begin().await?;
        Ok(PgVotingTransaction { txn })
    }

    async fn pending_completions(&self) -> Result<Vec<VotingCompleted>, VotingError> {
        let models = voting_completion::Entity::find()
            .filter(voting_completion::Column::NotifiedAt.is_null())
            .order_by_asc(voting_completion::Column::CompletedAt)
            .limit(MAX_REDELIVERY_BATCH)
            .all(&self.database)
            .await?;

        let mut completions = Vec::with_capacity(models.len());
        for model in &models {
            match completion_from_model(model) {
                Ok(completion) => completions.push(completion),
                Err(err) => warn!(item_id = model.item_id, "Skipping stored completion: {err}"),
            }
        }
        Ok(completions)
    }

    async fn mark_notified(
        &self,
        item_id: i64,
        at: DateTime<FixedOffset>,
    ) -> Result<(), VotingError> {
        voting_completion::Entity::update_many()
            .col_expr(voting_completion::Column::NotifiedAt, Expr::value(at))
            .filter(voting_completion::Column::ItemId.eq(item_id))
            .filter(voting_completion::Column::NotifiedAt.is_null())
            .exec(&self.database)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl VotingTransaction for PgVotingTransaction {
    async fn lock_item(&mut self, item_id: i64) -> Result<Option<ItemRecord>, VotingError> {
        let model = votable_item::Entity::find_by_id(item_id)
            .lock_exclusive()
            .one(&self.txn)
            .await?;
        model.as_ref().map(item_record).transpose()
    }

    async fn is_eligible_voter(
        &mut self,
        voter_id: &str,
        roles: &[String],
    ) -> Result<bool, VotingError> {
        if roles.is_empty() {
            return Ok(false);
        }
        let matches = electorate(roles)
            .filter(profile::Column::Id.eq(voter_id))
            .count(&self.txn)
            .await?;
        Ok(matches > 0)
    }

    async fn upsert_vote(
        &mut self,
        item: &ItemRecord,
        ballot: &Ballot,
        now: DateTime<FixedOffset>,
    ) -> Result<(), VotingError> {
        upsert_statement(item, ballot, now)
            .exec_without_returning(&self.txn)
            .await?;
        Ok(())
    }

    async fn delete_vote(&mut self, item_id: i64, voter_id: &str) -> Result<bool, VotingError> {
        let result = item_vote::Entity::delete_many()
            .filter(item_vote::Column::ItemId.eq(item_id))
            .filter(item_vote::Column::VoterId.eq(voter_id))
            .exec(&self.txn)
            .await?;
        ballot_removed(item_id, result.rows_affected)
    }

    async fn count_votes(&mut self, item_id: i64) -> Result<Tally, VotingError> {
        let rows = tally_query(item_id)
            .into_tuple::<(String, i64)>()
            .all(&self.txn)
            .await?;

        let counts = rows.into_iter().filter_map(|(choice, count)| {
            let parsed = VoteChoice::parse(&choice);
            if parsed.is_none() {
                warn!(item_id, choice = %choice, count, "Ignoring ballots with unknown choice");
            }
            parsed.map(|choice| (choice, count))
        });
        Ok(Tally::from_choice_counts(counts))
    }

    async fn count_eligible_voters(&mut self, roles: &[String]) -> Result<i64, VotingError> {
        if roles.is_empty() {
            return Ok(0);
        }
        let count = electorate(roles).count(&self.txn).await?;
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }

    async fn write_item_state(
        &mut self,
        item_id: i64,
        update: &ItemStateUpdate,
    ) -> Result<(), VotingError> {
        item_state_statement(item_id, update)?
            .exec(&self.txn)
            .await?;
        Ok(())
    }

    async fn record_completion(
        &mut self,
        completion: &VotingCompleted,
    ) -> Result<bool, VotingError> {
        let model = voting_completion::ActiveModel {
            item_id: Set(completion.item_id),
            item_kind: Set(completion.item_kind.as_str().to_string()),
            final_status: Set(completion.final_status.as_str().to_string()),
            votes_for: Set(completion.tally.votes_for),
            votes_against: Set(completion.tally.votes_against),
            votes_abstain: Set(completion.tally.votes_abstain),
            total_votes: Set(completion.tally.total_votes),
            total_eligible_voters: Set(completion.total_eligible_voters),
            completed_at: Set(completion.completed_at),
            notified_at: Set(None),
        };

        let inserted = voting_completion::Entity::insert(model)
            .on_conflict(
                OnConflict::column(voting_completion::Column::ItemId)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.txn)
            .await?;
        Ok(inserted == 1)
    }

    async fn commit(self) -> Result<(), VotingError> {
        self.txn.commit().await?;
        Ok(())
    }
}

/// Ballot insert that falls back to updating the voter's existing row.
/// `cast_at` keeps the first cast time.
fn upsert_statement(
    item: &ItemRecord,
    ballot: &Ballot,
    now: DateTime<FixedOffset>,
) -> Insert<item_vote::ActiveModel> {
    let model = item_vote::ActiveModel {
        item_id: Set(item.id),
        voter_id: Set(ballot.voter_id.clone()),
        choice: Set(item.kind.choice_label(ballot.choice).to_string()),
        reason: Set(ballot.reason.clone()),
        cast_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };

    item_vote::Entity::insert(model).on_conflict(
        OnConflict::columns([item_vote::Column::ItemId, item_vote::Column::VoterId])
            .update_columns([
                item_vote::Column::Choice,
                item_vote::Column::Reason,
                item_vote::Column::UpdatedAt,
            ])
            .to_owned(),
    )
}

/// Writes the recount onto the item. `updated_at` strictly increases per
/// write, even when commands commit out of clock order, so it can version
/// cached views.
fn item_state_statement(
    item_id: i64,
    update: &ItemStateUpdate,
) -> Result<UpdateMany<votable_item::Entity>, VotingError> {
    ensure_projection(item_id, &update.tally)?;

    let mut statement = votable_item::Entity::update_many()
        .col_expr(
            votable_item::Column::VotesFor,
            Expr::value(update.tally.votes_for),
        )
        .col_expr(
            votable_item::Column::VotesAgainst,
            Expr::value(update.tally.votes_against),
        )
        .col_expr(
            votable_item::Column::VotesAbstain,
            Expr::value(update.tally.votes_abstain),
        )
        .col_expr(
            votable_item::Column::TotalVotes,
            Expr::value(update.tally.total_votes),
        )
        .col_expr(
            votable_item::Column::TotalEligibleVoters,
            Expr::value(update.total_eligible_voters),
        )
        .col_expr(
            votable_item::Column::UpdatedAt,
            Expr::cust_with_values(
                r#"GREATEST("updated_at" + INTERVAL '1 microsecond', $1)"#,
                [update.updated_at],
            ),
        );

    if let Some(status) = update.completed {
        if !status.is_terminal() {
            return Err(VotingError::CorruptItem {
                item_id,
                detail: format!("cannot complete into {}", status.as_str()),
            });
        }
        statement = statement
            .col_expr(votable_item::Column::Status, Expr::value(status.as_str()))
            .col_expr(
                votable_item::Column::CompletedAt,
                Expr::value(update.updated_at),
            )
            .filter(votable_item::Column::Status.eq(ItemStatus::Voting.as_str()));
    }

    Ok(statement.filter(votable_item::Column::Id.eq(item_id)))
}

/// Active profiles holding one of the voting roles.
fn electorate(roles: &[String]) -> Select<profile::Entity> {
    profile::Entity::find()
        .filter(profile::Column::IsActive.eq(true))
        .filter(profile::Column::Role.is_in(roles.iter().cloned()))
}

/// The `(item_id, voter_id)` index allows at most one row per voter.
fn ballot_removed(item_id: i64, rows_affected: u64) -> Result<bool, VotingError> {
    match rows_affected {
        0 => Ok(false),
        1 => Ok(true),
        rows => Err(VotingError::CorruptItem {
            item_id,
            detail: format!("withdrawal removed {rows} ballots for one voter"),
        }),
    }
}

/// Ballot counts per stored choice, restricted to one item.
fn tally_query(item_id: i64) -> Select<item_vote::Entity> {
    item_vote::Entity::find()
        .select_only()
        .column(item_vote::Column::Choice)
        .column_as(item_vote::Column::Id.count(), "votes")
        .filter(item_vote::Column::ItemId.eq(item_id))
        .group_by(item_vote::Column::Choice)
}

pub fn item_record(model: &votable_item::Model) -> Result<ItemRecord, VotingError> {
    let corrupt = |detail: String| VotingError::CorruptItem {
        item_id: model.id,
        detail,
    };

    let kind = ItemKind::parse(&model.kind)
        .ok_or_else(|| corrupt(format!("unknown kind {}", model.kind)))?;
    let status = ItemStatus::parse(&model.status)
        .ok_or_else(|| corrupt(format!("unknown status {}", model.status)))?;
    let thresholds = Thresholds::new(
        model.approval_threshold_percent,
        model.minimum_quorum_percent,
    )
    .ok_or_else(|| corrupt("threshold percentages out of range".to_string()))?;

    Ok(ItemRecord {
        id: model.id,
        kind,
        status,
        voting_deadline: model.voting_deadline,
        thresholds,
        tally: Tally {
            votes_for: model.votes_for,
            votes_against: model.votes_against,
            votes_abstain: model.votes_abstain,
            total_votes: model.total_votes,
        },
        total_eligible_voters: model.total_eligible_voters,
    })
}

fn completion_from_model(model: &voting_completion::Model) -> Result<VotingCompleted, VotingError> {
    let corrupt = |detail: String| VotingError::CorruptItem {
        item_id: model.item_id,
        detail,
    };
    let item_kind = ItemKind::parse(&model.item_kind)
        .ok_or_else(|| corrupt(format!("unknown kind {}", model.item_kind)))?;
    let final_status = ItemStatus::parse(&model.final_status)
        .filter(ItemStatus::is_terminal)
        .ok_or_else(|| corrupt(format!("non-terminal completion {}", model.final_status)))?;

    let tally = Tally {
        votes_for: model.votes_for,
        votes_against: model.votes_against,
        votes_abstain: model.votes_abstain,
        total_votes: model.total_votes,
    };
    ensure_projection(model.item_id, &tally)?;

    Ok(VotingCompleted::new(
        item_kind,
        model.item_id,
        final_status,
        tally,
        model.total_eligible_voters,
        model.completed_at,
    ))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use sea_orm::{DbBackend, QueryTrait};

    use super::*;

    fn now() -> DateTime<FixedOffset> {
        Utc.with_ymd_and_hms(2026, 2, 10, 18, 0, 0)
            .unwrap()
            .fixed_offset()
    }

    fn item(kind: ItemKind) -> ItemRecord {
        ItemRecord {
            id: 7,
            kind,
            status: ItemStatus::Voting,
            voting_deadline: None,
            thresholds: Thresholds::new(50, 50).unwrap(),
            tally: Tally::default(),
            total_eligible_voters: 0,
        }
    }

    fn model() -> votable_item::Model {
        votable_item::Model {
            id: 12,
            kind: "minutes".to_string(),
            title: "March board meeting minutes".to_string(),
            description: None,
            status: "voting".to_string(),
            voting_deadline: Some(now()),
            approval_threshold_percent: 60,
            minimum_quorum_percent: 50,
            total_eligible_voters: 5,
            votes_for: 2,
            votes_against: 1,
            votes_abstain: 0,
            total_votes: 3,
            completed_at: None,
            created_at: now(),
            updated_at: now(),
        }
    }

    #[test]
    fn ballot_upsert_conflicts_on_item_and_voter() {
        let ballot = Ballot {
            voter_id: "member-3".to_string(),
            choice: VoteChoice::Negative,
            reason: None,
        };
        let sql = upsert_statement(&item(ItemKind::Resolution), &ballot, now())
            .build(DbBackend::Postgres)
            .to_string();

        assert!(sql.contains(r#"ON CONFLICT ("item_id", "voter_id") DO UPDATE"#));
        assert!(sql.contains(r#""choice" = "excluded"."choice""#));
        assert!(!sql.contains(r#""cast_at" = "excluded"."cast_at""#));
        assert!(sql.contains("'against'"));
    }

    #[test]
    fn tally_query_is_scoped_to_one_item() {
        let sql = tally_query(7).build(DbBackend::Postgres).to_string();
        assert!(sql.contains(r#"WHERE "item_votes"."item_id" = 7"#));
        assert!(sql.contains(r#"GROUP BY "item_votes"."choice""#));
    }

    #[test]
    fn item_state_write_versions_and_guards_the_transition() {
        let update = ItemStateUpdate {
            tally: Tally::from_choice_counts([(VoteChoice::Affirmative, 3)]),
            total_eligible_voters: 5,
            completed: Some(ItemStatus::Passed),
            updated_at: now(),
        };
        let sql = item_state_statement(7, &update)
            .unwrap()
            .build(DbBackend::Postgres)
            .to_string();
        assert!(sql.contains(r#""updated_at" = GREATEST("updated_at" + INTERVAL '1 microsecond', "#));
        assert!(sql.contains(r#""status" = 'passed'"#));
        assert!(sql.contains(r#""votable_items"."status" = 'voting'"#));
        assert!(sql.contains(r#""votable_items"."id" = 7"#));

        let reopened = ItemStateUpdate {
            completed: Some(ItemStatus::Voting),
            ..update.clone()
        };
        assert!(matches!(
            item_state_statement(7, &reopened),
            Err(VotingError::CorruptItem { item_id: 7, .. })
        ));

        let hand_built = ItemStateUpdate {
            tally: Tally {
                total_votes: 9,
                ..update.tally
            },
            ..update
        };
        assert!(item_state_statement(7, &hand_built).is_err());
    }

    #[test]
    fn electorate_filters_active_profiles_by_role() {
        let roles = vec!["chair".to_string(), "board_member".to_string()];
        let sql = electorate(&roles)
            .filter(profile::Column::Id.eq("member-3"))
            .build(DbBackend::Postgres)
            .to_string();
        assert!(sql.contains(r#""profiles"."is_active" = TRUE"#));
        assert!(sql.contains(r#""profiles"."role" IN ('chair', 'board_member')"#));
        assert!(sql.contains(r#""profiles"."id" = 'member-3'"#));
    }

    #[test]
    fn duplicate_ballot_rows_are_reported_not_removed_silently() {
        assert!(!ballot_removed(7, 0).unwrap());
        assert!(ballot_removed(7, 1).unwrap());
        assert!(matches!(
            ballot_removed(7, 2),
            Err(VotingError::CorruptItem { item_id: 7, .. })
        ));
    }

    #[test]
    fn stored_item_converts_to_record() {
        let record = item_record(&model()).expect("valid item");
        assert_eq!(record.kind, ItemKind::Minutes);
        assert_eq!(record.status, ItemStatus::Voting);
        assert_eq!(record.thresholds.approval_threshold_percent, 60);
        assert_eq!(record.tally.total_votes, 3);
    }

    #[test]
    fn malformed_items_are_reported() {
        let mut unknown_status = model();
        unknown_status.status = "archived".to_string();
        assert!(matches!(
            item_record(&unknown_status),
            Err(VotingError::CorruptItem { item_id: 12, .. })
        ));

        let mut bad_threshold = model();
        bad_threshold.approval_threshold_percent = 140;
        assert!(item_record(&bad_threshold).is_err());
    }
}
