use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::ActiveValue::{NotSet, Set};
use sea_orm::prelude::*;
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect};
use tracing::{info, warn};

use crate::config::VotingConfig;
use crate::entities::{item_vote, votable_item};
use crate::models::voting::{
    ItemCreateRequest, ItemView, SettlementView, VoteCastRequest, VoteView,
};
use crate::state::AppState;
use crate::voting::threshold::{Thresholds, rate};
use crate::voting::{
    Ballot, CommandOutcome, ItemKind, ItemStatus, MAX_REASON_LEN, MAX_VOTER_ID_LEN, Settlement,
    VoteChoice, VotingError,
};

use super::HttpError;

const MAX_ITEM_VOTES: u64 = 1_000;
const MAX_TITLE_LEN: usize = 256;
const MAX_DESCRIPTION_LEN: usize = 10_000;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/items", post(create_item))
        .route("/items/{item_id}", get(get_item))
        .route("/items/{item_id}/open", post(open_item))
        .route("/items/{item_id}/evaluate", post(evaluate_item))
        .route(
            "/items/{item_id}/votes",
            get(get_item_votes).post(cast_vote),
        )
        .route("/items/{item_id}/votes/{voter_id}", delete(withdraw_vote))
}

async fn create_item(
    State(state): State<AppState>,
    Json(request): Json<ItemCreateRequest>,
) -> Result<(StatusCode, Json<ItemView>), HttpError> {
    let kind = ItemKind::parse(&request.kind).ok_or_else(|| {
        HttpError::bad_request(format!("Unsupported item kind {}", request.kind.trim()))
    })?;

    let title = request.title.trim();
    if title.is_empty() {
        return Err(HttpError::bad_request("title must not be empty"));
    }
    if title.len() > MAX_TITLE_LEN {
        return Err(HttpError::bad_request(format!(
            "title exceeds {MAX_TITLE_LEN} bytes"
        )));
    }

    let description = request
        .description
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty());
    if description.is_some_and(|text| text.len() > MAX_DESCRIPTION_LEN) {
        return Err(HttpError::bad_request(format!(
            "description exceeds {MAX_DESCRIPTION_LEN} bytes"
        )));
    }

    let thresholds = resolve_thresholds(&request, &state.voting)?;
    let voting_deadline = request.voting_deadline.map(parse_deadline).transpose()?;
    let status = if request.open {
        ItemStatus::Voting
    } else {
        ItemStatus::Draft
    };

    let now = Utc::now().fixed_offset();
    let model = votable_item::ActiveModel {
        id: NotSet,
        kind: Set(kind.as_str().to_string()),
        title: Set(title.to_string()),
        description: Set(description.map(str::to_string)),
        status: Set(status.as_str().to_string()),
        voting_deadline: Set(voting_deadline),
        approval_threshold_percent: Set(thresholds.approval_threshold_percent),
        minimum_quorum_percent: Set(thresholds.minimum_quorum_percent),
        total_eligible_voters: Set(0),
        votes_for: Set(0),
        votes_against: Set(0),
        votes_abstain: Set(0),
        total_votes: Set(0),
        completed_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&state.database)
    .await
    .map_err(internal_error)?;

    info!(
        item_id = model.id,
        kind = kind.as_str(),
        status = status.as_str(),
        "Votable item created"
    );

    if status == ItemStatus::Voting {
        // Take the eligible-voter snapshot right away.
        let outcome = state
            .votes
            .evaluate(model.id, now)
            .await
            .map_err(voting_error)?;
        settle(model.id, outcome)?;
        let refreshed = load_item(&state, model.id).await?;
        return Ok((StatusCode::CREATED, Json(item_view(&refreshed))));
    }

    Ok((StatusCode::CREATED, Json(item_view(&model))))
}

async fn get_item(
    Path(item_id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<ItemView>, HttpError> {
    if item_id <= 0 {
        return Err(item_not_found(item_id));
    }

    if let Some(cached) = state.cache.items.get(&item_id).await {
        return Ok(Json(cached.view.as_ref().clone()));
    }

    let model = load_item(&state, item_id).await?;
    let view = item_view(&model);
    state
        .cache
        .store_item(item_id, model.updated_at, view.clone())
        .await;
    Ok(Json(view))
}

async fn open_item(
    Path(item_id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<SettlementView>, HttpError> {
    let now = Utc::now().fixed_offset();
    let result = votable_item::Entity::update_many()
        .col_expr(
            votable_item::Column::Status,
            Expr::value(ItemStatus::Voting.as_str()),
        )
        .col_expr(votable_item::Column::UpdatedAt, Expr::value(now))
        .filter(votable_item::Column::Id.eq(item_id))
        .filter(votable_item::Column::Status.eq(ItemStatus::Draft.as_str()))
        .exec(&state.database)
        .await
        .map_err(internal_error)?;

    if result.rows_affected == 0 {
        let model = load_item(&state, item_id).await?;
        return Err(HttpError::conflict(format!(
            "Item {item_id} is {} and cannot be opened",
            model.status
        )));
    }

    info!(item_id, "Voting opened");

    let outcome = state
        .votes
        .evaluate(item_id, now)
        .await
        .map_err(voting_error)?;
    refresh_cached_item(&state, item_id).await;
    settle(item_id, outcome)
}

async fn evaluate_item(
    Path(item_id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<SettlementView>, HttpError> {
    let outcome = state
        .votes
        .evaluate(item_id, Utc::now().fixed_offset())
        .await
        .map_err(voting_error)?;
    refresh_cached_item(&state, item_id).await;
    settle(item_id, outcome)
}

async fn get_item_votes(
    Path(item_id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<Vec<VoteView>>, HttpError> {
    load_item(&state, item_id).await?;

    let votes = item_vote::Entity::find()
        .filter(item_vote::Column::ItemId.eq(item_id))
        .order_by_asc(item_vote::Column::CastAt)
        .limit(MAX_ITEM_VOTES)
        .all(&state.database)
        .await
        .map_err(internal_error)?;

    let views = votes
        .into_iter()
        .map(|vote| VoteView {
            item_id: vote.item_id,
            voter_id: vote.voter_id,
            choice: vote.choice,
            reason: vote.reason,
            cast_at: vote.cast_at.timestamp(),
            updated_at: vote.updated_at.timestamp(),
        })
        .collect::<Vec<_>>();

    assert!(
        views.len() <= MAX_ITEM_VOTES as usize,
        "Returned more votes than requested"
    );

    Ok(Json(views))
}

async fn cast_vote(
    Path(item_id): Path<i64>,
    State(state): State<AppState>,
    Json(request): Json<VoteCastRequest>,
) -> Result<Json<SettlementView>, HttpError> {
    let ballot = parse_ballot(&request)?;
    let outcome = state
        .votes
        .cast_vote(item_id, &ballot, Utc::now().fixed_offset())
        .await
        .map_err(voting_error)?;
    refresh_cached_item(&state, item_id).await;
    settle(item_id, outcome)
}

async fn withdraw_vote(
    Path((item_id, voter_id)): Path<(i64, String)>,
    State(state): State<AppState>,
) -> Result<Json<SettlementView>, HttpError> {
    let voter_id = parse_voter_id(&voter_id)?;
    let outcome = state
        .votes
        .withdraw_vote(item_id, &voter_id, Utc::now().fixed_offset())
        .await
        .map_err(voting_error)?;
    refresh_cached_item(&state, item_id).await;
    settle(item_id, outcome)
}

async fn load_item(state: &AppState, item_id: i64) -> Result<votable_item::Model, HttpError> {
    votable_item::Entity::find_by_id(item_id)
        .one(&state.database)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| item_not_found(item_id))
}

/// Replaces the cached view with the committed row after a command.
async fn refresh_cached_item(state: &AppState, item_id: i64) {
    let loaded = votable_item::Entity::find_by_id(item_id)
        .one(&state.database)
        .await;
    match loaded {
        Ok(Some(model)) => {
            state
                .cache
                .store_item(item_id, model.updated_at, item_view(&model))
                .await;
        }
        Ok(None) => state.cache.items.invalidate(&item_id).await,
        Err(err) => {
            warn!(item_id, "Dropping cached item after failed refresh: {err}");
            state.cache.items.invalidate(&item_id).await;
        }
    }
}

fn settle(item_id: i64, outcome: CommandOutcome) -> Result<Json<SettlementView>, HttpError> {
    match outcome {
        CommandOutcome::ItemMissing => Err(item_not_found(item_id)),
        CommandOutcome::NotOpen => Err(HttpError::conflict(format!(
            "Item {item_id} is not open for voting"
        ))),
        CommandOutcome::NotEligible => Err(HttpError::new(
            StatusCode::FORBIDDEN,
            "voter is not an active member with a voting role".to_string(),
        )),
        CommandOutcome::Applied(settlement) => Ok(Json(settlement_view(&settlement))),
    }
}

fn settlement_view(settlement: &Settlement) -> SettlementView {
    SettlementView {
        item_id: settlement.item_id,
        kind: settlement.kind.as_str().to_string(),
        status: settlement.status.as_str().to_string(),
        votes_for: settlement.tally.votes_for,
        votes_against: settlement.tally.votes_against,
        votes_abstain: settlement.tally.votes_abstain,
        total_votes: settlement.tally.total_votes,
        total_eligible_voters: settlement.total_eligible_voters,
        ledger_changed: settlement.ledger_changed,
        voting_closed: settlement.transitioned,
    }
}

fn item_view(model: &votable_item::Model) -> ItemView {
    ItemView {
        item_id: model.id,
        kind: model.kind.clone(),
        title: model.title.clone(),
        description: model.description.clone(),
        status: model.status.clone(),
        voting_deadline: model.voting_deadline.map(|dt| dt.timestamp()),
        approval_threshold_percent: model.approval_threshold_percent,
        minimum_quorum_percent: model.minimum_quorum_percent,
        total_eligible_voters: model.total_eligible_voters,
        votes_for: model.votes_for,
        votes_against: model.votes_against,
        votes_abstain: model.votes_abstain,
        total_votes: model.total_votes,
        approval_rate: rate(model.votes_for, model.total_votes),
        participation_rate: rate(model.total_votes, model.total_eligible_voters),
        completed_at: model.completed_at.map(|dt| dt.timestamp()),
        created_at: model.created_at.timestamp(),
        updated_at: model.updated_at.timestamp(),
    }
}

fn parse_ballot(request: &VoteCastRequest) -> Result<Ballot, HttpError> {
    let voter_id = parse_voter_id(&request.voter_id)?;

    let choice = VoteChoice::parse(&request.choice).ok_or_else(|| {
        HttpError::bad_request(format!(
            "Unsupported vote choice {}",
            request.choice.trim().to_ascii_lowercase()
        ))
    })?;

    let reason = request
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty());
    if reason.is_some_and(|text| text.chars().count() > MAX_REASON_LEN) {
        return Err(HttpError::bad_request(format!(
            "reason exceeds {MAX_REASON_LEN} characters"
        )));
    }

    Ok(Ballot {
        voter_id,
        choice,
        reason: reason.map(str::to_string),
    })
}

fn parse_voter_id(raw: &str) -> Result<String, HttpError> {
    let voter_id = raw.trim();
    if voter_id.is_empty() {
        return Err(HttpError::bad_request("voter_id must not be empty"));
    }
    if voter_id.len() > MAX_VOTER_ID_LEN {
        return Err(HttpError::bad_request(format!(
            "voter_id exceeds {MAX_VOTER_ID_LEN} bytes"
        )));
    }
    Ok(voter_id.to_string())
}

fn parse_deadline(seconds: i64) -> Result<DateTime<FixedOffset>, HttpError> {
    DateTime::from_timestamp(seconds, 0)
        .filter(|deadline| deadline.timestamp() >= 0)
        .map(|deadline| deadline.fixed_offset())
        .ok_or_else(|| {
            HttpError::bad_request(format!(
                "voting_deadline {seconds} is not a valid unix timestamp"
            ))
        })
}

fn resolve_thresholds(
    request: &ItemCreateRequest,
    config: &VotingConfig,
) -> Result<Thresholds, HttpError> {
    let defaults = config.default_thresholds();
    let approval = request
        .approval_threshold_percent
        .unwrap_or(defaults.approval_threshold_percent);
    let quorum = request
        .minimum_quorum_percent
        .unwrap_or(defaults.minimum_quorum_percent);
    Thresholds::new(approval, quorum).ok_or_else(|| {
        HttpError::bad_request("threshold percentages must be between 0 and 100")
    })
}

fn item_not_found(item_id: i64) -> HttpError {
    HttpError::new(StatusCode::NOT_FOUND, format!("Item {item_id} not found"))
}

fn internal_error(err: DbErr) -> HttpError {
    HttpError::internal(err)
}

fn voting_error(err: VotingError) -> HttpError {
    HttpError::internal(err)
}
