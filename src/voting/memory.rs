//! In-memory repository used by the engine tests. `lock_item` takes a
//! per-item lock held until the transaction commits or drops, like a row
//! lock. Writes are staged on the transaction and applied on commit, so
//! dropping it behaves like a rollback.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use tokio::sync::OwnedMutexGuard;

use super::notify::{CompletionNotifier, VotingCompleted};
use super::store::{Ballot, ItemRecord, ItemStateUpdate, VotingRepository, VotingTransaction};
use super::threshold::Thresholds;
use super::{ItemKind, ItemStatus, Tally, VoteChoice, VotingError};

#[derive(Debug, Clone, PartialEq)]
pub struct StoredBallot {
    pub voter_id: String,
    pub choice: String,
    pub reason: Option<String>,
    pub cast_at: DateTime<FixedOffset>,
    pub updated_at: DateTime<FixedOffset>,
}

#[derive(Debug, Clone)]
struct Profile {
    id: String,
    role: String,
    is_active: bool,
}

impl Profile {
    fn votes_as(&self, roles: &[String]) -> bool {
        self.is_active && roles.contains(&self.role)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    next_item_id: i64,
    items: BTreeMap<i64, ItemRecord>,
    ballots: BTreeMap<(i64, String), StoredBallot>,
    profiles: Vec<Profile>,
    completions: BTreeMap<i64, (VotingCompleted, Option<DateTime<FixedOffset>>)>,
}

type ItemLocks = Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>;

#[derive(Clone, Default)]
pub struct MemoryRepository {
    locks: Arc<ItemLocks>,
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryRepository {
    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> T {
        let mut state = self.state.lock().expect("memory state poisoned");
        f(&mut state)
    }

    fn item_lock(&self, item_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("item locks poisoned");
        Arc::clone(locks.entry(item_id).or_default())
    }

    pub fn add_profile(&self, id: &str, role: &str, is_active: bool) {
        self.with_state(|state| {
            state.profiles.push(Profile {
                id: id.to_string(),
                role: role.to_string(),
                is_active,
            });
        });
    }

    pub fn add_item(
        &self,
        kind: ItemKind,
        status: ItemStatus,
        thresholds: Thresholds,
        voting_deadline: Option<DateTime<FixedOffset>>,
    ) -> i64 {
        self.with_state(|state| {
            state.next_item_id += 1;
            let id = state.next_item_id;
            state.items.insert(
                id,
                ItemRecord {
                    id,
                    kind,
                    status,
                    voting_deadline,
                    thresholds,
                    tally: Tally::default(),
                    total_eligible_voters: 0,
                },
            );
            id
        })
    }

    /// Writes a ballot straight into the ledger without recounting.
    pub fn seed_ballot(&self, item_id: i64, voter_id: &str, choice: VoteChoice) {
        self.with_state(|state| {
            let kind = state.items[&item_id].kind;
            let at = DateTime::<Utc>::UNIX_EPOCH.fixed_offset();
            state.ballots.insert(
                (item_id, voter_id.to_string()),
                StoredBallot {
                    voter_id: voter_id.to_string(),
                    choice: kind.choice_label(choice).to_string(),
                    reason: None,
                    cast_at: at,
                    updated_at: at,
                },
            );
        });
    }

    pub fn item(&self, item_id: i64) -> Option<ItemRecord> {
        self.with_state(|state| state.items.get(&item_id).cloned())
    }

    pub fn ballots(&self, item_id: i64) -> Vec<StoredBallot> {
        self.with_state(|state| {
            state
                .ballots
                .iter()
                .filter(|((id, _), _)| *id == item_id)
                .map(|(_, ballot)| ballot.clone())
                .collect()
        })
    }

    pub fn completion_notified(&self, item_id: i64) -> bool {
        self.with_state(|state| {
            state
                .completions
                .get(&item_id)
                .is_some_and(|(_, notified_at)| notified_at.is_some())
        })
    }
}

/// Writes of one transaction against the single item it locked.
struct LockedItem {
    _guard: OwnedMutexGuard<()>,
    item_id: i64,
    record: Option<ItemRecord>,
    ballots: BTreeMap<String, StoredBallot>,
    completion: Option<VotingCompleted>,
}

pub struct MemoryTransaction {
    repository: MemoryRepository,
    locked: Option<LockedItem>,
}

impl MemoryTransaction {
    fn locked(&mut self, item_id: i64) -> &mut LockedItem {
        let locked = self
            .locked
            .as_mut()
            .expect("lock_item must run before ledger access");
        assert_eq!(locked.item_id, item_id, "Transaction touched an unlocked item");
        locked
    }
}

#[async_trait]
impl VotingTransaction for MemoryTransaction {
    async fn lock_item(&mut self, item_id: i64) -> Result<Option<ItemRecord>, VotingError> {
        assert!(self.locked.is_none(), "One item per transaction");
        let guard = self.repository.item_lock(item_id).lock_owned().await;
        let (record, ballots) = self.repository.with_state(|state| {
            let ballots = state
                .ballots
                .iter()
                .filter(|((id, _), _)| *id == item_id)
                .map(|((_, voter), ballot)| (voter.clone(), ballot.clone()))
                .collect();
            (state.items.get(&item_id).cloned(), ballots)
        });
        self.locked = Some(LockedItem {
            _guard: guard,
            item_id,
            record: record.clone(),
            ballots,
            completion: None,
        });
        Ok(record)
    }

    async fn is_eligible_voter(
        &mut self,
        voter_id: &str,
        roles: &[String],
    ) -> Result<bool, VotingError> {
        Ok(self.repository.with_state(|state| {
            state
                .profiles
                .iter()
                .any(|profile| profile.id == voter_id && profile.votes_as(roles))
        }))
    }

    async fn upsert_vote(
        &mut self,
        item: &ItemRecord,
        ballot: &Ballot,
        now: DateTime<FixedOffset>,
    ) -> Result<(), VotingError> {
        let choice = item.kind.choice_label(ballot.choice).to_string();
        self.locked(item.id)
            .ballots
            .entry(ballot.voter_id.clone())
            .and_modify(|stored| {
                stored.choice = choice.clone();
                stored.reason = ballot.reason.clone();
                stored.updated_at = now;
            })
            .or_insert_with(|| StoredBallot {
                voter_id: ballot.voter_id.clone(),
                choice: choice.clone(),
                reason: ballot.reason.clone(),
                cast_at: now,
                updated_at: now,
            });
        Ok(())
    }

    async fn delete_vote(&mut self, item_id: i64, voter_id: &str) -> Result<bool, VotingError> {
        Ok(self.locked(item_id).ballots.remove(voter_id).is_some())
    }

    async fn count_votes(&mut self, item_id: i64) -> Result<Tally, VotingError> {
        let choices = self
            .locked(item_id)
            .ballots
            .values()
            .filter_map(|ballot| VoteChoice::parse(&ballot.choice))
            .collect::<Vec<_>>();
        Ok(Tally::from_choices(&choices))
    }

    async fn count_eligible_voters(&mut self, roles: &[String]) -> Result<i64, VotingError> {
        let count = self.repository.with_state(|state| {
            state
                .profiles
                .iter()
                .filter(|profile| profile.votes_as(roles))
                .count()
        });
        Ok(count as i64)
    }

    async fn write_item_state(
        &mut self,
        item_id: i64,
        update: &ItemStateUpdate,
    ) -> Result<(), VotingError> {
        if let Some(item) = self.locked(item_id).record.as_mut() {
            item.tally = update.tally;
            item.total_eligible_voters = update.total_eligible_voters;
            if let Some(status) = update.completed {
                item.status = status;
            }
        }
        Ok(())
    }

    async fn record_completion(
        &mut self,
        completion: &VotingCompleted,
    ) -> Result<bool, VotingError> {
        let already_recorded = self
            .repository
            .with_state(|state| state.completions.contains_key(&completion.item_id));
        let locked = self.locked(completion.item_id);
        if already_recorded || locked.completion.is_some() {
            return Ok(false);
        }
        locked.completion = Some(completion.clone());
        Ok(true)
    }

    async fn commit(self) -> Result<(), VotingError> {
        let Some(locked) = self.locked else {
            return Ok(());
        };
        self.repository.with_state(|state| {
            let item_id = locked.item_id;
            if let Some(record) = locked.record {
                state.items.insert(item_id, record);
            }
            state.ballots.retain(|(id, _), _| *id != item_id);
            for (voter, ballot) in locked.ballots {
                state.ballots.insert((item_id, voter), ballot);
            }
            if let Some(completion) = locked.completion {
                state.completions.insert(item_id, (completion, None));
            }
        });
        Ok(())
    }
}

#[async_trait]
impl VotingRepository for MemoryRepository {
    type Transaction = MemoryTransaction;

    async fn begin(&self) -> Result<Self::Transaction, VotingError> {
        Ok(MemoryTransaction {
            repository: self.clone(),
            locked: None,
        })
    }

    async fn pending_completions(&self) -> Result<Vec<VotingCompleted>, VotingError> {
        Ok(self.with_state(|state| {
            state
                .completions
                .values()
                .filter(|(_, notified_at)| notified_at.is_none())
                .map(|(completion, _)| completion.clone())
                .collect()
        }))
    }

    async fn mark_notified(
        &self,
        item_id: i64,
        at: DateTime<FixedOffset>,
    ) -> Result<(), VotingError> {
        self.with_state(|state| {
            if let Some((_, notified_at)) = state.completions.get_mut(&item_id) {
                notified_at.get_or_insert(at);
            }
        });
        Ok(())
    }
}

/// Notifier that keeps delivered events and can be told to fail once.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    events: Arc<Mutex<Vec<VotingCompleted>>>,
    fail_next: Arc<AtomicBool>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<VotingCompleted> {
        self.events.lock().expect("notifier poisoned").clone()
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl CompletionNotifier for RecordingNotifier {
    async fn voting_completed(&self, event: &VotingCompleted) -> Result<(), VotingError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(VotingError::Notification("mailer unavailable".to_string()));
        }
        self.events
            .lock()
            .expect("notifier poisoned")
            .push(event.clone());
        Ok(())
    }
}
