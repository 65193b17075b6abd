use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, FixedOffset};
use moka::future::Cache;
use moka::ops::compute::Op;
use sea_orm::DatabaseConnection;

use crate::config::{CacheConfig, VotingConfig};
use crate::models::voting::ItemView;
use crate::voting::VoteService;
use crate::voting::notify::LogNotifier;
use crate::voting::postgres::PgVotingRepository;

pub type BoardVoteService = VoteService<PgVotingRepository, LogNotifier>;

#[derive(Clone)]
pub struct AppState {
    pub database: DatabaseConnection,
    pub cache: Arc<ApiCache>,
    pub votes: Arc<BoardVoteService>,
    pub voting: Arc<VotingConfig>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        database: DatabaseConnection,
        cache: Arc<ApiCache>,
        votes: Arc<BoardVoteService>,
        voting: VotingConfig,
    ) -> Self {
        assert!(
            cache.items_capacity >= 16,
            "Item cache capacity must be configured"
        );
        assert!(
            !voting.eligible_roles.is_empty(),
            "Eligible voter roles must be configured"
        );
        Self {
            database,
            cache,
            votes,
            voting: Arc::new(voting),
            start_time: Instant::now(),
        }
    }
}

/// Item view tagged with the row's `updated_at`, used to order writers.
#[derive(Clone)]
pub struct CachedItem {
    pub version: DateTime<FixedOffset>,
    pub view: Arc<ItemView>,
}

pub struct ApiCache {
    pub items: Cache<i64, CachedItem>,
    pub items_capacity: u64,
}

impl ApiCache {
    pub fn new(config: &CacheConfig) -> Self {
        assert!(
            config.items_max_capacity >= 16,
            "Item cache capacity threshold"
        );

        // Ledger commands refresh entries; the TTL only bounds staleness
        // for changes made by other instances.
        let items = Cache::builder()
            .max_capacity(config.items_max_capacity)
            .time_to_live(config.items_ttl())
            .time_to_idle(Duration::from_secs(config.items_ttl_seconds / 2 + 1))
            .build();

        Self {
            items,
            items_capacity: config.items_max_capacity,
        }
    }

    /// Stores `view` unless the cache already holds a newer version, so a
    /// read that raced a command cannot overwrite the command's refresh.
    pub async fn store_item(&self, item_id: i64, version: DateTime<FixedOffset>, view: ItemView) {
        let fresh = CachedItem {
            version,
            view: Arc::new(view),
        };
        self.items
            .entry(item_id)
            .and_compute_with(|current| async move {
                match current {
                    Some(entry) if entry.value().version > fresh.version => Op::Nop,
                    _ => Op::Put(fresh),
                }
            })
            .await;
    }
}
