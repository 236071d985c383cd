//! In-process backend
//!
//! Mirrors the filtering, ordering and paging of the REST backend over data
//! held in memory. Used for local runs without a database and as the fake
//! remote in tests, where individual operations can be made to fail.
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;

use crate::{
    db::{ShowBackend, ShowQuery, UserShowQuery},
    error::{AppError, AppResult},
    models::{Genre, Show, ShowRow, UserProfile, UserShowRow, UserShowWrite},
};

/// Operations that can be told to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryOp {
    SelectShows,
    SelectUserShowIds,
    SelectUserShows,
    CountShows,
    CountUserShows,
    Upsert,
    Delete,
    Increment,
}

#[derive(Default)]
struct MemoryStore {
    shows: Vec<ShowRow>,
    genres: Vec<Genre>,
    profiles: Vec<UserProfile>,
    user_shows: Vec<UserShowRow>,
    interactions: HashMap<String, u64>,
    failing: HashSet<MemoryOp>,
    show_queries: Vec<ShowQuery>,
    latency: Option<Duration>,
}

#[derive(Default)]
pub struct MemoryBackend {
    store: RwLock<MemoryStore>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend preloaded with show rows, in insertion order
    pub fn with_shows(shows: Vec<ShowRow>) -> Self {
        Self {
            store: RwLock::new(MemoryStore {
                shows,
                ..Default::default()
            }),
        }
    }

    pub async fn insert_show(&self, row: ShowRow) {
        self.store.write().await.shows.push(row);
    }

    pub async fn insert_genre(&self, genre: Genre) {
        self.store.write().await.genres.push(genre);
    }

    pub async fn insert_profile(&self, profile: UserProfile) {
        self.store.write().await.profiles.push(profile);
    }

    /// Adds an association row; the embedded show is resolved on read
    pub async fn insert_user_show(&self, mut row: UserShowRow) {
        row.show = None;
        self.store.write().await.user_shows.push(row);
    }

    /// Makes every later call of `op` fail with a 503 until cleared
    pub async fn fail(&self, op: MemoryOp) {
        self.store.write().await.failing.insert(op);
    }

    pub async fn recover(&self, op: MemoryOp) {
        self.store.write().await.failing.remove(&op);
    }

    /// Delays every read by `latency`
    pub async fn set_latency(&self, latency: Option<Duration>) {
        self.store.write().await.latency = latency;
    }

    /// Every shows-table query received so far
    pub async fn show_queries(&self) -> Vec<ShowQuery> {
        self.store.read().await.show_queries.clone()
    }

    pub async fn user_show_rows(&self, user_id: &str) -> Vec<UserShowRow> {
        self.store
            .read()
            .await
            .user_shows
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect()
    }

    pub async fn interaction_count(&self, show_id: &str) -> u64 {
        self.store
            .read()
            .await
            .interactions
            .get(show_id)
            .copied()
            .unwrap_or(0)
    }

    /// Applies the configured latency, then any injected failure for `op`
    async fn gate(&self, op: MemoryOp) -> AppResult<()> {
        let latency = self.store.read().await.latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.store.read().await.failing.contains(&op) {
            return Err(AppError::Remote {
                status: 503,
                body: format!("{:?} unavailable", op),
            });
        }
        Ok(())
    }

    fn matching_user_rows(store: &MemoryStore, query: &UserShowQuery) -> Vec<UserShowRow> {
        let shows_by_id: HashMap<&str, &ShowRow> =
            store.shows.iter().map(|s| (s.id.as_str(), s)).collect();

        let mut rows: Vec<UserShowRow> = store
            .user_shows
            .iter()
            .filter(|r| r.user_id == query.user_id)
            .filter(|r| query.statuses.is_empty() || query.statuses.contains(&r.status))
            .filter(|r| match query.next_season_between {
                Some((from, to)) => r
                    .next_season_date()
                    .map_or(false, |d| d >= from && d <= to),
                None => true,
            })
            .map(|r| {
                let mut row = r.clone();
                row.show = shows_by_id.get(r.show_id.as_str()).map(|s| (*s).clone());
                row
            })
            .collect();

        if let Some(order) = query.order {
            rows.sort_by(|a, b| {
                let a = a.clone().into_show();
                let b = b.clone().into_show();
                match (a, b) {
                    (Some(a), Some(b)) => order.compare(&a, &b),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => std::cmp::Ordering::Equal,
                }
            });
        }
        rows
    }
}

#[async_trait::async_trait]
impl ShowBackend for MemoryBackend {
    async fn select_shows(&self, query: &ShowQuery) -> AppResult<Vec<ShowRow>> {
        self.store.write().await.show_queries.push(query.clone());
        self.gate(MemoryOp::SelectShows).await?;

        let store = self.store.read().await;
        let mut rows: Vec<(Show, &ShowRow)> = store
            .shows
            .iter()
            .filter(|row| !query.discoverable_only || row.is_discoverable.unwrap_or(true))
            .map(|row| (Show::from(row.clone()), row))
            .filter(|(show, _)| query.year_range.map_or(true, |r| r.contains(show.first_air_date)))
            .collect();
        rows.sort_by(|(a, _), (b, _)| query.sort.compare(a, b));

        Ok(rows
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .map(|(_, row)| row.clone())
            .collect())
    }

    async fn select_user_show_ids(&self, user_id: &str) -> AppResult<Vec<String>> {
        self.gate(MemoryOp::SelectUserShowIds).await?;
        Ok(self
            .store
            .read()
            .await
            .user_shows
            .iter()
            .filter(|r| r.user_id == user_id)
            .map(|r| r.show_id.clone())
            .collect())
    }

    async fn select_user_shows(&self, query: &UserShowQuery) -> AppResult<Vec<UserShowRow>> {
        self.gate(MemoryOp::SelectUserShows).await?;
        let store = self.store.read().await;
        let rows = Self::matching_user_rows(&store, query);
        Ok(match query.range {
            Some((limit, offset)) => rows.into_iter().skip(offset).take(limit).collect(),
            None => rows,
        })
    }

    async fn count_shows(&self, discoverable_only: bool) -> AppResult<u64> {
        self.gate(MemoryOp::CountShows).await?;
        let store = self.store.read().await;
        Ok(store
            .shows
            .iter()
            .filter(|row| !discoverable_only || row.is_discoverable.unwrap_or(true))
            .count() as u64)
    }

    async fn count_user_shows(&self, query: &UserShowQuery) -> AppResult<u64> {
        self.gate(MemoryOp::CountUserShows).await?;
        let store = self.store.read().await;
        Ok(Self::matching_user_rows(&store, query).len() as u64)
    }

    async fn select_genres(&self) -> AppResult<Vec<Genre>> {
        let mut genres = self.store.read().await.genres.clone();
        genres.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(genres)
    }

    async fn select_profile(&self, user_id: &str) -> AppResult<Option<UserProfile>> {
        Ok(self
            .store
            .read()
            .await
            .profiles
            .iter()
            .find(|p| p.id == user_id)
            .cloned())
    }

    async fn upsert_user_show(&self, record: &UserShowWrite) -> AppResult<()> {
        self.gate(MemoryOp::Upsert).await?;
        let now = Utc::now().to_rfc3339();
        let mut store = self.store.write().await;

        match store
            .user_shows
            .iter_mut()
            .find(|r| r.user_id == record.user_id && r.show_id == record.show_id)
        {
            Some(existing) => {
                existing.status = record.status;
                existing.updated_at = Some(now);
            }
            None => store.user_shows.push(UserShowRow {
                user_id: record.user_id.clone(),
                show_id: record.show_id.clone(),
                status: record.status,
                next_season_air_date: None,
                created_at: Some(now.clone()),
                updated_at: Some(now),
                show: None,
            }),
        }
        Ok(())
    }

    async fn delete_user_show(&self, user_id: &str, show_id: &str) -> AppResult<()> {
        self.gate(MemoryOp::Delete).await?;
        self.store
            .write()
            .await
            .user_shows
            .retain(|r| !(r.user_id == user_id && r.show_id == show_id));
        Ok(())
    }

    async fn increment_interactions(&self, show_id: &str) -> AppResult<()> {
        self.gate(MemoryOp::Increment).await?;
        *self
            .store
            .write()
            .await
            .interactions
            .entry(show_id.to_string())
            .or_insert(0) += 1;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
