//! Remote storage abstraction
//!
//! Every feed is read from four logical resources of the hosted Postgres
//! service: the shows table, the genre lookup table, the user/show
//! association table and the user profile table. `ShowBackend` is the seam
//! between the feed logic and the wire, so tests and local runs can swap in
//! the in-memory store.
use chrono::NaiveDate;

use crate::{
    error::AppResult,
    models::{Genre, ShowRow, ShowStatus, SortBy, UserProfile, UserShowRow, UserShowWrite, YearRange},
};

pub mod memory;
pub mod postgrest;
pub mod query;

pub use memory::MemoryBackend;
pub use postgrest::PostgrestBackend;

/// Selection over the shows table
#[derive(Debug, Clone, PartialEq)]
pub struct ShowQuery {
    pub discoverable_only: bool,
    pub year_range: Option<YearRange>,
    pub sort: SortBy,
    pub limit: usize,
    pub offset: usize,
}

/// Selection over a user's association rows
#[derive(Debug, Clone, PartialEq)]
pub struct UserShowQuery {
    pub user_id: String,
    pub statuses: Vec<ShowStatus>,
    /// Inclusive window on the next season air date
    pub next_season_between: Option<(NaiveDate, NaiveDate)>,
    /// Ordering pushed to the remote; `None` leaves rows unordered
    pub order: Option<SortBy>,
    /// `(limit, offset)` pushed to the remote; `None` returns every match
    pub range: Option<(usize, usize)>,
}

impl UserShowQuery {
    pub fn new(user_id: impl Into<String>, statuses: Vec<ShowStatus>) -> Self {
        Self {
            user_id: user_id.into(),
            statuses,
            next_season_between: None,
            order: None,
            range: None,
        }
    }
}

/// Remote resource access used by the feeds
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ShowBackend: Send + Sync {
    /// Raw rows of the shows table in remote order
    async fn select_shows(&self, query: &ShowQuery) -> AppResult<Vec<ShowRow>>;

    /// Ids of every show the user already has a status for
    async fn select_user_show_ids(&self, user_id: &str) -> AppResult<Vec<String>>;

    /// Association rows with their show embedded
    async fn select_user_shows(&self, query: &UserShowQuery) -> AppResult<Vec<UserShowRow>>;

    async fn count_shows(&self, discoverable_only: bool) -> AppResult<u64>;

    async fn count_user_shows(&self, query: &UserShowQuery) -> AppResult<u64>;

    async fn select_genres(&self) -> AppResult<Vec<Genre>>;

    async fn select_profile(&self, user_id: &str) -> AppResult<Option<UserProfile>>;

    /// Insert-or-update keyed by `(user_id, show_id)` in one call
    async fn upsert_user_show(&self, record: &UserShowWrite) -> AppResult<()>;

    async fn delete_user_show(&self, user_id: &str, show_id: &str) -> AppResult<()>;

    /// Server-side atomic increment of a show's interaction counter
    async fn increment_interactions(&self, show_id: &str) -> AppResult<()>;

    /// Backend name for logging
    fn name(&self) -> &'static str;
}
