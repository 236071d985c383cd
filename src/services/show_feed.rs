//! Feed data fetching
//!
//! Builds remote queries for the feeds and applies, in memory, the filters
//! the remote cannot express reliably: genre and streamer membership on the
//! array columns, and exclusion of shows the user already tracks. Those
//! filters run over an over-fetched raw batch so the final page is not
//! starved, and the cursor always advances by the raw row count.
//!
//! Read failures never escape this layer: they come back inside
//! `ShowPage::error`.
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};

use crate::{
    db::{ShowBackend, ShowQuery, UserShowQuery},
    error::{AppError, AppResult},
    models::{
        dedup_by_id, FilterState, Genre, Show, ShowPage, ShowStatus, SortBy, StatusFilter,
        UserProfile, UserShowWrite,
    },
};

/// Largest page a caller may ask for
pub const MAX_PAGE_LIMIT: usize = 100;

/// Days either side of today that count as a "new season"
pub const NEW_SEASON_WINDOW_DAYS: i64 = 182;

const STREAMER_OVERFETCH_FACTOR: usize = 10;
const STREAMER_OVERFETCH_MIN: usize = 200;
const GENRE_OVERFETCH_FACTOR: usize = 5;
const GENRE_OVERFETCH_MIN: usize = 100;

/// Request for a page of the shows table
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShowRequest {
    pub limit: usize,
    pub offset: usize,
    pub sort: SortBy,
    pub filters: FilterState,
    pub discoverable_only: bool,
    /// Drop shows this user already has a status for
    pub exclude_user_id: Option<String>,
}

/// Request for a page of one user's shows
#[derive(Debug, Clone, PartialEq)]
pub struct UserShowRequest {
    pub user_id: String,
    pub status: StatusFilter,
    pub sort: SortBy,
    pub filters: FilterState,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub status_write_timeout: Duration,
    pub interaction_write_timeout: Duration,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            status_write_timeout: Duration::from_secs(5),
            interaction_write_timeout: Duration::from_secs(10),
        }
    }
}

/// Raw rows to request so that in-memory filtering still fills `limit`
///
/// When several filters apply the largest batch wins.
pub fn overfetch_limit(limit: usize, filters: &FilterState, excluding: bool) -> usize {
    let mut fetch = limit;
    if filters.has_streamer_filter() {
        let streamer_fetch = limit.saturating_mul(STREAMER_OVERFETCH_FACTOR);
        fetch = fetch.max(streamer_fetch.max(STREAMER_OVERFETCH_MIN));
    }
    if filters.has_genre_filter() {
        let genre_fetch = limit.saturating_mul(GENRE_OVERFETCH_FACTOR);
        fetch = fetch.max(genre_fetch.max(GENRE_OVERFETCH_MIN));
    }
    if excluding {
        // 1.8x
        fetch = fetch.max(limit.saturating_mul(18).div_ceil(10));
    }
    fetch
}

/// Inclusive window of next-season dates shown in the New Seasons feed
pub fn new_season_window(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let span = chrono::Duration::days(NEW_SEASON_WINDOW_DAYS);
    (today - span, today + span)
}

async fn with_timeout<T>(limit: Duration, fut: impl Future<Output = AppResult<T>>) -> AppResult<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| AppError::Timeout(limit))?
}

fn require_id(kind: &str, value: &str) -> AppResult<()> {
    if value.trim().is_empty() {
        return Err(AppError::InvalidInput(format!("{} cannot be empty", kind)));
    }
    Ok(())
}

#[derive(Clone)]
pub struct ShowFeed {
    backend: Arc<dyn ShowBackend>,
    settings: FeedSettings,
}

impl ShowFeed {
    pub fn new(backend: Arc<dyn ShowBackend>, settings: FeedSettings) -> Self {
        Self { backend, settings }
    }

    pub fn backend(&self) -> &Arc<dyn ShowBackend> {
        &self.backend
    }

    /// Ids the user already tracks; `None` when there is nothing to exclude
    /// or the lookup failed
    async fn excluded_ids(&self, user_id: Option<&str>) -> Option<HashSet<String>> {
        let user_id = user_id?;
        match self.backend.select_user_show_ids(user_id).await {
            Ok(ids) => Some(ids.into_iter().collect()),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    user_id = %user_id,
                    "Could not load shows to exclude, continuing without exclusion"
                );
                None
            }
        }
    }

    /// Fetches one page of the shows table
    pub async fn fetch_shows(&self, request: &ShowRequest) -> ShowPage {
        if request.limit == 0 {
            return ShowPage::failed(
                request.offset,
                AppError::InvalidInput("limit must be positive".to_string()),
            );
        }

        let fetch_limit = overfetch_limit(
            request.limit,
            &request.filters,
            request.exclude_user_id.is_some(),
        );
        let query = ShowQuery {
            discoverable_only: request.discoverable_only,
            year_range: request.filters.year_range.filter(|r| !r.is_open()),
            sort: request.sort,
            limit: fetch_limit,
            offset: request.offset,
        };

        let (rows, excluded) = tokio::join!(
            self.backend.select_shows(&query),
            self.excluded_ids(request.exclude_user_id.as_deref())
        );

        let rows = match rows {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    offset = request.offset,
                    backend = self.backend.name(),
                    "Show fetch failed"
                );
                return ShowPage::failed(request.offset, e);
            }
        };

        let raw_count = rows.len();
        let canonical = request.filters.canonical_streamers();
        let filtered: Vec<Show> = rows
            .into_iter()
            .map(Show::from)
            .filter(|s| excluded.as_ref().map_or(true, |ex| !ex.contains(&s.id)))
            .filter(|s| request.filters.matches_genres(s))
            .filter(|s| request.filters.matches_streamers(s, &canonical))
            .collect();

        let mut items = dedup_by_id(filtered);
        let matched = items.len();
        items.truncate(request.limit);

        tracing::debug!(
            raw = raw_count,
            fetch_limit = fetch_limit,
            matched = matched,
            returned = items.len(),
            offset = request.offset,
            "Show page assembled"
        );

        ShowPage {
            items,
            has_more: raw_count == fetch_limit,
            next_offset: request.offset.saturating_add(raw_count),
            error: None,
        }
    }

    /// Fetches one page of a user's shows
    ///
    /// Recency sorts without filters are ordered and paged by the remote.
    /// Everything else depends on the joined show data, so the user's
    /// matching rows are loaded and sorted, filtered and paged in memory.
    pub async fn fetch_user_shows(&self, request: &UserShowRequest) -> ShowPage {
        if request.limit == 0 {
            return ShowPage::failed(
                request.offset,
                AppError::InvalidInput("limit must be positive".to_string()),
            );
        }

        let mut query = UserShowQuery::new(request.user_id.clone(), request.status.statuses());
        if request.status == StatusFilter::NewSeasons {
            query.next_season_between = Some(new_season_window(Utc::now().date_naive()));
        }

        let remote_paged = request.status != StatusFilter::NewSeasons
            && request.sort.is_association_order()
            && request.filters.is_empty();
        if remote_paged {
            query.order = Some(request.sort);
            query.range = Some((request.limit, request.offset));
        }

        let rows = match self.backend.select_user_shows(&query).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    user_id = %request.user_id,
                    status = ?request.status,
                    "User show fetch failed"
                );
                return ShowPage::failed(request.offset, e);
            }
        };

        if remote_paged {
            let raw_count = rows.len();
            let items = dedup_by_id(rows.into_iter().filter_map(|r| r.into_show()).collect());
            return ShowPage {
                items,
                has_more: raw_count == request.limit,
                next_offset: request.offset.saturating_add(raw_count),
                error: None,
            };
        }

        let mut shows = dedup_by_id(
            rows.into_iter()
                .filter_map(|r| r.into_show())
                .filter(|s| request.filters.matches(s))
                .collect(),
        );

        if request.status == StatusFilter::NewSeasons {
            shows.sort_by(|a, b| {
                a.next_season_air_date
                    .cmp(&b.next_season_air_date)
                    .then_with(|| a.id.cmp(&b.id))
            });
        } else {
            shows.sort_by(|a, b| request.sort.compare(a, b));
        }

        let total = shows.len();
        let items: Vec<Show> = shows
            .into_iter()
            .skip(request.offset)
            .take(request.limit)
            .collect();
        let next_offset = request.offset.saturating_add(items.len());

        ShowPage {
            items,
            has_more: next_offset < total,
            next_offset,
            error: None,
        }
    }

    pub async fn fetch_genres(&self) -> AppResult<Vec<Genre>> {
        self.backend.select_genres().await
    }

    pub async fn fetch_profile(&self, user_id: &str) -> AppResult<Option<UserProfile>> {
        require_id("user_id", user_id)?;
        self.backend.select_profile(user_id).await
    }

    /// Sets the user's status for a show with one atomic upsert
    pub async fn set_show_status(&self, user_id: &str, show_id: &str, status: ShowStatus) -> AppResult<()> {
        require_id("user_id", user_id)?;
        require_id("show_id", show_id)?;

        let record = UserShowWrite {
            user_id: user_id.to_string(),
            show_id: show_id.to_string(),
            status,
        };
        with_timeout(
            self.settings.status_write_timeout,
            self.backend.upsert_user_show(&record),
        )
        .await
        .map_err(|e| {
            tracing::error!(
                error = %e,
                user_id = %user_id,
                show_id = %show_id,
                status = %status,
                "Status update failed"
            );
            e
        })
    }

    pub async fn clear_show_status(&self, user_id: &str, show_id: &str) -> AppResult<()> {
        require_id("user_id", user_id)?;
        require_id("show_id", show_id)?;
        with_timeout(
            self.settings.status_write_timeout,
            self.backend.delete_user_show(user_id, show_id),
        )
        .await
    }

    /// Bumps the show's interaction counter
    pub async fn record_interaction(&self, show_id: &str) -> AppResult<()> {
        require_id("show_id", show_id)?;
        with_timeout(
            self.settings.interaction_write_timeout,
            self.backend.increment_interactions(show_id),
        )
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, show_id = %show_id, "Interaction count update failed");
            e
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryBackend, MockShowBackend};
    use crate::models::{ShowRow, UserShowRow, YearRange};

    fn row(id: usize) -> ShowRow {
        ShowRow {
            id: id.to_string(),
            title: Some(format!("Show {}", id)),
            ..Default::default()
        }
    }

    fn feed(backend: impl ShowBackend + 'static) -> ShowFeed {
        ShowFeed::new(Arc::new(backend), FeedSettings::default())
    }

    fn ids(page: &ShowPage) -> Vec<String> {
        page.items.iter().map(|s| s.id.clone()).collect()
    }

    #[test]
    fn test_overfetch_limits() {
        let none = FilterState::default();
        let genre = FilterState {
            genre_ids: [5].into_iter().collect(),
            ..Default::default()
        };
        let streamer = FilterState {
            streamers: ["Netflix".to_string()].into_iter().collect(),
            ..Default::default()
        };

        assert_eq!(overfetch_limit(20, &none, false), 20);
        assert_eq!(overfetch_limit(20, &genre, false), 100);
        assert_eq!(overfetch_limit(30, &genre, false), 150);
        assert_eq!(overfetch_limit(20, &streamer, false), 200);
        assert_eq!(overfetch_limit(25, &streamer, false), 250);
        assert_eq!(overfetch_limit(20, &none, true), 36);
        assert_eq!(overfetch_limit(21, &none, true), 38);
        assert_eq!(overfetch_limit(20, &genre, true), 100);
    }

    #[test]
    fn test_overfetch_saturates_for_huge_limits() {
        let streamer = FilterState {
            streamers: ["Netflix".to_string()].into_iter().collect(),
            ..Default::default()
        };

        assert_eq!(overfetch_limit(usize::MAX / 4, &streamer, false), usize::MAX);
        assert_eq!(
            overfetch_limit(usize::MAX / 10, &FilterState::default(), true),
            usize::MAX.div_ceil(10)
        );
        assert_eq!(overfetch_limit(usize::MAX, &FilterState::default(), true), usize::MAX);
    }

    #[tokio::test]
    async fn test_sparse_genre_match_returns_only_matches() {
        let rows: Vec<ShowRow> = (0..100)
            .map(|i| {
                let mut r = row(i);
                if [7, 42, 99].contains(&i) {
                    r.genres = Some(vec![crate::models::show::RawGenre::Id(5)]);
                } else {
                    r.genres = Some(vec![crate::models::show::RawGenre::Id(18)]);
                }
                r
            })
            .collect();

        let mut backend = MockShowBackend::new();
        backend
            .expect_select_shows()
            .withf(|q: &ShowQuery| q.limit == 100 && q.offset == 0 && q.sort == SortBy::Latest)
            .times(1)
            .returning(move |_| Ok(rows.clone()));
        backend.expect_name().return_const("mock");

        let request = ShowRequest {
            limit: 20,
            offset: 0,
            sort: SortBy::Latest,
            filters: FilterState {
                genre_ids: [5].into_iter().collect(),
                ..Default::default()
            },
            ..Default::default()
        };
        let page = feed(backend).fetch_shows(&request).await;

        assert!(page.error.is_none());
        assert_eq!(ids(&page), vec!["7", "42", "99"]);
        assert!(page.has_more);
        assert_eq!(page.next_offset, 100);
    }

    #[tokio::test]
    async fn test_short_raw_batch_reports_no_more() {
        let rows: Vec<ShowRow> = (0..60).map(row).collect();
        let mut backend = MockShowBackend::new();
        backend
            .expect_select_shows()
            .returning(move |_| Ok(rows.clone()));
        backend.expect_name().return_const("mock");

        let request = ShowRequest {
            limit: 20,
            filters: FilterState {
                genre_ids: [5].into_iter().collect(),
                ..Default::default()
            },
            ..Default::default()
        };
        let page = feed(backend).fetch_shows(&request).await;

        assert!(page.items.is_empty());
        assert!(!page.has_more);
        assert_eq!(page.next_offset, 60);
    }

    #[tokio::test]
    async fn test_exclusion_lookup_failure_fails_open() {
        let rows: Vec<ShowRow> = (0..36).map(row).collect();
        let mut backend = MockShowBackend::new();
        backend
            .expect_select_shows()
            .withf(|q: &ShowQuery| q.limit == 36)
            .returning(move |_| Ok(rows.clone()));
        backend.expect_select_user_show_ids().returning(|_| {
            Err(AppError::Remote {
                status: 500,
                body: "boom".to_string(),
            })
        });
        backend.expect_name().return_const("mock");

        let request = ShowRequest {
            limit: 20,
            exclude_user_id: Some("u1".to_string()),
            ..Default::default()
        };
        let page = feed(backend).fetch_shows(&request).await;

        assert!(page.error.is_none());
        assert_eq!(page.items.len(), 20);
        assert_eq!(page.items[0].id, "0");
        assert!(page.has_more);
    }

    #[tokio::test]
    async fn test_exclusion_removes_tracked_shows() {
        let rows: Vec<ShowRow> = (0..5).map(row).collect();
        let mut backend = MockShowBackend::new();
        backend
            .expect_select_shows()
            .returning(move |_| Ok(rows.clone()));
        backend
            .expect_select_user_show_ids()
            .returning(|_| Ok(vec!["1".to_string(), "3".to_string()]));
        backend.expect_name().return_const("mock");

        let request = ShowRequest {
            limit: 20,
            exclude_user_id: Some("u1".to_string()),
            ..Default::default()
        };
        let page = feed(backend).fetch_shows(&request).await;

        assert_eq!(ids(&page), vec!["0", "2", "4"]);
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn test_remote_error_returned_in_page() {
        let mut backend = MockShowBackend::new();
        backend.expect_select_shows().returning(|_| {
            Err(AppError::Remote {
                status: 502,
                body: "bad gateway".to_string(),
            })
        });
        backend.expect_name().return_const("mock");

        let request = ShowRequest {
            limit: 20,
            offset: 40,
            ..Default::default()
        };
        let page = feed(backend).fetch_shows(&request).await;

        assert!(page.items.is_empty());
        assert_eq!(page.next_offset, 40);
        assert!(page.error.unwrap().contains("502"));
    }

    #[tokio::test]
    async fn test_zero_limit_rejected() {
        let backend = MockShowBackend::new();
        let page = feed(backend).fetch_shows(&ShowRequest::default()).await;
        assert!(page.is_error());
    }

    #[tokio::test]
    async fn test_offset_advances_by_raw_rows() {
        // Every 10th show streams on Netflix
        let rows: Vec<ShowRow> = (0..500)
            .map(|i| {
                let mut r = row(i);
                r.first_air_date = Some(format!("{}-01-01", 2500 - i));
                let name = if i % 10 == 0 { "netflix" } else { "Hulu" };
                r.streamers = Some(crate::models::show::RawStreamers::List(vec![name.to_string()]));
                r
            })
            .collect();
        let show_feed = feed(MemoryBackend::with_shows(rows));

        let mut request = ShowRequest {
            limit: 20,
            filters: FilterState {
                streamers: ["Netflix".to_string()].into_iter().collect(),
                ..Default::default()
            },
            ..Default::default()
        };

        let mut raw_total = 0;
        let mut returned = 0;
        for expected_offset in [200, 400, 500] {
            let page = show_feed.fetch_shows(&request).await;
            raw_total += page.next_offset - request.offset;
            returned += page.items.len();
            assert_eq!(page.next_offset, expected_offset);
            assert!(page.items.iter().all(|s| s.streamers == vec!["Netflix"]));
            request.offset = page.next_offset;
        }

        assert_eq!(raw_total, 500);
        assert_eq!(returned, 50);
    }

    #[tokio::test]
    async fn test_year_range_pushed_down() {
        let mut backend = MockShowBackend::new();
        backend
            .expect_select_shows()
            .withf(|q: &ShowQuery| {
                q.discoverable_only
                    && q.year_range
                        == Some(YearRange {
                            from: Some(2000),
                            to: None,
                        })
            })
            .returning(|_| Ok(Vec::new()));
        backend.expect_name().return_const("mock");

        let request = ShowRequest {
            limit: 20,
            discoverable_only: true,
            filters: FilterState {
                year_range: Some(YearRange {
                    from: Some(2000),
                    to: None,
                }),
                ..Default::default()
            },
            ..Default::default()
        };
        let page = feed(backend).fetch_shows(&request).await;
        assert!(page.items.is_empty());
    }

    async fn library() -> MemoryBackend {
        let mut shows = Vec::new();
        for (id, score, date) in [("a", 70.0, "2010-01-01"), ("b", 90.0, "2015-01-01"), ("c", 80.0, "2020-01-01")] {
            let mut r = row(0);
            r.id = id.to_string();
            r.our_score = Some(crate::models::show::RawNumber::Number(score));
            r.first_air_date = Some(date.to_string());
            shows.push(r);
        }
        let backend = MemoryBackend::with_shows(shows);

        let today = Utc::now().date_naive();
        let entries = [
            ("a", ShowStatus::LovedIt, Some(today + chrono::Duration::days(30)), "2024-01-03T00:00:00Z"),
            ("b", ShowStatus::NotForMe, None, "2024-01-02T00:00:00Z"),
            ("c", ShowStatus::LikedIt, Some(today - chrono::Duration::days(400)), "2024-01-01T00:00:00Z"),
        ];
        for (show_id, status, next, created) in entries {
            backend
                .insert_user_show(UserShowRow {
                    user_id: "u1".to_string(),
                    show_id: show_id.to_string(),
                    status,
                    next_season_air_date: next.map(|d| d.to_string()),
                    created_at: Some(created.to_string()),
                    updated_at: None,
                    show: None,
                })
                .await;
        }
        backend
    }

    fn user_request(status: StatusFilter, sort: SortBy) -> UserShowRequest {
        UserShowRequest {
            user_id: "u1".to_string(),
            status,
            sort,
            filters: FilterState::default(),
            limit: 2,
            offset: 0,
        }
    }

    #[tokio::test]
    async fn test_user_shows_rating_sort_in_memory() {
        let show_feed = feed(library().await);
        let page = show_feed
            .fetch_user_shows(&user_request(StatusFilter::AllRated, SortBy::Rating))
            .await;

        assert_eq!(ids(&page), vec!["b", "c"]);
        assert!(page.has_more);
        assert_eq!(page.next_offset, 2);
        assert_eq!(page.items[0].user_status, Some(ShowStatus::NotForMe));
    }

    #[tokio::test]
    async fn test_user_shows_recency_paged_remotely() {
        let show_feed = feed(library().await);
        let mut request = user_request(StatusFilter::AllRated, SortBy::RecentlyAdded);

        let first = show_feed.fetch_user_shows(&request).await;
        assert_eq!(ids(&first), vec!["a", "b"]);
        assert!(first.has_more);

        request.offset = first.next_offset;
        let second = show_feed.fetch_user_shows(&request).await;
        assert_eq!(ids(&second), vec!["c"]);
        assert!(!second.has_more);
    }

    #[tokio::test]
    async fn test_new_seasons_only_positive_within_window() {
        let show_feed = feed(library().await);
        let page = show_feed
            .fetch_user_shows(&user_request(StatusFilter::NewSeasons, SortBy::Latest))
            .await;

        assert_eq!(ids(&page), vec!["a"]);
        assert!(page.items[0].next_season_air_date.is_some());
    }

    #[tokio::test]
    async fn test_status_write_times_out() {
        let backend = MemoryBackend::new();
        backend.set_latency(Some(Duration::from_millis(200))).await;
        let show_feed = ShowFeed::new(
            Arc::new(backend),
            FeedSettings {
                status_write_timeout: Duration::from_millis(20),
                interaction_write_timeout: Duration::from_millis(20),
            },
        );

        let result = show_feed.set_show_status("u1", "s1", ShowStatus::LovedIt).await;
        assert!(matches!(result, Err(AppError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_set_status_twice_updates_single_row() {
        let backend = Arc::new(MemoryBackend::new());
        let show_feed = ShowFeed::new(backend.clone(), FeedSettings::default());

        let (first, second) = tokio::join!(
            show_feed.set_show_status("u1", "s1", ShowStatus::Watchlist),
            show_feed.set_show_status("u1", "s1", ShowStatus::LovedIt)
        );
        first.unwrap();
        second.unwrap();

        assert_eq!(backend.user_show_rows("u1").await.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_ids_rejected() {
        let show_feed = feed(MemoryBackend::new());
        let result = show_feed.set_show_status("", "s1", ShowStatus::LovedIt).await;
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_record_interaction_increments() {
        let backend = Arc::new(MemoryBackend::new());
        let show_feed = ShowFeed::new(backend.clone(), FeedSettings::default());
        show_feed.record_interaction("s1").await.unwrap();
        show_feed.record_interaction("s1").await.unwrap();
        assert_eq!(backend.interaction_count("s1").await, 2);
    }
}
