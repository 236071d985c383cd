//! Feed pagination with speculative prefetch
//!
//! A `FeedPager` owns the paging state of one view: the visible list, the
//! raw-row cursor, a preloaded next batch held aside, and the phase of the
//! current load. Every request carries the generation it was issued under;
//! a reset, sort change or deactivation bumps the generation so late
//! responses from the superseded state are dropped instead of merged.
//!
//! The state lock is never held across a remote call.
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{dedup_by_id, merge_unique, FilterState, Show, ShowPage, ShowStatus, SortBy, StatusFilter, View},
    services::{
        images::ImagePreloader,
        show_feed::{ShowFeed, ShowRequest, UserShowRequest},
    },
};

#[derive(Debug, Clone)]
pub struct PagerSettings {
    pub page_size: usize,
    /// Schedule background preloads after loads; off leaves `preload_next`
    /// to the caller
    pub auto_preload: bool,
    pub discover_preload_delay: Duration,
    pub preload_delay: Duration,
}

impl Default for PagerSettings {
    fn default() -> Self {
        Self {
            page_size: 20,
            auto_preload: true,
            discover_preload_delay: Duration::from_millis(400),
            preload_delay: Duration::from_millis(1200),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    LoadingInitial,
    Ready,
    LoadingMore,
}

/// Next batch fetched ahead of time; disjoint from the visible list
#[derive(Debug, Clone)]
struct PreloadedBatch {
    items: Vec<Show>,
    next_offset: usize,
    has_more: bool,
}

/// Item taken out of the visible list while its status write is in flight
#[derive(Debug, Clone)]
struct PendingRemoval {
    ticket: Uuid,
    generation: u64,
    index: usize,
    show: Show,
}

#[derive(Debug)]
struct PageState {
    generation: u64,
    phase: Phase,
    sort: SortBy,
    filters: FilterState,
    items: Vec<Show>,
    offset: usize,
    has_more: bool,
    preloaded: Option<PreloadedBatch>,
    preloading: bool,
    /// A scheduled preload has not fired yet
    preload_scheduled: bool,
    /// `fetch_more` arrived while a preload was in flight
    merge_when_ready: bool,
    error: Option<String>,
    removals: Vec<PendingRemoval>,
}

impl PageState {
    fn new() -> Self {
        Self {
            generation: 0,
            phase: Phase::Idle,
            sort: SortBy::default(),
            filters: FilterState::default(),
            items: Vec::new(),
            offset: 0,
            has_more: false,
            preloaded: None,
            preloading: false,
            preload_scheduled: false,
            merge_when_ready: false,
            error: None,
            removals: Vec::new(),
        }
    }

    /// Drops everything tied to the current generation and starts a new one
    fn restart(&mut self, phase: Phase) -> u64 {
        self.generation += 1;
        self.phase = phase;
        self.items.clear();
        self.offset = 0;
        self.has_more = false;
        self.preloaded = None;
        self.preloading = false;
        self.preload_scheduled = false;
        self.merge_when_ready = false;
        self.error = None;
        self.removals.clear();
        self.generation
    }

    fn take_batch(&mut self, batch: PreloadedBatch) -> Vec<Show> {
        let before = self.items.len();
        merge_unique(&mut self.items, batch.items);
        self.offset = batch.next_offset;
        self.has_more = batch.has_more;
        self.items[before..].to_vec()
    }
}

/// Observable pager state
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PagerSnapshot {
    pub view: View,
    pub phase: Phase,
    pub generation: u64,
    pub sort: SortBy,
    pub items: Vec<Show>,
    pub offset: usize,
    pub has_more: bool,
    /// Items waiting in the preloaded batch
    pub preloaded: usize,
    pub preloading: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Preload requested for `generation`, to run after `delay`
#[derive(Debug, Clone, Copy)]
struct ScheduledPreload {
    generation: u64,
    delay: Duration,
}

struct PagerInner {
    feed: ShowFeed,
    view: View,
    user_id: Option<String>,
    settings: PagerSettings,
    images: Option<Arc<ImagePreloader>>,
    /// Present when preloads are scheduled automatically
    preload_jobs: Option<mpsc::UnboundedSender<ScheduledPreload>>,
    state: Mutex<PageState>,
}

/// What `fetch_more` decided to do once it released the lock
enum MoreAction {
    Nothing,
    Consumed { generation: u64, added: Vec<Show> },
    Deferred,
    Direct { generation: u64, sort: SortBy, filters: FilterState, offset: usize },
}

#[derive(Clone)]
pub struct FeedPager {
    inner: Arc<PagerInner>,
}

impl std::fmt::Debug for FeedPager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedPager").finish_non_exhaustive()
    }
}

impl FeedPager {
    /// Creates a pager for `view`
    ///
    /// With `auto_preload` on this spawns the preload worker, so it must be
    /// called inside a tokio runtime.
    pub fn new(feed: ShowFeed, view: View, user_id: Option<String>, settings: PagerSettings) -> Self {
        Self::build(feed, view, user_id, settings, None)
    }

    /// Hands loaded posters to `images` for background preloading
    pub fn with_images(
        feed: ShowFeed,
        view: View,
        user_id: Option<String>,
        settings: PagerSettings,
        images: Arc<ImagePreloader>,
    ) -> Self {
        Self::build(feed, view, user_id, settings, Some(images))
    }

    fn build(
        feed: ShowFeed,
        view: View,
        user_id: Option<String>,
        settings: PagerSettings,
        images: Option<Arc<ImagePreloader>>,
    ) -> Self {
        let (preload_jobs, jobs) = if settings.auto_preload {
            let (tx, rx) = mpsc::unbounded_channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let inner = Arc::new(PagerInner {
            feed,
            view,
            user_id,
            settings,
            images,
            preload_jobs,
            state: Mutex::new(PageState::new()),
        });
        if let Some(jobs) = jobs {
            tokio::spawn(Self::preload_worker(Arc::downgrade(&inner), jobs));
        }
        Self { inner }
    }

    /// Runs scheduled preloads until the pager is dropped
    async fn preload_worker(inner: Weak<PagerInner>, mut jobs: mpsc::UnboundedReceiver<ScheduledPreload>) {
        while let Some(job) = jobs.recv().await {
            let inner = inner.clone();
            tokio::spawn(async move {
                tokio::time::sleep(job.delay).await;
                if let Some(inner) = inner.upgrade() {
                    FeedPager { inner }.run_preload(Some(job.generation)).await;
                }
            });
        }
    }

    pub fn view(&self) -> View {
        self.inner.view
    }

    pub async fn snapshot(&self) -> PagerSnapshot {
        let state = self.inner.state.lock().await;
        PagerSnapshot {
            view: self.inner.view,
            phase: state.phase,
            generation: state.generation,
            sort: state.sort,
            items: state.items.clone(),
            offset: state.offset,
            has_more: state.has_more,
            preloaded: state.preloaded.as_ref().map_or(0, |b| b.items.len()),
            preloading: state.preloading,
            error: state.error.clone(),
        }
    }

    fn preload_delay(&self) -> Duration {
        match self.inner.view {
            View::Discover => self.inner.settings.discover_preload_delay,
            _ => self.inner.settings.preload_delay,
        }
    }

    /// Fetches one page for this view at `offset`
    async fn fetch_page(&self, sort: SortBy, filters: FilterState, offset: usize) -> ShowPage {
        let limit = self.inner.settings.page_size;
        let status = match self.inner.view {
            View::Discover => {
                let request = ShowRequest {
                    limit,
                    offset,
                    sort,
                    filters,
                    discoverable_only: true,
                    exclude_user_id: self.inner.user_id.clone(),
                };
                return self.inner.feed.fetch_shows(&request).await;
            }
            View::Watchlist => StatusFilter::Watchlist,
            View::Rated => StatusFilter::AllRated,
            View::NewSeasons => StatusFilter::NewSeasons,
        };

        // User feeds are empty until someone signs in
        let Some(user_id) = self.inner.user_id.clone() else {
            return ShowPage::exhausted(offset);
        };
        let request = UserShowRequest {
            user_id,
            status,
            sort,
            filters,
            limit,
            offset,
        };
        self.inner.feed.fetch_user_shows(&request).await
    }

    /// Clears the view and loads the first page
    ///
    /// `Some(filters)` replaces the active filters; `None` keeps them.
    pub async fn reset(&self, filters: Option<FilterState>) {
        let (generation, sort, filters) = {
            let mut state = self.inner.state.lock().await;
            if let Some(filters) = filters {
                state.filters = filters;
            }
            let generation = state.restart(Phase::LoadingInitial);
            (generation, state.sort, state.filters.clone())
        };

        let page = self.fetch_page(sort, filters, 0).await;

        let loaded = {
            let mut state = self.inner.state.lock().await;
            if state.generation != generation {
                tracing::debug!(view = ?self.inner.view, generation, "Dropping stale first page");
                return;
            }
            state.phase = Phase::Ready;
            match page.error {
                Some(error) => {
                    tracing::warn!(view = ?self.inner.view, error = %error, "First page failed");
                    state.error = Some(error);
                    Vec::new()
                }
                None => {
                    state.items = dedup_by_id(page.items);
                    state.offset = page.next_offset;
                    state.has_more = page.has_more;
                    state.items.clone()
                }
            }
        };

        if !loaded.is_empty() {
            self.hand_off_images(&loaded);
            self.schedule_preload(generation, self.preload_delay()).await;
        }
    }

    /// Stores `sort` and reloads from the first page
    pub async fn set_sort(&self, sort: SortBy) {
        self.update(Some(sort), None).await;
    }

    /// Applies a new sort and/or filters with a single reload
    pub async fn update(&self, sort: Option<SortBy>, filters: Option<FilterState>) {
        if let Some(sort) = sort {
            self.inner.state.lock().await.sort = sort;
        }
        self.reset(filters).await;
    }

    /// Leaves the view; in-flight responses for it are dropped
    pub async fn deactivate(&self) {
        self.inner.state.lock().await.restart(Phase::Idle);
    }

    /// Appends the next batch to the visible list
    ///
    /// A held preloaded batch is consumed without a network call. When a
    /// preload is still in flight its result is merged on arrival.
    pub async fn fetch_more(&self) {
        let action = {
            let mut state = self.inner.state.lock().await;
            if state.phase != Phase::Ready {
                MoreAction::Nothing
            } else if let Some(batch) = state.preloaded.take() {
                let added = state.take_batch(batch);
                MoreAction::Consumed {
                    generation: state.generation,
                    added,
                }
            } else if !state.has_more {
                MoreAction::Nothing
            } else if state.preloading {
                state.merge_when_ready = true;
                state.phase = Phase::LoadingMore;
                MoreAction::Deferred
            } else {
                state.phase = Phase::LoadingMore;
                state.error = None;
                MoreAction::Direct {
                    generation: state.generation,
                    sort: state.sort,
                    filters: state.filters.clone(),
                    offset: state.offset,
                }
            }
        };

        match action {
            MoreAction::Nothing | MoreAction::Deferred => {}
            MoreAction::Consumed { generation, added } => {
                tracing::debug!(view = ?self.inner.view, added = added.len(), "Consumed preloaded batch");
                self.hand_off_images(&added);
                self.schedule_preload(generation, Duration::ZERO).await;
            }
            MoreAction::Direct {
                generation,
                sort,
                filters,
                offset,
            } => {
                let page = self.fetch_page(sort, filters, offset).await;
                let added = {
                    let mut state = self.inner.state.lock().await;
                    if state.generation != generation {
                        tracing::debug!(view = ?self.inner.view, generation, "Dropping stale page");
                        return;
                    }
                    state.phase = Phase::Ready;
                    if let Some(error) = page.error {
                        tracing::warn!(view = ?self.inner.view, offset, error = %error, "Next page failed");
                        state.error = Some(error);
                        return;
                    }
                    state.take_batch(PreloadedBatch {
                        items: page.items,
                        next_offset: page.next_offset,
                        has_more: page.has_more,
                    })
                };
                self.hand_off_images(&added);
                self.schedule_preload(generation, self.preload_delay()).await;
            }
        }
    }

    /// Fetches the next batch into the side buffer
    ///
    /// No-op while loading, while a preload runs or is scheduled, when a
    /// batch is already held, or when there is nothing more.
    pub async fn preload_next(&self) {
        self.run_preload(None).await;
    }

    async fn run_preload(&self, scheduled: Option<u64>) {
        let (generation, sort, filters, offset) = {
            let mut state = self.inner.state.lock().await;
            match scheduled {
                Some(generation) if generation != state.generation => return,
                Some(_) => state.preload_scheduled = false,
                None if state.preload_scheduled => return,
                None => {}
            }
            if state.phase != Phase::Ready
                || state.preloading
                || state.preloaded.is_some()
                || !state.has_more
                || state.error.is_some()
            {
                return;
            }
            state.preloading = true;
            (state.generation, state.sort, state.filters.clone(), state.offset)
        };

        let page = self.fetch_page(sort, filters, offset).await;

        let added = {
            let mut state = self.inner.state.lock().await;
            if state.generation != generation {
                tracing::debug!(view = ?self.inner.view, generation, "Dropping stale preload");
                return;
            }
            state.preloading = false;

            if let Some(error) = page.error {
                tracing::warn!(view = ?self.inner.view, offset, error = %error, "Preload failed");
                // Someone is waiting on this batch, so it needs a retry
                if state.merge_when_ready {
                    state.merge_when_ready = false;
                    state.phase = Phase::Ready;
                    state.error = Some(error);
                }
                return;
            }

            let visible: HashSet<&str> = state.items.iter().map(|s| s.id.as_str()).collect();
            let items: Vec<Show> = page
                .items
                .into_iter()
                .filter(|s| !visible.contains(s.id.as_str()))
                .collect();
            let batch = PreloadedBatch {
                items,
                next_offset: page.next_offset,
                has_more: page.has_more,
            };

            if !state.merge_when_ready {
                tracing::debug!(view = ?self.inner.view, held = batch.items.len(), "Preloaded next batch");
                state.preloaded = Some(batch);
                return;
            }
            state.merge_when_ready = false;
            state.phase = Phase::Ready;
            state.take_batch(batch)
        };

        self.hand_off_images(&added);
        self.schedule_preload(generation, Duration::ZERO).await;
    }

    async fn schedule_preload(&self, generation: u64, delay: Duration) {
        let Some(jobs) = &self.inner.preload_jobs else {
            return;
        };
        let mut state = self.inner.state.lock().await;
        if state.generation != generation || !state.has_more || state.preload_scheduled {
            return;
        }
        if jobs.send(ScheduledPreload { generation, delay }).is_ok() {
            state.preload_scheduled = true;
        }
    }

    fn hand_off_images(&self, shows: &[Show]) {
        let Some(images) = self.inner.images.clone() else {
            return;
        };
        let urls: Vec<String> = shows.iter().filter_map(|s| s.poster_url.clone()).collect();
        if urls.is_empty() {
            return;
        }
        tokio::spawn(async move {
            images.preload_feed(urls).await;
        });
    }

    // ========================================================================
    // Item actions
    // ========================================================================

    /// Takes a show out of the visible list ahead of a status write
    ///
    /// Returns the ticket to pass to `reconcile`, or `None` when the show
    /// is not visible.
    pub async fn begin_removal(&self, show_id: &str) -> Option<Uuid> {
        let mut state = self.inner.state.lock().await;
        let index = state.items.iter().position(|s| s.id == show_id)?;
        let show = state.items.remove(index);
        let ticket = Uuid::new_v4();
        let generation = state.generation;
        state.removals.push(PendingRemoval {
            ticket,
            generation,
            index,
            show,
        });
        Some(ticket)
    }

    /// Settles a removal once its write resolved
    ///
    /// A failed write puts the show back at its old position. Returns true
    /// when the show was reinserted.
    pub async fn reconcile(&self, ticket: Uuid, outcome: &AppResult<()>) -> bool {
        let mut state = self.inner.state.lock().await;
        let Some(pos) = state.removals.iter().position(|r| r.ticket == ticket) else {
            return false;
        };
        let removal = state.removals.remove(pos);

        let Err(e) = outcome else {
            return false;
        };
        if removal.generation != state.generation || state.items.iter().any(|s| s.id == removal.show.id) {
            return false;
        }

        tracing::warn!(
            view = ?self.inner.view,
            show_id = %removal.show.id,
            error = %e,
            "Status write failed, restoring show"
        );
        let index = removal.index.min(state.items.len());
        state.items.insert(index, removal.show);
        true
    }

    /// Changes the signed-in user's status for a show
    ///
    /// The show leaves the visible list right away when this view no longer
    /// keeps it, and comes back if the write fails. `None` clears the status.
    pub async fn apply_status(&self, show_id: &str, status: Option<ShowStatus>) -> AppResult<()> {
        let Some(user_id) = self.inner.user_id.clone() else {
            return Err(AppError::InvalidInput(
                "status changes need a signed-in user".to_string(),
            ));
        };

        let removes = match status {
            Some(status) => !self.inner.view.keeps(status),
            None => self.inner.view != View::Discover,
        };
        let ticket = if removes {
            self.begin_removal(show_id).await
        } else {
            None
        };

        let outcome = match status {
            Some(status) => self.inner.feed.set_show_status(&user_id, show_id, status).await,
            None => self.inner.feed.clear_show_status(&user_id, show_id).await,
        };

        if let Some(ticket) = ticket {
            self.reconcile(ticket, &outcome).await;
        } else if outcome.is_ok() {
            let mut state = self.inner.state.lock().await;
            if let Some(show) = state.items.iter_mut().find(|s| s.id == show_id) {
                show.user_status = status;
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{memory::MemoryOp, MemoryBackend};
    use crate::models::{ShowRow, UserShowRow};
    use crate::services::show_feed::FeedSettings;
    use tokio_test::{assert_err, assert_ok};

    fn row(i: usize) -> ShowRow {
        ShowRow {
            id: format!("s{}", i),
            title: Some(format!("Show {}", i)),
            first_air_date: Some(format!("{}-01-01", 2100 - i)),
            ..Default::default()
        }
    }

    fn settings(page_size: usize) -> PagerSettings {
        PagerSettings {
            page_size,
            auto_preload: false,
            ..Default::default()
        }
    }

    fn pager(backend: Arc<MemoryBackend>, view: View, user: Option<&str>, page_size: usize) -> FeedPager {
        let feed = ShowFeed::new(backend, FeedSettings::default());
        FeedPager::new(feed, view, user.map(str::to_string), settings(page_size))
    }

    fn ids(snapshot: &PagerSnapshot) -> Vec<String> {
        snapshot.items.iter().map(|s| s.id.clone()).collect()
    }

    fn catalogue(n: usize) -> Arc<MemoryBackend> {
        Arc::new(MemoryBackend::with_shows((0..n).map(row).collect()))
    }

    #[tokio::test]
    async fn test_reset_loads_first_page() {
        let pager = pager(catalogue(25), View::Discover, None, 10);
        assert_eq!(pager.snapshot().await.phase, Phase::Idle);

        pager.reset(None).await;

        let snap = pager.snapshot().await;
        assert_eq!(snap.phase, Phase::Ready);
        assert_eq!(snap.items.len(), 10);
        assert_eq!(snap.offset, 10);
        assert!(snap.has_more);
        assert_eq!(snap.items[0].id, "s0");
    }

    #[tokio::test]
    async fn test_fetch_more_dedups_shifted_rows() {
        let backend = catalogue(30);
        let pager = pager(backend.clone(), View::Discover, None, 10);
        pager.reset(None).await;

        // A newer show pushes everything down one row
        let mut newest = row(0);
        newest.id = "fresh".to_string();
        newest.first_air_date = Some("2200-01-01".to_string());
        backend.insert_show(newest).await;

        pager.fetch_more().await;

        let snap = pager.snapshot().await;
        let ids = ids(&snap);
        assert_eq!(ids.len(), 19);
        assert_eq!(ids.iter().filter(|id| *id == "s9").count(), 1);
        assert_eq!(ids.last().map(String::as_str), Some("s18"));
        assert_eq!(snap.offset, 20);
    }

    #[tokio::test]
    async fn test_preload_consumption_matches_direct_fetch() {
        let backend = catalogue(35);

        let preloading = pager(backend.clone(), View::Discover, None, 10);
        preloading.reset(None).await;
        preloading.preload_next().await;
        assert_eq!(preloading.snapshot().await.preloaded, 10);

        let queries_before = backend.show_queries().await.len();
        preloading.fetch_more().await;
        assert_eq!(backend.show_queries().await.len(), queries_before);

        let direct = pager(backend.clone(), View::Discover, None, 10);
        direct.reset(None).await;
        direct.fetch_more().await;

        let a = preloading.snapshot().await;
        let b = direct.snapshot().await;
        assert_eq!(ids(&a), ids(&b));
        assert_eq!(a.offset, b.offset);
        assert_eq!(a.has_more, b.has_more);
        assert_eq!(a.preloaded, 0);
    }

    #[tokio::test]
    async fn test_preload_is_noop_when_exhausted_or_held() {
        let backend = catalogue(15);
        let pager = pager(backend.clone(), View::Discover, None, 10);
        pager.reset(None).await;

        pager.preload_next().await;
        let queries = backend.show_queries().await.len();
        pager.preload_next().await;
        assert_eq!(backend.show_queries().await.len(), queries);

        pager.fetch_more().await;
        let snap = pager.snapshot().await;
        assert_eq!(snap.items.len(), 15);
        assert!(!snap.has_more);

        pager.preload_next().await;
        pager.fetch_more().await;
        assert_eq!(backend.show_queries().await.len(), queries);
    }

    #[tokio::test]
    async fn test_fetch_more_during_preload_merges_on_arrival() {
        let backend = catalogue(30);
        let pager = pager(backend.clone(), View::Discover, None, 10);
        pager.reset(None).await;
        backend.set_latency(Some(Duration::from_millis(50))).await;

        tokio::join!(pager.preload_next(), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            pager.fetch_more().await;
            assert_eq!(pager.snapshot().await.phase, Phase::LoadingMore);
        });

        let snap = pager.snapshot().await;
        assert_eq!(snap.phase, Phase::Ready);
        assert_eq!(snap.items.len(), 20);
        assert_eq!(snap.offset, 20);
        assert_eq!(snap.preloaded, 0);
    }

    #[tokio::test]
    async fn test_failed_preload_surfaces_to_waiting_fetch_more() {
        let backend = catalogue(30);
        let pager = pager(backend.clone(), View::Discover, None, 10);
        pager.reset(None).await;
        backend.set_latency(Some(Duration::from_millis(50))).await;
        backend.fail(MemoryOp::SelectShows).await;

        tokio::join!(pager.preload_next(), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            pager.fetch_more().await;
            assert_eq!(pager.snapshot().await.phase, Phase::LoadingMore);
        });

        let snap = pager.snapshot().await;
        assert_eq!(snap.phase, Phase::Ready);
        assert!(snap.error.as_deref().unwrap_or("").contains("503"));
        assert!(!snap.preloading);
        assert_eq!(snap.items.len(), 10);
        assert_eq!(snap.offset, 10);

        // The retry goes straight to the remote
        backend.recover(MemoryOp::SelectShows).await;
        pager.fetch_more().await;
        let snap = pager.snapshot().await;
        assert!(snap.error.is_none());
        assert_eq!(snap.items.len(), 20);
        assert_eq!(snap.offset, 20);
    }

    #[tokio::test]
    async fn test_new_filters_reload_from_first_page() {
        let rows: Vec<ShowRow> = (0..30)
            .map(|i| ShowRow {
                genres: Some(vec![crate::models::show::RawGenre::Id(if i % 3 == 0 { 35 } else { 18 })]),
                ..row(i)
            })
            .collect();
        let backend = Arc::new(MemoryBackend::with_shows(rows));
        let pager = pager(backend.clone(), View::Discover, None, 5);
        pager.reset(None).await;
        pager.fetch_more().await;
        assert_eq!(pager.snapshot().await.offset, 10);
        let generation = pager.snapshot().await.generation;

        let comedy = FilterState {
            genre_ids: [35].into_iter().collect(),
            ..Default::default()
        };
        pager.reset(Some(comedy.clone())).await;

        let snap = pager.snapshot().await;
        assert!(snap.generation > generation);
        assert_eq!(ids(&snap), vec!["s0", "s3", "s6", "s9", "s12"]);
        assert!(snap.items.iter().all(|s| s.genre_ids == vec![35]));
        // The genre filter over-fetches the whole catalogue from row 0
        let last = backend.show_queries().await.last().cloned().unwrap();
        assert_eq!(last.offset, 0);
        assert_eq!(last.limit, 100);
        assert_eq!(snap.offset, 30);
        assert!(!snap.has_more);

        // A plain reset keeps the active filters
        pager.reset(None).await;
        assert_eq!(ids(&pager.snapshot().await), vec!["s0", "s3", "s6", "s9", "s12"]);

        pager.update(Some(SortBy::Title), Some(FilterState::default())).await;
        let snap = pager.snapshot().await;
        assert_eq!(snap.sort, SortBy::Title);
        assert_eq!(snap.items.len(), 5);
        assert_eq!(backend.show_queries().await.last().unwrap().offset, 0);
    }

    #[tokio::test]
    async fn test_stale_page_dropped_after_sort_change() {
        let backend = catalogue(30);
        let pager = pager(backend.clone(), View::Discover, None, 10);
        pager.reset(None).await;
        backend.set_latency(Some(Duration::from_millis(50))).await;

        tokio::join!(pager.fetch_more(), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            pager.set_sort(SortBy::Title).await;
        });

        let snap = pager.snapshot().await;
        assert_eq!(snap.sort, SortBy::Title);
        assert_eq!(snap.phase, Phase::Ready);
        assert_eq!(snap.items.len(), 10);
        assert_eq!(snap.offset, 10);
        assert_eq!(snap.items[0].id, "s0");
        assert_eq!(snap.items[1].id, "s1");
        assert_eq!(snap.items[2].id, "s10");
    }

    #[tokio::test]
    async fn test_deactivate_drops_in_flight_page() {
        let backend = catalogue(30);
        let pager = pager(backend.clone(), View::Discover, None, 10);
        backend.set_latency(Some(Duration::from_millis(40))).await;

        tokio::join!(pager.reset(None), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            pager.deactivate().await;
        });

        let snap = pager.snapshot().await;
        assert_eq!(snap.phase, Phase::Idle);
        assert!(snap.items.is_empty());
    }

    #[tokio::test]
    async fn test_failed_load_keeps_error() {
        let backend = catalogue(30);
        backend.fail(MemoryOp::SelectShows).await;
        let pager = pager(backend.clone(), View::Discover, None, 10);

        pager.reset(None).await;

        let snap = pager.snapshot().await;
        assert_eq!(snap.phase, Phase::Ready);
        assert!(snap.items.is_empty());
        assert!(snap.error.as_deref().unwrap_or("").contains("503"));

        backend.recover(MemoryOp::SelectShows).await;
        pager.reset(None).await;
        let snap = pager.snapshot().await;
        assert!(snap.error.is_none());
        assert_eq!(snap.items.len(), 10);
    }

    #[tokio::test]
    async fn test_user_view_without_user_is_empty() {
        let pager = pager(catalogue(5), View::Watchlist, None, 10);
        pager.reset(None).await;

        let snap = pager.snapshot().await;
        assert!(snap.items.is_empty());
        assert!(!snap.has_more);
        assert!(snap.error.is_none());
    }

    async fn watchlist(backend: &MemoryBackend, user: &str, count: usize) {
        for i in 0..count {
            backend
                .insert_user_show(UserShowRow {
                    user_id: user.to_string(),
                    show_id: format!("s{}", i),
                    status: ShowStatus::Watchlist,
                    next_season_air_date: None,
                    created_at: Some(format!("2024-01-{:02}T00:00:00Z", 20 - i)),
                    updated_at: None,
                    show: None,
                })
                .await;
        }
    }

    #[tokio::test]
    async fn test_rating_removes_show_from_watchlist() {
        let backend = catalogue(5);
        watchlist(&backend, "u1", 3).await;
        let pager = pager(backend.clone(), View::Watchlist, Some("u1"), 10);
        pager.set_sort(SortBy::RecentlyAdded).await;
        assert_eq!(ids(&pager.snapshot().await), vec!["s0", "s1", "s2"]);

        assert_ok!(pager.apply_status("s1", Some(ShowStatus::LovedIt)).await);

        assert_eq!(ids(&pager.snapshot().await), vec!["s0", "s2"]);
        let rows = backend.user_show_rows("u1").await;
        assert!(rows.iter().any(|r| r.show_id == "s1" && r.status == ShowStatus::LovedIt));
    }

    #[tokio::test]
    async fn test_failed_write_restores_show_in_place() {
        let backend = catalogue(5);
        watchlist(&backend, "u1", 3).await;
        let pager = pager(backend.clone(), View::Watchlist, Some("u1"), 10);
        pager.set_sort(SortBy::RecentlyAdded).await;
        backend.fail(MemoryOp::Upsert).await;

        let result = pager.apply_status("s1", Some(ShowStatus::NotForMe)).await;

        assert_err!(result);
        assert_eq!(ids(&pager.snapshot().await), vec!["s0", "s1", "s2"]);
    }

    #[tokio::test]
    async fn test_kept_show_gets_new_status() {
        let backend = catalogue(5);
        watchlist(&backend, "u1", 2).await;
        let pager = pager(backend.clone(), View::Watchlist, Some("u1"), 10);
        pager.reset(None).await;

        assert_ok!(pager.apply_status("s0", Some(ShowStatus::Watchlist)).await);

        let snap = pager.snapshot().await;
        assert_eq!(snap.items.len(), 2);
        assert!(snap.items.iter().all(|s| s.user_status == Some(ShowStatus::Watchlist)));
    }

    #[tokio::test]
    async fn test_reconcile_unknown_ticket_is_ignored() {
        let pager = pager(catalogue(5), View::Discover, None, 10);
        pager.reset(None).await;

        let ticket = pager.begin_removal("s2").await.unwrap();
        assert!(pager.begin_removal("missing").await.is_none());
        assert!(!pager.reconcile(Uuid::new_v4(), &Err(AppError::Internal("x".into()))).await);
        assert!(!pager.reconcile(ticket, &Ok(())).await);

        assert_eq!(pager.snapshot().await.items.len(), 4);
    }

    #[tokio::test]
    async fn test_status_change_needs_user() {
        let pager = pager(catalogue(5), View::Discover, None, 10);
        let err = pager.apply_status("s0", Some(ShowStatus::Watchlist)).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    struct AlwaysLoads;

    #[async_trait::async_trait]
    impl crate::services::images::ImageFetcher for AlwaysLoads {
        async fn fetch(&self, _url: &str) -> AppResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_loaded_posters_are_preloaded() {
        let rows: Vec<ShowRow> = (0..3)
            .map(|i| ShowRow {
                poster_url: Some(format!("https://cdn.example.com/{}.jpg", i)),
                ..row(i)
            })
            .collect();
        let feed = ShowFeed::new(Arc::new(MemoryBackend::with_shows(rows)), FeedSettings::default());
        let images = Arc::new(ImagePreloader::new(Arc::new(AlwaysLoads), Default::default()));
        let pager = FeedPager::with_images(feed, View::Discover, None, settings(10), images.clone());

        pager.reset(None).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(images.is_ready("https://cdn.example.com/0.jpg"));
        assert!(images.is_ready("https://cdn.example.com/2.jpg"));
    }

    #[tokio::test]
    async fn test_auto_preload_after_reset() {
        let backend = catalogue(30);
        let feed = ShowFeed::new(backend.clone(), FeedSettings::default());
        let settings = PagerSettings {
            page_size: 10,
            auto_preload: true,
            discover_preload_delay: Duration::from_millis(5),
            preload_delay: Duration::from_millis(5),
        };
        let pager = FeedPager::new(feed, View::Discover, None, settings);

        pager.reset(None).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let snap = pager.snapshot().await;
        assert_eq!(snap.items.len(), 10);
        assert_eq!(snap.preloaded, 10);
    }
}
