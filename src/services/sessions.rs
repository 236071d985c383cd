//! Server-held feed sessions
//!
//! A session pairs a `FeedPager` for one view with a `NavCounter` for the
//! session's user. Clients page through the feed with server-side prefetch
//! and read navigation counts that follow their status changes. Sessions
//! live in memory; once the registry is full the least recently used one is
//! closed to make room.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, watch, Mutex};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{FilterState, ShowStatus, SortBy, View},
    services::{
        images::ImagePreloader,
        nav_counts::{NavCounter, NavCounts},
        pager::{FeedPager, PagerSettings, PagerSnapshot},
        show_feed::ShowFeed,
    },
};

/// What a new session shows
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub view: View,
    pub user_id: Option<String>,
    pub sort: Option<SortBy>,
    pub filters: FilterState,
}

struct FeedSession {
    pager: FeedPager,
    counts: watch::Receiver<NavCounts>,
    refresh: mpsc::Sender<()>,
    /// Held so the counter keeps running; dropping it stops the task
    _identity: watch::Sender<Option<String>>,
    last_used: Instant,
}

#[derive(Clone)]
pub struct FeedSessions {
    feed: ShowFeed,
    settings: PagerSettings,
    max_sessions: usize,
    sessions: Arc<Mutex<HashMap<Uuid, FeedSession>>>,
}

impl FeedSessions {
    pub fn new(feed: ShowFeed, settings: PagerSettings, max_sessions: usize) -> Self {
        Self {
            feed,
            settings,
            max_sessions: max_sessions.max(1),
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Opens a session and loads its first page
    pub async fn open(
        &self,
        request: SessionRequest,
        images: Option<Arc<ImagePreloader>>,
    ) -> (Uuid, PagerSnapshot) {
        let user_id = request
            .user_id
            .filter(|u| !u.trim().is_empty());
        let pager = match images {
            Some(images) => FeedPager::with_images(
                self.feed.clone(),
                request.view,
                user_id.clone(),
                self.settings.clone(),
                images,
            ),
            None => FeedPager::new(self.feed.clone(), request.view, user_id.clone(), self.settings.clone()),
        };

        let (identity, identity_rx) = watch::channel(user_id.clone());
        let (refresh, refresh_rx) = mpsc::channel(1);
        let (counts, _counter) = NavCounter::spawn(self.feed.clone(), identity_rx, refresh_rx);

        let id = Uuid::new_v4();
        {
            let mut sessions = self.sessions.lock().await;
            if sessions.len() >= self.max_sessions {
                let oldest = sessions
                    .iter()
                    .min_by_key(|(_, s)| s.last_used)
                    .map(|(id, _)| *id);
                if let Some(oldest) = oldest {
                    if let Some(evicted) = sessions.remove(&oldest) {
                        tracing::info!(session_id = %oldest, "Session limit reached, closing least recently used");
                        evicted.pager.deactivate().await;
                    }
                }
            }
            sessions.insert(
                id,
                FeedSession {
                    pager: pager.clone(),
                    counts,
                    refresh,
                    _identity: identity,
                    last_used: Instant::now(),
                },
            );
        }

        tracing::info!(
            session_id = %id,
            view = ?request.view,
            user_id = user_id.as_deref().unwrap_or("anonymous"),
            "Feed session opened"
        );
        pager.update(request.sort, Some(request.filters)).await;
        (id, pager.snapshot().await)
    }

    /// Pager of a live session; the map lock is released before returning
    pub async fn pager(&self, id: Uuid) -> AppResult<FeedPager> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("feed session {}", id)))?;
        session.last_used = Instant::now();
        Ok(session.pager.clone())
    }

    /// Latest published counts for the session's user
    pub async fn counts(&self, id: Uuid) -> AppResult<NavCounts> {
        let sessions = self.sessions.lock().await;
        let session = sessions
            .get(&id)
            .ok_or_else(|| AppError::NotFound(format!("feed session {}", id)))?;
        let counts = *session.counts.borrow();
        Ok(counts)
    }

    /// Changes a show's status through the session's pager and refreshes
    /// the counts once the write landed
    pub async fn apply_status(
        &self,
        id: Uuid,
        show_id: &str,
        status: Option<ShowStatus>,
    ) -> AppResult<PagerSnapshot> {
        let pager = self.pager(id).await?;
        pager.apply_status(show_id, status).await?;
        self.request_refresh(id).await;
        Ok(pager.snapshot().await)
    }

    async fn request_refresh(&self, id: Uuid) {
        let sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(&id) {
            // A full channel already has a refresh queued
            let _ = session.refresh.try_send(());
        }
    }

    /// Closes a session; in-flight loads for it are dropped
    pub async fn close(&self, id: Uuid) -> AppResult<()> {
        let session = self
            .sessions
            .lock()
            .await
            .remove(&id)
            .ok_or_else(|| AppError::NotFound(format!("feed session {}", id)))?;
        session.pager.deactivate().await;
        tracing::info!(session_id = %id, "Feed session closed");
        Ok(())
    }
}
