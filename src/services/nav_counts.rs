use std::future::Future;

use chrono::Utc;
use serde::Serialize;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

use crate::{
    db::UserShowQuery,
    error::AppResult,
    models::{ShowStatus, StatusFilter},
    services::show_feed::{new_season_window, ShowFeed},
};

/// Item totals behind each navigation entry
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NavCounts {
    pub discover: u64,
    pub watchlist: u64,
    pub rated: u64,
    pub new_seasons: u64,
}

/// Reads a count, logging a failure and treating it as zero
async fn count_or_zero(view: &'static str, count: impl Future<Output = AppResult<u64>>) -> u64 {
    match count.await {
        Ok(n) => n,
        Err(e) if e.is_remote_failure() => {
            tracing::warn!(view = view, error = %e, "Count failed, showing 0");
            0
        }
        Err(e) => {
            tracing::error!(view = view, error = %e, "Count could not be read, showing 0");
            0
        }
    }
}

/// Queries the four counts concurrently
///
/// Without a user only the Discover count is fetched.
pub async fn fetch_nav_counts(feed: &ShowFeed, user_id: Option<&str>) -> NavCounts {
    let backend = feed.backend();
    let discover = count_or_zero("discover", backend.count_shows(true));

    let Some(user_id) = user_id else {
        return NavCounts {
            discover: discover.await,
            ..Default::default()
        };
    };

    let watchlist_query = UserShowQuery::new(user_id, vec![ShowStatus::Watchlist]);
    let rated_query = UserShowQuery::new(user_id, StatusFilter::AllRated.statuses());
    let mut new_seasons_query = UserShowQuery::new(user_id, StatusFilter::NewSeasons.statuses());
    new_seasons_query.next_season_between = Some(new_season_window(Utc::now().date_naive()));

    let (discover, watchlist, rated, new_seasons) = tokio::join!(
        discover,
        count_or_zero("watchlist", backend.count_user_shows(&watchlist_query)),
        count_or_zero("rated", backend.count_user_shows(&rated_query)),
        count_or_zero("new_seasons", backend.count_user_shows(&new_seasons_query)),
    );

    NavCounts {
        discover,
        watchlist,
        rated,
        new_seasons,
    }
}

/// Background task keeping `NavCounts` current
pub struct NavCounter;

impl NavCounter {
    /// Recomputes counts whenever the signed-in user changes or a refresh
    /// is requested, and publishes them on the returned channel
    ///
    /// The task stops once both inputs are closed.
    pub fn spawn(
        feed: ShowFeed,
        mut identity: watch::Receiver<Option<String>>,
        mut refresh: mpsc::Receiver<()>,
    ) -> (watch::Receiver<NavCounts>, JoinHandle<()>) {
        let (tx, rx) = watch::channel(NavCounts::default());

        let handle = tokio::spawn(async move {
            let mut identity_open = true;
            let mut refresh_open = true;

            let user = identity.borrow_and_update().clone();
            tx.send_replace(fetch_nav_counts(&feed, user.as_deref()).await);

            while identity_open || refresh_open {
                tokio::select! {
                    changed = identity.changed(), if identity_open => {
                        if changed.is_err() {
                            identity_open = false;
                            continue;
                        }
                    }
                    signal = refresh.recv(), if refresh_open => {
                        if signal.is_none() {
                            refresh_open = false;
                            continue;
                        }
                    }
                }

                let user = identity.borrow_and_update().clone();
                let counts = fetch_nav_counts(&feed, user.as_deref()).await;
                tracing::debug!(
                    user_id = user.as_deref().unwrap_or("anonymous"),
                    discover = counts.discover,
                    watchlist = counts.watchlist,
                    rated = counts.rated,
                    new_seasons = counts.new_seasons,
                    "Navigation counts refreshed"
                );
                tx.send_replace(counts);
            }

            tracing::debug!("Navigation counter stopped");
        });

        (rx, handle)
    }
}
