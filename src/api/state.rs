use std::sync::Arc;

use crate::{
    config::Config,
    db::ShowBackend,
    services::{
        images::NetworkHints, FeedSessions, FeedSettings, HttpImageFetcher, ImagePreloader,
        PagerSettings, PreloaderConfig, ShowFeed,
    },
};

const DEFAULT_MAX_FEED_SESSIONS: usize = 1000;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub feed: ShowFeed,
    /// Page size used when a request does not name one
    pub page_size: usize,
    /// Process-wide image preloader; requests take a per-client view of it
    pub images: Arc<ImagePreloader>,
    pub sessions: FeedSessions,
}

impl AppState {
    pub fn new(backend: Arc<dyn ShowBackend>, settings: FeedSettings, page_size: usize) -> Self {
        let feed = ShowFeed::new(backend, settings);
        let pager_settings = PagerSettings {
            page_size,
            ..Default::default()
        };
        Self {
            sessions: FeedSessions::new(feed.clone(), pager_settings, DEFAULT_MAX_FEED_SESSIONS),
            images: Arc::new(ImagePreloader::new(
                Arc::new(HttpImageFetcher::new()),
                PreloaderConfig::default(),
            )),
            feed,
            page_size,
        }
    }

    /// Replaces the image preloader
    pub fn with_images(mut self, images: Arc<ImagePreloader>) -> Self {
        self.images = images;
        self
    }

    /// Replaces the session registry setup
    pub fn with_sessions(mut self, settings: PagerSettings, max_sessions: usize) -> Self {
        self.sessions = FeedSessions::new(self.feed.clone(), settings, max_sessions);
        self
    }

    /// Creates state from configuration over an already built backend
    pub fn from_config(config: &Config, backend: Arc<dyn ShowBackend>) -> Self {
        let images = ImagePreloader::new(
            Arc::new(HttpImageFetcher::new()),
            config.preloader_config(NetworkHints::default()),
        );
        Self::new(backend, config.feed_settings(), config.page_size)
            .with_images(Arc::new(images))
            .with_sessions(config.pager_settings(), config.max_feed_sessions)
    }
}
