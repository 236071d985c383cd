use std::time::Duration;

use serde::Deserialize;

use crate::services::{
    images::{NetworkHints, UrlRewriter},
    show_feed::MAX_PAGE_LIMIT,
    FeedSettings, PagerSettings, PreloaderConfig,
};

/// Which remote implementation backs the feeds
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Hosted Postgres reached over its REST interface
    Postgrest,
    /// In-process store, for local runs
    Memory,
}

/// Application configuration loaded from environment variables
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Base URL of the hosted Postgres REST service
    pub supabase_url: String,

    /// API key sent with every remote call
    pub supabase_anon_key: String,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_backend")]
    pub bingeboard_backend: BackendKind,

    /// Items per feed page
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Host whose image URLs get rewritten for size and format
    #[serde(default = "default_image_cdn_host")]
    pub image_cdn_host: String,

    /// Size segment substituted into CDN image paths
    #[serde(default = "default_image_target_width")]
    pub image_target_width: String,

    /// Ceiling on concurrent image preloads
    #[serde(default = "default_image_max_connections")]
    pub image_max_connections: usize,

    #[serde(default = "default_image_timeout_secs")]
    pub image_timeout_secs: u64,

    /// Feed sessions held in memory before the least recently used closes
    #[serde(default = "default_max_feed_sessions")]
    pub max_feed_sessions: usize,

    #[serde(default = "default_status_write_timeout_secs")]
    pub status_write_timeout_secs: u64,

    #[serde(default = "default_interaction_write_timeout_secs")]
    pub interaction_write_timeout_secs: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_backend() -> BackendKind {
    BackendKind::Postgrest
}

fn default_page_size() -> usize {
    20
}

fn default_image_cdn_host() -> String {
    "image.tmdb.org".to_string()
}

fn default_image_target_width() -> String {
    "w342".to_string()
}

fn default_image_max_connections() -> usize {
    12
}

fn default_image_timeout_secs() -> u64 {
    8
}

fn default_max_feed_sessions() -> usize {
    1000
}

fn default_status_write_timeout_secs() -> u64 {
    5
}

fn default_interaction_write_timeout_secs() -> u64 {
    10
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Missing or malformed credentials are fatal: the service cannot talk to
    /// the remote without them.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let config = envy::from_env::<Config>()
            .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.page_size == 0 || self.page_size > MAX_PAGE_LIMIT {
            anyhow::bail!("PAGE_SIZE must be between 1 and {}", MAX_PAGE_LIMIT);
        }
        if self.bingeboard_backend == BackendKind::Memory {
            return Ok(());
        }
        if self.supabase_anon_key.trim().is_empty() {
            anyhow::bail!("SUPABASE_ANON_KEY is empty");
        }
        let url = reqwest::Url::parse(&self.supabase_url)
            .map_err(|e| anyhow::anyhow!("SUPABASE_URL is not a valid URL: {}", e))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("SUPABASE_URL must be http or https, got {}", url.scheme());
        }
        Ok(())
    }

    pub fn status_write_timeout(&self) -> Duration {
        Duration::from_secs(self.status_write_timeout_secs)
    }

    pub fn interaction_write_timeout(&self) -> Duration {
        Duration::from_secs(self.interaction_write_timeout_secs)
    }

    pub fn image_timeout(&self) -> Duration {
        Duration::from_secs(self.image_timeout_secs)
    }

    pub fn feed_settings(&self) -> FeedSettings {
        FeedSettings {
            status_write_timeout: self.status_write_timeout(),
            interaction_write_timeout: self.interaction_write_timeout(),
        }
    }

    pub fn pager_settings(&self) -> PagerSettings {
        PagerSettings {
            page_size: self.page_size,
            ..Default::default()
        }
    }

    /// Preloader setup for a client on a connection described by `hints`
    pub fn preloader_config(&self, hints: NetworkHints) -> PreloaderConfig {
        PreloaderConfig {
            max_connections: self.image_max_connections,
            fetch_timeout: self.image_timeout(),
            hints,
            rewriter: UrlRewriter {
                cdn_host: self.image_cdn_host.clone(),
                target_width: self.image_target_width.clone(),
            },
            ..Default::default()
        }
    }
}
