//! Background image preloading
//!
//! An `ImagePreloader` owns its connection ceiling and URL cache, so separate
//! instances (one per app, one per test) never share state. Preloading is
//! best effort: every call resolves to a usable URL and failures are only
//! logged.
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use futures::{
    future::{BoxFuture, Shared},
    FutureExt, StreamExt,
};
use reqwest::Client as HttpClient;
use tokio::sync::Semaphore;

use crate::error::{AppError, AppResult};

pub mod network;

pub use network::{ConnectionClass, EffectiveType, FormatSupport, ImageFormat, NetworkHints, UrlRewriter};

/// Images in the first bucket, loaded at high priority straight away
const NEAR_BUCKET: usize = 6;
/// Images in the second bucket
const MEDIUM_BUCKET: usize = 12;
const MEDIUM_DELAY: Duration = Duration::from_millis(200);
const TAIL_DELAY: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    High,
    Low,
}

/// Transport used to pull an image
#[async_trait::async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> AppResult<()>;
}

/// Fetches images over HTTP and discards the body
#[derive(Clone, Default)]
pub struct HttpImageFetcher {
    http_client: HttpClient,
}

impl HttpImageFetcher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> AppResult<()> {
        let response = self.http_client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(AppError::Remote {
                status: response.status().as_u16(),
                body: format!("image {}", url),
            });
        }
        response.bytes().await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PreloaderConfig {
    /// Ceiling on concurrent image loads across all batches
    pub max_connections: usize,
    /// Upper bound on a single fetch attempt
    pub fetch_timeout: Duration,
    pub format_support: FormatSupport,
    pub hints: NetworkHints,
    pub rewriter: UrlRewriter,
}

impl Default for PreloaderConfig {
    fn default() -> Self {
        Self {
            max_connections: 12,
            fetch_timeout: Duration::from_secs(8),
            format_support: FormatSupport { avif: true, webp: true },
            hints: NetworkHints::default(),
            rewriter: UrlRewriter::default(),
        }
    }
}

type PreloadFuture = Shared<BoxFuture<'static, String>>;

/// (original URL, URL tried first)
type PreloadKey = (String, String);

pub struct ImagePreloader {
    fetcher: Arc<dyn ImageFetcher>,
    config: PreloaderConfig,
    /// FIFO connection slots
    slots: Arc<Semaphore>,
    /// In-flight or completed preloads. Entries are never evicted, so a URL
    /// whose load failed keeps resolving to the original without a refetch
    /// for the life of the preloader.
    inflight: Arc<Mutex<HashMap<PreloadKey, PreloadFuture>>>,
    loaded: Arc<RwLock<HashSet<String>>>,
}

impl ImagePreloader {
    pub fn new(fetcher: Arc<dyn ImageFetcher>, config: PreloaderConfig) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_connections.max(1)));
        Self {
            fetcher,
            config,
            slots,
            inflight: Arc::new(Mutex::new(HashMap::new())),
            loaded: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// View of this preloader for one client's decoders and connection
    ///
    /// The connection ceiling and the URL cache stay shared with `self`.
    pub fn for_client(&self, format_support: FormatSupport, hints: NetworkHints) -> Self {
        Self {
            fetcher: self.fetcher.clone(),
            config: PreloaderConfig {
                format_support,
                hints,
                ..self.config.clone()
            },
            slots: self.slots.clone(),
            inflight: self.inflight.clone(),
            loaded: self.loaded.clone(),
        }
    }

    /// URL this preloader will try first for `url`
    pub fn optimized_url(&self, url: &str) -> String {
        let format = self.config.format_support.preferred(&self.config.hints);
        self.config.rewriter.optimize(url, format)
    }

    /// True once `url` has been confirmed loaded
    pub fn is_ready(&self, url: &str) -> bool {
        self.loaded
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(url)
    }

    /// Preloads one image; never fails.
    ///
    /// Resolves to the optimized URL when it loaded, otherwise to the
    /// original. Repeated calls for the same URL share one load.
    pub async fn preload(&self, url: &str) -> String {
        let key = (url.to_string(), self.optimized_url(url));
        let load = {
            let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
            match inflight.get(&key) {
                Some(existing) => existing.clone(),
                None => {
                    let load = Self::load(
                        self.fetcher.clone(),
                        self.slots.clone(),
                        self.loaded.clone(),
                        key.0.clone(),
                        key.1.clone(),
                        self.config.fetch_timeout,
                    )
                    .boxed()
                    .shared();
                    inflight.insert(key, load.clone());
                    load
                }
            }
        };
        load.await
    }

    /// Preloads a batch in order with concurrency chosen from network hints
    pub async fn preload_batch(&self, urls: &[String], priority: Priority) -> Vec<String> {
        let concurrency = match priority {
            Priority::High => self.config.hints.batch_concurrency(),
            Priority::Low => (self.config.hints.batch_concurrency() / 2).max(2),
        };
        let loads: Vec<BoxFuture<'_, String>> =
            urls.iter().map(|url| self.preload(url).boxed()).collect();
        futures::stream::iter(loads)
            .buffered(concurrency)
            .collect()
            .await
    }

    /// Preloads a feed's images in three staggered buckets: the first few at
    /// high priority now, the next dozen shortly after, the rest last
    pub async fn preload_feed(&self, urls: Vec<String>) {
        let near_end = urls.len().min(NEAR_BUCKET);
        let medium_end = urls.len().min(NEAR_BUCKET + MEDIUM_BUCKET);

        self.preload_batch(&urls[..near_end], Priority::High).await;
        if medium_end > near_end {
            tokio::time::sleep(MEDIUM_DELAY).await;
            self.preload_batch(&urls[near_end..medium_end], Priority::Low)
                .await;
        }
        if urls.len() > medium_end {
            tokio::time::sleep(TAIL_DELAY).await;
            self.preload_batch(&urls[medium_end..], Priority::Low).await;
        }

        tracing::debug!(
            images = urls.len(),
            ready = urls.iter().filter(|u| self.is_ready(u)).count(),
            "Staged image preload finished"
        );
    }

    async fn attempt(fetcher: &dyn ImageFetcher, url: &str, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, fetcher.fetch(url)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::debug!(error = %e, url = %url, "Image preload attempt failed");
                false
            }
            Err(_) => {
                tracing::debug!(url = %url, timeout = ?timeout, "Image preload attempt timed out");
                false
            }
        }
    }

    async fn load(
        fetcher: Arc<dyn ImageFetcher>,
        slots: Arc<Semaphore>,
        loaded: Arc<RwLock<HashSet<String>>>,
        original: String,
        optimized: String,
        timeout: Duration,
    ) -> String {
        let Ok(_permit) = slots.acquire_owned().await else {
            return original;
        };

        let mark = |urls: &[&str]| {
            let mut loaded = loaded.write().unwrap_or_else(PoisonError::into_inner);
            for url in urls {
                loaded.insert(url.to_string());
            }
        };

        if Self::attempt(fetcher.as_ref(), &optimized, timeout).await {
            mark(&[&original, &optimized]);
            return optimized;
        }

        if optimized != original && Self::attempt(fetcher.as_ref(), &original, timeout).await {
            mark(&[&original]);
            return original;
        }

        tracing::warn!(url = %original, "Image preload failed, falling back to original URL");
        original
    }
}
