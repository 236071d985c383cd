use serde::{Deserialize, Serialize};

/// Effective connection type as reported by the client
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EffectiveType {
    #[serde(rename = "slow-2g")]
    Slow2g,
    #[serde(rename = "2g")]
    TwoG,
    #[serde(rename = "3g")]
    ThreeG,
    #[serde(rename = "4g")]
    FourG,
}

impl EffectiveType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "slow-2g" => Some(EffectiveType::Slow2g),
            "2g" => Some(EffectiveType::TwoG),
            "3g" => Some(EffectiveType::ThreeG),
            "4g" => Some(EffectiveType::FourG),
            _ => None,
        }
    }
}

/// Coarse speed bucket derived from `NetworkHints`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionClass {
    Slowest,
    Slow,
    Normal,
    Fast,
}

/// Downlink at or above which a 4g connection counts as fast
const FAST_DOWNLINK_MBPS: f64 = 10.0;

/// Connection hints; all optional, missing hints read as a normal connection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct NetworkHints {
    pub effective_type: Option<EffectiveType>,
    pub downlink_mbps: Option<f64>,
    pub save_data: bool,
}

impl NetworkHints {
    /// Reads the `ECT`, `Downlink` and `Save-Data` client hint headers
    ///
    /// Unparsable values are ignored.
    pub fn from_client_hints(ect: Option<&str>, downlink: Option<&str>, save_data: Option<&str>) -> Self {
        Self {
            effective_type: ect.and_then(EffectiveType::parse),
            downlink_mbps: downlink
                .and_then(|d| d.trim().parse::<f64>().ok())
                .filter(|d| d.is_finite() && *d >= 0.0),
            save_data: save_data.map_or(false, |v| v.trim().eq_ignore_ascii_case("on")),
        }
    }

    pub fn class(&self) -> ConnectionClass {
        match self.effective_type {
            Some(EffectiveType::Slow2g) | Some(EffectiveType::TwoG) => ConnectionClass::Slowest,
            Some(EffectiveType::ThreeG) => ConnectionClass::Slow,
            Some(EffectiveType::FourG)
                if self.downlink_mbps.map_or(false, |d| d >= FAST_DOWNLINK_MBPS) =>
            {
                ConnectionClass::Fast
            }
            _ => ConnectionClass::Normal,
        }
    }

    /// Images loaded side by side within one batch
    pub fn batch_concurrency(&self) -> usize {
        match self.class() {
            ConnectionClass::Slowest => 4,
            ConnectionClass::Slow => 6,
            ConnectionClass::Normal => 8,
            ConnectionClass::Fast => 12,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Avif,
    Webp,
    Original,
}

impl ImageFormat {
    pub fn query_value(&self) -> Option<&'static str> {
        match self {
            ImageFormat::Avif => Some("avif"),
            ImageFormat::Webp => Some("webp"),
            ImageFormat::Original => None,
        }
    }
}

/// Image decoders the client can use
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FormatSupport {
    pub avif: bool,
    pub webp: bool,
}

impl FormatSupport {
    /// Reads support from an HTTP `Accept` header
    pub fn from_accept(accept: &str) -> Self {
        let mut support = Self::default();
        for media in accept.split(',') {
            let media = media.split(';').next().unwrap_or("").trim();
            match media {
                "image/avif" => support.avif = true,
                "image/webp" => support.webp = true,
                _ => {}
            }
        }
        support
    }

    /// Most compressed supported format, or the original on constrained links
    pub fn preferred(&self, hints: &NetworkHints) -> ImageFormat {
        if hints.save_data || hints.class() == ConnectionClass::Slowest {
            return ImageFormat::Original;
        }
        if self.avif {
            ImageFormat::Avif
        } else if self.webp {
            ImageFormat::Webp
        } else {
            ImageFormat::Original
        }
    }
}

/// Rewrites media CDN URLs to a smaller width and a preferred format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlRewriter {
    pub cdn_host: String,
    pub target_width: String,
}

impl Default for UrlRewriter {
    fn default() -> Self {
        Self {
            cdn_host: "image.tmdb.org".to_string(),
            target_width: "w342".to_string(),
        }
    }
}

impl UrlRewriter {
    /// Optimized form of `url`; unknown hosts and the original format pass
    /// through untouched
    pub fn optimize(&self, url: &str, format: ImageFormat) -> String {
        let Some(format_value) = format.query_value() else {
            return url.to_string();
        };
        let Ok(mut parsed) = reqwest::Url::parse(url) else {
            return url.to_string();
        };
        if parsed.host_str() != Some(self.cdn_host.as_str()) {
            return url.to_string();
        }

        // Expected shape: /t/p/<size>/<file>
        let segments: Vec<String> = match parsed.path_segments() {
            Some(segments) => segments.map(str::to_string).collect(),
            None => return url.to_string(),
        };
        if segments.len() < 4 || segments[0] != "t" || segments[1] != "p" {
            return url.to_string();
        }

        let mut rewritten = segments;
        rewritten[2] = self.target_width.clone();
        parsed.set_path(&format!("/{}", rewritten.join("/")));
        parsed
            .query_pairs_mut()
            .append_pair("format", format_value);
        parsed.to_string()
    }
}
