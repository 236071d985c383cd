//! Streaming provider name normalization
//!
//! Provider names arrive in many spellings from upstream metadata. Every name
//! is folded onto one canonical label before it is stored or matched, and
//! names outside the canonical allow-list are dropped.

/// Canonical provider labels, in display order
pub const CANONICAL_STREAMERS: &[&str] = &[
    "Netflix",
    "Amazon Prime",
    "Hulu",
    "Disney+",
    "Max",
    "Apple TV+",
    "Paramount+",
    "Peacock",
    "Starz",
    "Showtime",
    "AMC+",
    "Crunchyroll",
];

/// Lowercased spelling → canonical label
const SYNONYMS: &[(&str, &str)] = &[
    ("netflix", "Netflix"),
    ("netflix basic with ads", "Netflix"),
    ("netflix standard with ads", "Netflix"),
    ("amazon prime", "Amazon Prime"),
    ("amazon prime video", "Amazon Prime"),
    ("prime video", "Amazon Prime"),
    ("amazon video", "Amazon Prime"),
    ("hulu", "Hulu"),
    ("disney+", "Disney+"),
    ("disney plus", "Disney+"),
    ("max", "Max"),
    ("hbo max", "Max"),
    ("hbo", "Max"),
    ("max amazon channel", "Max"),
    ("apple tv+", "Apple TV+"),
    ("apple tv plus", "Apple TV+"),
    ("apple tv", "Apple TV+"),
    ("paramount+", "Paramount+"),
    ("paramount plus", "Paramount+"),
    ("paramount+ with showtime", "Paramount+"),
    ("peacock", "Peacock"),
    ("peacock premium", "Peacock"),
    ("peacock premium plus", "Peacock"),
    ("starz", "Starz"),
    ("showtime", "Showtime"),
    ("amc+", "AMC+"),
    ("amc plus", "AMC+"),
    ("crunchyroll", "Crunchyroll"),
];

/// Maps a provider name onto its canonical label
///
/// Canonical labels map to themselves, so applying this twice is the same as
/// applying it once. Returns `None` for providers outside the allow-list.
pub fn normalize_streamer(name: &str) -> Option<&'static str> {
    let folded = name.trim().to_lowercase();
    if folded.is_empty() {
        return None;
    }

    if let Some(canonical) = CANONICAL_STREAMERS
        .iter()
        .find(|c| c.to_lowercase() == folded)
    {
        return Some(canonical);
    }

    SYNONYMS
        .iter()
        .find(|(synonym, _)| *synonym == folded)
        .map(|(_, canonical)| *canonical)
}

/// Normalizes a list of provider names, dropping unknown ones and duplicates
pub fn normalize_streamers<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for name in names {
        match normalize_streamer(name.as_ref()) {
            Some(canonical) => {
                if !out.iter().any(|existing| existing == canonical) {
                    out.push(canonical.to_string());
                }
            }
            None => {
                tracing::trace!(streamer = %name.as_ref(), "Dropping unrecognized streamer");
            }
        }
    }
    out
}
