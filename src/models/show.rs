use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::streamer::normalize_streamers;
use super::ShowStatus;

/// A trackable TV series as returned to clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Show {
    pub id: String,
    pub title: String,
    pub first_air_date: Option<NaiveDate>,
    pub imdb_rating: Option<f64>,
    pub tmdb_rating: Option<f64>,
    pub our_score: Option<f64>,
    pub genre_ids: Vec<i32>,
    /// Canonical provider labels only
    pub streamers: Vec<String>,
    pub number_of_seasons: Option<u32>,
    pub number_of_episodes: Option<u32>,
    pub overview: Option<String>,
    pub tagline: Option<String>,
    pub poster_url: Option<String>,
    pub added_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Status the current user gave this show, when loaded through a user feed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_status: Option<ShowStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_season_air_date: Option<NaiveDate>,
}

impl Show {
    pub fn first_air_year(&self) -> Option<i32> {
        use chrono::Datelike;
        self.first_air_date.map(|d| d.year())
    }
}

/// Entry from the genre lookup table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Genre {
    pub id: i32,
    pub name: String,
}

/// Row of the user profile table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

// ============================================================================
// Remote row shapes
// ============================================================================

/// Genre column as it appears across table versions and embedded selects
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum RawGenre {
    Id(i64),
    Float(f64),
    Text(String),
    Embedded { genre_id: i64 },
    /// Anything else; ignored rather than failing the row
    Other(serde_json::Value),
}

impl RawGenre {
    fn id(&self) -> Option<i32> {
        match self {
            RawGenre::Id(id) => i32::try_from(*id).ok(),
            RawGenre::Float(n) => whole_number(*n).and_then(|n| i32::try_from(n).ok()),
            RawGenre::Text(text) => text.trim().parse().ok(),
            RawGenre::Embedded { genre_id } => i32::try_from(*genre_id).ok(),
            RawGenre::Other(value) => {
                tracing::trace!(genre = %value, "Ignoring unrecognized genre value");
                None
            }
        }
    }
}

fn whole_number(n: f64) -> Option<i64> {
    (n.is_finite() && n.fract() == 0.0 && n.abs() < i64::MAX as f64).then_some(n as i64)
}

/// Streamer column: either a proper array or a comma-joined string
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum RawStreamers {
    List(Vec<String>),
    Joined(String),
}

impl RawStreamers {
    fn names(&self) -> Vec<&str> {
        match self {
            RawStreamers::List(names) => names.iter().map(String::as_str).collect(),
            RawStreamers::Joined(joined) => joined.split(',').collect(),
        }
    }
}

/// Numeric column that some imports stored as text
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum RawNumber {
    Number(f64),
    Text(String),
}

impl RawNumber {
    fn value(&self) -> Option<f64> {
        match self {
            RawNumber::Number(n) => Some(*n).filter(|n| n.is_finite()),
            RawNumber::Text(text) => text.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        }
    }

    /// Non-negative whole value, for count columns
    fn count(&self) -> Option<u32> {
        self.value()
            .and_then(whole_number)
            .and_then(|n| u32::try_from(n).ok())
    }
}

/// Raw row of the `shows` table
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct ShowRow {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub first_air_date: Option<String>,
    #[serde(default)]
    pub imdb_rating: Option<RawNumber>,
    #[serde(default)]
    pub tmdb_rating: Option<RawNumber>,
    #[serde(default)]
    pub our_score: Option<RawNumber>,
    #[serde(default)]
    pub genres: Option<Vec<RawGenre>>,
    #[serde(default)]
    pub streamers: Option<RawStreamers>,
    #[serde(default)]
    pub number_of_seasons: Option<RawNumber>,
    #[serde(default)]
    pub number_of_episodes: Option<RawNumber>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub tagline: Option<String>,
    #[serde(default)]
    pub poster_url: Option<String>,
    #[serde(default)]
    pub is_discoverable: Option<bool>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Parses `YYYY-MM-DD` or an RFC 3339 timestamp into a calendar date
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
}

/// Parses an RFC 3339 timestamp, accepting a bare date as midnight UTC
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc())
        })
}

impl From<ShowRow> for Show {
    fn from(row: ShowRow) -> Self {
        let mut genre_ids: Vec<i32> = Vec::new();
        for genre in row.genres.iter().flatten() {
            if let Some(id) = genre.id() {
                if !genre_ids.contains(&id) {
                    genre_ids.push(id);
                }
            }
        }

        let streamers = row
            .streamers
            .as_ref()
            .map(|raw| normalize_streamers(raw.names()))
            .unwrap_or_default();

        Show {
            title: row.title.unwrap_or_default(),
            first_air_date: row.first_air_date.as_deref().and_then(parse_date),
            imdb_rating: row.imdb_rating.as_ref().and_then(RawNumber::value),
            tmdb_rating: row.tmdb_rating.as_ref().and_then(RawNumber::value),
            our_score: row.our_score.as_ref().and_then(RawNumber::value),
            genre_ids,
            streamers,
            number_of_seasons: row.number_of_seasons.as_ref().and_then(RawNumber::count),
            number_of_episodes: row.number_of_episodes.as_ref().and_then(RawNumber::count),
            overview: row.overview.filter(|s| !s.trim().is_empty()),
            tagline: row.tagline.filter(|s| !s.trim().is_empty()),
            poster_url: row.poster_url.filter(|s| !s.trim().is_empty()),
            added_at: row.created_at.as_deref().and_then(parse_timestamp),
            updated_at: row.updated_at.as_deref().and_then(parse_timestamp),
            user_status: None,
            next_season_air_date: None,
            id: row.id,
        }
    }
}
