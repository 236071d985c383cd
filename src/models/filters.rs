use std::cmp::Ordering;
use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::streamer::normalize_streamer;
use super::{Show, ShowStatus};

/// Inclusive range of first-air years; either bound may be open
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct YearRange {
    pub from: Option<i32>,
    pub to: Option<i32>,
}

impl YearRange {
    pub fn is_open(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    /// First day covered by the range
    pub fn start_date(&self) -> Option<NaiveDate> {
        self.from.and_then(|y| NaiveDate::from_ymd_opt(y, 1, 1))
    }

    /// Last day covered by the range
    pub fn end_date(&self) -> Option<NaiveDate> {
        self.to.and_then(|y| NaiveDate::from_ymd_opt(y, 12, 31))
    }

    pub fn contains(&self, date: Option<NaiveDate>) -> bool {
        if self.is_open() {
            return true;
        }
        let Some(date) = date else {
            return false;
        };
        self.start_date().map_or(true, |start| date >= start)
            && self.end_date().map_or(true, |end| date <= end)
    }
}

/// User-selected narrowing of a feed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FilterState {
    #[serde(default)]
    pub genre_ids: BTreeSet<i32>,
    #[serde(default)]
    pub streamers: BTreeSet<String>,
    #[serde(default)]
    pub year_range: Option<YearRange>,
}

impl FilterState {
    pub fn is_empty(&self) -> bool {
        self.genre_ids.is_empty()
            && self.streamers.is_empty()
            && self.year_range.map_or(true, |r| r.is_open())
    }

    pub fn has_genre_filter(&self) -> bool {
        !self.genre_ids.is_empty()
    }

    pub fn has_streamer_filter(&self) -> bool {
        !self.streamers.is_empty()
    }

    /// Selected streamers folded onto canonical labels; unknown ones drop out
    pub fn canonical_streamers(&self) -> BTreeSet<&'static str> {
        self.streamers
            .iter()
            .filter_map(|s| normalize_streamer(s))
            .collect()
    }

    /// Genre any-of match
    pub fn matches_genres(&self, show: &Show) -> bool {
        self.genre_ids.is_empty() || show.genre_ids.iter().any(|g| self.genre_ids.contains(g))
    }

    /// Streamer any-of match against canonical labels
    pub fn matches_streamers(&self, show: &Show, canonical: &BTreeSet<&'static str>) -> bool {
        if self.streamers.is_empty() {
            return true;
        }
        show.streamers.iter().any(|s| canonical.contains(s.as_str()))
    }

    pub fn matches_years(&self, show: &Show) -> bool {
        self.year_range.map_or(true, |r| r.contains(show.first_air_date))
    }

    /// Applies every filter in memory
    pub fn matches(&self, show: &Show) -> bool {
        let canonical = self.canonical_streamers();
        self.matches_genres(show) && self.matches_streamers(show, &canonical) && self.matches_years(show)
    }
}

/// Feed ordering
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    /// First-air date, newest first
    #[default]
    Latest,
    /// Our score, then IMDb, then TMDB
    Rating,
    Title,
    RecentlyAdded,
    RecentlyUpdated,
}

fn desc_nulls_last<T: PartialOrd>(a: Option<T>, b: Option<T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

impl SortBy {
    /// Remote ordering clause, `column.direction.nulls` joined by commas
    pub fn order_clause(&self) -> &'static str {
        match self {
            SortBy::Latest => "first_air_date.desc.nullslast",
            SortBy::Rating => {
                "our_score.desc.nullslast,imdb_rating.desc.nullslast,tmdb_rating.desc.nullslast"
            }
            SortBy::Title => "title.asc",
            SortBy::RecentlyAdded => "created_at.desc.nullslast",
            SortBy::RecentlyUpdated => "updated_at.desc.nullslast",
        }
    }

    /// Sorts that only depend on the association row in user feeds
    pub fn is_association_order(&self) -> bool {
        matches!(self, SortBy::RecentlyAdded | SortBy::RecentlyUpdated)
    }

    /// Same ordering as `order_clause`, applied in memory; ties break on id
    pub fn compare(&self, a: &Show, b: &Show) -> Ordering {
        let primary = match self {
            SortBy::Latest => desc_nulls_last(a.first_air_date, b.first_air_date),
            SortBy::Rating => desc_nulls_last(a.our_score, b.our_score)
                .then_with(|| desc_nulls_last(a.imdb_rating, b.imdb_rating))
                .then_with(|| desc_nulls_last(a.tmdb_rating, b.tmdb_rating)),
            SortBy::Title => a.title.to_lowercase().cmp(&b.title.to_lowercase()),
            SortBy::RecentlyAdded => desc_nulls_last(a.added_at, b.added_at),
            SortBy::RecentlyUpdated => desc_nulls_last(a.updated_at, b.updated_at),
        };
        primary.then_with(|| a.id.cmp(&b.id))
    }
}

/// Top-level feeds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum View {
    Discover,
    NewSeasons,
    Watchlist,
    Rated,
}

impl View {
    /// Whether a show the user just gave `status` still belongs in this feed
    pub fn keeps(&self, status: ShowStatus) -> bool {
        match self {
            View::Discover => false,
            View::NewSeasons => status.is_positive(),
            View::Watchlist => status == ShowStatus::Watchlist,
            View::Rated => status.is_rated(),
        }
    }
}
