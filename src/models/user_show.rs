use std::fmt::Display;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::show::{parse_date, parse_timestamp, Show, ShowRow};

/// Status a user has given a show
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ShowStatus {
    Watchlist,
    LovedIt,
    LikedIt,
    NotForMe,
}

impl ShowStatus {
    /// Statuses that count as having rated a show
    pub const RATED: [ShowStatus; 3] = [ShowStatus::LovedIt, ShowStatus::LikedIt, ShowStatus::NotForMe];

    /// Ratings that make a show's upcoming seasons interesting
    pub const POSITIVE: [ShowStatus; 2] = [ShowStatus::LovedIt, ShowStatus::LikedIt];

    pub fn as_str(&self) -> &'static str {
        match self {
            ShowStatus::Watchlist => "watchlist",
            ShowStatus::LovedIt => "loved_it",
            ShowStatus::LikedIt => "liked_it",
            ShowStatus::NotForMe => "not_for_me",
        }
    }

    pub fn is_rated(&self) -> bool {
        Self::RATED.contains(self)
    }

    pub fn is_positive(&self) -> bool {
        Self::POSITIVE.contains(self)
    }
}

impl Display for ShowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which of a user's shows a user feed selects
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StatusFilter {
    Watchlist,
    LovedIt,
    LikedIt,
    NotForMe,
    /// Any of the rated statuses
    AllRated,
    /// Positively rated shows with a next season close to today
    NewSeasons,
}

impl StatusFilter {
    pub fn statuses(&self) -> Vec<ShowStatus> {
        match self {
            StatusFilter::Watchlist => vec![ShowStatus::Watchlist],
            StatusFilter::LovedIt => vec![ShowStatus::LovedIt],
            StatusFilter::LikedIt => vec![ShowStatus::LikedIt],
            StatusFilter::NotForMe => vec![ShowStatus::NotForMe],
            StatusFilter::AllRated => ShowStatus::RATED.to_vec(),
            StatusFilter::NewSeasons => ShowStatus::POSITIVE.to_vec(),
        }
    }
}

/// Row of the `user_shows` association table, with the show embedded
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct UserShowRow {
    pub user_id: String,
    pub show_id: String,
    pub status: ShowStatus,
    #[serde(default)]
    pub next_season_air_date: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub show: Option<ShowRow>,
}

impl UserShowRow {
    pub fn next_season_date(&self) -> Option<NaiveDate> {
        self.next_season_air_date.as_deref().and_then(parse_date)
    }

    /// Converts to a show carrying the user's overlay.
    ///
    /// Rows whose embedded show is missing (deleted upstream) yield `None`.
    pub fn into_show(self) -> Option<Show> {
        let next_season = self.next_season_date();
        let mut show = Show::from(self.show?);
        show.user_status = Some(self.status);
        show.next_season_air_date = next_season;
        // Association timestamps drive the recency sorts in user feeds
        if let Some(added) = self.created_at.as_deref().and_then(parse_timestamp) {
            show.added_at = Some(added);
        }
        if let Some(updated) = self.updated_at.as_deref().and_then(parse_timestamp) {
            show.updated_at = Some(updated);
        }
        Some(show)
    }
}

/// Body of the atomic status upsert
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UserShowWrite {
    pub user_id: String,
    pub show_id: String,
    pub status: ShowStatus,
}
