use std::collections::BTreeSet;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{
        FilterState, Genre, ShowPage, ShowStatus, SortBy, StatusFilter, UserProfile, View, YearRange,
    },
    services::{
        fetch_nav_counts,
        images::{FormatSupport, NetworkHints},
        show_feed::MAX_PAGE_LIMIT,
        ImagePreloader, NavCounts, PagerSnapshot, Priority, SessionRequest, ShowRequest,
        UserShowRequest,
    },
};

use super::AppState;

// ============================================================================
// Request types
// ============================================================================

/// Builds filters from query parameters; `genres` and `streamers` are
/// comma-separated lists
fn parse_filters(
    genres: Option<&str>,
    streamers: Option<&str>,
    year_from: Option<i32>,
    year_to: Option<i32>,
) -> AppResult<FilterState> {
    let genre_ids = split_list(genres)
        .map(|g| {
            g.parse::<i32>()
                .map_err(|_| AppError::InvalidInput(format!("genre id '{}' is not a number", g)))
        })
        .collect::<AppResult<BTreeSet<i32>>>()?;
    let streamers = split_list(streamers).map(str::to_string).collect();
    let year_range = match (year_from, year_to) {
        (None, None) => None,
        (from, to) => Some(YearRange { from, to }),
    };

    Ok(FilterState {
        genre_ids,
        streamers,
        year_range,
    })
}

fn split_list(raw: Option<&str>) -> impl Iterator<Item = &str> {
    raw.unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[derive(Debug, Deserialize)]
pub struct ShowsParams {
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub sort: SortBy,
    /// Drop shows this user already tracks
    pub exclude_user: Option<String>,
    /// Only shows flagged for discovery; on by default
    pub discoverable: Option<bool>,
    pub genres: Option<String>,
    pub streamers: Option<String>,
    pub year_from: Option<i32>,
    pub year_to: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct UserShowsParams {
    pub status: Option<StatusFilter>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub sort: SortBy,
    pub genres: Option<String>,
    pub streamers: Option<String>,
    pub year_from: Option<i32>,
    pub year_to: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct SetStatusRequest {
    pub status: ShowStatus,
}

/// Filters in a JSON body
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedFilters {
    #[serde(default)]
    pub genres: Vec<i32>,
    #[serde(default)]
    pub streamers: Vec<String>,
    pub year_from: Option<i32>,
    pub year_to: Option<i32>,
}

impl From<FeedFilters> for FilterState {
    fn from(filters: FeedFilters) -> Self {
        let year_range = match (filters.year_from, filters.year_to) {
            (None, None) => None,
            (from, to) => Some(YearRange { from, to }),
        };
        FilterState {
            genre_ids: filters.genres.into_iter().collect(),
            streamers: filters
                .streamers
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            year_range,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenFeedRequest {
    pub view: View,
    pub user_id: Option<String>,
    pub sort: Option<SortBy>,
    #[serde(default)]
    pub filters: FeedFilters,
}

#[derive(Debug, Deserialize)]
pub struct UpdateFeedRequest {
    pub sort: Option<SortBy>,
    pub filters: Option<FeedFilters>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedSessionResponse {
    pub session_id: Uuid,
    pub feed: PagerSnapshot,
}

/// Most URLs accepted by one preload request
pub const MAX_PRELOAD_URLS: usize = 50;

#[derive(Debug, Deserialize)]
pub struct PreloadImagesRequest {
    pub urls: Vec<String>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PreloadedImage {
    pub url: String,
    /// URL to display; the optimized variant when it loaded
    pub resolved: String,
    pub ready: bool,
}

/// Preloader view for the calling client
///
/// Decoder support comes from `Accept`, connection quality from the `ECT`,
/// `Downlink` and `Save-Data` client hints.
fn client_images(state: &AppState, headers: &HeaderMap) -> ImagePreloader {
    let value = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let formats = FormatSupport::from_accept(value(header::ACCEPT.as_str()).unwrap_or(""));
    let hints = NetworkHints::from_client_hints(value("ect"), value("downlink"), value("save-data"));
    state.images.for_client(formats, hints)
}

fn page_limit(requested: Option<usize>, default: usize) -> AppResult<usize> {
    match requested {
        Some(0) => Err(AppError::InvalidInput("limit must be positive".to_string())),
        Some(limit) if limit > MAX_PAGE_LIMIT => Err(AppError::InvalidInput(format!(
            "limit must be at most {}",
            MAX_PAGE_LIMIT
        ))),
        Some(limit) => Ok(limit),
        None => Ok(default),
    }
}

/// 200 with the page, or 502 with the same body when the fetch failed
fn page_response(page: ShowPage) -> Response {
    let status = if page.is_error() {
        StatusCode::BAD_GATEWAY
    } else {
        StatusCode::OK
    };
    (status, Json(page)).into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({ "status": "healthy", "backend": state.feed.backend().name() })),
    )
}

/// One page of the shows catalogue
pub async fn list_shows(
    State(state): State<AppState>,
    Query(params): Query<ShowsParams>,
) -> AppResult<Response> {
    let request = ShowRequest {
        limit: page_limit(params.limit, state.page_size)?,
        offset: params.offset,
        sort: params.sort,
        filters: parse_filters(
            params.genres.as_deref(),
            params.streamers.as_deref(),
            params.year_from,
            params.year_to,
        )?,
        discoverable_only: params.discoverable.unwrap_or(true),
        exclude_user_id: params.exclude_user.filter(|u| !u.trim().is_empty()),
    };
    Ok(page_response(state.feed.fetch_shows(&request).await))
}

pub async fn list_genres(State(state): State<AppState>) -> AppResult<Json<Vec<Genre>>> {
    Ok(Json(state.feed.fetch_genres().await?))
}

pub async fn get_profile(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> AppResult<Json<UserProfile>> {
    state
        .feed
        .fetch_profile(&user_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("profile {}", user_id)))
}

/// One page of a user's shows; defaults to the watchlist
pub async fn list_user_shows(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(params): Query<UserShowsParams>,
) -> AppResult<Response> {
    let request = UserShowRequest {
        user_id,
        status: params.status.unwrap_or(StatusFilter::Watchlist),
        sort: params.sort,
        filters: parse_filters(
            params.genres.as_deref(),
            params.streamers.as_deref(),
            params.year_from,
            params.year_to,
        )?,
        limit: page_limit(params.limit, state.page_size)?,
        offset: params.offset,
    };
    Ok(page_response(state.feed.fetch_user_shows(&request).await))
}

pub async fn user_counts(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Json<NavCounts> {
    Json(fetch_nav_counts(&state.feed, Some(&user_id)).await)
}

pub async fn anonymous_counts(State(state): State<AppState>) -> Json<NavCounts> {
    Json(fetch_nav_counts(&state.feed, None).await)
}

pub async fn set_user_show(
    State(state): State<AppState>,
    Path((user_id, show_id)): Path<(String, String)>,
    Json(request): Json<SetStatusRequest>,
) -> AppResult<StatusCode> {
    state
        .feed
        .set_show_status(&user_id, &show_id, request.status)
        .await?;
    tracing::info!(user_id = %user_id, show_id = %show_id, status = %request.status, "Show status set");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn clear_user_show(
    State(state): State<AppState>,
    Path((user_id, show_id)): Path<(String, String)>,
) -> AppResult<StatusCode> {
    state.feed.clear_show_status(&user_id, &show_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn record_interaction(
    State(state): State<AppState>,
    Path(show_id): Path<String>,
) -> AppResult<StatusCode> {
    state.feed.record_interaction(&show_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Feed sessions
// ============================================================================

/// Opens a server-held feed and returns its first page
pub async fn open_feed(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<OpenFeedRequest>,
) -> (StatusCode, Json<FeedSessionResponse>) {
    let images = client_images(&state, &headers);
    let request = SessionRequest {
        view: request.view,
        user_id: request.user_id,
        sort: request.sort,
        filters: request.filters.into(),
    };
    let (session_id, feed) = state
        .sessions
        .open(request, Some(Arc::new(images)))
        .await;
    (
        StatusCode::CREATED,
        Json(FeedSessionResponse { session_id, feed }),
    )
}

pub async fn get_feed(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> AppResult<Json<PagerSnapshot>> {
    let pager = state.sessions.pager(session_id).await?;
    Ok(Json(pager.snapshot().await))
}

/// Appends the next batch, from the preloaded buffer when one is held
///
/// When a preload is still in flight the feed answers in `loading_more`
/// and the batch shows up on a later read.
pub async fn feed_more(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> AppResult<Json<PagerSnapshot>> {
    let pager = state.sessions.pager(session_id).await?;
    pager.fetch_more().await;
    Ok(Json(pager.snapshot().await))
}

/// Changes sort and/or filters and reloads from the first page
pub async fn update_feed(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<UpdateFeedRequest>,
) -> AppResult<Json<PagerSnapshot>> {
    let pager = state.sessions.pager(session_id).await?;
    pager
        .update(request.sort, request.filters.map(FilterState::from))
        .await;
    Ok(Json(pager.snapshot().await))
}

pub async fn feed_counts(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> AppResult<Json<NavCounts>> {
    Ok(Json(state.sessions.counts(session_id).await?))
}

pub async fn set_feed_show(
    State(state): State<AppState>,
    Path((session_id, show_id)): Path<(Uuid, String)>,
    Json(request): Json<SetStatusRequest>,
) -> AppResult<Json<PagerSnapshot>> {
    let feed = state
        .sessions
        .apply_status(session_id, &show_id, Some(request.status))
        .await?;
    Ok(Json(feed))
}

pub async fn clear_feed_show(
    State(state): State<AppState>,
    Path((session_id, show_id)): Path<(Uuid, String)>,
) -> AppResult<Json<PagerSnapshot>> {
    let feed = state
        .sessions
        .apply_status(session_id, &show_id, None)
        .await?;
    Ok(Json(feed))
}

pub async fn close_feed(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state.sessions.close(session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Images
// ============================================================================

/// Warms images for the calling client and reports the URL to display
pub async fn preload_images(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<PreloadImagesRequest>,
) -> AppResult<Json<Vec<PreloadedImage>>> {
    if request.urls.len() > MAX_PRELOAD_URLS {
        return Err(AppError::InvalidInput(format!(
            "at most {} urls per request",
            MAX_PRELOAD_URLS
        )));
    }
    let images = client_images(&state, &headers);
    let resolved = images.preload_batch(&request.urls, Priority::High).await;

    Ok(Json(
        request
            .urls
            .into_iter()
            .zip(resolved)
            .map(|(url, resolved)| PreloadedImage {
                ready: images.is_ready(&resolved),
                url,
                resolved,
            })
            .collect(),
    ))
}
