//! Hosted Postgres reached over its REST interface
//!
//! Every request carries the API key twice (`apikey` header and bearer
//! token). Filters, ordering and paging travel in the querystring; counts use
//! `Prefer: count=exact` and read the total from `Content-Range`.
use reqwest::{header::HeaderMap, Client as HttpClient, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;

use crate::{
    db::{
        query::{self, QueryParams},
        ShowBackend, ShowQuery, UserShowQuery,
    },
    error::{AppError, AppResult},
    models::{Genre, ShowRow, UserProfile, UserShowRow, UserShowWrite},
};

const SHOWS_TABLE: &str = "shows";
const GENRES_TABLE: &str = "genres";
const USER_SHOWS_TABLE: &str = "user_shows";
const PROFILES_TABLE: &str = "profiles";
const INCREMENT_INTERACTIONS_RPC: &str = "increment_interaction_count";

#[derive(Clone)]
pub struct PostgrestBackend {
    http_client: HttpClient,
    api_key: String,
    base_url: String,
}

impl PostgrestBackend {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            http_client: HttpClient::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn rpc_url(&self, function: &str) -> String {
        format!("{}/rest/v1/rpc/{}", self.base_url, function)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    /// Turns a non-2xx response into `AppError::Remote`
    async fn check(response: Response, resource: &str) -> AppResult<Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        tracing::error!(
            resource = %resource,
            status = %status,
            body = %body,
            "Remote request failed"
        );
        Err(AppError::Remote {
            status: status.as_u16(),
            body,
        })
    }

    async fn get_rows<T: DeserializeOwned>(&self, table: &str, params: &QueryParams) -> AppResult<Vec<T>> {
        let response = self
            .authorized(self.http_client.get(self.table_url(table)))
            .query(params.pairs())
            .send()
            .await?;
        let response = Self::check(response, table).await?;

        let text = response.text().await?;
        Self::decode_rows(table, &text)
    }

    /// Decodes a JSON array of rows, skipping rows that do not fit `T`
    ///
    /// Only a body that is not an array at all is an error.
    fn decode_rows<T: DeserializeOwned>(table: &str, text: &str) -> AppResult<Vec<T>> {
        let values: Vec<serde_json::Value> = serde_json::from_str(text).map_err(|e| {
            tracing::error!(
                error = %e,
                resource = %table,
                "Failed to deserialize remote rows"
            );
            AppError::Internal(format!("Failed to parse {} rows: {}", table, e))
        })?;

        let total = values.len();
        let rows: Vec<T> = values
            .into_iter()
            .enumerate()
            .filter_map(|(index, value)| match serde_json::from_value(value) {
                Ok(row) => Some(row),
                Err(e) => {
                    tracing::warn!(error = %e, resource = %table, index, "Skipping malformed row");
                    None
                }
            })
            .collect();

        if rows.len() < total {
            tracing::warn!(
                resource = %table,
                skipped = total - rows.len(),
                total,
                "Dropped malformed rows from response"
            );
        }
        Ok(rows)
    }

    async fn count(&self, table: &str, params: &QueryParams) -> AppResult<u64> {
        let response = self
            .authorized(self.http_client.get(self.table_url(table)))
            .header("Prefer", "count=exact")
            .query(params.pairs())
            .send()
            .await?;
        let response = Self::check(response, table).await?;
        Self::content_range_total(response.headers()).ok_or_else(|| {
            AppError::Internal(format!("{} count response had no usable Content-Range", table))
        })
    }

    fn content_range_total(headers: &HeaderMap) -> Option<u64> {
        headers
            .get("content-range")
            .and_then(|h| h.to_str().ok())
            .and_then(query::parse_content_range_total)
    }
}

#[async_trait::async_trait]
impl ShowBackend for PostgrestBackend {
    async fn select_shows(&self, query: &ShowQuery) -> AppResult<Vec<ShowRow>> {
        let rows: Vec<ShowRow> = self.get_rows(SHOWS_TABLE, &query::show_select(query)).await?;
        tracing::debug!(
            rows = rows.len(),
            limit = query.limit,
            offset = query.offset,
            "Fetched show rows"
        );
        Ok(rows)
    }

    async fn select_user_show_ids(&self, user_id: &str) -> AppResult<Vec<String>> {
        #[derive(Deserialize)]
        struct IdRow {
            show_id: String,
        }

        let rows: Vec<IdRow> = self
            .get_rows(USER_SHOWS_TABLE, &query::user_show_ids(user_id))
            .await?;
        Ok(rows.into_iter().map(|r| r.show_id).collect())
    }

    async fn select_user_shows(&self, query: &UserShowQuery) -> AppResult<Vec<UserShowRow>> {
        self.get_rows(USER_SHOWS_TABLE, &query::user_show_select(query))
            .await
    }

    async fn count_shows(&self, discoverable_only: bool) -> AppResult<u64> {
        self.count(SHOWS_TABLE, &query::show_count(discoverable_only))
            .await
    }

    async fn count_user_shows(&self, query: &UserShowQuery) -> AppResult<u64> {
        self.count(USER_SHOWS_TABLE, &query::user_show_count(query))
            .await
    }

    async fn select_genres(&self) -> AppResult<Vec<Genre>> {
        let params = QueryParams::new().select("id,name").order("name.asc");
        self.get_rows(GENRES_TABLE, &params).await
    }

    async fn select_profile(&self, user_id: &str) -> AppResult<Option<UserProfile>> {
        let params = QueryParams::new()
            .select("id,username,display_name,avatar_url")
            .eq("id", user_id)
            .limit(1);
        let rows: Vec<UserProfile> = self.get_rows(PROFILES_TABLE, &params).await?;
        Ok(rows.into_iter().next())
    }

    async fn upsert_user_show(&self, record: &UserShowWrite) -> AppResult<()> {
        let params = QueryParams::new().on_conflict("user_id,show_id");
        let response = self
            .authorized(self.http_client.post(self.table_url(USER_SHOWS_TABLE)))
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .query(params.pairs())
            .json(record)
            .send()
            .await?;
        Self::check(response, USER_SHOWS_TABLE).await?;

        tracing::info!(
            user_id = %record.user_id,
            show_id = %record.show_id,
            status = %record.status,
            "Show status upserted"
        );
        Ok(())
    }

    async fn delete_user_show(&self, user_id: &str, show_id: &str) -> AppResult<()> {
        let params = QueryParams::new()
            .eq("user_id", user_id)
            .eq("show_id", show_id);
        let response = self
            .authorized(self.http_client.delete(self.table_url(USER_SHOWS_TABLE)))
            .query(params.pairs())
            .send()
            .await?;
        Self::check(response, USER_SHOWS_TABLE).await?;
        Ok(())
    }

    async fn increment_interactions(&self, show_id: &str) -> AppResult<()> {
        let response = self
            .authorized(self.http_client.post(self.rpc_url(INCREMENT_INTERACTIONS_RPC)))
            .json(&json!({ "show_id": show_id }))
            .send()
            .await?;
        Self::check(response, INCREMENT_INTERACTIONS_RPC).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "postgrest"
    }
}
