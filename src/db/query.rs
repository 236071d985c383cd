use chrono::NaiveDate;

use crate::models::ShowStatus;

use super::{ShowQuery, UserShowQuery};

/// Columns selected from the shows table
pub const SHOW_COLUMNS: &str = "id,title,first_air_date,imdb_rating,tmdb_rating,our_score,genres,streamers,number_of_seasons,number_of_episodes,overview,tagline,poster_url,created_at,updated_at";

/// Querystring builder for the REST filter syntax (`col=op.value`)
#[derive(Debug, Default, Clone, PartialEq)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(mut self, columns: &str) -> Self {
        self.pairs.push(("select".to_string(), columns.to_string()));
        self
    }

    pub fn eq(mut self, column: &str, value: impl ToString) -> Self {
        self.pairs
            .push((column.to_string(), format!("eq.{}", value.to_string())));
        self
    }

    pub fn gte(mut self, column: &str, value: impl ToString) -> Self {
        self.pairs
            .push((column.to_string(), format!("gte.{}", value.to_string())));
        self
    }

    pub fn lte(mut self, column: &str, value: impl ToString) -> Self {
        self.pairs
            .push((column.to_string(), format!("lte.{}", value.to_string())));
        self
    }

    pub fn in_list<I, S>(mut self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        let joined: Vec<String> = values.into_iter().map(|v| v.to_string()).collect();
        self.pairs
            .push((column.to_string(), format!("in.({})", joined.join(","))));
        self
    }

    pub fn order(mut self, clause: &str) -> Self {
        self.pairs.push(("order".to_string(), clause.to_string()));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.pairs.push(("limit".to_string(), limit.to_string()));
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.pairs.push(("offset".to_string(), offset.to_string()));
        self
    }

    pub fn on_conflict(mut self, columns: &str) -> Self {
        self.pairs
            .push(("on_conflict".to_string(), columns.to_string()));
        self
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }
}

fn date_window(params: QueryParams, column: &str, window: Option<(NaiveDate, NaiveDate)>) -> QueryParams {
    match window {
        Some((from, to)) => params.gte(column, from).lte(column, to),
        None => params,
    }
}

fn statuses(params: QueryParams, statuses: &[ShowStatus]) -> QueryParams {
    match statuses {
        [] => params,
        [single] => params.eq("status", single),
        many => params.in_list("status", many.iter()),
    }
}

/// Filters shared by row selects and counts of the shows table
fn show_filters(params: QueryParams, discoverable_only: bool) -> QueryParams {
    if discoverable_only {
        params.eq("is_discoverable", true)
    } else {
        params
    }
}

pub fn show_select(query: &ShowQuery) -> QueryParams {
    let mut params = show_filters(QueryParams::new().select(SHOW_COLUMNS), query.discoverable_only);
    if let Some(range) = query.year_range {
        if let Some(start) = range.start_date() {
            params = params.gte("first_air_date", start);
        }
        if let Some(end) = range.end_date() {
            params = params.lte("first_air_date", end);
        }
    }
    params
        .order(query.sort.order_clause())
        .limit(query.limit)
        .offset(query.offset)
}

pub fn show_count(discoverable_only: bool) -> QueryParams {
    show_filters(QueryParams::new().select("id"), discoverable_only).limit(1)
}

pub fn user_show_ids(user_id: &str) -> QueryParams {
    QueryParams::new().select("show_id").eq("user_id", user_id)
}

pub fn user_show_select(query: &UserShowQuery) -> QueryParams {
    let columns = format!("user_id,show_id,status,next_season_air_date,created_at,updated_at,show:shows({})", SHOW_COLUMNS);
    let params = QueryParams::new().select(&columns).eq("user_id", &query.user_id);
    let params = statuses(params, &query.statuses);
    let mut params = date_window(params, "next_season_air_date", query.next_season_between);
    if let Some(order) = query.order {
        params = params.order(order.order_clause());
    }
    if let Some((limit, offset)) = query.range {
        params = params.limit(limit).offset(offset);
    }
    params
}

pub fn user_show_count(query: &UserShowQuery) -> QueryParams {
    let params = QueryParams::new().select("show_id").eq("user_id", &query.user_id);
    let params = statuses(params, &query.statuses);
    date_window(params, "next_season_air_date", query.next_season_between).limit(1)
}

/// Total row count from a `Content-Range` header such as `0-24/3573` or `*/0`
pub fn parse_content_range_total(header: &str) -> Option<u64> {
    let (_, total) = header.trim().rsplit_once('/')?;
    total.parse().ok()
}
