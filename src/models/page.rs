use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::Show;

/// One page of a feed
///
/// Fetch failures are carried in `error` instead of being raised, so callers
/// can still render what they already have and offer a retry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ShowPage {
    pub items: Vec<Show>,
    /// Heuristic: true when the remote filled the whole raw batch
    pub has_more: bool,
    /// Cursor for the next call, in raw (pre-filter) rows
    pub next_offset: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ShowPage {
    pub fn failed(offset: usize, error: impl ToString) -> Self {
        Self {
            items: Vec::new(),
            has_more: false,
            next_offset: offset,
            error: Some(error.to_string()),
        }
    }

    /// A page with nothing in it and nothing after it
    pub fn exhausted(offset: usize) -> Self {
        Self {
            items: Vec::new(),
            has_more: false,
            next_offset: offset,
            error: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Appends `incoming` to `existing`, skipping ids already present.
///
/// The first occurrence of an id wins and relative order is kept.
pub fn merge_unique(existing: &mut Vec<Show>, incoming: Vec<Show>) {
    let mut seen: HashSet<String> = existing.iter().map(|s| s.id.clone()).collect();
    existing.extend(incoming.into_iter().filter(|s| seen.insert(s.id.clone())));
}

/// De-duplicates a batch by id, first occurrence wins
pub fn dedup_by_id(items: Vec<Show>) -> Vec<Show> {
    let mut out = Vec::with_capacity(items.len());
    merge_unique(&mut out, items);
    out
}
