//! Offset/limit windows for list queries and relay-style cursor windows for
//! connection queries.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::MirrorError;

const CURSOR_PREFIX: &str = "arrayconnection:";

pub fn offset_to_cursor(offset: usize) -> String {
    STANDARD.encode(format!("{}{}", CURSOR_PREFIX, offset))
}

pub fn cursor_to_offset(cursor: &str) -> Result<usize, MirrorError> {
    let bytes = STANDARD
        .decode(cursor)
        .map_err(|e| MirrorError::InvalidCursor(e.to_string()))?;
    let text = String::from_utf8(bytes).map_err(|e| MirrorError::InvalidCursor(e.to_string()))?;
    text.strip_prefix(CURSOR_PREFIX)
        .and_then(|n| n.parse::<usize>().ok())
        .ok_or_else(|| MirrorError::InvalidCursor(cursor.to_string()))
}

/// `pagination` argument of connection queries.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ConnectionArgs {
    pub first: Option<usize>,
    pub after: Option<String>,
    pub last: Option<usize>,
    pub before: Option<String>,
}

/// A resolved window over a collection of `total` items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub offset: usize,
    pub limit: usize,
    pub has_previous_page: bool,
    pub has_next_page: bool,
}

impl Window {
    /// Plain `offset`/`limit` window.
    pub fn offset_limit(offset: usize, limit: usize, total: usize) -> Self {
        let start = offset.min(total);
        let end = start.saturating_add(limit).min(total);
        Self {
            offset: start,
            limit: end - start,
            has_previous_page: start > 0,
            has_next_page: end < total,
        }
    }

    /// Translates cursor arguments into an offset/limit window; with neither
    /// `first` nor `last` the page is capped at `default_first`.
    pub fn from_connection_args(
        args: &ConnectionArgs,
        total: usize,
        default_first: usize,
    ) -> Result<Self, MirrorError> {
        let after = args.after.as_deref().map(cursor_to_offset).transpose()?;
        let before = args.before.as_deref().map(cursor_to_offset).transpose()?;

        let mut start = after.map(|a| a.saturating_add(1)).unwrap_or(0).min(total);
        let mut end = before.unwrap_or(total).min(total).max(start);

        let first = match (args.first, args.last) {
            (None, None) => Some(default_first),
            (first, _) => first,
        };
        if let Some(first) = first {
            end = end.min(start.saturating_add(first));
        }
        if let Some(last) = args.last {
            start = start.max(end.saturating_sub(last));
        }

        let lower = after.map(|a| a.saturating_add(1)).unwrap_or(0);
        let upper = before.unwrap_or(total).min(total);
        Ok(Self {
            offset: start,
            limit: end - start,
            has_previous_page: args.last.is_some() && start > lower,
            has_next_page: first.is_some() && end < upper,
        })
    }

    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.limit
    }
}

/// Assembles a raw connection page from already-sliced nodes.
pub fn connection_page(nodes: Vec<Value>, window: &Window, total: usize) -> Value {
    let edges: Vec<Value> = nodes
        .into_iter()
        .enumerate()
        .map(|(i, node)| json!({ "cursor": offset_to_cursor(window.offset + i), "node": node }))
        .collect();
    let start_cursor = edges.first().map(|e| e["cursor"].clone()).unwrap_or(Value::Null);
    let end_cursor = edges.last().map(|e| e["cursor"].clone()).unwrap_or(Value::Null);

    json!({
        "edges": edges,
        "pageInfo": {
            "startCursor": start_cursor,
            "endCursor": end_cursor,
            "hasPreviousPage": window.has_previous_page,
            "hasNextPage": window.has_next_page,
        },
        "pageData": {
            "count": total,
            "limit": window.limit,
            "offset": window.offset,
        },
    })
}
