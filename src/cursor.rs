//! # Cursor Utilities
//!
//! Opaque keyset-pagination cursors. A cursor records the sort key and id of
//! the last row of a page; the next page starts strictly after that pair.

use axum::http::StatusCode;
use base64::Engine;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;

pub const DEFAULT_PAGE_LIMIT: u64 = 50;
pub const MAX_PAGE_LIMIT: u64 = 200;
/// Fits a cursor over the longest legal sort key in any script.
const MAX_CURSOR_LEN: usize = 4096;

/// Position after which the next page begins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub key: String,
    pub id: Uuid,
}

/// Page selection passed to repository list operations.
#[derive(Debug, Clone, Default)]
pub struct PageRequest {
    pub after: Option<Cursor>,
    pub limit: Option<u64>,
}

impl PageRequest {
    pub fn first(limit: u64) -> Self {
        Self {
            after: None,
            limit: Some(limit),
        }
    }

    /// Builds a page request from raw query parameters.
    pub fn from_query(cursor: Option<&str>, limit: Option<u64>) -> Result<Self, ApiError> {
        let after = cursor
            .filter(|c| !c.is_empty())
            .map(decode_cursor)
            .transpose()?;
        Ok(Self { after, limit })
    }

    /// Effective limit, clamped to `1..=MAX_PAGE_LIMIT`.
    pub fn limit(&self) -> u64 {
        self.limit
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .clamp(1, MAX_PAGE_LIMIT)
    }
}

/// One page of results plus the cursor for the following page.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    /// Builds a page from a query that fetched `limit + 1` rows; the extra
    /// row only signals that another page exists.
    pub fn from_overfetch(mut rows: Vec<T>, limit: u64, position: impl Fn(&T) -> Cursor) -> Self {
        let has_more = rows.len() as u64 > limit;
        if has_more {
            rows.truncate(limit as usize);
        }
        let next_cursor = if has_more {
            rows.last()
                .map(|last| position(last))
                .map(|cursor| encode_cursor(&cursor))
        } else {
            None
        };
        Self {
            items: rows,
            next_cursor,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            next_cursor: self.next_cursor,
        }
    }
}

/// Encode cursor data as an opaque base64 string
pub fn encode_cursor(cursor: &Cursor) -> String {
    let json = serde_json::to_vec(cursor).unwrap_or_default();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(json)
}

fn invalid(message: &str) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message)
        .with_details(serde_json::json!({ "cursor": message }))
}

/// Decode cursor data from an opaque base64 string with validation
pub fn decode_cursor(cursor: &str) -> Result<Cursor, ApiError> {
    if cursor.is_empty() {
        return Err(invalid("cursor cannot be empty"));
    }

    if cursor.len() > MAX_CURSOR_LEN {
        return Err(invalid("cursor is too long"));
    }

    if !cursor
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(invalid("cursor contains invalid characters"));
    }

    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|_| invalid("cursor is not valid base64"))?;

    let data: Cursor =
        serde_json::from_slice(&decoded).map_err(|_| invalid("cursor contains invalid JSON structure"))?;

    if data.id.is_nil() {
        return Err(invalid("cursor contains invalid ID"));
    }

    Ok(data)
}
