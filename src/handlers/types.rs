//! # Common API Types
//!
//! Query parameters and helpers shared by the list and update endpoints.

use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Deserializer, Serialize};
use utoipa::IntoParams;

use crate::cursor::PageRequest;
use crate::error::ApiError;

/// Keyset pagination parameters
#[derive(Debug, Default, Serialize, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PageQuery {
    /// Opaque cursor returned as `next_cursor` by the previous page
    pub cursor: Option<String>,
    /// Maximum number of items to return (default: 50, max: 200)
    pub limit: Option<u64>,
}

impl PageQuery {
    pub fn page_request(&self) -> Result<PageRequest, ApiError> {
        PageRequest::from_query(self.cursor.as_deref(), self.limit)
    }
}

/// RFC 3339 rendering used by every DTO timestamp.
pub fn rfc3339(value: &DateTimeWithTimeZone) -> String {
    value.to_utc().to_rfc3339()
}

/// Distinguishes an absent field (`None`) from an explicit `null`
/// (`Some(None)`) in PATCH bodies. Use together with `#[serde(default)]`.
pub fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
