//! Application entity model
//!
//! Catalog of applications published by the operator, independent of any
//! tenant.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "applications")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub name: String,

    pub publisher: String,

    pub github_repo_name: Option<String>,

    pub github_url: Option<String>,

    pub latest_release_version: Option<String>,

    pub latest_release_date: Option<DateTimeWithTimeZone>,

    pub latest_prerelease_version: Option<String>,

    pub latest_prerelease_date: Option<DateTimeWithTimeZone>,

    pub logo_base64: Option<String>,

    /// JSON array of `{ "from": n, "to": m }` object id ranges
    #[sea_orm(column_type = "JsonBinary")]
    pub id_ranges: Option<JsonValue>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

/// Inclusive range of object ids reserved for an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct IdRange {
    pub from: i64,
    pub to: i64,
}

impl Model {
    /// Typed view of `id_ranges`; malformed stored values read as empty.
    pub fn id_ranges(&self) -> Vec<IdRange> {
        self.id_ranges
            .clone()
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
