//! # Application Repository
//!
//! The application catalog. Application ids are the app ids reported by the
//! admin API, which is what links a catalog entry to its installations.

use base64::Engine;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, IntoActiveModel,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::{MAX_NAME_LEN, now, optional_text, required_text};
use crate::cursor::{Cursor, Page, PageRequest};
use crate::error::RepositoryError;
use crate::models::application::{
    self, ActiveModel as ApplicationActiveModel, Entity as Application, IdRange,
    Model as ApplicationModel,
};

/// Full application description used by `create` and `upsert`.
#[derive(Debug, Clone, Default)]
pub struct ApplicationRecord {
    /// Generated when absent
    pub id: Option<Uuid>,
    pub name: String,
    pub publisher: String,
    pub github_repo_name: Option<String>,
    pub github_url: Option<String>,
    pub latest_release_version: Option<String>,
    pub latest_release_date: Option<DateTimeWithTimeZone>,
    pub latest_prerelease_version: Option<String>,
    pub latest_prerelease_date: Option<DateTimeWithTimeZone>,
    pub logo_base64: Option<String>,
    /// JSON array of `{ "from": int, "to": int }`
    pub id_ranges: Option<JsonValue>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateApplicationRequest {
    pub name: Option<String>,
    pub publisher: Option<String>,
    pub github_repo_name: Option<Option<String>>,
    pub github_url: Option<Option<String>>,
    pub latest_release_version: Option<Option<String>>,
    pub latest_release_date: Option<Option<DateTimeWithTimeZone>>,
    pub latest_prerelease_version: Option<Option<String>>,
    pub latest_prerelease_date: Option<Option<DateTimeWithTimeZone>>,
    pub logo_base64: Option<Option<String>>,
    pub id_ranges: Option<Option<JsonValue>>,
}

#[derive(Debug, Clone, Default)]
pub struct ApplicationFilter {
    pub publisher: Option<String>,
}

/// Validates an `id_ranges` document and returns it in canonical form.
pub fn parse_id_ranges(value: &JsonValue) -> Result<Vec<IdRange>, RepositoryError> {
    let ranges: Vec<IdRange> = serde_json::from_value(value.clone()).map_err(|_| {
        RepositoryError::validation_error(
            "id_ranges must be an array of {\"from\": integer, \"to\": integer} objects",
        )
    })?;

    if let Some(bad) = ranges.iter().find(|r| r.from > r.to) {
        return Err(RepositoryError::validation_error(format!(
            "id range {}..{} has from greater than to",
            bad.from, bad.to
        )));
    }
    Ok(ranges)
}

fn canonical_id_ranges(value: Option<JsonValue>) -> Result<Option<JsonValue>, RepositoryError> {
    match value {
        None | Some(JsonValue::Null) => Ok(None),
        Some(value) => {
            let ranges = parse_id_ranges(&value)?;
            Ok(Some(serde_json::to_value(ranges).map_err(|e| {
                RepositoryError::validation_error(format!("id_ranges: {e}"))
            })?))
        }
    }
}

fn validate_logo(logo: Option<String>) -> Result<Option<String>, RepositoryError> {
    let Some(logo) = optional_text(logo) else {
        return Ok(None);
    };
    base64::engine::general_purpose::STANDARD
        .decode(logo.as_bytes())
        .map_err(|_| RepositoryError::validation_error("logo_base64 is not valid base64"))?;
    Ok(Some(logo))
}

pub struct ApplicationRepository<'a, C> {
    db: &'a C,
}

impl<'a, C: ConnectionTrait> ApplicationRepository<'a, C> {
    pub fn new(db: &'a C) -> Self {
        Self { db }
    }

    fn active_model(
        record: ApplicationRecord,
        id: Uuid,
    ) -> Result<ApplicationActiveModel, RepositoryError> {
        let now = now();
        Ok(ApplicationActiveModel {
            id: Set(id),
            name: Set(required_text("name", &record.name, MAX_NAME_LEN)?),
            publisher: Set(required_text("publisher", &record.publisher, MAX_NAME_LEN)?),
            github_repo_name: Set(optional_text(record.github_repo_name)),
            github_url: Set(optional_text(record.github_url)),
            latest_release_version: Set(optional_text(record.latest_release_version)),
            latest_release_date: Set(record.latest_release_date),
            latest_prerelease_version: Set(optional_text(record.latest_prerelease_version)),
            latest_prerelease_date: Set(record.latest_prerelease_date),
            logo_base64: Set(validate_logo(record.logo_base64)?),
            id_ranges: Set(canonical_id_ranges(record.id_ranges)?),
            created_at: Set(now),
            updated_at: Set(now),
        })
    }

    pub async fn create(
        &self,
        record: ApplicationRecord,
    ) -> Result<ApplicationModel, RepositoryError> {
        let id = record.id.unwrap_or_else(Uuid::new_v4);
        Self::active_model(record, id)?
            .insert(self.db)
            .await
            .map_err(|e| {
                RepositoryError::database_error(e)
                    .conflict_as(format!("application {id} already exists"))
            })
    }

    /// Inserts the application or overwrites every column except `created_at`.
    pub async fn upsert(
        &self,
        record: ApplicationRecord,
    ) -> Result<ApplicationModel, RepositoryError> {
        let id = record.id.unwrap_or_else(Uuid::new_v4);
        let active = Self::active_model(record, id)?;

        Application::insert(active)
            .on_conflict(
                OnConflict::column(application::Column::Id)
                    .update_columns([
                        application::Column::Name,
                        application::Column::Publisher,
                        application::Column::GithubRepoName,
                        application::Column::GithubUrl,
                        application::Column::LatestReleaseVersion,
                        application::Column::LatestReleaseDate,
                        application::Column::LatestPrereleaseVersion,
                        application::Column::LatestPrereleaseDate,
                        application::Column::LogoBase64,
                        application::Column::IdRanges,
                        application::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        self.find_by_id(id)
            .await?
            .ok_or_else(|| RepositoryError::not_found("Application"))
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<ApplicationModel>, RepositoryError> {
        Application::find_by_id(id)
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn find_by_github_repo_name(
        &self,
        repo_name: &str,
    ) -> Result<Option<ApplicationModel>, RepositoryError> {
        Application::find()
            .filter(application::Column::GithubRepoName.eq(repo_name.trim()))
            .order_by_asc(application::Column::Id)
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// List applications ordered by (name, id)
    pub async fn list(
        &self,
        filter: &ApplicationFilter,
        page: &PageRequest,
    ) -> Result<Page<ApplicationModel>, RepositoryError> {
        let limit = page.limit();
        let mut query = Application::find()
            .order_by_asc(application::Column::Name)
            .order_by_asc(application::Column::Id);

        if let Some(publisher) = &filter.publisher {
            query = query.filter(application::Column::Publisher.eq(publisher.clone()));
        }

        if let Some(after) = &page.after {
            query = query.filter(
                Condition::any()
                    .add(application::Column::Name.gt(after.key.clone()))
                    .add(
                        Condition::all()
                            .add(application::Column::Name.eq(after.key.clone()))
                            .add(application::Column::Id.gt(after.id)),
                    ),
            );
        }

        let rows = query
            .limit(limit + 1)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(Page::from_overfetch(rows, limit, |a| Cursor {
            key: a.name.clone(),
            id: a.id,
        }))
    }

    pub async fn update(
        &self,
        id: Uuid,
        update: UpdateApplicationRequest,
    ) -> Result<ApplicationModel, RepositoryError> {
        let existing = self
            .find_by_id(id)
            .await?
            .ok_or_else(|| RepositoryError::not_found("Application"))?;

        let mut active = existing.into_active_model();
        if let Some(name) = update.name {
            active.name = Set(required_text("name", &name, MAX_NAME_LEN)?);
        }
        if let Some(publisher) = update.publisher {
            active.publisher = Set(required_text("publisher", &publisher, MAX_NAME_LEN)?);
        }
        if let Some(value) = update.github_repo_name {
            active.github_repo_name = Set(optional_text(value));
        }
        if let Some(value) = update.github_url {
            active.github_url = Set(optional_text(value));
        }
        if let Some(value) = update.latest_release_version {
            active.latest_release_version = Set(optional_text(value));
        }
        if let Some(value) = update.latest_release_date {
            active.latest_release_date = Set(value);
        }
        if let Some(value) = update.latest_prerelease_version {
            active.latest_prerelease_version = Set(optional_text(value));
        }
        if let Some(value) = update.latest_prerelease_date {
            active.latest_prerelease_date = Set(value);
        }
        if let Some(value) = update.logo_base64 {
            active.logo_base64 = Set(validate_logo(value)?);
        }
        if let Some(value) = update.id_ranges {
            active.id_ranges = Set(canonical_id_ranges(value)?);
        }
        active.updated_at = Set(now());

        active
            .update(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), RepositoryError> {
        let result = Application::delete_by_id(id)
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        if result.rows_affected == 0 {
            return Err(RepositoryError::not_found("Application"));
        }
        Ok(())
    }

    pub async fn count(&self, filter: &ApplicationFilter) -> Result<u64, RepositoryError> {
        let mut query = Application::find();
        if let Some(publisher) = &filter.publisher {
            query = query.filter(application::Column::Publisher.eq(publisher.clone()));
        }
        query
            .count(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn id_ranges_accepts_well_formed_ranges() {
        let ranges = parse_id_ranges(&json!([{ "from": 50000, "to": 50099 }])).unwrap();
        assert_eq!(ranges, vec![IdRange { from: 50000, to: 50099 }]);
        assert!(parse_id_ranges(&json!([])).unwrap().is_empty());
    }

    #[test]
    fn id_ranges_rejects_malformed_documents() {
        for value in [
            json!({ "from": 1, "to": 2 }),
            json!([{ "from": "1", "to": 2 }]),
            json!([{ "from": 1 }]),
            json!([{ "from": 10, "to": 1 }]),
        ] {
            assert!(
                matches!(parse_id_ranges(&value), Err(RepositoryError::Validation(_))),
                "{value} should be rejected"
            );
        }
    }

    #[test]
    fn null_id_ranges_are_stored_as_none() {
        assert_eq!(canonical_id_ranges(Some(JsonValue::Null)).unwrap(), None);
        assert_eq!(
            canonical_id_ranges(Some(json!([{ "to": 5, "from": 1 }]))).unwrap(),
            Some(json!([{ "from": 1, "to": 5 }]))
        );
    }
}
