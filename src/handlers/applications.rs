//! # Applications API Handlers
//!
//! The application catalog and the lookup of where each application is
//! installed.

use axum::{extract::State, http::StatusCode};
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::extract::{Json, Path, Query};
use super::tenants::InstalledAppDto;
use super::types::{PageQuery, double_option, rfc3339};
use crate::auth::OperatorAuth;
use crate::cursor::Page;
use crate::error::{ApiError, RepositoryError};
use crate::models::application::{IdRange, Model as ApplicationModel};
use crate::repositories::application::{
    ApplicationFilter, ApplicationRecord, UpdateApplicationRequest,
};
use crate::repositories::{ApplicationRepository, InstalledAppRepository};
use crate::server::AppState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApplicationDto {
    #[schema(value_type = String, example = "437dbf0e-84ff-417a-965d-ed2bb9650972")]
    pub id: Uuid,
    pub name: String,
    pub publisher: String,
    pub github_repo_name: Option<String>,
    pub github_url: Option<String>,
    pub latest_release_version: Option<String>,
    pub latest_release_date: Option<String>,
    pub latest_prerelease_version: Option<String>,
    pub latest_prerelease_date: Option<String>,
    pub logo_base64: Option<String>,
    pub id_ranges: Vec<IdRange>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<ApplicationModel> for ApplicationDto {
    fn from(app: ApplicationModel) -> Self {
        Self {
            id_ranges: app.id_ranges(),
            latest_release_date: app.latest_release_date.as_ref().map(rfc3339),
            latest_prerelease_date: app.latest_prerelease_date.as_ref().map(rfc3339),
            created_at: rfc3339(&app.created_at),
            updated_at: rfc3339(&app.updated_at),
            id: app.id,
            name: app.name,
            publisher: app.publisher,
            github_repo_name: app.github_repo_name,
            github_url: app.github_url,
            latest_release_version: app.latest_release_version,
            latest_prerelease_version: app.latest_prerelease_version,
            logo_base64: app.logo_base64,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateApplicationDto {
    /// App id as reported by the admin API; generated when omitted
    #[schema(value_type = Option<String>)]
    pub id: Option<Uuid>,
    pub name: String,
    pub publisher: String,
    pub github_repo_name: Option<String>,
    pub github_url: Option<String>,
    pub latest_release_version: Option<String>,
    #[schema(value_type = Option<String>)]
    pub latest_release_date: Option<DateTimeWithTimeZone>,
    pub latest_prerelease_version: Option<String>,
    #[schema(value_type = Option<String>)]
    pub latest_prerelease_date: Option<DateTimeWithTimeZone>,
    pub logo_base64: Option<String>,
    pub id_ranges: Option<Vec<IdRange>>,
}

/// Partial update; `null` clears a nullable field
#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateApplicationDto {
    pub name: Option<String>,
    pub publisher: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub github_repo_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub github_url: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub latest_release_version: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub latest_release_date: Option<Option<DateTimeWithTimeZone>>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub latest_prerelease_version: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub latest_prerelease_date: Option<Option<DateTimeWithTimeZone>>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub logo_base64: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<Vec<IdRange>>)]
    pub id_ranges: Option<Option<Vec<IdRange>>>,
}

/// Page of applications
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApplicationsResponse {
    pub data: Vec<ApplicationDto>,
    /// Opaque cursor for fetching the next page (null if this is the last page)
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

impl From<Page<ApplicationModel>> for ApplicationsResponse {
    fn from(page: Page<ApplicationModel>) -> Self {
        Self {
            has_more: page.next_cursor.is_some(),
            next_cursor: page.next_cursor,
            data: page.items.into_iter().map(ApplicationDto::from).collect(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ApplicationListQuery {
    pub publisher: Option<String>,
}

fn id_ranges_value(ranges: Option<Vec<IdRange>>) -> Result<Option<JsonValue>, ApiError> {
    ranges
        .map(|ranges| {
            serde_json::to_value(ranges).map_err(|e| {
                ApiError::from(RepositoryError::validation_error(format!("id_ranges: {e}")))
            })
        })
        .transpose()
}

/// List applications ordered by name
#[utoipa::path(
    get,
    path = "/api/v1/applications",
    security(("bearer_auth" = [])),
    params(ApplicationListQuery, PageQuery),
    responses(
        (status = 200, description = "Page of applications", body = ApplicationsResponse),
        (status = 400, description = "Invalid cursor or limit", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "applications"
)]
pub async fn list_applications(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Query(filter): Query<ApplicationListQuery>,
    Query(page): Query<PageQuery>,
) -> Result<Json<ApplicationsResponse>, ApiError> {
    let filter = ApplicationFilter {
        publisher: filter.publisher,
    };
    let page = ApplicationRepository::new(state.db.as_ref())
        .list(&filter, &page.page_request()?)
        .await?;
    Ok(Json(page.into()))
}

/// Add an application to the catalog
#[utoipa::path(
    post,
    path = "/api/v1/applications",
    security(("bearer_auth" = [])),
    request_body = CreateApplicationDto,
    responses(
        (status = 201, description = "Application created", body = ApplicationDto, headers(
            ("Location", description = "URL of the created application")
        )),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 409, description = "Application id already exists", body = ApiError)
    ),
    tag = "applications"
)]
pub async fn create_application(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Json(request): Json<CreateApplicationDto>,
) -> Result<(StatusCode, [(&'static str, String); 1], Json<ApplicationDto>), ApiError> {
    let application = ApplicationRepository::new(state.db.as_ref())
        .create(ApplicationRecord {
            id: request.id,
            name: request.name,
            publisher: request.publisher,
            github_repo_name: request.github_repo_name,
            github_url: request.github_url,
            latest_release_version: request.latest_release_version,
            latest_release_date: request.latest_release_date,
            latest_prerelease_version: request.latest_prerelease_version,
            latest_prerelease_date: request.latest_prerelease_date,
            logo_base64: request.logo_base64,
            id_ranges: id_ranges_value(request.id_ranges)?,
        })
        .await?;

    tracing::info!(application_id = %application.id, "Created application");
    let location = format!("/api/v1/applications/{}", application.id);
    Ok((
        StatusCode::CREATED,
        [("Location", location)],
        Json(application.into()),
    ))
}

/// Get an application by ID
#[utoipa::path(
    get,
    path = "/api/v1/applications/{id}",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Application UUID")),
    responses(
        (status = 200, description = "Application", body = ApplicationDto),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Application not found", body = ApiError)
    ),
    tag = "applications"
)]
pub async fn get_application(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<Uuid>,
) -> Result<Json<ApplicationDto>, ApiError> {
    let application = ApplicationRepository::new(state.db.as_ref())
        .find_by_id(id)
        .await?
        .ok_or_else(|| RepositoryError::not_found("Application"))?;
    Ok(Json(application.into()))
}

/// Update an application
#[utoipa::path(
    patch,
    path = "/api/v1/applications/{id}",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Application UUID")),
    request_body = UpdateApplicationDto,
    responses(
        (status = 200, description = "Updated application", body = ApplicationDto),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Application not found", body = ApiError)
    ),
    tag = "applications"
)]
pub async fn update_application(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateApplicationDto>,
) -> Result<Json<ApplicationDto>, ApiError> {
    let id_ranges = request.id_ranges.map(id_ranges_value).transpose()?;

    let application = ApplicationRepository::new(state.db.as_ref())
        .update(
            id,
            UpdateApplicationRequest {
                name: request.name,
                publisher: request.publisher,
                github_repo_name: request.github_repo_name,
                github_url: request.github_url,
                latest_release_version: request.latest_release_version,
                latest_release_date: request.latest_release_date,
                latest_prerelease_version: request.latest_prerelease_version,
                latest_prerelease_date: request.latest_prerelease_date,
                logo_base64: request.logo_base64,
                id_ranges,
            },
        )
        .await?;
    Ok(Json(application.into()))
}

/// Remove an application from the catalog
#[utoipa::path(
    delete,
    path = "/api/v1/applications/{id}",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Application UUID")),
    responses(
        (status = 204, description = "Application deleted"),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Application not found", body = ApiError)
    ),
    tag = "applications"
)]
pub async fn delete_application(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    ApplicationRepository::new(state.db.as_ref())
        .delete(id)
        .await?;
    tracing::info!(application_id = %id, "Deleted application");
    Ok(StatusCode::NO_CONTENT)
}

/// Every tenant environment where the application is installed
#[utoipa::path(
    get,
    path = "/api/v1/applications/{id}/installations",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Application UUID")),
    responses(
        (status = 200, description = "Installations of the application", body = [InstalledAppDto]),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Application not found", body = ApiError)
    ),
    tag = "applications"
)]
pub async fn list_installations(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<InstalledAppDto>>, ApiError> {
    ApplicationRepository::new(state.db.as_ref())
        .find_by_id(id)
        .await?
        .ok_or_else(|| RepositoryError::not_found("Application"))?;

    let installations = InstalledAppRepository::new(state.db.as_ref())
        .find_installations(id)
        .await?;
    Ok(Json(
        installations
            .into_iter()
            .map(InstalledAppDto::from)
            .collect(),
    ))
}
