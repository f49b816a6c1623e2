//! # Tenants API Handlers
//!
//! Tenant connection management, on-demand token refresh, environment sync
//! and read access to the synchronised environments and installed apps.

use axum::{extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::extract::{Json, Path};
use super::types::{double_option, rfc3339};
use crate::auth::OperatorAuth;
use crate::environment_sync::SyncReport;
use crate::error::{ApiError, RepositoryError};
use crate::models::environment::Model as EnvironmentModel;
use crate::models::installed_app::Model as InstalledAppModel;
use crate::models::tenant::Model as TenantModel;
use crate::repositories::tenant::{CreateTenantRequest, UpdateTenantRequest};
use crate::repositories::{EnvironmentRepository, InstalledAppRepository, TenantRepository};
use crate::server::AppState;

/// Tenant as exposed by the API; secrets are reported as `has_*` flags
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TenantDto {
    #[schema(value_type = String, example = "550e8400-e29b-41d4-a716-446655440000")]
    pub id: Uuid,
    #[schema(value_type = String)]
    pub customer_id: Uuid,
    pub description: Option<String>,
    pub created_at: String,
    pub modified_at: String,
    pub connection_id: Option<String>,
    #[schema(example = "client_credentials")]
    pub grant_type: String,
    pub client_id: Option<String>,
    pub scope: Option<String>,
    /// Directory (tenant) id substituted into the token endpoint
    pub auth_context: Option<String>,
    pub has_client_secret: bool,
    pub has_token: bool,
    pub token_expires_at: Option<String>,
}

impl From<TenantModel> for TenantDto {
    fn from(tenant: TenantModel) -> Self {
        Self {
            id: tenant.id,
            customer_id: tenant.customer_id,
            created_at: rfc3339(&tenant.created_at),
            modified_at: rfc3339(&tenant.modified_at),
            has_client_secret: tenant.client_secret.is_some(),
            has_token: tenant.token.is_some(),
            token_expires_at: tenant.token_expires_at.as_ref().map(rfc3339),
            description: tenant.description,
            connection_id: tenant.connection_id,
            grant_type: tenant.grant_type,
            client_id: tenant.client_id,
            scope: tenant.scope,
            auth_context: tenant.auth_context,
        }
    }
}

#[derive(Deserialize, Serialize, ToSchema)]
pub struct CreateTenantDto {
    #[schema(value_type = String)]
    pub customer_id: Uuid,
    pub description: Option<String>,
    pub connection_id: Option<String>,
    /// Defaults to `client_credentials`
    pub grant_type: Option<String>,
    pub client_id: Option<String>,
    /// Stored encrypted, never returned
    pub client_secret: Option<String>,
    pub scope: Option<String>,
    pub auth_context: Option<String>,
}

impl std::fmt::Debug for CreateTenantDto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreateTenantDto")
            .field("customer_id", &self.customer_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

/// Partial update; `null` clears a nullable field. Changing any credential
/// field discards the cached access token.
#[derive(Default, Deserialize, Serialize, ToSchema)]
pub struct UpdateTenantDto {
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub connection_id: Option<Option<String>>,
    pub grant_type: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub client_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub client_secret: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub scope: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub auth_context: Option<Option<String>>,
}

impl std::fmt::Debug for UpdateTenantDto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateTenantDto")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

/// Per-value count used by the tenant detail breakdowns
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ValueCount {
    pub value: Option<String>,
    pub count: i64,
}

/// Tenant with environment and installed-app breakdowns
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TenantDetailDto {
    #[serde(flatten)]
    pub tenant: TenantDto,
    pub environments_by_status: Vec<ValueCount>,
    pub installed_apps_by_state: Vec<ValueCount>,
}

/// Outcome of an on-demand token refresh; the token itself is not returned
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenStatusDto {
    #[schema(value_type = String)]
    pub tenant_id: Uuid,
    pub has_token: bool,
    pub token_expires_at: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EnvironmentDto {
    #[schema(example = "Production")]
    pub name: String,
    #[serde(rename = "type")]
    #[schema(example = "Production")]
    pub environment_type: String,
    #[schema(example = "Active")]
    pub status: String,
    pub web_client_url: Option<String>,
    pub location_name: Option<String>,
    pub application_version: Option<String>,
    pub platform_version: Option<String>,
}

impl From<EnvironmentModel> for EnvironmentDto {
    fn from(env: EnvironmentModel) -> Self {
        Self {
            name: env.name,
            environment_type: env.environment_type,
            status: env.status,
            web_client_url: env.web_client_url,
            location_name: env.location_name,
            application_version: env.application_version,
            platform_version: env.platform_version,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct InstalledAppDto {
    #[schema(value_type = String)]
    pub tenant_id: Uuid,
    pub environment_name: String,
    #[schema(value_type = String)]
    pub id: Uuid,
    pub name: String,
    pub version: String,
    pub publisher: String,
    pub published_as: Option<String>,
    pub state: Option<String>,
}

impl From<InstalledAppModel> for InstalledAppDto {
    fn from(app: InstalledAppModel) -> Self {
        Self {
            tenant_id: app.tenant_id,
            environment_name: app.environment_name,
            id: app.id,
            name: app.name,
            version: app.version,
            publisher: app.publisher,
            published_as: app.published_as,
            state: app.state,
        }
    }
}

async fn load_tenant(state: &AppState, id: Uuid) -> Result<TenantModel, ApiError> {
    TenantRepository::new(state.db.as_ref(), &state.crypto_key)
        .find_by_id(id)
        .await?
        .ok_or_else(|| RepositoryError::not_found("Tenant").into())
}

/// Create a tenant connection for a customer
#[utoipa::path(
    post,
    path = "/api/v1/tenants",
    security(("bearer_auth" = [])),
    request_body = CreateTenantDto,
    responses(
        (status = 201, description = "Tenant created", body = TenantDto, headers(
            ("Location", description = "URL of the created tenant")
        )),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 422, description = "Customer does not exist", body = ApiError)
    ),
    tag = "tenants"
)]
pub async fn create_tenant(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Json(request): Json<CreateTenantDto>,
) -> Result<(StatusCode, [(&'static str, String); 1], Json<TenantDto>), ApiError> {
    let tenant = TenantRepository::new(state.db.as_ref(), &state.crypto_key)
        .create(CreateTenantRequest {
            customer_id: request.customer_id,
            description: request.description,
            connection_id: request.connection_id,
            grant_type: request.grant_type,
            client_id: request.client_id,
            client_secret: request.client_secret,
            scope: request.scope,
            auth_context: request.auth_context,
        })
        .await?;

    tracing::info!(tenant_id = %tenant.id, customer_id = %tenant.customer_id, "Created tenant");
    let location = format!("/api/v1/tenants/{}", tenant.id);
    Ok((StatusCode::CREATED, [("Location", location)], Json(tenant.into())))
}

/// Get a tenant with its environment and app breakdowns
#[utoipa::path(
    get,
    path = "/api/v1/tenants/{id}",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Tenant UUID")),
    responses(
        (status = 200, description = "Tenant", body = TenantDetailDto),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Tenant not found", body = ApiError)
    ),
    tag = "tenants"
)]
pub async fn get_tenant(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<Uuid>,
) -> Result<Json<TenantDetailDto>, ApiError> {
    let tenant = load_tenant(&state, id).await?;

    let environments_by_status = EnvironmentRepository::new(state.db.as_ref())
        .count_by_status(id)
        .await?
        .into_iter()
        .map(|(status, count)| ValueCount {
            value: Some(status),
            count,
        })
        .collect();
    let installed_apps_by_state = InstalledAppRepository::new(state.db.as_ref())
        .count_by_state(id)
        .await?
        .into_iter()
        .map(|(value, count)| ValueCount { value, count })
        .collect();

    Ok(Json(TenantDetailDto {
        tenant: tenant.into(),
        environments_by_status,
        installed_apps_by_state,
    }))
}

/// Update a tenant
#[utoipa::path(
    patch,
    path = "/api/v1/tenants/{id}",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Tenant UUID")),
    request_body = UpdateTenantDto,
    responses(
        (status = 200, description = "Updated tenant", body = TenantDto),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Tenant not found", body = ApiError)
    ),
    tag = "tenants"
)]
pub async fn update_tenant(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateTenantDto>,
) -> Result<Json<TenantDto>, ApiError> {
    let tenant = TenantRepository::new(state.db.as_ref(), &state.crypto_key)
        .update(
            id,
            UpdateTenantRequest {
                description: request.description,
                connection_id: request.connection_id,
                grant_type: request.grant_type,
                client_id: request.client_id,
                client_secret: request.client_secret,
                scope: request.scope,
                auth_context: request.auth_context,
            },
        )
        .await?;
    Ok(Json(tenant.into()))
}

/// Delete a tenant with its environments and installed apps
#[utoipa::path(
    delete,
    path = "/api/v1/tenants/{id}",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Tenant UUID")),
    responses(
        (status = 204, description = "Tenant deleted"),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Tenant not found", body = ApiError)
    ),
    tag = "tenants"
)]
pub async fn delete_tenant(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    TenantRepository::new(state.db.as_ref(), &state.crypto_key)
        .delete(id)
        .await?;
    tracing::info!(tenant_id = %id, "Deleted tenant");
    Ok(StatusCode::NO_CONTENT)
}

/// Request a new access token for the tenant now
#[utoipa::path(
    post,
    path = "/api/v1/tenants/{id}/token",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Tenant UUID")),
    responses(
        (status = 200, description = "Token refreshed", body = TokenStatusDto),
        (status = 400, description = "Tenant has no client credentials", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Tenant not found", body = ApiError),
        (status = 502, description = "Token endpoint rejected the request", body = ApiError)
    ),
    tag = "tenants"
)]
pub async fn refresh_tenant_token(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<Uuid>,
) -> Result<Json<TokenStatusDto>, ApiError> {
    let tenant = state.token_refresh.force_refresh(id).await?;
    Ok(Json(TokenStatusDto {
        tenant_id: tenant.id,
        has_token: tenant.token.is_some(),
        token_expires_at: tenant.token_expires_at.as_ref().map(rfc3339),
    }))
}

/// Synchronise the tenant's environments and installed apps
#[utoipa::path(
    post,
    path = "/api/v1/tenants/{id}/sync",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Tenant UUID")),
    responses(
        (status = 200, description = "Sync completed", body = SyncReport),
        (status = 400, description = "Tenant has no client credentials", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Tenant not found", body = ApiError),
        (status = 502, description = "Upstream failure", body = ApiError)
    ),
    tag = "tenants"
)]
pub async fn sync_tenant(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<Uuid>,
) -> Result<Json<SyncReport>, ApiError> {
    Ok(Json(state.environment_sync.sync_tenant(id).await?))
}

/// Environments of a tenant
#[utoipa::path(
    get,
    path = "/api/v1/tenants/{id}/environments",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Tenant UUID")),
    responses(
        (status = 200, description = "Environments ordered by name", body = [EnvironmentDto]),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Tenant not found", body = ApiError)
    ),
    tag = "tenants"
)]
pub async fn list_environments(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<EnvironmentDto>>, ApiError> {
    load_tenant(&state, id).await?;
    let environments = EnvironmentRepository::new(state.db.as_ref())
        .list_by_tenant(id)
        .await?;
    Ok(Json(environments.into_iter().map(EnvironmentDto::from).collect()))
}

/// Apps installed in one environment of a tenant
#[utoipa::path(
    get,
    path = "/api/v1/tenants/{id}/environments/{name}/apps",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Tenant UUID"),
        ("name" = String, Path, description = "Environment name")
    ),
    responses(
        (status = 200, description = "Installed apps ordered by name", body = [InstalledAppDto]),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Environment not found", body = ApiError)
    ),
    tag = "tenants"
)]
pub async fn list_installed_apps(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path((id, name)): Path<(Uuid, String)>,
) -> Result<Json<Vec<InstalledAppDto>>, ApiError> {
    EnvironmentRepository::new(state.db.as_ref())
        .find_by_id(id, &name)
        .await?
        .ok_or_else(|| RepositoryError::not_found("Environment"))?;

    let apps = InstalledAppRepository::new(state.db.as_ref())
        .list_by_environment(id, &name)
        .await?;
    Ok(Json(apps.into_iter().map(InstalledAppDto::from).collect()))
}
