//! # Environment Synchronisation
//!
//! Mirrors each tenant's environments and installed apps from the admin API
//! into the local tables. A sync fetches everything first and then
//! reconciles in a single transaction, so readers never observe a half
//! applied snapshot.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use axum::http::StatusCode;
use metrics::{counter, histogram};
use reqwest::Url;
use sea_orm::{DatabaseConnection, DbErr};
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::crypto::CryptoKey;
use crate::db::{self, IsolationLevel};
use crate::error::{ApiError, RepositoryError, upstream_error};
use crate::models::tenant::Model as TenantModel;
use crate::repositories::environment::EnvironmentRecord;
use crate::repositories::installed_app::InstalledAppRecord;
use crate::repositories::{EnvironmentRepository, InstalledAppRepository, TenantRepository};
use crate::token_refresh::{RefreshError, TokenRefreshService};

const MAX_ERROR_BODY_CHARS: usize = 500;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("admin API rejected the access token")]
    Unauthorized,
    #[error("admin API rate limited the request")]
    RateLimited { retry_after_secs: Option<u64> },
    #[error("admin API returned HTTP {status}")]
    Http { status: u16, body: Option<String> },
    #[error("admin API request failed: {0}")]
    Transport(String),
    #[error("invalid admin API response: {0}")]
    InvalidResponse(String),
}

impl SourceError {
    pub fn is_retryable(&self) -> bool {
        match self {
            SourceError::RateLimited { .. } | SourceError::Transport(_) => true,
            SourceError::Http { status, .. } => *status >= 500,
            SourceError::Unauthorized | SourceError::InvalidResponse(_) => false,
        }
    }
}

/// Remote view of a tenant's environments and installed apps.
#[async_trait]
pub trait EnvironmentSource: Send + Sync {
    async fn list_environments(
        &self,
        token: &str,
        tenant: &TenantModel,
    ) -> Result<Vec<EnvironmentRecord>, SourceError>;

    async fn list_installed_apps(
        &self,
        token: &str,
        tenant: &TenantModel,
        environment: &str,
    ) -> Result<Vec<InstalledAppRecord>, SourceError>;
}

#[derive(Debug, Deserialize)]
struct ValueEnvelope<T> {
    value: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteEnvironment {
    name: String,
    #[serde(rename = "type")]
    environment_type: String,
    status: String,
    #[serde(default, alias = "webClientLoginUrl")]
    web_client_url: Option<String>,
    #[serde(default)]
    location_name: Option<String>,
    #[serde(default)]
    application_version: Option<String>,
    #[serde(default)]
    platform_version: Option<String>,
}

impl From<RemoteEnvironment> for EnvironmentRecord {
    fn from(env: RemoteEnvironment) -> Self {
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

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteApp {
    id: Uuid,
    name: String,
    version: String,
    publisher: String,
    #[serde(default, alias = "appType")]
    published_as: Option<String>,
    #[serde(default)]
    state: Option<String>,
}

impl From<RemoteApp> for InstalledAppRecord {
    fn from(app: RemoteApp) -> Self {
        Self {
            id: app.id,
            name: app.name,
            version: app.version,
            publisher: app.publisher,
            published_as: app.published_as,
            state: app.state,
        }
    }
}

/// [`EnvironmentSource`] over the admin center REST API.
#[derive(Debug, Clone)]
pub struct AdminCenterClient {
    http: reqwest::Client,
    base_url: String,
}

impl AdminCenterClient {
    pub fn new(base_url: impl Into<String>, timeout: std::time::Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, segments: &[&str]) -> Result<Url, SourceError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| SourceError::InvalidResponse(format!("invalid base url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| SourceError::InvalidResponse("base url cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_values<T: serde::de::DeserializeOwned>(
        &self,
        token: &str,
        url: Url,
    ) -> Result<Vec<T>, SourceError> {
        let resp = self
            .http
            .get(url)
            .bearer_auth(token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(SourceError::Unauthorized);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = resp
                .headers()
                .get("Retry-After")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            return Err(SourceError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SourceError::Http {
                status: status.as_u16(),
                body: Some(body)
                    .filter(|b| !b.is_empty())
                    .map(|b| b.chars().take(MAX_ERROR_BODY_CHARS).collect()),
            });
        }

        let envelope: ValueEnvelope<T> = resp
            .json()
            .await
            .map_err(|e| SourceError::InvalidResponse(e.to_string()))?;
        Ok(envelope.value)
    }
}

#[async_trait]
impl EnvironmentSource for AdminCenterClient {
    async fn list_environments(
        &self,
        token: &str,
        _tenant: &TenantModel,
    ) -> Result<Vec<EnvironmentRecord>, SourceError> {
        let url = self.url(&["applications", "businesscentral", "environments"])?;
        let envs: Vec<RemoteEnvironment> = self.get_values(token, url).await?;
        Ok(envs.into_iter().map(Into::into).collect())
    }

    async fn list_installed_apps(
        &self,
        token: &str,
        _tenant: &TenantModel,
        environment: &str,
    ) -> Result<Vec<InstalledAppRecord>, SourceError> {
        let url = self.url(&[
            "applications",
            "businesscentral",
            "environments",
            environment,
            "apps",
        ])?;
        let apps: Vec<RemoteApp> = self.get_values(token, url).await?;
        Ok(apps.into_iter().map(Into::into).collect())
    }
}

#[derive(Debug, Error)]
pub enum EnvironmentSyncError {
    #[error(transparent)]
    Token(#[from] RefreshError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<DbErr> for EnvironmentSyncError {
    fn from(error: DbErr) -> Self {
        Self::Repository(RepositoryError::database_error(error))
    }
}

impl From<EnvironmentSyncError> for ApiError {
    fn from(error: EnvironmentSyncError) -> Self {
        match error {
            EnvironmentSyncError::Token(err) => err.into(),
            EnvironmentSyncError::Source(SourceError::Http { status, body }) => {
                upstream_error("admin_api", Some(status), body)
            }
            EnvironmentSyncError::Source(SourceError::RateLimited { retry_after_secs }) => {
                let api = upstream_error("admin_api", Some(429), None);
                match retry_after_secs {
                    Some(seconds) => api.with_retry_after(seconds),
                    None => api,
                }
            }
            EnvironmentSyncError::Source(SourceError::Unauthorized) => {
                upstream_error("admin_api", Some(401), None)
            }
            EnvironmentSyncError::Source(err) => {
                upstream_error("admin_api", None, Some(err.to_string()))
            }
            EnvironmentSyncError::Repository(err) => err.into(),
        }
    }
}

/// Counts of what one tenant sync changed.
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize, utoipa::ToSchema)]
pub struct SyncReport {
    pub tenant_id: Uuid,
    pub environments_upserted: u64,
    pub environments_removed: u64,
    pub apps_upserted: u64,
    pub apps_removed: u64,
}

/// Result of [`EnvironmentSyncService::sync_all`].
#[derive(Debug, Default)]
pub struct SyncAllReport {
    pub succeeded: Vec<SyncReport>,
    pub failed: Vec<(Uuid, String)>,
}

#[derive(Clone)]
pub struct EnvironmentSyncService {
    db: Arc<DatabaseConnection>,
    crypto_key: CryptoKey,
    token_refresh: TokenRefreshService,
    source: Arc<dyn EnvironmentSource>,
}

impl EnvironmentSyncService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        crypto_key: CryptoKey,
        token_refresh: TokenRefreshService,
        source: Arc<dyn EnvironmentSource>,
    ) -> Self {
        Self {
            db,
            crypto_key,
            token_refresh,
            source,
        }
    }

    /// Fetches the tenant's environments and apps and reconciles the local
    /// copy: remote rows are upserted, local rows missing remotely deleted.
    #[instrument(skip_all, fields(tenant_id = %tenant_id))]
    pub async fn sync_tenant(&self, tenant_id: Uuid) -> Result<SyncReport, EnvironmentSyncError> {
        let started = Instant::now();

        let tenant = TenantRepository::new(self.db.as_ref(), &self.crypto_key)
            .find_by_id(tenant_id)
            .await?
            .ok_or_else(|| RepositoryError::not_found("Tenant"))?;

        let mut token = self.token_refresh.ensure_fresh_token(tenant_id).await?;
        let environments = match self.source.list_environments(&token, &tenant).await {
            Err(SourceError::Unauthorized) => {
                warn!("Admin API rejected cached token; forcing a refresh");
                self.token_refresh.force_refresh(tenant_id).await?;
                token = self.token_refresh.ensure_fresh_token(tenant_id).await?;
                self.source.list_environments(&token, &tenant).await?
            }
            other => other?,
        };

        let mut snapshot = Vec::with_capacity(environments.len());
        for environment in environments {
            let apps = self
                .source
                .list_installed_apps(&token, &tenant, &environment.name)
                .await?;
            snapshot.push((environment, apps));
        }

        let report = self.apply_snapshot(tenant_id, snapshot).await?;

        counter!("environment_sync_success_total").increment(1);
        histogram!("environment_sync_duration_ms").record(started.elapsed().as_secs_f64() * 1_000.0);
        info!(
            environments_upserted = report.environments_upserted,
            environments_removed = report.environments_removed,
            apps_upserted = report.apps_upserted,
            apps_removed = report.apps_removed,
            "Environment sync completed"
        );

        Ok(report)
    }

    async fn apply_snapshot(
        &self,
        tenant_id: Uuid,
        snapshot: Vec<(EnvironmentRecord, Vec<InstalledAppRecord>)>,
    ) -> Result<SyncReport, EnvironmentSyncError> {
        let txn = db::begin(&self.db, IsolationLevel::RepeatableRead).await?;
        let environments = EnvironmentRepository::new(&txn);
        let apps = InstalledAppRepository::new(&txn);

        let mut report = SyncReport {
            tenant_id,
            ..SyncReport::default()
        };
        let mut kept_environments = Vec::with_capacity(snapshot.len());

        for (environment, installed) in snapshot {
            let stored = environments.upsert(tenant_id, environment).await?;
            report.environments_upserted += 1;

            let mut kept_apps = Vec::with_capacity(installed.len());
            for app in installed {
                kept_apps.push(app.id);
                apps.upsert(tenant_id, &stored.name, app).await?;
                report.apps_upserted += 1;
            }
            report.apps_removed += apps
                .delete_missing(tenant_id, &stored.name, &kept_apps)
                .await?;
            kept_environments.push(stored.name);
        }

        // Cascades to the apps of removed environments.
        report.environments_removed = environments
            .delete_missing(tenant_id, &kept_environments)
            .await?;

        txn.commit().await?;
        Ok(report)
    }

    /// Syncs every tenant with client credentials. Failures are logged per
    /// tenant and do not stop the run.
    #[instrument(skip_all)]
    pub async fn sync_all(&self) -> Result<SyncAllReport, RepositoryError> {
        let tenants = TenantRepository::new(self.db.as_ref(), &self.crypto_key)
            .list_with_credentials()
            .await?;

        let mut summary = SyncAllReport::default();
        for tenant in tenants {
            match self.sync_tenant(tenant.id).await {
                Ok(report) => summary.succeeded.push(report),
                Err(err) => {
                    let retryable = matches!(&err, EnvironmentSyncError::Source(source) if source.is_retryable());
                    warn!(tenant_id = %tenant.id, error = %err, retryable, "Environment sync failed");
                    counter!("environment_sync_failure_total").increment(1);
                    summary.failed.push((tenant.id, err.to_string()));
                }
            }
        }

        info!(
            succeeded = summary.succeeded.len(),
            failed = summary.failed.len(),
            "Environment sync run finished"
        );
        Ok(summary)
    }
}
