//! # Token Refresh Service
//!
//! Keeps every client-credential tenant supplied with a valid access token.
//! A background loop periodically refreshes tokens nearing expiry, and
//! [`TokenRefreshService::ensure_fresh_token`] serves callers that need a
//! token right now.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use axum::http::StatusCode;
use chrono::{DateTime, Duration, Utc};
use metrics::{counter, gauge, histogram};
use rand::Rng;
use sea_orm::DatabaseConnection;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::{Duration as TokioDuration, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::crypto::CryptoKey;
use crate::error::{ApiError, RepositoryError, upstream_error};
use crate::models::tenant::Model as TenantModel;
use crate::repositories::TenantRepository;

/// A token handed out on demand must stay valid at least this long.
const MIN_REMAINING_VALIDITY_SECONDS: i64 = 60;
/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECONDS: i64 = 3600;
/// Upper bound on a granted lifetime; larger `expires_in` values are clamped.
const MAX_EXPIRES_IN_SECONDS: i64 = 365 * 24 * 60 * 60;
const MAX_ERROR_BODY_CHARS: usize = 500;

/// OAuth2 client-credentials token request.
#[derive(Clone)]
pub struct ClientCredentialsRequest {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub scope: Option<String>,
}

impl std::fmt::Debug for ClientCredentialsRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentialsRequest")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("scope", &self.scope)
            .finish()
    }
}

/// Access token returned by the token endpoint.
#[derive(Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub expires_in: Option<i64>,
}

impl TokenGrant {
    pub fn expires_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::seconds(
            self.expires_in
                .filter(|secs| *secs > 0)
                .map_or(DEFAULT_EXPIRES_IN_SECONDS, |secs| secs.min(MAX_EXPIRES_IN_SECONDS)),
        )
    }
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum TokenError {
    /// The endpoint answered with an OAuth error document
    #[error("token endpoint returned {error} (HTTP {status})")]
    OAuth {
        status: u16,
        error: String,
        description: Option<String>,
    },
    #[error("token endpoint returned HTTP {status}")]
    Http {
        status: u16,
        body: Option<String>,
        retry_after: Option<u64>,
    },
    #[error("token endpoint request failed: {0}")]
    Transport(String),
    #[error("invalid token endpoint response: {0}")]
    InvalidResponse(String),
    #[error("invalid token endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Classification of token refresh errors for appropriate handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshErrorClassification {
    /// Credentials are wrong or revoked; retrying will not help
    Permanent,
    /// Temporary failures that can be retried (e.g., network issues)
    Transient,
    /// Rate limiting errors that should trigger backoff
    RateLimited,
}

/// Classifies an OAuth error code.
pub fn classify_oauth_error(code: &str) -> RefreshErrorClassification {
    match code.to_ascii_lowercase().as_str() {
        "invalid_client" | "invalid_grant" | "unauthorized_client" | "unsupported_grant_type"
        | "invalid_scope" | "access_denied" | "invalid_request" => {
            RefreshErrorClassification::Permanent
        }
        "temporarily_unavailable" | "slow_down" | "rate_limit_exceeded" | "too_many_requests" => {
            RefreshErrorClassification::RateLimited
        }
        _ => RefreshErrorClassification::Transient,
    }
}

fn classify_status(status: u16) -> RefreshErrorClassification {
    match status {
        429 => RefreshErrorClassification::RateLimited,
        400..=499 => RefreshErrorClassification::Permanent,
        _ => RefreshErrorClassification::Transient,
    }
}

impl TokenError {
    pub fn classification(&self) -> RefreshErrorClassification {
        match self {
            TokenError::OAuth { status, error, .. } => match classify_oauth_error(error) {
                RefreshErrorClassification::Transient => classify_status(*status),
                other => other,
            },
            TokenError::Http { status, .. } => classify_status(*status),
            TokenError::InvalidEndpoint(_) => RefreshErrorClassification::Permanent,
            TokenError::Transport(_) | TokenError::InvalidResponse(_) => {
                RefreshErrorClassification::Transient
            }
        }
    }
}

/// Source of client-credential access tokens.
#[async_trait]
pub trait TokenClient: Send + Sync {
    async fn acquire(&self, request: &ClientCredentialsRequest) -> Result<TokenGrant, TokenError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OAuthErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// `expires_in` arrives as a number from most providers and as a string
/// from some.
fn parse_expires_in(value: Option<&serde_json::Value>) -> Option<i64> {
    match value? {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn truncate(body: String) -> String {
    if body.chars().count() > MAX_ERROR_BODY_CHARS {
        body.chars().take(MAX_ERROR_BODY_CHARS).collect()
    } else {
        body
    }
}

/// Token client posting the client-credentials form over HTTPS.
#[derive(Debug, Clone)]
pub struct HttpTokenClient {
    http: reqwest::Client,
}

impl HttpTokenClient {
    pub fn new(timeout: std::time::Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { http }
    }
}

impl Default for HttpTokenClient {
    fn default() -> Self {
        Self::new(std::time::Duration::from_secs(30))
    }
}

#[async_trait]
impl TokenClient for HttpTokenClient {
    async fn acquire(&self, request: &ClientCredentialsRequest) -> Result<TokenGrant, TokenError> {
        let mut form = vec![
            ("grant_type", "client_credentials"),
            ("client_id", request.client_id.as_str()),
            ("client_secret", request.client_secret.as_str()),
        ];
        if let Some(scope) = request.scope.as_deref() {
            form.push(("scope", scope));
        }

        let resp = self
            .http
            .post(&request.token_url)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| TokenError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            let body: TokenResponse = resp
                .json()
                .await
                .map_err(|e| TokenError::InvalidResponse(e.to_string()))?;
            if body.access_token.is_empty() {
                return Err(TokenError::InvalidResponse(
                    "access_token is empty".to_string(),
                ));
            }
            return Ok(TokenGrant {
                expires_in: parse_expires_in(body.expires_in.as_ref()),
                access_token: body.access_token,
            });
        }

        let retry_after = resp
            .headers()
            .get("Retry-After")
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());
        let body = resp.text().await.unwrap_or_default();

        match serde_json::from_str::<OAuthErrorResponse>(&body) {
            Ok(oauth) => Err(TokenError::OAuth {
                status: status.as_u16(),
                error: oauth.error,
                description: oauth.error_description,
            }),
            Err(_) => Err(TokenError::Http {
                status: status.as_u16(),
                body: Some(body).filter(|b| !b.is_empty()).map(truncate),
                retry_after,
            }),
        }
    }
}

/// Substitutes `{auth_context}` into the token endpoint template.
pub fn token_endpoint(template: &str, auth_context: &str) -> Result<String, TokenError> {
    let auth_context = auth_context.trim();
    if auth_context.is_empty()
        || !auth_context
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_'))
    {
        return Err(TokenError::InvalidEndpoint(format!(
            "auth_context '{auth_context}' contains unsupported characters"
        )));
    }

    let endpoint = template.replace("{auth_context}", auth_context);
    url::Url::parse(&endpoint).map_err(|e| TokenError::InvalidEndpoint(e.to_string()))?;
    Ok(endpoint)
}

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("tenant {0} not found")]
    TenantNotFound(Uuid),
    #[error("tenant {0} is not configured for the client credentials grant")]
    NotConfigured(Uuid),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<RefreshError> for ApiError {
    fn from(error: RefreshError) -> Self {
        match error {
            RefreshError::TenantNotFound(_) => RepositoryError::not_found("Tenant").into(),
            RefreshError::NotConfigured(_) => {
                ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", error.to_string())
            }
            RefreshError::Token(TokenError::OAuth {
                status,
                error,
                description,
            }) => upstream_error(
                "token_endpoint",
                Some(status),
                Some(match description {
                    Some(description) => format!("{error}: {description}"),
                    None => error,
                }),
            ),
            RefreshError::Token(TokenError::Http {
                status,
                body,
                retry_after,
            }) => {
                let api = upstream_error("token_endpoint", Some(status), body);
                match retry_after {
                    Some(seconds) => api.with_retry_after(seconds),
                    None => api,
                }
            }
            RefreshError::Token(err) => upstream_error("token_endpoint", None, Some(err.to_string())),
            RefreshError::Repository(err) => err.into(),
        }
    }
}

/// Outcome counts of one background tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub due: usize,
    pub refreshed: usize,
    pub skipped: usize,
    pub failed: usize,
}

enum RefreshOutcome {
    Refreshed(String),
    StillValid(String),
}

/// Background token refresh service
#[derive(Clone)]
pub struct TokenRefreshService {
    config: Arc<AppConfig>,
    db: Arc<DatabaseConnection>,
    crypto_key: CryptoKey,
    client: Arc<dyn TokenClient>,
    /// Per-tenant locks providing single-flight refreshes
    tenant_locks: Arc<Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
}

impl TokenRefreshService {
    pub fn new(
        config: Arc<AppConfig>,
        db: Arc<DatabaseConnection>,
        crypto_key: CryptoKey,
        client: Arc<dyn TokenClient>,
    ) -> Self {
        Self {
            config,
            db,
            crypto_key,
            client,
            tenant_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn repo(&self) -> TenantRepository<'_, DatabaseConnection> {
        TenantRepository::new(self.db.as_ref(), &self.crypto_key)
    }

    /// Run the token refresh loop until the provided shutdown token fires
    #[instrument(skip_all)]
    pub async fn run(&self, shutdown: CancellationToken) {
        info!("Starting token refresh service");
        let tick_interval = TokioDuration::from_secs(self.config.token_refresh.tick_seconds);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Token refresh service shutdown requested");
                    break;
                }
                _ = sleep(tick_interval) => {
                    let tick_started = Instant::now();
                    if let Err(err) = self.tick().await {
                        error!(error = ?err, "Token refresh tick failed");
                    }
                    histogram!("token_refresh_tick_duration_ms")
                        .record(tick_started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("Token refresh service stopped");
    }

    /// Refreshes every tenant whose token is missing or expires within the
    /// configured lead time.
    #[instrument(skip_all)]
    pub async fn tick(&self) -> Result<TickReport, RepositoryError> {
        let cutoff = Utc::now() + Duration::seconds(self.config.token_refresh.lead_time_seconds as i64);
        let due = self
            .repo()
            .find_due_for_token_refresh(cutoff.fixed_offset())
            .await?;

        let mut report = TickReport {
            due: due.len(),
            ..TickReport::default()
        };

        info!(
            due_tenants = report.due,
            lead_time_seconds = self.config.token_refresh.lead_time_seconds,
            "Found tenants due for token refresh"
        );
        gauge!("token_refresh_tenants_due_gauge").set(report.due as f64);

        let semaphore = Arc::new(Semaphore::new(
            self.config.token_refresh.concurrency as usize,
        ));
        let mut handles = Vec::with_capacity(due.len());

        for tenant in due {
            let semaphore = semaphore.clone();
            let service = self.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let jitter = service.compute_jitter();
                if !jitter.is_zero() {
                    debug!(tenant_id = %tenant.id, jitter_ms = jitter.as_millis(), "Applying jitter before token refresh");
                    sleep(jitter).await;
                }
                service.refresh_if_needed(tenant.id, cutoff).await
            }));
        }

        for handle in handles {
            match handle.await {
                Ok(Ok(RefreshOutcome::Refreshed(_))) => report.refreshed += 1,
                Ok(Ok(RefreshOutcome::StillValid(_))) => report.skipped += 1,
                Ok(Err(err)) => {
                    report.failed += 1;
                    warn!(error = %err, "Tenant token refresh failed");
                }
                Err(err) => {
                    report.failed += 1;
                    error!(error = ?err, "Refresh task panicked or was cancelled");
                    counter!("token_refresh_task_panics_total").increment(1);
                }
            }
        }

        counter!("token_refresh_success_total").increment(report.refreshed as u64);
        counter!("token_refresh_failure_total").increment(report.failed as u64);

        debug!(
            due = report.due,
            refreshed = report.refreshed,
            skipped = report.skipped,
            failed = report.failed,
            "Token refresh tick completed"
        );

        Ok(report)
    }

    /// Returns a decrypted access token for the tenant that stays valid for at
    /// least a minute, refreshing it first when necessary. Concurrent callers
    /// for the same tenant share a single refresh.
    #[instrument(skip_all, fields(tenant_id = %tenant_id))]
    pub async fn ensure_fresh_token(&self, tenant_id: Uuid) -> Result<String, RefreshError> {
        let valid_until = Utc::now() + Duration::seconds(MIN_REMAINING_VALIDITY_SECONDS);
        match self.refresh_if_needed(tenant_id, valid_until).await? {
            RefreshOutcome::StillValid(token) => Ok(token),
            RefreshOutcome::Refreshed(token) => {
                counter!("token_refresh_on_demand_total").increment(1);
                Ok(token)
            }
        }
    }

    /// Forces a refresh regardless of the cached token's expiry.
    #[instrument(skip_all, fields(tenant_id = %tenant_id))]
    pub async fn force_refresh(&self, tenant_id: Uuid) -> Result<TenantModel, RefreshError> {
        self.with_tenant_lock(tenant_id, async {
            let tenant = self
                .repo()
                .find_by_id(tenant_id)
                .await?
                .ok_or(RefreshError::TenantNotFound(tenant_id))?;
            let (_, tenant) = self.refresh_tenant(&tenant).await?;
            Ok::<_, RefreshError>(tenant)
        })
        .await
    }

    /// Runs `work` while holding the tenant's lock. The map entry is dropped
    /// again once no other caller holds or waits on it.
    async fn with_tenant_lock<T>(&self, tenant_id: Uuid, work: impl Future<Output = T>) -> T {
        let lock = {
            let mut locks = self.tenant_locks.lock().await;
            locks
                .entry(tenant_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        let result = {
            let _guard = lock.lock().await;
            work.await
        };

        let mut locks = self.tenant_locks.lock().await;
        // One reference lives in the map, one here.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&tenant_id);
        }
        result
    }

    /// Holds the tenant lock, re-reads the tenant and refreshes only if its
    /// token does not outlive `valid_until`.
    async fn refresh_if_needed(
        &self,
        tenant_id: Uuid,
        valid_until: DateTime<Utc>,
    ) -> Result<RefreshOutcome, RefreshError> {
        self.with_tenant_lock(tenant_id, async {
            let repo = self.repo();
            let tenant = repo
                .find_by_id(tenant_id)
                .await?
                .ok_or(RefreshError::TenantNotFound(tenant_id))?;

            if let Some(expires_at) = tenant.token_expires_at
                && expires_at.with_timezone(&Utc) > valid_until
                && let Some(token) = repo.decrypt_token(&tenant)?
            {
                return Ok(RefreshOutcome::StillValid(token));
            }

            let (token, _) = self.refresh_tenant(&tenant).await?;
            Ok::<_, RefreshError>(RefreshOutcome::Refreshed(token))
        })
        .await
    }

    /// Requests a new token for `tenant` and stores it. Callers hold the
    /// tenant lock.
    async fn refresh_tenant(
        &self,
        tenant: &TenantModel,
    ) -> Result<(String, TenantModel), RefreshError> {
        let started = Instant::now();
        counter!("token_refresh_attempts_total").increment(1);

        let repo = self.repo();
        let credentials = repo
            .decrypt_credentials(tenant)?
            .ok_or(RefreshError::NotConfigured(tenant.id))?;

        let request = ClientCredentialsRequest {
            token_url: token_endpoint(
                &self.config.token_endpoint_template,
                &credentials.auth_context,
            )?,
            client_id: credentials.client_id,
            client_secret: credentials.client_secret,
            scope: credentials.scope,
        };

        let grant = match self.client.acquire(&request).await {
            Ok(grant) => grant,
            Err(err) => {
                let labels = vec![("tenant_id", tenant.id.to_string())];
                match err.classification() {
                    RefreshErrorClassification::Permanent => {
                        error!(tenant_id = %tenant.id, error = %err, "Permanent token refresh failure; check the tenant credentials");
                        counter!("token_refresh_permanent_failure_total", &labels).increment(1);
                    }
                    RefreshErrorClassification::RateLimited => {
                        warn!(tenant_id = %tenant.id, error = %err, "Rate limited during token refresh");
                        counter!("token_refresh_rate_limited_total", &labels).increment(1);
                    }
                    RefreshErrorClassification::Transient => {
                        warn!(tenant_id = %tenant.id, error = %err, "Transient token refresh failure - will retry later");
                        counter!("token_refresh_transient_failure_total", &labels).increment(1);
                    }
                }
                return Err(err.into());
            }
        };

        let expires_at = grant.expires_at(Utc::now());
        let updated = repo
            .store_token(tenant.id, &grant.access_token, expires_at.fixed_offset())
            .await?;

        let elapsed = started.elapsed();
        histogram!("token_refresh_latency_ms").record(elapsed.as_secs_f64() * 1_000.0);
        info!(
            tenant_id = %tenant.id,
            expires_at = %expires_at,
            refresh_duration_ms = elapsed.as_millis(),
            "Refreshed tenant access token"
        );

        Ok((grant.access_token, updated))
    }

    /// Random delay in `[0, lead_time * jitter_factor]`.
    fn compute_jitter(&self) -> TokioDuration {
        let cfg = &self.config.token_refresh;
        if cfg.jitter_factor <= 0.0 {
            return TokioDuration::ZERO;
        }

        let max_delay_ms = (cfg.lead_time_seconds as f64 * cfg.jitter_factor * 1_000.0) as u64;
        if max_delay_ms == 0 {
            return TokioDuration::ZERO;
        }
        TokioDuration::from_millis(rand::thread_rng().gen_range(0..=max_delay_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oauth_codes_are_classified() {
        assert_eq!(
            classify_oauth_error("invalid_client"),
            RefreshErrorClassification::Permanent
        );
        assert_eq!(
            classify_oauth_error("INVALID_GRANT"),
            RefreshErrorClassification::Permanent
        );
        assert_eq!(
            classify_oauth_error("temporarily_unavailable"),
            RefreshErrorClassification::RateLimited
        );
        assert_eq!(
            classify_oauth_error("server_error"),
            RefreshErrorClassification::Transient
        );
    }

    #[test]
    fn token_errors_fall_back_to_status_classification() {
        let rate_limited = TokenError::Http {
            status: 429,
            body: None,
            retry_after: Some(5),
        };
        assert_eq!(
            rate_limited.classification(),
            RefreshErrorClassification::RateLimited
        );

        let unavailable = TokenError::OAuth {
            status: 503,
            error: "server_error".into(),
            description: None,
        };
        assert_eq!(
            unavailable.classification(),
            RefreshErrorClassification::Transient
        );

        assert_eq!(
            TokenError::Transport("connection reset".into()).classification(),
            RefreshErrorClassification::Transient
        );
    }

    #[test]
    fn endpoint_template_substitution() {
        let url = token_endpoint(
            "https://login.example.com/{auth_context}/oauth2/v2.0/token",
            "contoso.onmicrosoft.com",
        )
        .unwrap();
        assert_eq!(
            url,
            "https://login.example.com/contoso.onmicrosoft.com/oauth2/v2.0/token"
        );

        assert!(matches!(
            token_endpoint("https://login.example.com/{auth_context}/token", "../evil"),
            Err(TokenError::InvalidEndpoint(_))
        ));
        assert!(token_endpoint("https://login.example.com/{auth_context}/token", " ").is_err());
    }

    #[test]
    fn expires_in_accepts_numbers_and_strings() {
        assert_eq!(parse_expires_in(Some(&serde_json::json!(3599))), Some(3599));
        assert_eq!(parse_expires_in(Some(&serde_json::json!("120"))), Some(120));
        assert_eq!(parse_expires_in(Some(&serde_json::json!(null))), None);
        assert_eq!(parse_expires_in(None), None);
    }

    #[test]
    fn grant_expiry_defaults_to_an_hour() {
        let now = Utc::now();
        let grant = TokenGrant {
            access_token: "t".into(),
            expires_in: None,
        };
        assert_eq!(grant.expires_at(now), now + Duration::seconds(3600));
        assert!(!format!("{grant:?}").contains("\"t\""));
    }

    #[test]
    fn oversized_expires_in_is_clamped() {
        let now = Utc::now();
        let grant = TokenGrant {
            access_token: "t".into(),
            expires_in: parse_expires_in(Some(&serde_json::json!(i64::MAX))),
        };
        assert_eq!(
            grant.expires_at(now),
            now + Duration::seconds(MAX_EXPIRES_IN_SECONDS)
        );
    }

    #[test]
    fn oauth_failures_map_to_bad_gateway() {
        let api: ApiError = RefreshError::Token(TokenError::OAuth {
            status: 401,
            error: "invalid_client".into(),
            description: Some("bad secret".into()),
        })
        .into();
        assert_eq!(api.status, StatusCode::BAD_GATEWAY);
        assert_eq!(api.code.as_ref(), "UPSTREAM_ERROR");

        let api: ApiError = RefreshError::TenantNotFound(Uuid::new_v4()).into();
        assert_eq!(api.status, StatusCode::NOT_FOUND);
    }

    struct UnusedClient;

    #[async_trait]
    impl TokenClient for UnusedClient {
        async fn acquire(&self, _: &ClientCredentialsRequest) -> Result<TokenGrant, TokenError> {
            Err(TokenError::InvalidResponse("not expected in this test".into()))
        }
    }

    #[tokio::test]
    async fn tenant_locks_are_released_after_use() {
        use migration::{Migrator, MigratorTrait};
        use sea_orm::{ConnectOptions, Database};

        let mut options = ConnectOptions::new("sqlite::memory:");
        options.max_connections(1).min_connections(1).sqlx_logging(false);
        let db = Database::connect(options).await.unwrap();
        Migrator::up(&db, None).await.unwrap();

        let service = TokenRefreshService::new(
            Arc::new(AppConfig::default()),
            Arc::new(db),
            CryptoKey::new(vec![7u8; 32]).unwrap(),
            Arc::new(UnusedClient),
        );

        let missing = Uuid::new_v4();
        assert!(matches!(
            service.ensure_fresh_token(missing).await,
            Err(RefreshError::TenantNotFound(id)) if id == missing
        ));
        assert!(matches!(
            service.force_refresh(missing).await,
            Err(RefreshError::TenantNotFound(_))
        ));
        assert!(service.tenant_locks.lock().await.is_empty());

        let held = service
            .with_tenant_lock(missing, async { service.tenant_locks.lock().await.len() })
            .await;
        assert_eq!(held, 1);
        assert!(service.tenant_locks.lock().await.is_empty());
    }
}
