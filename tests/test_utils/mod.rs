//! Test utilities for database testing.
//!
//! Sets up an in-memory SQLite database with migrations applied and offers
//! fixture helpers plus in-process fakes for the upstream clients.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use tenant_admin::config::AppConfig;
use tenant_admin::crypto::CryptoKey;
use tenant_admin::environment_sync::{EnvironmentSource, SourceError};
use tenant_admin::models::customer::{InfrastructureType, Model as CustomerModel};
use tenant_admin::models::tenant::Model as TenantModel;
use tenant_admin::models::user::Model as UserModel;
use tenant_admin::repositories::customer::CreateCustomerRequest;
use tenant_admin::repositories::environment::EnvironmentRecord;
use tenant_admin::repositories::installed_app::InstalledAppRecord;
use tenant_admin::repositories::tenant::CreateTenantRequest;
use tenant_admin::repositories::user::CreateUserRequest;
use tenant_admin::repositories::{CustomerRepository, TenantRepository, UserRepository};
use tenant_admin::server::AppState;
use tenant_admin::token_refresh::{ClientCredentialsRequest, TokenClient, TokenError, TokenGrant};
use tokio::sync::Mutex;
use uuid::Uuid;

pub const OPERATOR_TOKEN: &str = "test-operator-token";

/// Sets up an in-memory SQLite database with all migrations applied and
/// foreign keys enforced.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    // One pooled connection: every in-memory connection is its own database.
    let mut opt = ConnectOptions::new("sqlite::memory:");
    opt.max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    let db = Database::connect(opt).await?;

    db.execute(Statement::from_string(
        db.get_database_backend(),
        "PRAGMA foreign_keys = ON".to_string(),
    ))
    .await?;

    Migrator::up(&db, None).await?;
    Ok(db)
}

#[allow(dead_code)]
pub fn test_crypto_key() -> CryptoKey {
    CryptoKey::new(vec![7u8; 32]).expect("32 byte test key")
}

/// Configuration pointing the upstream clients at `upstream_base`.
#[allow(dead_code)]
pub fn test_config(upstream_base: &str) -> AppConfig {
    AppConfig {
        operator_tokens: vec![OPERATOR_TOKEN.to_string()],
        crypto_key: Some(vec![7u8; 32]),
        token_endpoint_template: format!("{upstream_base}/{{auth_context}}/oauth2/v2.0/token"),
        admin_api_base: format!("{upstream_base}/admin/v2.21"),
        ..AppConfig::default()
    }
}

#[allow(dead_code)]
pub async fn create_customer(db: &DatabaseConnection, name: &str) -> Result<CustomerModel> {
    Ok(CustomerRepository::new(db)
        .create(CreateCustomerRequest {
            customer_name: name.to_string(),
            infrastructure_type: InfrastructureType::Saas,
            ..CreateCustomerRequest::default()
        })
        .await?)
}

/// Creates a tenant configured for the client-credentials grant.
#[allow(dead_code)]
pub async fn create_tenant(
    db: &DatabaseConnection,
    key: &CryptoKey,
    customer_id: Uuid,
) -> Result<TenantModel> {
    Ok(TenantRepository::new(db, key)
        .create(CreateTenantRequest {
            customer_id,
            description: Some("Production".to_string()),
            client_id: Some("client-id".to_string()),
            client_secret: Some("client-secret".to_string()),
            scope: Some("https://api.example.com/.default".to_string()),
            auth_context: Some("contoso.example".to_string()),
            ..CreateTenantRequest::default()
        })
        .await?)
}

#[allow(dead_code)]
pub async fn create_user(db: &DatabaseConnection, email: &str) -> Result<UserModel> {
    Ok(UserRepository::new(db)
        .create(CreateUserRequest {
            name: "Test User".to_string(),
            email: email.to_string(),
            can_access_customers: true,
            is_active: true,
            ..CreateUserRequest::default()
        })
        .await?)
}

/// Application state around the given upstream fakes.
#[allow(dead_code)]
pub fn build_state(
    db: DatabaseConnection,
    config: AppConfig,
    token_client: Arc<dyn TokenClient>,
    source: Arc<dyn EnvironmentSource>,
) -> AppState {
    AppState::with_clients(
        Arc::new(config),
        Arc::new(db),
        test_crypto_key(),
        token_client,
        source,
    )
}

/// Token client handing out numbered tokens and counting requests.
#[derive(Default)]
pub struct FakeTokenClient {
    calls: AtomicUsize,
    fail_with: Option<u16>,
}

#[allow(dead_code)]
impl FakeTokenClient {
    pub fn failing(status: u16) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_with: Some(status),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenClient for FakeTokenClient {
    async fn acquire(&self, _request: &ClientCredentialsRequest) -> Result<TokenGrant, TokenError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(status) = self.fail_with {
            return Err(TokenError::OAuth {
                status,
                error: "invalid_client".to_string(),
                description: None,
            });
        }
        Ok(TokenGrant {
            access_token: format!("token-{n}"),
            expires_in: Some(3600),
        })
    }
}

/// In-memory admin API: environments and the apps installed in each.
#[derive(Default)]
pub struct FakeEnvironmentSource {
    snapshot: Mutex<Vec<(EnvironmentRecord, Vec<InstalledAppRecord>)>>,
    /// Number of leading `list_environments` calls answered with 401
    reject_first: AtomicUsize,
    tokens_seen: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl FakeEnvironmentSource {
    pub fn new(snapshot: Vec<(EnvironmentRecord, Vec<InstalledAppRecord>)>) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            ..Self::default()
        }
    }

    pub fn rejecting_first(self, count: usize) -> Self {
        self.reject_first.store(count, Ordering::SeqCst);
        self
    }

    pub async fn replace(&self, snapshot: Vec<(EnvironmentRecord, Vec<InstalledAppRecord>)>) {
        *self.snapshot.lock().await = snapshot;
    }

    pub async fn tokens_seen(&self) -> Vec<String> {
        self.tokens_seen.lock().await.clone()
    }
}

#[async_trait]
impl EnvironmentSource for FakeEnvironmentSource {
    async fn list_environments(
        &self,
        token: &str,
        _tenant: &TenantModel,
    ) -> Result<Vec<EnvironmentRecord>, SourceError> {
        self.tokens_seen.lock().await.push(token.to_string());
        let rejected = self
            .reject_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if rejected.is_ok() {
            return Err(SourceError::Unauthorized);
        }
        Ok(self
            .snapshot
            .lock()
            .await
            .iter()
            .map(|(env, _)| env.clone())
            .collect())
    }

    async fn list_installed_apps(
        &self,
        _token: &str,
        _tenant: &TenantModel,
        environment: &str,
    ) -> Result<Vec<InstalledAppRecord>, SourceError> {
        let apps: HashMap<String, Vec<InstalledAppRecord>> = self
            .snapshot
            .lock()
            .await
            .iter()
            .map(|(env, apps)| (env.name.clone(), apps.clone()))
            .collect();
        Ok(apps.get(environment).cloned().unwrap_or_default())
    }
}

#[allow(dead_code)]
pub fn environment(name: &str, status: &str) -> EnvironmentRecord {
    EnvironmentRecord {
        name: name.to_string(),
        environment_type: "Production".to_string(),
        status: status.to_string(),
        web_client_url: Some(format!("https://businesscentral.example.com/{name}")),
        location_name: Some("United States".to_string()),
        application_version: Some("24.1.18927.0".to_string()),
        platform_version: Some("24.0.18920.0".to_string()),
    }
}

#[allow(dead_code)]
pub fn installed_app(id: Uuid, name: &str, state: &str) -> InstalledAppRecord {
    InstalledAppRecord {
        id,
        name: name.to_string(),
        version: "1.0.0.0".to_string(),
        publisher: "Contoso".to_string(),
        published_as: Some("Global".to_string()),
        state: Some(state.to_string()),
    }
}
