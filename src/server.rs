//! # Server Configuration
//!
//! Router assembly, shared state and the HTTP server lifecycle for the
//! tenant admin API.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router, middleware,
    routing::{get, post, put},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::accounts::AccountService;
use crate::auth::auth_middleware;
use crate::config::AppConfig;
use crate::crypto::CryptoKey;
use crate::environment_sync::{AdminCenterClient, EnvironmentSource, EnvironmentSyncService};
use crate::handlers;
use crate::telemetry::{make_request_span, trace_context_middleware};
use crate::token_refresh::{HttpTokenClient, TokenClient, TokenRefreshService};

/// Timeout applied to outbound calls to the token endpoint and admin API
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);
const SETUP_TOKEN_PURGE_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Arc<DatabaseConnection>,
    pub crypto_key: CryptoKey,
    pub accounts: AccountService,
    pub token_refresh: TokenRefreshService,
    pub environment_sync: EnvironmentSyncService,
}

impl AppState {
    /// Builds the state with the HTTP-backed token client and admin API client.
    pub fn new(config: Arc<AppConfig>, db: Arc<DatabaseConnection>, crypto_key: CryptoKey) -> Self {
        let admin_api = AdminCenterClient::new(config.admin_api_base.clone(), UPSTREAM_TIMEOUT);
        Self::with_clients(
            config,
            db,
            crypto_key,
            Arc::new(HttpTokenClient::new(UPSTREAM_TIMEOUT)),
            Arc::new(admin_api),
        )
    }

    /// Builds the state around caller-supplied upstream clients.
    pub fn with_clients(
        config: Arc<AppConfig>,
        db: Arc<DatabaseConnection>,
        crypto_key: CryptoKey,
        token_client: Arc<dyn TokenClient>,
        environment_source: Arc<dyn EnvironmentSource>,
    ) -> Self {
        let accounts = AccountService::new(Arc::clone(&db), config.password_setup.ttl());
        let token_refresh = TokenRefreshService::new(
            Arc::clone(&config),
            Arc::clone(&db),
            crypto_key.clone(),
            token_client,
        );
        let environment_sync = EnvironmentSyncService::new(
            Arc::clone(&db),
            crypto_key.clone(),
            token_refresh.clone(),
            environment_source,
        );

        Self {
            config,
            db,
            crypto_key,
            accounts,
            token_refresh,
            environment_sync,
        }
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let operator_routes = Router::new()
        .route(
            "/api/v1/users",
            get(handlers::users::list_users).post(handlers::users::create_user),
        )
        .route(
            "/api/v1/users/{id}",
            get(handlers::users::get_user)
                .patch(handlers::users::update_user)
                .delete(handlers::users::delete_user),
        )
        .route(
            "/api/v1/users/{id}/password-setup-tokens",
            post(handlers::users::reissue_setup_token),
        )
        .route(
            "/api/v1/users/{id}/customers",
            get(handlers::users::list_user_customers),
        )
        .route(
            "/api/v1/users/{id}/customers/{customer_id}",
            put(handlers::users::grant_customer).delete(handlers::users::revoke_customer),
        )
        .route(
            "/api/v1/customers",
            get(handlers::customers::list_customers).post(handlers::customers::create_customer),
        )
        .route(
            "/api/v1/customers/summary",
            get(handlers::customers::customer_summary),
        )
        .route(
            "/api/v1/customers/{id}",
            get(handlers::customers::get_customer)
                .patch(handlers::customers::update_customer)
                .delete(handlers::customers::delete_customer),
        )
        .route(
            "/api/v1/customers/{id}/tenants",
            get(handlers::customers::list_customer_tenants),
        )
        .route("/api/v1/tenants", post(handlers::tenants::create_tenant))
        .route(
            "/api/v1/tenants/{id}",
            get(handlers::tenants::get_tenant)
                .patch(handlers::tenants::update_tenant)
                .delete(handlers::tenants::delete_tenant),
        )
        .route(
            "/api/v1/tenants/{id}/token",
            post(handlers::tenants::refresh_tenant_token),
        )
        .route(
            "/api/v1/tenants/{id}/sync",
            post(handlers::tenants::sync_tenant),
        )
        .route(
            "/api/v1/tenants/{id}/environments",
            get(handlers::tenants::list_environments),
        )
        .route(
            "/api/v1/tenants/{id}/environments/{name}/apps",
            get(handlers::tenants::list_installed_apps),
        )
        .route(
            "/api/v1/applications",
            get(handlers::applications::list_applications)
                .post(handlers::applications::create_application),
        )
        .route(
            "/api/v1/applications/{id}",
            get(handlers::applications::get_application)
                .patch(handlers::applications::update_application)
                .delete(handlers::applications::delete_application),
        )
        .route(
            "/api/v1/applications/{id}/installations",
            get(handlers::applications::list_installations),
        )
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.config),
            auth_middleware,
        ));

    let public_routes = Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::health))
        .route(
            "/api/v1/password-setup",
            post(handlers::password_setup::complete_password_setup),
        );

    Router::new()
        .merge(public_routes)
        .merge(operator_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn(trace_context_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(make_request_span))
}

/// Starts the token refresh loop and the HTTP server, and stops both on
/// Ctrl-C or SIGTERM.
pub async fn run_server(state: AppState) -> anyhow::Result<()> {
    let addr = state.config.bind_addr()?;

    let shutdown = CancellationToken::new();
    let refresh_service = state.token_refresh.clone();
    let refresh_shutdown = shutdown.clone();
    let refresh_task = tokio::spawn(async move { refresh_service.run(refresh_shutdown).await });
    let accounts = state.accounts.clone();
    let purge_shutdown = shutdown.clone();
    let purge_task = tokio::spawn(async move {
        accounts
            .run_setup_token_purge(SETUP_TOKEN_PURGE_INTERVAL, purge_shutdown)
            .await
    });

    let app = create_app(state.clone());
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, profile = %state.config.profile, "Server listening");

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            server_shutdown.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Err(err) = refresh_task.await {
        tracing::error!(error = %err, "Token refresh task ended abnormally");
        metrics::counter!("background_task_failures_total", "task" => "token_refresh").increment(1);
    }
    if let Err(err) = purge_task.await {
        tracing::error!(error = %err, "Setup token purge task ended abnormally");
        metrics::counter!("background_task_failures_total", "task" => "setup_token_purge").increment(1);
    }

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

struct BearerSecurity;

impl Modify for BearerSecurity {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::health,
        crate::handlers::users::list_users,
        crate::handlers::users::create_user,
        crate::handlers::users::get_user,
        crate::handlers::users::update_user,
        crate::handlers::users::delete_user,
        crate::handlers::users::reissue_setup_token,
        crate::handlers::users::list_user_customers,
        crate::handlers::users::grant_customer,
        crate::handlers::users::revoke_customer,
        crate::handlers::password_setup::complete_password_setup,
        crate::handlers::customers::list_customers,
        crate::handlers::customers::create_customer,
        crate::handlers::customers::customer_summary,
        crate::handlers::customers::get_customer,
        crate::handlers::customers::update_customer,
        crate::handlers::customers::delete_customer,
        crate::handlers::customers::list_customer_tenants,
        crate::handlers::tenants::create_tenant,
        crate::handlers::tenants::get_tenant,
        crate::handlers::tenants::update_tenant,
        crate::handlers::tenants::delete_tenant,
        crate::handlers::tenants::refresh_tenant_token,
        crate::handlers::tenants::sync_tenant,
        crate::handlers::tenants::list_environments,
        crate::handlers::tenants::list_installed_apps,
        crate::handlers::applications::list_applications,
        crate::handlers::applications::create_application,
        crate::handlers::applications::get_application,
        crate::handlers::applications::update_application,
        crate::handlers::applications::delete_application,
        crate::handlers::applications::list_installations,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::error::ApiError,
            crate::handlers::HealthResponse,
            crate::handlers::users::UserDto,
            crate::handlers::users::CreateUserDto,
            crate::handlers::users::UpdateUserDto,
            crate::handlers::users::ProvisionedUserDto,
            crate::handlers::users::SetupTokenDto,
            crate::handlers::users::UsersResponse,
            crate::handlers::password_setup::PasswordSetupRequest,
            crate::handlers::password_setup::PasswordSetupResponse,
            crate::handlers::customers::CustomerDto,
            crate::handlers::customers::CreateCustomerDto,
            crate::handlers::customers::UpdateCustomerDto,
            crate::handlers::customers::CustomersResponse,
            crate::handlers::customers::CustomerSummaryDto,
            crate::handlers::customers::InfrastructureTypeCount,
            crate::models::customer::InfrastructureType,
            crate::handlers::tenants::TenantDto,
            crate::handlers::tenants::TenantDetailDto,
            crate::handlers::tenants::ValueCount,
            crate::handlers::tenants::CreateTenantDto,
            crate::handlers::tenants::UpdateTenantDto,
            crate::handlers::tenants::TokenStatusDto,
            crate::handlers::tenants::EnvironmentDto,
            crate::handlers::tenants::InstalledAppDto,
            crate::environment_sync::SyncReport,
            crate::handlers::applications::ApplicationDto,
            crate::handlers::applications::CreateApplicationDto,
            crate::handlers::applications::UpdateApplicationDto,
            crate::handlers::applications::ApplicationsResponse,
            crate::models::application::IdRange,
        )
    ),
    modifiers(&BearerSecurity),
    tags(
        (name = "root", description = "Service information and health"),
        (name = "users", description = "Operator and staff accounts"),
        (name = "customers", description = "Customers and their tenants"),
        (name = "tenants", description = "Tenant connections, tokens and environments"),
        (name = "applications", description = "Application catalog"),
    ),
    info(
        title = "Tenant Admin API",
        description = "Administration API for customers, tenants and their installed applications",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
