//! # Tenant Admin Entry Point
//!
//! `tenant-admin` runs the HTTP API by default and exposes maintenance
//! subcommands for migrations, token refresh, environment sync and user
//! provisioning.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use migration::{Migrator, MigratorTrait};
use sea_orm::DatabaseConnection;
use tenant_admin::{
    accounts::ProvisionUserRequest,
    config::{AppConfig, ConfigLoader},
    crypto::CryptoKey,
    db,
    repositories::user::CreateUserRequest,
    server::{AppState, run_server},
    telemetry,
};
use uuid::Uuid;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply migrations, start the token refresh loop and serve the HTTP API
    Serve,
    /// Apply pending database migrations and exit
    Migrate,
    /// Run one token refresh pass over all due tenants
    RefreshTokens,
    /// Synchronise environments and installed apps from the admin API
    SyncEnvironments {
        /// Only synchronise this tenant
        #[arg(long)]
        tenant: Option<Uuid>,
    },
    /// Delete expired password setup tokens
    PurgeSetupTokens,
    /// Create a user and print their one-time password setup token
    ProvisionUser {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        /// Grant admin access and visibility of all customers
        #[arg(long)]
        admin: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load()
        .context("loading configuration")?;
    telemetry::init_tracing(&config).context("initializing tracing")?;

    tracing::info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(config = %redacted_json, "Effective configuration");
    }

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            config.require_operator_tokens()?;
            let state = build_state(config, true).await?;
            run_server(state).await
        }
        Commands::Migrate => {
            let db = db::init_pool(&config).await?;
            migrate(&db).await
        }
        Commands::RefreshTokens => {
            let state = build_state(config, false).await?;
            let report = state.token_refresh.tick().await?;
            println!(
                "Token refresh: {} due, {} refreshed, {} skipped, {} failed",
                report.due, report.refreshed, report.skipped, report.failed
            );
            Ok(())
        }
        Commands::SyncEnvironments { tenant } => {
            let state = build_state(config, false).await?;
            match tenant {
                Some(tenant_id) => {
                    let report = state.environment_sync.sync_tenant(tenant_id).await?;
                    println!(
                        "Tenant {}: {} environment(s) upserted, {} removed; {} app(s) upserted, {} removed",
                        report.tenant_id,
                        report.environments_upserted,
                        report.environments_removed,
                        report.apps_upserted,
                        report.apps_removed
                    );
                    Ok(())
                }
                None => {
                    let report = state.environment_sync.sync_all().await?;
                    println!(
                        "Synchronised {} tenant(s), {} failed",
                        report.succeeded.len(),
                        report.failed.len()
                    );
                    for (tenant_id, reason) in &report.failed {
                        println!("  {tenant_id}: {reason}");
                    }
                    if report.failed.is_empty() {
                        Ok(())
                    } else {
                        bail!("{} tenant(s) failed to synchronise", report.failed.len())
                    }
                }
            }
        }
        Commands::PurgeSetupTokens => {
            let state = build_state(config, false).await?;
            let purged = state.accounts.purge_expired_setup_tokens().await?;
            println!("Purged {purged} expired password setup token(s)");
            Ok(())
        }
        Commands::ProvisionUser { name, email, admin } => {
            let state = build_state(config, false).await?;
            let provisioned = state
                .accounts
                .provision_user(ProvisionUserRequest {
                    user: CreateUserRequest {
                        name,
                        email,
                        can_access_customers: true,
                        all_customers: admin,
                        can_access_admin: admin,
                        is_active: true,
                        ..CreateUserRequest::default()
                    },
                    customer_ids: Vec::new(),
                })
                .await?;
            println!("Created user {} <{}>", provisioned.user.id, provisioned.user.email);
            println!("Password setup token: {}", provisioned.setup_token.raw);
            println!(
                "Token expires at: {}",
                provisioned.setup_token.record.expires_at.to_rfc3339()
            );
            Ok(())
        }
    }
}

async fn migrate(db: &DatabaseConnection) -> Result<()> {
    Migrator::up(db, None)
        .await
        .context("applying database migrations")?;
    tracing::info!("Database migrations applied");
    Ok(())
}

async fn build_state(config: AppConfig, run_migrations: bool) -> Result<AppState> {
    let key_bytes = config
        .crypto_key
        .clone()
        .context("crypto key not present in configuration")?;
    let crypto_key = CryptoKey::new(key_bytes).context("initializing crypto key")?;

    let db = db::init_pool(&config).await?;
    if run_migrations {
        migrate(&db).await?;
    }

    Ok(AppState::new(Arc::new(config), Arc::new(db), crypto_key))
}
