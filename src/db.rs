//! Database connection, pool and transaction management.
//!
//! This module initializes the SeaORM connection pool (Postgres in production,
//! SQLite in tests) and provides a transaction wrapper parameterised by an
//! isolation level.

use std::{fmt, future::Future, pin::Pin, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DatabaseTransaction, DbErr,
    TransactionError, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;

use crate::config::AppConfig;

/// Errors that can occur during database initialization.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {source}")]
    ConnectionFailed {
        #[from]
        source: sea_orm::DbErr,
    },
    #[error("Database connection timeout after {timeout_ms}ms")]
    ConnectionTimeout { timeout_ms: u64 },
    #[error("Invalid database configuration: {message}")]
    InvalidConfiguration { message: String },
}

/// Level at which SQL statements issued through the pool are logged.
///
/// `Query` logs every statement at debug; the other variants log statements
/// at the matching `log` level so they can be filtered independently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbLogLevel {
    #[default]
    Query,
    Info,
    Warn,
    Error,
}

impl DbLogLevel {
    fn level_filter(self) -> log::LevelFilter {
        match self {
            DbLogLevel::Query => log::LevelFilter::Debug,
            DbLogLevel::Info => log::LevelFilter::Info,
            DbLogLevel::Warn => log::LevelFilter::Warn,
            DbLogLevel::Error => log::LevelFilter::Error,
        }
    }
}

impl FromStr for DbLogLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "query" => Ok(DbLogLevel::Query),
            "info" => Ok(DbLogLevel::Info),
            "warn" => Ok(DbLogLevel::Warn),
            "error" => Ok(DbLogLevel::Error),
            other => Err(format!("unknown database log level: {other}")),
        }
    }
}

impl fmt::Display for DbLogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DbLogLevel::Query => "query",
            DbLogLevel::Info => "info",
            DbLogLevel::Warn => "warn",
            DbLogLevel::Error => "error",
        };
        f.write_str(name)
    }
}

/// Transaction isolation levels accepted by [`with_transaction`].
///
/// SQLite has no per-transaction isolation; the level is ignored there.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl From<IsolationLevel> for sea_orm::IsolationLevel {
    fn from(level: IsolationLevel) -> Self {
        match level {
            IsolationLevel::ReadUncommitted => sea_orm::IsolationLevel::ReadUncommitted,
            IsolationLevel::ReadCommitted => sea_orm::IsolationLevel::ReadCommitted,
            IsolationLevel::RepeatableRead => sea_orm::IsolationLevel::RepeatableRead,
            IsolationLevel::Serializable => sea_orm::IsolationLevel::Serializable,
        }
    }
}

/// Initializes a database connection pool with the given configuration.
///
/// Connection attempts are retried with exponential backoff (5 attempts
/// starting at 100ms) so the service tolerates a database that is still
/// starting up.
///
/// # Examples
///
/// ```no_run
/// use tenant_admin::{config::AppConfig, db::init_pool};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = AppConfig::default();
///     let db = init_pool(&config).await?;
///     Ok(())
/// }
/// ```
pub async fn init_pool(cfg: &AppConfig) -> Result<DatabaseConnection> {
    if cfg.database_url.trim().is_empty() {
        return Err(DatabaseError::InvalidConfiguration {
            message: "Database URL cannot be empty".to_string(),
        }
        .into());
    }

    let mut opt = ConnectOptions::new(&cfg.database_url);
    opt.max_connections(cfg.db_max_connections)
        .acquire_timeout(Duration::from_millis(cfg.db_acquire_timeout_ms))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .sqlx_logging(true)
        .sqlx_logging_level(cfg.db_log_level.level_filter());

    let max_retries = 5;
    let mut retry_delay = Duration::from_millis(100);

    for attempt in 1..=max_retries {
        match Database::connect(opt.clone()).await {
            Ok(conn) => {
                log::info!("Successfully connected to database (attempt {})", attempt);
                return Ok(conn);
            }
            Err(e) => {
                if attempt == max_retries {
                    log::error!(
                        "Failed to connect to database after {} attempts: {}",
                        max_retries,
                        e
                    );
                    return Err(DatabaseError::ConnectionFailed { source: e }.into());
                }

                log::warn!(
                    "Database connection attempt {} failed: {}, retrying in {:?}",
                    attempt,
                    e,
                    retry_delay
                );

                sleep(retry_delay).await;
                retry_delay *= 2;
            }
        }
    }

    Err(DatabaseError::ConnectionTimeout {
        timeout_ms: cfg.db_acquire_timeout_ms,
    }
    .into())
}

/// Verifies the connection is alive by executing `SELECT 1`.
pub async fn health_check(db: &DatabaseConnection) -> Result<()> {
    use sea_orm::Statement;

    let stmt = Statement::from_string(db.get_database_backend(), "SELECT 1".to_string());

    db.query_one(stmt)
        .await
        .context("Database health check failed")?;

    Ok(())
}

/// Begins a transaction at the given isolation level.
///
/// The transaction rolls back when dropped without `commit`.
pub async fn begin(
    db: &DatabaseConnection,
    isolation: IsolationLevel,
) -> Result<DatabaseTransaction, DbErr> {
    db.begin_with_config(Some(isolation.into()), None).await
}

/// Boxed future returned by a [`with_transaction`] callback.
pub type TransactionFuture<'c, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'c>>;

/// Runs `callback` inside a transaction.
///
/// Commits when the callback returns `Ok`, rolls back on `Err`. Connection
/// level failures are converted into the caller's error type so the result is
/// a plain `Result<T, E>`.
pub async fn with_transaction<F, T, E>(
    db: &DatabaseConnection,
    isolation: IsolationLevel,
    callback: F,
) -> Result<T, E>
where
    F: for<'c> FnOnce(&'c DatabaseTransaction) -> TransactionFuture<'c, T, E> + Send,
    T: Send,
    E: std::error::Error + From<DbErr> + Send,
{
    db.transaction_with_config(callback, Some(isolation.into()), None)
        .await
        .map_err(|err| match err {
            TransactionError::Connection(db_err) => E::from(db_err),
            TransactionError::Transaction(err) => err,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_database_url() {
        let config = AppConfig {
            database_url: String::new(),
            ..AppConfig::default()
        };

        let result = init_pool(&config).await;

        assert!(matches!(
            result.unwrap_err().downcast::<DatabaseError>(),
            Ok(DatabaseError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn db_log_level_parses_case_insensitively() {
        assert_eq!("QUERY".parse::<DbLogLevel>(), Ok(DbLogLevel::Query));
        assert_eq!(" warn ".parse::<DbLogLevel>(), Ok(DbLogLevel::Warn));
        assert!("verbose".parse::<DbLogLevel>().is_err());
        assert_eq!(DbLogLevel::Error.to_string(), "error");
    }

    #[test]
    fn db_log_level_maps_to_log_filters() {
        assert_eq!(DbLogLevel::Query.level_filter(), log::LevelFilter::Debug);
        assert_eq!(DbLogLevel::Info.level_filter(), log::LevelFilter::Info);
        assert_eq!(DbLogLevel::Error.level_filter(), log::LevelFilter::Error);
    }

    #[test]
    fn isolation_levels_map_onto_sea_orm() {
        assert!(matches!(
            sea_orm::IsolationLevel::from(IsolationLevel::Serializable),
            sea_orm::IsolationLevel::Serializable
        ));
        assert!(matches!(
            sea_orm::IsolationLevel::from(IsolationLevel::ReadUncommitted),
            sea_orm::IsolationLevel::ReadUncommitted
        ));
    }
}
