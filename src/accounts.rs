//! # Account Service
//!
//! User provisioning, the one-time password setup flow, credential checks
//! and per-user customer visibility.

use std::sync::Arc;

use axum::http::StatusCode;
use chrono::Duration;
use sea_orm::{DatabaseConnection, DbErr};
use serde_json::json;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::cursor::{Page, PageRequest};
use crate::db::{self, IsolationLevel};
use crate::error::{ApiError, RepositoryError, unauthorized, validation_error};
use crate::models::customer::Model as CustomerModel;
use crate::models::user::Model as UserModel;
use crate::password::{PasswordError, hash_password, validate_password, verify_password};
use crate::repositories::customer::CustomerFilter;
use crate::repositories::password_setup_token::IssuedToken;
use crate::repositories::user::CreateUserRequest;
use crate::repositories::{
    CustomerRepository, PasswordSetupTokenRepository, UserCustomerRepository, UserRepository,
};

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("password setup token is invalid")]
    TokenNotFound,
    #[error("password setup token has already been used")]
    TokenAlreadyUsed,
    #[error("password setup token has expired")]
    TokenExpired,
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error(transparent)]
    Password(#[from] PasswordError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<DbErr> for AccountError {
    fn from(error: DbErr) -> Self {
        Self::Repository(RepositoryError::database_error(error))
    }
}

/// Input for [`AccountService::provision_user`].
#[derive(Debug, Clone, Default)]
pub struct ProvisionUserRequest {
    pub user: CreateUserRequest,
    pub customer_ids: Vec<Uuid>,
}

/// A provisioned user and the one-time token to hand over to them.
#[derive(Debug, Clone)]
pub struct ProvisionedUser {
    pub user: UserModel,
    pub setup_token: IssuedToken,
}

#[derive(Clone)]
pub struct AccountService {
    db: Arc<DatabaseConnection>,
    setup_token_ttl: Duration,
}

impl AccountService {
    pub fn new(db: Arc<DatabaseConnection>, setup_token_ttl: Duration) -> Self {
        Self {
            db,
            setup_token_ttl,
        }
    }

    /// Creates a user without a password, grants the requested customers and
    /// issues a setup token, all in one transaction.
    #[instrument(skip_all)]
    pub async fn provision_user(
        &self,
        request: ProvisionUserRequest,
    ) -> Result<ProvisionedUser, AccountError> {
        let txn = db::begin(&self.db, IsolationLevel::ReadCommitted).await?;

        let user = UserRepository::new(&txn).create(request.user).await?;

        let grants = UserCustomerRepository::new(&txn);
        for customer_id in &request.customer_ids {
            grants.grant(user.id, *customer_id).await.map_err(|e| match e {
                RepositoryError::ForeignKey(_) => {
                    RepositoryError::ForeignKey(format!("customer {customer_id} does not exist"))
                }
                other => other,
            })?;
        }

        let setup_token = PasswordSetupTokenRepository::new(&txn)
            .issue(user.id, self.setup_token_ttl)
            .await?;

        txn.commit().await?;

        info!(
            user_id = %user.id,
            customers = request.customer_ids.len(),
            "Provisioned user"
        );

        Ok(ProvisionedUser { user, setup_token })
    }

    /// Invalidates the user's outstanding tokens and issues a new one.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn reissue_setup_token(&self, user_id: Uuid) -> Result<IssuedToken, AccountError> {
        let txn = db::begin(&self.db, IsolationLevel::ReadCommitted).await?;

        if UserRepository::new(&txn).find_by_id(user_id).await?.is_none() {
            return Err(RepositoryError::not_found("User").into());
        }

        let tokens = PasswordSetupTokenRepository::new(&txn);
        let revoked = tokens.delete_unused_for_user(user_id).await?;
        let issued = tokens.issue(user_id, self.setup_token_ttl).await?;

        txn.commit().await?;

        info!(revoked, "Reissued password setup token");
        Ok(issued)
    }

    /// Consumes a setup token and stores the chosen password.
    ///
    /// The token is consumed with a conditional update, so when two requests
    /// race on the same token exactly one succeeds and the other gets
    /// [`AccountError::TokenAlreadyUsed`].
    #[instrument(skip_all)]
    pub async fn complete_password_setup(
        &self,
        raw_token: &str,
        password: &str,
    ) -> Result<UserModel, AccountError> {
        let token = PasswordSetupTokenRepository::new(self.db.as_ref())
            .find_by_raw_token(raw_token)
            .await?
            .ok_or(AccountError::TokenNotFound)?;

        if token.is_used() {
            return Err(AccountError::TokenAlreadyUsed);
        }
        let now = crate::repositories::now();
        if token.is_expired_at(now) {
            return Err(AccountError::TokenExpired);
        }

        validate_password(password)?;
        let candidate = password.to_owned();
        let hash = run_blocking(move || hash_password(&candidate)).await?;

        let txn = db::begin(&self.db, IsolationLevel::ReadCommitted).await?;

        let consumed = PasswordSetupTokenRepository::new(&txn)
            .mark_used_if_unused(token.id, now)
            .await?;
        if !consumed {
            return Err(AccountError::TokenAlreadyUsed);
        }

        let user = UserRepository::new(&txn)
            .set_password_hash(token.user_id, Some(hash))
            .await?;

        txn.commit().await?;

        info!(user_id = %user.id, "Password setup completed");
        Ok(user)
    }

    /// Returns the user when the email/password pair is valid and the account
    /// is active.
    #[instrument(skip_all)]
    pub async fn verify_credentials(
        &self,
        email: &str,
        password: &str,
    ) -> Result<UserModel, AccountError> {
        let Some(user) = UserRepository::new(self.db.as_ref())
            .find_by_email(email)
            .await?
        else {
            return Err(AccountError::InvalidCredentials);
        };

        let Some(stored_hash) = user.password.as_deref().filter(|_| user.is_active) else {
            return Err(AccountError::InvalidCredentials);
        };

        let (candidate, stored_hash) = (password.to_owned(), stored_hash.to_owned());
        match run_blocking(move || verify_password(&candidate, &stored_hash)).await {
            Ok(true) => Ok(user),
            Ok(false) => Err(AccountError::InvalidCredentials),
            Err(err) => {
                warn!(user_id = %user.id, error = %err, "Stored password hash is unusable");
                Err(AccountError::InvalidCredentials)
            }
        }
    }

    /// True when `user` may see `customer_id`.
    pub async fn can_view_customer(
        &self,
        user: &UserModel,
        customer_id: Uuid,
    ) -> Result<bool, AccountError> {
        if !user.is_active || !user.can_access_customers {
            return Ok(false);
        }
        if user.all_customers {
            return Ok(true);
        }
        Ok(UserCustomerRepository::new(self.db.as_ref())
            .exists(user.id, customer_id)
            .await?)
    }

    /// Customers visible to `user`, paginated like a regular customer listing.
    pub async fn visible_customers(
        &self,
        user: &UserModel,
        page: &PageRequest,
    ) -> Result<Page<CustomerModel>, AccountError> {
        let filter = if !user.is_active || !user.can_access_customers {
            CustomerFilter {
                ids: Some(Vec::new()),
                ..CustomerFilter::default()
            }
        } else if user.all_customers {
            CustomerFilter::default()
        } else {
            let ids = UserCustomerRepository::new(self.db.as_ref())
                .customer_ids_for_user(user.id)
                .await?;
            CustomerFilter {
                ids: Some(ids),
                ..CustomerFilter::default()
            }
        };

        Ok(CustomerRepository::new(self.db.as_ref())
            .list(&filter, page)
            .await?)
    }

    /// Deletes expired setup tokens.
    pub async fn purge_expired_setup_tokens(&self) -> Result<u64, AccountError> {
        let purged = PasswordSetupTokenRepository::new(self.db.as_ref())
            .purge_expired(crate::repositories::now())
            .await?;
        if purged > 0 {
            info!(purged, "Purged expired password setup tokens");
        }
        Ok(purged)
    }

    /// Purges expired setup tokens every `interval` until `shutdown` fires.
    pub async fn run_setup_token_purge(&self, interval: std::time::Duration, shutdown: CancellationToken) {
        info!(interval_secs = interval.as_secs(), "Starting setup token purge loop");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {
                    if let Err(err) = self.purge_expired_setup_tokens().await {
                        warn!(error = %err, "Setup token purge failed");
                    }
                }
            }
        }
        info!("Setup token purge loop stopped");
    }
}

/// Runs password hashing on the blocking pool.
async fn run_blocking<T, F>(work: F) -> Result<T, AccountError>
where
    F: FnOnce() -> Result<T, PasswordError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| PasswordError::Hash(format!("hashing task failed: {err}")))?
        .map_err(AccountError::from)
}

impl From<AccountError> for ApiError {
    fn from(error: AccountError) -> Self {
        match error {
            AccountError::TokenNotFound
            | AccountError::TokenAlreadyUsed
            | AccountError::TokenExpired => validation_error(
                &error.to_string(),
                json!({ "token": error.to_string() }),
            ),
            AccountError::Password(PasswordError::InvalidLength) => validation_error(
                &error.to_string(),
                json!({ "password": error.to_string() }),
            ),
            AccountError::InvalidCredentials => unauthorized(Some("Invalid email or password")),
            AccountError::Password(err) => {
                tracing::error!(error = %err, "Password hashing failure");
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "An internal error occurred",
                )
            }
            AccountError::Repository(err) => err.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_errors_are_validation_failures() {
        for err in [
            AccountError::TokenNotFound,
            AccountError::TokenAlreadyUsed,
            AccountError::TokenExpired,
        ] {
            let api: ApiError = err.into();
            assert_eq!(api.status, StatusCode::BAD_REQUEST);
            assert_eq!(api.code.as_ref(), "VALIDATION_FAILED");
        }
    }

    #[test]
    fn password_policy_and_credentials_mapping() {
        let api: ApiError = AccountError::Password(PasswordError::InvalidLength).into();
        assert_eq!(api.status, StatusCode::BAD_REQUEST);

        let api: ApiError = AccountError::InvalidCredentials.into();
        assert_eq!(api.status, StatusCode::UNAUTHORIZED);

        let api: ApiError = AccountError::Repository(RepositoryError::not_found("User")).into();
        assert_eq!(api.status, StatusCode::NOT_FOUND);
    }
}
