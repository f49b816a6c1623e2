//! # Password Setup Token Repository
//!
//! One-time tokens that let a provisioned user choose a password. Only the
//! SHA-256 digest of a token is persisted, so lookups digest the raw value
//! first.

use chrono::Duration;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

use super::now;
use crate::error::RepositoryError;
use crate::models::password_setup_token::{
    self, ActiveModel as TokenActiveModel, Entity as PasswordSetupToken, Model as TokenModel,
};
use crate::password::{SetupToken, digest_setup_token, generate_setup_token};

/// A newly issued token. `raw` is never stored and is only available here.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub raw: String,
    pub record: TokenModel,
}

/// Repository for PasswordSetupToken database operations
pub struct PasswordSetupTokenRepository<'a, C> {
    db: &'a C,
}

impl<'a, C: ConnectionTrait> PasswordSetupTokenRepository<'a, C> {
    pub fn new(db: &'a C) -> Self {
        Self { db }
    }

    /// Issues a fresh token for `user_id` valid for `ttl`.
    pub async fn issue(&self, user_id: Uuid, ttl: Duration) -> Result<IssuedToken, RepositoryError> {
        if ttl <= Duration::zero() {
            return Err(RepositoryError::validation_error(
                "token lifetime must be positive",
            ));
        }

        let SetupToken { raw, digest } = generate_setup_token();
        let now = now();

        let record = TokenActiveModel {
            id: Set(Uuid::new_v4()),
            token: Set(digest),
            user_id: Set(user_id),
            expires_at: Set(now + ttl),
            used_at: Set(None),
            created_at: Set(now),
        }
        .insert(self.db)
        .await
        .map_err(RepositoryError::database_error)?;

        Ok(IssuedToken { raw, record })
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<TokenModel>, RepositoryError> {
        PasswordSetupToken::find_by_id(id)
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Looks up a token by the raw value the user presents.
    pub async fn find_by_raw_token(&self, raw: &str) -> Result<Option<TokenModel>, RepositoryError> {
        if raw.trim().is_empty() {
            return Ok(None);
        }
        PasswordSetupToken::find()
            .filter(password_setup_token::Column::Token.eq(digest_setup_token(raw)))
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<TokenModel>, RepositoryError> {
        PasswordSetupToken::find()
            .filter(password_setup_token::Column::UserId.eq(user_id))
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Marks the token used unless it already was.
    ///
    /// The `used_at IS NULL` guard makes this safe under concurrency: of two
    /// racing callers exactly one gets `true`.
    pub async fn mark_used_if_unused(
        &self,
        id: Uuid,
        at: DateTimeWithTimeZone,
    ) -> Result<bool, RepositoryError> {
        let result = PasswordSetupToken::update_many()
            .col_expr(password_setup_token::Column::UsedAt, Expr::value(Some(at)))
            .filter(password_setup_token::Column::Id.eq(id))
            .filter(password_setup_token::Column::UsedAt.is_null())
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(result.rows_affected == 1)
    }

    /// Removes every outstanding (unused) token of a user.
    pub async fn delete_unused_for_user(&self, user_id: Uuid) -> Result<u64, RepositoryError> {
        let result = PasswordSetupToken::delete_many()
            .filter(password_setup_token::Column::UserId.eq(user_id))
            .filter(password_setup_token::Column::UsedAt.is_null())
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(result.rows_affected)
    }

    /// Deletes tokens that expired before `now`, used or not.
    pub async fn purge_expired(&self, now: DateTimeWithTimeZone) -> Result<u64, RepositoryError> {
        let result = PasswordSetupToken::delete_many()
            .filter(password_setup_token::Column::ExpiresAt.lt(now))
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(result.rows_affected)
    }
}
