//! # User Repository
//!
//! Operators and staff accounts. Emails are stored trimmed and lower-cased so
//! the unique index compares them case-insensitively.

use std::sync::OnceLock;

use regex::Regex;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, IntoActiveModel,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use uuid::Uuid;

use super::{MAX_NAME_LEN, now, optional_text, required_text};
use crate::crypto::{CryptoKey, SecretOwner, decrypt_optional_secret, encrypt_secret, secret_aad};
use crate::cursor::{Cursor, Page, PageRequest};
use crate::error::RepositoryError;
use crate::models::user::{self, ActiveModel as UserActiveModel, Entity as User, Model as UserModel};

const GITHUB_TOKEN_FIELD: &str = "github_token";
const MAX_EMAIL_LEN: usize = 254;

/// Request data for creating a new user. The password is set later through
/// the password setup flow.
#[derive(Debug, Clone, Default)]
pub struct CreateUserRequest {
    pub name: String,
    pub email: String,
    pub github_avatar: Option<String>,
    pub can_access_repos: bool,
    pub can_access_customers: bool,
    pub all_customers: bool,
    pub can_access_admin: bool,
    pub is_active: bool,
}

/// Partial update; `None` leaves a column untouched.
#[derive(Debug, Clone, Default)]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub github_avatar: Option<Option<String>>,
    pub can_access_repos: Option<bool>,
    pub can_access_customers: Option<bool>,
    pub all_customers: Option<bool>,
    pub can_access_admin: Option<bool>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub is_active: Option<bool>,
    pub can_access_admin: Option<bool>,
}

impl UserFilter {
    fn condition(&self) -> Condition {
        let mut condition = Condition::all();
        if let Some(active) = self.is_active {
            condition = condition.add(user::Column::IsActive.eq(active));
        }
        if let Some(admin) = self.can_access_admin {
            condition = condition.add(user::Column::CanAccessAdmin.eq(admin));
        }
        condition
    }
}

fn email_pattern() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| {
        Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is a valid regex")
    })
}

/// Trims, lower-cases and validates an email address.
pub fn normalize_email(email: &str) -> Result<String, RepositoryError> {
    let normalized = email.trim().to_lowercase();
    if normalized.is_empty() {
        return Err(RepositoryError::validation_error("email cannot be empty"));
    }
    if normalized.len() > MAX_EMAIL_LEN || !email_pattern().is_match(&normalized) {
        return Err(RepositoryError::validation_error(format!(
            "'{normalized}' is not a valid email address"
        )));
    }
    Ok(normalized)
}

/// Repository for User database operations
pub struct UserRepository<'a, C> {
    db: &'a C,
}

impl<'a, C: ConnectionTrait> UserRepository<'a, C> {
    pub fn new(db: &'a C) -> Self {
        Self { db }
    }

    /// Create a new user without a password
    pub async fn create(&self, request: CreateUserRequest) -> Result<UserModel, RepositoryError> {
        let name = required_text("name", &request.name, MAX_NAME_LEN)?;
        let email = normalize_email(&request.email)?;
        let now = now();

        let user = UserActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name),
            email: Set(email.clone()),
            password: Set(None),
            github_token: Set(None),
            github_avatar: Set(optional_text(request.github_avatar)),
            created_at: Set(now),
            updated_at: Set(now),
            can_access_repos: Set(request.can_access_repos),
            can_access_customers: Set(request.can_access_customers),
            all_customers: Set(request.all_customers),
            can_access_admin: Set(request.can_access_admin),
            is_active: Set(request.is_active),
        };

        user.insert(self.db).await.map_err(|e| {
            RepositoryError::database_error(e)
                .conflict_as(format!("a user with email '{email}' already exists"))
        })
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<UserModel>, RepositoryError> {
        User::find_by_id(id)
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Looks a user up by email; the argument is normalised first.
    pub async fn find_by_email(&self, email: &str) -> Result<Option<UserModel>, RepositoryError> {
        let normalized = email.trim().to_lowercase();
        User::find()
            .filter(user::Column::Email.eq(normalized))
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// List users ordered by (email, id)
    pub async fn list(
        &self,
        filter: &UserFilter,
        page: &PageRequest,
    ) -> Result<Page<UserModel>, RepositoryError> {
        let limit = page.limit();
        let mut query = User::find()
            .filter(filter.condition())
            .order_by_asc(user::Column::Email)
            .order_by_asc(user::Column::Id);

        if let Some(after) = &page.after {
            query = query.filter(
                Condition::any()
                    .add(user::Column::Email.gt(after.key.clone()))
                    .add(
                        Condition::all()
                            .add(user::Column::Email.eq(after.key.clone()))
                            .add(user::Column::Id.gt(after.id)),
                    ),
            );
        }

        let rows = query
            .limit(limit + 1)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(Page::from_overfetch(rows, limit, |u| Cursor {
            key: u.email.clone(),
            id: u.id,
        }))
    }

    pub async fn update(
        &self,
        id: Uuid,
        update: UpdateUserRequest,
    ) -> Result<UserModel, RepositoryError> {
        let existing = self
            .find_by_id(id)
            .await?
            .ok_or_else(|| RepositoryError::not_found("User"))?;

        let mut active = existing.into_active_model();
        if let Some(name) = update.name {
            active.name = Set(required_text("name", &name, MAX_NAME_LEN)?);
        }
        if let Some(email) = update.email {
            active.email = Set(normalize_email(&email)?);
        }
        if let Some(avatar) = update.github_avatar {
            active.github_avatar = Set(optional_text(avatar));
        }
        if let Some(value) = update.can_access_repos {
            active.can_access_repos = Set(value);
        }
        if let Some(value) = update.can_access_customers {
            active.can_access_customers = Set(value);
        }
        if let Some(value) = update.all_customers {
            active.all_customers = Set(value);
        }
        if let Some(value) = update.can_access_admin {
            active.can_access_admin = Set(value);
        }
        if let Some(value) = update.is_active {
            active.is_active = Set(value);
        }
        active.updated_at = Set(now());

        active.update(self.db).await.map_err(|e| {
            RepositoryError::database_error(e).conflict_as("a user with this email already exists")
        })
    }

    /// Stores an Argon2 PHC string; pass `None` to clear the password.
    pub async fn set_password_hash(
        &self,
        id: Uuid,
        password_hash: Option<String>,
    ) -> Result<UserModel, RepositoryError> {
        let existing = self
            .find_by_id(id)
            .await?
            .ok_or_else(|| RepositoryError::not_found("User"))?;

        let mut active = existing.into_active_model();
        active.password = Set(password_hash);
        active.updated_at = Set(now());
        active
            .update(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Encrypts and stores the user's GitHub token; `None` removes it.
    pub async fn set_github_token(
        &self,
        key: &CryptoKey,
        id: Uuid,
        token: Option<&str>,
    ) -> Result<UserModel, RepositoryError> {
        let existing = self
            .find_by_id(id)
            .await?
            .ok_or_else(|| RepositoryError::not_found("User"))?;

        let ciphertext = token
            .map(|t| encrypt_secret(key, &github_token_aad(id), t))
            .transpose()?;

        let mut active = existing.into_active_model();
        active.github_token = Set(ciphertext);
        active.updated_at = Set(now());
        active
            .update(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Decrypts the stored GitHub token of `user`.
    pub fn github_token(
        &self,
        key: &CryptoKey,
        user: &UserModel,
    ) -> Result<Option<String>, RepositoryError> {
        Ok(decrypt_optional_secret(
            key,
            &github_token_aad(user.id),
            user.github_token.as_deref(),
        )?)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), RepositoryError> {
        let result = User::delete_by_id(id)
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        if result.rows_affected == 0 {
            return Err(RepositoryError::not_found("User"));
        }
        Ok(())
    }

    pub async fn count(&self, filter: &UserFilter) -> Result<u64, RepositoryError> {
        User::find()
            .filter(filter.condition())
            .count(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn count_active(&self) -> Result<u64, RepositoryError> {
        self.count(&UserFilter {
            is_active: Some(true),
            ..UserFilter::default()
        })
        .await
    }
}

fn github_token_aad(user_id: Uuid) -> String {
    secret_aad(SecretOwner::User, user_id, GITHUB_TOKEN_FIELD)
}
