//! # Tenant Repository
//!
//! Tenants and their OAuth client-credential connection. The client secret
//! and the cached access token are encrypted before they reach the database
//! and bound to the tenant id through the AES-GCM associated data.

use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, IntoActiveModel,
    PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

use super::{now, optional_text};
use crate::crypto::{
    CryptoKey, SecretOwner, decrypt_optional_secret, decrypt_secret, encrypt_secret, secret_aad,
};
use crate::error::RepositoryError;
use crate::models::tenant::{
    self, ActiveModel as TenantActiveModel, Entity as Tenant, GRANT_CLIENT_CREDENTIALS,
    Model as TenantModel,
};

const CLIENT_SECRET_FIELD: &str = "client_secret";
const TOKEN_FIELD: &str = "token";
const MAX_GRANT_TYPE_LEN: usize = 64;

/// Request data for creating a new tenant
#[derive(Debug, Clone, Default)]
pub struct CreateTenantRequest {
    pub customer_id: Uuid,
    pub description: Option<String>,
    pub connection_id: Option<String>,
    /// Defaults to `client_credentials`
    pub grant_type: Option<String>,
    pub client_id: Option<String>,
    /// Plaintext secret; encrypted before insert
    pub client_secret: Option<String>,
    pub scope: Option<String>,
    pub auth_context: Option<String>,
}

/// Partial update. Changing any credential field drops the cached token.
#[derive(Debug, Clone, Default)]
pub struct UpdateTenantRequest {
    pub description: Option<Option<String>>,
    pub connection_id: Option<Option<String>>,
    pub grant_type: Option<String>,
    pub client_id: Option<Option<String>>,
    pub client_secret: Option<Option<String>>,
    pub scope: Option<Option<String>>,
    pub auth_context: Option<Option<String>>,
}

impl UpdateTenantRequest {
    fn touches_credentials(&self) -> bool {
        self.grant_type.is_some()
            || self.client_id.is_some()
            || self.client_secret.is_some()
            || self.scope.is_some()
            || self.auth_context.is_some()
    }
}

/// Decrypted connection data needed to request a token.
#[derive(Clone)]
pub struct TenantCredentials {
    pub tenant_id: Uuid,
    pub grant_type: String,
    pub client_id: String,
    pub client_secret: String,
    pub scope: Option<String>,
    pub auth_context: String,
}

impl std::fmt::Debug for TenantCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantCredentials")
            .field("tenant_id", &self.tenant_id)
            .field("grant_type", &self.grant_type)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("scope", &self.scope)
            .field("auth_context", &self.auth_context)
            .finish()
    }
}

fn grant_type(value: Option<String>) -> Result<String, RepositoryError> {
    let value = optional_text(value).unwrap_or_else(|| GRANT_CLIENT_CREDENTIALS.to_string());
    if value.len() > MAX_GRANT_TYPE_LEN {
        return Err(RepositoryError::validation_error(format!(
            "grant_type cannot exceed {MAX_GRANT_TYPE_LEN} characters"
        )));
    }
    Ok(value)
}

/// Repository for Tenant database operations
pub struct TenantRepository<'a, C> {
    db: &'a C,
    crypto_key: &'a CryptoKey,
}

impl<'a, C: ConnectionTrait> TenantRepository<'a, C> {
    pub fn new(db: &'a C, crypto_key: &'a CryptoKey) -> Self {
        Self { db, crypto_key }
    }

    /// Create a new tenant, encrypting the client secret
    pub async fn create(&self, request: CreateTenantRequest) -> Result<TenantModel, RepositoryError> {
        let id = Uuid::new_v4();
        let now = now();
        let client_secret = self.encrypt_client_secret(id, optional_text(request.client_secret))?;

        TenantActiveModel {
            id: Set(id),
            customer_id: Set(request.customer_id),
            description: Set(optional_text(request.description)),
            created_at: Set(now),
            modified_at: Set(now),
            connection_id: Set(optional_text(request.connection_id)),
            grant_type: Set(grant_type(request.grant_type)?),
            client_id: Set(optional_text(request.client_id)),
            client_secret: Set(client_secret),
            scope: Set(optional_text(request.scope)),
            token: Set(None),
            token_expires_at: Set(None),
            auth_context: Set(optional_text(request.auth_context)),
        }
        .insert(self.db)
        .await
        .map_err(|e| match RepositoryError::database_error(e) {
            RepositoryError::ForeignKey(_) => RepositoryError::ForeignKey(format!(
                "customer {} does not exist",
                request.customer_id
            )),
            other => other,
        })
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<TenantModel>, RepositoryError> {
        Tenant::find_by_id(id)
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Tenants of a customer, oldest first.
    pub async fn list_by_customer(
        &self,
        customer_id: Uuid,
    ) -> Result<Vec<TenantModel>, RepositoryError> {
        Tenant::find()
            .filter(tenant::Column::CustomerId.eq(customer_id))
            .order_by_asc(tenant::Column::CreatedAt)
            .order_by_asc(tenant::Column::Id)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Tenants configured for the client-credentials grant.
    pub async fn list_with_credentials(&self) -> Result<Vec<TenantModel>, RepositoryError> {
        Tenant::find()
            .filter(credentials_condition())
            .order_by_asc(tenant::Column::Id)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Client-credential tenants whose token is missing or expires before
    /// `cutoff`, soonest expiry first.
    pub async fn find_due_for_token_refresh(
        &self,
        cutoff: DateTimeWithTimeZone,
    ) -> Result<Vec<TenantModel>, RepositoryError> {
        Tenant::find()
            .filter(credentials_condition())
            .filter(
                Condition::any()
                    .add(tenant::Column::Token.is_null())
                    .add(tenant::Column::TokenExpiresAt.is_null())
                    .add(tenant::Column::TokenExpiresAt.lt(cutoff)),
            )
            .order_by_asc(tenant::Column::TokenExpiresAt)
            .order_by_asc(tenant::Column::Id)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn update(
        &self,
        id: Uuid,
        update: UpdateTenantRequest,
    ) -> Result<TenantModel, RepositoryError> {
        let existing = self
            .find_by_id(id)
            .await?
            .ok_or_else(|| RepositoryError::not_found("Tenant"))?;

        let drop_token = update.touches_credentials();
        let mut active = existing.into_active_model();

        if let Some(description) = update.description {
            active.description = Set(optional_text(description));
        }
        if let Some(connection_id) = update.connection_id {
            active.connection_id = Set(optional_text(connection_id));
        }
        if let Some(value) = update.grant_type {
            active.grant_type = Set(grant_type(Some(value))?);
        }
        if let Some(client_id) = update.client_id {
            active.client_id = Set(optional_text(client_id));
        }
        if let Some(secret) = update.client_secret {
            active.client_secret = Set(self.encrypt_client_secret(id, optional_text(secret))?);
        }
        if let Some(scope) = update.scope {
            active.scope = Set(optional_text(scope));
        }
        if let Some(auth_context) = update.auth_context {
            active.auth_context = Set(optional_text(auth_context));
        }
        if drop_token {
            active.token = Set(None);
            active.token_expires_at = Set(None);
        }
        active.modified_at = Set(now());

        active
            .update(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Encrypts and stores a freshly acquired access token.
    pub async fn store_token(
        &self,
        id: Uuid,
        token: &str,
        expires_at: DateTimeWithTimeZone,
    ) -> Result<TenantModel, RepositoryError> {
        let existing = self
            .find_by_id(id)
            .await?
            .ok_or_else(|| RepositoryError::not_found("Tenant"))?;

        let ciphertext = encrypt_secret(self.crypto_key, &token_aad(id), token)?;

        let mut active = existing.into_active_model();
        active.token = Set(Some(ciphertext));
        active.token_expires_at = Set(Some(expires_at));
        active.modified_at = Set(now());
        active
            .update(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Decrypts the client credentials of `tenant`, or `None` when the tenant
    /// is not configured for the client-credentials grant.
    pub fn decrypt_credentials(
        &self,
        tenant: &TenantModel,
    ) -> Result<Option<TenantCredentials>, RepositoryError> {
        if !tenant.has_client_credentials() {
            return Ok(None);
        }
        let (Some(client_id), Some(secret), Some(auth_context)) = (
            tenant.client_id.clone(),
            tenant.client_secret.as_deref(),
            tenant.auth_context.clone(),
        ) else {
            return Ok(None);
        };

        let client_secret = decrypt_secret(
            self.crypto_key,
            &secret_aad(SecretOwner::Tenant, tenant.id, CLIENT_SECRET_FIELD),
            secret,
        )?;

        Ok(Some(TenantCredentials {
            tenant_id: tenant.id,
            grant_type: tenant.grant_type.clone(),
            client_id,
            client_secret,
            scope: tenant.scope.clone(),
            auth_context,
        }))
    }

    /// Decrypts the cached access token of `tenant`.
    pub fn decrypt_token(&self, tenant: &TenantModel) -> Result<Option<String>, RepositoryError> {
        Ok(decrypt_optional_secret(
            self.crypto_key,
            &token_aad(tenant.id),
            tenant.token.as_deref(),
        )?)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), RepositoryError> {
        let result = Tenant::delete_by_id(id)
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        if result.rows_affected == 0 {
            return Err(RepositoryError::not_found("Tenant"));
        }
        Ok(())
    }

    pub async fn count(&self) -> Result<u64, RepositoryError> {
        Tenant::find()
            .count(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    fn encrypt_client_secret(
        &self,
        tenant_id: Uuid,
        secret: Option<String>,
    ) -> Result<Option<Vec<u8>>, RepositoryError> {
        Ok(secret
            .map(|s| {
                encrypt_secret(
                    self.crypto_key,
                    &secret_aad(SecretOwner::Tenant, tenant_id, CLIENT_SECRET_FIELD),
                    &s,
                )
            })
            .transpose()?)
    }
}

fn token_aad(tenant_id: Uuid) -> String {
    secret_aad(SecretOwner::Tenant, tenant_id, TOKEN_FIELD)
}

fn credentials_condition() -> Condition {
    Condition::all()
        .add(tenant::Column::GrantType.eq(GRANT_CLIENT_CREDENTIALS))
        .add(tenant::Column::ClientId.is_not_null())
        .add(tenant::Column::ClientSecret.is_not_null())
        .add(tenant::Column::AuthContext.is_not_null())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_type_defaults_to_client_credentials() {
        assert_eq!(grant_type(None).unwrap(), GRANT_CLIENT_CREDENTIALS);
        assert_eq!(grant_type(Some("  ".into())).unwrap(), GRANT_CLIENT_CREDENTIALS);
        assert_eq!(grant_type(Some("password".into())).unwrap(), "password");
        assert!(grant_type(Some("x".repeat(65))).is_err());
    }

    #[test]
    fn credentials_debug_hides_secret() {
        let creds = TenantCredentials {
            tenant_id: Uuid::new_v4(),
            grant_type: GRANT_CLIENT_CREDENTIALS.into(),
            client_id: "client".into(),
            client_secret: "super-secret".into(),
            scope: None,
            auth_context: "contoso".into(),
        };
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
