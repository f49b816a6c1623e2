//! One-off data maintenance tasks.

use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, IntoActiveModel, Set};
use tracing::info;

use crate::crypto::{CryptoKey, SecretOwner, encrypt_bytes, is_encrypted_payload, secret_aad};
use crate::db::{self, IsolationLevel};
use crate::error::RepositoryError;
use crate::models::{Tenant, User};

/// Rows rewritten by [`reencrypt_legacy_secrets`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReencryptReport {
    pub tenants: usize,
    pub users: usize,
}

fn needs_encryption(stored: Option<&[u8]>) -> bool {
    stored.is_some_and(|bytes| !bytes.is_empty() && !is_encrypted_payload(bytes))
}

fn encrypt_legacy(
    key: &CryptoKey,
    aad: String,
    stored: &[u8],
) -> Result<Vec<u8>, RepositoryError> {
    Ok(encrypt_bytes(key, aad.as_bytes(), stored)?)
}

/// Encrypts tenant client secrets, tenant tokens and user GitHub tokens that
/// were stored as plaintext. Already encrypted values are left untouched, so
/// the task can be re-run safely. Everything happens in one transaction.
pub async fn reencrypt_legacy_secrets(
    db: &DatabaseConnection,
    key: &CryptoKey,
) -> Result<ReencryptReport, RepositoryError> {
    let key = key.clone();
    let report = db::with_transaction(db, IsolationLevel::Serializable, move |txn| {
        Box::pin(async move {
            let mut report = ReencryptReport::default();
            let now = crate::repositories::now();

            for tenant in Tenant::find().all(txn).await? {
                let secret = needs_encryption(tenant.client_secret.as_deref());
                let token = needs_encryption(tenant.token.as_deref());
                if !secret && !token {
                    continue;
                }

                let id = tenant.id;
                let mut active = tenant.clone().into_active_model();
                if let (true, Some(stored)) = (secret, tenant.client_secret.as_deref()) {
                    let aad = secret_aad(SecretOwner::Tenant, id, "client_secret");
                    active.client_secret = Set(Some(encrypt_legacy(&key, aad, stored)?));
                }
                if let (true, Some(stored)) = (token, tenant.token.as_deref()) {
                    let aad = secret_aad(SecretOwner::Tenant, id, "token");
                    active.token = Set(Some(encrypt_legacy(&key, aad, stored)?));
                }
                active.modified_at = Set(now);
                active.update(txn).await?;
                report.tenants += 1;
            }

            for user in User::find().all(txn).await? {
                let Some(stored) = user
                    .github_token
                    .as_deref()
                    .filter(|stored| needs_encryption(Some(stored)))
                else {
                    continue;
                };

                let aad = secret_aad(SecretOwner::User, user.id, "github_token");
                let ciphertext = encrypt_legacy(&key, aad, stored)?;
                let mut active = user.clone().into_active_model();
                active.github_token = Set(Some(ciphertext));
                active.updated_at = Set(now);
                active.update(txn).await?;
                report.users += 1;
            }

            Ok::<_, RepositoryError>(report)
        })
    })
    .await?;

    info!(
        tenants = report.tenants,
        users = report.users,
        "Re-encrypted legacy plaintext secrets"
    );
    Ok(report)
}
