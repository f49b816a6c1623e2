//! Re-encryption of secrets written before encryption was enforced.

use anyhow::Result;
use sea_orm::{ActiveModelTrait, IntoActiveModel, Set};
use tenant_admin::maintenance::{ReencryptReport, reencrypt_legacy_secrets};
use tenant_admin::repositories::{TenantRepository, UserRepository};

#[path = "test_utils/mod.rs"]
mod test_utils;

use test_utils::{create_customer, create_tenant, create_user, setup_test_db, test_crypto_key};

#[tokio::test]
async fn plaintext_secrets_are_encrypted_once() -> Result<()> {
    let db = setup_test_db().await?;
    let key = test_crypto_key();
    let customer = create_customer(&db, "Contoso").await?;

    let legacy = create_tenant(&db, &key, customer.id).await?;
    let mut active = legacy.clone().into_active_model();
    active.client_secret = Set(Some(b"legacy-secret".to_vec()));
    active.update(&db).await?;

    let untouched = create_tenant(&db, &key, customer.id).await?;

    let user = create_user(&db, "legacy@example.com").await?;
    let mut active = user.clone().into_active_model();
    active.github_token = Set(Some(b"ghp_legacy".to_vec()));
    active.update(&db).await?;

    let report = reencrypt_legacy_secrets(&db, &key).await?;
    assert_eq!(report, ReencryptReport { tenants: 1, users: 1 });

    let tenants = TenantRepository::new(&db, &key);
    let migrated = tenants.find_by_id(legacy.id).await?.expect("tenant exists");
    assert_eq!(
        tenants.decrypt_credentials(&migrated)?.map(|c| c.client_secret),
        Some("legacy-secret".to_string())
    );
    let still = tenants.find_by_id(untouched.id).await?.expect("tenant exists");
    assert_eq!(still.client_secret, untouched.client_secret);

    let users = UserRepository::new(&db);
    let migrated_user = users.find_by_id(user.id).await?.expect("user exists");
    assert_eq!(
        users.github_token(&key, &migrated_user)?.as_deref(),
        Some("ghp_legacy")
    );

    let second = reencrypt_legacy_secrets(&db, &key).await?;
    assert_eq!(second, ReencryptReport::default());
    Ok(())
}
