use anyhow::{Context, Result};
use tenant_admin::{config::ConfigLoader, crypto::CryptoKey, db, maintenance, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    let loader = ConfigLoader::new();
    let config = loader.load().context("loading configuration")?;
    telemetry::init_tracing(&config).context("initializing tracing")?;

    let key_bytes = config
        .crypto_key
        .clone()
        .context("crypto key not present in configuration")?;
    let crypto_key = CryptoKey::new(key_bytes).context("initializing crypto key")?;

    let db = db::init_pool(&config)
        .await
        .context("initializing database connection pool")?;

    let report = maintenance::reencrypt_legacy_secrets(&db, &crypto_key)
        .await
        .context("re-encrypting legacy secrets")?;

    println!(
        "Re-encrypted {} tenant(s) and {} user(s) containing legacy plaintext secrets.",
        report.tenants, report.users
    );

    Ok(())
}
