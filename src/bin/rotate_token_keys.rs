//! Re-seal stored token records under the newest vault key.
//!
//! Run after appending a new key to `INTEGRATIONS_CRYPTO_KEYS`: decryption
//! accepts every key in the ring, so rotation works without this step, but
//! re-sealing lets old keys eventually be dropped from the ring.

use anyhow::{Context, Result};
use integrations::{config::ConfigLoader, crypto::KeyRing, db, repositories::TokenVault};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ConfigLoader::new().load().context("loading configuration")?;

    let keys = KeyRing::new(config.crypto_keys.clone()).context("initializing vault key ring")?;

    let db = db::init_pool(&config)
        .await
        .context("initializing database connection pool")?;

    let vault = TokenVault::new(Arc::new(db), keys);
    let (scanned, resealed) = vault
        .reseal_stale()
        .await
        .context("re-sealing token records")?;

    println!(
        "Scanned {} token record(s); re-sealed {} under the newest key.",
        scanned, resealed
    );

    Ok(())
}
