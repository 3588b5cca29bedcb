//! Token vault tests: sealing, key rotation and the state store's
//! single-consumption guarantee, against a migrated SQLite database.

use anyhow::Result;
use chrono::{Duration, Utc};
use sea_orm::EntityTrait;
use uuid::Uuid;

use integrations::crypto::{KeyRing, sealed_key_id};
use integrations::models::token_record;
use integrations::providers::Provider;
use integrations::repositories::{IntegrationRepository, StateStore, StateError, TokenVault, VaultError};

#[path = "test_utils/mod.rs"]
mod test_utils;

fn old_ring() -> KeyRing {
    KeyRing::new(vec![vec![1u8; 32]]).expect("valid ring")
}

fn rotated_ring() -> KeyRing {
    KeyRing::new(vec![vec![1u8; 32], vec![2u8; 32]]).expect("valid ring")
}

#[tokio::test]
async fn stored_tokens_survive_key_rotation() -> Result<()> {
    let (db, _db_file) = test_utils::setup_test_db().await?;

    let integrations = IntegrationRepository::new(db.clone());
    let integration = integrations
        .create_pending(Uuid::new_v4(), Provider::Google)
        .await?;

    let vault = TokenVault::new(db.clone(), old_ring());
    vault
        .store(
            db.as_ref(),
            integration.id,
            "access-1",
            Some("refresh-1"),
            "Bearer",
            Some(Utc::now() + Duration::hours(1)),
            None,
        )
        .await?;

    // A ring extended with a new key still opens the old record
    let rotated_vault = TokenVault::new(db.clone(), rotated_ring());
    let tokens = rotated_vault.retrieve(integration.id).await?;
    assert_eq!(tokens.access_token.as_str(), "access-1");
    assert_eq!(
        tokens.refresh_token.as_ref().map(|t| t.as_str()),
        Some("refresh-1")
    );

    Ok(())
}

#[tokio::test]
async fn reseal_moves_records_to_the_newest_key() -> Result<()> {
    let (db, _db_file) = test_utils::setup_test_db().await?;

    let integrations = IntegrationRepository::new(db.clone());
    let integration = integrations
        .create_pending(Uuid::new_v4(), Provider::Google)
        .await?;

    let vault = TokenVault::new(db.clone(), old_ring());
    vault
        .store(
            db.as_ref(),
            integration.id,
            "access-1",
            Some("refresh-1"),
            "Bearer",
            None,
            None,
        )
        .await?;

    let rotated_vault = TokenVault::new(db.clone(), rotated_ring());
    let (scanned, resealed) = rotated_vault.reseal_stale().await?;
    assert_eq!(scanned, 1);
    assert_eq!(resealed, 1);

    // Ciphertext now carries the new key id and still round-trips
    let record = token_record::Entity::find()
        .one(db.as_ref())
        .await?
        .expect("record exists");
    assert_eq!(sealed_key_id(&record.access_token_ciphertext), Some(2));

    let tokens = rotated_vault.retrieve(integration.id).await?;
    assert_eq!(tokens.access_token.as_str(), "access-1");

    // A second pass finds nothing stale
    let (_, resealed_again) = rotated_vault.reseal_stale().await?;
    assert_eq!(resealed_again, 0);

    Ok(())
}

#[tokio::test]
async fn decryption_with_the_wrong_ring_is_an_integrity_error() -> Result<()> {
    let (db, _db_file) = test_utils::setup_test_db().await?;

    let integrations = IntegrationRepository::new(db.clone());
    let integration = integrations
        .create_pending(Uuid::new_v4(), Provider::Google)
        .await?;

    let vault = TokenVault::new(db.clone(), rotated_ring());
    vault
        .store(
            db.as_ref(),
            integration.id,
            "access-1",
            None,
            "Bearer",
            None,
            None,
        )
        .await?;

    // Sealed under key id 2; a ring that only knows key 1 must fail loudly
    let narrow_vault = TokenVault::new(db.clone(), old_ring());
    let result = narrow_vault.retrieve(integration.id).await;
    assert!(matches!(result, Err(VaultError::Integrity(_))));

    Ok(())
}

#[tokio::test]
async fn missing_token_record_is_reported() -> Result<()> {
    let (db, _db_file) = test_utils::setup_test_db().await?;

    let vault = TokenVault::new(db.clone(), old_ring());
    let missing = Uuid::new_v4();
    let result = vault.retrieve(missing).await;
    assert!(matches!(result, Err(VaultError::NotFound(id)) if id == missing));

    Ok(())
}

#[tokio::test]
async fn state_nonce_is_single_use() -> Result<()> {
    let (db, _db_file) = test_utils::setup_test_db().await?;

    let states = StateStore::new(db.clone());
    let state = states
        .create(
            Uuid::new_v4(),
            Provider::Google,
            &["calendar.read".to_string()],
            "https://app.example.com/cb",
            10,
        )
        .await?;

    let consumed = states.consume(&state.state).await?;
    assert_eq!(consumed.id, state.id);

    // Second consumption fails closed
    let replay = states.consume(&state.state).await;
    assert!(matches!(
        replay,
        Err(StateError::NotFound | StateError::AlreadyConsumed)
    ));

    Ok(())
}

#[tokio::test]
async fn expired_state_rejected_even_if_present() -> Result<()> {
    let (db, _db_file) = test_utils::setup_test_db().await?;

    let states = StateStore::new(db.clone());
    let state = states
        .create(
            Uuid::new_v4(),
            Provider::Google,
            &["calendar.read".to_string()],
            "https://app.example.com/cb",
            -1,
        )
        .await?;

    let result = states.consume(&state.state).await;
    assert!(matches!(result, Err(StateError::Expired)));

    Ok(())
}

#[tokio::test]
async fn cleanup_sweeps_only_expired_states() -> Result<()> {
    let (db, _db_file) = test_utils::setup_test_db().await?;

    let states = StateStore::new(db.clone());
    let expired = states
        .create(
            Uuid::new_v4(),
            Provider::Google,
            &[],
            "https://app.example.com/cb",
            -1,
        )
        .await?;
    let live = states
        .create(
            Uuid::new_v4(),
            Provider::Google,
            &[],
            "https://app.example.com/cb",
            10,
        )
        .await?;

    let removed = states.cleanup_expired().await?;
    assert_eq!(removed, 1);

    assert!(matches!(
        states.consume(&expired.state).await,
        Err(StateError::NotFound)
    ));
    assert!(states.consume(&live.state).await.is_ok());

    Ok(())
}
