//! # Token Vault
//!
//! Encrypted-at-rest storage for the current token pair of each
//! integration. Plaintext token material only exists on either side of this
//! module's seal/open boundary, and decrypted values come back in
//! `Zeroizing` wrappers so they are wiped when the caller drops them.
//!
//! Mutating operations take the caller's connection so they can participate
//! in the callback transaction; reads go through the vault's own pool.

use chrono::{DateTime, Utc};
use sea_orm::{ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::crypto::{CryptoError, KeyRing, open_bytes, seal_bytes};
use crate::models::token_record::{self, ActiveModel, Entity, Model};

/// Vault error types
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("no token record for integration {0}")]
    NotFound(Uuid),
    #[error("token integrity failure: {0}")]
    Integrity(#[from] CryptoError),
    #[error(transparent)]
    Db(#[from] sea_orm::DbErr),
}

/// Decrypted token pair. Callers must not persist these values beyond the
/// immediate provider call.
pub struct DecryptedTokens {
    pub access_token: Zeroizing<String>,
    pub refresh_token: Option<Zeroizing<String>>,
    pub token_type: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub granted_scope: Option<String>,
}

/// Encrypted token storage keyed by integration
#[derive(Clone)]
pub struct TokenVault {
    db: Arc<DatabaseConnection>,
    keys: KeyRing,
}

impl TokenVault {
    pub fn new(db: Arc<DatabaseConnection>, keys: KeyRing) -> Self {
        Self { db, keys }
    }

    /// Replace the token record for an integration with a freshly sealed
    /// pair. Any previous record is removed first: there is exactly one
    /// current pair per integration.
    pub async fn store<C: ConnectionTrait>(
        &self,
        conn: &C,
        integration_id: Uuid,
        access_token: &str,
        refresh_token: Option<&str>,
        token_type: &str,
        expires_at: Option<DateTime<Utc>>,
        granted_scope: Option<&str>,
    ) -> Result<Model, VaultError> {
        let aad = token_aad(integration_id);

        let access_ciphertext = seal_bytes(&self.keys, aad.as_bytes(), access_token.as_bytes())?;
        let refresh_ciphertext = refresh_token
            .map(|token| seal_bytes(&self.keys, aad.as_bytes(), token.as_bytes()))
            .transpose()?;

        Entity::delete_many()
            .filter(token_record::Column::IntegrationId.eq(integration_id))
            .exec(conn)
            .await?;

        let now = Utc::now();
        let record = Model {
            id: Uuid::new_v4(),
            integration_id,
            access_token_ciphertext: access_ciphertext,
            refresh_token_ciphertext: refresh_ciphertext,
            token_type: token_type.to_string(),
            expires_at: expires_at.map(Into::into),
            granted_scope: granted_scope.map(str::to_string),
            created_at: now.into(),
            updated_at: now.into(),
        };

        let active = ActiveModel {
            id: Set(record.id),
            integration_id: Set(record.integration_id),
            access_token_ciphertext: Set(record.access_token_ciphertext.clone()),
            refresh_token_ciphertext: Set(record.refresh_token_ciphertext.clone()),
            token_type: Set(record.token_type.clone()),
            expires_at: Set(record.expires_at),
            granted_scope: Set(record.granted_scope.clone()),
            created_at: Set(record.created_at),
            updated_at: Set(record.updated_at),
        };
        Entity::insert(active).exec_without_returning(conn).await?;

        Ok(record)
    }

    /// Decrypt the current pair on demand.
    pub async fn retrieve(&self, integration_id: Uuid) -> Result<DecryptedTokens, VaultError> {
        let record = self
            .record(integration_id)
            .await?
            .ok_or(VaultError::NotFound(integration_id))?;

        self.decrypt(&record)
    }

    /// Decrypt an already-loaded record.
    pub fn decrypt(&self, record: &Model) -> Result<DecryptedTokens, VaultError> {
        let aad = token_aad(record.integration_id);

        let access = open_bytes(&self.keys, aad.as_bytes(), &record.access_token_ciphertext)
            .and_then(|bytes| {
                String::from_utf8(bytes)
                    .map_err(|e| CryptoError::DecryptionFailed(format!("invalid UTF-8: {}", e)))
            })?;

        let refresh = record
            .refresh_token_ciphertext
            .as_ref()
            .map(|ciphertext| {
                open_bytes(&self.keys, aad.as_bytes(), ciphertext).and_then(|bytes| {
                    String::from_utf8(bytes)
                        .map_err(|e| CryptoError::DecryptionFailed(format!("invalid UTF-8: {}", e)))
                })
            })
            .transpose()?;

        Ok(DecryptedTokens {
            access_token: Zeroizing::new(access),
            refresh_token: refresh.map(Zeroizing::new),
            token_type: record.token_type.clone(),
            expires_at: record.expires_at.map(|ts| ts.with_timezone(&Utc)),
            granted_scope: record.granted_scope.clone(),
        })
    }

    /// Raw record without decryption.
    pub async fn record(&self, integration_id: Uuid) -> Result<Option<Model>, VaultError> {
        Ok(Entity::find()
            .filter(token_record::Column::IntegrationId.eq(integration_id))
            .one(&*self.db)
            .await?)
    }

    /// Rotate the access token after a successful refresh. The refresh token
    /// ciphertext is replaced only when the provider issued a new one; some
    /// providers rotate, some keep the original.
    pub async fn rotate<C: ConnectionTrait>(
        &self,
        conn: &C,
        integration_id: Uuid,
        new_access_token: &str,
        new_refresh_token: Option<&str>,
        new_expires_at: Option<DateTime<Utc>>,
    ) -> Result<Model, VaultError> {
        let record = Entity::find()
            .filter(token_record::Column::IntegrationId.eq(integration_id))
            .one(conn)
            .await?
            .ok_or(VaultError::NotFound(integration_id))?;

        let aad = token_aad(integration_id);
        let access_ciphertext =
            seal_bytes(&self.keys, aad.as_bytes(), new_access_token.as_bytes())?;
        let refresh_ciphertext = new_refresh_token
            .map(|token| seal_bytes(&self.keys, aad.as_bytes(), token.as_bytes()))
            .transpose()?;

        let mut active: ActiveModel = record.into();
        active.access_token_ciphertext = Set(access_ciphertext);
        if let Some(ciphertext) = refresh_ciphertext {
            active.refresh_token_ciphertext = Set(Some(ciphertext));
        }
        active.expires_at = Set(new_expires_at.map(Into::into));
        active.updated_at = Set(Utc::now().into());

        Ok(sea_orm::ActiveModelTrait::update(active, conn).await?)
    }

    /// Re-seal every record not sealed under the ring's newest key. Backs
    /// the key-rotation utility; returns (records scanned, records
    /// re-sealed). A record that fails to open is reported, not skipped
    /// silently.
    pub async fn reseal_stale(&self) -> Result<(usize, usize), VaultError> {
        let current = self.keys.current_key_id();
        let records = Entity::find().all(&*self.db).await?;
        let scanned = records.len();
        let mut resealed = 0usize;

        for record in records {
            let access_stale = crate::crypto::sealed_key_id(&record.access_token_ciphertext)
                != Some(current);
            let refresh_stale = record
                .refresh_token_ciphertext
                .as_ref()
                .is_some_and(|ct| crate::crypto::sealed_key_id(ct) != Some(current));

            if !access_stale && !refresh_stale {
                continue;
            }

            let tokens = self.decrypt(&record)?;
            let aad = token_aad(record.integration_id);

            let mut active: ActiveModel = record.into();
            active.access_token_ciphertext = Set(seal_bytes(
                &self.keys,
                aad.as_bytes(),
                tokens.access_token.as_bytes(),
            )?);
            if let Some(refresh) = tokens.refresh_token.as_ref() {
                active.refresh_token_ciphertext = Set(Some(seal_bytes(
                    &self.keys,
                    aad.as_bytes(),
                    refresh.as_bytes(),
                )?));
            }
            active.updated_at = Set(Utc::now().into());
            sea_orm::ActiveModelTrait::update(active, &*self.db).await?;
            resealed += 1;
        }

        Ok((scanned, resealed))
    }

    /// Drop the token record. Used on revocation; tokens must not linger.
    pub async fn delete<C: ConnectionTrait>(
        &self,
        conn: &C,
        integration_id: Uuid,
    ) -> Result<bool, VaultError> {
        let result = Entity::delete_many()
            .filter(token_record::Column::IntegrationId.eq(integration_id))
            .exec(conn)
            .await?;

        Ok(result.rows_affected > 0)
    }
}

/// AAD binding a sealed token to its integration, so ciphertext cannot be
/// replayed across rows.
fn token_aad(integration_id: Uuid) -> String {
    format!("integration|{}", integration_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aad_is_integration_scoped() {
        let a = token_aad(Uuid::from_u128(1));
        let b = token_aad(Uuid::from_u128(2));
        assert_ne!(a, b);
        assert!(a.starts_with("integration|"));
    }
}
