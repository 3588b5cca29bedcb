//! # Authorization State Store
//!
//! Mints and consumes the single-use CSRF nonces that bind an in-flight
//! authorization to its user, provider, scopes and redirect target. This is
//! the anti-replay mechanism: `consume` has exactly one winner per nonce,
//! decided by the row delete, so a captured callback URL cannot be played
//! twice.

use chrono::{Duration, Utc};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::models::authorization_state::{self, ActiveModel, Entity, Model};
use crate::models::integration::scopes_to_json;
use crate::providers::Provider;

/// Consume failures. All of them surface as the same invalid-state error at
/// the manager boundary; the distinction matters for logging and tests.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("authorization state not found")]
    NotFound,
    #[error("authorization state expired")]
    Expired,
    #[error("authorization state already consumed")]
    AlreadyConsumed,
    #[error(transparent)]
    Db(#[from] sea_orm::DbErr),
}

/// Repository for authorization state records
pub struct StateStore {
    db: Arc<DatabaseConnection>,
}

impl StateStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Mint a nonce and persist the state record binding it.
    pub async fn create(
        &self,
        user_id: Uuid,
        provider: Provider,
        requested_scopes: &[String],
        redirect_uri: &str,
        expires_in_minutes: i64,
    ) -> Result<Model, sea_orm::DbErr> {
        let now = Utc::now();
        let state = Model {
            id: Uuid::new_v4(),
            user_id,
            provider: provider.as_str().to_string(),
            state: generate_state_nonce(),
            requested_scopes: scopes_to_json(requested_scopes),
            redirect_uri: redirect_uri.to_string(),
            created_at: now.into(),
            expires_at: (now + Duration::minutes(expires_in_minutes)).into(),
        };

        let active = ActiveModel {
            id: Set(state.id),
            user_id: Set(state.user_id),
            provider: Set(state.provider.clone()),
            state: Set(state.state.clone()),
            requested_scopes: Set(state.requested_scopes.clone()),
            redirect_uri: Set(state.redirect_uri.clone()),
            created_at: Set(state.created_at),
            expires_at: Set(state.expires_at),
        };
        Entity::insert(active)
            .exec_without_returning(&*self.db)
            .await?;

        Ok(state)
    }

    /// Atomically consume a nonce: read, then delete by id. Under concurrent
    /// consumption only one caller sees its delete take effect; the loser
    /// gets `AlreadyConsumed`. Expiry is checked after winning the delete so
    /// an expired row is still burned, never honored.
    pub async fn consume(&self, nonce: &str) -> Result<Model, StateError> {
        let state = Entity::find()
            .filter(authorization_state::Column::State.eq(nonce))
            .one(&*self.db)
            .await?
            .ok_or(StateError::NotFound)?;

        let delete = Entity::delete_by_id(state.id).exec(&*self.db).await?;
        if delete.rows_affected == 0 {
            return Err(StateError::AlreadyConsumed);
        }

        if state.expires_at.with_timezone(&Utc) <= Utc::now() {
            return Err(StateError::Expired);
        }

        Ok(state)
    }

    /// Garbage-collect expired rows. `consume` rejects expired rows on its
    /// own; this sweep only keeps the table small.
    pub async fn cleanup_expired(&self) -> Result<u64, sea_orm::DbErr> {
        let result = Entity::delete_many()
            .filter(authorization_state::Column::ExpiresAt.lt(Utc::now()))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected)
    }
}

/// Generate a cryptographically secure random state nonce: 32 random bytes,
/// base64url-encoded (256 bits of entropy).
pub fn generate_state_nonce() -> String {
    use rand::Rng;

    let mut bytes = [0u8; 32];
    rand::thread_rng().fill(&mut bytes);

    base64_url::encode(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonces_are_unique_and_url_safe() {
        let a = generate_state_nonce();
        let b = generate_state_nonce();

        assert_ne!(a, b);
        assert_eq!(a.len(), 43, "base64url of 32 bytes without padding");
        assert!(!a.contains('+') && !a.contains('/') && !a.contains('='));
    }
}
