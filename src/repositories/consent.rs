//! Consent record repository
//!
//! Append-only: rows are inserted at callback time and never updated.

use chrono::Utc;
use sea_orm::{ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::consent_record::{self, ActiveModel, Entity, Model};
use crate::models::integration::scopes_to_json;

/// Repository for consent history
#[derive(Clone)]
pub struct ConsentRepository {
    db: Arc<DatabaseConnection>,
}

impl ConsentRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Append a consent row for the scopes granted at a callback. Runs on
    /// the caller's connection so it commits with the activation.
    pub async fn append<C: ConnectionTrait>(
        &self,
        conn: &C,
        integration_id: Uuid,
        scopes: &[String],
    ) -> Result<Model, sea_orm::DbErr> {
        let model = Model {
            id: Uuid::new_v4(),
            integration_id,
            scopes: scopes_to_json(scopes),
            granted_at: Utc::now().into(),
        };

        let active = ActiveModel {
            id: Set(model.id),
            integration_id: Set(model.integration_id),
            scopes: Set(model.scopes.clone()),
            granted_at: Set(model.granted_at),
        };
        Entity::insert(active).exec_without_returning(conn).await?;

        Ok(model)
    }

    /// Full consent history for an integration, oldest first.
    pub async fn list_by_integration(
        &self,
        integration_id: Uuid,
    ) -> Result<Vec<Model>, sea_orm::DbErr> {
        Entity::find()
            .filter(consent_record::Column::IntegrationId.eq(integration_id))
            .order_by_asc(consent_record::Column::GrantedAt)
            .all(&*self.db)
            .await
    }
}
