//! Audit sink
//!
//! Append-only log of credential-affecting actions. Metadata must never
//! contain token material; callers pass contextual values only.

use chrono::Utc;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::audit_entry::{self, ActiveModel, AuditAction, Entity, Model};
use crate::providers::Provider;

pub const OUTCOME_SUCCESS: &str = "success";
pub const OUTCOME_FAILURE: &str = "failure";

/// Append-only audit writer
#[derive(Clone)]
pub struct AuditSink {
    db: Arc<DatabaseConnection>,
}

impl AuditSink {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Append one entry on the caller's connection, so credential writes and
    /// their audit rows commit in the same transaction.
    #[allow(clippy::too_many_arguments)]
    pub async fn record<C: ConnectionTrait>(
        &self,
        conn: &C,
        actor: &str,
        integration_id: Option<Uuid>,
        provider: Option<Provider>,
        action: AuditAction,
        outcome: &str,
        metadata: Option<JsonValue>,
    ) -> Result<Model, sea_orm::DbErr> {
        let model = Model {
            id: Uuid::new_v4(),
            actor: actor.to_string(),
            integration_id,
            provider: provider.map(|p| p.as_str().to_string()),
            action: action.as_str().to_string(),
            outcome: outcome.to_string(),
            metadata,
            created_at: Utc::now().into(),
        };

        let active = ActiveModel {
            id: Set(model.id),
            actor: Set(model.actor.clone()),
            integration_id: Set(model.integration_id),
            provider: Set(model.provider.clone()),
            action: Set(model.action.clone()),
            outcome: Set(model.outcome.clone()),
            metadata: Set(model.metadata.clone()),
            created_at: Set(model.created_at),
        };
        Entity::insert(active).exec_without_returning(conn).await?;

        Ok(model)
    }

    /// Entries for one integration, oldest first.
    pub async fn list_for_integration(
        &self,
        integration_id: Uuid,
    ) -> Result<Vec<Model>, sea_orm::DbErr> {
        Entity::find()
            .filter(audit_entry::Column::IntegrationId.eq(integration_id))
            .order_by_asc(audit_entry::Column::CreatedAt)
            .all(&*self.db)
            .await
    }
}
