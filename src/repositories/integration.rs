//! Integration repository for database operations
//!
//! Lifecycle queries over the integrations table. Status transitions flip
//! rows in place and keep history; the only physical deletion is the
//! administrative `purge`, which cascades to owned token and consent rows.

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::integration::{self, ActiveModel, Entity, IntegrationStatus, Model};
use crate::providers::Provider;

/// Repository for integration database operations
#[derive(Clone)]
pub struct IntegrationRepository {
    db: Arc<DatabaseConnection>,
}

impl IntegrationRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Create a fresh `pending` row for (user, provider).
    pub async fn create_pending(
        &self,
        user_id: Uuid,
        provider: Provider,
    ) -> Result<Model, sea_orm::DbErr> {
        let now = Utc::now();
        let model = Model {
            id: Uuid::new_v4(),
            user_id,
            provider: provider.as_str().to_string(),
            provider_account_id: None,
            status: IntegrationStatus::Pending.as_str().to_string(),
            granted_scopes: None,
            created_at: now.into(),
            updated_at: now.into(),
            last_refreshed_at: None,
        };

        let active = ActiveModel {
            id: Set(model.id),
            user_id: Set(model.user_id),
            provider: Set(model.provider.clone()),
            provider_account_id: Set(None),
            status: Set(model.status.clone()),
            granted_scopes: Set(None),
            created_at: Set(model.created_at),
            updated_at: Set(model.updated_at),
            last_refreshed_at: Set(None),
        };
        Entity::insert(active)
            .exec_without_returning(&*self.db)
            .await?;

        Ok(model)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Model>, sea_orm::DbErr> {
        Entity::find_by_id(id).one(&*self.db).await
    }

    /// The single active row for (user, provider), if any.
    pub async fn find_active(
        &self,
        user_id: Uuid,
        provider: Provider,
    ) -> Result<Option<Model>, sea_orm::DbErr> {
        Entity::find()
            .filter(integration::Column::UserId.eq(user_id))
            .filter(integration::Column::Provider.eq(provider.as_str()))
            .filter(integration::Column::Status.eq(IntegrationStatus::Active.as_str()))
            .one(&*self.db)
            .await
    }

    /// Most recent `pending` row for (user, provider).
    pub async fn latest_pending(
        &self,
        user_id: Uuid,
        provider: Provider,
    ) -> Result<Option<Model>, sea_orm::DbErr> {
        Entity::find()
            .filter(integration::Column::UserId.eq(user_id))
            .filter(integration::Column::Provider.eq(provider.as_str()))
            .filter(integration::Column::Status.eq(IntegrationStatus::Pending.as_str()))
            .order_by_desc(integration::Column::CreatedAt)
            .one(&*self.db)
            .await
    }

    /// All integrations for a user, newest first.
    pub async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<Model>, sea_orm::DbErr> {
        Entity::find()
            .filter(integration::Column::UserId.eq(user_id))
            .order_by_desc(integration::Column::CreatedAt)
            .order_by_desc(integration::Column::Id)
            .all(&*self.db)
            .await
    }

    /// Retire any lingering `pending` rows for the pair before a new begin.
    pub async fn supersede_pending(
        &self,
        user_id: Uuid,
        provider: Provider,
    ) -> Result<u64, sea_orm::DbErr> {
        let result = Entity::update_many()
            .col_expr(
                integration::Column::Status,
                Expr::value(IntegrationStatus::Expired.as_str()),
            )
            .col_expr(
                integration::Column::UpdatedAt,
                Expr::value(sea_orm::prelude::DateTimeWithTimeZone::from(Utc::now())),
            )
            .filter(integration::Column::UserId.eq(user_id))
            .filter(integration::Column::Provider.eq(provider.as_str()))
            .filter(integration::Column::Status.eq(IntegrationStatus::Pending.as_str()))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected)
    }

    /// Retire any `active` row for the pair other than `except_id`. Runs on
    /// the caller's connection so activation and supersede commit together.
    pub async fn supersede_active<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: Uuid,
        provider: Provider,
        except_id: Uuid,
    ) -> Result<u64, sea_orm::DbErr> {
        let result = Entity::update_many()
            .col_expr(
                integration::Column::Status,
                Expr::value(IntegrationStatus::Expired.as_str()),
            )
            .col_expr(
                integration::Column::UpdatedAt,
                Expr::value(sea_orm::prelude::DateTimeWithTimeZone::from(Utc::now())),
            )
            .filter(integration::Column::UserId.eq(user_id))
            .filter(integration::Column::Provider.eq(provider.as_str()))
            .filter(integration::Column::Status.eq(IntegrationStatus::Active.as_str()))
            .filter(integration::Column::Id.ne(except_id))
            .exec(conn)
            .await?;

        Ok(result.rows_affected)
    }

    /// Transition a row to `active` with the identity and scopes granted at
    /// the callback.
    pub async fn activate<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: Uuid,
        provider_account_id: &str,
        granted_scopes: JsonValue,
    ) -> Result<Model, sea_orm::DbErr> {
        let existing = Entity::find_by_id(id)
            .one(conn)
            .await?
            .ok_or_else(|| sea_orm::DbErr::RecordNotFound(format!("integration {}", id)))?;

        let mut active: ActiveModel = existing.into();
        active.status = Set(IntegrationStatus::Active.as_str().to_string());
        active.provider_account_id = Set(Some(provider_account_id.to_string()));
        active.granted_scopes = Set(Some(granted_scopes));
        active.updated_at = Set(Utc::now().into());

        active.update(conn).await
    }

    /// Flip a row's status.
    pub async fn set_status<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: Uuid,
        status: IntegrationStatus,
    ) -> Result<Model, sea_orm::DbErr> {
        let existing = Entity::find_by_id(id)
            .one(conn)
            .await?
            .ok_or_else(|| sea_orm::DbErr::RecordNotFound(format!("integration {}", id)))?;

        let mut active: ActiveModel = existing.into();
        active.status = Set(status.as_str().to_string());
        active.updated_at = Set(Utc::now().into());

        active.update(conn).await
    }

    /// Stamp a successful token rotation.
    pub async fn touch_refreshed<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: Uuid,
    ) -> Result<Model, sea_orm::DbErr> {
        let existing = Entity::find_by_id(id)
            .one(conn)
            .await?
            .ok_or_else(|| sea_orm::DbErr::RecordNotFound(format!("integration {}", id)))?;

        let now = Utc::now();
        let mut active: ActiveModel = existing.into();
        active.last_refreshed_at = Set(Some(now.into()));
        active.updated_at = Set(now.into());

        active.update(conn).await
    }

    /// Administrative hard delete. Cascades to token and consent rows via
    /// the schema; audit rows are untouched by design.
    pub async fn purge(&self, id: Uuid) -> Result<bool, sea_orm::DbErr> {
        let result = Entity::delete_by_id(id).exec(&*self.db).await?;
        Ok(result.rows_affected > 0)
    }
}
