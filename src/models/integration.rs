//! Integration entity model
//!
//! An integration is the durable record of one (user, provider) delegated
//! access relationship. At most one row per pair is `active`; superseded
//! rows are status-flipped and kept for audit history.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "integrations")]
pub struct Model {
    /// Unique identifier for the integration (primary key)
    #[sea_orm(primary_key)]
    pub id: Uuid,

    /// User that owns this integration
    pub user_id: Uuid,

    /// Provider tag (e.g., "google", "zoom")
    pub provider: String,

    /// Stable external account identifier, set on first successful callback
    pub provider_account_id: Option<String>,

    /// Lifecycle status: pending|active|expired|revoked
    pub status: String,

    /// Scopes granted by the user, stored as a JSON array
    #[sea_orm(column_type = "JsonBinary")]
    pub granted_scopes: Option<JsonValue>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,

    /// When tokens were last rotated via refresh
    pub last_refreshed_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_one = "super::token_record::Entity")]
    TokenRecord,
    #[sea_orm(has_many = "super::consent_record::Entity")]
    ConsentRecords,
}

impl Related<super::token_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TokenRecord.def()
    }
}

impl Related<super::consent_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ConsentRecords.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Integration lifecycle states.
///
/// `Expired` and `Revoked` are terminal; reconnecting always creates a fresh
/// `Pending` row rather than resurrecting an old one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationStatus {
    Pending,
    Active,
    Expired,
    Revoked,
}

impl IntegrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationStatus::Pending => "pending",
            IntegrationStatus::Active => "active",
            IntegrationStatus::Expired => "expired",
            IntegrationStatus::Revoked => "revoked",
        }
    }

    /// True for states that can never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, IntegrationStatus::Expired | IntegrationStatus::Revoked)
    }
}

impl std::str::FromStr for IntegrationStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(IntegrationStatus::Pending),
            "active" => Ok(IntegrationStatus::Active),
            "expired" => Ok(IntegrationStatus::Expired),
            "revoked" => Ok(IntegrationStatus::Revoked),
            other => Err(format!("unknown integration status '{}'", other)),
        }
    }
}

impl std::fmt::Display for IntegrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// API-facing view of an integration. Never carries token material.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IntegrationSummary {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider: String,
    pub provider_account_id: Option<String>,
    pub status: String,
    pub granted_scopes: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
    pub last_refreshed_at: Option<String>,
}

impl From<Model> for IntegrationSummary {
    fn from(model: Model) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            provider: model.provider,
            provider_account_id: model.provider_account_id,
            status: model.status,
            granted_scopes: scopes_from_json(model.granted_scopes.as_ref()),
            created_at: model.created_at.to_rfc3339(),
            updated_at: model.updated_at.to_rfc3339(),
            last_refreshed_at: model.last_refreshed_at.map(|ts| ts.to_rfc3339()),
        }
    }
}

/// Decode a JSON array column into a list of scope strings.
pub fn scopes_from_json(value: Option<&JsonValue>) -> Vec<String> {
    value
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Encode a list of scope strings as a JSON array column value.
pub fn scopes_to_json(scopes: &[String]) -> JsonValue {
    JsonValue::Array(
        scopes
            .iter()
            .map(|s| JsonValue::String(s.clone()))
            .collect(),
    )
}
