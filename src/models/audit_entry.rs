//! Audit entry entity model
//!
//! Append-only log of credential-affecting actions. Deliberately has no
//! foreign key to integrations: failed pre-integration attempts carry no
//! integration id, and audit rows outlive administrative deletion.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "audit_entries")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: Uuid,

    /// Who triggered the action: a user id, operator name, or "system"
    pub actor: String,

    /// Affected integration, if one existed at the time
    pub integration_id: Option<Uuid>,

    /// Provider tag, when known
    pub provider: Option<String>,

    /// begin|callback_success|callback_failure|refresh|revoke
    pub action: String,

    /// "success" or "failure", with detail in metadata
    pub outcome: String,

    /// Contextual metadata; must never contain secret material
    #[sea_orm(column_type = "JsonBinary")]
    pub metadata: Option<JsonValue>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Audited action kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Begin,
    CallbackSuccess,
    CallbackFailure,
    Refresh,
    Revoke,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Begin => "begin",
            AuditAction::CallbackSuccess => "callback_success",
            AuditAction::CallbackFailure => "callback_failure",
            AuditAction::Refresh => "refresh",
            AuditAction::Revoke => "revoke",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
