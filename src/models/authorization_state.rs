//! Authorization state entity model
//!
//! Ephemeral, single-use rows binding a CSRF nonce to an in-flight
//! authorization. Consumed exactly once by the callback handler.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "authorization_states")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: Uuid,

    /// User that initiated the authorization
    pub user_id: Uuid,

    /// Provider tag the nonce is bound to
    pub provider: String,

    /// CSRF nonce round-tripped through the provider redirect
    pub state: String,

    /// Scopes the user asked for, stored as a JSON array
    #[sea_orm(column_type = "JsonBinary")]
    pub requested_scopes: JsonValue,

    /// Redirect URI the code exchange must repeat verbatim
    pub redirect_uri: String,

    pub created_at: DateTimeWithTimeZone,

    /// Hard expiry; consume rejects the row past this point even if present
    pub expires_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
