//! Token record entity model
//!
//! The current access/refresh token pair for an integration. Token material
//! only ever appears here as ciphertext; decryption happens inside the
//! token vault.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "token_records")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: Uuid,

    /// Owning integration (unique: one current pair per integration)
    pub integration_id: Uuid,

    /// AES-GCM sealed access token
    pub access_token_ciphertext: Vec<u8>,

    /// AES-GCM sealed refresh token; some providers issue access-only grants
    pub refresh_token_ciphertext: Option<Vec<u8>>,

    /// Token type reported by the provider (almost always "Bearer")
    pub token_type: String,

    /// Absolute expiry of the access token, when the provider reports one
    pub expires_at: Option<DateTimeWithTimeZone>,

    /// Raw scope string returned with the grant
    pub granted_scope: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::integration::Entity",
        from = "Column::IntegrationId",
        to = "super::integration::Column::Id"
    )]
    Integration,
}

impl Related<super::integration::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Integration.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
