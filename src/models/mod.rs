//! Entity models for the Integrations API.
//!
//! SeaORM entities for the five persisted tables plus the API-facing
//! summary types derived from them.

pub mod audit_entry;
pub mod authorization_state;
pub mod consent_record;
pub mod integration;
pub mod token_record;

pub use audit_entry::AuditAction;
pub use integration::{IntegrationStatus, IntegrationSummary};
