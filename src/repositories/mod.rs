//! Repositories for database operations.

pub mod audit;
pub mod consent;
pub mod integration;
pub mod state_store;
pub mod token_vault;

pub use audit::AuditSink;
pub use consent::ConsentRepository;
pub use integration::IntegrationRepository;
pub use state_store::{StateError, StateStore};
pub use token_vault::{DecryptedTokens, TokenVault, VaultError};
