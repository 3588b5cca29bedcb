//! Provider adapters
//!
//! This module provides the provider SDK:
//! - The `ProviderAdapter` trait defining the capability set every provider
//!   implements
//! - The enumerated `Provider` tag and the registry that maps tags to
//!   adapter instances
//! - One adapter per external provider

pub mod adapter;
pub mod dropbox;
pub mod google;
pub mod microsoft;
pub mod registry;
pub mod zoom;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub use adapter::{AdapterError, ProviderAdapter, TokenGrant};
pub use dropbox::DropboxAdapter;
pub use google::GoogleAdapter;
pub use microsoft::MicrosoftAdapter;
pub use registry::{AdapterRegistry, RegistryError};
pub use zoom::ZoomAdapter;

/// Enumerated provider tag.
///
/// Adapters are selected through the registry by this tag; the string form
/// is what gets persisted and what appears in URLs and audit rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Google,
    Microsoft,
    Zoom,
    Dropbox,
}

impl Provider {
    pub const ALL: [Provider; 4] = [
        Provider::Google,
        Provider::Microsoft,
        Provider::Zoom,
        Provider::Dropbox,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Google => "google",
            Provider::Microsoft => "microsoft",
            Provider::Zoom => "zoom",
            Provider::Dropbox => "dropbox",
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = RegistryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "google" => Ok(Provider::Google),
            "microsoft" => Ok(Provider::Microsoft),
            "zoom" => Ok(Provider::Zoom),
            "dropbox" => Ok(Provider::Dropbox),
            other => Err(RegistryError::UnknownProvider {
                name: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
