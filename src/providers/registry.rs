//! Adapter registry
//!
//! Maps enumerated provider tags to adapter instances. Built once at
//! startup from configuration and injected into the manager; providers with
//! missing credentials are simply not registered.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::warn;

use crate::config::AppConfig;
use crate::providers::{
    DropboxAdapter, GoogleAdapter, MicrosoftAdapter, Provider, ProviderAdapter, ZoomAdapter,
};

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("provider '{name}' is not known")]
    UnknownProvider { name: String },
    #[error("provider '{provider}' is not configured")]
    NotConfigured { provider: Provider },
}

/// Registry of configured provider adapters
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<Provider, Arc<dyn ProviderAdapter>>,
}

impl AdapterRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Build the registry from configuration, registering every provider
    /// with credentials present.
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.provider_http_timeout_seconds))
            .build()
            .context("failed to build provider HTTP client")?;

        let mut registry = Self::new();

        match &config.google {
            Some(creds) => registry.register(Arc::new(GoogleAdapter::new(
                creds.client_id.clone(),
                creds.client_secret.clone(),
                creds.auth_base.clone(),
                creds.api_base.clone(),
                http.clone(),
            ))),
            None => warn!("google adapter not registered: missing client credentials"),
        }

        match &config.microsoft {
            Some(creds) => registry.register(Arc::new(MicrosoftAdapter::new(
                creds.client_id.clone(),
                creds.client_secret.clone(),
                creds.auth_base.clone(),
                creds.api_base.clone(),
                http.clone(),
            ))),
            None => warn!("microsoft adapter not registered: missing client credentials"),
        }

        match &config.zoom {
            Some(creds) => registry.register(Arc::new(ZoomAdapter::new(
                creds.client_id.clone(),
                creds.client_secret.clone(),
                creds.auth_base.clone(),
                creds.api_base.clone(),
                http.clone(),
            ))),
            None => warn!("zoom adapter not registered: missing client credentials"),
        }

        match &config.dropbox {
            Some(creds) => registry.register(Arc::new(DropboxAdapter::new(
                creds.client_id.clone(),
                creds.client_secret.clone(),
                creds.auth_base.clone(),
                creds.api_base.clone(),
                http.clone(),
            ))),
            None => warn!("dropbox adapter not registered: missing client credentials"),
        }

        Ok(registry)
    }

    /// Register an adapter under its own tag
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.provider(), adapter);
    }

    /// Get the adapter for a provider tag
    pub fn get(&self, provider: Provider) -> Result<Arc<dyn ProviderAdapter>, RegistryError> {
        self.adapters
            .get(&provider)
            .cloned()
            .ok_or(RegistryError::NotConfigured { provider })
    }

    /// Tags with a registered adapter, in stable order
    pub fn configured(&self) -> Vec<Provider> {
        let mut providers: Vec<_> = self.adapters.keys().copied().collect();
        providers.sort_by_key(|p| p.as_str());
        providers
    }
}
