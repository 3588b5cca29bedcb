//! # OAuth Manager
//!
//! Orchestrates the credential lifecycle across the state store, token
//! vault, integration repository, consent history and audit sink. This is
//! the only module that performs integration status transitions; adapters
//! and repositories report typed errors upward and never decide state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use sea_orm::{DatabaseConnection, TransactionTrait};
use serde_json::json;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::crypto::KeyRing;
use crate::models::audit_entry::AuditAction;
use crate::models::integration::{IntegrationStatus, IntegrationSummary, scopes_from_json};
use crate::providers::{AdapterError, AdapterRegistry, Provider, RegistryError};
use crate::repositories::audit::{OUTCOME_FAILURE, OUTCOME_SUCCESS};
use crate::repositories::{
    AuditSink, ConsentRepository, IntegrationRepository, StateError, StateStore, TokenVault,
    VaultError,
};

/// Manager-level error surface. Every variant carries a stable snake_case
/// code the HTTP layer maps to a status without protocol knowledge.
#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("provider '{0}' is not known")]
    UnknownProvider(String),

    #[error("scope '{scope}' is not supported by provider {provider}")]
    UnsupportedScope { provider: Provider, scope: String },

    #[error("authorization state is invalid, expired, or already used")]
    InvalidState,

    #[error("the provider denied authorization: {reason}")]
    AuthorizationDenied { reason: String },

    #[error("provider unavailable: {details}")]
    ProviderUnavailable { details: String },

    #[error("provider rejected the request: {code}")]
    ProviderRejected { code: String },

    #[error("provider returned an unsupported response: {details}")]
    ProviderUnsupportedResponse { details: String },

    #[error("integration {0} not found")]
    IntegrationNotFound(Uuid),

    #[error("integration {id} is '{status}', expected '{expected}'")]
    InvalidIntegrationState {
        id: Uuid,
        status: String,
        expected: &'static str,
    },

    #[error("integration {0} has no refresh token; re-authorization is required")]
    NoRefreshToken(Uuid),

    #[error("no stored tokens for integration {0}")]
    TokenNotFound(Uuid),

    #[error("token integrity failure: {0}")]
    TokenIntegrity(String),

    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("internal error: {0}")]
    Internal(String),
}

impl OAuthError {
    /// Stable error code for the routing layer.
    pub fn code(&self) -> &'static str {
        match self {
            OAuthError::UnknownProvider(_) => "unknown_provider",
            OAuthError::UnsupportedScope { .. } => "unsupported_scope",
            OAuthError::InvalidState => "invalid_state",
            OAuthError::AuthorizationDenied { .. } => "authorization_denied",
            OAuthError::ProviderUnavailable { .. } => "provider_unavailable",
            OAuthError::ProviderRejected { .. } => "provider_rejected",
            OAuthError::ProviderUnsupportedResponse { .. } => "provider_unsupported_response",
            OAuthError::IntegrationNotFound(_) => "integration_not_found",
            OAuthError::InvalidIntegrationState { .. } => "invalid_integration_state",
            OAuthError::NoRefreshToken(_) => "no_refresh_token",
            OAuthError::TokenNotFound(_) => "token_not_found",
            OAuthError::TokenIntegrity(_) => "token_integrity",
            OAuthError::Database(_) => "database_error",
            OAuthError::Internal(_) => "internal_error",
        }
    }

    /// True when a caller may retry the same call with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, OAuthError::ProviderUnavailable { .. })
    }
}

impl From<AdapterError> for OAuthError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::UnsupportedScope { provider, scope } => {
                OAuthError::UnsupportedScope { provider, scope }
            }
            AdapterError::Unavailable { details, .. } => OAuthError::ProviderUnavailable { details },
            AdapterError::Rejected { code, .. } => OAuthError::ProviderRejected { code },
            AdapterError::UnsupportedResponse { details, .. } => {
                OAuthError::ProviderUnsupportedResponse { details }
            }
        }
    }
}

impl From<RegistryError> for OAuthError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::UnknownProvider { name } => OAuthError::UnknownProvider(name),
            RegistryError::NotConfigured { provider } => {
                OAuthError::UnknownProvider(provider.as_str().to_string())
            }
        }
    }
}

impl From<StateError> for OAuthError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::NotFound | StateError::Expired | StateError::AlreadyConsumed => {
                OAuthError::InvalidState
            }
            StateError::Db(db) => OAuthError::Database(db),
        }
    }
}

impl From<VaultError> for OAuthError {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::NotFound(id) => OAuthError::TokenNotFound(id),
            VaultError::Integrity(e) => OAuthError::TokenIntegrity(e.to_string()),
            VaultError::Db(db) => OAuthError::Database(db),
        }
    }
}

/// Result of beginning an authorization.
#[derive(Debug, Clone)]
pub struct BeginAuthorization {
    pub authorize_url: Url,
    pub integration: IntegrationSummary,
    pub state_expires_at: DateTime<Utc>,
}

/// The orchestrator. One instance per process, shared behind `Arc`.
pub struct OAuthManager {
    db: Arc<DatabaseConnection>,
    registry: AdapterRegistry,
    integrations: IntegrationRepository,
    vault: TokenVault,
    states: StateStore,
    consents: ConsentRepository,
    audit: AuditSink,
    state_ttl_minutes: i64,
    refresh_margin: Duration,
    refresh_locks: StdMutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl OAuthManager {
    pub fn new(
        db: Arc<DatabaseConnection>,
        registry: AdapterRegistry,
        keys: KeyRing,
        state_ttl_minutes: i64,
        refresh_margin_seconds: i64,
    ) -> Self {
        Self {
            integrations: IntegrationRepository::new(db.clone()),
            vault: TokenVault::new(db.clone(), keys),
            states: StateStore::new(db.clone()),
            consents: ConsentRepository::new(db.clone()),
            audit: AuditSink::new(db.clone()),
            db,
            registry,
            state_ttl_minutes,
            refresh_margin: Duration::seconds(refresh_margin_seconds),
            refresh_locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Assemble a manager from validated configuration.
    pub fn from_config(db: Arc<DatabaseConnection>, config: &AppConfig) -> anyhow::Result<Self> {
        let registry = AdapterRegistry::from_config(config)?;
        let keys = KeyRing::new(config.crypto_keys.clone())?;
        Ok(Self::new(
            db,
            registry,
            keys,
            config.state_ttl_minutes,
            config.token_refresh.lead_time_seconds as i64,
        ))
    }

    /// Providers that are configured and available for authorization.
    pub fn available_providers(&self) -> Vec<Provider> {
        self.registry.configured()
    }

    /// Start the authorization-code flow for (user, provider).
    ///
    /// Validates the provider and scopes, supersedes any lingering pending
    /// row, mints a state nonce and returns the provider authorization URL
    /// carrying it.
    #[instrument(skip(self, requested_scopes, redirect_uri), fields(user_id = %user_id, provider = %provider))]
    pub async fn begin_authorization(
        &self,
        user_id: Uuid,
        provider: Provider,
        requested_scopes: &[String],
        redirect_uri: &str,
    ) -> Result<BeginAuthorization, OAuthError> {
        let adapter = self.registry.get(provider)?;
        adapter.validate_scopes(requested_scopes)?;

        let superseded = self.integrations.supersede_pending(user_id, provider).await?;
        if superseded > 0 {
            debug!(superseded, "retired stale pending integrations");
        }

        let integration = self.integrations.create_pending(user_id, provider).await?;

        let state = self
            .states
            .create(
                user_id,
                provider,
                requested_scopes,
                redirect_uri,
                self.state_ttl_minutes,
            )
            .await?;

        let authorize_url =
            match adapter.build_authorization_url(&state.state, requested_scopes, redirect_uri) {
                Ok(url) => url,
                Err(err) => {
                    // Burn the freshly minted state; the flow never started
                    let _ = self.states.consume(&state.state).await;
                    return Err(err.into());
                }
            };

        self.audit
            .record(
                self.db.as_ref(),
                &user_id.to_string(),
                Some(integration.id),
                Some(provider),
                AuditAction::Begin,
                OUTCOME_SUCCESS,
                Some(json!({
                    "requested_scopes": requested_scopes,
                    "redirect_uri": redirect_uri,
                })),
            )
            .await?;

        counter!("oauth_begin_total").increment(1);
        info!(integration_id = %integration.id, "authorization flow initiated");

        Ok(BeginAuthorization {
            authorize_url,
            integration: integration.into(),
            state_expires_at: state.expires_at.with_timezone(&Utc),
        })
    }

    /// Handle the provider redirect carrying a code (or an error) and the
    /// state nonce. On success the pending integration becomes the single
    /// active one for its (user, provider) pair, atomically with its token
    /// record, consent row and audit entry.
    #[instrument(skip_all)]
    pub async fn handle_callback(
        &self,
        code: Option<&str>,
        state_nonce: &str,
        provider_error: Option<&str>,
    ) -> Result<IntegrationSummary, OAuthError> {
        // Provider sent an error instead of a code: burn the nonce so the
        // denied callback cannot be replayed, audit, and stop before any
        // exchange attempt.
        if let Some(reason) = provider_error {
            let state = self.states.consume(state_nonce).await.ok();
            let (actor, provider) = match &state {
                Some(s) => (s.user_id.to_string(), s.provider.parse::<Provider>().ok()),
                None => ("system".to_string(), None),
            };
            self.audit
                .record(
                    self.db.as_ref(),
                    &actor,
                    None,
                    provider,
                    AuditAction::CallbackFailure,
                    OUTCOME_FAILURE,
                    Some(json!({ "error": reason })),
                )
                .await?;
            counter!("oauth_callback_denied_total").increment(1);
            return Err(OAuthError::AuthorizationDenied {
                reason: reason.to_string(),
            });
        }

        let state = match self.states.consume(state_nonce).await {
            Ok(state) => state,
            Err(err) => {
                warn!(error = %err, "state consumption failed");
                self.audit
                    .record(
                        self.db.as_ref(),
                        "system",
                        None,
                        None,
                        AuditAction::CallbackFailure,
                        OUTCOME_FAILURE,
                        Some(json!({ "reason": err.to_string() })),
                    )
                    .await?;
                counter!("oauth_callback_invalid_state_total").increment(1);
                return Err(err.into());
            }
        };

        let user_id = state.user_id;
        let provider: Provider = state
            .provider
            .parse()
            .map_err(|_| OAuthError::Internal(format!("stored provider '{}'", state.provider)))?;
        let actor = user_id.to_string();
        let requested_scopes = scopes_from_json(Some(&state.requested_scopes));

        let Some(code) = code else {
            self.record_callback_failure(&actor, provider, "missing authorization code")
                .await?;
            return Err(OAuthError::AuthorizationDenied {
                reason: "missing authorization code".to_string(),
            });
        };

        let adapter = match self.registry.get(provider) {
            Ok(adapter) => adapter,
            Err(err) => {
                self.record_callback_failure(&actor, provider, "provider not configured")
                    .await?;
                return Err(err.into());
            }
        };

        let grant = match adapter.exchange_code(code, &state.redirect_uri).await {
            Ok(grant) => grant,
            Err(err) => return Err(self.fail_exchange(&actor, user_id, provider, err).await?),
        };

        let account_id = match adapter.fetch_account_identity(&grant.access_token).await {
            Ok(account_id) => account_id,
            Err(err) => return Err(self.fail_exchange(&actor, user_id, provider, err).await?),
        };

        let integration = match self.integrations.latest_pending(user_id, provider).await? {
            Some(pending) => pending,
            // The pending row can be gone if an admin purged it mid-flight;
            // the grant is real, so recreate rather than drop it
            None => self.integrations.create_pending(user_id, provider).await?,
        };

        let expires_at = grant
            .expires_in
            .map(|secs| Utc::now() + Duration::seconds(secs as i64));

        // Single transactional unit: no observable point where the row is
        // active without its tokens, consent and audit entry.
        let txn = self.db.begin().await?;

        let superseded = self
            .integrations
            .supersede_active(&txn, user_id, provider, integration.id)
            .await?;

        let activated = self
            .integrations
            .activate(
                &txn,
                integration.id,
                &account_id,
                crate::models::integration::scopes_to_json(&requested_scopes),
            )
            .await?;

        self.vault
            .store(
                &txn,
                integration.id,
                &grant.access_token,
                grant.refresh_token.as_deref(),
                &grant.token_type,
                expires_at,
                grant.scope.as_deref(),
            )
            .await?;

        self.consents
            .append(&txn, integration.id, &requested_scopes)
            .await?;

        self.audit
            .record(
                &txn,
                &actor,
                Some(integration.id),
                Some(provider),
                AuditAction::CallbackSuccess,
                OUTCOME_SUCCESS,
                Some(json!({
                    "provider_account_id": account_id,
                    "superseded_active": superseded,
                    "has_refresh_token": grant.refresh_token.is_some(),
                })),
            )
            .await?;

        txn.commit().await?;

        counter!("oauth_callback_success_total").increment(1);
        info!(
            integration_id = %integration.id,
            provider = %provider,
            "integration activated"
        );

        Ok(activated.into())
    }

    /// Refresh the access token of an active integration.
    ///
    /// Serialized per integration: concurrent callers queue on the same
    /// lock, and whoever enters after a successful rotation sees a fresh
    /// token and no-ops instead of issuing a redundant provider call (which
    /// could invalidate a rotated refresh token).
    #[instrument(skip(self, actor), fields(integration_id = %integration_id))]
    pub async fn refresh(
        &self,
        integration_id: Uuid,
        actor: &str,
    ) -> Result<IntegrationSummary, OAuthError> {
        let lock = self.refresh_lock(integration_id);
        let _guard = lock.lock().await;

        let result = self.refresh_locked(integration_id, actor).await;

        drop(_guard);
        self.release_refresh_lock(integration_id, &lock);

        result
    }

    async fn refresh_locked(
        &self,
        integration_id: Uuid,
        actor: &str,
    ) -> Result<IntegrationSummary, OAuthError> {
        let integration = self
            .integrations
            .find_by_id(integration_id)
            .await?
            .ok_or(OAuthError::IntegrationNotFound(integration_id))?;

        let status: IntegrationStatus = integration
            .status
            .parse()
            .map_err(OAuthError::Internal)?;
        if status != IntegrationStatus::Active {
            return Err(OAuthError::InvalidIntegrationState {
                id: integration_id,
                status: integration.status.clone(),
                expected: "active",
            });
        }

        let provider: Provider = integration
            .provider
            .parse()
            .map_err(|_| OAuthError::Internal(format!("stored provider '{}'", integration.provider)))?;

        let tokens = self.vault.retrieve(integration_id).await?;

        // Re-read under the lock: a concurrent refresh that just rotated
        // leaves a token far from expiry, and a fresh token needs no call
        if let Some(expires_at) = tokens.expires_at
            && expires_at - Utc::now() > self.refresh_margin
        {
            debug!(%expires_at, "token still fresh, skipping refresh");
            return Ok(integration.into());
        }

        let Some(refresh_token) = tokens.refresh_token.as_ref() else {
            self.audit
                .record(
                    self.db.as_ref(),
                    actor,
                    Some(integration_id),
                    Some(provider),
                    AuditAction::Refresh,
                    OUTCOME_FAILURE,
                    Some(json!({ "reason": "no_refresh_token" })),
                )
                .await?;
            return Err(OAuthError::NoRefreshToken(integration_id));
        };

        let adapter = self.registry.get(provider)?;

        let grant = match adapter.refresh(refresh_token).await {
            Ok(grant) => grant,
            Err(AdapterError::Rejected { code, .. }) => {
                // The refresh token is dead server-side; the integration is
                // unrecoverable without a new authorization
                self.integrations
                    .set_status(self.db.as_ref(), integration_id, IntegrationStatus::Expired)
                    .await?;
                self.audit
                    .record(
                        self.db.as_ref(),
                        actor,
                        Some(integration_id),
                        Some(provider),
                        AuditAction::Refresh,
                        OUTCOME_FAILURE,
                        Some(json!({ "provider_error": code, "terminal": true })),
                    )
                    .await?;
                counter!("oauth_refresh_terminal_failure_total").increment(1);
                return Err(OAuthError::ProviderRejected { code });
            }
            Err(err) => {
                self.audit
                    .record(
                        self.db.as_ref(),
                        actor,
                        Some(integration_id),
                        Some(provider),
                        AuditAction::Refresh,
                        OUTCOME_FAILURE,
                        Some(json!({
                            "reason": err.to_string(),
                            "retryable": err.is_retryable(),
                        })),
                    )
                    .await?;
                counter!("oauth_refresh_failure_total").increment(1);
                return Err(err.into());
            }
        };

        let new_expires_at = grant
            .expires_in
            .map(|secs| Utc::now() + Duration::seconds(secs as i64));

        let txn = self.db.begin().await?;
        self.vault
            .rotate(
                &txn,
                integration_id,
                &grant.access_token,
                grant.refresh_token.as_deref(),
                new_expires_at,
            )
            .await?;
        let refreshed = self.integrations.touch_refreshed(&txn, integration_id).await?;
        self.audit
            .record(
                &txn,
                actor,
                Some(integration_id),
                Some(provider),
                AuditAction::Refresh,
                OUTCOME_SUCCESS,
                Some(json!({ "rotated_refresh_token": grant.refresh_token.is_some() })),
            )
            .await?;
        txn.commit().await?;

        counter!("oauth_refresh_success_total").increment(1);
        info!("access token rotated");

        Ok(refreshed.into())
    }

    /// Revoke an integration. The remote revoke is best-effort: its failure
    /// is logged and recorded but never leaves the local record active.
    #[instrument(skip(self, actor), fields(integration_id = %integration_id))]
    pub async fn revoke(
        &self,
        integration_id: Uuid,
        actor: &str,
    ) -> Result<IntegrationSummary, OAuthError> {
        let integration = self
            .integrations
            .find_by_id(integration_id)
            .await?
            .ok_or(OAuthError::IntegrationNotFound(integration_id))?;

        let status: IntegrationStatus = integration
            .status
            .parse()
            .map_err(OAuthError::Internal)?;
        if status == IntegrationStatus::Revoked {
            return Ok(integration.into());
        }

        let provider: Provider = integration
            .provider
            .parse()
            .map_err(|_| OAuthError::Internal(format!("stored provider '{}'", integration.provider)))?;

        let remote_revoked = match self.vault.retrieve(integration_id).await {
            Ok(tokens) => match self.registry.get(provider) {
                Ok(adapter) => match adapter.revoke(&tokens.access_token).await {
                    Ok(revoked) => revoked,
                    Err(err) => {
                        warn!(error = %err, "remote revocation failed, proceeding locally");
                        false
                    }
                },
                Err(err) => {
                    warn!(error = %err, "no adapter for remote revocation, proceeding locally");
                    false
                }
            },
            Err(err) => {
                // Nothing to revoke remotely without tokens; still proceed
                warn!(error = %err, "no usable tokens for remote revocation");
                false
            }
        };

        let txn = self.db.begin().await?;
        let revoked = self
            .integrations
            .set_status(&txn, integration_id, IntegrationStatus::Revoked)
            .await?;
        self.vault.delete(&txn, integration_id).await?;
        self.audit
            .record(
                &txn,
                actor,
                Some(integration_id),
                Some(provider),
                AuditAction::Revoke,
                OUTCOME_SUCCESS,
                Some(json!({ "remote_revoked": remote_revoked })),
            )
            .await?;
        txn.commit().await?;

        counter!("oauth_revoke_total").increment(1);
        info!(remote_revoked, "integration revoked");

        Ok(revoked.into())
    }

    /// Summaries of every integration a user has, newest first.
    pub async fn list_integrations(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<IntegrationSummary>, OAuthError> {
        let rows = self.integrations.list_by_user(user_id).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn record_callback_failure(
        &self,
        actor: &str,
        provider: Provider,
        reason: &str,
    ) -> Result<(), OAuthError> {
        self.audit
            .record(
                self.db.as_ref(),
                actor,
                None,
                Some(provider),
                AuditAction::CallbackFailure,
                OUTCOME_FAILURE,
                Some(json!({ "reason": reason })),
            )
            .await?;
        counter!("oauth_callback_failure_total").increment(1);
        Ok(())
    }

    /// Shared failure path for exchange and identity-fetch errors during the
    /// callback. A provider rejection means the code or client is bad and
    /// the pending integration arrives dead; transient and malformed-body
    /// failures leave it pending.
    async fn fail_exchange(
        &self,
        actor: &str,
        user_id: Uuid,
        provider: Provider,
        err: AdapterError,
    ) -> Result<OAuthError, OAuthError> {
        if matches!(err, AdapterError::Rejected { .. }) {
            if let Some(pending) = self.integrations.latest_pending(user_id, provider).await? {
                self.integrations
                    .set_status(self.db.as_ref(), pending.id, IntegrationStatus::Expired)
                    .await?;
            }
        }

        self.record_callback_failure(actor, provider, &err.to_string())
            .await?;

        Ok(err.into())
    }

    fn refresh_lock(&self, integration_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.refresh_locks.lock().expect("refresh lock map poisoned");
        locks
            .entry(integration_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the map entry when nobody else is queued on it. The map lock is
    /// held across the check, so no new clone can appear in between.
    fn release_refresh_lock(&self, integration_id: Uuid, ours: &Arc<Mutex<()>>) {
        let mut locks = self.refresh_locks.lock().expect("refresh lock map poisoned");
        if let Some(existing) = locks.get(&integration_id)
            && Arc::ptr_eq(existing, ours)
            && Arc::strong_count(existing) == 2
        {
            locks.remove(&integration_id);
        }
    }
}
