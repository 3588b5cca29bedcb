//! Provider adapter trait definition
//!
//! Defines the capability set every provider implementation must offer, the
//! shared failure taxonomy, and the response-parsing plumbing common to all
//! OAuth2 token endpoints.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use super::Provider;

/// Result of a code exchange or refresh: the grant as the provider reported
/// it, before any persistence. `expires_in` is relative; callers convert it
/// to an absolute timestamp immediately.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub expires_in: Option<u64>,
    pub scope: Option<String>,
}

/// Adapter failure taxonomy.
///
/// `Unavailable` is the only retryable kind; `Rejected` is a definitive
/// answer from the provider (invalid_grant and friends) and must never be
/// retried with the same inputs.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("scope '{scope}' is not supported by provider {provider}")]
    UnsupportedScope { provider: Provider, scope: String },

    #[error("provider {provider} unavailable: {details}")]
    Unavailable { provider: Provider, details: String },

    #[error("provider {provider} rejected the request: {code}")]
    Rejected {
        provider: Provider,
        code: String,
        description: Option<String>,
    },

    #[error("provider {provider} returned an unsupported response: {details}")]
    UnsupportedResponse { provider: Provider, details: String },
}

impl AdapterError {
    /// True when the caller may retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AdapterError::Unavailable { .. })
    }
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync + std::fmt::Debug {
    /// Tag this adapter serves.
    fn provider(&self) -> Provider;

    /// The provider-local scope vocabulary callers are allowed to request.
    fn supported_scopes(&self) -> &'static [&'static str];

    /// Reject any scope outside the declared vocabulary before a network
    /// call is ever made.
    fn validate_scopes(&self, scopes: &[String]) -> Result<(), AdapterError> {
        for scope in scopes {
            if !self.supported_scopes().contains(&scope.as_str()) {
                return Err(AdapterError::UnsupportedScope {
                    provider: self.provider(),
                    scope: scope.clone(),
                });
            }
        }
        Ok(())
    }

    /// Build the browser-facing authorization URL carrying the state nonce.
    /// Pure translation, no network.
    fn build_authorization_url(
        &self,
        state: &str,
        scopes: &[String],
        redirect_uri: &str,
    ) -> Result<Url, AdapterError>;

    /// Exchange an authorization code for tokens.
    async fn exchange_code(&self, code: &str, redirect_uri: &str)
    -> Result<TokenGrant, AdapterError>;

    /// Obtain a fresh access token from a refresh token.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, AdapterError>;

    /// Fetch the stable external account id for the authorized account.
    async fn fetch_account_identity(&self, access_token: &str) -> Result<String, AdapterError>;

    /// Best-effort remote revocation. `Ok(false)` means the provider offers
    /// no revocation endpoint or reported a non-fatal failure.
    async fn revoke(&self, token: &str) -> Result<bool, AdapterError>;
}

// --- shared HTTP plumbing used by every adapter ---

/// Standard OAuth2 token endpoint success body.
#[derive(Debug, Deserialize)]
pub(crate) struct WireTokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl WireTokenResponse {
    pub fn into_grant(self) -> TokenGrant {
        TokenGrant {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            token_type: self.token_type.unwrap_or_else(|| "Bearer".to_string()),
            expires_in: self.expires_in,
            scope: self.scope,
        }
    }
}

/// Standard OAuth2 error body (RFC 6749 §5.2).
#[derive(Debug, Deserialize)]
pub(crate) struct WireErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Classify a transport-level reqwest error. Timeouts and connection
/// failures are retryable by definition; anything else at this layer is
/// treated the same way since no provider verdict was received.
pub(crate) fn classify_transport_error(provider: Provider, err: reqwest::Error) -> AdapterError {
    AdapterError::Unavailable {
        provider,
        details: if err.is_timeout() {
            "request timed out".to_string()
        } else {
            err.to_string()
        },
    }
}

/// Turn a token endpoint response into a grant or a classified error.
///
/// 2xx with a parseable body is success, 5xx is retryable, 4xx is a
/// provider verdict (`Rejected`), and anything unparseable is
/// `UnsupportedResponse`.
pub(crate) async fn parse_token_response(
    provider: Provider,
    response: reqwest::Response,
) -> Result<TokenGrant, AdapterError> {
    let status = response.status();

    if status.is_success() {
        let body = response
            .text()
            .await
            .map_err(|e| classify_transport_error(provider, e))?;
        let parsed: WireTokenResponse =
            serde_json::from_str(&body).map_err(|e| AdapterError::UnsupportedResponse {
                provider,
                details: format!("malformed token response: {}", e),
            })?;
        return Ok(parsed.into_grant());
    }

    if status.is_server_error() {
        return Err(AdapterError::Unavailable {
            provider,
            details: format!("token endpoint returned {}", status),
        });
    }

    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<WireErrorResponse>(&body) {
        Ok(err_body) => Err(AdapterError::Rejected {
            provider,
            code: err_body.error,
            description: err_body.error_description,
        }),
        // A 4xx without the standard error shape is still a rejection; keep
        // the status as the code so the audit trail stays useful
        Err(_) => Err(AdapterError::Rejected {
            provider,
            code: format!("http_{}", status.as_u16()),
            description: None,
        }),
    }
}

/// Classify a non-success identity/revoke response.
pub(crate) fn classify_api_status(provider: Provider, status: reqwest::StatusCode) -> AdapterError {
    if status.is_server_error() {
        AdapterError::Unavailable {
            provider,
            details: format!("provider API returned {}", status),
        }
    } else {
        AdapterError::Rejected {
            provider,
            code: format!("http_{}", status.as_u16()),
            description: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct ScopedAdapter;

    #[async_trait]
    impl ProviderAdapter for ScopedAdapter {
        fn provider(&self) -> Provider {
            Provider::Google
        }

        fn supported_scopes(&self) -> &'static [&'static str] {
            &["calendar.read", "calendar.write"]
        }

        fn build_authorization_url(
            &self,
            _state: &str,
            _scopes: &[String],
            _redirect_uri: &str,
        ) -> Result<Url, AdapterError> {
            Ok(Url::parse("https://example.com/authorize").unwrap())
        }

        async fn exchange_code(
            &self,
            _code: &str,
            _redirect_uri: &str,
        ) -> Result<TokenGrant, AdapterError> {
            unimplemented!()
        }

        async fn refresh(&self, _refresh_token: &str) -> Result<TokenGrant, AdapterError> {
            unimplemented!()
        }

        async fn fetch_account_identity(
            &self,
            _access_token: &str,
        ) -> Result<String, AdapterError> {
            unimplemented!()
        }

        async fn revoke(&self, _token: &str) -> Result<bool, AdapterError> {
            unimplemented!()
        }
    }

    #[test]
    fn validate_scopes_accepts_declared_vocabulary() {
        let adapter = ScopedAdapter;
        assert!(
            adapter
                .validate_scopes(&["calendar.read".to_string()])
                .is_ok()
        );
    }

    #[test]
    fn validate_scopes_rejects_unknown_scope() {
        let adapter = ScopedAdapter;
        let err = adapter
            .validate_scopes(&["calendar.read".to_string(), "mail.read".to_string()])
            .unwrap_err();
        assert!(
            matches!(err, AdapterError::UnsupportedScope { scope, .. } if scope == "mail.read")
        );
    }

    #[test]
    fn retryable_classification() {
        let unavailable = AdapterError::Unavailable {
            provider: Provider::Zoom,
            details: "timeout".to_string(),
        };
        let rejected = AdapterError::Rejected {
            provider: Provider::Zoom,
            code: "invalid_grant".to_string(),
            description: None,
        };
        assert!(unavailable.is_retryable());
        assert!(!rejected.is_retryable());
    }

    #[test]
    fn wire_token_response_defaults_token_type() {
        let parsed: WireTokenResponse =
            serde_json::from_str(r#"{"access_token":"tok"}"#).expect("parses");
        let grant = parsed.into_grant();
        assert_eq!(grant.token_type, "Bearer");
        assert!(grant.refresh_token.is_none());
        assert!(grant.expires_in.is_none());
    }
}
