//! Google provider adapter
//!
//! Covers the calendar and documents surface of a Google account. Google
//! keeps the original refresh token across refreshes, so `refresh` reports
//! no rotation. Revocation goes through the shared token-revoke endpoint
//! and works for either token of the pair.

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::providers::adapter::{
    AdapterError, ProviderAdapter, TokenGrant, classify_api_status, classify_transport_error,
    parse_token_response,
};
use crate::providers::Provider;

const DEFAULT_AUTH_BASE: &str = "https://accounts.google.com";
const DEFAULT_API_BASE: &str = "https://www.googleapis.com";

/// Scope vocabulary accepted from callers, mapped to Google scope URLs.
const SCOPE_MAP: &[(&str, &str)] = &[
    ("calendar.read", "https://www.googleapis.com/auth/calendar.readonly"),
    ("calendar.write", "https://www.googleapis.com/auth/calendar.events"),
    ("drive.read", "https://www.googleapis.com/auth/drive.readonly"),
    ("drive.write", "https://www.googleapis.com/auth/drive.file"),
    ("profile.read", "https://www.googleapis.com/auth/userinfo.profile"),
];

const SUPPORTED_SCOPES: &[&str] = &[
    "calendar.read",
    "calendar.write",
    "drive.read",
    "drive.write",
    "profile.read",
];

#[derive(Debug)]
pub struct GoogleAdapter {
    client_id: String,
    client_secret: String,
    auth_base: String,
    api_base: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    id: String,
}

impl GoogleAdapter {
    pub fn new(
        client_id: String,
        client_secret: String,
        auth_base: Option<String>,
        api_base: Option<String>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            client_id,
            client_secret,
            auth_base: auth_base.unwrap_or_else(|| DEFAULT_AUTH_BASE.to_string()),
            api_base: api_base.unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            http,
        }
    }

    fn map_scope(&self, scope: &str) -> Result<&'static str, AdapterError> {
        SCOPE_MAP
            .iter()
            .find(|(local, _)| *local == scope)
            .map(|(_, remote)| *remote)
            .ok_or_else(|| AdapterError::UnsupportedScope {
                provider: Provider::Google,
                scope: scope.to_string(),
            })
    }
}

#[async_trait]
impl ProviderAdapter for GoogleAdapter {
    fn provider(&self) -> Provider {
        Provider::Google
    }

    fn supported_scopes(&self) -> &'static [&'static str] {
        SUPPORTED_SCOPES
    }

    fn build_authorization_url(
        &self,
        state: &str,
        scopes: &[String],
        redirect_uri: &str,
    ) -> Result<Url, AdapterError> {
        let mapped = scopes
            .iter()
            .map(|s| self.map_scope(s))
            .collect::<Result<Vec<_>, _>>()?;

        let mut url = Url::parse(&format!("{}/o/oauth2/v2/auth", self.auth_base)).map_err(|e| {
            AdapterError::UnsupportedResponse {
                provider: Provider::Google,
                details: format!("invalid authorize base URL: {}", e),
            }
        })?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &mapped.join(" "))
            .append_pair("state", state)
            // offline + consent so a refresh token is issued on every grant
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent");

        Ok(url)
    }

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant, AdapterError> {
        let params = [
            ("code", code),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("redirect_uri", redirect_uri),
            ("grant_type", "authorization_code"),
        ];

        let response = self
            .http
            .post(format!("{}/oauth2/v4/token", self.api_base))
            .form(&params)
            .send()
            .await
            .map_err(|e| classify_transport_error(Provider::Google, e))?;

        parse_token_response(Provider::Google, response).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, AdapterError> {
        let params = [
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", "refresh_token"),
        ];

        let response = self
            .http
            .post(format!("{}/oauth2/v4/token", self.api_base))
            .form(&params)
            .send()
            .await
            .map_err(|e| classify_transport_error(Provider::Google, e))?;

        parse_token_response(Provider::Google, response).await
    }

    async fn fetch_account_identity(&self, access_token: &str) -> Result<String, AdapterError> {
        let response = self
            .http
            .get(format!("{}/oauth2/v2/userinfo", self.api_base))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| classify_transport_error(Provider::Google, e))?;

        if !response.status().is_success() {
            return Err(classify_api_status(Provider::Google, response.status()));
        }

        let info: GoogleUserInfo =
            response
                .json()
                .await
                .map_err(|e| AdapterError::UnsupportedResponse {
                    provider: Provider::Google,
                    details: format!("malformed userinfo response: {}", e),
                })?;

        Ok(info.id)
    }

    async fn revoke(&self, token: &str) -> Result<bool, AdapterError> {
        let response = self
            .http
            .post(format!("{}/o/oauth2/revoke", self.api_base))
            .form(&[("token", token)])
            .send()
            .await
            .map_err(|e| classify_transport_error(Provider::Google, e))?;

        Ok(response.status().is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> GoogleAdapter {
        GoogleAdapter::new(
            "test-client".to_string(),
            "test-secret".to_string(),
            None,
            None,
            reqwest::Client::new(),
        )
    }

    #[test]
    fn authorize_url_carries_state_and_mapped_scopes() {
        let url = adapter()
            .build_authorization_url(
                "nonce-123",
                &["calendar.read".to_string()],
                "https://app.example.com/oauth/callback",
            )
            .expect("url builds");

        assert_eq!(url.host_str(), Some("accounts.google.com"));
        let query: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert!(query.contains(&("state".to_string(), "nonce-123".to_string())));
        assert!(query.contains(&(
            "scope".to_string(),
            "https://www.googleapis.com/auth/calendar.readonly".to_string()
        )));
        assert!(query.contains(&("access_type".to_string(), "offline".to_string())));
        assert!(query.contains(&("response_type".to_string(), "code".to_string())));
    }

    #[test]
    fn authorize_url_rejects_unknown_scope() {
        let err = adapter()
            .build_authorization_url(
                "nonce",
                &["mail.read".to_string()],
                "https://app.example.com/cb",
            )
            .unwrap_err();
        assert!(matches!(err, AdapterError::UnsupportedScope { scope, .. } if scope == "mail.read"));
    }

    #[test]
    fn scope_vocabulary_is_complete() {
        let adapter = adapter();
        for scope in adapter.supported_scopes() {
            assert!(adapter.map_scope(scope).is_ok(), "unmapped scope {}", scope);
        }
    }
}
