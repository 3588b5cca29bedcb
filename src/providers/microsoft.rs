//! Microsoft provider adapter
//!
//! Calendar and files access through the common v2.0 endpoints and Graph.
//! Microsoft rotates the refresh token on every refresh, and offers no
//! token-revocation endpoint, so `revoke` reports `false` and local
//! revocation carries the whole weight.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::providers::adapter::{
    AdapterError, ProviderAdapter, TokenGrant, classify_api_status, classify_transport_error,
    parse_token_response,
};
use crate::providers::Provider;

const DEFAULT_AUTH_BASE: &str = "https://login.microsoftonline.com";
const DEFAULT_API_BASE: &str = "https://graph.microsoft.com";

const SCOPE_MAP: &[(&str, &str)] = &[
    ("calendar.read", "Calendars.Read"),
    ("calendar.write", "Calendars.ReadWrite"),
    ("files.read", "Files.Read"),
    ("files.write", "Files.ReadWrite"),
    ("profile.read", "User.Read"),
];

const SUPPORTED_SCOPES: &[&str] = &[
    "calendar.read",
    "calendar.write",
    "files.read",
    "files.write",
    "profile.read",
];

#[derive(Debug)]
pub struct MicrosoftAdapter {
    client_id: String,
    client_secret: String,
    auth_base: String,
    api_base: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct GraphUser {
    id: String,
}

impl MicrosoftAdapter {
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
                provider: Provider::Microsoft,
                scope: scope.to_string(),
            })
    }

    fn token_url(&self) -> String {
        format!("{}/common/oauth2/v2.0/token", self.auth_base)
    }
}

#[async_trait]
impl ProviderAdapter for MicrosoftAdapter {
    fn provider(&self) -> Provider {
        Provider::Microsoft
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
        let mut mapped = scopes
            .iter()
            .map(|s| self.map_scope(s))
            .collect::<Result<Vec<_>, _>>()?;
        // offline_access is what makes Microsoft issue a refresh token
        mapped.push("offline_access");

        let mut url = Url::parse(&format!("{}/common/oauth2/v2.0/authorize", self.auth_base))
            .map_err(|e| AdapterError::UnsupportedResponse {
                provider: Provider::Microsoft,
                details: format!("invalid authorize base URL: {}", e),
            })?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("response_mode", "query")
            .append_pair("scope", &mapped.join(" "))
            .append_pair("state", state);

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
            .post(self.token_url())
            .form(&params)
            .send()
            .await
            .map_err(|e| classify_transport_error(Provider::Microsoft, e))?;

        parse_token_response(Provider::Microsoft, response).await
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
            .post(self.token_url())
            .form(&params)
            .send()
            .await
            .map_err(|e| classify_transport_error(Provider::Microsoft, e))?;

        parse_token_response(Provider::Microsoft, response).await
    }

    async fn fetch_account_identity(&self, access_token: &str) -> Result<String, AdapterError> {
        let response = self
            .http
            .get(format!("{}/v1.0/me", self.api_base))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| classify_transport_error(Provider::Microsoft, e))?;

        if !response.status().is_success() {
            return Err(classify_api_status(Provider::Microsoft, response.status()));
        }

        let user: GraphUser =
            response
                .json()
                .await
                .map_err(|e| AdapterError::UnsupportedResponse {
                    provider: Provider::Microsoft,
                    details: format!("malformed Graph user response: {}", e),
                })?;

        Ok(user.id)
    }

    async fn revoke(&self, _token: &str) -> Result<bool, AdapterError> {
        // The v2.0 endpoints expose no token revocation; tokens age out on
        // their own once the local record is gone
        debug!("microsoft offers no token revocation endpoint; skipping remote revoke");
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> MicrosoftAdapter {
        MicrosoftAdapter::new(
            "test-client".to_string(),
            "test-secret".to_string(),
            None,
            None,
            reqwest::Client::new(),
        )
    }

    #[test]
    fn authorize_url_appends_offline_access() {
        let url = adapter()
            .build_authorization_url(
                "nonce-456",
                &["calendar.read".to_string(), "files.read".to_string()],
                "https://app.example.com/oauth/callback",
            )
            .expect("url builds");

        assert_eq!(url.host_str(), Some("login.microsoftonline.com"));
        let scope = url
            .query_pairs()
            .find(|(k, _)| k == "scope")
            .map(|(_, v)| v.to_string())
            .expect("scope present");
        assert_eq!(scope, "Calendars.Read Files.Read offline_access");
    }

    #[test]
    fn unknown_scope_fails_before_url_is_built() {
        let err = adapter()
            .build_authorization_url(
                "nonce",
                &["meeting.read".to_string()],
                "https://app.example.com/cb",
            )
            .unwrap_err();
        assert!(matches!(err, AdapterError::UnsupportedScope { .. }));
    }

    #[tokio::test]
    async fn revoke_reports_unsupported() {
        assert_eq!(adapter().revoke("token").await.unwrap(), false);
    }
}
