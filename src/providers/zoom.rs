//! Zoom provider adapter
//!
//! Video-platform access. Zoom authenticates its token endpoint with HTTP
//! Basic credentials rather than form fields, and rotates the refresh token
//! on every refresh — the old one stops working, which is exactly why
//! concurrent refreshes must be serialized upstream.

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::providers::adapter::{
    AdapterError, ProviderAdapter, TokenGrant, classify_api_status, classify_transport_error,
    parse_token_response,
};
use crate::providers::Provider;

const DEFAULT_AUTH_BASE: &str = "https://zoom.us";
const DEFAULT_API_BASE: &str = "https://api.zoom.us";

const SCOPE_MAP: &[(&str, &str)] = &[
    ("meeting.read", "meeting:read"),
    ("recording.read", "recording:read"),
    ("webinar.read", "webinar:read"),
    ("user.read", "user:read"),
];

const SUPPORTED_SCOPES: &[&str] = &[
    "meeting.read",
    "recording.read",
    "webinar.read",
    "user.read",
];

#[derive(Debug)]
pub struct ZoomAdapter {
    client_id: String,
    client_secret: String,
    auth_base: String,
    api_base: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ZoomUser {
    id: String,
}

impl ZoomAdapter {
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
                provider: Provider::Zoom,
                scope: scope.to_string(),
            })
    }
}

#[async_trait]
impl ProviderAdapter for ZoomAdapter {
    fn provider(&self) -> Provider {
        Provider::Zoom
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

        let mut url = Url::parse(&format!("{}/oauth/authorize", self.auth_base)).map_err(|e| {
            AdapterError::UnsupportedResponse {
                provider: Provider::Zoom,
                details: format!("invalid authorize base URL: {}", e),
            }
        })?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", redirect_uri)
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
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ];

        let response = self
            .http
            .post(format!("{}/oauth/token", self.auth_base))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&params)
            .send()
            .await
            .map_err(|e| classify_transport_error(Provider::Zoom, e))?;

        parse_token_response(Provider::Zoom, response).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, AdapterError> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];

        let response = self
            .http
            .post(format!("{}/oauth/token", self.auth_base))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&params)
            .send()
            .await
            .map_err(|e| classify_transport_error(Provider::Zoom, e))?;

        parse_token_response(Provider::Zoom, response).await
    }

    async fn fetch_account_identity(&self, access_token: &str) -> Result<String, AdapterError> {
        let response = self
            .http
            .get(format!("{}/v2/users/me", self.api_base))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| classify_transport_error(Provider::Zoom, e))?;

        if !response.status().is_success() {
            return Err(classify_api_status(Provider::Zoom, response.status()));
        }

        let user: ZoomUser =
            response
                .json()
                .await
                .map_err(|e| AdapterError::UnsupportedResponse {
                    provider: Provider::Zoom,
                    details: format!("malformed user response: {}", e),
                })?;

        Ok(user.id)
    }

    async fn revoke(&self, token: &str) -> Result<bool, AdapterError> {
        let response = self
            .http
            .post(format!("{}/oauth/revoke", self.auth_base))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("token", token)])
            .send()
            .await
            .map_err(|e| classify_transport_error(Provider::Zoom, e))?;

        Ok(response.status().is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> ZoomAdapter {
        ZoomAdapter::new(
            "test-client".to_string(),
            "test-secret".to_string(),
            None,
            None,
            reqwest::Client::new(),
        )
    }

    #[test]
    fn authorize_url_uses_zoom_scope_vocabulary() {
        let url = adapter()
            .build_authorization_url(
                "nonce-789",
                &["meeting.read".to_string(), "recording.read".to_string()],
                "https://app.example.com/oauth/callback",
            )
            .expect("url builds");

        assert_eq!(url.host_str(), Some("zoom.us"));
        let scope = url
            .query_pairs()
            .find(|(k, _)| k == "scope")
            .map(|(_, v)| v.to_string())
            .expect("scope present");
        assert_eq!(scope, "meeting:read recording:read");
    }

    #[test]
    fn unknown_scope_is_rejected() {
        let err = adapter()
            .build_authorization_url(
                "nonce",
                &["calendar.read".to_string()],
                "https://app.example.com/cb",
            )
            .unwrap_err();
        assert!(
            matches!(err, AdapterError::UnsupportedScope { scope, .. } if scope == "calendar.read")
        );
    }
}
