//! Dropbox provider adapter
//!
//! Documents/storage access. Dropbox only issues a refresh token when the
//! authorize URL asks for `token_access_type=offline`, keeps that refresh
//! token stable across refreshes, and identifies accounts through an RPC
//! endpoint that takes a POST with an empty JSON body.

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::providers::adapter::{
    AdapterError, ProviderAdapter, TokenGrant, classify_api_status, classify_transport_error,
    parse_token_response,
};
use crate::providers::Provider;

const DEFAULT_AUTH_BASE: &str = "https://www.dropbox.com";
const DEFAULT_API_BASE: &str = "https://api.dropboxapi.com";

const SCOPE_MAP: &[(&str, &str)] = &[
    ("files.read", "files.content.read"),
    ("files.write", "files.content.write"),
    ("sharing.read", "sharing.read"),
    ("account.read", "account_info.read"),
];

const SUPPORTED_SCOPES: &[&str] = &["files.read", "files.write", "sharing.read", "account.read"];

#[derive(Debug)]
pub struct DropboxAdapter {
    client_id: String,
    client_secret: String,
    auth_base: String,
    api_base: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct DropboxAccount {
    account_id: String,
}

impl DropboxAdapter {
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
                provider: Provider::Dropbox,
                scope: scope.to_string(),
            })
    }
}

#[async_trait]
impl ProviderAdapter for DropboxAdapter {
    fn provider(&self) -> Provider {
        Provider::Dropbox
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

        let mut url = Url::parse(&format!("{}/oauth2/authorize", self.auth_base)).map_err(|e| {
            AdapterError::UnsupportedResponse {
                provider: Provider::Dropbox,
                details: format!("invalid authorize base URL: {}", e),
            }
        })?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &mapped.join(" "))
            .append_pair("state", state)
            // without this Dropbox issues a short-lived token and no refresh token
            .append_pair("token_access_type", "offline");

        Ok(url)
    }

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant, AdapterError> {
        let params = [
            ("code", code),
            ("grant_type", "authorization_code"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("redirect_uri", redirect_uri),
        ];

        let response = self
            .http
            .post(format!("{}/oauth2/token", self.api_base))
            .form(&params)
            .send()
            .await
            .map_err(|e| classify_transport_error(Provider::Dropbox, e))?;

        parse_token_response(Provider::Dropbox, response).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, AdapterError> {
        let params = [
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];

        let response = self
            .http
            .post(format!("{}/oauth2/token", self.api_base))
            .form(&params)
            .send()
            .await
            .map_err(|e| classify_transport_error(Provider::Dropbox, e))?;

        parse_token_response(Provider::Dropbox, response).await
    }

    async fn fetch_account_identity(&self, access_token: &str) -> Result<String, AdapterError> {
        let response = self
            .http
            .post(format!("{}/2/users/get_current_account", self.api_base))
            .bearer_auth(access_token)
            .json(&serde_json::Value::Null)
            .send()
            .await
            .map_err(|e| classify_transport_error(Provider::Dropbox, e))?;

        if !response.status().is_success() {
            return Err(classify_api_status(Provider::Dropbox, response.status()));
        }

        let account: DropboxAccount =
            response
                .json()
                .await
                .map_err(|e| AdapterError::UnsupportedResponse {
                    provider: Provider::Dropbox,
                    details: format!("malformed account response: {}", e),
                })?;

        Ok(account.account_id)
    }

    async fn revoke(&self, token: &str) -> Result<bool, AdapterError> {
        let response = self
            .http
            .post(format!("{}/2/auth/token/revoke", self.api_base))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| classify_transport_error(Provider::Dropbox, e))?;

        Ok(response.status().is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> DropboxAdapter {
        DropboxAdapter::new(
            "test-client".to_string(),
            "test-secret".to_string(),
            None,
            None,
            reqwest::Client::new(),
        )
    }

    #[test]
    fn authorize_url_requests_offline_access() {
        let url = adapter()
            .build_authorization_url(
                "nonce-abc",
                &["files.read".to_string()],
                "https://app.example.com/oauth/callback",
            )
            .expect("url builds");

        assert_eq!(url.host_str(), Some("www.dropbox.com"));
        let query: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert!(query.contains(&("token_access_type".to_string(), "offline".to_string())));
        assert!(query.contains(&("scope".to_string(), "files.content.read".to_string())));
    }

    #[test]
    fn unknown_scope_is_rejected() {
        let err = adapter()
            .build_authorization_url(
                "nonce",
                &["meeting.read".to_string()],
                "https://app.example.com/cb",
            )
            .unwrap_err();
        assert!(matches!(err, AdapterError::UnsupportedScope { .. }));
    }
}
