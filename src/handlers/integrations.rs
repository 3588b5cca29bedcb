//! # Integration Handlers
//!
//! The inbound interface consumed by the routing layer: begin
//! authorization, OAuth callback, listing, refresh and revoke.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use url::Url;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::{OperatorAuth, UserExtension, UserHeader};
use crate::error::ApiError;
use crate::models::IntegrationSummary;
use crate::providers::Provider;
use crate::server::AppState;

/// Request path parameter for provider name
#[derive(Debug, Deserialize, ToSchema)]
pub struct ProviderPath {
    /// Provider identifier (snake_case, e.g., "google")
    pub provider: String,
}

/// Request path parameter for integration id
#[derive(Debug, Deserialize, ToSchema)]
pub struct IntegrationPath {
    pub id: Uuid,
}

/// Body for starting an authorization flow
#[derive(Debug, Deserialize, ToSchema)]
pub struct BeginAuthorizationRequest {
    /// Scopes from the provider's declared vocabulary
    pub scopes: Vec<String>,
    /// Where the provider should redirect the browser after consent
    pub redirect_uri: String,
}

/// OAuth authorization URL response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthorizeUrlResponse {
    /// Complete authorization URL for user redirection
    pub authorize_url: String,
    /// The pending integration created for this flow
    pub integration_id: Uuid,
    /// When the embedded state nonce stops being accepted
    pub state_expires_at: String,
}

/// Query parameters delivered by the provider redirect
#[derive(Debug, Deserialize, IntoParams)]
pub struct CallbackQuery {
    /// Authorization code (absent when the provider reports an error)
    pub code: Option<String>,
    /// State nonce minted at begin time
    pub state: String,
    /// Provider error code (e.g. access_denied)
    pub error: Option<String>,
}

/// Start the OAuth flow for a provider
///
/// Returns a fully formed authorization URL the client redirects the user
/// to. A pending integration row and a single-use state nonce are created
/// as side effects.
#[utoipa::path(
    post,
    path = "/connect/{provider}",
    security(("bearer_auth" = [])),
    params(
        ("provider" = String, Path, description = "Provider identifier (snake_case, e.g., 'google')"),
        UserHeader
    ),
    request_body = BeginAuthorizationRequest,
    responses(
        (status = 200, description = "Authorization URL generated", body = AuthorizeUrlResponse),
        (status = 400, description = "Unsupported scope", body = ApiError),
        (status = 401, description = "Missing or invalid authorization token", body = ApiError),
        (status = 404, description = "Provider not known or not configured", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "integrations"
)]
pub async fn begin_authorization(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    UserExtension(user): UserExtension,
    Path(provider_path): Path<ProviderPath>,
    Json(body): Json<BeginAuthorizationRequest>,
) -> Result<Json<AuthorizeUrlResponse>, ApiError> {
    let provider: Provider = provider_path
        .provider
        .parse()
        .map_err(crate::manager::OAuthError::from)?;

    let begun = state
        .manager
        .begin_authorization(user.0, provider, &body.scopes, &body.redirect_uri)
        .await?;

    validate_authorize_url(&begun.authorize_url)?;

    Ok(Json(AuthorizeUrlResponse {
        authorize_url: begun.authorize_url.to_string(),
        integration_id: begun.integration.id,
        state_expires_at: begun.state_expires_at.to_rfc3339(),
    }))
}

/// OAuth provider callback
///
/// Consumes the state nonce exactly once and, on success, activates the
/// pending integration atomically with its token record, consent entry and
/// audit row. Unauthenticated: it is reached by the provider redirect.
#[utoipa::path(
    get,
    path = "/oauth/callback",
    params(CallbackQuery),
    responses(
        (status = 200, description = "Integration activated", body = IntegrationSummary),
        (status = 400, description = "Invalid state or authorization denied", body = ApiError),
        (status = 502, description = "Provider failure during exchange", body = ApiError)
    ),
    tag = "integrations"
)]
pub async fn oauth_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Result<Json<IntegrationSummary>, ApiError> {
    let summary = state
        .manager
        .handle_callback(
            query.code.as_deref(),
            &query.state,
            query.error.as_deref(),
        )
        .await?;

    Ok(Json(summary))
}

/// List the acting user's integrations
#[utoipa::path(
    get,
    path = "/integrations",
    security(("bearer_auth" = [])),
    params(UserHeader),
    responses(
        (status = 200, description = "Integrations for the user", body = [IntegrationSummary]),
        (status = 401, description = "Missing or invalid authorization token", body = ApiError)
    ),
    tag = "integrations"
)]
pub async fn list_integrations(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    UserExtension(user): UserExtension,
) -> Result<Json<Vec<IntegrationSummary>>, ApiError> {
    let summaries = state.manager.list_integrations(user.0).await?;
    Ok(Json(summaries))
}

/// Refresh an integration's access token
#[utoipa::path(
    post,
    path = "/integrations/{id}/refresh",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Integration id"),
        UserHeader
    ),
    responses(
        (status = 200, description = "Token refreshed (or still fresh)", body = IntegrationSummary),
        (status = 404, description = "Integration not found", body = ApiError),
        (status = 409, description = "Integration not active or not renewable", body = ApiError),
        (status = 502, description = "Provider failure during refresh", body = ApiError)
    ),
    tag = "integrations"
)]
pub async fn refresh_integration(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    UserExtension(user): UserExtension,
    Path(path): Path<IntegrationPath>,
) -> Result<Json<IntegrationSummary>, ApiError> {
    let summary = state
        .manager
        .refresh(path.id, &user.0.to_string())
        .await?;
    Ok(Json(summary))
}

/// Revoke an integration
///
/// Best-effort remote revocation followed by the local status flip and
/// token deletion. Always succeeds locally when the integration exists.
#[utoipa::path(
    delete,
    path = "/integrations/{id}",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Integration id"),
        UserHeader
    ),
    responses(
        (status = 200, description = "Integration revoked", body = IntegrationSummary),
        (status = 404, description = "Integration not found", body = ApiError)
    ),
    tag = "integrations"
)]
pub async fn revoke_integration(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    UserExtension(user): UserExtension,
    Path(path): Path<IntegrationPath>,
) -> Result<Json<IntegrationSummary>, ApiError> {
    let summary = state.manager.revoke(path.id, &user.0.to_string()).await?;
    Ok(Json(summary))
}

/// Providers available for authorization
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProvidersResponse {
    pub providers: Vec<String>,
}

/// List configured providers
#[utoipa::path(
    get,
    path = "/providers",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Configured providers", body = ProvidersResponse),
        (status = 401, description = "Missing or invalid authorization token", body = ApiError)
    ),
    tag = "integrations"
)]
pub async fn list_providers(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
) -> Result<Json<ProvidersResponse>, ApiError> {
    Ok(Json(ProvidersResponse {
        providers: state
            .manager
            .available_providers()
            .into_iter()
            .map(|p| p.as_str().to_string())
            .collect(),
    }))
}

/// Validate an authorization URL before handing it to a browser: HTTPS,
/// no fragment (RFC 6749 §3.1), bounded length.
fn validate_authorize_url(url: &Url) -> Result<(), ApiError> {
    if url.scheme() != "https" {
        return Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "Adapter bug: authorization URL must use HTTPS",
        ));
    }

    if url.fragment().is_some() {
        return Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "Adapter bug: authorization URL must not include a fragment",
        ));
    }

    if url.as_str().len() > 2048 {
        return Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "Adapter bug: authorization URL exceeds 2048 characters",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorize_url_validation() {
        let valid = Url::parse("https://accounts.google.com/o/oauth2/v2/auth?state=x").unwrap();
        assert!(validate_authorize_url(&valid).is_ok());

        let http = Url::parse("http://accounts.google.com/o/oauth2/v2/auth").unwrap();
        assert!(validate_authorize_url(&http).is_err());

        let fragment = Url::parse("https://accounts.google.com/auth#frag").unwrap();
        assert!(validate_authorize_url(&fragment).is_err());
    }
}
