//! End-to-end tests for the OAuth manager against a mock provider.
//!
//! A wiremock server stands in for the provider's token, identity and
//! revocation endpoints; the zoom adapter is pointed at it through its base
//! URL overrides. Storage is a migrated SQLite database per test.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use url::Url;
use uuid::Uuid;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use integrations::crypto::KeyRing;
use integrations::manager::{OAuthError, OAuthManager};
use integrations::models::{audit_entry, consent_record, integration, token_record};
use integrations::providers::{AdapterRegistry, Provider, ZoomAdapter};
use integrations::repositories::TokenVault;

#[path = "test_utils/mod.rs"]
mod test_utils;

const REDIRECT_URI: &str = "https://app.example.com/oauth/callback";
const REFRESH_MARGIN_SECONDS: i64 = 300;

fn test_keys() -> Vec<Vec<u8>> {
    vec![vec![7u8; 32]]
}

/// Manager wired to a mock provider server with a 2-second HTTP timeout.
fn test_manager(db: Arc<DatabaseConnection>, server_url: &str) -> OAuthManager {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .expect("client builds");

    let mut registry = AdapterRegistry::new();
    registry.register(Arc::new(ZoomAdapter::new(
        "test-client-id".to_string(),
        "test-client-secret".to_string(),
        Some(server_url.to_string()),
        Some(server_url.to_string()),
        http,
    )));

    OAuthManager::new(
        db,
        registry,
        KeyRing::new(test_keys()).expect("valid ring"),
        10,
        REFRESH_MARGIN_SECONDS,
    )
}

fn extract_state_nonce(authorize_url: &Url) -> String {
    authorize_url
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.to_string())
        .expect("authorize URL carries a state nonce")
}

fn token_response(expires_in: u64, refresh_token: Option<&str>) -> serde_json::Value {
    let mut body = serde_json::json!({
        "access_token": "access-token-plaintext",
        "token_type": "bearer",
        "expires_in": expires_in,
        "scope": "meeting:read",
    });
    if let Some(refresh) = refresh_token {
        body["refresh_token"] = serde_json::json!(refresh);
    }
    body
}

async fn mount_exchange(server: &MockServer, expires_in: u64, refresh_token: Option<&str>) {
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response(
            expires_in,
            refresh_token,
        )))
        .mount(server)
        .await;
}

async fn mount_identity(server: &MockServer, account_id: &str) {
    Mock::given(method("GET"))
        .and(path("/v2/users/me"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": account_id })),
        )
        .mount(server)
        .await;
}

/// Run begin + callback and return the activated summary.
async fn connect(
    manager: &OAuthManager,
    user_id: Uuid,
) -> Result<integrations::models::IntegrationSummary> {
    let begun = manager
        .begin_authorization(
            user_id,
            Provider::Zoom,
            &["meeting.read".to_string()],
            REDIRECT_URI,
        )
        .await?;
    let nonce = extract_state_nonce(&begun.authorize_url);
    Ok(manager
        .handle_callback(Some("auth-code"), &nonce, None)
        .await?)
}

#[tokio::test]
async fn happy_path_activates_integration() -> Result<()> {
    let (db, _db_file) = test_utils::setup_test_db().await?;
    let server = MockServer::start().await;
    mount_exchange(&server, 3600, Some("refresh-token-plaintext")).await;
    mount_identity(&server, "zoom-user-1").await;

    let manager = test_manager(db.clone(), &server.uri());
    let user_id = Uuid::new_v4();

    let begun = manager
        .begin_authorization(
            user_id,
            Provider::Zoom,
            &["meeting.read".to_string()],
            REDIRECT_URI,
        )
        .await?;

    assert_eq!(begun.integration.status, "pending");
    assert!(begun.authorize_url.path().ends_with("/oauth/authorize"));
    let nonce = extract_state_nonce(&begun.authorize_url);

    let summary = manager.handle_callback(Some("auth-code"), &nonce, None).await?;

    assert_eq!(summary.status, "active");
    assert_eq!(summary.provider, "zoom");
    assert_eq!(summary.provider_account_id.as_deref(), Some("zoom-user-1"));
    assert_eq!(summary.granted_scopes, vec!["meeting.read".to_string()]);

    // Token record exists and stores only ciphertext
    let record = token_record::Entity::find()
        .filter(token_record::Column::IntegrationId.eq(summary.id))
        .one(db.as_ref())
        .await?
        .expect("token record persisted");
    let plaintext = b"access-token-plaintext";
    assert!(
        !record
            .access_token_ciphertext
            .windows(plaintext.len())
            .any(|w| w == plaintext),
        "ciphertext must not embed the plaintext token"
    );
    assert!(record.refresh_token_ciphertext.is_some());

    // The vault round-trips the pair
    let vault = TokenVault::new(db.clone(), KeyRing::new(test_keys())?);
    let tokens = vault.retrieve(summary.id).await?;
    assert_eq!(tokens.access_token.as_str(), "access-token-plaintext");
    assert_eq!(
        tokens.refresh_token.as_ref().map(|t| t.as_str()),
        Some("refresh-token-plaintext")
    );

    // Consent history captured the approved scopes
    let consents = consent_record::Entity::find()
        .filter(consent_record::Column::IntegrationId.eq(summary.id))
        .all(db.as_ref())
        .await?;
    assert_eq!(consents.len(), 1);
    assert_eq!(
        consents[0].scopes,
        serde_json::json!(["meeting.read"])
    );

    // Audit trail: begin + callback_success
    let audits = audit_entry::Entity::find()
        .filter(audit_entry::Column::IntegrationId.eq(summary.id))
        .all(db.as_ref())
        .await?;
    let actions: Vec<&str> = audits.iter().map(|a| a.action.as_str()).collect();
    assert!(actions.contains(&"begin"));
    assert!(actions.contains(&"callback_success"));

    Ok(())
}

#[tokio::test]
async fn replayed_callback_fails_without_second_integration() -> Result<()> {
    let (db, _db_file) = test_utils::setup_test_db().await?;
    let server = MockServer::start().await;
    mount_exchange(&server, 3600, Some("refresh-token-plaintext")).await;
    mount_identity(&server, "zoom-user-1").await;

    let manager = test_manager(db.clone(), &server.uri());
    let user_id = Uuid::new_v4();

    let begun = manager
        .begin_authorization(
            user_id,
            Provider::Zoom,
            &["meeting.read".to_string()],
            REDIRECT_URI,
        )
        .await?;
    let nonce = extract_state_nonce(&begun.authorize_url);

    manager.handle_callback(Some("auth-code"), &nonce, None).await?;

    // Replaying the captured callback must fail closed
    let replay = manager.handle_callback(Some("auth-code"), &nonce, None).await;
    assert!(matches!(replay, Err(OAuthError::InvalidState)));

    let active_count = integration::Entity::find()
        .filter(integration::Column::UserId.eq(user_id))
        .filter(integration::Column::Status.eq("active"))
        .all(db.as_ref())
        .await?
        .len();
    assert_eq!(active_count, 1, "replay must not mint a second integration");

    Ok(())
}

#[tokio::test]
async fn denied_callback_burns_the_nonce() -> Result<()> {
    let (db, _db_file) = test_utils::setup_test_db().await?;
    let server = MockServer::start().await;

    let manager = test_manager(db.clone(), &server.uri());
    let user_id = Uuid::new_v4();

    let begun = manager
        .begin_authorization(
            user_id,
            Provider::Zoom,
            &["meeting.read".to_string()],
            REDIRECT_URI,
        )
        .await?;
    let nonce = extract_state_nonce(&begun.authorize_url);

    let denied = manager
        .handle_callback(None, &nonce, Some("access_denied"))
        .await;
    assert!(matches!(
        denied,
        Err(OAuthError::AuthorizationDenied { reason }) if reason == "access_denied"
    ));

    // The denial was audited
    let failures = audit_entry::Entity::find()
        .filter(audit_entry::Column::Action.eq("callback_failure"))
        .all(db.as_ref())
        .await?;
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].actor, user_id.to_string());

    // A replay of the denied callback reads as an invalid state, not a
    // second denial
    let replay = manager
        .handle_callback(Some("auth-code"), &nonce, None)
        .await;
    assert!(matches!(replay, Err(OAuthError::InvalidState)));

    Ok(())
}

#[tokio::test]
async fn expired_state_is_rejected() -> Result<()> {
    let (db, _db_file) = test_utils::setup_test_db().await?;
    let server = MockServer::start().await;
    let manager = test_manager(db.clone(), &server.uri());

    // Mint a state that is already past its expiry
    let states = integrations::repositories::StateStore::new(db.clone());
    let state = states
        .create(
            Uuid::new_v4(),
            Provider::Zoom,
            &["meeting.read".to_string()],
            REDIRECT_URI,
            -1,
        )
        .await?;

    let result = manager
        .handle_callback(Some("auth-code"), &state.state, None)
        .await;
    assert!(matches!(result, Err(OAuthError::InvalidState)));

    Ok(())
}

#[tokio::test]
async fn reconnecting_supersedes_the_previous_active_integration() -> Result<()> {
    let (db, _db_file) = test_utils::setup_test_db().await?;
    let server = MockServer::start().await;
    mount_exchange(&server, 3600, Some("refresh-token-plaintext")).await;
    mount_identity(&server, "zoom-user-1").await;

    let manager = test_manager(db.clone(), &server.uri());
    let user_id = Uuid::new_v4();

    let first = connect(&manager, user_id).await?;
    let second = connect(&manager, user_id).await?;
    assert_ne!(first.id, second.id);

    let rows = integration::Entity::find()
        .filter(integration::Column::UserId.eq(user_id))
        .all(db.as_ref())
        .await?;
    let active: Vec<_> = rows.iter().filter(|r| r.status == "active").collect();
    assert_eq!(active.len(), 1, "at most one active per (user, provider)");
    assert_eq!(active[0].id, second.id);

    let first_row = rows.iter().find(|r| r.id == first.id).expect("history kept");
    assert_eq!(first_row.status, "expired", "superseded, not deleted");

    Ok(())
}

#[tokio::test]
async fn rejected_refresh_expires_the_integration() -> Result<()> {
    let (db, _db_file) = test_utils::setup_test_db().await?;
    let server = MockServer::start().await;
    // Short-lived token so the refresh path actually calls the provider
    mount_exchange(&server, 60, Some("refresh-token-plaintext")).await;
    mount_identity(&server, "zoom-user-1").await;

    // Refresh token is revoked server-side: exactly one refresh call
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(serde_json::json!({ "error": "invalid_grant" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let manager = test_manager(db.clone(), &server.uri());
    let user_id = Uuid::new_v4();
    let summary = connect(&manager, user_id).await?;

    let result = manager.refresh(summary.id, "operator").await;
    assert!(matches!(
        result,
        Err(OAuthError::ProviderRejected { code }) if code == "invalid_grant"
    ));

    let row = integration::Entity::find_by_id(summary.id)
        .one(db.as_ref())
        .await?
        .expect("row exists");
    assert_eq!(row.status, "expired");

    // A second refresh fails on local state without reaching the provider
    // (the mock's expect(1) enforces the call count)
    let second = manager.refresh(summary.id, "operator").await;
    assert!(matches!(
        second,
        Err(OAuthError::InvalidIntegrationState { .. })
    ));

    Ok(())
}

#[tokio::test]
async fn fresh_token_refresh_is_a_no_op() -> Result<()> {
    let (db, _db_file) = test_utils::setup_test_db().await?;
    let server = MockServer::start().await;
    // Expiry far beyond the refresh margin
    mount_exchange(&server, 7200, Some("refresh-token-plaintext")).await;
    mount_identity(&server, "zoom-user-1").await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response(3600, None)))
        .expect(0)
        .mount(&server)
        .await;

    let manager = test_manager(db.clone(), &server.uri());
    let summary = connect(&manager, Uuid::new_v4()).await?;

    let refreshed = manager.refresh(summary.id, "operator").await?;
    assert_eq!(refreshed.status, "active");

    Ok(())
}

#[tokio::test]
async fn successful_refresh_rotates_the_access_token() -> Result<()> {
    let (db, _db_file) = test_utils::setup_test_db().await?;
    let server = MockServer::start().await;
    mount_exchange(&server, 60, Some("refresh-token-plaintext")).await;
    mount_identity(&server, "zoom-user-1").await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "rotated-access-token",
            "refresh_token": "rotated-refresh-token",
            "token_type": "bearer",
            "expires_in": 3600,
        })))
        .mount(&server)
        .await;

    let manager = test_manager(db.clone(), &server.uri());
    let summary = connect(&manager, Uuid::new_v4()).await?;

    let refreshed = manager.refresh(summary.id, "operator").await?;
    assert_eq!(refreshed.status, "active");
    assert!(refreshed.last_refreshed_at.is_some());

    let vault = TokenVault::new(db.clone(), KeyRing::new(test_keys())?);
    let tokens = vault.retrieve(summary.id).await?;
    assert_eq!(tokens.access_token.as_str(), "rotated-access-token");
    assert_eq!(
        tokens.refresh_token.as_ref().map(|t| t.as_str()),
        Some("rotated-refresh-token")
    );

    let audits = audit_entry::Entity::find()
        .filter(audit_entry::Column::IntegrationId.eq(summary.id))
        .filter(audit_entry::Column::Action.eq("refresh"))
        .all(db.as_ref())
        .await?;
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].outcome, "success");

    Ok(())
}

#[tokio::test]
async fn access_only_grant_cannot_be_refreshed() -> Result<()> {
    let (db, _db_file) = test_utils::setup_test_db().await?;
    let server = MockServer::start().await;
    // Provider omits the refresh token entirely
    mount_exchange(&server, 60, None).await;
    mount_identity(&server, "zoom-user-1").await;

    let manager = test_manager(db.clone(), &server.uri());
    let summary = connect(&manager, Uuid::new_v4()).await?;

    let result = manager.refresh(summary.id, "operator").await;
    assert!(matches!(result, Err(OAuthError::NoRefreshToken(id)) if id == summary.id));

    // Still active: the caller is expected to plan re-authorization
    let row = integration::Entity::find_by_id(summary.id)
        .one(db.as_ref())
        .await?
        .expect("row exists");
    assert_eq!(row.status, "active");

    Ok(())
}

#[tokio::test]
async fn revoke_succeeds_locally_when_the_remote_call_times_out() -> Result<()> {
    let (db, _db_file) = test_utils::setup_test_db().await?;
    let server = MockServer::start().await;
    mount_exchange(&server, 3600, Some("refresh-token-plaintext")).await;
    mount_identity(&server, "zoom-user-1").await;

    // Remote revocation hangs past the 2s client timeout
    Mock::given(method("POST"))
        .and(path("/oauth/revoke"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let manager = test_manager(db.clone(), &server.uri());
    let summary = connect(&manager, Uuid::new_v4()).await?;

    let revoked = manager.revoke(summary.id, "operator").await?;
    assert_eq!(revoked.status, "revoked");

    // Tokens must not linger after revocation
    let record = token_record::Entity::find()
        .filter(token_record::Column::IntegrationId.eq(summary.id))
        .one(db.as_ref())
        .await?;
    assert!(record.is_none());

    // Audit row records that the remote side did not confirm
    let audits = audit_entry::Entity::find()
        .filter(audit_entry::Column::IntegrationId.eq(summary.id))
        .filter(audit_entry::Column::Action.eq("revoke"))
        .all(db.as_ref())
        .await?;
    assert_eq!(audits.len(), 1);
    let metadata = audits[0].metadata.as_ref().expect("metadata present");
    assert_eq!(metadata["remote_revoked"], serde_json::json!(false));

    // Revoking again is a no-op
    let again = manager.revoke(summary.id, "operator").await?;
    assert_eq!(again.status, "revoked");

    Ok(())
}

#[tokio::test]
async fn terminal_integration_cannot_be_refreshed_after_revoke() -> Result<()> {
    let (db, _db_file) = test_utils::setup_test_db().await?;
    let server = MockServer::start().await;
    mount_exchange(&server, 3600, Some("refresh-token-plaintext")).await;
    mount_identity(&server, "zoom-user-1").await;
    Mock::given(method("POST"))
        .and(path("/oauth/revoke"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let manager = test_manager(db.clone(), &server.uri());
    let summary = connect(&manager, Uuid::new_v4()).await?;

    manager.revoke(summary.id, "operator").await?;

    let result = manager.refresh(summary.id, "operator").await;
    assert!(matches!(
        result,
        Err(OAuthError::InvalidIntegrationState { .. })
    ));

    Ok(())
}

#[tokio::test]
async fn unsupported_scope_fails_before_any_side_effect() -> Result<()> {
    let (db, _db_file) = test_utils::setup_test_db().await?;
    let server = MockServer::start().await;
    let manager = test_manager(db.clone(), &server.uri());
    let user_id = Uuid::new_v4();

    let result = manager
        .begin_authorization(
            user_id,
            Provider::Zoom,
            &["calendar.read".to_string()],
            REDIRECT_URI,
        )
        .await;
    assert!(matches!(result, Err(OAuthError::UnsupportedScope { .. })));

    // No rows of any kind were written
    let rows = integration::Entity::find()
        .filter(integration::Column::UserId.eq(user_id))
        .all(db.as_ref())
        .await?;
    assert!(rows.is_empty());

    Ok(())
}

#[tokio::test]
async fn unconfigured_provider_is_unknown() -> Result<()> {
    let (db, _db_file) = test_utils::setup_test_db().await?;
    let server = MockServer::start().await;
    let manager = test_manager(db.clone(), &server.uri());

    let result = manager
        .begin_authorization(
            Uuid::new_v4(),
            Provider::Google,
            &["calendar.read".to_string()],
            REDIRECT_URI,
        )
        .await;
    assert!(matches!(result, Err(OAuthError::UnknownProvider(name)) if name == "google"));

    Ok(())
}

#[tokio::test]
async fn listing_reports_full_history_newest_first() -> Result<()> {
    let (db, _db_file) = test_utils::setup_test_db().await?;
    let server = MockServer::start().await;
    mount_exchange(&server, 3600, Some("refresh-token-plaintext")).await;
    mount_identity(&server, "zoom-user-1").await;
    Mock::given(method("POST"))
        .and(path("/oauth/revoke"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let manager = test_manager(db.clone(), &server.uri());
    let user_id = Uuid::new_v4();

    let first = connect(&manager, user_id).await?;
    manager.revoke(first.id, "operator").await?;
    let second = connect(&manager, user_id).await?;

    let listed = manager.list_integrations(user_id).await?;
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, second.id);
    assert_eq!(listed[0].status, "active");
    assert_eq!(listed[1].id, first.id);
    assert_eq!(listed[1].status, "revoked");

    Ok(())
}
