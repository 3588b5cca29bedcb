//! # Server Configuration
//!
//! Router assembly, shared application state, and the serve loop with
//! graceful shutdown. The proactive refresh sweep runs alongside the
//! server and stops with it.

use std::sync::Arc;

use axum::{
    Router,
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

use crate::auth::auth_middleware;
use crate::config::AppConfig;
use crate::handlers;
use crate::manager::OAuthManager;
use crate::refresh::RefreshService;
use crate::telemetry::{self, TraceContext};

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub manager: Arc<OAuthManager>,
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let protected = Router::new()
        .route(
            "/connect/{provider}",
            post(handlers::integrations::begin_authorization),
        )
        .route(
            "/integrations",
            get(handlers::integrations::list_integrations),
        )
        .route(
            "/integrations/{id}/refresh",
            post(handlers::integrations::refresh_integration),
        )
        .route(
            "/integrations/{id}",
            delete(handlers::integrations::revoke_integration),
        )
        .route("/providers", get(handlers::integrations::list_providers))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::health))
        // Reached by the provider redirect; authenticated by the state nonce
        .route(
            "/oauth/callback",
            get(handlers::integrations::oauth_callback),
        )
        .merge(protected)
        .layer(middleware::from_fn(trace_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
}

/// Attach a correlation id to every request so error envelopes and logs can
/// be matched up.
async fn trace_middleware(mut request: Request, next: Next) -> Response {
    let context = TraceContext {
        trace_id: format!("req-{}", &Uuid::new_v4().to_string()[..8]),
    };
    request.extensions_mut().insert(context.clone());
    telemetry::with_trace_context(context, next.run(request)).await
}

/// Starts the server with the given configuration and database pool.
pub async fn run_server(
    config: AppConfig,
    db: DatabaseConnection,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = Arc::new(config);
    let db_arc = Arc::new(db.clone());

    let manager = Arc::new(OAuthManager::from_config(db_arc.clone(), &config)?);

    let state = AppState {
        config: config.clone(),
        db,
        manager: manager.clone(),
    };
    let app = create_app(state);

    let addr = config
        .bind_addr()
        .map_err(|e| format!("Invalid server address: {}", e))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, profile = %config.profile, "server listening");

    let shutdown = CancellationToken::new();

    let sweep = RefreshService::new(config.token_refresh.clone(), db_arc, manager);
    let sweep_shutdown = shutdown.clone();
    let sweep_handle = tokio::spawn(async move { sweep.run(sweep_shutdown).await });

    let serve_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            serve_shutdown.cancel();
        })
        .await?;

    shutdown.cancel();
    let _ = sweep_handle.await;

    Ok(())
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::health,
        crate::handlers::integrations::begin_authorization,
        crate::handlers::integrations::oauth_callback,
        crate::handlers::integrations::list_integrations,
        crate::handlers::integrations::refresh_integration,
        crate::handlers::integrations::revoke_integration,
        crate::handlers::integrations::list_providers,
    ),
    components(
        schemas(
            crate::handlers::ServiceInfo,
            crate::handlers::integrations::BeginAuthorizationRequest,
            crate::handlers::integrations::AuthorizeUrlResponse,
            crate::handlers::integrations::ProvidersResponse,
            crate::models::IntegrationSummary,
            crate::error::ApiError,
        )
    ),
    info(
        title = "Integrations API",
        description = "Delegated-access credential lifecycle management",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
