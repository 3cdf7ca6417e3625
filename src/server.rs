//! # Server Configuration
//!
//! Router assembly, shared state and the serve loop.

use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post, put},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;
use url::Url;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::AppConfig;
use crate::crypto::CredentialCipher;
use crate::handlers::{self, broker, hooks};
use crate::orchestrator::Orchestrator;
use crate::platform::CloudFoundryFactory;
use crate::registry::HookRegistry;
use crate::repositories::HookRepository;
use crate::scm::GitHubClientFactory;
use crate::telemetry::trace_context_middleware;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Arc<DatabaseConnection>,
    pub registry: HookRegistry,
    pub orchestrator: Orchestrator,
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid server address: {0}")]
    InvalidAddress(#[from] std::net::AddrParseError),
    #[error("invalid BASE_URL: {0}")]
    InvalidBaseUrl(#[from] url::ParseError),
    #[error("invalid CRYPTO_KEY: {0}")]
    Crypto(#[from] crate::crypto::CryptoError),
    #[error("server i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppState {
    /// Wires the production GitHub client and Cloud Foundry CLI into the state.
    pub fn from_config(config: Arc<AppConfig>, db: Arc<DatabaseConnection>) -> Result<Self, ServerError> {
        let cipher = CredentialCipher::from_key_bytes(config.crypto_key.clone())?;
        if !cipher.is_enabled() {
            tracing::warn!("CRYPTO_KEY not set; hook credentials are stored unencrypted");
        }

        let scm = Arc::new(GitHubClientFactory::new(config.github_api_base.clone()));
        let store = Arc::new(HookRepository::new(db.clone(), cipher));
        let registry = HookRegistry::new(store, scm.clone(), Url::parse(&config.base_url)?);
        let orchestrator = Orchestrator::new(scm, Arc::new(CloudFoundryFactory::from_config(&config)));

        Ok(Self {
            config,
            db,
            registry,
            orchestrator,
        })
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let broker_routes = Router::new()
        .route("/v2/catalog", get(broker::catalog))
        .route(
            "/v2/service_instances/{instance_id}",
            put(broker::provision)
                .delete(broker::deprovision)
                .patch(broker::update),
        )
        .route(
            "/v2/service_instances/{instance_id}/last_operation",
            get(broker::last_operation),
        )
        .route(
            "/v2/service_instances/{instance_id}/service_bindings/{binding_id}",
            put(broker::bind).delete(broker::unbind),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            broker::broker_auth,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/hook", post(hooks::single_tenant_hook))
        .route("/hook/{instance_id}", post(hooks::instance_hook))
        .merge(broker_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_context_middleware))
}

/// Serves until `shutdown` fires, then drains in-flight requests.
pub async fn run_server(state: AppState, shutdown: CancellationToken) -> Result<(), ServerError> {
    let addr = state.config.bind_addr()?;
    let profile = state.config.profile.clone();
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, %profile, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Cancels `token` on Ctrl-C or SIGTERM.
pub async fn shutdown_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown requested");
    token.cancel();
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::hooks::instance_hook,
        crate::handlers::hooks::single_tenant_hook,
        crate::handlers::broker::catalog,
        crate::handlers::broker::provision,
        crate::handlers::broker::deprovision,
        crate::handlers::broker::last_operation,
        crate::handlers::broker::update,
        crate::handlers::broker::bind,
        crate::handlers::broker::unbind,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::handlers::HealthStatus,
            crate::error::ApiError,
            crate::handlers::hooks::HookAccepted,
            crate::handlers::broker::BrokerErrorBody,
            crate::handlers::broker::ProvisionRequest,
            crate::handlers::broker::ProvisionOptions,
        )
    ),
    tags(
        (name = "hooks", description = "GitHub pull_request webhooks"),
        (name = "broker", description = "Open Service Broker API"),
    ),
    info(
        title = "Review Apps API",
        description = "Per-pull-request review environments on Cloud Foundry",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
