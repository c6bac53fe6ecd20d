//! HTTP server setup and configuration.

use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use reqwest::Client;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use super::handlers;
use super::upstream::UpstreamClient;
use crate::auth::{self, CredentialSource};
use crate::config::Config;

/// Response header carrying the per-request correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Correlation id assigned to every inbound request.
#[derive(Debug, Clone, Copy)]
pub struct RequestId(pub Uuid);

/// Shared application state. Read-only after startup.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub credentials: Arc<dyn CredentialSource>,
    pub upstream: UpstreamClient,
}

impl AppState {
    /// Build state with the credential source described by `config.auth`.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let credentials = auth::from_config(&config.auth);
        Self::with_credentials(config, credentials)
    }

    /// Build state with an explicit credential source.
    pub fn with_credentials(
        config: Config,
        credentials: Arc<dyn CredentialSource>,
    ) -> anyhow::Result<Self> {
        // No overall timeout here: it would cut long streams.
        let http_client = Client::builder()
            .connect_timeout(config.upstream.connect_timeout())
            .build()?;

        Ok(Self {
            upstream: UpstreamClient::new(http_client, &config.upstream),
            credentials,
            config: Arc::new(config),
        })
    }
}

/// Attach a fresh [`RequestId`] as an extension and echo it in the response.
async fn assign_request_id(mut request: Request, next: Next) -> Response {
    let id = RequestId(Uuid::new_v4());
    request.extensions_mut().insert(id);

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id.0.to_string()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}

/// Create the axum router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(handlers::chat))
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(middleware::from_fn(assign_request_id))
        .layer(TraceLayer::new_for_http())
}

/// Run the HTTP server.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let listen_addr = config.server.listen.clone();
    let state = AppState::new(config)?;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(address = %listen_addr, "Starting chatrelay server");

    axum::serve(listener, app).await?;

    Ok(())
}
