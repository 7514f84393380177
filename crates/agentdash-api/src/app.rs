// Router assembly
//
// AppContext holds the shared pipeline (store, registry, hub, ingest) and
// build_app turns it into the full HTTP surface. main.rs and the integration
// tests both go through here.

use agentdash_core::{BroadcastHub, EventLimits, EventStore, SessionRegistry, StoreError};
use axum::http::{header, HeaderValue, Method};
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api;
use crate::config::ServerConfig;
use crate::openapi::ApiDoc;
use crate::services::IngestService;

/// Shared state behind every route
#[derive(Clone)]
pub struct AppContext {
    pub store: Arc<dyn EventStore>,
    pub registry: Arc<SessionRegistry>,
    pub hub: BroadcastHub,
    pub ingest: Arc<IngestService>,
    /// "postgres" or "memory", reported by /health
    pub storage_mode: &'static str,
}

impl AppContext {
    pub fn new(store: Arc<dyn EventStore>, storage_mode: &'static str, config: &ServerConfig) -> Self {
        let registry = Arc::new(SessionRegistry::new(config.session_idle_timeout));
        let hub = BroadcastHub::new(config.subscriber_queue_capacity);
        let limits = EventLimits::default().with_max_event_bytes(config.max_event_bytes);
        let ingest = Arc::new(IngestService::new(
            store.clone(),
            registry.clone(),
            hub.clone(),
            limits,
        ));

        Self {
            store,
            registry,
            hub,
            ingest,
            storage_mode,
        }
    }

    /// Rebuild session state from the store after a restart.
    pub async fn restore_sessions(&self) -> Result<usize, StoreError> {
        let summaries = self.store.sessions().await?;
        Ok(self.registry.restore(summaries))
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    storage: &'static str,
    subscribers: usize,
    sessions: usize,
}

async fn health(State(ctx): State<AppContext>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        storage: ctx.storage_mode,
        subscribers: ctx.hub.subscriber_count(),
        sessions: ctx.registry.len(),
    })
}

/// Build the complete application router
pub fn build_app(ctx: &AppContext, config: &ServerConfig) -> Router {
    let events_state = api::events::AppState::new(ctx.ingest.clone(), ctx.store.clone());
    let sessions_state = api::sessions::AppState::new(ctx.registry.clone());
    let stream_state = api::stream::AppState::new(
        ctx.hub.clone(),
        ctx.store.clone(),
        ctx.registry.clone(),
        config.stream,
    );

    let api_routes = Router::new()
        .merge(api::events::routes(events_state))
        .merge(api::sessions::routes(sessions_state))
        .merge(api::stream::routes(stream_state));

    if !config.api_prefix.is_empty() {
        tracing::info!(prefix = %config.api_prefix, "API prefix configured");
    }

    // Health is never prefixed
    let app = Router::new()
        .route("/health", get(health).with_state(ctx.clone()))
        .merge(build_router_with_prefix(api_routes, &config.api_prefix))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()));

    let cors_origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    // Add CORS layer only if origins are configured
    let app = if cors_origins.is_empty() {
        tracing::info!("CORS not configured (same-origin requests only)");
        app
    } else {
        tracing::info!(origins = ?cors_origins, "CORS origins configured");
        app.layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(cors_origins))
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::ORIGIN]),
        )
    };

    app.layer(TraceLayer::new_for_http())
}

/// Build router with optional API prefix (extracted for testing)
pub fn build_router_with_prefix<S: Clone + Send + Sync + 'static>(
    api_routes: Router<S>,
    api_prefix: &str,
) -> Router<S> {
    if api_prefix.is_empty() {
        api_routes
    } else {
        Router::new().nest(api_prefix, api_routes)
    }
}
