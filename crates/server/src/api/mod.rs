pub mod health;
pub mod openapi;
pub mod proxy;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use apigate_gateway::{Gateway, UsageRecorder};

use crate::metrics::ServerMetrics;
use self::openapi::ApiDoc;

/// Shared application state passed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub usage_recorder: Arc<UsageRecorder>,
    pub metrics: Arc<ServerMetrics>,
}

/// Build the `axum` router: `/health`/`/metrics` are ordinary routes, the
/// proxy catch-all is a fallback, so any path not claimed by the two
/// operational endpoints reaches the gateway pipeline.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/metrics", get(health::metrics))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .fallback(proxy::proxy)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
