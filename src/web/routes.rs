use super::handlers::{healthz_handler, readyz_handler};
use super::proxy::proxy_handler;
use crate::{security::FilterChain, AppState};
use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Probes plus the legacy application (proxied), behind the gateway
pub fn create_router(state: Arc<AppState>) -> Router {
    let app = Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .fallback(proxy_handler)
        .with_state(state.clone());

    build_gateway(app, state)
}

/// Put the gateway's stages and request tracing in front of `app`
pub fn build_gateway(app: Router, state: Arc<AppState>) -> Router {
    FilterChain::standard()
        .apply(app, state)
        .layer(TraceLayer::new_for_http())
}
