use crate::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use std::sync::Arc;

/// Liveness check - always returns OK if the process is running
pub async fn healthz_handler() -> impl IntoResponse {
    StatusCode::OK
}

/// Readiness check - whether the gateway can validate logins
///
/// Returns 200 OK if:
/// - JWKS cache has been populated (Keycloak is reachable)
///
/// Returns 503 Service Unavailable if:
/// - JWKS cache is empty (Keycloak not yet contacted or unreachable)
pub async fn readyz_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let jwks_cached = state.jwt_validator.is_jwks_cached().await;

    if jwks_cached {
        (StatusCode::OK, "ready")
    } else {
        tracing::warn!("Readiness check failed: JWKS not cached");
        (StatusCode::SERVICE_UNAVAILABLE, "not ready: JWKS not cached")
    }
}
