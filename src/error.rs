use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Request-level failures surfaced by the gateway
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Login failed: provider error, bad state, invalid/expired code, invalid ID token
    #[error("authentication failed: {0}")]
    Unauthenticated(String),

    /// Missing or invalid CSRF token on a state-changing request
    #[error("invalid CSRF token")]
    CsrfRejected,

    #[error("bad request: {0}")]
    BadRequest(String),

    /// Identity provider or upstream application unreachable / unusable response
    #[error("bad gateway: {0}")]
    BadGateway(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            GatewayError::CsrfRejected => StatusCode::FORBIDDEN,
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = match &self {
            GatewayError::Unauthenticated(msg) => json!({
                "error": "Authentication required",
                "message": msg,
                "code": "UNAUTHENTICATED"
            }),
            GatewayError::CsrfRejected => json!({
                "error": "Access denied",
                "message": "Invalid CSRF token",
                "code": "CSRF_REJECTED"
            }),
            GatewayError::BadRequest(msg) => json!({
                "error": "Bad request",
                "message": msg,
                "code": "BAD_REQUEST"
            }),
            // Upstream details stay in the logs
            GatewayError::BadGateway(_) => json!({
                "error": "Bad gateway",
                "code": "BAD_GATEWAY"
            }),
            GatewayError::Internal(_) => json!({
                "error": "Internal server error"
            }),
        };
        (self.status(), Json(body)).into_response()
    }
}
