//! Strict request firewall
//!
//! Validates the raw request target before anything else looks at it.
//! Encoded slash and encoded percent are relaxed by configuration because the
//! legacy application uses encoded path segments for nested group identifiers.

use axum::{
    extract::{Request, State},
    http::{Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;

use crate::security::policy::decode_path;
use crate::AppState;

const ENCODED_SLASH: &[&str] = &["%2f", "%2F"];
const ENCODED_PERCENT: &[&str] = &["%25"];
const DOUBLE_SLASH: &[&str] = &["//", "%2f%2f", "%2f%2F", "%2F%2f", "%2F%2F"];
const SEMICOLON: &[&str] = &[";", "%3b", "%3B"];
const BACKSLASH: &[&str] = &["\\", "%5c", "%5C"];
const ENCODED_PERIOD: &[&str] = &["%2e", "%2E"];
const NULL: &[&str] = &["\0", "%00"];
const LINE_BREAKS: &[&str] = &["\n", "\r", "%0a", "%0A", "%0d", "%0D"];

/// Why a request was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    MethodNotAllowed(String),
    NonPrintable,
    Blocked(&'static str),
    NotNormalized,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::MethodNotAllowed(m) => write!(f, "method {} is not allowed", m),
            Rejection::NonPrintable => f.write_str("request target contains non-printable characters"),
            Rejection::Blocked(token) => write!(f, "request target contains {:?}", token),
            Rejection::NotNormalized => f.write_str("request path is not normalized"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StrictFirewall {
    allowed_methods: Vec<Method>,
    blocklist: Vec<&'static str>,
}

impl StrictFirewall {
    pub fn new(allow_encoded_slash: bool, allow_encoded_percent: bool) -> Self {
        let mut blocklist: Vec<&'static str> = Vec::new();
        for group in [
            DOUBLE_SLASH,
            SEMICOLON,
            BACKSLASH,
            ENCODED_PERIOD,
            NULL,
            LINE_BREAKS,
        ] {
            blocklist.extend_from_slice(group);
        }
        if !allow_encoded_slash {
            blocklist.extend_from_slice(ENCODED_SLASH);
        }
        if !allow_encoded_percent {
            blocklist.extend_from_slice(ENCODED_PERCENT);
        }
        Self {
            allowed_methods: vec![
                Method::DELETE,
                Method::GET,
                Method::HEAD,
                Method::OPTIONS,
                Method::PATCH,
                Method::POST,
                Method::PUT,
            ],
            blocklist,
        }
    }

    /// Check method and raw path (query string excluded)
    pub fn check(&self, method: &Method, raw_path: &str) -> Result<(), Rejection> {
        if !self.allowed_methods.contains(method) {
            return Err(Rejection::MethodNotAllowed(method.to_string()));
        }

        if !raw_path.bytes().all(|b| (0x20..0x7f).contains(&b)) {
            // Control characters get their own messages below
            if let Some(token) = [NULL, LINE_BREAKS]
                .iter()
                .flat_map(|g| g.iter())
                .find(|t| raw_path.contains(**t))
            {
                return Err(Rejection::Blocked(*token));
            }
            return Err(Rejection::NonPrintable);
        }

        if let Some(token) = self.blocklist.iter().find(|t| raw_path.contains(**t)) {
            return Err(Rejection::Blocked(*token));
        }

        // Rules match the decoded path, so it must be normalized too
        if !is_normalized(raw_path) || !is_normalized(&decode_path(raw_path)) {
            return Err(Rejection::NotNormalized);
        }

        Ok(())
    }
}

/// No `.` or `..` path segments
fn is_normalized(path: &str) -> bool {
    !path.split('/').any(|segment| segment == "." || segment == "..")
}

/// Firewall stage: rejects with a fixed 400 before any other component runs
pub async fn firewall_filter(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let raw_path = request.uri().path();
    if let Err(rejection) = state.firewall.check(request.method(), raw_path) {
        tracing::warn!(
            event = "firewall_rejected",
            method = %request.method(),
            reason = %rejection,
            "Request rejected by firewall"
        );
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "Request rejected",
                "code": "REQUEST_REJECTED"
            })),
        )
            .into_response();
    }
    next.run(request).await
}
