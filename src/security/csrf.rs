//! CSRF protection with a per-session synchronizer token
//!
//! State-changing requests must echo the session's token in a header or in the
//! `_csrf` query parameter. REST endpoints used by non-browser clients are
//! exempted by the policy (see `SecurityPolicy::is_csrf_exempt`).

use axum::http::{HeaderMap, Method};

/// Header used to hand the token to the client and to read it back
pub const CSRF_HEADER: &str = "x-xsrf-token";
/// Alternative request header accepted for compatibility
pub const CSRF_HEADER_ALT: &str = "x-csrf-token";
/// Query parameter fallback for form posts
pub const CSRF_PARAM: &str = "_csrf";

/// Session CSRF token, exposed to in-process application code as a request extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCsrfToken(pub String);

/// GET, HEAD, TRACE and OPTIONS never need a token
pub fn requires_protection(method: &Method) -> bool {
    !matches!(
        *method,
        Method::GET | Method::HEAD | Method::TRACE | Method::OPTIONS
    )
}

/// Token presented by the client: header first, then query parameter
pub fn presented_token(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    for name in [CSRF_HEADER, CSRF_HEADER_ALT] {
        if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }

    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == CSRF_PARAM)
        .and_then(|(_, value)| urlencoding::decode(value).ok())
        .map(|value| value.into_owned())
        .filter(|value| !value.is_empty())
}

/// Constant-time comparison of the expected and presented tokens
pub fn tokens_match(expected: &str, presented: &str) -> bool {
    let (a, b) = (expected.as_bytes(), presented.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Validate a state-changing request against the session token (if any)
pub fn verify(expected: Option<&str>, headers: &HeaderMap, query: Option<&str>) -> bool {
    match (expected, presented_token(headers, query)) {
        (Some(expected), Some(presented)) => tokens_match(expected, &presented),
        _ => false,
    }
}
