//! Pure helper functions for authentication
//!
//! Stateless helpers for URL building, cookie handling and HTTP clients.

use axum::http::{header::InvalidHeaderValue, HeaderMap, HeaderValue};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use std::time::Duration;

use crate::config::Config;

// =============================================================================
// JWT Helpers (for logout token validation)
// =============================================================================

/// Check if a JWT token is expired (without signature verification)
///
/// Used at logout to avoid sending an expired id_token_hint to Keycloak,
/// which would cause "expired_code" warnings in Keycloak logs.
///
/// Returns true if the token is expired or malformed.
pub fn is_jwt_expired(token: &str) -> bool {
    // JWT format: header.payload.signature
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return true; // Malformed
    }

    let Ok(payload) = URL_SAFE_NO_PAD.decode(parts[1].trim_end_matches('=')) else {
        return true;
    };

    let json: serde_json::Value = match serde_json::from_slice(&payload) {
        Ok(v) => v,
        Err(_) => return true, // Can't parse
    };

    let Some(exp) = json.get("exp").and_then(|v| v.as_i64()) else {
        return true; // No exp claim
    };

    // Check if expired (with 5 second buffer for clock skew)
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);

    exp < (now - 5)
}

// =============================================================================
// HTTP Client Builders
// =============================================================================

/// Create a reqwest client for identity provider requests using config timeouts
pub fn create_http_client(
    connect_timeout_secs: u64,
    request_timeout_secs: u64,
) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::ClientBuilder::new()
        .redirect(reqwest::redirect::Policy::none()) // Security: prevent SSRF
        .connect_timeout(Duration::from_secs(connect_timeout_secs))
        .timeout(Duration::from_secs(request_timeout_secs))
        .build()
}

// =============================================================================
// URL Builders
// =============================================================================

/// Build the Keycloak end-session URL (OIDC RP-initiated logout)
///
/// Keycloak requires either `client_id` or `id_token_hint` when using `post_logout_redirect_uri`.
/// We prefer `id_token_hint` when available and not expired, falling back to `client_id`.
pub fn build_end_session_url(
    keycloak_callback_url: &str,
    keycloak_realm: &str,
    post_logout_redirect_uri: &str,
    client_id: &str,
    id_token: Option<&str>,
) -> String {
    let post_logout_redirect = urlencoding::encode(post_logout_redirect_uri);

    // Check if we have a valid, non-expired id_token
    let valid_id_token = id_token
        .filter(|t| !t.trim().is_empty())
        .filter(|t| {
            if is_jwt_expired(t) {
                tracing::info!("id_token expired, using client_id for Keycloak logout");
                false
            } else {
                true
            }
        });

    match valid_id_token {
        Some(id_token) => format!(
            "{}/realms/{}/protocol/openid-connect/logout?id_token_hint={}&post_logout_redirect_uri={}",
            keycloak_callback_url,
            keycloak_realm,
            urlencoding::encode(id_token),
            post_logout_redirect
        ),
        None => format!(
            "{}/realms/{}/protocol/openid-connect/logout?client_id={}&post_logout_redirect_uri={}",
            keycloak_callback_url,
            keycloak_realm,
            urlencoding::encode(client_id),
            post_logout_redirect
        ),
    }
}

/// Only same-origin relative paths may be resumed after login
pub fn is_safe_redirect_target(target: &str) -> bool {
    target.starts_with('/') && !target.starts_with("//") && !target.contains('\\')
}

// =============================================================================
// Cookies
// =============================================================================

/// Extract a cookie value from headers
///
/// Handles multiple Cookie headers (some proxies fold/duplicate headers).
/// Uses `get_all` to collect all Cookie header values.
pub fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let prefix = format!("{}=", name);

    // Iterate over all Cookie headers (proxies may send multiple)
    for header_value in headers.get_all("cookie") {
        if let Ok(cookie_str) = header_value.to_str() {
            if let Some(value) = cookie_str
                .split(';')
                .map(|c| c.trim())
                .find(|c| c.starts_with(&prefix))
                .and_then(|c| c.strip_prefix(&prefix))
            {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Set-Cookie value binding the browser to a session
pub fn session_cookie(config: &Config, session_id: &str) -> String {
    format!(
        "{}={}; HttpOnly; Path=/; SameSite=Lax{}{}",
        config.session_cookie_name,
        session_id,
        config.cookie_domain_attr(),
        config.cookie_secure_flag()
    )
}

/// Set-Cookie value removing the session cookie
pub fn clear_session_cookie(config: &Config) -> String {
    format!(
        "{}=; HttpOnly; Path=/; Max-Age=0; SameSite=Lax{}{}",
        config.session_cookie_name,
        config.cookie_domain_attr(),
        config.cookie_secure_flag()
    )
}

/// Create a HeaderValue from a string, logging instead of panicking on bad input
pub fn header_value(s: &str) -> Result<HeaderValue, InvalidHeaderValue> {
    HeaderValue::from_str(s).inspect_err(|e| {
        tracing::error!(
            error = %e,
            value_len = s.len(),
            "Failed to create header value"
        );
    })
}

// =============================================================================
// Tests
// =============================================================================
