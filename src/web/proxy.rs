//! Forwarding to the legacy application
//!
//! Requests that passed the gateway are replayed against `UPSTREAM_URL`. Client
//! supplied identity headers are always dropped; the gateway's own are added
//! from the request extensions the security chain and container stage set.

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{
        header::{COOKIE, HOST},
        request::Parts,
        HeaderMap, HeaderName, HeaderValue, StatusCode, Uri,
    },
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;

use crate::auth::principal::AuthenticatedPrincipal;
use crate::error::GatewayError;
use crate::security::container::ContainerAuthentication;
use crate::security::forwarded::ClientOrigin;
use crate::AppState;

/// Largest request body replayed upstream
const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Headers only the gateway may set
pub const IDENTITY_HEADERS: &[&str] = &[
    "x-auth-request-user",
    "x-auth-request-email",
    "x-auth-request-preferred-username",
    "x-auth-request-groups",
    "x-webapp-user-id",
    "x-webapp-groups",
];

const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

#[derive(Debug, Clone)]
pub struct Upstream {
    base_url: String,
    client: reqwest::Client,
    /// The gateway's own cookie, never shown to the application
    session_cookie_name: String,
}

impl Upstream {
    pub fn new(base_url: String, client: reqwest::Client, session_cookie_name: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            session_cookie_name,
        }
    }

    pub fn target_url(&self, uri: &Uri) -> String {
        let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        format!("{}{}", self.base_url, path_and_query)
    }

    /// Replay the request upstream and stream the response back
    pub async fn forward(&self, request: Request) -> Result<Response, GatewayError> {
        let (parts, body) = request.into_parts();
        let url = self.target_url(&parts.uri);
        let headers = upstream_headers(&parts, &self.session_cookie_name);

        let body = to_bytes(body, MAX_REQUEST_BODY_BYTES)
            .await
            .map_err(|e| GatewayError::BadRequest(format!("Unreadable request body: {}", e)))?;

        tracing::debug!(method = %parts.method, url = %url, "Forwarding to upstream");

        let upstream_response = self
            .client
            .request(parts.method.clone(), &url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, url = %url, "Upstream request failed");
                GatewayError::BadGateway("Legacy application unreachable".into())
            })?;

        let mut builder = Response::builder().status(upstream_response.status());
        for (name, value) in upstream_response.headers() {
            if !is_hop_by_hop(name) {
                builder = builder.header(name, value);
            }
        }

        builder
            .body(Body::from_stream(upstream_response.bytes_stream()))
            .map_err(|e| GatewayError::Internal(format!("Failed to build response: {}", e)))
    }
}

/// Fallback handler: everything not served by the gateway itself
pub async fn proxy_handler(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let Some(upstream) = &state.upstream else {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "Not found" }))).into_response();
    };

    upstream
        .forward(request)
        .await
        .unwrap_or_else(IntoResponse::into_response)
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.as_str())
}

/// Client headers minus hop-by-hop, identity and session cookie, plus the gateway's identity
pub fn upstream_headers(parts: &Parts, session_cookie_name: &str) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(parts.headers.len() + IDENTITY_HEADERS.len());
    for (name, value) in &parts.headers {
        if is_hop_by_hop(name) || *name == HOST || IDENTITY_HEADERS.contains(&name.as_str()) {
            continue;
        }
        if *name == COOKIE {
            if let Some(value) = without_cookie(value, session_cookie_name) {
                headers.append(COOKIE, value);
            }
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    // Forwarded headers were consumed by the gateway; hand the normalized origin on
    if let Some(origin) = parts.extensions.get::<ClientOrigin>() {
        insert_header(&mut headers, "x-forwarded-proto", &origin.scheme);
        insert_header(&mut headers, "x-forwarded-host", &origin.host);
        if !origin.prefix.is_empty() {
            insert_header(&mut headers, "x-forwarded-prefix", &origin.prefix);
        }
    }

    if let Some(principal) = parts.extensions.get::<AuthenticatedPrincipal>() {
        insert_header(&mut headers, "x-auth-request-user", &principal.subject);
        if let Some(email) = &principal.email {
            insert_header(&mut headers, "x-auth-request-email", email);
        }
        if let Some(username) = &principal.username {
            insert_header(&mut headers, "x-auth-request-preferred-username", username);
        }
        insert_header(&mut headers, "x-auth-request-groups", &principal.groups.join(","));
    }

    if let Some(container) = parts.extensions.get::<ContainerAuthentication>() {
        insert_header(&mut headers, "x-webapp-user-id", &container.user_id);
        insert_header(&mut headers, "x-webapp-groups", &container.group_ids.join(","));
    }

    headers
}

/// Cookie header value without the named cookie; `None` when nothing is left
fn without_cookie(value: &HeaderValue, cookie_name: &str) -> Option<HeaderValue> {
    let Ok(cookies) = value.to_str() else {
        return Some(value.clone());
    };
    let prefix = format!("{}=", cookie_name);
    let kept: Vec<&str> = cookies
        .split(';')
        .map(str::trim)
        .filter(|c| !c.is_empty() && !c.starts_with(&prefix))
        .collect();
    if kept.is_empty() {
        return None;
    }
    HeaderValue::from_str(&kept.join("; ")).ok()
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(HeaderName::from_static(name), value);
        }
        Err(_) => tracing::warn!(header = name, "Skipping header with non-visible characters"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request as HttpRequest;

    fn parts(request: HttpRequest<()>) -> Parts {
        request.into_parts().0
    }

    #[test]
    fn test_target_url_keeps_path_and_query() {
        let upstream = Upstream::new(
            "http://camunda:8080/".into(),
            reqwest::Client::new(),
            "SSO_SESSION".into(),
        );
        let uri: Uri = "/camunda/api/engine?x=1".parse().unwrap();
        assert_eq!(
            upstream.target_url(&uri),
            "http://camunda:8080/camunda/api/engine?x=1"
        );
    }

    #[test]
    fn test_spoofed_identity_headers_are_dropped() {
        let parts = parts(
            HttpRequest::builder()
                .uri("/camunda/app/welcome/")
                .header("x-webapp-user-id", "admin")
                .header("X-Auth-Request-User", "admin")
                .header("connection", "keep-alive")
                .header("accept", "text/html")
                .body(())
                .unwrap(),
        );
        let headers = upstream_headers(&parts, "SSO_SESSION");
        assert!(!headers.contains_key("x-webapp-user-id"));
        assert!(!headers.contains_key("x-auth-request-user"));
        assert!(!headers.contains_key("connection"));
        assert_eq!(headers["accept"], "text/html");
    }

    #[test]
    fn test_identity_headers_from_extensions() {
        let mut principal = AuthenticatedPrincipal::new("f1a2".into());
        principal.username = Some("demo".into());
        principal.groups = vec!["camunda-admin".into(), "ops".into()];

        let mut parts = parts(HttpRequest::builder().uri("/camunda/app/").body(()).unwrap());
        parts.extensions.insert(principal);
        parts.extensions.insert(ContainerAuthentication {
            user_id: "demo".into(),
            group_ids: vec!["camunda-admin".into()],
        });
        parts.extensions.insert(ClientOrigin {
            scheme: "https".into(),
            host: "bpm.example.com".into(),
            prefix: String::new(),
        });

        let headers = upstream_headers(&parts, "SSO_SESSION");
        assert_eq!(headers["x-auth-request-user"], "f1a2");
        assert_eq!(headers["x-auth-request-preferred-username"], "demo");
        assert_eq!(headers["x-auth-request-groups"], "camunda-admin,ops");
        assert!(!headers.contains_key("x-auth-request-email"));
        assert_eq!(headers["x-webapp-user-id"], "demo");
        assert_eq!(headers["x-webapp-groups"], "camunda-admin");
        assert_eq!(headers["x-forwarded-proto"], "https");
        assert_eq!(headers["x-forwarded-host"], "bpm.example.com");
        assert!(!headers.contains_key("x-forwarded-prefix"));
    }

    #[test]
    fn test_gateway_session_cookie_is_not_forwarded() {
        let parts = parts(
            HttpRequest::builder()
                .uri("/camunda/app/")
                .header("cookie", "SSO_SESSION=abc; JSESSIONID=legacy")
                .header("cookie", "SSO_SESSION=def")
                .body(())
                .unwrap(),
        );
        let headers = upstream_headers(&parts, "SSO_SESSION");
        let cookies: Vec<&str> = headers
            .get_all("cookie")
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(cookies, vec!["JSESSIONID=legacy"]);
    }
}
