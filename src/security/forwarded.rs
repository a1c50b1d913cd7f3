//! Forwarded header normalization
//!
//! A TLS-terminating proxy forwards plain HTTP; without this stage the login
//! redirect URI would be built as `http://`. The client-facing origin is
//! resolved from `Forwarded` (RFC 7239) or the `X-Forwarded-*` family, stored as
//! a [`ClientOrigin`] request extension, and the forwarded headers are removed.

use axum::{
    extract::Request,
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};

const FORWARDED: &str = "forwarded";
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";
const X_FORWARDED_HOST: &str = "x-forwarded-host";
const X_FORWARDED_PORT: &str = "x-forwarded-port";
const X_FORWARDED_PREFIX: &str = "x-forwarded-prefix";
const X_FORWARDED_SSL: &str = "x-forwarded-ssl";

/// Scheme, host and path prefix as seen by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOrigin {
    pub scheme: String,
    /// Host, including a port when it is not the scheme default
    pub host: String,
    /// Path prefix added by the proxy (no trailing slash), empty if none
    pub prefix: String,
}

impl ClientOrigin {
    /// `{scheme}://{host}{prefix}`
    pub fn base_url(&self) -> String {
        format!("{}://{}{}", self.scheme, self.host, self.prefix)
    }

    /// Resolve the origin from request headers
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let host_header = header_str(headers, header::HOST.as_str())
            .unwrap_or("localhost")
            .to_string();

        let (mut scheme, mut host) = match parse_forwarded(headers) {
            Some((proto, fwd_host)) => (proto, fwd_host),
            None => (None, None),
        };

        if scheme.is_none() {
            scheme = first_value(headers, X_FORWARDED_PROTO).map(|s| s.to_ascii_lowercase());
        }
        if scheme.is_none() && first_value(headers, X_FORWARDED_SSL).as_deref() == Some("on") {
            scheme = Some("https".to_string());
        }
        if host.is_none() {
            host = first_value(headers, X_FORWARDED_HOST);
        }

        let scheme = scheme.unwrap_or_else(|| "http".to_string());
        let mut host = host.unwrap_or(host_header);

        if let Some(port) = first_value(headers, X_FORWARDED_PORT) {
            host = with_port(&host, &port, &scheme);
        } else {
            host = strip_default_port(&host, &scheme);
        }

        let prefix = first_value(headers, X_FORWARDED_PREFIX)
            .map(|p| p.trim_end_matches('/').to_string())
            .filter(|p| p.starts_with('/'))
            .unwrap_or_default();

        Self {
            scheme,
            host,
            prefix,
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// First comma-separated value of a header (the hop closest to the client)
fn first_value(headers: &HeaderMap, name: &str) -> Option<String> {
    header_str(headers, name)
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// `proto` and `host` from the first element of an RFC 7239 `Forwarded` header
fn parse_forwarded(headers: &HeaderMap) -> Option<(Option<String>, Option<String>)> {
    let first_element = header_str(headers, FORWARDED)?.split(',').next()?;
    let mut proto = None;
    let mut host = None;
    for pair in first_element.split(';') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"');
        match key.trim().to_ascii_lowercase().as_str() {
            "proto" => proto = Some(value.to_ascii_lowercase()),
            "host" => host = Some(value.to_string()),
            _ => {}
        }
    }
    Some((proto, host))
}

fn default_port(scheme: &str) -> &'static str {
    if scheme == "https" {
        "443"
    } else {
        "80"
    }
}

fn split_host_port(host: &str) -> (&str, Option<&str>) {
    // Bracketed IPv6 literal: [::1]:8443
    if let Some(end) = host.find(']') {
        let (name, rest) = host.split_at(end + 1);
        return (name, rest.strip_prefix(':'));
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => (name, Some(port)),
        _ => (host, None),
    }
}

fn with_port(host: &str, port: &str, scheme: &str) -> String {
    let (name, _) = split_host_port(host);
    if port == default_port(scheme) {
        name.to_string()
    } else {
        format!("{}:{}", name, port)
    }
}

fn strip_default_port(host: &str, scheme: &str) -> String {
    match split_host_port(host) {
        (name, Some(port)) if port == default_port(scheme) => name.to_string(),
        _ => host.to_string(),
    }
}

/// Header normalization stage
pub async fn forwarded_headers_filter(mut request: Request, next: Next) -> Response {
    let origin = ClientOrigin::from_headers(request.headers());

    let headers = request.headers_mut();
    for name in [
        FORWARDED,
        X_FORWARDED_PROTO,
        X_FORWARDED_HOST,
        X_FORWARDED_PORT,
        X_FORWARDED_PREFIX,
        X_FORWARDED_SSL,
    ] {
        headers.remove(name);
    }
    if let Ok(host) = HeaderValue::from_str(&origin.host) {
        headers.insert(header::HOST, host);
    }

    tracing::debug!(
        scheme = %origin.scheme,
        host = %origin.host,
        prefix = %origin.prefix,
        "Resolved client-facing origin"
    );

    request.extensions_mut().insert(origin);
    next.run(request).await
}
