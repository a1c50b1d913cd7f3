//! Filter chain assembly
//!
//! Request-processing stages are registered with an explicit integer order
//! (lower runs earlier, ties keep registration order) and applied to a router
//! as axum middleware. The security chain itself follows the fixed sequence:
//! scope check, CSRF, logout, login endpoints, authorization decision.

use axum::{
    extract::{Request, State},
    http::{HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state, Next},
    response::{IntoResponse, Response},
    Router,
};
use std::sync::Arc;

use super::container::container_authentication_filter;
use super::csrf::{self, SessionCsrfToken, CSRF_HEADER};
use super::firewall::firewall_filter;
use super::forwarded::{forwarded_headers_filter, ClientOrigin};
use super::policy::{decode_path, Decision};
use super::session::Session;
use crate::auth::handlers::{self, append_cookie};
use crate::auth::helpers::{extract_cookie, session_cookie};
use crate::error::GatewayError;
use crate::AppState;

/// Well-known stage orders
pub mod order {
    pub const FIREWALL: i32 = i32::MIN;
    pub const FORWARDED_HEADERS: i32 = i32::MIN + 1;
    pub const SECURITY_CHAIN: i32 = -100;
    /// Strictly after the security chain
    pub const CONTAINER_AUTHENTICATION: i32 = 201;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    Firewall,
    ForwardedHeaders,
    SecurityChain,
    ContainerAuthentication,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterRegistration {
    pub name: &'static str,
    pub order: i32,
    pub kind: FilterKind,
}

#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    registrations: Vec<FilterRegistration>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, name: &'static str, order: i32, kind: FilterKind) -> Self {
        self.registrations.push(FilterRegistration { name, order, kind });
        self
    }

    /// The gateway's stages
    pub fn standard() -> Self {
        Self::new()
            .register("securityChain", order::SECURITY_CHAIN, FilterKind::SecurityChain)
            .register(
                "containerAuthentication",
                order::CONTAINER_AUTHENTICATION,
                FilterKind::ContainerAuthentication,
            )
            .register("forwardedHeaders", order::FORWARDED_HEADERS, FilterKind::ForwardedHeaders)
            .register("firewall", order::FIREWALL, FilterKind::Firewall)
    }

    /// Registrations in execution order
    pub fn ordered(&self) -> Vec<&FilterRegistration> {
        let mut ordered: Vec<&FilterRegistration> = self.registrations.iter().collect();
        ordered.sort_by_key(|r| r.order);
        ordered
    }

    /// Wrap `router` so the stages run in order before it
    pub fn apply(&self, router: Router, state: Arc<AppState>) -> Router {
        // The last layer added is the outermost, so wrap from the innermost stage outwards
        self.ordered()
            .into_iter()
            .rev()
            .fold(router, |router, registration| {
                tracing::info!(
                    filter = registration.name,
                    order = registration.order,
                    "Registering filter"
                );
                match registration.kind {
                    FilterKind::Firewall => {
                        router.layer(from_fn_with_state(state.clone(), firewall_filter))
                    }
                    FilterKind::ForwardedHeaders => router.layer(from_fn(forwarded_headers_filter)),
                    FilterKind::SecurityChain => {
                        router.layer(from_fn_with_state(state.clone(), security_filter))
                    }
                    FilterKind::ContainerAuthentication => router.layer(from_fn_with_state(
                        state.clone(),
                        container_authentication_filter,
                    )),
                }
            })
    }
}

/// The security chain: everything inside the activation scope gets exactly one
/// authorization decision before reaching the application.
pub async fn security_filter(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = decode_path(request.uri().path());
    if !state.policy.scope.applies(&path) {
        return next.run(request).await;
    }

    let origin = request
        .extensions()
        .get::<ClientOrigin>()
        .cloned()
        .unwrap_or_else(|| ClientOrigin::from_headers(request.headers()));

    let session_id = extract_cookie(request.headers(), &state.config.session_cookie_name);
    let session = match session_id {
        Some(id) => state.sessions.get(&id).await,
        None => None,
    };

    // CSRF is checked before logout and login endpoints
    if csrf::requires_protection(request.method())
        && !state.policy.is_csrf_exempt(&path)
        && !csrf::verify(
            session.as_ref().map(|s| s.csrf_token.as_str()),
            request.headers(),
            request.uri().query(),
        )
    {
        tracing::warn!(
            event = "csrf_rejected",
            method = %request.method(),
            path = %path,
            has_session = session.is_some(),
            "Missing or invalid CSRF token"
        );
        return GatewayError::CsrfRejected.into_response();
    }

    if state.policy.is_logout(request.method(), &path) {
        return handlers::logout(&state, session, &origin).await;
    }

    if path == state.config.authorization_request_path() || path == "/login" {
        return handlers::authorization_request(&state, session, &origin, None)
            .await
            .unwrap_or_else(IntoResponse::into_response);
    }

    if path == state.config.redirection_path() {
        let uri = request.uri().clone();
        return handlers::callback(&state, session, &origin, &uri)
            .await
            .unwrap_or_else(IntoResponse::into_response);
    }

    let decision = state.policy.authorization.decide(&path);
    let authenticated = session.as_ref().is_some_and(Session::is_authenticated);
    tracing::debug!(path = %path, decision = ?decision, authenticated, "Authorization decision");

    if decision == Decision::RequireAuth && !authenticated {
        let is_xhr = is_xhr(&request);
        // Only GET requests are resumed after login
        let saved_request = (request.method() == Method::GET)
            .then(|| request.uri().path_and_query().map(|pq| pq.as_str().to_string()))
            .flatten();
        return authentication_entry_point(&state, session, &origin, &path, is_xhr, saved_request)
            .await;
    }

    // Anonymous callers get a session on safe requests so they can obtain a CSRF token
    let (session, is_new) = match session {
        Some(session) => (Some(session), false),
        None if !csrf::requires_protection(request.method()) => {
            (Some(state.sessions.create().await), true)
        }
        None => (None, false),
    };

    if let Some(session) = &session {
        request
            .extensions_mut()
            .insert(SessionCsrfToken(session.csrf_token.clone()));
        if let Some(principal) = &session.principal {
            request.extensions_mut().insert(principal.clone());
        }
    }

    let mut response = next.run(request).await;

    if let Some(session) = &session {
        if let Ok(token) = HeaderValue::from_str(&session.csrf_token) {
            response.headers_mut().insert(CSRF_HEADER, token);
        }
        if is_new {
            append_cookie(&mut response, &session_cookie(&state.config, &session.id));
        }
    }

    response
}

fn is_xhr(request: &Request) -> bool {
    request
        .headers()
        .get("x-requested-with")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("XMLHttpRequest"))
}

/// Unauthenticated access to a protected path: login redirect, or 401 for XHR
async fn authentication_entry_point(
    state: &AppState,
    session: Option<Session>,
    origin: &ClientOrigin,
    path: &str,
    is_xhr: bool,
    saved_request: Option<String>,
) -> Response {
    if is_xhr {
        tracing::info!(
            event = "login_required_xhr",
            path = %path,
            "Unauthenticated XHR to protected path"
        );
        return GatewayError::Unauthenticated("Login required".into()).into_response();
    }

    handlers::authorization_request(state, session, origin, saved_request)
        .await
        .unwrap_or_else(IntoResponse::into_response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_chain_order() {
        let chain = FilterChain::standard();
        let names: Vec<&str> = chain.ordered().iter().map(|r| r.name).collect();
        assert_eq!(
            names,
            vec![
                "firewall",
                "forwardedHeaders",
                "securityChain",
                "containerAuthentication"
            ]
        );
    }

    #[test]
    fn test_ties_keep_registration_order() {
        let chain = FilterChain::new()
            .register("b", 10, FilterKind::SecurityChain)
            .register("a", 10, FilterKind::Firewall)
            .register("first", 0, FilterKind::ForwardedHeaders);
        let names: Vec<&str> = chain.ordered().iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["first", "b", "a"]);
    }

    fn assert_send_stage<F, Fut>(_: F)
    where
        F: Fn(State<Arc<AppState>>, Request, Next) -> Fut,
        Fut: std::future::Future<Output = Response> + Send,
    {
    }

    #[test]
    fn test_stage_futures_are_send() {
        assert_send_stage(security_filter);
        assert_send_stage(firewall_filter);
        assert_send_stage(container_authentication_filter);
    }

    #[test]
    fn test_container_runs_after_security_chain() {
        const { assert!(order::CONTAINER_AUTHENTICATION > order::SECURITY_CHAIN) };
        const { assert!(order::FIREWALL < order::FORWARDED_HEADERS) };
    }
}
