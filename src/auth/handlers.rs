//! Authentication endpoints for the OAuth2/OIDC authorization code flow
//!
//! These run inside the security chain, which dispatches to them by path:
//! - `authorization_request`: redirect to Keycloak (also the entry point for protected paths)
//! - `callback`: state check, code exchange, ID token validation, session rotation
//! - `logout`: local session invalidation followed by Keycloak end-session

use axum::{
    extract::Query,
    http::{header::SET_COOKIE, Uri},
    response::{IntoResponse, Redirect, Response},
};
use oauth2::{
    basic::{BasicErrorResponseType, BasicTokenType},
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointSet, ExtraTokenFields,
    RedirectUrl, RequestTokenError, Scope, StandardErrorResponse, StandardRevocableToken,
    StandardTokenIntrospectionResponse, StandardTokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};

use super::helpers::{
    build_end_session_url, clear_session_cookie, header_value, is_safe_redirect_target,
    session_cookie,
};
use super::principal::AuthenticatedPrincipal;
use crate::config::Config;
use crate::error::GatewayError;
use crate::security::forwarded::ClientOrigin;
use crate::security::session::{PendingAuthorization, Session};
use crate::AppState;

// =============================================================================
// Types
// =============================================================================

/// Custom extra fields to capture id_token from OIDC response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcTokenFields {
    pub id_token: Option<String>,
}

impl ExtraTokenFields for OidcTokenFields {}

/// Type alias for our configured OAuth client with OIDC support
type ConfiguredOAuthClient = oauth2::Client<
    StandardErrorResponse<BasicErrorResponseType>,
    StandardTokenResponse<OidcTokenFields, BasicTokenType>,
    StandardTokenIntrospectionResponse<OidcTokenFields, BasicTokenType>,
    StandardRevocableToken,
    StandardErrorResponse<oauth2::RevocationErrorResponseType>,
    EndpointSet,            // HasAuthUrl
    oauth2::EndpointNotSet, // HasDeviceAuthUrl
    oauth2::EndpointNotSet, // HasIntrospectionUrl
    oauth2::EndpointNotSet, // HasRevocationUrl
    EndpointSet,            // HasTokenUrl
>;

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

// =============================================================================
// Internal Helpers
// =============================================================================

/// Build the OAuth2 client for the configured Keycloak realm
fn create_oauth_client(
    config: &Config,
    redirect_uri: &str,
) -> Result<ConfiguredOAuthClient, GatewayError> {
    // Use public URL for browser redirects
    let auth_url = AuthUrl::new(format!(
        "{}/realms/{}/protocol/openid-connect/auth",
        config.keycloak_callback_url, config.keycloak_realm
    ))
    .map_err(|e| GatewayError::Internal(format!("Invalid auth URL: {}", e)))?;

    // Use internal URL for token exchange
    let token_url = TokenUrl::new(format!(
        "{}/realms/{}/protocol/openid-connect/token",
        config.keycloak_url, config.keycloak_realm
    ))
    .map_err(|e| GatewayError::Internal(format!("Invalid token URL: {}", e)))?;

    let redirect_url = RedirectUrl::new(redirect_uri.to_string())
        .map_err(|e| GatewayError::Internal(format!("Invalid redirect URL: {}", e)))?;

    let client = oauth2::Client::new(ClientId::new(config.client_id.clone()))
        .set_client_secret(ClientSecret::new(config.client_secret.clone()))
        .set_auth_uri(auth_url)
        .set_token_uri(token_url)
        .set_redirect_uri(redirect_url);

    Ok(client)
}

/// Redirect URI registered with Keycloak: fixed by config or built from the client-facing origin
pub fn redirect_uri_for(config: &Config, origin: &ClientOrigin) -> String {
    config
        .redirect_uri
        .clone()
        .unwrap_or_else(|| format!("{}{}", origin.base_url(), config.redirection_path()))
}

/// Where Keycloak sends the browser after end-session
pub fn post_logout_redirect_uri_for(config: &Config, origin: &ClientOrigin) -> String {
    config
        .post_logout_redirect_uri
        .clone()
        .unwrap_or_else(|| format!("{}{}/", origin.base_url(), config.legacy_webapp_path))
}

/// Append a Set-Cookie header; a malformed value is logged and skipped
pub fn append_cookie(response: &mut Response, cookie: &str) {
    if let Ok(value) = header_value(cookie) {
        response.headers_mut().append(SET_COOKIE, value);
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Start the authorization code flow.
///
/// Reuses the caller's session when there is one, otherwise creates it. The
/// state, nonce and redirect URI are kept in the session until the callback;
/// `saved_request` is resumed after a successful login.
pub async fn authorization_request(
    state: &AppState,
    session: Option<Session>,
    origin: &ClientOrigin,
    saved_request: Option<String>,
) -> Result<Response, GatewayError> {
    let redirect_uri = redirect_uri_for(&state.config, origin);
    let oauth_client = create_oauth_client(&state.config, &redirect_uri)?;

    let nonce = CsrfToken::new_random().secret().clone();
    let (auth_url, csrf_token) = oauth_client
        .authorize_url(CsrfToken::new_random)
        .add_scope(Scope::new("openid".to_string()))
        .add_scope(Scope::new("profile".to_string()))
        .add_scope(Scope::new("email".to_string()))
        .add_extra_param("nonce", nonce.clone())
        .url();

    let pending = PendingAuthorization {
        state: csrf_token.secret().clone(),
        nonce,
        redirect_uri,
    };

    let existing = match session {
        Some(session) => {
            state
                .sessions
                .update(&session.id, |s| {
                    s.pending_authorization = Some(pending.clone());
                    if saved_request.is_some() {
                        s.saved_request = saved_request.clone();
                    }
                })
                .await
        }
        None => None,
    };
    let (session, is_new) = match existing {
        Some(session) => (session, false),
        None => {
            let created = state.sessions.create().await;
            let updated = state
                .sessions
                .update(&created.id, |s| {
                    s.pending_authorization = Some(pending);
                    s.saved_request = saved_request;
                })
                .await
                .ok_or_else(|| GatewayError::Internal("Session vanished after create".into()))?;
            (updated, true)
        }
    };

    tracing::info!(
        event = "login_redirect",
        keycloak_public_url = %state.config.keycloak_callback_url,
        realm = %state.config.keycloak_realm,
        new_session = is_new,
        "Redirecting to Keycloak for authentication"
    );

    let mut response = Redirect::to(auth_url.as_str()).into_response();
    if is_new {
        append_cookie(&mut response, &session_cookie(&state.config, &session.id));
    }
    Ok(response)
}

/// Handle the provider callback: validate state, exchange the code, bind the principal
pub async fn callback(
    state: &AppState,
    session: Option<Session>,
    origin: &ClientOrigin,
    uri: &Uri,
) -> Result<Response, GatewayError> {
    tracing::info!("OAuth callback received");

    let Query(params) = Query::<CallbackParams>::try_from_uri(uri)
        .map_err(|e| GatewayError::BadRequest(format!("Invalid callback query: {}", e)))?;

    // Check for OAuth errors
    if let Some(error) = params.error {
        tracing::warn!(
            error = %error,
            description = ?params.error_description,
            "OAuth authorization failed"
        );
        return Err(GatewayError::Unauthenticated(error));
    }

    let Some(session) = session else {
        tracing::warn!("Callback without a session - cookie missing or session expired");
        return Err(GatewayError::Unauthenticated(
            "No authorization request in progress".into(),
        ));
    };
    let Some(pending) = session.pending_authorization.clone() else {
        tracing::warn!("Callback for a session with no pending authorization request");
        return Err(GatewayError::Unauthenticated(
            "No authorization request in progress".into(),
        ));
    };

    // CSRF Protection: the state parameter must match the one stored in the session
    let Some(state_from_callback) = params.state else {
        tracing::warn!("CSRF validation failed: No state parameter in callback");
        return Err(GatewayError::BadRequest("Missing state parameter".into()));
    };
    if !crate::security::csrf::tokens_match(&pending.state, &state_from_callback) {
        tracing::warn!("CSRF validation failed: State mismatch (callback vs session)");
        return Err(GatewayError::Unauthenticated("State mismatch".into()));
    }

    let Some(code) = params.code else {
        tracing::warn!("No authorization code received");
        return Err(GatewayError::BadRequest("Missing authorization code".into()));
    };

    tracing::debug!(code_length = code.len(), "Authorization code received");

    let oauth_client = create_oauth_client(&state.config, &pending.redirect_uri)?;

    tracing::info!("Exchanging authorization code for tokens");
    let token_response = oauth_client
        .exchange_code(AuthorizationCode::new(code))
        .request_async(&state.http_client)
        .await
        .map_err(|e| match e {
            RequestTokenError::ServerResponse(response) => {
                tracing::warn!(
                    error = %response.error(),
                    description = ?response.error_description(),
                    "Token endpoint rejected the authorization code"
                );
                GatewayError::Unauthenticated(response.error().to_string())
            }
            RequestTokenError::Request(e) => {
                tracing::error!(error = %e, "Token endpoint unreachable");
                GatewayError::BadGateway(e.to_string())
            }
            RequestTokenError::Parse(e, _) => {
                tracing::error!(error = %e, "Unparseable token response");
                GatewayError::BadGateway(e.to_string())
            }
            RequestTokenError::Other(e) => {
                tracing::error!(error = %e, "Token exchange failed");
                GatewayError::BadGateway(e)
            }
        })?;

    let Some(id_token) = token_response.extra_fields().id_token.clone() else {
        tracing::error!("Token response has no id_token - is the openid scope granted?");
        return Err(GatewayError::Unauthenticated("Missing ID token".into()));
    };

    let claims = state
        .jwt_validator
        .validate_id_token(&id_token, &pending.nonce)
        .await
        .map_err(|e| {
            if e.chain().any(|cause| cause.is::<reqwest::Error>()) {
                tracing::error!(error = %e, "JWKS endpoint unreachable");
                GatewayError::BadGateway(e.to_string())
            } else {
                GatewayError::Unauthenticated(format!("Invalid ID token: {}", e))
            }
        })?;

    if claims.roles().is_empty() {
        tracing::warn!(
            user = %claims.sub,
            has_realm_access = claims.has_realm_access(),
            "ID token has no realm roles - user will have no groups. \
             Check Keycloak client scope configuration for realm_access.roles mapper."
        );
    }

    let principal = AuthenticatedPrincipal::from_claims(&claims);
    let session = state
        .sessions
        .authenticate(&session.id, principal, Some(id_token))
        .await
        .ok_or_else(|| GatewayError::Unauthenticated("Session expired during login".into()))?;

    let target = session
        .saved_request
        .clone()
        .filter(|t| is_safe_redirect_target(t))
        .unwrap_or_else(|| format!("{}/", state.config.legacy_webapp_path));
    let location = format!("{}{}", origin.prefix, target);

    tracing::info!(
        event = "login_success",
        sub = ?session.principal.as_ref().map(|p| p.subject.as_str()),
        redirect_to = %location,
        "Authentication successful"
    );

    let mut response = Redirect::to(&location).into_response();
    append_cookie(&mut response, &session_cookie(&state.config, &session.id));
    Ok(response)
}

/// Logout: invalidate the local session, then end the Keycloak session.
///
/// Anonymous callers get a plain redirect to the post-logout URI.
pub async fn logout(state: &AppState, session: Option<Session>, origin: &ClientOrigin) -> Response {
    let post_logout_uri = post_logout_redirect_uri_for(&state.config, origin);

    let authenticated = match session {
        Some(session) if session.is_authenticated() => Some(session),
        _ => None,
    };

    let Some(session) = authenticated else {
        tracing::info!(
            event = "logout_anonymous",
            "Logout requested without an authenticated session"
        );
        return Redirect::to(&post_logout_uri).into_response();
    };

    let invalidated = state.sessions.invalidate(&session.id).await;
    let id_token = invalidated.as_ref().and_then(|s| s.id_token.clone());

    tracing::info!(
        event = "logout_session_invalidated",
        sub = ?session.principal.as_ref().map(|p| p.subject.as_str()),
        "Local session invalidated"
    );

    let end_session_url = build_end_session_url(
        &state.config.keycloak_callback_url,
        &state.config.keycloak_realm,
        &post_logout_uri,
        &state.config.client_id,
        id_token.as_deref(),
    );

    // Security: Do not log the full URL as it may contain id_token_hint (JWT)
    tracing::info!(
        event = "keycloak_logout_redirect",
        has_id_token = id_token.is_some(),
        keycloak_realm = %state.config.keycloak_realm,
        "Redirecting to Keycloak end-session"
    );

    let mut response = Redirect::to(&end_session_url).into_response();
    append_cookie(&mut response, &clear_session_cookie(&state.config));
    response
}
