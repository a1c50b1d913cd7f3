//! Container-based authentication stage
//!
//! Runs after the security chain for `<root>/app/*` only. It reads the principal
//! the chain already established and maps it, through an
//! [`AuthenticationProvider`], to the user/group identity the legacy
//! application expects from a container-managed login. It never allows or
//! denies anything itself.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::auth::principal::AuthenticatedPrincipal;
use crate::security::policy::decode_path;
use crate::AppState;

/// Identity handed to the legacy application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerAuthentication {
    pub user_id: String,
    pub group_ids: Vec<String>,
}

/// Maps an authenticated principal to the legacy application's identity
pub trait AuthenticationProvider: Send + Sync {
    /// `None` means the principal carries no usable user id
    fn extract(&self, principal: &AuthenticatedPrincipal) -> Option<ContainerAuthentication>;
}

/// Default provider: user id from a configurable claim, groups from realm roles
#[derive(Debug, Clone)]
pub struct ClaimsAuthenticationProvider {
    user_id_claim: String,
}

impl ClaimsAuthenticationProvider {
    pub fn new(user_id_claim: impl Into<String>) -> Self {
        Self {
            user_id_claim: user_id_claim.into(),
        }
    }
}

impl AuthenticationProvider for ClaimsAuthenticationProvider {
    fn extract(&self, principal: &AuthenticatedPrincipal) -> Option<ContainerAuthentication> {
        let user_id = principal
            .claim_str(&self.user_id_claim)
            .filter(|v| !v.is_empty())
            .unwrap_or(&principal.subject);
        if user_id.is_empty() {
            return None;
        }
        Some(ContainerAuthentication {
            user_id: user_id.to_string(),
            group_ids: principal.groups.clone(),
        })
    }
}

/// Container authentication stage
pub async fn container_authentication_filter(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = decode_path(request.uri().path());
    if !state.policy.in_container_scope(&path) {
        return next.run(request).await;
    }

    let authentication = request
        .extensions()
        .get::<AuthenticatedPrincipal>()
        .and_then(|principal| state.authentication_provider.extract(principal));

    match authentication {
        Some(authentication) => {
            tracing::debug!(
                user_id = %authentication.user_id,
                groups = authentication.group_ids.len(),
                "Container authentication established"
            );
            request.extensions_mut().insert(authentication);
        }
        None => {
            tracing::debug!("No container authentication for request");
        }
    }

    next.run(request).await
}
