use crate::auth::principal::AuthenticatedPrincipal;
use crate::error::GatewayError;
use crate::security::container::ContainerAuthentication;
use axum::{extract::FromRequestParts, http::request::Parts};

/// Authenticated user extractor for application handlers behind the gateway
///
/// Reads the principal the security chain attached to the request. It fails
/// with 401 when the request was not authenticated (public path, anonymous
/// session).
///
/// Usage:
/// ```rust,ignore
/// async fn handler(AuthenticatedUser { principal, container }: AuthenticatedUser) {
///     println!("User: {}, Groups: {:?}", principal.name(), principal.groups);
/// }
/// ```
pub struct AuthenticatedUser {
    pub principal: AuthenticatedPrincipal,
    /// Present for requests under `<root>/app/*`
    pub container: Option<ContainerAuthentication>,
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = GatewayError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let principal = parts
            .extensions
            .get::<AuthenticatedPrincipal>()
            .cloned()
            .ok_or_else(|| GatewayError::Unauthenticated("No authenticated principal".into()))?;

        let container = parts.extensions.get::<ContainerAuthentication>().cloned();

        tracing::debug!(
            user = %principal.subject,
            container_user = ?container.as_ref().map(|c| c.user_id.as_str()),
            "User resolved from request extensions"
        );

        Ok(AuthenticatedUser {
            principal,
            container,
        })
    }
}
