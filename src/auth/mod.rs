//! Authentication module
//!
//! OAuth2/OIDC login against Keycloak for the gateway.
//!
//! ## Structure
//!
//! - `extractors`: Axum extractor for the authenticated user
//! - `jwt`: ID token validation with JWKS caching
//! - `helpers`: Pure helper functions (URL builders, cookies, HTTP clients)
//! - `handlers`: Authorization request, callback and logout
//! - `principal`: The identity bound to a session
//!
//! ## Authentication Flow
//!
//! 1. Browser hits a protected path without a session → redirect to Keycloak
//! 2. Keycloak authenticates → redirect to `/login/oauth2/code/{registration}`
//! 3. Gateway exchanges the code, validates the ID token, rotates the session → resumes the saved request
//! 4. Browser hits `<root>/app/**/logout` → session invalidated → Keycloak end-session

pub mod extractors;
pub mod handlers;
pub mod helpers;
pub mod jwt;
pub mod principal;

pub use extractors::AuthenticatedUser;
pub use handlers::{authorization_request, callback, logout, CallbackParams};
pub use helpers::{build_end_session_url, extract_cookie};
pub use principal::AuthenticatedPrincipal;
