//! Request-processing stages in front of the legacy application
//!
//! - `firewall`: rejects malformed or ambiguous requests
//! - `forwarded`: normalizes proxy headers into a [`forwarded::ClientOrigin`]
//! - `chain`: stage ordering and the security chain (CSRF, login, logout, authorization)
//! - `container`: maps the principal to the legacy application's identity
//! - `policy`, `matcher`: activation scope and path rules
//! - `session`, `csrf`: server-side sessions and synchronizer tokens

pub mod chain;
pub mod container;
pub mod csrf;
pub mod firewall;
pub mod forwarded;
pub mod matcher;
pub mod policy;
pub mod session;

pub use chain::{FilterChain, FilterKind, FilterRegistration};
pub use policy::{Decision, SecurityPolicy};
