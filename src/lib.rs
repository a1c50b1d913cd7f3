//! Access-control gateway for a legacy web application
//!
//! Puts Keycloak single sign-on, CSRF protection, a strict request firewall
//! and container-style authentication in front of an application mounted
//! under a configurable root path.

#![deny(dead_code)]

pub mod auth;
pub mod config;
pub mod error;
pub mod security;
pub mod web;

use auth::helpers::create_http_client;
use auth::jwt::JwtValidator;
use config::Config;
use security::container::{AuthenticationProvider, ClaimsAuthenticationProvider};
use security::firewall::StrictFirewall;
use security::session::SessionStore;
use security::SecurityPolicy;
use std::sync::Arc;
use std::time::Duration;
use web::proxy::Upstream;

pub struct AppState {
    pub config: Arc<Config>,
    pub policy: SecurityPolicy,
    pub firewall: StrictFirewall,
    pub sessions: SessionStore,
    pub jwt_validator: Arc<JwtValidator>,
    /// Client for Keycloak requests (token exchange, JWKS)
    pub http_client: reqwest::Client,
    pub authentication_provider: Arc<dyn AuthenticationProvider>,
    /// Legacy application to forward to; `None` when it runs in-process
    pub upstream: Option<Upstream>,
}

impl AppState {
    /// Build the gateway state from configuration
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let http_client =
            create_http_client(config.http_connect_timeout_secs, config.http_request_timeout_secs)
                .map_err(|e| anyhow::anyhow!("Failed to build identity provider client: {}", e))?;

        let jwt_validator = Arc::new(JwtValidator::new(
            &config.keycloak_url,
            config.issuer(),
            &config.keycloak_realm,
            config.client_id.clone(),
            http_client.clone(),
            config.jwks_cache_ttl_secs,
        ));

        let upstream = match &config.upstream_url {
            Some(url) => {
                let client = create_http_client(
                    config.http_connect_timeout_secs,
                    config.http_request_timeout_secs,
                )
                .map_err(|e| anyhow::anyhow!("Failed to build upstream client: {}", e))?;
                Some(Upstream::new(
                    url.clone(),
                    client,
                    config.session_cookie_name.clone(),
                ))
            }
            None => None,
        };

        Ok(Self {
            policy: SecurityPolicy::for_legacy_root(&config.legacy_webapp_path),
            firewall: StrictFirewall::new(
                config.firewall_allow_encoded_slash,
                config.firewall_allow_encoded_percent,
            ),
            sessions: SessionStore::new(Duration::from_secs(config.session_idle_timeout_secs)),
            authentication_provider: Arc::new(ClaimsAuthenticationProvider::new(
                config.user_id_claim.clone(),
            )),
            jwt_validator,
            http_client,
            upstream,
            config: Arc::new(config),
        })
    }
}
