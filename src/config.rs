use std::env;

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Development,
    Production,
}

/// Path under which the legacy web application is served when nothing is configured
pub const DEFAULT_LEGACY_WEBAPP_PATH: &str = "/camunda";

#[derive(Debug, Clone)]
pub struct Config {
    // Environment configuration
    pub environment: Environment,

    // Server configuration
    pub server_host: String,
    pub server_port: u16,

    // Base path of the protected legacy application (e.g. /camunda), no trailing slash
    pub legacy_webapp_path: String,

    // Keycloak configuration
    pub keycloak_url: String, // Internal URL for server-to-server (http://keycloak:8080)
    pub keycloak_callback_url: String, // Public URL for browser redirects (http://keycloak.localhost)
    pub keycloak_realm: String,
    pub client_id: String,
    pub client_secret: String,

    // OAuth2 client registration name, used in /oauth2/authorization/{id} and /login/oauth2/code/{id}
    pub registration_id: String,

    // Fixed redirect URI; None = derived from the client-facing origin of each request
    pub redirect_uri: Option<String>,

    // Where the identity provider sends the browser after end-session; None = derived
    pub post_logout_redirect_uri: Option<String>,

    // Legacy application the gateway forwards to; None = no upstream (404 fallback)
    pub upstream_url: Option<String>,

    // Cookie configuration (None = host-only cookie, Some = domain cookie)
    pub cookie_domain: Option<String>,
    pub session_cookie_name: String,
    pub session_idle_timeout_secs: u64,

    // HTTP client timeout configuration (in seconds)
    pub http_connect_timeout_secs: u64,
    pub http_request_timeout_secs: u64,

    // JWKS cache configuration (in seconds)
    pub jwks_cache_ttl_secs: u64,

    // Firewall relaxations needed for encoded path segments (nested group ids)
    pub firewall_allow_encoded_slash: bool,
    pub firewall_allow_encoded_percent: bool,

    // ID token claim used as the container user id
    pub user_id_claim: String,
}

impl Config {
    /// Load configuration from environment variables using std::env::var
    pub fn load() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup (environment, map in tests)
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| anyhow::anyhow!("{} environment variable is required", key))
        };
        let optional = |key: &str| lookup(key).filter(|s| !s.is_empty());
        let number = |key: &str, default: u64| {
            lookup(key)
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(default)
        };
        let flag = |key: &str, default: bool| match lookup(key).as_deref().map(str::trim) {
            Some("true") | Some("1") | Some("yes") => true,
            Some("false") | Some("0") | Some("no") => false,
            _ => default,
        };

        // Parse environment type
        let environment = match lookup("ENVIRONMENT")
            .unwrap_or_else(|| "development".to_string())
            .to_lowercase()
            .as_str()
        {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        };

        // Required variables
        let keycloak_url = required("KEYCLOAK_URL")?;
        let keycloak_callback_url = required("KEYCLOAK_CALLBACK_URL")?;
        let keycloak_realm = required("KEYCLOAK_REALM")?;
        let client_id = required("CLIENT_ID")?;
        let client_secret = required("CLIENT_SECRET")?;

        let legacy_webapp_path = normalize_base_path(
            &optional("LEGACY_WEBAPP_PATH")
                .unwrap_or_else(|| DEFAULT_LEGACY_WEBAPP_PATH.to_string()),
        )?;

        let registration_id =
            optional("REGISTRATION_ID").unwrap_or_else(|| "keycloak".to_string());
        if registration_id.contains('/') {
            anyhow::bail!("REGISTRATION_ID must not contain '/'");
        }

        // Optional variables with defaults
        let server_host = optional("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string());

        let server_port = lookup("SERVER_PORT")
            .and_then(|s| s.parse::<u16>().ok())
            .unwrap_or(3000);

        let upstream_url = optional("UPSTREAM_URL")
            .map(|u| u.trim_end_matches('/').to_string());
        if let Some(upstream) = &upstream_url {
            url::Url::parse(upstream)
                .map_err(|e| anyhow::anyhow!("UPSTREAM_URL is not a valid URL: {}", e))?;
        }

        Ok(Config {
            environment,
            server_host,
            server_port,
            legacy_webapp_path,
            keycloak_url: keycloak_url.trim_end_matches('/').to_string(),
            keycloak_callback_url: keycloak_callback_url.trim_end_matches('/').to_string(),
            keycloak_realm,
            client_id,
            client_secret,
            registration_id,
            redirect_uri: optional("REDIRECT_URI"),
            post_logout_redirect_uri: optional("POST_LOGOUT_REDIRECT_URI"),
            upstream_url,
            // Cookie domain: if not set or empty, use host-only cookies (no Domain attribute)
            cookie_domain: optional("COOKIE_DOMAIN"),
            session_cookie_name: optional("SESSION_COOKIE_NAME")
                .unwrap_or_else(|| "SSO_SESSION".to_string()),
            session_idle_timeout_secs: number("SESSION_IDLE_TIMEOUT_SECS", 1800),
            http_connect_timeout_secs: number("HTTP_CONNECT_TIMEOUT_SECS", 10),
            http_request_timeout_secs: number("HTTP_REQUEST_TIMEOUT_SECS", 30),
            jwks_cache_ttl_secs: number("JWKS_CACHE_TTL_SECS", 3600),
            firewall_allow_encoded_slash: flag("FIREWALL_ALLOW_ENCODED_SLASH", true),
            firewall_allow_encoded_percent: flag("FIREWALL_ALLOW_ENCODED_PERCENT", true),
            user_id_claim: optional("USER_ID_CLAIM")
                .unwrap_or_else(|| "preferred_username".to_string()),
        })
    }

    /// Check if running in production mode
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Get cookie security flags based on environment
    pub fn cookie_secure_flag(&self) -> &str {
        if self.is_production() {
            "; Secure"
        } else {
            ""
        }
    }

    /// Get cookie domain attribute string (empty if host-only cookie)
    pub fn cookie_domain_attr(&self) -> String {
        match &self.cookie_domain {
            Some(domain) => format!("; Domain={}", domain),
            None => String::new(),
        }
    }

    /// Get bind address for server
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    /// Expected ID token issuer: {keycloak_public_url}/realms/{realm}
    pub fn issuer(&self) -> String {
        format!("{}/realms/{}", self.keycloak_callback_url, self.keycloak_realm)
    }

    /// Path that starts the authorization code flow for this registration
    pub fn authorization_request_path(&self) -> String {
        format!(
            "{}/{}",
            crate::security::policy::AUTHORIZATION_REQUEST_BASE_URI,
            self.registration_id
        )
    }

    /// Path the identity provider redirects back to with the authorization code
    pub fn redirection_path(&self) -> String {
        format!("/login/oauth2/code/{}", self.registration_id)
    }
}

/// Normalize a base path: leading slash, no trailing slash, "/" collapses to ""
fn normalize_base_path(raw: &str) -> anyhow::Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Ok(String::new());
    }
    if !trimmed.starts_with('/') {
        anyhow::bail!("LEGACY_WEBAPP_PATH must start with '/': {}", raw);
    }
    if trimmed.contains(['*', '?', ' ']) {
        anyhow::bail!("LEGACY_WEBAPP_PATH must be a plain path: {}", raw);
    }
    Ok(trimmed.to_string())
}
