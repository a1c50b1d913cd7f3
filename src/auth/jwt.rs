use anyhow::{Context, Result};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

// Helper struct for deserializing Keycloak's realm_access structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RealmAccess {
    pub(crate) roles: Vec<String>,
}

/// ID token claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) realm_access: Option<RealmAccess>,
    /// Any other claim (iss, aud, name, groups, custom mappers...)
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Claims {
    /// Realm roles from realm_access.roles
    pub fn roles(&self) -> Vec<String> {
        self.realm_access
            .as_ref()
            .map(|ra| ra.roles.clone())
            .unwrap_or_default()
    }

    /// Check if the token has realm_access claim at all
    /// Used for diagnostic logging when roles are empty
    pub fn has_realm_access(&self) -> bool {
        self.realm_access.is_some()
    }
}

#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kid: String,
    #[serde(default)]
    kty: Option<String>,
    #[serde(rename = "use", default)]
    key_use: Option<String>,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

struct JwksCache {
    keys: HashMap<String, DecodingKey>,
    fetched_at: Instant,
}

/// Validates Keycloak-issued ID tokens (RS256, keys from the realm JWKS)
pub struct JwtValidator {
    jwks_url: String,
    /// Expected issuer URL (Keycloak public URL + realm path)
    expected_issuer: String,
    /// Expected audience (the client_id)
    expected_audience: String,
    client: reqwest::Client,
    jwks_cache: RwLock<Option<JwksCache>>,
    cache_ttl: Duration,
}

impl JwtValidator {
    /// # Arguments
    /// * `keycloak_internal_url` - Internal URL for JWKS fetching (container-to-container)
    /// * `expected_issuer` - Public realm URL the tokens are issued by
    /// * `realm` - Keycloak realm name
    /// * `expected_audience` - Expected audience claim (client_id)
    /// * `client` - HTTP client carrying the provider timeouts
    /// * `jwks_cache_ttl_secs` - JWKS cache TTL
    pub fn new(
        keycloak_internal_url: &str,
        expected_issuer: String,
        realm: &str,
        expected_audience: String,
        client: reqwest::Client,
        jwks_cache_ttl_secs: u64,
    ) -> Self {
        let jwks_url = format!(
            "{}/realms/{}/protocol/openid-connect/certs",
            keycloak_internal_url.trim_end_matches('/'),
            realm
        );

        tracing::info!(
            jwks_url = %jwks_url,
            expected_issuer = %expected_issuer,
            expected_audience = %expected_audience,
            jwks_cache_ttl_secs = jwks_cache_ttl_secs,
            "ID token validator initialized"
        );

        Self {
            jwks_url,
            expected_issuer,
            expected_audience,
            client,
            jwks_cache: RwLock::new(None),
            cache_ttl: Duration::from_secs(jwks_cache_ttl_secs),
        }
    }

    /// Validate an ID token from the token response and check its nonce
    pub async fn validate_id_token(&self, token: &str, expected_nonce: &str) -> Result<Claims> {
        let claims = self.validate_async(token).await?;
        match claims.nonce.as_deref() {
            Some(nonce) if crate::security::csrf::tokens_match(expected_nonce, nonce) => Ok(claims),
            Some(_) => {
                tracing::error!(sub = %claims.sub, "ID token nonce mismatch - possible replay");
                anyhow::bail!("ID token nonce mismatch")
            }
            None => anyhow::bail!("ID token has no nonce"),
        }
    }

    /// Validate JWT signature, expiry, issuer and audience (fetches JWKS if needed)
    pub async fn validate_async(&self, token: &str) -> Result<Claims> {
        tracing::debug!(token_len = token.len(), "Validating JWT token (async)");

        let header = decode_header(token).context("Invalid token header")?;
        let kid = header.kid.clone().context("Token missing kid")?;

        // Try to get key from cache first
        let decoding_key = match self.get_cached_key(&kid).await? {
            Some(key) => key,
            None => {
                // Key not found in cache - the realm may have rotated keys
                tracing::warn!(
                    kid = %kid,
                    "Key ID not found in cache, forcing JWKS refresh"
                );
                self.refresh_jwks().await?;

                match self.get_cached_key(&kid).await? {
                    Some(key) => key,
                    None => {
                        tracing::error!(
                            kid = %kid,
                            "Unknown key ID - kid not found in JWKS even after refresh"
                        );
                        anyhow::bail!("Unknown key ID: {}", kid);
                    }
                }
            }
        };

        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = true;
        validation.set_issuer(&[&self.expected_issuer]);
        validation.set_audience(&[&self.expected_audience]);

        let token_data = match decode::<Claims>(token, &decoding_key, &validation) {
            Ok(data) => data,
            Err(e) => {
                // Security audit logging - fingerprint only, never the token
                let token_hash = format!("{:x}", md5::compute(token));
                tracing::error!(
                    error = ?e,
                    kid = %kid,
                    alg = ?header.alg,
                    token_hash = %token_hash,
                    token_len = token.len(),
                    "JWT decode/validation failed - potential security incident"
                );
                anyhow::bail!("Token validation failed: {}", e);
            }
        };

        tracing::info!(
            sub = %token_data.claims.sub,
            username = ?token_data.claims.preferred_username,
            roles = ?token_data.claims.roles(),
            "Token validated successfully"
        );

        Ok(token_data.claims)
    }

    /// Check if JWKS is cached (for readiness checks)
    pub async fn is_jwks_cached(&self) -> bool {
        self.jwks_cache.read().await.is_some()
    }

    /// Prefetch JWKS at startup so readiness passes immediately
    pub async fn prefetch_jwks(&self) -> Result<()> {
        tracing::info!("Prefetching JWKS at startup for readiness");
        self.refresh_jwks().await
    }

    /// Get cached key if available and not expired
    async fn get_cached_key(&self, kid: &str) -> Result<Option<DecodingKey>> {
        {
            let cache = self.jwks_cache.read().await;
            if let Some(jwks_cache) = cache.as_ref() {
                if jwks_cache.fetched_at.elapsed() < self.cache_ttl {
                    return Ok(jwks_cache.keys.get(kid).cloned());
                }
                tracing::info!(
                    elapsed_secs = jwks_cache.fetched_at.elapsed().as_secs(),
                    ttl_secs = self.cache_ttl.as_secs(),
                    "JWKS cache expired, will refresh"
                );
            }
        } // Lock is dropped here

        self.refresh_jwks().await?;

        let cache = self.jwks_cache.read().await;
        Ok(cache.as_ref().and_then(|c| c.keys.get(kid).cloned()))
    }

    /// Refresh JWKS cache from Keycloak
    async fn refresh_jwks(&self) -> Result<()> {
        tracing::info!(url = %self.jwks_url, "Fetching JWKS from Keycloak");

        let response: JwksResponse = self
            .client
            .get(&self.jwks_url)
            .send()
            .await
            .context("Failed to fetch JWKS")?
            .error_for_status()
            .context("JWKS endpoint returned an error status")?
            .json()
            .await
            .context("Failed to parse JWKS")?;

        let keys = decoding_keys(response)?;
        tracing::info!(key_count = keys.len(), "JWKS fetched successfully");

        let mut cache = self.jwks_cache.write().await;
        *cache = Some(JwksCache {
            keys,
            fetched_at: Instant::now(),
        });

        Ok(())
    }
}

/// RSA signing keys by kid; encryption keys and other key types are skipped
fn decoding_keys(response: JwksResponse) -> Result<HashMap<String, DecodingKey>> {
    let mut keys = HashMap::new();
    for jwk in response.keys {
        let is_rsa = jwk.kty.as_deref().is_none_or(|kty| kty == "RSA");
        let is_signing = jwk.key_use.as_deref().is_none_or(|u| u == "sig");
        let (Some(n), Some(e)) = (jwk.n.as_deref(), jwk.e.as_deref()) else {
            continue;
        };
        if !is_rsa || !is_signing {
            tracing::debug!(kid = %jwk.kid, "Skipping non-signing JWK");
            continue;
        }
        let key = DecodingKey::from_rsa_components(n, e)
            .context("Failed to create decoding key")?;
        tracing::debug!(kid = %jwk.kid, "Added key to cache");
        keys.insert(jwk.kid, key);
    }
    Ok(keys)
}
