use std::time::SystemTime;

use super::jwt::Claims;

/// Identity established by a successful login, valid for the session lifetime
#[derive(Debug, Clone)]
pub struct AuthenticatedPrincipal {
    pub subject: String,
    pub username: Option<String>,
    pub email: Option<String>,
    /// Realm roles, used as group ids by the container stage
    pub groups: Vec<String>,
    /// Every claim of the validated ID token
    pub claims: serde_json::Map<String, serde_json::Value>,
    pub authenticated_at: SystemTime,
}

impl AuthenticatedPrincipal {
    pub fn new(subject: String) -> Self {
        Self {
            subject,
            username: None,
            email: None,
            groups: Vec::new(),
            claims: serde_json::Map::new(),
            authenticated_at: SystemTime::now(),
        }
    }

    pub fn from_claims(claims: &Claims) -> Self {
        let all_claims = match serde_json::to_value(claims) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        Self {
            subject: claims.sub.clone(),
            username: claims.preferred_username.clone(),
            email: claims.email.clone(),
            groups: claims.roles(),
            claims: all_claims,
            authenticated_at: SystemTime::now(),
        }
    }

    /// Display name: preferred username, falling back to the subject
    pub fn name(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.subject)
    }

    /// String value of a claim
    pub fn claim_str(&self, name: &str) -> Option<&str> {
        self.claims.get(name).and_then(|v| v.as_str())
    }
}
