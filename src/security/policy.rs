//! Request matching policy: activation scope, authorization rules, CSRF exemptions
//! and the logout matcher, all built from the legacy application's base path.

use axum::http::Method;

use super::matcher::AntPattern;

/// Base URI of the endpoint that starts the authorization code flow
pub const AUTHORIZATION_REQUEST_BASE_URI: &str = "/oauth2/authorization";

/// Authorization decision for a request inside the activation scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    RequireAuth,
    Public,
}

/// Prefixes that make the gateway responsible for a request.
///
/// Plain string prefixes, so `/login` also covers `/login/oauth2/code/...`.
#[derive(Debug, Clone)]
pub struct ActivationScope {
    prefixes: Vec<String>,
}

impl ActivationScope {
    pub fn new(legacy_root: &str) -> Self {
        let mut prefixes = Vec::with_capacity(4);
        if !legacy_root.is_empty() {
            prefixes.push(legacy_root.to_string());
        } else {
            // Application served at the root: everything is in scope
            prefixes.push("/".to_string());
        }
        prefixes.push(AUTHORIZATION_REQUEST_BASE_URI.to_string());
        prefixes.push("/login".to_string());
        prefixes.push("/logout".to_string());
        Self { prefixes }
    }

    pub fn applies(&self, path: &str) -> bool {
        self.prefixes.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }
}

/// Ordered (pattern, decision) rules evaluated top-down, first match wins
#[derive(Debug, Clone)]
pub struct AuthorizationPolicy {
    rules: Vec<(AntPattern, Decision)>,
    fallback: Decision,
}

impl AuthorizationPolicy {
    pub fn new(fallback: Decision) -> Self {
        Self {
            rules: Vec::new(),
            fallback,
        }
    }

    pub fn rule(mut self, pattern: impl Into<String>, decision: Decision) -> Self {
        self.rules.push((AntPattern::new(pattern), decision));
        self
    }

    /// Protected legacy application resources; everything else is public
    pub fn for_legacy_root(legacy_root: &str) -> Self {
        ["assets", "app", "api", "lib"]
            .iter()
            .fold(Self::new(Decision::Public), |policy, dir| {
                policy.rule(format!("{}/{}/**", legacy_root, dir), Decision::RequireAuth)
            })
    }

    pub fn decide(&self, path: &str) -> Decision {
        self.rules
            .iter()
            .find(|(pattern, _)| pattern.matches(path))
            .map(|(_, decision)| *decision)
            .unwrap_or(self.fallback)
    }
}

/// Logout trigger: a path pattern, optionally limited to one method
#[derive(Debug, Clone)]
pub struct LogoutMatcher {
    pattern: AntPattern,
    method: Option<Method>,
}

impl LogoutMatcher {
    pub fn new(pattern: impl Into<String>, method: Option<Method>) -> Self {
        Self {
            pattern: AntPattern::new(pattern),
            method,
        }
    }

    pub fn matches(&self, method: &Method, path: &str) -> bool {
        self.method.as_ref().is_none_or(|m| m == method) && self.pattern.matches(path)
    }
}

/// Everything the security chain matches on, assembled once at startup
#[derive(Debug, Clone)]
pub struct SecurityPolicy {
    pub scope: ActivationScope,
    pub authorization: AuthorizationPolicy,
    pub csrf_exemptions: Vec<AntPattern>,
    pub logout_matchers: Vec<LogoutMatcher>,
    /// Servlet-style `/app/*` scope of the container authentication stage
    pub container_prefix: String,
}

impl SecurityPolicy {
    pub fn for_legacy_root(legacy_root: &str) -> Self {
        Self {
            scope: ActivationScope::new(legacy_root),
            authorization: AuthorizationPolicy::for_legacy_root(legacy_root),
            csrf_exemptions: vec![
                AntPattern::new(format!("{}/api/**", legacy_root)),
                AntPattern::new("/engine-rest/**"),
            ],
            logout_matchers: vec![
                LogoutMatcher::new(format!("{}/app/**/logout", legacy_root), None),
                // Bare /logout is POST-only so a cross-site navigation cannot trigger it
                LogoutMatcher::new("/logout", Some(Method::POST)),
            ],
            container_prefix: format!("{}/app", legacy_root),
        }
    }

    pub fn is_csrf_exempt(&self, path: &str) -> bool {
        self.csrf_exemptions.iter().any(|p| p.matches(path))
    }

    pub fn is_logout(&self, method: &Method, path: &str) -> bool {
        self.logout_matchers.iter().any(|m| m.matches(method, path))
    }

    /// `<root>/app/*` in servlet url-pattern terms: the bare path or anything below it
    pub fn in_container_scope(&self, path: &str) -> bool {
        path == self.container_prefix
            || path
                .strip_prefix(self.container_prefix.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

/// Percent-decode a request path for matching; undecodable input is matched raw
pub fn decode_path(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_covers_legacy_root_and_login_endpoints() {
        let scope = ActivationScope::new("/camunda");
        assert!(scope.applies("/camunda/app/cockpit/"));
        assert!(scope.applies("/camunda"));
        assert!(scope.applies("/oauth2/authorization/keycloak"));
        assert!(scope.applies("/login"));
        assert!(scope.applies("/login/oauth2/code/keycloak"));
        assert!(scope.applies("/logout"));
        assert!(!scope.applies("/engine-rest/task"));
        assert!(!scope.applies("/healthz"));
        assert!(!scope.applies("/"));
    }

    #[test]
    fn test_scope_with_empty_root_covers_everything() {
        let scope = ActivationScope::new("");
        assert!(scope.applies("/anything"));
    }

    #[test]
    fn test_protected_directories_require_auth() {
        let policy = AuthorizationPolicy::for_legacy_root("/camunda");
        for path in [
            "/camunda/assets/logo.svg",
            "/camunda/app/cockpit/default/",
            "/camunda/api/engine/engine/",
            "/camunda/lib/deps.js",
            "/camunda/app",
        ] {
            assert_eq!(policy.decide(path), Decision::RequireAuth, "{}", path);
        }
    }

    #[test]
    fn test_everything_else_is_public() {
        let policy = AuthorizationPolicy::for_legacy_root("/camunda");
        for path in ["/camunda/", "/camunda/index.html", "/login", "/somewhere/else"] {
            assert_eq!(policy.decide(path), Decision::Public, "{}", path);
        }
    }

    #[test]
    fn test_first_match_wins() {
        let policy = AuthorizationPolicy::new(Decision::RequireAuth)
            .rule("/camunda/app/public/**", Decision::Public)
            .rule("/camunda/app/**", Decision::RequireAuth);
        assert_eq!(policy.decide("/camunda/app/public/x"), Decision::Public);
        assert_eq!(policy.decide("/camunda/app/private"), Decision::RequireAuth);
        assert_eq!(policy.decide("/unlisted"), Decision::RequireAuth);
    }

    #[test]
    fn test_csrf_exemptions() {
        let policy = SecurityPolicy::for_legacy_root("/camunda");
        assert!(policy.is_csrf_exempt("/camunda/api/admin/auth/user/default/login/cockpit"));
        assert!(policy.is_csrf_exempt("/engine-rest/process-definition"));
        assert!(!policy.is_csrf_exempt("/camunda/app/cockpit/default/"));
        assert!(!policy.is_csrf_exempt("/logout"));
    }

    #[test]
    fn test_logout_matchers() {
        let policy = SecurityPolicy::for_legacy_root("/camunda");
        assert!(policy.is_logout(&Method::GET, "/camunda/app/x/logout"));
        assert!(policy.is_logout(&Method::POST, "/camunda/app/cockpit/default/logout"));
        assert!(policy.is_logout(&Method::POST, "/logout"));
        assert!(!policy.is_logout(&Method::POST, "/camunda/api/logout"));
        assert!(!policy.is_logout(&Method::GET, "/camunda/app/x/logout/again"));
    }

    #[test]
    fn test_bare_logout_requires_post() {
        let policy = SecurityPolicy::for_legacy_root("/camunda");
        assert!(!policy.is_logout(&Method::GET, "/logout"));
        assert!(!policy.is_logout(&Method::HEAD, "/logout"));
        assert!(policy.is_logout(&Method::POST, "/logout"));
    }

    #[test]
    fn test_container_scope_is_servlet_prefix() {
        let policy = SecurityPolicy::for_legacy_root("/camunda");
        assert!(policy.in_container_scope("/camunda/app"));
        assert!(policy.in_container_scope("/camunda/app/"));
        assert!(policy.in_container_scope("/camunda/app/tasklist/default/"));
        assert!(!policy.in_container_scope("/camunda/apps"));
        assert!(!policy.in_container_scope("/camunda/api/engine"));
    }

    #[test]
    fn test_decode_path_decodes_encoded_slash() {
        assert_eq!(
            decode_path("/camunda/api/admin/group/parent%2Fchild"),
            "/camunda/api/admin/group/parent/child"
        );
        assert_eq!(decode_path("/plain"), "/plain");
    }
}
