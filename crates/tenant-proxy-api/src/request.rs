//! Request context
//!
//! [`ProxyRequest`] wraps an inbound API call with uniform access to the
//! method, path variables extracted by the module router, credentials and
//! impersonation headers.

use std::collections::HashMap;
use std::future::Future;

use axum::http::{HeaderMap, Method};
use tokio_util::sync::CancellationToken;

use crate::cert_auth::ClientCertChain;

/// Header carrying the impersonated username
pub const IMPERSONATE_USER_HEADER: &str = "Impersonate-User";

/// Header carrying an impersonated group (may repeat)
pub const IMPERSONATE_GROUP_HEADER: &str = "Impersonate-Group";

/// Path variables captured by a route pattern
pub type PathVars = HashMap<String, String>;

/// Inbound request as seen by identity resolution and modules
#[derive(Clone, Debug)]
pub struct ProxyRequest {
    method: Method,
    path: String,
    headers: HeaderMap,
    vars: PathVars,
    client_certs: Option<ClientCertChain>,
}

impl ProxyRequest {
    /// Create a request context
    pub fn new(method: Method, path: impl Into<String>, headers: HeaderMap) -> Self {
        Self {
            method,
            path: path.into(),
            headers,
            vars: PathVars::new(),
            client_certs: None,
        }
    }

    /// Attach the peer certificate chain of the connection
    pub fn with_client_certs(mut self, chain: Option<ClientCertChain>) -> Self {
        self.client_certs = chain.filter(|c| !c.is_empty());
        self
    }

    /// Attach path variables captured by the router
    pub fn with_vars(mut self, vars: PathVars) -> Self {
        self.vars = vars;
        self
    }

    /// HTTP method
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Request path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Request headers
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Path variable by name
    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Peer certificate chain, when the client presented one
    pub fn client_certs(&self) -> Option<&ClientCertChain> {
        self.client_certs.as_ref()
    }

    /// Bearer token from the Authorization header
    pub fn bearer_token(&self) -> Option<&str> {
        extract_bearer_token(&self.headers)
    }

    /// Impersonated username, if requested
    pub fn impersonate_user(&self) -> Option<&str> {
        self.headers
            .get(IMPERSONATE_USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    /// Impersonated groups, in header order
    pub fn impersonate_groups(&self) -> Vec<&str> {
        self.headers
            .get_all(IMPERSONATE_GROUP_HEADER)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .collect()
    }
}

/// Extract bearer token from Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Run a future until it completes or the token is cancelled
///
/// Returns `None` when cancelled; the future is dropped, aborting its I/O.
pub async fn cancellable<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with(headers: &[(&'static str, &str)]) -> ProxyRequest {
        let mut map = HeaderMap::new();
        for (k, v) in headers {
            map.append(*k, v.parse().unwrap());
        }
        ProxyRequest::new(Method::GET, "/api/v1/nodes", map)
    }

    #[test]
    fn test_extract_bearer_token() {
        let req = request_with(&[("Authorization", "Bearer abc123")]);
        assert_eq!(req.bearer_token(), Some("abc123"));
    }

    #[test]
    fn test_extract_bearer_token_wrong_scheme() {
        let req = request_with(&[("Authorization", "Basic abc123")]);
        assert_eq!(req.bearer_token(), None);
    }

    #[test]
    fn test_extract_bearer_token_empty() {
        let req = request_with(&[("Authorization", "Bearer ")]);
        assert_eq!(req.bearer_token(), None);
    }

    #[test]
    fn test_impersonation_headers() {
        let req = request_with(&[
            ("Impersonate-User", "bob"),
            ("Impersonate-Group", "devs"),
            ("Impersonate-Group", "ops"),
        ]);
        assert_eq!(req.impersonate_user(), Some("bob"));
        assert_eq!(req.impersonate_groups(), vec!["devs", "ops"]);
    }

    #[test]
    fn test_no_impersonation() {
        let req = request_with(&[]);
        assert_eq!(req.impersonate_user(), None);
        assert!(req.impersonate_groups().is_empty());
    }

    #[test]
    fn test_empty_cert_chain_is_dropped() {
        let req = request_with(&[]).with_client_certs(Some(ClientCertChain::new(vec![])));
        assert!(req.client_certs().is_none());
    }

    #[test]
    fn test_path_vars() {
        let vars = PathVars::from([("name".to_string(), "fast-ssd".to_string())]);
        let req = request_with(&[]).with_vars(vars);
        assert_eq!(req.var("name"), Some("fast-ssd"));
        assert_eq!(req.var("version"), None);
    }

    #[tokio::test]
    async fn test_cancellable_completes() {
        let token = CancellationToken::new();
        assert_eq!(cancellable(&token, async { 7 }).await, Some(7));
    }

    #[tokio::test]
    async fn test_cancellable_aborts_when_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        let out = cancellable(&token, std::future::pending::<()>()).await;
        assert!(out.is_none());
    }
}
