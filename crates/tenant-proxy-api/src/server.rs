//! Tenant proxy server
//!
//! Every request other than `/healthz` is resolved to an identity, matched
//! against the caller's tenants and dispatched to the module owning its path.
//! The answer is the visibility decision for the forwarding layer: the label
//! selectors to apply, as JSON and as `X-Tenant-Label-Selector` headers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderValue, Request};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Json, Router};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use hyper_util::service::TowerToHyperService;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cert_auth::{server_tls_config, ClientCertChain};
use crate::error::{Error, Result};
use crate::identity::IdentityResolver;
use crate::request::ProxyRequest;
use crate::routing::ModuleRouter;
use crate::selector::Selector;
use crate::tenant::TenantRegistry;

/// Response header carrying one label selector per visibility alternative
pub const LABEL_SELECTOR_HEADER: &str = "x-tenant-label-selector";

/// Default per-request deadline
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Server configuration
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind the server
    pub addr: SocketAddr,
    /// TLS certificate PEM
    pub cert_pem: Vec<u8>,
    /// TLS private key PEM
    pub key_pem: Vec<u8>,
    /// CA bundle PEM used to verify client certificates
    pub client_ca_pem: Option<Vec<u8>>,
}

/// Shared state for handlers
#[derive(Clone)]
pub struct AppState {
    /// Identity resolution
    pub resolver: Arc<IdentityResolver>,
    /// Tenant registry view
    pub tenants: Arc<dyn TenantRegistry>,
    /// Module dispatch table
    pub router: Arc<ModuleRouter>,
    /// Deadline for one request, including upstream calls
    pub request_timeout: Duration,
}

/// Visibility decision for one request
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionResponse {
    /// Effective username
    pub user: String,
    /// Effective groups
    pub groups: Vec<String>,
    /// Module that handled the path, if any
    pub module: Option<String>,
    /// Alternatives, any of which makes an object visible
    pub label_selectors: Vec<String>,
}

/// Build the HTTP router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .fallback(decision_handler)
        .with_state(state)
}

/// Decide what the caller may see for this request
///
/// The handler owns a cancellation token that is cancelled when the handler
/// finishes or is dropped, so a disconnecting client aborts in-flight
/// upstream calls.
pub async fn decision_handler(
    State(state): State<AppState>,
    request: Request<Body>,
) -> Result<Response> {
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let chain = request.extensions().get::<ClientCertChain>().cloned();
    let (parts, _body) = request.into_parts();
    let request = ProxyRequest::new(parts.method, parts.uri.path(), parts.headers)
        .with_client_certs(chain);

    match tokio::time::timeout(state.request_timeout, decide(&state, request, &cancel)).await {
        Ok(result) => result,
        Err(_) => {
            cancel.cancel();
            warn!(timeout = ?state.request_timeout, "Request deadline exceeded");
            Err(Error::UpstreamUnavailable(format!(
                "request did not complete within {:?}",
                state.request_timeout
            )))
        }
    }
}

async fn decide(
    state: &AppState,
    request: ProxyRequest,
    cancel: &CancellationToken,
) -> Result<Response> {
    let identity = state.resolver.resolve(&request, cancel).await?;
    let mut decision = DecisionResponse {
        user: identity.username.clone(),
        groups: identity.groups.iter().cloned().collect(),
        module: None,
        label_selectors: Vec::new(),
    };

    let Some(dispatch) = state.router.dispatch(request.method(), request.path()) else {
        debug!(path = %request.path(), user = %identity.username, "No module for path");
        return Ok(Json(decision).into_response());
    };

    let tenants = state.tenants.tenants_for(&identity);
    let request = request.with_vars(dispatch.vars);
    let visibility = dispatch.module.handle(&tenants, &request, cancel).await?;
    let selectors = visibility.selectors();

    info!(
        user = %identity.username,
        method = %request.method(),
        path = %request.path(),
        module = %dispatch.module.name(),
        tenants = tenants.len(),
        unrestricted = selectors.iter().any(Selector::is_unrestricted),
        "Visibility decided"
    );

    decision.module = Some(dispatch.module.name().to_string());
    decision.label_selectors = selectors.iter().map(ToString::to_string).collect();

    let mut response = Json(&decision).into_response();
    for selector in &decision.label_selectors {
        let value = HeaderValue::from_str(selector)
            .map_err(|e| Error::Internal(format!("selector is not a valid header: {}", e)))?;
        response.headers_mut().append(LABEL_SELECTOR_HEADER, value);
    }
    Ok(response)
}

/// Serve the proxy until `shutdown` is cancelled
///
/// Peer certificates of each TLS connection are attached to its requests
/// as a [`ClientCertChain`] extension.
pub async fn start_server(
    config: ServerConfig,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<()> {
    let tls = server_tls_config(
        &config.cert_pem,
        &config.key_pem,
        config.client_ca_pem.as_deref(),
    )?;
    let acceptor = TlsAcceptor::from(Arc::new(tls));

    let listener = TcpListener::bind(config.addr)
        .await
        .map_err(|e| Error::Config(format!("cannot bind {}: {}", config.addr, e)))?;

    info!(addr = %config.addr, "Starting tenant proxy server");

    let app = build_router(state);

    loop {
        let (stream, remote) = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Tenant proxy server shutting down");
                return Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "Failed to accept connection");
                    continue;
                }
            },
        };

        let acceptor = acceptor.clone();
        let app = app.clone();
        tokio::spawn(async move {
            let tls_stream = match acceptor.accept(stream).await {
                Ok(tls_stream) => tls_stream,
                Err(e) => {
                    debug!(remote = %remote, error = %e, "TLS handshake failed");
                    return;
                }
            };

            let chain = tls_stream
                .get_ref()
                .1
                .peer_certificates()
                .map(|certs| ClientCertChain::new(certs.iter().map(|c| c.to_vec()).collect()))
                .unwrap_or_default();

            let service = TowerToHyperService::new(app.layer(Extension(chain)));
            if let Err(e) = Builder::new(TokioExecutor::new())
                .serve_connection(TokioIo::new(tls_stream), service)
                .await
            {
                debug!(remote = %remote, error = %e, "Connection closed with error");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authorize::{Authorizer, MockAccessReviewer};
    use crate::error::UpstreamError;
    use crate::identity::AuthType;
    use crate::kind::ProxyKind;
    use crate::lister::{MockObjectLister, ObjectLister};
    use crate::modules::default_modules;
    use crate::tenant::{OwnershipRule, ProxyTenant, TenantOwner, TenantRecord, TenantStore};
    use crate::token_review::MockTokenReviewer;
    use async_trait::async_trait;
    use axum::http::StatusCode;
    use http_body_util::BodyExt;
    use k8s_openapi::api::authentication::v1::{TokenReviewStatus, UserInfo};
    use rcgen::{CertificateParams, DistinguishedName, DnType, DnValue, KeyPair};
    use tenant_proxy_common::crd::OwnerKind;
    use tower::ServiceExt;

    fn token_reviewer() -> MockTokenReviewer {
        let mut reviewer = MockTokenReviewer::new();
        reviewer.expect_review().returning(|token| {
            let username = token.trim_end_matches("-token").to_string();
            Ok(TokenReviewStatus {
                authenticated: Some(true),
                user: Some(UserInfo {
                    username: Some(username),
                    groups: Some(vec!["system:authenticated".to_string()]),
                    ..Default::default()
                }),
                ..Default::default()
            })
        });
        reviewer
    }

    fn lister() -> MockObjectLister {
        let candidates = vec!["fast-ssd".to_string(), "slow-hdd".to_string()];
        let mut lister = MockObjectLister::new();
        lister.expect_list_names().returning(move |_, name| {
            Ok(candidates
                .iter()
                .filter(|c| name.as_ref().map_or(true, |n| n == *c))
                .cloned()
                .collect())
        });
        lister
    }

    fn store() -> TenantStore {
        TenantStore::new(vec![TenantRecord {
            tenant: ProxyTenant::new("oil").with_rule(
                ProxyKind::StorageClasses,
                OwnershipRule::Exact(["fast-ssd".to_string()].into()),
            ),
            owners: vec![TenantOwner {
                kind: OwnerKind::User,
                name: "alice".to_string(),
            }],
        }])
    }

    fn state_with(lister: Arc<dyn ObjectLister>, request_timeout: Duration) -> AppState {
        let resolver = IdentityResolver::new(
            vec![AuthType::BearerToken, AuthType::TlsCertificate],
            Authorizer::new(Arc::new(MockAccessReviewer::new())),
        )
        .with_token_reviewer(Arc::new(token_reviewer()));

        AppState {
            resolver: Arc::new(resolver),
            tenants: Arc::new(store()),
            router: Arc::new(ModuleRouter::new(default_modules(lister)).unwrap()),
            request_timeout,
        }
    }

    fn app() -> Router {
        build_router(state_with(Arc::new(lister()), DEFAULT_REQUEST_TIMEOUT))
    }

    fn get(path: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(path);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_healthz() {
        let response = app().oneshot(get("/healthz", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"ok");
    }

    #[tokio::test]
    async fn test_missing_credentials_is_unauthorized_status() {
        let response = app()
            .oneshot(get("/apis/storage.k8s.io/v1/storageclasses", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body = json_body(response).await;
        assert_eq!(body["kind"], "Status");
        assert_eq!(body["code"], 401);
    }

    #[tokio::test]
    async fn test_list_returns_selector() {
        let response = app()
            .oneshot(get(
                "/apis/storage.k8s.io/v1/storageclasses",
                Some("alice-token"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(LABEL_SELECTOR_HEADER).unwrap(),
            "name in (fast-ssd)"
        );

        let body = json_body(response).await;
        assert_eq!(body["user"], "alice");
        assert_eq!(body["module"], "storageclass_list");
        assert_eq!(body["labelSelectors"], serde_json::json!(["name in (fast-ssd)"]));
    }

    #[tokio::test]
    async fn test_hidden_object_is_not_found() {
        let response = app()
            .oneshot(get(
                "/apis/storage.k8s.io/v1/storageclasses/slow-hdd",
                Some("alice-token"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = json_body(response).await;
        assert_eq!(body["reason"], "NotFound");
        assert_eq!(body["details"]["name"], "slow-hdd");
        assert_eq!(body["details"]["group"], "storage.k8s.io");
    }

    #[tokio::test]
    async fn test_caller_without_tenant_is_forbidden() {
        let response = app()
            .oneshot(get(
                "/apis/storage.k8s.io/v1/storageclasses",
                Some("bob-token"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_unmanaged_path_has_no_selector() {
        let response = app()
            .oneshot(get("/api/v1/namespaces/default/pods", Some("alice-token")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(LABEL_SELECTOR_HEADER).is_none());

        let body = json_body(response).await;
        assert_eq!(body["module"], serde_json::Value::Null);
        assert_eq!(body["labelSelectors"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_client_certificate_extension_is_used() {
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, DnValue::Utf8String("alice".to_string()));
        params.distinguished_name = dn;
        let key_pair = KeyPair::generate().unwrap();
        let cert = params.self_signed(&key_pair).unwrap();

        let mut request = get("/apis/storage.k8s.io/v1/storageclasses/fast-ssd", None);
        request
            .extensions_mut()
            .insert(ClientCertChain::new(vec![cert.der().to_vec()]));

        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["user"], "alice");
        assert_eq!(body["module"], "storageclass_get");
    }

    struct StalledLister;

    #[async_trait]
    impl ObjectLister for StalledLister {
        async fn list_names(
            &self,
            _kind: ProxyKind,
            _name: Option<String>,
        ) -> std::result::Result<Vec<String>, UpstreamError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_deadline_aborts_listing() {
        let app = build_router(state_with(
            Arc::new(StalledLister),
            Duration::from_millis(20),
        ));
        let response = app
            .oneshot(get(
                "/apis/storage.k8s.io/v1/storageclasses",
                Some("alice-token"),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
