//! Tenant Proxy - per-tenant visibility of cluster-scoped Kubernetes objects

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kube::{Client, CustomResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tenant_proxy_api::{
    default_modules, start_server, watch_tenants, AppState, AuthType, Authorizer,
    IdentityResolver, ImpersonationGroups, KubeAccessReviewer, KubeLister, KubeTokenReviewer,
    ModuleRouter, ServerConfig, TenantStore,
};
use tenant_proxy_common::crd::Tenant;
use tenant_proxy_common::telemetry::{init_telemetry, LogFormat, TelemetryConfig};

/// Tenant Proxy - filters cluster-scoped resources by tenant ownership
#[derive(Parser, Debug)]
#[command(name = "tenant-proxy", version, about, long_about = None)]
struct Cli {
    /// Print the Tenant CRD manifest and exit
    #[arg(long)]
    crd: bool,

    /// Address of the HTTPS listener
    #[arg(long, env = "TENANT_PROXY_LISTEN_ADDR", default_value = "0.0.0.0:9001")]
    listen_addr: SocketAddr,

    /// Serving certificate (PEM)
    #[arg(long, env = "TENANT_PROXY_TLS_CERT_FILE", required_unless_present = "crd")]
    tls_cert_file: Option<PathBuf>,

    /// Serving private key (PEM)
    #[arg(long, env = "TENANT_PROXY_TLS_KEY_FILE", required_unless_present = "crd")]
    tls_key_file: Option<PathBuf>,

    /// CA bundle used to verify client certificates
    ///
    /// Without it the listener does not request client certificates and
    /// TLSCertificate authentication cannot succeed.
    #[arg(long, env = "TENANT_PROXY_CLIENT_CA_FILE")]
    client_ca_file: Option<PathBuf>,

    /// Credential schemes, in priority order
    #[arg(
        long,
        env = "TENANT_PROXY_AUTH_TYPES",
        value_enum,
        ignore_case = true,
        value_delimiter = ',',
        default_value = "BearerToken,TLSCertificate"
    )]
    auth_types: Vec<AuthType>,

    /// JWT claim used as the username of bearer token callers
    #[arg(long, env = "TENANT_PROXY_USERNAME_CLAIM")]
    username_claim: Option<String>,

    /// How impersonated groups combine with authenticated groups (union or replace)
    #[arg(
        long,
        env = "TENANT_PROXY_IMPERSONATION_GROUPS",
        value_enum,
        default_value_t = ImpersonationGroups::Union
    )]
    impersonation_groups: ImpersonationGroups,

    /// Deadline for one request, including upstream calls
    #[arg(long, env = "TENANT_PROXY_REQUEST_TIMEOUT_SECS", default_value = "30")]
    request_timeout_secs: u64,

    /// Log output format (json or text)
    #[arg(
        long,
        env = "TENANT_PROXY_LOG_FORMAT",
        value_enum,
        ignore_case = true,
        default_value_t = LogFormat::Json
    )]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install crypto provider before any TLS configuration is built
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("Failed to install aws-lc-rs crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&Tenant::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_telemetry(TelemetryConfig {
        format: cli.log_format,
        ..Default::default()
    })?;

    run(cli).await
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = ServerConfig {
        addr: cli.listen_addr,
        cert_pem: read_pem(cli.tls_cert_file.as_deref(), "--tls-cert-file").await?,
        key_pem: read_pem(cli.tls_key_file.as_deref(), "--tls-key-file").await?,
        client_ca_pem: match cli.client_ca_file.as_deref() {
            Some(path) => Some(read_pem(Some(path), "--client-ca-file").await?),
            None => None,
        },
    };

    if config.client_ca_pem.is_none() && cli.auth_types.contains(&AuthType::TlsCertificate) {
        warn!("TLSCertificate authentication is enabled without --client-ca-file; client certificates will not be requested");
    }

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let authorizer = Authorizer::new(Arc::new(KubeAccessReviewer::new(client.clone())));
    let resolver = IdentityResolver::new(cli.auth_types.clone(), authorizer)
        .with_token_reviewer(Arc::new(KubeTokenReviewer::new(client.clone())))
        .with_username_claim(cli.username_claim.clone())
        .with_impersonation_groups(cli.impersonation_groups);

    let router = ModuleRouter::new(default_modules(Arc::new(KubeLister::new(client.clone()))))?;
    info!(
        routes = router.len(),
        auth_types = ?cli.auth_types,
        "Module router built"
    );

    let shutdown = CancellationToken::new();
    let store = Arc::new(TenantStore::default());
    let watcher = tokio::spawn(watch_tenants(client, store.clone(), shutdown.clone()));

    let state = AppState {
        resolver: Arc::new(resolver),
        tenants: store,
        router: Arc::new(router),
        request_timeout: Duration::from_secs(cli.request_timeout_secs),
    };

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal"),
            Err(e) => warn!(error = %e, "Failed to listen for shutdown signal"),
        }
        signal.cancel();
    });

    let result = start_server(config, state, shutdown.clone()).await;
    shutdown.cancel();
    let _ = watcher.await;

    result.map_err(Into::into)
}

async fn read_pem(path: Option<&Path>, flag: &str) -> anyhow::Result<Vec<u8>> {
    let path = path.ok_or_else(|| anyhow::anyhow!("{} is required", flag))?;
    tokio::fs::read(path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read {} {:?}: {}", flag, path, e))
}
