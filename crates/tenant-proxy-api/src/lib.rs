//! Tenant Proxy
//!
//! Decides which cluster-scoped objects a tenant member may see. Requests for
//! governed kinds (storage classes, ingress classes, priority classes and
//! nodes) are turned into label selectors built from the caller's tenants.
//!
//! # Architecture
//!
//! ```text
//! kubectl ──► identity ──► tenants ──► module ──► label selector
//!             (token/cert,  (Tenant     (per kind    (forwarding
//!              impersonate)  CRDs)       and route)   layer)
//! ```
//!
//! # Endpoints
//!
//! - `GET /healthz` - Health check
//! - `* /api/*`, `* /apis/*` - Visibility decision for the request

#![deny(missing_docs)]

pub mod authorize;
pub mod cert_auth;
pub mod decision;
pub mod error;
pub mod identity;
pub mod kind;
pub mod lister;
pub mod modules;
pub mod names;
pub mod request;
pub mod routing;
pub mod selector;
pub mod server;
pub mod tenant;
pub mod tenant_watcher;
pub mod token_review;

pub use authorize::{AccessReviewer, Authorizer, KubeAccessReviewer};
pub use error::{Error, Result};
pub use identity::{AuthType, Identity, IdentityResolver, ImpersonationGroups};
pub use kind::ProxyKind;
pub use lister::{KubeLister, ObjectLister};
pub use modules::{default_modules, Module, Visibility};
pub use routing::ModuleRouter;
pub use server::{build_router, start_server, AppState, ServerConfig};
pub use tenant::{ProxyTenant, TenantRegistry, TenantStore};
pub use tenant_watcher::watch_tenants;
pub use token_review::{KubeTokenReviewer, TokenReviewer};
