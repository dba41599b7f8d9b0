//! Per-kind modules
//!
//! A module owns one route pattern and turns a caller's tenants into the
//! label selectors that restrict what the caller sees of one kind.

mod resource;

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::Method;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::kind::ProxyKind;
use crate::lister::ObjectLister;
use crate::request::ProxyRequest;
use crate::selector::Selector;
use crate::tenant::ProxyTenant;

pub use resource::{KindModule, Scope};

/// Outcome of a module: which objects the caller may see
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Visibility {
    /// Objects matching the selector
    Selector(Selector),
    /// Objects matching any of the selectors
    AnyOf(Vec<Selector>),
}

impl Visibility {
    /// Alternatives, any of which grants visibility
    pub fn selectors(&self) -> &[Selector] {
        match self {
            Visibility::Selector(selector) => std::slice::from_ref(selector),
            Visibility::AnyOf(selectors) => selectors,
        }
    }
}

/// Handler for one route of one governed kind
#[async_trait]
pub trait Module: Send + Sync {
    /// Name used in logs and responses
    fn name(&self) -> &str;

    /// Route pattern, e.g. `/apis/storage.k8s.io/{version}/storageclasses/{name}`
    fn path(&self) -> &str;

    /// Methods served; empty means every method
    fn methods(&self) -> &[Method];

    /// Compute the caller's visibility for the request
    async fn handle(
        &self,
        tenants: &[ProxyTenant],
        request: &ProxyRequest,
        cancel: &CancellationToken,
    ) -> Result<Visibility>;
}

/// Item and collection modules for every governed kind
///
/// Item routes come first so a named request never reaches the collection
/// module.
pub fn default_modules(lister: Arc<dyn ObjectLister>) -> Vec<Arc<dyn Module>> {
    let mut modules: Vec<Arc<dyn Module>> = Vec::with_capacity(ProxyKind::ALL.len() * 2);
    for kind in ProxyKind::ALL {
        modules.push(Arc::new(KindModule::item(kind, lister.clone())));
        modules.push(Arc::new(KindModule::collection(kind, lister.clone())));
    }
    modules
}
