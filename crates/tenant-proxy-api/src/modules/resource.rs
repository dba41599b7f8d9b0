//! Name-based visibility for cluster-scoped kinds

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::Method;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Module, Visibility};
use crate::decision::SelectorDecision;
use crate::error::{Error, Result, UpstreamError};
use crate::kind::ProxyKind;
use crate::lister::ObjectLister;
use crate::names::{validate_dns_subdomain, validate_label_value};
use crate::request::{cancellable, ProxyRequest};
use crate::selector::{Operator, Requirement, Selector};
use crate::tenant::ProxyTenant;

/// Which endpoint of a kind a module serves
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    /// The collection, e.g. `GET .../storageclasses`
    Collection,
    /// One named object, e.g. `GET .../storageclasses/{name}`
    Item,
}

/// Module for one endpoint of a governed kind
pub struct KindModule {
    kind: ProxyKind,
    scope: Scope,
    name: String,
    path: String,
    lister: Arc<dyn ObjectLister>,
}

impl KindModule {
    /// Module for the collection endpoint of `kind`
    pub fn collection(kind: ProxyKind, lister: Arc<dyn ObjectLister>) -> Self {
        Self {
            kind,
            scope: Scope::Collection,
            name: format!("{}_list", kind.kind().to_lowercase()),
            path: kind.collection_path(),
            lister,
        }
    }

    /// Module for the named-object endpoint of `kind`
    pub fn item(kind: ProxyKind, lister: Arc<dyn ObjectLister>) -> Self {
        Self {
            kind,
            scope: Scope::Item,
            name: format!("{}_get", kind.kind().to_lowercase()),
            path: kind.item_path(),
            lister,
        }
    }

    /// Kind served
    pub fn kind(&self) -> ProxyKind {
        self.kind
    }

    /// Endpoint served
    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Object name of an item request, validated before it reaches a field selector
    fn target_name(&self, request: &ProxyRequest) -> Result<Option<String>> {
        if self.scope == Scope::Collection {
            return Ok(None);
        }

        let name = request
            .var("name")
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::bad_request("missing object name in path", self.kind.details()))?;
        validate_dns_subdomain(name).map_err(|e| {
            Error::bad_request(e, self.kind.details().with_name(name.to_string()))
        })?;

        Ok(Some(name.to_string()))
    }

    /// Every raw selector is one acceptable alternative
    fn raw_visibility(&self, decision: &SelectorDecision) -> Result<Visibility> {
        let mut selectors: Vec<Selector> = Vec::with_capacity(decision.raw.len());
        for raw in &decision.raw {
            let selector = Selector::from_label_selector(raw).map_err(|e| {
                Error::bad_request(
                    format!("invalid tenant selector for {}: {}", self.kind.qualified_name(), e),
                    self.kind.details(),
                )
            })?;
            if !selectors.contains(&selector) {
                selectors.push(selector);
            }
        }
        Ok(Visibility::AnyOf(selectors))
    }

    async fn list_candidates(
        &self,
        name: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let details = match &name {
            Some(n) => self.kind.details().with_name(n.clone()),
            None => self.kind.details(),
        };

        cancellable(cancel, self.lister.list_names(self.kind, name))
            .await
            .unwrap_or(Err(UpstreamError::Cancelled))
            .map_err(|e| {
                Error::bad_request(
                    format!("cannot list {}: {}", self.kind.qualified_name(), e),
                    details,
                )
            })
    }
}

#[async_trait]
impl Module for KindModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn methods(&self) -> &[Method] {
        &[]
    }

    async fn handle(
        &self,
        tenants: &[ProxyTenant],
        request: &ProxyRequest,
        cancel: &CancellationToken,
    ) -> Result<Visibility> {
        let target = self.target_name(request)?;
        let decision = SelectorDecision::fold(self.kind, tenants);

        // Raw selectors are trusted as written; names and grants are not consulted
        if !decision.raw.is_empty() {
            debug!(module = %self.name, count = decision.raw.len(), "Using raw tenant selectors");
            return self.raw_visibility(&decision);
        }

        let candidates = self.list_candidates(target.clone(), cancel).await?;
        let mut matched = decision.matching(&candidates);

        // A name that cannot be a label value cannot be selected by label
        matched.retain(|name| match validate_label_value(name) {
            Ok(()) => true,
            Err(e) => {
                warn!(module = %self.name, error = %e, "Granted object cannot be selected by label");
                false
            }
        });

        debug!(
            module = %self.name,
            candidates = candidates.len(),
            matched = matched.len(),
            allowed = decision.allowed,
            "Selector decision"
        );

        if !matched.is_empty() {
            let requirement = Requirement::new(self.kind.identity_label(), Operator::In, matched)
                .map_err(|e| Error::Internal(e.to_string()))?;
            return Ok(Visibility::Selector(requirement.into()));
        }

        if decision.allowed {
            return Ok(Visibility::Selector(Requirement::match_all().into()));
        }

        match target {
            Some(name) if *request.method() == Method::GET => Err(Error::not_found(
                format!("{} \"{}\" not found", self.kind.qualified_name(), name),
                self.kind.details().with_name(name),
            )),
            Some(name) => Err(Error::forbidden(
                "not allowed",
                self.kind.details().with_name(name),
            )),
            None => Err(Error::forbidden("not allowed", self.kind.details())),
        }
    }
}
