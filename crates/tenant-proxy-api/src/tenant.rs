//! Tenant registry view
//!
//! A [`ProxyTenant`] is the proxy's in-memory form of a `Tenant` resource:
//! one [`OwnershipRule`] per governed kind. The [`TenantStore`] holds an
//! immutable snapshot of all tenants and hands each request the tenants its
//! caller owns. Snapshots are replaced wholesale by the watcher, never
//! mutated in place.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::ResourceExt;
use parking_lot::RwLock;
use regex::Regex;
use tracing::warn;

use tenant_proxy_common::crd::{OwnerKind, RuleSpec, Tenant};

use crate::identity::Identity;
use crate::kind::ProxyKind;

/// Errors converting a `Tenant` resource
#[derive(Debug, thiserror::Error)]
pub enum TenantError {
    /// A rule block sets more than one matching strategy
    #[error("tenant {tenant}: rule for {kind} sets {count} strategies, expected exactly one")]
    AmbiguousRule {
        /// Tenant name
        tenant: String,
        /// Kind the rule applies to
        kind: ProxyKind,
        /// Number of strategies set
        count: usize,
    },

    /// A regex rule does not compile
    #[error("tenant {tenant}: invalid regex for {kind}: {source}")]
    InvalidRegex {
        /// Tenant name
        tenant: String,
        /// Kind the rule applies to
        kind: ProxyKind,
        /// Compilation error
        #[source]
        source: regex::Error,
    },

    /// The resource has no name
    #[error("tenant has no name")]
    MissingName,
}

/// How a tenant identifies the objects of one kind it may see
#[derive(Clone, Debug)]
pub enum OwnershipRule {
    /// Objects whose name is in the set
    Exact(BTreeSet<String>),
    /// Objects whose name matches the expression
    Regex(Regex),
    /// Objects matching a label selector, passed through verbatim
    RawSelector(LabelSelector),
    /// Every object of the kind
    Unrestricted,
}

/// Ownership rules of one tenant, keyed by kind
#[derive(Clone, Debug)]
pub struct ProxyTenant {
    name: String,
    rules: BTreeMap<ProxyKind, OwnershipRule>,
}

impl ProxyTenant {
    /// Create a tenant without rules
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rules: BTreeMap::new(),
        }
    }

    /// Set the rule for a kind, replacing any previous one
    pub fn with_rule(mut self, kind: ProxyKind, rule: OwnershipRule) -> Self {
        self.rules.insert(kind, rule);
        self
    }

    /// Tenant name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rule for a kind, if the tenant declares one
    pub fn rule(&self, kind: ProxyKind) -> Option<&OwnershipRule> {
        self.rules.get(&kind)
    }
}

/// Identity that owns a tenant
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TenantOwner {
    /// Owner kind
    pub kind: OwnerKind,
    /// Owner name
    pub name: String,
}

impl TenantOwner {
    /// Whether the identity is this owner
    pub fn matches(&self, identity: &Identity) -> bool {
        match self.kind {
            OwnerKind::User | OwnerKind::ServiceAccount => identity.username == self.name,
            OwnerKind::Group => identity.groups.contains(&self.name),
        }
    }
}

/// A tenant together with its owners
#[derive(Clone, Debug)]
pub struct TenantRecord {
    /// Ownership rules
    pub tenant: ProxyTenant,
    /// Owners
    pub owners: Vec<TenantOwner>,
}

impl TenantRecord {
    /// Whether the identity owns this tenant
    pub fn owned_by(&self, identity: &Identity) -> bool {
        self.owners.iter().any(|o| o.matches(identity))
    }
}

impl TryFrom<&Tenant> for TenantRecord {
    type Error = TenantError;

    fn try_from(resource: &Tenant) -> Result<Self, Self::Error> {
        let name = resource.metadata.name.clone().ok_or(TenantError::MissingName)?;
        let spec = &resource.spec;

        let mut tenant = ProxyTenant::new(name.clone());
        for (kind, block) in [
            (ProxyKind::StorageClasses, &spec.storage_classes),
            (ProxyKind::IngressClasses, &spec.ingress_classes),
            (ProxyKind::PriorityClasses, &spec.priority_classes),
            (ProxyKind::Nodes, &spec.nodes),
        ] {
            let Some(block) = block else { continue };
            if let Some(rule) = convert_rule(&name, kind, block)? {
                tenant = tenant.with_rule(kind, rule);
            }
        }

        let owners = spec
            .owners
            .iter()
            .map(|o| TenantOwner {
                kind: o.kind,
                name: o.name.clone(),
            })
            .collect();

        Ok(TenantRecord { tenant, owners })
    }
}

/// Convert one rule block; a block with no strategy set yields no rule
fn convert_rule(
    tenant: &str,
    kind: ProxyKind,
    block: &RuleSpec,
) -> Result<Option<OwnershipRule>, TenantError> {
    match block.strategies() {
        0 => return Ok(None),
        1 => {}
        count => {
            return Err(TenantError::AmbiguousRule {
                tenant: tenant.to_string(),
                kind,
                count,
            })
        }
    }

    let rule = if block.unrestricted {
        OwnershipRule::Unrestricted
    } else if let Some(pattern) = &block.regex {
        let re = Regex::new(pattern).map_err(|source| TenantError::InvalidRegex {
            tenant: tenant.to_string(),
            kind,
            source,
        })?;
        OwnershipRule::Regex(re)
    } else if let Some(selector) = &block.selector {
        OwnershipRule::RawSelector(selector.clone())
    } else {
        OwnershipRule::Exact(block.exact.iter().cloned().collect())
    };

    Ok(Some(rule))
}

/// Read-only view over the tenants relevant to a caller
pub trait TenantRegistry: Send + Sync {
    /// Tenants owned by the identity, as a consistent snapshot
    fn tenants_for(&self, identity: &Identity) -> Vec<ProxyTenant>;
}

/// In-memory tenant registry refreshed by the tenant watcher
#[derive(Default)]
pub struct TenantStore {
    snapshot: RwLock<Arc<Vec<TenantRecord>>>,
}

impl TenantStore {
    /// Create a store seeded with records
    pub fn new(records: Vec<TenantRecord>) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(records)),
        }
    }

    /// Replace the whole snapshot
    pub fn replace(&self, records: Vec<TenantRecord>) {
        let records = Arc::new(records);
        *self.snapshot.write() = records;
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<Vec<TenantRecord>> {
        self.snapshot.read().clone()
    }

    /// Convert and store every tenant resource, returning the rejected ones
    pub fn replace_from_resources<'a>(
        &self,
        resources: impl IntoIterator<Item = &'a Tenant>,
    ) -> Vec<TenantError> {
        let mut records = Vec::new();
        let mut rejected = Vec::new();

        for resource in resources {
            match TenantRecord::try_from(resource) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(tenant = %resource.name_any(), error = %e, "Skipping invalid tenant");
                    rejected.push(e);
                }
            }
        }

        records.sort_by(|a, b| a.tenant.name().cmp(b.tenant.name()));
        self.replace(records);
        rejected
    }
}

impl TenantRegistry for TenantStore {
    fn tenants_for(&self, identity: &Identity) -> Vec<ProxyTenant> {
        self.snapshot()
            .iter()
            .filter(|record| record.owned_by(identity))
            .map(|record| record.tenant.clone())
            .collect()
    }
}
