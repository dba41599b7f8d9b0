//! Resource kinds governed by the proxy

use std::fmt;

use kube::core::{ApiResource, GroupVersionKind};

use crate::error::StatusDetails;

/// Cluster-scoped resource kind whose visibility is filtered per tenant
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProxyKind {
    /// `storage.k8s.io/v1` StorageClass
    StorageClasses,
    /// `networking.k8s.io/v1` IngressClass
    IngressClasses,
    /// `scheduling.k8s.io/v1` PriorityClass
    PriorityClasses,
    /// core `v1` Node
    Nodes,
}

impl ProxyKind {
    /// Every governed kind
    pub const ALL: [ProxyKind; 4] = [
        ProxyKind::StorageClasses,
        ProxyKind::IngressClasses,
        ProxyKind::PriorityClasses,
        ProxyKind::Nodes,
    ];

    /// API group (empty for the core group)
    pub fn group(&self) -> &'static str {
        match self {
            ProxyKind::StorageClasses => "storage.k8s.io",
            ProxyKind::IngressClasses => "networking.k8s.io",
            ProxyKind::PriorityClasses => "scheduling.k8s.io",
            ProxyKind::Nodes => "",
        }
    }

    /// Preferred API version used when listing candidates
    pub fn version(&self) -> &'static str {
        "v1"
    }

    /// Singular kind name
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyKind::StorageClasses => "StorageClass",
            ProxyKind::IngressClasses => "IngressClass",
            ProxyKind::PriorityClasses => "PriorityClass",
            ProxyKind::Nodes => "Node",
        }
    }

    /// Plural resource name as it appears in request paths
    pub fn plural(&self) -> &'static str {
        match self {
            ProxyKind::StorageClasses => "storageclasses",
            ProxyKind::IngressClasses => "ingressclasses",
            ProxyKind::PriorityClasses => "priorityclasses",
            ProxyKind::Nodes => "nodes",
        }
    }

    /// Label that carries the object's name, used to build `In` requirements
    pub fn identity_label(&self) -> &'static str {
        match self {
            ProxyKind::Nodes => "kubernetes.io/hostname",
            _ => "name",
        }
    }

    /// Path prefix up to (excluding) the version segment
    fn api_prefix(&self) -> String {
        match self.group() {
            "" => "/api".to_string(),
            group => format!("/apis/{group}"),
        }
    }

    /// Route pattern for the collection endpoint
    pub fn collection_path(&self) -> String {
        format!(
            "{}/{{version}}/{{endpoint:{}/?}}",
            self.api_prefix(),
            self.plural()
        )
    }

    /// Route pattern for a single named object
    pub fn item_path(&self) -> String {
        format!("{}/{{version}}/{}/{{name}}", self.api_prefix(), self.plural())
    }

    /// Dynamic API resource used for metadata listing
    pub fn api_resource(&self) -> ApiResource {
        ApiResource::from_gvk_with_plural(
            &GroupVersionKind::gvk(self.group(), self.version(), self.kind()),
            self.plural(),
        )
    }

    /// Error details for this kind
    pub fn details(&self) -> StatusDetails {
        StatusDetails::new(self.group(), self.plural())
    }

    /// `plural.group` form used in messages, e.g. `storageclasses.storage.k8s.io`
    pub fn qualified_name(&self) -> String {
        match self.group() {
            "" => self.plural().to_string(),
            group => format!("{}.{}", self.plural(), group),
        }
    }
}

impl fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.plural())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        assert_eq!(
            ProxyKind::StorageClasses.collection_path(),
            "/apis/storage.k8s.io/{version}/{endpoint:storageclasses/?}"
        );
        assert_eq!(
            ProxyKind::IngressClasses.item_path(),
            "/apis/networking.k8s.io/{version}/ingressclasses/{name}"
        );
        assert_eq!(
            ProxyKind::Nodes.collection_path(),
            "/api/{version}/{endpoint:nodes/?}"
        );
    }

    #[test]
    fn test_qualified_name() {
        assert_eq!(
            ProxyKind::StorageClasses.qualified_name(),
            "storageclasses.storage.k8s.io"
        );
        assert_eq!(ProxyKind::Nodes.qualified_name(), "nodes");
    }

    #[test]
    fn test_api_resource() {
        let ar = ProxyKind::PriorityClasses.api_resource();
        assert_eq!(ar.group, "scheduling.k8s.io");
        assert_eq!(ar.plural, "priorityclasses");
        assert_eq!(ar.api_version, "scheduling.k8s.io/v1");

        let core = ProxyKind::Nodes.api_resource();
        assert_eq!(core.api_version, "v1");
    }
}
