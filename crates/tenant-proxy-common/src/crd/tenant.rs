//! Tenant CRD
//!
//! A Tenant names the identities that own it and, per governed resource
//! kind, the rule deciding which cluster-scoped objects those identities
//! may see through the proxy.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Tenant defines ownership of cluster-scoped objects for a set of identities.
///
/// Example:
/// ```yaml
/// apiVersion: tenantproxy.io/v1alpha1
/// kind: Tenant
/// metadata:
///   name: oil
/// spec:
///   owners:
///     - kind: User
///       name: alice
///     - kind: Group
///       name: oil-admins
///   storageClasses:
///     exact: ["fast-ssd"]
///   ingressClasses:
///     regex: "^oil-.*$"
///   nodes:
///     selector:
///       matchLabels:
///         pool: oil
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "tenantproxy.io",
    version = "v1alpha1",
    kind = "Tenant",
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TenantSpec {
    /// Identities owning this tenant
    #[serde(default)]
    pub owners: Vec<OwnerSpec>,

    /// Visibility rule for storage classes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_classes: Option<RuleSpec>,

    /// Visibility rule for ingress classes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_classes: Option<RuleSpec>,

    /// Visibility rule for priority classes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_classes: Option<RuleSpec>,

    /// Visibility rule for nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<RuleSpec>,
}

/// A tenant owner
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct OwnerSpec {
    /// Kind of identity
    pub kind: OwnerKind,
    /// User, group or service account name
    pub name: String,
}

/// Kind of identity that can own a tenant
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum OwnerKind {
    /// Matched against the authenticated username
    User,
    /// Matched against any authenticated group
    Group,
    /// Matched against the username, in `system:serviceaccount:<ns>:<name>` form
    ServiceAccount,
}

/// Visibility rule for one resource kind
///
/// Exactly one of the fields may be set. The proxy rejects tenants that set
/// more than one, and treats a block with none set as absent.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuleSpec {
    /// Object names visible to the tenant
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exact: Vec<String>,

    /// Regular expression over object names
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,

    /// Label selector passed through verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,

    /// Every object of the kind is visible
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unrestricted: bool,
}

impl RuleSpec {
    /// Number of matching strategies set on this block
    pub fn strategies(&self) -> usize {
        [
            !self.exact.is_empty(),
            self.regex.is_some(),
            self.selector.is_some(),
            self.unrestricted,
        ]
        .into_iter()
        .filter(|set| *set)
        .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_spec_deserializes_camel_case() {
        let spec: TenantSpec = serde_json::from_value(serde_json::json!({
            "owners": [
                {"kind": "User", "name": "alice"},
                {"kind": "ServiceAccount", "name": "system:serviceaccount:oil:ci"}
            ],
            "storageClasses": {"exact": ["fast-ssd"]},
            "ingressClasses": {"regex": "^oil-"},
            "nodes": {"selector": {"matchLabels": {"pool": "oil"}}},
            "priorityClasses": {"unrestricted": true}
        }))
        .unwrap();

        assert_eq!(spec.owners.len(), 2);
        assert_eq!(spec.owners[1].kind, OwnerKind::ServiceAccount);
        assert_eq!(spec.storage_classes.unwrap().exact, vec!["fast-ssd"]);
        assert_eq!(spec.ingress_classes.unwrap().regex.as_deref(), Some("^oil-"));
        assert!(spec.nodes.unwrap().selector.is_some());
        assert!(spec.priority_classes.unwrap().unrestricted);
    }

    #[test]
    fn test_rule_strategies_counts_set_fields() {
        assert_eq!(RuleSpec::default().strategies(), 0);

        let rule = RuleSpec {
            exact: vec!["a".into()],
            unrestricted: true,
            ..Default::default()
        };
        assert_eq!(rule.strategies(), 2);
    }

    #[test]
    fn test_unrestricted_false_is_not_serialized() {
        let json = serde_json::to_value(RuleSpec {
            exact: vec!["gold".into()],
            ..Default::default()
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"exact": ["gold"]}));
    }
}
