//! Authorization checks against the Kubernetes SubjectAccessReview API
//!
//! The proxy never decides RBAC itself. It describes the action, asks the API
//! server, and surfaces transport failures as `UpstreamUnavailable` instead
//! of defaulting to allow or deny.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::authorization::v1::{
    ResourceAttributes, SubjectAccessReview, SubjectAccessReviewSpec,
};
use kube::api::PostParams;
use kube::{Api, Client};
#[cfg(test)]
use mockall::automock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result, UpstreamError};
use crate::identity::Identity;
use crate::request::cancellable;

/// Action being authorized
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccessQuery {
    /// Kubernetes verb, e.g. `list` or `impersonate`
    pub verb: String,
    /// API group of the resource (empty for core)
    pub group: String,
    /// Plural resource name
    pub resource: String,
    /// Namespace for namespaced resources
    pub namespace: Option<String>,
    /// Object name, when the action targets one object
    pub name: Option<String>,
}

impl AccessQuery {
    /// Query for a verb on a resource
    pub fn new(verb: impl Into<String>, group: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            verb: verb.into(),
            group: group.into(),
            resource: resource.into(),
            ..Default::default()
        }
    }

    /// Restrict to a namespace
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Restrict to a named object
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Build the SubjectAccessReview for an identity
    pub fn to_review(&self, identity: &Identity) -> SubjectAccessReview {
        SubjectAccessReview {
            spec: SubjectAccessReviewSpec {
                user: Some(identity.username.clone()),
                groups: Some(identity.groups.iter().cloned().collect()),
                resource_attributes: Some(ResourceAttributes {
                    verb: Some(self.verb.clone()),
                    group: Some(self.group.clone()),
                    resource: Some(self.resource.clone()),
                    namespace: self.namespace.clone(),
                    name: self.name.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

/// Upstream authorization subsystem
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AccessReviewer: Send + Sync {
    /// Whether the identity may perform the action
    async fn review(&self, identity: &Identity, query: &AccessQuery)
        -> std::result::Result<bool, UpstreamError>;
}

/// SubjectAccessReview-backed reviewer
pub struct KubeAccessReviewer {
    client: Client,
}

impl KubeAccessReviewer {
    /// Create a reviewer using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AccessReviewer for KubeAccessReviewer {
    async fn review(
        &self,
        identity: &Identity,
        query: &AccessQuery,
    ) -> std::result::Result<bool, UpstreamError> {
        let api: Api<SubjectAccessReview> = Api::all(self.client.clone());
        let review = api
            .create(&PostParams::default(), &query.to_review(identity))
            .await?;

        Ok(review.status.map(|s| s.allowed).unwrap_or(false))
    }
}

/// Authorization checker with cancellation and error mapping
#[derive(Clone)]
pub struct Authorizer {
    reviewer: Arc<dyn AccessReviewer>,
}

impl Authorizer {
    /// Wrap a reviewer
    pub fn new(reviewer: Arc<dyn AccessReviewer>) -> Self {
        Self { reviewer }
    }

    /// Ask the upstream whether the identity may perform the action
    pub async fn check(
        &self,
        identity: &Identity,
        query: &AccessQuery,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let verdict = cancellable(cancel, self.reviewer.review(identity, query))
            .await
            .unwrap_or(Err(UpstreamError::Cancelled))
            .map_err(|e| Error::UpstreamUnavailable(format!("authorization check failed: {}", e)))?;

        debug!(
            user = %identity.username,
            verb = %query.verb,
            resource = %query.resource,
            name = ?query.name,
            allowed = verdict,
            "Authorization check"
        );

        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::*;

    fn alice() -> Identity {
        Identity::new("alice", vec!["devs".to_string()])
    }

    #[test]
    fn test_review_spec_carries_identity_and_action() {
        let query = AccessQuery::new("list", "storage.k8s.io", "storageclasses")
            .named("fast-ssd");
        let review = query.to_review(&alice());
        let attrs = review.spec.resource_attributes.unwrap();

        assert_eq!(review.spec.user.as_deref(), Some("alice"));
        assert_eq!(review.spec.groups, Some(vec!["devs".to_string()]));
        assert_eq!(attrs.verb.as_deref(), Some("list"));
        assert_eq!(attrs.group.as_deref(), Some("storage.k8s.io"));
        assert_eq!(attrs.resource.as_deref(), Some("storageclasses"));
        assert_eq!(attrs.name.as_deref(), Some("fast-ssd"));
        assert_eq!(attrs.namespace, None);
    }

    #[tokio::test]
    async fn test_check_returns_verdict() {
        let mut reviewer = MockAccessReviewer::new();
        reviewer
            .expect_review()
            .with(always(), eq(AccessQuery::new("impersonate", "", "users").named("bob")))
            .times(1)
            .returning(|_, _| Ok(true));

        let authorizer = Authorizer::new(Arc::new(reviewer));
        let allowed = authorizer
            .check(
                &alice(),
                &AccessQuery::new("impersonate", "", "users").named("bob"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(allowed);
    }

    #[tokio::test]
    async fn test_transport_failure_is_upstream_unavailable() {
        let mut reviewer = MockAccessReviewer::new();
        reviewer
            .expect_review()
            .returning(|_, _| Err(UpstreamError::Transport("connection refused".into())));

        let authorizer = Authorizer::new(Arc::new(reviewer));
        let result = authorizer
            .check(
                &alice(),
                &AccessQuery::new("list", "", "nodes"),
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(result, Err(Error::UpstreamUnavailable(_))));
    }

    #[tokio::test]
    async fn test_cancelled_check_is_upstream_unavailable() {
        let mut reviewer = MockAccessReviewer::new();
        reviewer
            .expect_review()
            .times(0..=1)
            .returning(|_, _| Ok(true));

        let cancel = CancellationToken::new();
        cancel.cancel();

        let authorizer = Authorizer::new(Arc::new(reviewer));
        let result = authorizer
            .check(&alice(), &AccessQuery::new("list", "", "nodes"), &cancel)
            .await;

        assert!(matches!(result, Err(Error::UpstreamUnavailable(_))));
    }
}
