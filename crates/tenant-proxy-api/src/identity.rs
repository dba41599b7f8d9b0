//! Identity resolution
//!
//! Turns the credentials carried by a request into an [`Identity`]. The
//! configured credential schemes are tried in order; the first scheme whose
//! material is present on the request is used exclusively, with no fallback
//! to later schemes if it fails.
//!
//! Impersonation headers are honored after base resolution, once the
//! authenticated identity has been allowed to impersonate every requested
//! user and group.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use clap::ValueEnum;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::authorize::{AccessQuery, Authorizer};
use crate::cert_auth::identity_from_chain;
use crate::error::{Error, Result, UpstreamError};
use crate::request::{cancellable, ProxyRequest};
use crate::token_review::{identity_from_status, TokenReviewer};

/// Authenticated caller
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Identity {
    /// Username (empty for anonymous callers)
    pub username: String,
    /// Group memberships
    pub groups: BTreeSet<String>,
}

impl Identity {
    /// Create an identity
    pub fn new(username: impl Into<String>, groups: impl IntoIterator<Item = String>) -> Self {
        Self {
            username: username.into(),
            groups: groups.into_iter().collect(),
        }
    }

    /// Caller with no username and no groups
    pub fn anonymous() -> Self {
        Self::default()
    }
}

/// Credential scheme
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum AuthType {
    /// `Authorization: Bearer` token resolved through TokenReview
    #[value(name = "BearerToken", alias = "bearer")]
    BearerToken,
    /// Verified client certificate (CN and O fields)
    #[value(name = "TLSCertificate", alias = "tls")]
    TlsCertificate,
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BearerToken => f.write_str("BearerToken"),
            Self::TlsCertificate => f.write_str("TLSCertificate"),
        }
    }
}

/// How impersonated groups combine with the authenticated groups
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ImpersonationGroups {
    /// Authenticated groups plus impersonated groups
    #[default]
    Union,
    /// Impersonated groups only
    Replace,
}

/// Resolves request credentials into an identity
#[derive(Clone)]
pub struct IdentityResolver {
    schemes: Vec<AuthType>,
    token_reviewer: Option<Arc<dyn TokenReviewer>>,
    username_claim: Option<String>,
    authorizer: Authorizer,
    impersonation_groups: ImpersonationGroups,
}

impl IdentityResolver {
    /// Create a resolver trying `schemes` in order
    ///
    /// The authorizer decides whether impersonation is allowed.
    pub fn new(schemes: Vec<AuthType>, authorizer: Authorizer) -> Self {
        Self {
            schemes,
            token_reviewer: None,
            username_claim: None,
            authorizer,
            impersonation_groups: ImpersonationGroups::default(),
        }
    }

    /// Resolve bearer tokens through a token reviewer
    ///
    /// Without one, bearer callers are anonymous.
    pub fn with_token_reviewer(mut self, reviewer: Arc<dyn TokenReviewer>) -> Self {
        self.token_reviewer = Some(reviewer);
        self
    }

    /// Read bearer usernames from this JWT claim
    pub fn with_username_claim(mut self, claim: Option<String>) -> Self {
        self.username_claim = claim.filter(|c| !c.is_empty());
        self
    }

    /// Set the impersonated group merge mode
    pub fn with_impersonation_groups(mut self, mode: ImpersonationGroups) -> Self {
        self.impersonation_groups = mode;
        self
    }

    /// Configured schemes in priority order
    pub fn schemes(&self) -> &[AuthType] {
        &self.schemes
    }

    /// Resolve the effective identity of a request
    pub async fn resolve(
        &self,
        request: &ProxyRequest,
        cancel: &CancellationToken,
    ) -> Result<Identity> {
        let identity = self.authenticate(request, cancel).await?;
        self.impersonate(identity, request, cancel).await
    }

    async fn authenticate(
        &self,
        request: &ProxyRequest,
        cancel: &CancellationToken,
    ) -> Result<Identity> {
        for scheme in &self.schemes {
            match scheme {
                AuthType::TlsCertificate => {
                    if let Some(chain) = request.client_certs() {
                        debug!("Authenticating with client certificate");
                        return identity_from_chain(chain);
                    }
                }
                AuthType::BearerToken => {
                    if let Some(token) = request.bearer_token() {
                        debug!("Authenticating with bearer token");
                        return self.review_token(token, cancel).await;
                    }
                }
            }
        }

        Err(Error::Unauthenticated(format!(
            "no credentials for any configured scheme ({})",
            self.schemes
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }

    async fn review_token(&self, token: &str, cancel: &CancellationToken) -> Result<Identity> {
        let Some(reviewer) = &self.token_reviewer else {
            return Ok(Identity::anonymous());
        };

        let status = cancellable(cancel, reviewer.review(token))
            .await
            .unwrap_or(Err(UpstreamError::Cancelled))
            .map_err(|e| Error::UpstreamUnavailable(format!("token review failed: {}", e)))?;

        identity_from_status(&status, token, self.username_claim.as_deref())
    }

    async fn impersonate(
        &self,
        identity: Identity,
        request: &ProxyRequest,
        cancel: &CancellationToken,
    ) -> Result<Identity> {
        let groups = request.impersonate_groups();
        let Some(user) = request.impersonate_user() else {
            if !groups.is_empty() {
                return Err(Error::Unauthenticated(
                    "group impersonation requires a user to impersonate".into(),
                ));
            }
            return Ok(identity);
        };

        self.ensure_may_impersonate(&identity, "users", user, cancel)
            .await?;
        for group in &groups {
            self.ensure_may_impersonate(&identity, "groups", group, cancel)
                .await?;
        }

        let impersonated = groups.iter().map(|g| g.to_string());
        let groups: BTreeSet<String> = match self.impersonation_groups {
            ImpersonationGroups::Union => identity.groups.into_iter().chain(impersonated).collect(),
            ImpersonationGroups::Replace => impersonated.collect(),
        };

        debug!(
            impersonator = %identity.username,
            user = %user,
            groups = ?groups,
            "Impersonation honored"
        );

        Ok(Identity {
            username: user.to_string(),
            groups,
        })
    }

    async fn ensure_may_impersonate(
        &self,
        identity: &Identity,
        resource: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let query = AccessQuery::new("impersonate", "", resource).named(name);
        if self.authorizer.check(identity, &query, cancel).await? {
            return Ok(());
        }

        warn!(
            user = %identity.username,
            resource = %resource,
            name = %name,
            "Impersonation denied"
        );
        Err(Error::Unauthenticated(format!(
            "{} is not allowed to impersonate {} {}",
            identity.username, resource, name
        )))
    }
}
