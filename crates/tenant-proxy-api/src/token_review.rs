//! Bearer token validation via Kubernetes TokenReview API
//!
//! Tokens are submitted to the TokenReview API; the API server decides
//! whether they are valid and who they belong to. When a username claim is
//! configured, the username is read from that claim of the (already
//! reviewed) JWT instead of the TokenReview user.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use k8s_openapi::api::authentication::v1::{TokenReview, TokenReviewSpec, TokenReviewStatus};
use kube::api::PostParams;
use kube::{Api, Client};
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use crate::error::{Error, Result, UpstreamError};
use crate::identity::Identity;

/// Token-review collaborator
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TokenReviewer: Send + Sync {
    /// Submit a token for review
    async fn review(&self, token: &str) -> std::result::Result<TokenReviewStatus, UpstreamError>;
}

/// TokenReview-backed reviewer
pub struct KubeTokenReviewer {
    /// Kubernetes client
    client: Client,
    /// Optional audiences to validate
    audiences: Option<Vec<String>>,
}

impl KubeTokenReviewer {
    /// Create a new reviewer
    pub fn new(client: Client) -> Self {
        Self {
            client,
            audiences: None,
        }
    }

    /// Create a reviewer with specific audiences
    pub fn with_audiences(client: Client, audiences: Vec<String>) -> Self {
        Self {
            client,
            audiences: Some(audiences),
        }
    }
}

#[async_trait]
impl TokenReviewer for KubeTokenReviewer {
    async fn review(&self, token: &str) -> std::result::Result<TokenReviewStatus, UpstreamError> {
        let api: Api<TokenReview> = Api::all(self.client.clone());

        let token_review = TokenReview {
            metadata: Default::default(),
            spec: TokenReviewSpec {
                token: Some(token.to_string()),
                audiences: self.audiences.clone(),
            },
            status: None,
        };

        let result = api.create(&PostParams::default(), &token_review).await?;

        Ok(result.status.unwrap_or_default())
    }
}

/// Turn a TokenReview status into an identity
///
/// A status reporting an error or an explicit `authenticated: false` is
/// rejected. A status carrying no decision yields the anonymous identity;
/// the username claim is only read from tokens the API server authenticated.
pub fn identity_from_status(
    status: &TokenReviewStatus,
    token: &str,
    username_claim: Option<&str>,
) -> Result<Identity> {
    if let Some(error) = status.error.as_deref().filter(|e| !e.is_empty()) {
        return Err(Error::Unauthenticated(format!(
            "cannot verify the token: {}",
            error
        )));
    }
    match status.authenticated {
        Some(true) => {}
        Some(false) => {
            return Err(Error::Unauthenticated("token was not authenticated".into()));
        }
        None => {
            debug!("TokenReview returned no decision, treating caller as anonymous");
            return Ok(Identity::anonymous());
        }
    }

    let user = status.user.clone().unwrap_or_default();
    let groups = user.groups.unwrap_or_default();

    let username = match username_claim {
        Some(claim) => claim_from_jwt(token, claim)?,
        None => user.username.unwrap_or_default(),
    };

    debug!(
        username = %username,
        groups = ?groups,
        "TokenReview resolved bearer token"
    );

    Ok(Identity::new(username, groups))
}

/// Read a string claim from the payload of a JWT without verifying it
///
/// Only call this for tokens the API server has already reviewed.
fn claim_from_jwt(token: &str, claim: &str) -> Result<String> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| Error::Unauthenticated("bearer token is not a JWT".into()))?;

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| Error::Unauthenticated(format!("malformed JWT payload: {}", e)))?;

    let claims: serde_json::Value = serde_json::from_slice(&bytes)
        .map_err(|e| Error::Unauthenticated(format!("malformed JWT claims: {}", e)))?;

    claims
        .get(claim)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| Error::Unauthenticated(format!("JWT has no string claim '{}'", claim)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::authentication::v1::UserInfo;

    fn jwt(claims: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{header}.{payload}.signature")
    }

    fn authenticated(username: &str, groups: &[&str]) -> TokenReviewStatus {
        TokenReviewStatus {
            authenticated: Some(true),
            user: Some(UserInfo {
                username: Some(username.to_string()),
                groups: Some(groups.iter().map(|g| g.to_string()).collect()),
                uid: None,
                extra: None,
            }),
            error: None,
            audiences: None,
        }
    }

    #[test]
    fn test_authenticated_status() {
        let status = authenticated(
            "system:serviceaccount:default:test-sa",
            &["system:serviceaccounts", "system:serviceaccounts:default"],
        );
        let identity = identity_from_status(&status, "opaque", None).unwrap();

        assert_eq!(identity.username, "system:serviceaccount:default:test-sa");
        assert!(identity.groups.contains("system:serviceaccounts:default"));
        assert_eq!(identity.groups.len(), 2);
    }

    #[test]
    fn test_status_error_is_unauthenticated() {
        let status = TokenReviewStatus {
            error: Some("token expired".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            identity_from_status(&status, "opaque", None),
            Err(Error::Unauthenticated(_))
        ));
    }

    #[test]
    fn test_explicitly_unauthenticated_is_rejected() {
        let status = TokenReviewStatus {
            authenticated: Some(false),
            ..Default::default()
        };
        assert!(identity_from_status(&status, "opaque", None).is_err());
    }

    #[test]
    fn test_undecided_status_is_anonymous() {
        let identity =
            identity_from_status(&TokenReviewStatus::default(), "asdf", None).unwrap();
        assert_eq!(identity.username, "");
        assert!(identity.groups.is_empty());
    }

    #[test]
    fn test_undecided_status_never_reads_claim() {
        let forged = format!(
            "{}.{}.x",
            URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#),
            URL_SAFE_NO_PAD.encode(br#"{"email":"cluster-admin@corp"}"#)
        );
        let undecided = TokenReviewStatus {
            user: Some(UserInfo {
                username: Some("cluster-admin".to_string()),
                groups: Some(vec!["system:masters".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        };

        for status in [TokenReviewStatus::default(), undecided] {
            let identity = identity_from_status(&status, &forged, Some("email")).unwrap();
            assert_eq!(identity, Identity::anonymous());
        }
    }

    #[test]
    fn test_username_from_claim() {
        let token = jwt(serde_json::json!({"sub": "123", "email": "alice@example.com"}));
        let status = authenticated("oidc:123", &["oidc:devs"]);

        let identity = identity_from_status(&status, &token, Some("email")).unwrap();
        assert_eq!(identity.username, "alice@example.com");
        assert!(identity.groups.contains("oidc:devs"));
    }

    #[test]
    fn test_missing_claim_is_unauthenticated() {
        let token = jwt(serde_json::json!({"sub": "123"}));
        let status = authenticated("oidc:123", &[]);

        assert!(matches!(
            identity_from_status(&status, &token, Some("email")),
            Err(Error::Unauthenticated(_))
        ));
    }

    #[test]
    fn test_claim_from_opaque_token_fails() {
        assert!(claim_from_jwt("opaque-token", "sub").is_err());
    }
}
