//! Error types for the tenant proxy
//!
//! Every error the request path can produce maps onto a Kubernetes `Status`
//! body, so clients such as kubectl render them like API server errors.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Result type for tenant proxy operations
pub type Result<T> = std::result::Result<T, Error>;

/// Resource identity attached to errors for diagnostics
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatusDetails {
    /// API group of the resource (empty for the core group)
    pub group: String,
    /// Plural resource kind, e.g. `storageclasses`
    pub kind: String,
    /// Object name when the request targeted a single object
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl StatusDetails {
    /// Details for a resource collection
    pub fn new(group: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            kind: kind.into(),
            name: None,
        }
    }

    /// Attach an object name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Error type for tenant proxy operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No credential scheme produced an identity
    #[error("authentication failed: {0}")]
    Unauthenticated(String),

    /// Identity has no tenant grant for the request
    #[error("{message}")]
    Forbidden {
        /// Human readable reason
        message: String,
        /// Resource the request targeted
        details: StatusDetails,
    },

    /// Named object is not visible (or does not exist)
    #[error("{message}")]
    NotFound {
        /// Human readable reason
        message: String,
        /// Resource the request targeted
        details: StatusDetails,
    },

    /// Malformed request or failed listing against the backing store
    #[error("{message}")]
    BadRequest {
        /// Human readable reason
        message: String,
        /// Resource the request targeted
        details: StatusDetails,
    },

    /// Authorization or token review subsystem could not be reached
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a forbidden error for a resource
    pub fn forbidden(message: impl Into<String>, details: StatusDetails) -> Self {
        Self::Forbidden {
            message: message.into(),
            details,
        }
    }

    /// Create a not found error for a resource
    pub fn not_found(message: impl Into<String>, details: StatusDetails) -> Self {
        Self::NotFound {
            message: message.into(),
            details,
        }
    }

    /// Create a bad request error for a resource
    pub fn bad_request(message: impl Into<String>, details: StatusDetails) -> Self {
        Self::BadRequest {
            message: message.into(),
            details,
        }
    }

    /// HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden { .. } => StatusCode::FORBIDDEN,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Config(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Kubernetes `Status.reason` for this error
    pub fn reason(&self) -> &'static str {
        match self {
            Error::Unauthenticated(_) => "Unauthorized",
            Error::Forbidden { .. } => "Forbidden",
            Error::NotFound { .. } => "NotFound",
            Error::BadRequest { .. } => "BadRequest",
            Error::UpstreamUnavailable(_) => "ServiceUnavailable",
            Error::Config(_) | Error::Internal(_) => "InternalError",
        }
    }

    /// Resource details, when the error concerns a specific resource
    pub fn details(&self) -> Option<&StatusDetails> {
        match self {
            Error::Forbidden { details, .. }
            | Error::NotFound { details, .. }
            | Error::BadRequest { details, .. } => Some(details),
            _ => None,
        }
    }

    /// Render as a Kubernetes `Status` object
    pub fn to_status(&self) -> serde_json::Value {
        let mut body = serde_json::json!({
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "message": self.to_string(),
            "reason": self.reason(),
            "code": self.status_code().as_u16()
        });
        if let Some(details) = self.details() {
            body["details"] = serde_json::to_value(details).unwrap_or_default();
        }
        body
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (self.status_code(), axum::Json(self.to_status())).into_response()
    }
}

/// Failure of an external collaborator call
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// Kubernetes API returned an error or could not be reached
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// The request was cancelled before the call completed
    #[error("request cancelled")]
    Cancelled,

    /// Any other transport failure
    #[error("{0}")]
    Transport(String),
}
