//! Top-level error type for the broker core.
//!
//! A closed set of tagged error kinds that
//! the HTTP boundary (out of scope here) maps onto status codes.

use crate::codec::Diagnostic;

/// Why access was denied. Only ever reveals membership state, never the
/// existence of a resource the subject cannot view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenialReason {
    /// The subject already holds an active (possibly expiring) membership.
    AlreadyMember,
    /// The subject is not authorized at all.
    NotAuthorized,
    /// A single unsatisfied constraint carried a user-facing message.
    Constraint(String),
    /// A token or approval was already processed.
    AlreadyProcessed,
    /// Free-form reason for cases not covered above (e.g. no approver exists).
    Other(String),
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenialReason::AlreadyMember => write!(f, "already a member"),
            DenialReason::NotAuthorized => write!(f, "not authorized"),
            DenialReason::Constraint(msg) => write!(f, "{msg}"),
            DenialReason::AlreadyProcessed => write!(f, "already processed"),
            DenialReason::Other(msg) => write!(f, "{msg}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("policy document invalid: {0:?}")]
    Parse(Vec<Diagnostic>),

    #[error("invalid argument `{field}`: {reason}")]
    InvalidArgument { field: String, reason: String },

    #[error("access denied: {reason}")]
    AccessDenied { reason: DenialReason },

    #[error("constraint `{name}` unsatisfied: {message}")]
    ConstraintUnsatisfied { name: String, message: String },

    #[error("{} constraint(s) failed", .0.len())]
    ConstraintFailed(Vec<(String, String)>),

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("resource not found")]
    ResourceNotFound,

    #[error("upstream error: {0}")]
    UpstreamIo(String),
}

impl BrokerError {
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        BrokerError::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn access_denied(reason: DenialReason) -> Self {
        BrokerError::AccessDenied { reason }
    }
}

pub type BrokerResult<T> = Result<T, BrokerError>;
