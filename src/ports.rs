//! External collaborator interfaces.
//!
//! The broker core performs no I/O itself: every suspension point
//! is a call through one of these traits. All are `async_trait` so a
//! concrete implementation can freely do network/database work; the core
//! only ever depends on the trait object.

use crate::error::BrokerResult;
use crate::id::UserId;
use crate::token::ProposalPayload;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// One of the authenticated user's direct directory group memberships, as
/// returned by the directory lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryGroup {
    /// The group's email address, e.g. `jit.env-1.sys-1.g-admin@example.com`
    /// or `approvers@example.com`.
    pub email: String,
    /// Present only for memberships the directory itself expires (JIT-group
    /// memberships); `None` for ordinary directory groups.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Resolves a user's direct group memberships.
#[async_trait]
pub trait DirectoryPort: Send + Sync {
    async fn groups_for(&self, user: &UserId) -> BrokerResult<Vec<DirectoryGroup>>;
}

/// A signed, opaque proposal token plus its issuance bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedToken {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expiry: DateTime<Utc>,
}

/// Signs and verifies proposal tokens. The broker never holds the signing
/// key itself — only a handle through this port.
#[async_trait]
pub trait SignerPort: Send + Sync {
    async fn sign(&self, payload: &ProposalPayload, expiry: DateTime<Utc>) -> BrokerResult<SignedToken>;
    async fn verify(&self, token: &str) -> BrokerResult<ProposalPayload>;
}

/// A handle the provisioning port returns for a committed membership
///. Opaque to the core; carried only for the caller's own
/// bookkeeping/logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipRef(pub String);

/// Commits a membership with an external directory/IAM system
///. Exactly one call per distinct proposal `jti` for
/// approvals; at most one per request for self-approved joins.
#[async_trait]
pub trait ProvisioningPort: Send + Sync {
    async fn provision(
        &self,
        user: &UserId,
        group: &crate::id::JitGroupId,
        expiry: DateTime<Utc>,
        justification: &str,
    ) -> BrokerResult<MembershipRef>;
}

/// Notifies recipients that a proposal needs their attention. Kept as a
/// minimal, best-effort seam rather than something more elaborate — delivery
/// semantics (mail vs. pub/sub, retries) are an embedding concern.
#[async_trait]
pub trait NotifierPort: Send + Sync {
    async fn notify_proposal_created(&self, recipients: &[crate::id::Principal], group: &crate::id::JitGroupId) -> BrokerResult<()>;
}
