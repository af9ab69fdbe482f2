//! Join/Approve operations.
//!
//! A Join moves `Created -> Input-bound -> {Committed | Proposed}`; an
//! Approve moves a `Proposed` token's carried request to `Committed`.
//! Both are modeled as straight-line async functions rather than an
//! explicit state object — the only state worth keeping across await
//! points is the [`JoinState`] terminal outcome.

use crate::acl::{permission, Acl, SubjectView};
use crate::analysis::{self, apply_constraints, bind_inputs};
use crate::config::BrokerConfig;
use crate::constraint::{ConstraintClass, EvalContext};
use crate::error::{BrokerError, BrokerResult, DenialReason};
use crate::id::{JitGroupId, Principal};
use crate::policy_tree::EnvironmentPolicy;
use crate::ports::{DirectoryPort, MembershipRef, NotifierPort, ProvisioningPort, SignedToken, SignerPort};
use crate::cache::SubjectCache;
use crate::replay::{ReplaySet, ReplayStatus};
use crate::subject::Subject;
use crate::token::ProposalPayload;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// The terminal state of a Join or Approve operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinState {
    Committed(MembershipRef),
    Proposed(SignedToken),
}

fn eval_context(subject: &Subject, env_name: &str, sys_name: &str, grp_name: &str) -> EvalContext {
    EvalContext {
        subject_email: subject.user().as_str().to_string(),
        subject_principals: subject.principals().iter().map(|g| g.principal.canonical()).collect(),
        group_environment: env_name.to_string(),
        group_system: sys_name.to_string(),
        group_name: grp_name.to_string(),
    }
}

/// Runs the Join operation for `(env_name, sys_name, grp_name)`.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn execute_join(
    env: &EnvironmentPolicy,
    sys_name: &str,
    grp_name: &str,
    subject: &Subject,
    inputs: &HashMap<String, String>,
    signer: &dyn SignerPort,
    provisioner: &dyn ProvisioningPort,
    notifier: &dyn NotifierPort,
    config: &BrokerConfig,
    now: DateTime<Utc>,
) -> BrokerResult<JoinState> {
    let (_, acl, constraints) = env.resolve_group(sys_name, grp_name).ok_or(BrokerError::ResourceNotFound)?;
    if !acl.is_allowed(subject, permission::VIEW, now) {
        // Hidden from this subject: report the same as "doesn't exist".
        return Err(BrokerError::ResourceNotFound);
    }

    let group_id = JitGroupId::new(&env.name, sys_name, grp_name);
    let ctx = eval_context(subject, &env.name, sys_name, grp_name);
    let checks = bind_inputs(apply_constraints(&constraints, ConstraintClass::Join), inputs);
    let result = analysis::execute(&acl, checks, subject, permission::JOIN, &group_id, &ctx, now);
    result.verify_access_allowed(false)?;

    // No Expiry constraint declared on this group: fall back to a fixed
    // one-hour membership, independent of the proposal token's own TTL.
    let chosen_expiry = result.chosen_expiry().unwrap_or_else(|| chrono::Duration::hours(1));

    if acl.is_allowed(subject, permission::APPROVE_SELF, now) {
        let membership = provisioner.provision(subject.user(), &group_id, now + chosen_expiry, "self-approved join").await?;
        tracing::info!(user = %subject.user(), group = %group_id, "join committed (self-approved)");
        return Ok(JoinState::Committed(membership));
    }

    let recipients = recipients_for(&acl, &group_id)?;
    let payload = ProposalPayload::new(
        "jit-broker",
        "jit-broker-clients",
        subject.user(),
        &group_id,
        &recipients,
        inputs.clone().into_iter().collect(),
        now,
        now + config.proposal_ttl,
    );
    let signed = signer.sign(&payload, now + config.proposal_ttl).await?;
    notifier.notify_proposal_created(&recipients, &group_id).await?;
    tracing::info!(user = %subject.user(), group = %group_id, recipients = recipients.len(), "join proposed");
    Ok(JoinState::Proposed(signed))
}

fn recipients_for(acl: &Acl, group_id: &JitGroupId) -> BrokerResult<Vec<Principal>> {
    let recipients: Vec<Principal> = acl.allowed_principals(permission::APPROVE_OTHERS).into_iter().collect();
    if recipients.is_empty() {
        tracing::warn!(group = %group_id, "join denied: no approver available");
        return Err(BrokerError::access_denied(DenialReason::Other("no approver available for this group".to_string())));
    }
    Ok(recipients)
}

/// Runs the Approve operation against an already signature-verified
/// `payload`. The original requester's subject is recomputed as of `now`
/// (not trusted from the token) so a right revoked since the proposal was
/// issued is honored.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn execute_approve(
    env: &EnvironmentPolicy,
    group_id: &JitGroupId,
    approver: &Subject,
    payload: ProposalPayload,
    provisioner: &dyn ProvisioningPort,
    replay: &ReplaySet,
    subject_cache: &SubjectCache,
    directory: &dyn DirectoryPort,
    now: DateTime<Utc>,
) -> BrokerResult<JoinState> {
    let expiry = payload
        .expiry()
        .ok_or_else(|| BrokerError::invalid_argument("token", "malformed expiry"))?;
    if expiry <= now {
        return Err(BrokerError::access_denied(DenialReason::Other("proposal expired".to_string())));
    }

    match replay.check_and_reserve(&payload.jti, now) {
        ReplayStatus::AlreadyCommitted(membership) => return Ok(JoinState::Committed(membership)),
        ReplayStatus::InFlight => return Err(BrokerError::access_denied(DenialReason::AlreadyProcessed)),
        ReplayStatus::Fresh => {}
    }

    match approve_inner(env, group_id, approver, &payload, expiry, provisioner, subject_cache, directory, now).await {
        Ok(membership) => {
            replay.record_outcome(&payload.jti, membership.clone(), now);
            tracing::info!(group = %group_id, jti = %payload.jti, "approve committed");
            Ok(JoinState::Committed(membership))
        }
        Err(e) => {
            replay.release(&payload.jti);
            Err(e)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn approve_inner(
    env: &EnvironmentPolicy,
    group_id: &JitGroupId,
    approver: &Subject,
    payload: &ProposalPayload,
    token_expiry: DateTime<Utc>,
    provisioner: &dyn ProvisioningPort,
    subject_cache: &SubjectCache,
    directory: &dyn DirectoryPort,
    now: DateTime<Utc>,
) -> BrokerResult<MembershipRef> {
    let (_, acl, constraints) = env
        .resolve_group(&group_id.system, &group_id.name)
        .ok_or(BrokerError::ResourceNotFound)?;

    let recipients: Vec<Principal> = payload.rcp.iter().filter_map(|s| Principal::parse(s)).collect();
    let approver_is_recipient = recipients.iter().any(|p| approver.has_active(p, now));
    if !approver_is_recipient || !acl.is_allowed(approver, permission::APPROVE_OTHERS, now) {
        tracing::warn!(group = %group_id, approver = %approver.user(), "approve denied: not an authorized recipient");
        return Err(BrokerError::access_denied(DenialReason::NotAuthorized));
    }

    let requester_id = crate::id::UserId::new(payload.usr.strip_prefix("user:").unwrap_or(&payload.usr));
    let requester = subject_cache.get(&requester_id, directory, now).await?;

    let ctx = eval_context(&requester, &group_id.environment, &group_id.system, &group_id.name);
    let checks = bind_inputs(apply_constraints(&constraints, ConstraintClass::Join), &payload.inp);
    let result = analysis::execute(&acl, checks, &requester, permission::JOIN, group_id, &ctx, now);
    result.verify_access_allowed(false)?;

    let chosen_expiry = result.chosen_expiry().unwrap_or(chrono::Duration::hours(1));
    let expiry = token_expiry.min(now + chosen_expiry);
    provisioner.provision(&requester_id, group_id, expiry, "peer-approved join").await
}
