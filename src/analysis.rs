//! Policy analysis: given a policy node, a subject, and a required
//! permission mask, decides whether access is allowed and what constraints
//! still need satisfying.

use crate::acl::Acl;
use crate::constraint::{Check, Constraint, ConstraintClass, ConstraintSet, EvalContext};
use crate::error::{BrokerError, BrokerResult, DenialReason};
use crate::id::JitGroupId;
use crate::subject::Subject;
use chrono::Duration;
use std::collections::HashMap;

/// One analysis result for a `(policy, subject, targetGroup, requiredMask)`
/// tuple.
pub struct AnalysisResult<'a> {
    pub access_by_acl: bool,
    pub active_membership: Option<crate::id::Principal>,
    checks: Vec<Check<'a>>,
    pub satisfied: Vec<usize>,
    pub unsatisfied: Vec<usize>,
    pub failed: Vec<(usize, String)>,
}

impl<'a> AnalysisResult<'a> {
    pub fn satisfied_constraints(&self) -> Vec<&Constraint> {
        self.satisfied.iter().map(|&i| self.checks[i].constraint()).collect()
    }

    pub fn unsatisfied_constraints(&self) -> Vec<&Constraint> {
        self.unsatisfied.iter().map(|&i| self.checks[i].constraint()).collect()
    }

    pub fn failed_constraints(&self) -> Vec<(&Constraint, &str)> {
        self.failed.iter().map(|(i, diag)| (self.checks[*i].constraint(), diag.as_str())).collect()
    }

    /// The duration contributed by the Expiry constraint, if any was
    /// present among `satisfied`.
    pub fn chosen_expiry(&self) -> Option<Duration> {
        self.satisfied.iter().find_map(|&i| self.checks[i].extract_expiry())
    }

    pub fn is_access_allowed(&self, ignore_constraints: bool) -> bool {
        self.access_by_acl && (ignore_constraints || (self.unsatisfied.is_empty() && self.failed.is_empty()))
    }

    /// Raises a structured error if access isn't allowed; see
    /// [`AnalysisResult::is_access_allowed`] for the success condition.
    pub fn verify_access_allowed(&self, ignore_constraints: bool) -> BrokerResult<()> {
        if !self.access_by_acl {
            let reason = if self.active_membership.is_some() {
                DenialReason::AlreadyMember
            } else {
                DenialReason::NotAuthorized
            };
            return Err(BrokerError::access_denied(reason));
        }
        if ignore_constraints {
            return Ok(());
        }
        if !self.failed.is_empty() {
            let diags = self
                .failed
                .iter()
                .map(|(i, diag)| (self.checks[*i].constraint().name().to_string(), diag.clone()))
                .collect();
            return Err(BrokerError::ConstraintFailed(diags));
        }
        if self.unsatisfied.len() == 1 {
            let constraint = self.checks[self.unsatisfied[0]].constraint();
            return Err(BrokerError::ConstraintUnsatisfied {
                name: constraint.name().to_string(),
                message: constraint.display_name().to_string(),
            });
        }
        if !self.unsatisfied.is_empty() {
            return Err(BrokerError::access_denied(DenialReason::NotAuthorized));
        }
        Ok(())
    }
}

/// Materializes the input list for `class`'s constraints and binds caller
/// values, returning `Check` handles ready to `evaluate()`. Callers set
/// each check's inputs via [`crate::constraint::Check::input_mut`] before
/// calling [`execute`].
pub fn apply_constraints(constraints: &ConstraintSet, class: ConstraintClass) -> Vec<Check<'_>> {
    let list = match class {
        ConstraintClass::Join => &constraints.join,
        ConstraintClass::Approve => &constraints.approve,
    };
    list.iter().map(Constraint::create_check).collect()
}

/// Runs a policy analysis for a subject against an already-resolved
/// effective ACL/constraint set, scoped to the group being requested
/// (`target_group`) — `active_membership` only ever reports a membership
/// in that exact group, never in some other group the subject happens
/// to also hold.
pub fn execute<'a>(
    acl: &Acl,
    checks: Vec<Check<'a>>,
    subject: &Subject,
    required_mask: u32,
    target_group: &JitGroupId,
    ctx: &EvalContext,
    now: chrono::DateTime<chrono::Utc>,
) -> AnalysisResult<'a> {
    let access_by_acl = acl.is_allowed(subject, required_mask, now);

    let active_membership = subject
        .principals()
        .iter()
        .find(|g| matches!(&g.principal, crate::id::Principal::JitGroup(id) if id == target_group))
        .map(|g| g.principal.clone());

    let mut satisfied = Vec::new();
    let mut unsatisfied = Vec::new();
    let mut failed = Vec::new();

    for (i, check) in checks.iter().enumerate() {
        match check.evaluate(ctx) {
            crate::constraint::CheckResult::Satisfied => satisfied.push(i),
            crate::constraint::CheckResult::Unsatisfied => unsatisfied.push(i),
            crate::constraint::CheckResult::Failed(diag) => failed.push((i, diag)),
        }
    }

    AnalysisResult {
        access_by_acl,
        active_membership,
        checks,
        satisfied,
        unsatisfied,
        failed,
    }
}

/// Helper used by a caller that already knows the concrete input values to
/// supply (rather than binding them interactively): runs [`apply_constraints`]
/// then sets each declared input from `inputs`, ignoring any name absent
/// from the constraint's declared list (those inputs simply aren't used).
pub fn bind_inputs<'a>(mut checks: Vec<Check<'a>>, inputs: &HashMap<String, String>) -> Vec<Check<'a>> {
    for check in &mut checks {
        for input in check.inputs_mut() {
            if let Some(value) = inputs.get(input.name()) {
                let _ = input.set(value);
            }
        }
    }
    checks
}
