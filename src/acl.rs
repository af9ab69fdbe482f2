//! ACL engine.
//!
//! An ACL is an ordered sequence of allow/deny entries over a permission
//! bitmask. Evaluation is order-independent per entry but the entry list
//! itself is preserved in document order so diagnostics and effective-ACL
//! composition stay deterministic across reloads.

use crate::id::Principal;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// Named permission bits.
pub mod permission {
    pub const VIEW: u32 = 1 << 0;
    pub const JOIN: u32 = 1 << 1;
    pub const APPROVE_SELF: u32 = 1 << 2;
    pub const APPROVE_OTHERS: u32 = 1 << 3;
    pub const EXPORT: u32 = 1 << 4;

    /// Parse a comma-separated list of permission names (case-insensitive).
    pub fn parse_mask(list: &str) -> Result<u32, String> {
        let mut mask = 0u32;
        for tok in list.split(',') {
            let tok = tok.trim();
            if tok.is_empty() {
                continue;
            }
            mask |= match tok.to_ascii_uppercase().as_str() {
                "VIEW" => VIEW,
                "JOIN" => JOIN,
                "APPROVE_SELF" => APPROVE_SELF,
                "APPROVE_OTHERS" => APPROVE_OTHERS,
                "EXPORT" => EXPORT,
                other => return Err(format!("unknown permission `{other}`")),
            };
        }
        Ok(mask)
    }

    pub fn format_mask(mask: u32) -> String {
        let mut names = Vec::new();
        if mask & VIEW != 0 {
            names.push("VIEW");
        }
        if mask & JOIN != 0 {
            names.push("JOIN");
        }
        if mask & APPROVE_SELF != 0 {
            names.push("APPROVE_SELF");
        }
        if mask & APPROVE_OTHERS != 0 {
            names.push("APPROVE_OTHERS");
        }
        if mask & EXPORT != 0 {
            names.push("EXPORT");
        }
        names.join(", ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Allow,
    Deny,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclEntry {
    pub effect: Effect,
    pub principal: Principal,
    pub mask: u32,
}

/// What an ACL evaluator needs from a subject: whether it carries an
/// active (non-expired) instance of a given principal at a point in time,
/// and whether it represents an authenticated end user at all.
///
/// Kept as a trait (rather than depending on `crate::subject::Subject`
/// directly) so the ACL engine has no upward dependency on the subject
/// resolver — it only needs this narrow view.
pub trait SubjectView {
    fn has_active(&self, principal: &Principal, now: DateTime<Utc>) -> bool;
    fn is_user_backed(&self) -> bool;
}

fn matches<S: SubjectView + ?Sized>(entry_principal: &Principal, subject: &S, now: DateTime<Utc>) -> bool {
    if let Principal::Class(c) = entry_principal {
        if c.as_str() == crate::id::ClassId::ALL_AUTHENTICATED {
            // Matches every user-backed subject regardless of groups.
            return subject.is_user_backed();
        }
    }
    subject.has_active(entry_principal, now)
}

/// An ordered ACL: deny/allow entries over a permission bitmask.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Acl {
    entries: Vec<AclEntry>,
}

impl Acl {
    pub fn builder() -> AclBuilder {
        AclBuilder::default()
    }

    pub fn entries(&self) -> &[AclEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evaluation algorithm:
    /// 1. accumulate allow-bits and deny-bits separately over matching entries
    /// 2. effective = allow & !deny
    /// 3. allow iff (effective & required) == required
    pub fn is_allowed<S: SubjectView + ?Sized>(&self, subject: &S, required: u32, now: DateTime<Utc>) -> bool {
        let (allow_bits, deny_bits) = self.accumulate(subject, now);
        let effective = allow_bits & !deny_bits;
        (effective & required) == required
    }

    fn accumulate<S: SubjectView + ?Sized>(&self, subject: &S, now: DateTime<Utc>) -> (u32, u32) {
        let mut allow_bits = 0u32;
        let mut deny_bits = 0u32;
        for entry in &self.entries {
            if !matches(&entry.principal, subject, now) {
                continue;
            }
            match entry.effect {
                Effect::Allow => allow_bits |= entry.mask,
                Effect::Deny => deny_bits |= entry.mask,
            }
        }
        (allow_bits, deny_bits)
    }

    /// Principals whose own allow/deny bits (ignoring any particular subject)
    /// cover `required`, used to compute proposal recipients.
    pub fn allowed_principals(&self, required: u32) -> HashSet<Principal> {
        let mut allow: std::collections::HashMap<&Principal, u32> = std::collections::HashMap::new();
        let mut deny: std::collections::HashMap<&Principal, u32> = std::collections::HashMap::new();
        for entry in &self.entries {
            let map = match entry.effect {
                Effect::Allow => &mut allow,
                Effect::Deny => &mut deny,
            };
            *map.entry(&entry.principal).or_insert(0) |= entry.mask;
        }
        allow
            .into_iter()
            .filter_map(|(principal, allow_mask)| {
                let deny_mask = deny.get(principal).copied().unwrap_or(0);
                let effective = allow_mask & !deny_mask;
                if (effective & required) == required {
                    Some(principal.clone())
                } else {
                    None
                }
            })
            .collect()
    }

    /// Effective ACL: `parent.effectiveACL ++ child.acl`,
    /// parent entries first, order preserved.
    pub fn extend_from_parent(parent: &Acl, child: &Acl) -> Acl {
        let mut entries = parent.entries.clone();
        entries.extend(child.entries.iter().cloned());
        Acl { entries }
    }
}

#[derive(Debug, Default)]
pub struct AclBuilder {
    entries: Vec<AclEntry>,
}

impl AclBuilder {
    pub fn allow(mut self, principal: Principal, mask: u32) -> Self {
        self.entries.push(AclEntry {
            effect: Effect::Allow,
            principal,
            mask,
        });
        self
    }

    pub fn deny(mut self, principal: Principal, mask: u32) -> Self {
        self.entries.push(AclEntry {
            effect: Effect::Deny,
            principal,
            mask,
        });
        self
    }

    pub fn build(self) -> Acl {
        Acl {
            entries: self.entries,
        }
    }
}
