//! Policy tree.
//!
//! The tree is an owning hierarchy (`Environment` owns its `System`s, each
//! `System` owns its `JitGroup`s) rather than one built from back-pointers —
//! Rust's move semantics already give us the "parent link is single
//! assignment" invariant for free: a child can only ever be inserted into
//! one map. Effective ACL/constraints are computed on read by threading the
//! parent's already-computed effective value down through `effective_*`,
//! exactly as effective values are meant to be computed: on read.

use crate::acl::Acl;
use crate::constraint::Constraint;
use crate::id::{is_valid_name, RoleId};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("invalid name `{0}`")]
    InvalidName(String),
    #[error("duplicate sibling name `{0}`")]
    DuplicateSibling(String),
    #[error("child name `{0}` equals its parent's name")]
    ChildEqualsParent(String),
}

/// `{join, approve}` constraint lists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstraintSet {
    pub join: Vec<Constraint>,
    pub approve: Vec<Constraint>,
}

impl ConstraintSet {
    /// Merge `child` over `self` (the parent's already-effective set):
    /// parent entries first, then for every constraint in `child`, override
    /// in place by `name` if present, else append.
    pub fn merge_child(&self, child: &ConstraintSet) -> ConstraintSet {
        ConstraintSet {
            join: merge_by_name(&self.join, &child.join),
            approve: merge_by_name(&self.approve, &child.approve),
        }
    }
}

fn merge_by_name(parent: &[Constraint], child: &[Constraint]) -> Vec<Constraint> {
    let mut out = parent.to_vec();
    for c in child {
        if let Some(slot) = out.iter_mut().find(|existing| existing.name() == c.name()) {
            *slot = c.clone();
        } else {
            out.push(c.clone());
        }
    }
    out
}

/// `{source, lastModified, version?, defaultName?}`, attached to
/// the environment root and readable from any descendant.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyMetadata {
    pub source: String,
    pub last_modified: DateTime<Utc>,
    pub version: Option<String>,
    pub default_name: Option<String>,
}

/// `(resource, role, description?, condition?)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Privilege {
    pub resource: crate::id::ResourceId,
    pub role: RoleId,
    pub description: Option<String>,
    pub condition: Option<String>,
}

impl Privilege {
    /// Two privileges are equivalent iff all four fields match; this is a
    /// stable 32-bit checksum over that tuple, used to dedupe a
    /// group's privilege list without relying on `Hash` bucket order.
    pub fn checksum(&self) -> u32 {
        let mut buf = String::new();
        buf.push_str(self.resource.as_str());
        buf.push('\0');
        buf.push_str(self.role.as_str());
        buf.push('\0');
        buf.push_str(self.description.as_deref().unwrap_or(""));
        buf.push('\0');
        buf.push_str(self.condition.as_deref().unwrap_or(""));
        crc32(buf.as_bytes())
    }
}

/// Minimal CRC-32 (IEEE 802.3 polynomial), table-free — privilege lists are
/// short so the per-byte loop is fine and it avoids another dependency.
fn crc32(bytes: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for &b in bytes {
        crc ^= b as u32;
        for _ in 0..8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ 0xEDB8_8320 } else { crc >> 1 };
        }
    }
    !crc
}

fn validate_child_name(child: &str, parent: &str) -> Result<(), TreeError> {
    if !is_valid_name(child) {
        return Err(TreeError::InvalidName(child.to_string()));
    }
    if child == parent {
        return Err(TreeError::ChildEqualsParent(child.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct JitGroupPolicy {
    pub name: String,
    pub description: String,
    pub acl: Acl,
    pub constraints: ConstraintSet,
    pub privileges: Vec<Privilege>,
}

impl JitGroupPolicy {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Result<Self, TreeError> {
        let name = name.into();
        if !is_valid_name(&name) {
            return Err(TreeError::InvalidName(name));
        }
        Ok(JitGroupPolicy {
            name,
            description: description.into(),
            acl: Acl::default(),
            constraints: ConstraintSet::default(),
            privileges: Vec::new(),
        })
    }

    pub fn effective_acl(&self, parent_effective: &Acl) -> Acl {
        Acl::extend_from_parent(parent_effective, &self.acl)
    }

    pub fn effective_constraints(&self, parent_effective: &ConstraintSet) -> ConstraintSet {
        parent_effective.merge_child(&self.constraints)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SystemPolicy {
    pub name: String,
    pub description: String,
    pub acl: Acl,
    pub constraints: ConstraintSet,
    groups: BTreeMap<String, JitGroupPolicy>,
}

impl SystemPolicy {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Result<Self, TreeError> {
        let name = name.into();
        if !is_valid_name(&name) {
            return Err(TreeError::InvalidName(name));
        }
        Ok(SystemPolicy {
            name,
            description: description.into(),
            acl: Acl::default(),
            constraints: ConstraintSet::default(),
            groups: BTreeMap::new(),
        })
    }

    pub fn add_group(&mut self, group: JitGroupPolicy) -> Result<(), TreeError> {
        validate_child_name(&group.name, &self.name)?;
        if self.groups.contains_key(&group.name) {
            return Err(TreeError::DuplicateSibling(group.name));
        }
        self.groups.insert(group.name.clone(), group);
        Ok(())
    }

    pub fn group(&self, name: &str) -> Option<&JitGroupPolicy> {
        self.groups.get(name)
    }

    pub fn groups(&self) -> impl Iterator<Item = &JitGroupPolicy> {
        self.groups.values()
    }

    pub fn effective_acl(&self, parent_effective: &Acl) -> Acl {
        Acl::extend_from_parent(parent_effective, &self.acl)
    }

    pub fn effective_constraints(&self, parent_effective: &ConstraintSet) -> ConstraintSet {
        parent_effective.merge_child(&self.constraints)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentPolicy {
    pub name: String,
    pub description: String,
    pub acl: Acl,
    pub constraints: ConstraintSet,
    pub metadata: PolicyMetadata,
    systems: BTreeMap<String, SystemPolicy>,
}

impl EnvironmentPolicy {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        metadata: PolicyMetadata,
    ) -> Result<Self, TreeError> {
        let name = name.into();
        if !is_valid_name(&name) {
            return Err(TreeError::InvalidName(name));
        }
        Ok(EnvironmentPolicy {
            name,
            description: description.into(),
            acl: Acl::default(),
            constraints: ConstraintSet::default(),
            metadata,
            systems: BTreeMap::new(),
        })
    }

    pub fn add_system(&mut self, system: SystemPolicy) -> Result<(), TreeError> {
        validate_child_name(&system.name, &self.name)?;
        if self.systems.contains_key(&system.name) {
            return Err(TreeError::DuplicateSibling(system.name));
        }
        self.systems.insert(system.name.clone(), system);
        Ok(())
    }

    pub fn system(&self, name: &str) -> Option<&SystemPolicy> {
        self.systems.get(name)
    }

    pub fn systems(&self) -> impl Iterator<Item = &SystemPolicy> {
        self.systems.values()
    }

    /// The root has no parent: its own ACL is already effective.
    pub fn effective_acl(&self) -> &Acl {
        &self.acl
    }

    pub fn effective_constraints(&self) -> &ConstraintSet {
        &self.constraints
    }

    /// Walk down to a `(system, group)` pair, returning the fully-composed
    /// effective ACL and constraints for the group, or `None` if either
    /// segment is absent.
    pub fn resolve_group(&self, system: &str, group: &str) -> Option<(&JitGroupPolicy, Acl, ConstraintSet)> {
        let sys = self.system(system)?;
        let grp = sys.group(group)?;
        let sys_acl = sys.effective_acl(self.effective_acl());
        let sys_constraints = sys.effective_constraints(self.effective_constraints());
        let group_acl = grp.effective_acl(&sys_acl);
        let group_constraints = grp.effective_constraints(&sys_constraints);
        Some((grp, group_acl, group_constraints))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::permission;
    use crate::id::{Principal, UserId};

    fn metadata() -> PolicyMetadata {
        PolicyMetadata {
            source: "test".into(),
            last_modified: Utc::now(),
            version: None,
            default_name: None,
        }
    }

    fn user(email: &str) -> Principal {
        Principal::User(UserId::new(email))
    }

    #[test]
    fn add_system_rejects_duplicate_and_self_named_children() {
        let mut env = EnvironmentPolicy::new("prod", "Prod", metadata()).unwrap();
        env.add_system(SystemPolicy::new("billing", "Billing").unwrap()).unwrap();
        assert_eq!(
            env.add_system(SystemPolicy::new("billing", "dup").unwrap()),
            Err(TreeError::DuplicateSibling("billing".into()))
        );
        assert_eq!(
            env.add_system(SystemPolicy::new("prod", "self-named").unwrap()),
            Err(TreeError::ChildEqualsParent("prod".into()))
        );
    }

    #[test]
    fn effective_acl_composes_parent_then_child_in_order() {
        let mut env = EnvironmentPolicy::new("prod", "Prod", metadata()).unwrap();
        env.acl = Acl::builder().allow(user("alice@example.com"), permission::VIEW).build();
        let mut sys = SystemPolicy::new("billing", "Billing").unwrap();
        sys.acl = Acl::builder().deny(user("alice@example.com"), permission::VIEW).build();
        let mut grp = JitGroupPolicy::new("g-admin", "Admins").unwrap();
        grp.acl = Acl::builder().allow(user("bob@example.com"), permission::JOIN).build();
        sys.add_group(grp).unwrap();
        env.add_system(sys).unwrap();

        let (_, acl, _) = env.resolve_group("billing", "g-admin").unwrap();
        assert_eq!(acl.entries().len(), 3);
        assert!(!acl.is_allowed(
            &FixedSubject { active: vec![user("alice@example.com")] },
            permission::VIEW,
            Utc::now()
        ));
    }

    struct FixedSubject {
        active: Vec<Principal>,
    }
    impl crate::acl::SubjectView for FixedSubject {
        fn has_active(&self, principal: &Principal, _now: DateTime<Utc>) -> bool {
            self.active.contains(principal)
        }
        fn is_user_backed(&self) -> bool {
            true
        }
    }

    #[test]
    fn effective_constraints_override_by_name_and_append_new() {
        use crate::constraint::Constraint;
        use chrono::Duration;

        let mut env = EnvironmentPolicy::new("prod", "Prod", metadata()).unwrap();
        env.constraints.join.push(Constraint::Expiry {
            display_name: "Expiry".into(),
            min_dur: Duration::minutes(5),
            max_dur: Duration::hours(4),
        });
        let mut sys = SystemPolicy::new("billing", "Billing").unwrap();
        // Narrower override of the same (reserved) name.
        sys.constraints.join.push(Constraint::Expiry {
            display_name: "Expiry".into(),
            min_dur: Duration::minutes(5),
            max_dur: Duration::hours(1),
        });
        sys.constraints.join.push(Constraint::Expression {
            name: "needs-ticket".into(),
            display_name: "Needs ticket".into(),
            variables: vec![],
            expression: "true".into(),
        });

        let effective = sys.effective_constraints(env.effective_constraints());
        assert_eq!(effective.join.len(), 2);
        assert!(matches!(effective.join[0], Constraint::Expiry { max_dur, .. } if max_dur == Duration::hours(1)));
        assert_eq!(effective.join[1].name(), "needs-ticket");
    }

    #[test]
    fn privilege_checksum_distinguishes_tuples() {
        let a = Privilege {
            resource: crate::id::ResourceId::from_project("p1"),
            role: RoleId::parse("roles/viewer").unwrap(),
            description: None,
            condition: None,
        };
        let mut b = a.clone();
        b.description = Some("different".into());
        assert_ne!(a.checksum(), b.checksum());
        assert_eq!(a.checksum(), a.clone().checksum());
    }
}
