//! Subject resolver.
//!
//! Expands an authenticated user into the immutable, per-request set of
//! principals they carry: the user itself, every directory group they
//! belong to (recovering JIT-group principals from the
//! `jit.<env>.<system>.<name>@<domain>` naming scheme), and the
//! well-known `allAuthenticated` class.

use crate::acl::SubjectView;
use crate::id::{ClassId, GroupId, JitGroupId, Principal, UserId};
use crate::ports::DirectoryGroup;
use chrono::{DateTime, Utc};

/// A principal the subject carries, with its validity window. The user
/// principal and directory-group principals are open-ended (`not_after:
/// None`); JIT-group principals always carry a finite expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalGrant {
    pub principal: Principal,
    pub not_after: Option<DateTime<Utc>>,
}

impl PrincipalGrant {
    fn is_active(&self, now: DateTime<Utc>) -> bool {
        match self.not_after {
            Some(exp) => exp > now,
            None => true,
        }
    }
}

/// An immutable snapshot of one request's caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    user: UserId,
    principals: Vec<PrincipalGrant>,
}

impl Subject {
    pub fn user(&self) -> &UserId {
        &self.user
    }

    pub fn principals(&self) -> &[PrincipalGrant] {
        &self.principals
    }

    /// Build a subject from a resolved user plus their raw directory group
    /// memberships, recovering JIT-group principals and attaching validity.
    pub fn resolve(user: UserId, groups: &[DirectoryGroup]) -> Subject {
        let mut principals = vec![PrincipalGrant {
            principal: Principal::User(user.clone()),
            not_after: None,
        }];

        for group in groups {
            let local_part = group.email.split('@').next().unwrap_or(&group.email);
            if let Some(jit_id) = JitGroupId::parse_directory_local_part(local_part) {
                principals.push(PrincipalGrant {
                    principal: Principal::JitGroup(jit_id),
                    not_after: group.expires_at,
                });
            } else {
                principals.push(PrincipalGrant {
                    principal: Principal::Group(GroupId::new(&group.email)),
                    not_after: None,
                });
            }
        }

        principals.push(PrincipalGrant {
            principal: Principal::Class(ClassId::all_authenticated()),
            not_after: None,
        });

        Subject { user, principals }
    }
}

impl SubjectView for Subject {
    fn has_active(&self, principal: &Principal, now: DateTime<Utc>) -> bool {
        self.principals.iter().any(|g| &g.principal == principal && g.is_active(now))
    }

    fn is_user_backed(&self) -> bool {
        true
    }
}
