//! Catalog: the user-facing read model over the policy tree.
//!
//! Every lookup resolves visibility first — a node the subject cannot
//! `VIEW` comes back as `None`, the same as a node that doesn't exist, so
//! a caller can never distinguish "absent" from "hidden" and enumerate
//! names by probing.

use crate::acl::{permission, Acl};
use crate::cache::SubjectCache;
use crate::config::BrokerConfig;
use crate::error::BrokerResult;
use crate::id::{JitGroupId, Principal, UserId};
use crate::join::{self, JoinState};
use crate::policy_tree::EnvironmentPolicy;
use crate::ports::{DirectoryPort, NotifierPort, ProvisioningPort, SignerPort};
use crate::replay::ReplaySet;
use crate::subject::Subject;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// A read-only projection of an environment for listing.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentView {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SystemView {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupView {
    pub name: String,
    pub description: String,
    pub can_join: bool,
    pub can_approve: bool,
}

/// One entry of [`Catalog::list_memberships`]: a JIT-group principal the
/// subject currently carries, with its expiry.
#[derive(Debug, Clone, PartialEq)]
pub struct MembershipView {
    pub group: JitGroupId,
    pub expires_at: Option<DateTime<Utc>>,
}

type PolicySnapshot = Arc<BTreeMap<String, EnvironmentPolicy>>;

/// The catalog owns the current policy snapshot plus every external
/// collaborator a Join/Approve operation needs; it is the sole entry
/// point a host binds its HTTP/RPC surface to.
pub struct Catalog {
    environments: RwLock<PolicySnapshot>,
    subject_cache: SubjectCache,
    replay: ReplaySet,
    directory: Arc<dyn DirectoryPort>,
    signer: Arc<dyn SignerPort>,
    provisioner: Arc<dyn ProvisioningPort>,
    notifier: Arc<dyn NotifierPort>,
    config: BrokerConfig,
}

impl Catalog {
    pub fn new(
        environments: BTreeMap<String, EnvironmentPolicy>,
        directory: Arc<dyn DirectoryPort>,
        signer: Arc<dyn SignerPort>,
        provisioner: Arc<dyn ProvisioningPort>,
        notifier: Arc<dyn NotifierPort>,
        config: BrokerConfig,
    ) -> Self {
        Catalog {
            environments: RwLock::new(Arc::new(environments)),
            subject_cache: SubjectCache::new(config.subject_cache_ttl),
            replay: ReplaySet::new(config.replay_window),
            directory,
            signer,
            provisioner,
            notifier,
            config,
        }
    }

    /// Atomically replace the policy snapshot. Readers already holding a
    /// clone of the previous `Arc` keep seeing it for the rest of their
    /// request.
    pub fn reload(&self, environments: BTreeMap<String, EnvironmentPolicy>) {
        let count = environments.len();
        *self.environments.write() = Arc::new(environments);
        tracing::info!(count, "policy reloaded");
    }

    fn snapshot(&self) -> PolicySnapshot {
        self.environments.read().clone()
    }

    pub async fn resolve_subject(&self, user: &UserId, now: DateTime<Utc>) -> BrokerResult<Subject> {
        self.subject_cache.get(user, self.directory.as_ref(), now).await
    }

    pub fn invalidate_subject(&self, user: &UserId) {
        self.subject_cache.invalidate(user);
    }

    pub fn list_environments(&self, subject: &Subject, now: DateTime<Utc>) -> Vec<EnvironmentView> {
        self.snapshot()
            .values()
            .filter(|env| env.effective_acl().is_allowed(subject, permission::VIEW, now))
            .map(|env| EnvironmentView {
                name: env.name.clone(),
                description: env.description.clone(),
            })
            .collect()
    }

    pub fn environment(&self, subject: &Subject, name: &str, now: DateTime<Utc>) -> Option<EnvironmentView> {
        let snapshot = self.snapshot();
        let env = snapshot.get(name)?;
        if !env.effective_acl().is_allowed(subject, permission::VIEW, now) {
            return None;
        }
        Some(EnvironmentView {
            name: env.name.clone(),
            description: env.description.clone(),
        })
    }

    pub fn system(&self, subject: &Subject, env_name: &str, sys_name: &str, now: DateTime<Utc>) -> Option<SystemView> {
        let snapshot = self.snapshot();
        let env = snapshot.get(env_name)?;
        let sys = env.system(sys_name)?;
        let acl = sys.effective_acl(env.effective_acl());
        if !acl.is_allowed(subject, permission::VIEW, now) {
            return None;
        }
        Some(SystemView {
            name: sys.name.clone(),
            description: sys.description.clone(),
        })
    }

    pub fn group(&self, subject: &Subject, env_name: &str, sys_name: &str, grp_name: &str, now: DateTime<Utc>) -> Option<GroupView> {
        let snapshot = self.snapshot();
        let env = snapshot.get(env_name)?;
        let (group, acl, _) = env.resolve_group(sys_name, grp_name)?;
        if !acl.is_allowed(subject, permission::VIEW, now) {
            return None;
        }
        Some(GroupView {
            name: group.name.clone(),
            description: group.description.clone(),
            can_join: acl.is_allowed(subject, permission::JOIN, now),
            can_approve: acl.is_allowed(subject, permission::APPROVE_OTHERS, now),
        })
    }

    pub fn can_join(&self, subject: &Subject, env_name: &str, sys_name: &str, grp_name: &str, now: DateTime<Utc>) -> bool {
        self.resolve_acl(env_name, sys_name, grp_name)
            .is_some_and(|acl| acl.is_allowed(subject, permission::JOIN, now))
    }

    pub fn can_approve(&self, subject: &Subject, env_name: &str, sys_name: &str, grp_name: &str, now: DateTime<Utc>) -> bool {
        self.resolve_acl(env_name, sys_name, grp_name)
            .is_some_and(|acl| acl.is_allowed(subject, permission::APPROVE_OTHERS, now))
    }

    fn resolve_acl(&self, env_name: &str, sys_name: &str, grp_name: &str) -> Option<Acl> {
        let snapshot = self.snapshot();
        let env = snapshot.get(env_name)?;
        env.resolve_group(sys_name, grp_name).map(|(_, acl, _)| acl)
    }

    /// Every JIT-group principal the subject currently carries, with expiry.
    pub fn list_memberships(&self, subject: &Subject) -> Vec<MembershipView> {
        subject
            .principals()
            .iter()
            .filter_map(|g| match &g.principal {
                Principal::JitGroup(id) => Some(MembershipView {
                    group: id.clone(),
                    expires_at: g.not_after,
                }),
                _ => None,
            })
            .collect()
    }

    /// Runs the Join operation for `(env, system, group)`: binds `inputs`,
    /// evaluates ACL + constraints, and either commits directly (subject
    /// holds `ApproveSelf`) or emits a signed proposal to the group's
    /// `ApproveOthers` recipients.
    pub async fn join(
        &self,
        subject: &Subject,
        env_name: &str,
        sys_name: &str,
        grp_name: &str,
        inputs: HashMap<String, String>,
        now: DateTime<Utc>,
    ) -> BrokerResult<JoinState> {
        let snapshot = self.snapshot();
        let env = snapshot.get(env_name).ok_or(crate::error::BrokerError::ResourceNotFound)?;
        join::execute_join(
            env,
            sys_name,
            grp_name,
            subject,
            &inputs,
            self.signer.as_ref(),
            self.provisioner.as_ref(),
            self.notifier.as_ref(),
            &self.config,
            now,
        )
        .await
    }

    /// Runs the Approve operation: verifies the token, re-derives the
    /// original requester's subject, re-checks access as of `now`, confirms
    /// the approver is an authorized recipient, and commits.
    pub async fn approve(&self, approver: &Subject, token: &str, now: DateTime<Utc>) -> BrokerResult<JoinState> {
        let payload = self.signer.verify(token).await?;
        let group_id =
            JitGroupId::parse(&payload.grp).ok_or_else(|| crate::error::BrokerError::invalid_argument("token", "malformed group id"))?;
        let snapshot = self.snapshot();
        let env = snapshot
            .get(&group_id.environment)
            .ok_or(crate::error::BrokerError::ResourceNotFound)?;
        join::execute_approve(
            env,
            &group_id,
            approver,
            payload,
            self.provisioner.as_ref(),
            &self.replay,
            &self.subject_cache,
            self.directory.as_ref(),
            now,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::AclBuilder;
    use crate::id::UserId;
    use crate::policy_tree::PolicyMetadata;
    use crate::ports::{DirectoryGroup, MembershipRef, SignedToken};
    use crate::token::ProposalPayload;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct EmptyDirectory;
    #[async_trait]
    impl DirectoryPort for EmptyDirectory {
        async fn groups_for(&self, _user: &UserId) -> BrokerResult<Vec<DirectoryGroup>> {
            Ok(vec![])
        }
    }

    struct NoopSigner;
    #[async_trait]
    impl SignerPort for NoopSigner {
        async fn sign(&self, _payload: &ProposalPayload, _expiry: DateTime<Utc>) -> BrokerResult<SignedToken> {
            unreachable!("not exercised in this test")
        }
        async fn verify(&self, _token: &str) -> BrokerResult<ProposalPayload> {
            unreachable!("not exercised in this test")
        }
    }

    struct CountingProvisioner {
        calls: AtomicU32,
    }
    #[async_trait]
    impl ProvisioningPort for CountingProvisioner {
        async fn provision(
            &self,
            _user: &UserId,
            _group: &JitGroupId,
            _expiry: DateTime<Utc>,
            _justification: &str,
        ) -> BrokerResult<MembershipRef> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(MembershipRef("ref-1".to_string()))
        }
    }

    struct NoopNotifier;
    #[async_trait]
    impl NotifierPort for NoopNotifier {
        async fn notify_proposal_created(&self, _recipients: &[Principal], _group: &JitGroupId) -> BrokerResult<()> {
            Ok(())
        }
    }

    fn sample_catalog() -> Catalog {
        let mut env = EnvironmentPolicy::new(
            "env-1",
            "Env 1",
            PolicyMetadata {
                source: "test".into(),
                last_modified: Utc::now(),
                version: None,
                default_name: None,
            },
        )
        .unwrap();
        env.acl = AclBuilder::default().allow(Principal::Class(crate::id::ClassId::all_authenticated()), permission::VIEW).build();
        let mut sys = crate::policy_tree::SystemPolicy::new("sys-1", "Sys 1").unwrap();
        let mut grp = JitGroupPolicy::new("g-1", "Group 1").unwrap();
        grp.acl = AclBuilder::default()
            .allow(Principal::User(UserId::new("alice@example.com")), permission::JOIN | permission::APPROVE_SELF)
            .build();
        grp.constraints.join.push(crate::constraint::Constraint::Expiry {
            display_name: "Expiry".into(),
            min_dur: chrono::Duration::hours(1),
            max_dur: chrono::Duration::hours(1),
        });
        sys.add_group(grp).unwrap();
        env.add_system(sys).unwrap();
        let mut environments = BTreeMap::new();
        environments.insert("env-1".to_string(), env);

        Catalog::new(
            environments,
            Arc::new(EmptyDirectory),
            Arc::new(NoopSigner),
            Arc::new(CountingProvisioner { calls: AtomicU32::new(0) }),
            Arc::new(NoopNotifier),
            BrokerConfig::default(),
        )
    }

    #[tokio::test]
    async fn self_approved_join_commits_once() {
        let catalog = sample_catalog();
        let subject = Subject::resolve(UserId::new("alice@example.com"), &[]);
        let now = Utc::now();
        let outcome = catalog.join(&subject, "env-1", "sys-1", "g-1", HashMap::new(), now).await.unwrap();
        assert!(matches!(outcome, JoinState::Committed(_)));
    }

    #[test]
    fn hidden_environment_is_absent_not_forbidden() {
        let catalog = sample_catalog();
        let subject = Subject::resolve(UserId::new("nobody@example.com"), &[]);
        assert!(catalog.environment(&subject, "env-does-not-exist", Utc::now()).is_none());
    }

    #[test]
    fn list_environments_filters_by_view_acl() {
        let catalog = sample_catalog();
        let subject = Subject::resolve(UserId::new("anyone@example.com"), &[]);
        let envs = catalog.list_environments(&subject, Utc::now());
        assert_eq!(envs.len(), 1);
        assert_eq!(envs[0].name, "env-1");
    }

    #[test]
    fn list_memberships_reports_active_jit_groups() {
        let groups = vec![DirectoryGroup {
            email: "jit.env-1.sys-1.g-1@example.com".to_string(),
            expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
        }];
        let subject = Subject::resolve(UserId::new("alice@example.com"), &groups);
        let catalog = sample_catalog();
        let memberships = catalog.list_memberships(&subject);
        assert_eq!(memberships.len(), 1);
        assert_eq!(memberships[0].group, JitGroupId::new("env-1", "sys-1", "g-1"));
    }
}
