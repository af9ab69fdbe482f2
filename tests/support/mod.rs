//! Fake in-memory port implementations shared by the scenario tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ed25519_dalek::SigningKey;
use jit_broker_core::error::BrokerResult;
use jit_broker_core::id::{JitGroupId, Principal, UserId};
use jit_broker_core::ports::{DirectoryGroup, DirectoryPort, MembershipRef, NotifierPort, ProvisioningPort, SignedToken, SignerPort};
use jit_broker_core::token::{Ed25519Signer, ProposalPayload};
use parking_lot::Mutex;
use rand::rngs::OsRng;

pub struct FakeDirectory {
    pub groups: Mutex<std::collections::HashMap<UserId, Vec<DirectoryGroup>>>,
}

impl FakeDirectory {
    pub fn new() -> Self {
        FakeDirectory { groups: Mutex::new(std::collections::HashMap::new()) }
    }

    pub fn set_groups(&self, user: UserId, groups: Vec<DirectoryGroup>) {
        self.groups.lock().insert(user, groups);
    }
}

#[async_trait]
impl DirectoryPort for FakeDirectory {
    async fn groups_for(&self, user: &UserId) -> BrokerResult<Vec<DirectoryGroup>> {
        Ok(self.groups.lock().get(user).cloned().unwrap_or_default())
    }
}

/// Wraps the real `Ed25519Signer` — no point faking signature math, the
/// interesting behavior is in how the broker core calls it.
pub struct FakeSigner(pub Ed25519Signer);

impl FakeSigner {
    pub fn new() -> Self {
        FakeSigner(Ed25519Signer::new(SigningKey::generate(&mut OsRng), "jit-broker", "jit-broker-clients"))
    }
}

#[async_trait]
impl SignerPort for FakeSigner {
    async fn sign(&self, payload: &ProposalPayload, expiry: DateTime<Utc>) -> BrokerResult<SignedToken> {
        self.0.sign(payload, expiry).await
    }

    async fn verify(&self, token: &str) -> BrokerResult<ProposalPayload> {
        self.0.verify(token).await
    }
}

pub struct FakeProvisioner {
    pub calls: Mutex<Vec<(UserId, JitGroupId, DateTime<Utc>)>>,
}

impl FakeProvisioner {
    pub fn new() -> Self {
        FakeProvisioner { calls: Mutex::new(Vec::new()) }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl ProvisioningPort for FakeProvisioner {
    async fn provision(&self, user: &UserId, group: &JitGroupId, expiry: DateTime<Utc>, _justification: &str) -> BrokerResult<MembershipRef> {
        let mut calls = self.calls.lock();
        let seq = calls.len();
        calls.push((user.clone(), group.clone(), expiry));
        Ok(MembershipRef(format!("membership-{seq}")))
    }
}

pub struct FakeNotifier {
    pub notified: Mutex<Vec<(Vec<Principal>, JitGroupId)>>,
}

impl FakeNotifier {
    pub fn new() -> Self {
        FakeNotifier { notified: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl NotifierPort for FakeNotifier {
    async fn notify_proposal_created(&self, recipients: &[Principal], group: &JitGroupId) -> BrokerResult<()> {
        self.notified.lock().push((recipients.to_vec(), group.clone()));
        Ok(())
    }
}
