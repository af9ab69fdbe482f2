//! Property-based tests for the invariants in spec.md's "Testable
//! Properties" section, run with `proptest`.

use chrono::{Duration, Utc};
use jit_broker_core::acl::{permission, Acl, SubjectView};
use jit_broker_core::id::{JitGroupId, Principal, UserId};
use jit_broker_core::ports::{DirectoryGroup, SignerPort};
use jit_broker_core::subject::Subject;
use jit_broker_core::token::{Ed25519Signer, ProposalPayload};
use proptest::prelude::*;
use rand::rngs::OsRng;
use std::collections::BTreeMap;

const ALL_BITS: u32 = permission::VIEW | permission::JOIN | permission::APPROVE_SELF | permission::APPROVE_OTHERS | permission::EXPORT;

fn mask_strategy() -> impl Strategy<Value = u32> {
    0..=ALL_BITS
}

fn alice() -> Principal {
    Principal::User(UserId::new("alice@example.com"))
}

proptest! {
    /// Invariant 3: isAllowed(s, m1|m2) <=> isAllowed(s, m1) && isAllowed(s, m2).
    #[test]
    fn union_law_holds_for_any_mask_pair(allowed in mask_strategy(), m1 in mask_strategy(), m2 in mask_strategy()) {
        let acl = Acl::builder().allow(alice(), allowed).build();
        let subject = FixedSubject { active: vec![alice()], user_backed: true };
        let now = Utc::now();
        let combined = acl.is_allowed(&subject, m1 | m2, now);
        let split = acl.is_allowed(&subject, m1, now) && acl.is_allowed(&subject, m2, now);
        prop_assert_eq!(combined, split);
    }

    /// Invariant 4: a deny entry for bit `b` blocks `b` regardless of any
    /// allow entries for the same principal, for any allow mask and any
    /// subset of bits denied.
    #[test]
    fn deny_always_dominates_allow(allow_mask in mask_strategy(), deny_mask in mask_strategy()) {
        prop_assume!(deny_mask != 0);
        let acl = Acl::builder().allow(alice(), allow_mask).deny(alice(), deny_mask).build();
        let subject = FixedSubject { active: vec![alice()], user_backed: true };
        let now = Utc::now();
        // Any bit present in deny_mask must never be grantable, no matter
        // how the allow mask overlaps it.
        for bit in [permission::VIEW, permission::JOIN, permission::APPROVE_SELF, permission::APPROVE_OTHERS, permission::EXPORT] {
            if deny_mask & bit != 0 {
                prop_assert!(!acl.is_allowed(&subject, bit, now));
            }
        }
    }

    /// Invariant 5: an expired JIT-group principal contributes zero bits,
    /// for any expiry strictly in the past and any granted mask.
    #[test]
    fn expired_jit_principal_contributes_zero_bits(mask in mask_strategy(), seconds_ago in 1i64..=86_400) {
        prop_assume!(mask != 0);
        let group_id = JitGroupId::new("env-1", "sys-1", "g-admin");
        let acl = Acl::builder().allow(Principal::JitGroup(group_id), mask).build();
        let now = Utc::now();
        let groups = vec![DirectoryGroup {
            email: "jit.env-1.sys-1.g-admin@example.com".to_string(),
            expires_at: Some(now - Duration::seconds(seconds_ago)),
        }];
        let subject = Subject::resolve(UserId::new("carol@example.com"), &groups);
        prop_assert!(!acl.is_allowed(&subject, mask, now));
    }
}

// proptest's async-unfriendly macro can't drive a `#[tokio::test]` body
// directly, so the token round-trip/mutation properties build a small
// single-threaded runtime per case instead.

proptest! {
    /// Invariant 7 (round-trip half): verify(sign(p, exp)) == p for any
    /// payload built from arbitrary user/justification strings and any
    /// future expiry.
    #[test]
    fn sign_then_verify_round_trips_for_arbitrary_payloads(
        user_local in "[a-z]{3,12}",
        justification in "[a-zA-Z0-9 ]{0,40}",
        ttl_minutes in 1i64..=480,
    ) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async {
            let signer = Ed25519Signer::new(ed25519_dalek::SigningKey::generate(&mut OsRng), "jit-broker", "jit-broker-clients");
            let user = UserId::new(format!("{user_local}@example.com"));
            let group = JitGroupId::new("env-1", "sys-1", "g-admin");
            let now = Utc::now();
            let expiry = now + Duration::minutes(ttl_minutes);
            let payload = ProposalPayload::new(
                "jit-broker",
                "jit-broker-clients",
                &user,
                &group,
                &[alice()],
                BTreeMap::from([("justification".to_string(), justification)]),
                now,
                expiry,
            );
            let signed = signer.sign(&payload, expiry).await.unwrap();
            let verified = signer.verify(&signed.token).await.unwrap();
            prop_assert_eq!(verified, payload);
            Ok(())
        })?;
    }

    /// Invariant 7 (tamper half): flipping a single byte anywhere in a
    /// signed token fails verification, for any byte position.
    #[test]
    fn single_byte_mutation_fails_verification(byte_index in 0usize..200, flip in 1u8..=255) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async {
            let signer = Ed25519Signer::new(ed25519_dalek::SigningKey::generate(&mut OsRng), "jit-broker", "jit-broker-clients");
            let user = UserId::new("alice@example.com");
            let group = JitGroupId::new("env-1", "sys-1", "g-admin");
            let now = Utc::now();
            let expiry = now + Duration::hours(1);
            let payload = ProposalPayload::new(
                "jit-broker", "jit-broker-clients", &user, &group, &[alice()], BTreeMap::new(), now, expiry,
            );
            let signed = signer.sign(&payload, expiry).await.unwrap();
            let mut bytes = signed.token.into_bytes();
            let index = byte_index % bytes.len();
            bytes[index] ^= flip;
            let tampered = String::from_utf8_lossy(&bytes).into_owned();
            prop_assert!(signer.verify(&tampered).await.is_err());
            Ok(())
        })?;
    }
}

struct FixedSubject {
    active: Vec<Principal>,
    user_backed: bool,
}

impl SubjectView for FixedSubject {
    fn has_active(&self, principal: &Principal, _now: chrono::DateTime<Utc>) -> bool {
        self.active.contains(principal)
    }
    fn is_user_backed(&self) -> bool {
        self.user_backed
    }
}
