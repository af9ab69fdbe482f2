//! Proposal tokens: a signed, opaque carrier for a Join operation that
//! needs peer approval.
//!
//! Wire shape is JWT-compatible — `header_b64.payload_b64.sig_b64`, base64url
//! without padding — carrying claims `jti, iss, aud, iat, exp, usr, grp, rcp,
//! inp`. `rcp` is always emitted sorted by canonical principal string and
//! `inp` values are strings only, so two payloads with the same logical
//! content serialize byte-identically and sign/verify round-trips cleanly.

use crate::error::BrokerError;
use crate::id::Principal;
use crate::ports::{SignedToken, SignerPort};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProposalPayload {
    pub jti: String,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    pub usr: String,
    pub grp: String,
    pub rcp: Vec<String>,
    pub inp: BTreeMap<String, String>,
}

impl ProposalPayload {
    pub fn new(
        issuer: impl Into<String>,
        audience: impl Into<String>,
        user: &crate::id::UserId,
        group: &crate::id::JitGroupId,
        recipients: &[Principal],
        input: BTreeMap<String, String>,
        issued_at: DateTime<Utc>,
        expiry: DateTime<Utc>,
    ) -> Self {
        let mut rcp: Vec<String> = recipients.iter().map(Principal::canonical).collect();
        rcp.sort();
        ProposalPayload {
            jti: nonce(),
            iss: issuer.into(),
            aud: audience.into(),
            iat: issued_at.timestamp(),
            exp: expiry.timestamp(),
            usr: user.to_string(),
            grp: group.to_string(),
            rcp,
            inp: input,
        }
    }

    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.exp, 0).single()
    }
}

fn nonce() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Recursively sort object keys so two structurally-equal payloads always
/// serialize to the same bytes, independent of field declaration order.
fn canonicalize_value(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut sorted: Vec<_> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = serde_json::Map::new();
            for (k, v) in sorted {
                out.insert(k.clone(), canonicalize_value(v));
            }
            serde_json::Value::Object(out)
        }
        serde_json::Value::Array(items) => serde_json::Value::Array(items.iter().map(canonicalize_value).collect()),
        other => other.clone(),
    }
}

fn canonical_json_bytes(payload: &ProposalPayload) -> Vec<u8> {
    let value = serde_json::to_value(payload).expect("ProposalPayload always serializes");
    serde_json::to_vec(&canonicalize_value(&value)).expect("canonicalized value always serializes")
}

/// An Ed25519-backed [`SignerPort`]. The broker core treats this as just
/// one possible implementation — callers are free to swap in any signer
/// that honors the trait, e.g. one backed by a KMS.
pub struct Ed25519Signer {
    signing_key: SigningKey,
    issuer: String,
    audience: String,
}

impl Ed25519Signer {
    pub fn new(signing_key: SigningKey, issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        Ed25519Signer {
            signing_key,
            issuer: issuer.into(),
            audience: audience.into(),
        }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }
}

#[async_trait]
impl SignerPort for Ed25519Signer {
    async fn sign(&self, payload: &ProposalPayload, expiry: DateTime<Utc>) -> crate::error::BrokerResult<SignedToken> {
        let header = serde_json::json!({"alg": "EdDSA", "typ": "JIT+JWT"});
        let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).expect("header always serializes"));
        let payload_b64 = URL_SAFE_NO_PAD.encode(canonical_json_bytes(payload));
        let signing_input = format!("{header_b64}.{payload_b64}");
        let signature = self.signing_key.sign(signing_input.as_bytes());
        let sig_b64 = URL_SAFE_NO_PAD.encode(signature.to_bytes());
        let token = format!("{signing_input}.{sig_b64}");
        let issued_at = Utc.timestamp_opt(payload.iat, 0).single().unwrap_or_else(Utc::now);
        Ok(SignedToken { token, issued_at, expiry })
    }

    async fn verify(&self, token: &str) -> crate::error::BrokerResult<ProposalPayload> {
        let mut parts = token.splitn(4, '.');
        let (Some(header_b64), Some(payload_b64), Some(sig_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(BrokerError::invalid_argument("token", "malformed token structure"));
        };

        let signing_input = format!("{header_b64}.{payload_b64}");
        let sig_bytes = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| BrokerError::invalid_argument("token", "malformed signature encoding"))?;
        let signature = Signature::from_slice(&sig_bytes)
            .map_err(|_| BrokerError::invalid_argument("token", "malformed signature"))?;
        self.verifying_key()
            .verify(signing_input.as_bytes(), &signature)
            .map_err(|_| BrokerError::invalid_argument("token", "signature verification failed"))?;

        let payload_bytes = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| BrokerError::invalid_argument("token", "malformed payload encoding"))?;
        serde_json::from_slice(&payload_bytes).map_err(|_| BrokerError::invalid_argument("token", "malformed payload"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{JitGroupId, UserId};
    use rand::rngs::OsRng;

    fn signer() -> Ed25519Signer {
        let key = SigningKey::generate(&mut OsRng);
        Ed25519Signer::new(key, "jit-broker", "jit-broker-clients")
    }

    fn sample_payload() -> ProposalPayload {
        let user = UserId::new("alice@example.com");
        let group = JitGroupId::new("env-1", "sys-1", "g-admin");
        let recipients = vec![
            Principal::User(UserId::new("zeb@example.com")),
            Principal::User(UserId::new("alice-approver@example.com")),
        ];
        let now = Utc::now();
        ProposalPayload::new(
            "jit-broker",
            "jit-broker-clients",
            &user,
            &group,
            &recipients,
            BTreeMap::from([("justification".to_string(), "on-call incident".to_string())]),
            now,
            now + chrono::Duration::hours(1),
        )
    }

    #[tokio::test]
    async fn sign_then_verify_round_trips() {
        let signer = signer();
        let payload = sample_payload();
        let signed = signer.sign(&payload, payload.expiry().unwrap()).await.unwrap();
        let verified = signer.verify(&signed.token).await.unwrap();
        assert_eq!(verified, payload);
    }

    #[tokio::test]
    async fn recipients_are_sorted_canonically() {
        let payload = sample_payload();
        assert_eq!(payload.rcp, vec!["user:alice-approver@example.com".to_string(), "user:zeb@example.com".to_string()]);
    }

    #[tokio::test]
    async fn tampered_token_fails_verification() {
        let signer = signer();
        let payload = sample_payload();
        let signed = signer.sign(&payload, payload.expiry().unwrap()).await.unwrap();
        let mut tampered = signed.token.clone();
        tampered.push('x');
        assert!(signer.verify(&tampered).await.is_err());
    }

    #[tokio::test]
    async fn wrong_key_fails_verification() {
        let signer_a = signer();
        let signer_b = signer();
        let payload = sample_payload();
        let signed = signer_a.sign(&payload, payload.expiry().unwrap()).await.unwrap();
        assert!(signer_b.verify(&signed.token).await.is_err());
    }
}
