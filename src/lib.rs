//! jit-broker-core
//!
//! Just-in-time access broker: the policy model, evaluation engine, and
//! join/approval workflow for temporarily joining privileged groups that
//! carry pre-declared cloud role bindings.
//!
//! # Architecture
//!
//! Leaves first: [`id`] (principals) underlies [`acl`] (who's allowed)
//! and [`constraint`] (what else must hold); [`policy_tree`] composes
//! both into an inheriting Environment/System/Group hierarchy that
//! [`codec`] parses from and emits to a textual document. [`subject`]
//! (backed by [`cache`] and [`lazy`]) expands an authenticated user into
//! the principal set an ACL evaluates against. [`analysis`] runs one
//! ACL + constraint decision; [`catalog`] is the user-facing read model
//! built on it, and [`join`] (with [`token`] and [`replay`]) drives the
//! two-phase join/approve workflow that [`catalog`] exposes. [`ports`]
//! declares every external collaborator (directory, signer, provisioner,
//! notifier) as a trait the core depends on but never implements.
//!
//! The crate performs no I/O of its own and never initializes a global
//! `tracing` subscriber — both are left to the embedding binary.

pub mod acl;
pub mod analysis;
pub mod cache;
pub mod catalog;
pub mod codec;
pub mod config;
pub mod constraint;
pub mod error;
pub mod id;
pub mod join;
pub mod lazy;
pub mod policy_tree;
pub mod ports;
pub mod replay;
pub mod subject;
pub mod token;

pub use catalog::Catalog;
pub use config::BrokerConfig;
pub use error::{BrokerError, BrokerResult, DenialReason};
pub use join::JoinState;
pub use subject::Subject;
