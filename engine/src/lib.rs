//! `directory-engine` implements the request-processing core of an
//! embeddable LDAP directory server: distinguished-name handling, the
//! entry/attribute data model, a bidirectional cursor abstraction, an
//! ordered interceptor chain with per-call bypass control, a referral
//! manager implementing RFC 3296 continuation references, a change-log
//! capable of reverting a batch of mutations, and the partition nexus that
//! ties a pool of naming-context backends together under one root DSE.
//!
//! The crate has no network or wire-protocol concerns of its own — callers
//! build an [`context::OperationContext`], drive it through an
//! [`interceptor::InterceptorChain`], and interpret the resulting
//! [`error::Outcome`]. The root `directory-core` crate is one such caller.

pub mod authorization;
pub mod changelog;
pub mod context;
pub mod cursor;
pub mod dn;
pub mod entry;
pub mod error;
pub mod filter;
pub mod interceptor;
pub mod nexus;
pub mod operational;
pub mod partition;
pub mod referral;
pub mod schema;
