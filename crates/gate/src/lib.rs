//! Capability gate: fail-closed authorization for auth-requiring skills.
//!
//! Tokens are minted and validated by an external identity service behind
//! the [`TokenVerifier`] trait; this crate maps every verification outcome
//! to an allow/deny decision.

pub mod gate;
pub mod token;

pub use {
    gate::{CapabilityGate, Decision, DenyReason},
    token::{CapabilityToken, TokenVerifier, VerifiedToken, VerifyError},
};
