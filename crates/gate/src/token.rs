//! Capability tokens and the external verification seam.

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

/// An unverified credential as presented by an agent. Opaque to this crate;
/// only a verifier can see inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityToken(pub String);

impl CapabilityToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// What a verifier vouches for: who holds the token, until when, and for
/// which `skill:tool` scopes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifiedToken {
    pub agent: String,
    pub expires_at: DateTime<Utc>,
    pub scopes: Vec<String>,
}

impl VerifiedToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Verification failures, each mapping to a distinct deny reason.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("token is malformed")]
    Malformed,
    #[error("verifier unavailable: {0}")]
    Unavailable(String),
}

/// External identity service seam. Tokens are minted and validated
/// elsewhere; this crate only consumes the verdict.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &CapabilityToken) -> Result<VerifiedToken, VerifyError>;
}
