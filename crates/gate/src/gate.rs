//! Fail-closed authorization for auth-requiring skills.

use std::sync::Arc;

use {chrono::Utc, serde::Serialize, tracing::{debug, warn}};

use crate::token::{CapabilityToken, TokenVerifier, VerifyError};

/// Outcome of an authorization check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

/// Why a call was denied. Every failure mode has its own reason so callers
/// can distinguish "get a fresh token" from "you were never allowed".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DenyReason {
    MissingToken,
    Malformed,
    Expired,
    WrongScope,
    AgentMismatch,
    VerifierUnavailable,
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::MissingToken => "no token presented",
            Self::Malformed => "token is malformed",
            Self::Expired => "token has expired",
            Self::WrongScope => "token does not cover this tool",
            Self::AgentMismatch => "token was issued to a different agent",
            Self::VerifierUnavailable => "token verifier unavailable",
        };
        f.write_str(s)
    }
}

/// Guards tool calls into skills that declare `requires_auth`.
///
/// Every failure path denies. A verifier outage is a deny, not a bypass.
pub struct CapabilityGate {
    verifier: Arc<dyn TokenVerifier>,
}

impl CapabilityGate {
    pub fn new(verifier: Arc<dyn TokenVerifier>) -> Self {
        Self { verifier }
    }

    /// Check whether `agent` may call `tool` on `skill` with `token`.
    ///
    /// The required scope is `skill:tool`; a bare `skill` scope grants every
    /// tool of that skill.
    pub async fn authorize(
        &self,
        agent: &str,
        skill: &str,
        tool: &str,
        token: Option<&CapabilityToken>,
    ) -> Decision {
        let Some(token) = token else {
            return self.deny(agent, skill, tool, DenyReason::MissingToken);
        };

        let verified = match self.verifier.verify(token).await {
            Ok(v) => v,
            Err(VerifyError::Malformed) => {
                return self.deny(agent, skill, tool, DenyReason::Malformed);
            },
            Err(VerifyError::Unavailable(e)) => {
                warn!(skill, tool, error = %e, "token verifier unavailable, denying");
                return self.deny(agent, skill, tool, DenyReason::VerifierUnavailable);
            },
        };

        if verified.agent != agent {
            return self.deny(agent, skill, tool, DenyReason::AgentMismatch);
        }
        if verified.is_expired(Utc::now()) {
            return self.deny(agent, skill, tool, DenyReason::Expired);
        }

        let full_scope = format!("{skill}:{tool}");
        let covered = verified
            .scopes
            .iter()
            .any(|s| s == &full_scope || s == skill);
        if !covered {
            return self.deny(agent, skill, tool, DenyReason::WrongScope);
        }

        debug!(agent, skill, tool, "authorized");
        Decision::Allow
    }

    fn deny(&self, agent: &str, skill: &str, tool: &str, reason: DenyReason) -> Decision {
        debug!(agent, skill, tool, %reason, "denied");
        Decision::Deny(reason)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {async_trait::async_trait, chrono::Duration};

    use super::*;
    use crate::token::{VerifiedToken, VerifyError};

    /// Verifier with one known token; everything else is malformed.
    struct StaticVerifier {
        token: String,
        verdict: VerifiedToken,
    }

    #[async_trait]
    impl TokenVerifier for StaticVerifier {
        async fn verify(&self, token: &CapabilityToken) -> Result<VerifiedToken, VerifyError> {
            if token.as_str() == self.token {
                Ok(self.verdict.clone())
            } else {
                Err(VerifyError::Malformed)
            }
        }
    }

    struct DownVerifier;

    #[async_trait]
    impl TokenVerifier for DownVerifier {
        async fn verify(&self, _token: &CapabilityToken) -> Result<VerifiedToken, VerifyError> {
            Err(VerifyError::Unavailable("connection refused".into()))
        }
    }

    fn gate_with(scopes: Vec<&str>, ttl: Duration) -> CapabilityGate {
        CapabilityGate::new(Arc::new(StaticVerifier {
            token: "tok-1".into(),
            verdict: VerifiedToken {
                agent: "jarvis".into(),
                expires_at: Utc::now() + ttl,
                scopes: scopes.into_iter().map(String::from).collect(),
            },
        }))
    }

    fn token() -> CapabilityToken {
        CapabilityToken("tok-1".into())
    }

    #[tokio::test]
    async fn test_matching_scope_allows() {
        let gate = gate_with(vec!["deploy:rollout"], Duration::hours(1));
        let decision = gate
            .authorize("jarvis", "deploy", "rollout", Some(&token()))
            .await;
        assert_eq!(decision, Decision::Allow);
    }

    #[tokio::test]
    async fn test_skill_wide_scope_covers_all_tools() {
        let gate = gate_with(vec!["deploy"], Duration::hours(1));
        let decision = gate
            .authorize("jarvis", "deploy", "rollout", Some(&token()))
            .await;
        assert_eq!(decision, Decision::Allow);
    }

    #[tokio::test]
    async fn test_expired_token_denied() {
        let gate = gate_with(vec!["deploy:rollout"], Duration::hours(-1));
        let decision = gate
            .authorize("jarvis", "deploy", "rollout", Some(&token()))
            .await;
        assert_eq!(decision, Decision::Deny(DenyReason::Expired));
    }

    #[tokio::test]
    async fn test_wrong_scope_denied() {
        let gate = gate_with(vec!["other:tool"], Duration::hours(1));
        let decision = gate
            .authorize("jarvis", "deploy", "rollout", Some(&token()))
            .await;
        assert_eq!(decision, Decision::Deny(DenyReason::WrongScope));
    }

    #[tokio::test]
    async fn test_agent_mismatch_denied() {
        let gate = gate_with(vec!["deploy:rollout"], Duration::hours(1));
        let decision = gate
            .authorize("other-agent", "deploy", "rollout", Some(&token()))
            .await;
        assert_eq!(decision, Decision::Deny(DenyReason::AgentMismatch));
    }

    #[tokio::test]
    async fn test_missing_and_malformed_tokens_denied() {
        let gate = gate_with(vec!["deploy:rollout"], Duration::hours(1));
        assert_eq!(
            gate.authorize("jarvis", "deploy", "rollout", None).await,
            Decision::Deny(DenyReason::MissingToken)
        );
        let bogus = CapabilityToken("garbage".into());
        assert_eq!(
            gate.authorize("jarvis", "deploy", "rollout", Some(&bogus)).await,
            Decision::Deny(DenyReason::Malformed)
        );
    }

    #[tokio::test]
    async fn test_verifier_outage_fails_closed() {
        let gate = CapabilityGate::new(Arc::new(DownVerifier));
        let decision = gate
            .authorize("jarvis", "deploy", "rollout", Some(&token()))
            .await;
        assert_eq!(decision, Decision::Deny(DenyReason::VerifierUnavailable));
    }
}
