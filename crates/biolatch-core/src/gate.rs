//! Caller-side unlock policy
//!
//! Decides whether a prompt is needed at all and records successes. The
//! facade stays pure mechanism; this is where "skip if verified in the last
//! few minutes" lives.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::ceremony::UnlockOutcome;
use crate::error::Result;
use crate::facade::UnlockFacade;
use crate::recency::RecencyCache;

/// What the gate would do right now
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnlockDecision {
    /// Verified within the session window, no prompt needed
    SkipRecent,
    /// A prompt is needed; `device_trusted` reports the long tier
    Prompt { device_trusted: bool },
}

/// Result of [`UnlockGate::unlock`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateOutcome {
    /// Session tier was still fresh; the ceremony did not run
    Skipped,
    /// The ceremony ran and returned this outcome
    Prompted(UnlockOutcome),
}

impl GateOutcome {
    /// Whether the caller may proceed as unlocked
    pub fn is_unlocked(&self) -> bool {
        match self {
            GateOutcome::Skipped => true,
            GateOutcome::Prompted(outcome) => outcome.verified,
        }
    }
}

/// Facade plus recency policy
///
/// Concurrent [`unlock`](Self::unlock) calls share one prompt: the first
/// caller with a stale session prompts, and callers queued behind it skip
/// once that prompt has verified.
pub struct UnlockGate {
    facade: Arc<UnlockFacade>,
    cache: RecencyCache,
    /// Held from the recency re-check until the success is recorded
    prompt_turn: Mutex<()>,
}

impl UnlockGate {
    pub fn new(facade: Arc<UnlockFacade>, cache: RecencyCache) -> Self {
        Self {
            facade,
            cache,
            prompt_turn: Mutex::new(()),
        }
    }

    pub fn facade(&self) -> &Arc<UnlockFacade> {
        &self.facade
    }

    pub fn cache(&self) -> &RecencyCache {
        &self.cache
    }

    /// Decide without prompting
    pub fn decide(&self) -> UnlockDecision {
        if self.cache.is_short_recent() {
            UnlockDecision::SkipRecent
        } else {
            UnlockDecision::Prompt {
                device_trusted: !self.cache.is_long_expired(),
            }
        }
    }

    /// Prompt only if the session tier is stale; stamp both tiers on success
    pub async fn unlock(&self, display_name: Option<&str>) -> Result<GateOutcome> {
        if self.decide() == UnlockDecision::SkipRecent {
            debug!("session verification still fresh, skipping prompt");
            return Ok(GateOutcome::Skipped);
        }

        let _turn = self.prompt_turn.lock().await;
        // An earlier caller may have verified while this one waited
        match self.decide() {
            UnlockDecision::SkipRecent => {
                debug!("verified by a concurrent caller, skipping prompt");
                return Ok(GateOutcome::Skipped);
            }
            UnlockDecision::Prompt { device_trusted } => {
                debug!(device_trusted, "session verification stale, prompting");
            }
        }

        let outcome = self
            .facade
            .ensure_biometric_unlock_serialized(display_name)
            .await?;
        if outcome.verified {
            self.cache.mark_success();
        }
        Ok(GateOutcome::Prompted(outcome))
    }

    /// Drop the session tier only
    pub fn sign_out(&self) {
        self.cache.clear_short();
    }

    /// Drop both tiers, e.g. after the credential is revoked
    pub fn revoke_device(&self) {
        self.cache.clear_all();
    }
}
