//! Unlock facade: the one entry point UI code calls to run a biometric check
//!
//! Adds serialization and nothing else. The ceremony's outcome comes back
//! exactly as the platform produced it, and the recency cache is not
//! consulted here (see [`crate::UnlockGate`] for that policy).

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{info, warn};

use crate::ceremony::{AttemptRecord, AttemptResult, BiometricCeremony, UnlockOutcome};
use crate::error::{CeremonyError, Result};
use crate::lock::ExclusiveLock;

/// Lock label used for every biometric ceremony
pub const UNLOCK_LABEL: &str = "biometric-unlock";

/// Serialized access to a [`BiometricCeremony`]
pub struct UnlockFacade {
    lock: Arc<ExclusiveLock>,
    ceremony: Arc<dyn BiometricCeremony>,
    acquire_timeout: Option<Duration>,
    last_attempt: Mutex<Option<AttemptRecord>>,
}

impl UnlockFacade {
    /// Create a facade sharing `lock` with any other ceremony users
    pub fn new(lock: Arc<ExclusiveLock>, ceremony: Arc<dyn BiometricCeremony>) -> Self {
        Self {
            lock,
            ceremony,
            acquire_timeout: None,
            last_attempt: Mutex::new(None),
        }
    }

    /// Bound how long a caller may wait in the queue
    ///
    /// Without this a prompt left open forever blocks every later caller.
    pub fn with_acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// The shared lock
    pub fn lock(&self) -> &Arc<ExclusiveLock> {
        &self.lock
    }

    /// Run the platform ceremony once every earlier call has finished
    pub async fn ensure_biometric_unlock_serialized(
        &self,
        display_name: Option<&str>,
    ) -> Result<UnlockOutcome> {
        let attempt = || self.attempt(display_name);

        let result = match self.acquire_timeout {
            Some(wait) => {
                self.lock
                    .run_exclusive_with_timeout(UNLOCK_LABEL, wait, attempt)
                    .await?
            }
            None => self.lock.run_exclusive(UNLOCK_LABEL, attempt).await,
        };

        Ok(result?)
    }

    /// Most recent attempt, for diagnostics
    pub fn last_attempt(&self) -> Option<AttemptRecord> {
        self.last_attempt
            .lock()
            .ok()
            .and_then(|last| last.clone())
    }

    async fn attempt(
        &self,
        display_name: Option<&str>,
    ) -> std::result::Result<UnlockOutcome, CeremonyError> {
        let started_at = Utc::now();
        let started = Instant::now();

        let result = self.ceremony.unlock_detailed(display_name).await;

        let record = AttemptRecord {
            label: UNLOCK_LABEL.to_string(),
            started_at,
            elapsed: started.elapsed(),
            result: AttemptResult::from_outcome(&result),
        };
        match &record.result {
            AttemptResult::Success => {
                info!(elapsed = ?record.elapsed, "biometric unlock verified")
            }
            AttemptResult::Failure => {
                warn!(elapsed = ?record.elapsed, "biometric unlock not verified")
            }
            AttemptResult::Error(reason) => {
                warn!(elapsed = ?record.elapsed, %reason, "biometric unlock failed")
            }
        }
        if let Ok(mut last) = self.last_attempt.lock() {
            *last = Some(record);
        }

        result
    }
}
