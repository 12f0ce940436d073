//! Platform biometric ceremony seam
//!
//! The actual WebAuthn/passkey or OS biometric call lives outside this crate.
//! Bindings implement [`BiometricCeremony`]; [`SimulatedCeremony`] stands in
//! for one in the CLI and in tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::CeremonyError;

/// Detailed result of one ceremony, returned as produced by the platform
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UnlockOutcome {
    /// Whether the user proved presence with a registered credential
    pub verified: bool,
    /// Credential that answered, when the platform reports it
    pub credential_id: Option<String>,
    /// Free-form diagnostic detail
    pub detail: Option<String>,
}

impl UnlockOutcome {
    pub fn verified(credential_id: impl Into<String>) -> Self {
        Self {
            verified: true,
            credential_id: Some(credential_id.into()),
            detail: None,
        }
    }

    pub fn rejected(detail: impl Into<String>) -> Self {
        Self {
            verified: false,
            credential_id: None,
            detail: Some(detail.into()),
        }
    }
}

/// The platform biometric call
#[async_trait]
pub trait BiometricCeremony: Send + Sync {
    /// Prompt the user, showing `display_name` if given
    async fn unlock_detailed(
        &self,
        display_name: Option<&str>,
    ) -> Result<UnlockOutcome, CeremonyError>;
}

/// How an attempt ended
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptResult {
    Success,
    Failure,
    Error(String),
}

impl AttemptResult {
    pub fn from_outcome(result: &Result<UnlockOutcome, CeremonyError>) -> Self {
        match result {
            Ok(outcome) if outcome.verified => AttemptResult::Success,
            Ok(_) => AttemptResult::Failure,
            Err(e) => AttemptResult::Error(e.to_string()),
        }
    }
}

/// Diagnostic record of a single ceremony; never persisted
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    pub label: String,
    pub started_at: DateTime<Utc>,
    /// Time spent inside the ceremony, excluding queue wait
    pub elapsed: Duration,
    pub result: AttemptResult,
}

/// Scripted stand-in for a platform ceremony
///
/// Each call sleeps for `latency` and then returns the next scripted result,
/// or a verified outcome once the script is exhausted. Tracks how many calls
/// were in flight at once.
#[derive(Debug)]
pub struct SimulatedCeremony {
    latency: Duration,
    script: Mutex<VecDeque<Result<UnlockOutcome, CeremonyError>>>,
    fail_every: Option<usize>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl SimulatedCeremony {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            script: Mutex::new(VecDeque::new()),
            fail_every: None,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Queue results to return, in order
    pub fn with_script<I>(self, results: I) -> Self
    where
        I: IntoIterator<Item = Result<UnlockOutcome, CeremonyError>>,
    {
        if let Ok(mut script) = self.script.lock() {
            script.extend(results);
        }
        self
    }

    /// Cancel every `n`th unscripted call (1-based)
    pub fn failing_every(mut self, n: usize) -> Self {
        self.fail_every = (n > 0).then_some(n);
        self
    }

    /// Calls started so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of calls ever running together
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn next_result(&self, call: usize) -> Result<UnlockOutcome, CeremonyError> {
        let scripted = self
            .script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front());
        if let Some(result) = scripted {
            return result;
        }

        match self.fail_every {
            Some(n) if call % n == 0 => Err(CeremonyError::Cancelled),
            _ => Ok(UnlockOutcome::verified(format!("simulated-{call}"))),
        }
    }
}

#[async_trait]
impl BiometricCeremony for SimulatedCeremony {
    async fn unlock_detailed(
        &self,
        _display_name: Option<&str>,
    ) -> Result<UnlockOutcome, CeremonyError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);

        tokio::time::sleep(self.latency).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.next_result(call)
    }
}
