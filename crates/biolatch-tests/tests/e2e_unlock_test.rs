//! End-to-end unlock scenarios
//!
//! These tests wire the lock, facade, gate, and both storage tiers together
//! the way an application would.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use biolatch_core::{
    AttemptResult, BiolatchConfig, BiometricCeremony, CeremonyError, ExclusiveLock, FileStore,
    GateOutcome, KeyValueStore, LockState, ManualClock, MemoryStore, RecencyCache,
    SimulatedCeremony, StorageError, UnlockDecision, UnlockFacade, UnlockGate, UnlockOutcome,
};

const CEREMONY: Duration = Duration::from_millis(50);

/// Device store that is always unavailable (private browsing, disabled storage)
struct DisabledStore;

impl KeyValueStore for DisabledStore {
    fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Err(StorageError::Unavailable("disabled".into()))
    }
    fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("disabled".into()))
    }
    fn remove(&self, _key: &str) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("disabled".into()))
    }
}

/// Ceremony that echoes the display name it was shown
struct EchoCeremony;

#[async_trait]
impl BiometricCeremony for EchoCeremony {
    async fn unlock_detailed(
        &self,
        display_name: Option<&str>,
    ) -> Result<UnlockOutcome, CeremonyError> {
        match display_name {
            Some(name) => Ok(UnlockOutcome::verified(format!("passkey-for-{name}"))),
            None => Err(CeremonyError::NoCredential),
        }
    }
}

fn fixed_clock() -> ManualClock {
    ManualClock::new(Utc.timestamp_millis_opt(1_750_000_000_000).unwrap())
}

/// Three login modals open at once and all ask for a biometric check
#[tokio::test]
async fn test_three_modals_serialize() {
    let ceremony = Arc::new(SimulatedCeremony::new(CEREMONY));
    let facade = Arc::new(UnlockFacade::new(
        Arc::new(ExclusiveLock::new()),
        ceremony.clone(),
    ));

    let started = Instant::now();
    let modals: Vec<_> = (0..3)
        .map(|_| {
            let facade = Arc::clone(&facade);
            tokio::spawn(async move {
                let outcome = facade
                    .ensure_biometric_unlock_serialized(Some("Member"))
                    .await;
                (outcome, facade.last_attempt())
            })
        })
        .collect();

    let mut credentials = HashSet::new();
    for modal in modals {
        let (outcome, attempt) = modal.await.unwrap();
        let outcome = outcome.unwrap();
        assert!(outcome.verified);
        credentials.insert(outcome.credential_id.unwrap());

        let attempt = attempt.unwrap();
        assert_eq!(attempt.result, AttemptResult::Success);
        assert!(attempt.elapsed >= CEREMONY);
    }
    let total = started.elapsed();

    // Each modal got its own ceremony result
    assert_eq!(credentials.len(), 3);
    assert_eq!(ceremony.calls(), 3);
    assert_eq!(ceremony.peak_in_flight(), 1);
    // No parallel execution: wall time covers all three ceremonies
    assert!(total >= CEREMONY * 3, "finished in {total:?}");
    assert_eq!(facade.lock().state(), LockState::Idle);
}

/// The same three modals behind the gate: one prompt, the rest ride on it
#[tokio::test]
async fn test_three_modals_through_gate_prompt_once() {
    let ceremony = Arc::new(SimulatedCeremony::new(CEREMONY));
    let facade = Arc::new(UnlockFacade::new(
        Arc::new(ExclusiveLock::new()),
        ceremony.clone(),
    ));
    let cache = RecencyCache::new(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
        .with_clock(Arc::new(fixed_clock()));
    let gate = Arc::new(UnlockGate::new(facade, cache));

    let modals: Vec<_> = (0..3)
        .map(|_| {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.unlock(Some("Member")).await })
        })
        .collect();

    let mut outcomes = Vec::new();
    for modal in modals {
        outcomes.push(modal.await.unwrap().unwrap());
    }

    assert!(outcomes.iter().all(GateOutcome::is_unlocked));
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| matches!(o, GateOutcome::Skipped))
            .count(),
        2
    );
    assert_eq!(ceremony.calls(), 1);
    assert!(gate.cache().is_long_trusted());
}

/// Display name reaches the platform and failures come back unchanged
#[tokio::test]
async fn test_facade_is_transparent() {
    let facade = UnlockFacade::new(Arc::new(ExclusiveLock::new()), Arc::new(EchoCeremony));

    let outcome = facade
        .ensure_biometric_unlock_serialized(Some("Ada"))
        .await
        .unwrap();
    assert_eq!(outcome, UnlockOutcome::verified("passkey-for-Ada"));

    let err = facade
        .ensure_biometric_unlock_serialized(None)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), CeremonyError::NoCredential.to_string());
    assert!(matches!(
        facade.last_attempt().map(|a| a.result),
        Some(AttemptResult::Error(_))
    ));
}

/// Device trust survives a restart, session trust does not
#[tokio::test]
async fn test_device_trust_lifecycle() {
    let temp_dir = TempDir::new().unwrap();
    let device_path = temp_dir.path().join("recency.json");
    let clock = fixed_clock();
    let lock = Arc::new(ExclusiveLock::new());
    let ceremony = Arc::new(SimulatedCeremony::new(Duration::ZERO));

    let build_gate = |clock: &ManualClock| {
        let facade = Arc::new(UnlockFacade::new(Arc::clone(&lock), ceremony.clone()));
        let cache = RecencyCache::new(
            Arc::new(MemoryStore::new()),
            Arc::new(FileStore::open(&device_path).unwrap()),
        )
        .with_clock(Arc::new(clock.clone()));
        UnlockGate::new(facade, cache)
    };

    // First visit
    let gate = build_gate(&clock);
    assert_eq!(
        gate.decide(),
        UnlockDecision::Prompt {
            device_trusted: false
        }
    );
    assert!(gate.unlock(Some("Member")).await.unwrap().is_unlocked());
    assert_eq!(gate.unlock(Some("Member")).await.unwrap(), GateOutcome::Skipped);
    drop(gate);

    // Next day, fresh session on the same device
    clock.advance(Duration::from_secs(86_400));
    let gate = build_gate(&clock);
    assert!(!gate.cache().is_short_recent());
    assert!(!gate.cache().is_long_expired());
    assert_eq!(
        gate.decide(),
        UnlockDecision::Prompt {
            device_trusted: true
        }
    );

    // Beyond the trust window
    clock.advance(Duration::from_secs(181 * 86_400));
    assert!(gate.cache().is_long_expired());

    // Credential revoked
    assert!(gate.unlock(None).await.unwrap().is_unlocked());
    gate.revoke_device();
    assert!(gate.cache().is_long_expired());
    assert!(!gate.cache().is_short_recent());
    assert_eq!(ceremony.calls(), 2);
}

/// A broken device store never blocks the prompt
#[tokio::test]
async fn test_unlock_works_without_device_storage() {
    let facade = Arc::new(UnlockFacade::new(
        Arc::new(ExclusiveLock::new()),
        Arc::new(SimulatedCeremony::new(Duration::ZERO)),
    ));
    let cache = RecencyCache::new(Arc::new(MemoryStore::new()), Arc::new(DisabledStore));
    let gate = UnlockGate::new(facade, cache);

    let outcome = gate.unlock(Some("Member")).await.unwrap();
    assert!(outcome.is_unlocked());
    assert!(gate.cache().is_short_recent());
    assert!(gate.cache().is_long_expired());

    gate.revoke_device();
    assert!(!gate.cache().is_short_recent());
}

/// Components wired from a saved configuration
#[tokio::test]
async fn test_wiring_from_config() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.json");

    let config = BiolatchConfig {
        store_path: temp_dir.path().join("data").join("recency.json"),
        acquire_timeout_secs: Some(5),
        ..BiolatchConfig::strict()
    };
    config.save(&config_path).unwrap();
    let config = BiolatchConfig::load(&config_path).unwrap();

    let clock = fixed_clock();
    let facade = Arc::new(
        UnlockFacade::new(
            Arc::new(ExclusiveLock::new()),
            Arc::new(SimulatedCeremony::new(Duration::ZERO)),
        )
        .with_acquire_timeout(config.acquire_timeout()),
    );
    let cache = RecencyCache::new(
        Arc::new(MemoryStore::new()),
        Arc::new(FileStore::open(&config.store_path).unwrap()),
    )
    .with_clock(Arc::new(clock.clone()))
    .with_ttl(config.ttl());
    let gate = UnlockGate::new(facade, cache);

    gate.unlock(Some(config.display_name.as_str())).await.unwrap();
    assert!(config.store_path.exists());

    // Strict session window is one minute
    clock.advance(Duration::from_secs(61));
    assert!(!gate.cache().is_short_recent());
    // Strict device window is 30 days
    clock.advance(Duration::from_secs(30 * 86_400));
    assert!(gate.cache().is_long_expired());
}
