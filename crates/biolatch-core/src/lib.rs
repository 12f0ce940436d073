//! Biolatch Core - serialized biometric unlock with recency gating
//!
//! This crate provides:
//! - An exclusive FIFO lock so only one biometric/WebAuthn ceremony runs at a time
//! - A two-tier recency cache (session and device trust) over pluggable storage
//! - The unlock facade UI code calls, plus an optional recency-aware gate
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use biolatch_core::{
//!     ExclusiveLock, FileStore, MemoryStore, RecencyCache, SimulatedCeremony, UnlockFacade,
//!     UnlockGate,
//! };
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let lock = Arc::new(ExclusiveLock::new());
//! let ceremony = Arc::new(SimulatedCeremony::new(Duration::from_millis(50)));
//! let facade = Arc::new(UnlockFacade::new(lock, ceremony));
//!
//! let cache = RecencyCache::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(FileStore::open(FileStore::default_path())?),
//! );
//! let gate = UnlockGate::new(facade, cache);
//!
//! if gate.unlock(Some("Member")).await?.is_unlocked() {
//!     // proceed
//! }
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

pub mod ceremony;
pub mod clock;
pub mod config;
pub mod error;
pub mod facade;
pub mod gate;
pub mod lock;
pub mod recency;
pub mod storage;

pub use ceremony::{
    AttemptRecord, AttemptResult, BiometricCeremony, SimulatedCeremony, UnlockOutcome,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::BiolatchConfig;
pub use error::{CeremonyError, ConfigError, LockError, Result, StorageError, UnlockError};
pub use facade::{UnlockFacade, UNLOCK_LABEL};
pub use gate::{GateOutcome, UnlockDecision, UnlockGate};
pub use lock::{ExclusiveLock, LockState};
pub use recency::{RecencyCache, RecencyStatus, RecencyTtl};
pub use storage::{FileStore, KeyValueStore, MemoryStore};

/// Default session-tier window (5 minutes)
pub const DEFAULT_SHORT_TTL: Duration = Duration::from_secs(5 * 60);

/// Default device trust window (180 days)
pub const DEFAULT_LONG_TTL: Duration = Duration::from_secs(180 * 86_400);
