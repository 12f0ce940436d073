//! Two-tier recency cache for successful biometric verifications
//!
//! - **Short tier**: session scoped, default 5 minutes. Lets the UI skip a
//!   prompt the user just passed.
//! - **Long tier**: device scoped, default 180 days. Answers whether this
//!   device is still within its trust window.
//!
//! Both tiers hold a single timestamp (Unix epoch milliseconds as a decimal
//! string), overwritten on every success.
//!
//! # Failure model
//!
//! Nothing here returns an error. Every read goes through one private helper
//! that maps a missing key, an unparseable value, or a storage failure to
//! `None`, and `None` always means "not trusted". Writes and clears log
//! storage failures at `debug` and carry on. A broken store must never block
//! the biometric prompt itself.
//!
//! # Clock skew
//!
//! Ages are signed. A stamp dated after the clock's current time has a
//! negative age, which is inside every window: the short tier reports it as
//! recent and the long tier as not expired.
//! [`with_future_stamps_rejected`](RecencyCache::with_future_stamps_rejected)
//! changes that so such stamps read as untrusted.
//!
//! # Polarity
//!
//! [`is_short_recent`](RecencyCache::is_short_recent) answers `true` for
//! trusted, while [`is_long_expired`](RecencyCache::is_long_expired) answers
//! `true` for *not* trusted. [`is_long_trusted`](RecencyCache::is_long_trusted)
//! is the same check with the short tier's polarity.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::storage::KeyValueStore;
use crate::{DEFAULT_LONG_TTL, DEFAULT_SHORT_TTL};

/// Session-tier key
pub const SHORT_KEY: &str = "biolatch.bio_short_ok_at";

/// Device-tier key
pub const LONG_KEY: &str = "biolatch.bio_long_ok_at";

/// Validity windows for the two tiers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecencyTtl {
    pub short: Duration,
    pub long: Duration,
}

impl Default for RecencyTtl {
    fn default() -> Self {
        Self {
            short: DEFAULT_SHORT_TTL,
            long: DEFAULT_LONG_TTL,
        }
    }
}

/// Snapshot of both tiers for diagnostics
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RecencyStatus {
    pub short_recent: bool,
    pub long_expired: bool,
    pub short_verified_at: Option<DateTime<Utc>>,
    pub long_verified_at: Option<DateTime<Utc>>,
    /// Time left in the session window, if still recent
    pub short_remaining: Option<Duration>,
    /// Time left in the device trust window, if not expired
    pub long_remaining: Option<Duration>,
}

/// Recency cache over a session store and a device store
#[derive(Clone)]
pub struct RecencyCache {
    session: Arc<dyn KeyValueStore>,
    device: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    ttl: RecencyTtl,
    reject_future_stamps: bool,
}

impl RecencyCache {
    /// Create a cache with the system clock and default windows
    pub fn new(session: Arc<dyn KeyValueStore>, device: Arc<dyn KeyValueStore>) -> Self {
        Self {
            session,
            device,
            clock: Arc::new(SystemClock),
            ttl: RecencyTtl::default(),
            reject_future_stamps: false,
        }
    }

    /// Replace the clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the default windows
    pub fn with_ttl(mut self, ttl: RecencyTtl) -> Self {
        self.ttl = ttl;
        self
    }

    /// Treat stamps dated after the current time as untrusted
    ///
    /// Off by default. Enabling it is a behavior change: a future-dated stamp
    /// no longer counts as recent in the short tier and reads as expired in
    /// the long tier.
    pub fn with_future_stamps_rejected(mut self, reject: bool) -> Self {
        self.reject_future_stamps = reject;
        self
    }

    /// Configured windows
    pub fn ttl(&self) -> RecencyTtl {
        self.ttl
    }

    // ---- short tier ----

    /// Record a successful verification in the session tier
    pub fn mark_short_success(&self) {
        self.stamp(self.session.as_ref(), SHORT_KEY);
    }

    /// Whether the session tier was stamped within the configured window
    pub fn is_short_recent(&self) -> bool {
        self.is_short_recent_within(self.ttl.short)
    }

    /// Whether the session tier was stamped strictly less than `ttl` ago
    pub fn is_short_recent_within(&self, ttl: Duration) -> bool {
        match self.age(self.session.as_ref(), SHORT_KEY) {
            // A window too large for chrono never closes
            Some(age) => chrono::Duration::from_std(ttl).map_or(true, |ttl| age < ttl),
            None => false,
        }
    }

    /// Forget the session tier
    pub fn clear_short(&self) {
        self.erase(self.session.as_ref(), SHORT_KEY);
    }

    // ---- long tier ----

    /// Record a successful verification in the device tier
    pub fn mark_long_success(&self) {
        self.stamp(self.device.as_ref(), LONG_KEY);
    }

    /// Whether the device tier is missing, unreadable, or older than the
    /// configured window
    pub fn is_long_expired(&self) -> bool {
        self.is_long_expired_after(self.ttl.long)
    }

    /// Whether the device tier is missing, unreadable, or more than `ttl` old
    pub fn is_long_expired_after(&self, ttl: Duration) -> bool {
        match self.age(self.device.as_ref(), LONG_KEY) {
            Some(age) => chrono::Duration::from_std(ttl).map_or(false, |ttl| age > ttl),
            None => true,
        }
    }

    /// Inverse of [`is_long_expired`](Self::is_long_expired)
    pub fn is_long_trusted(&self) -> bool {
        !self.is_long_expired()
    }

    /// Forget the device tier
    pub fn clear_long(&self) {
        self.erase(self.device.as_ref(), LONG_KEY);
    }

    // ---- both tiers ----

    /// Record a success in both tiers
    pub fn mark_success(&self) {
        self.mark_short_success();
        self.mark_long_success();
    }

    /// Forget both tiers (sign-out everywhere, credential reset)
    pub fn clear_all(&self) {
        self.clear_short();
        self.clear_long();
    }

    /// Read both tiers at once
    pub fn status(&self) -> RecencyStatus {
        let short_verified_at = self.verified_at(self.session.as_ref(), SHORT_KEY);
        let long_verified_at = self.verified_at(self.device.as_ref(), LONG_KEY);

        let short_remaining = self
            .age(self.session.as_ref(), SHORT_KEY)
            .and_then(|age| remaining(self.ttl.short, age))
            .filter(|left| !left.is_zero());
        let long_remaining = self
            .age(self.device.as_ref(), LONG_KEY)
            .and_then(|age| remaining(self.ttl.long, age));

        RecencyStatus {
            short_recent: self.is_short_recent(),
            long_expired: self.is_long_expired(),
            short_verified_at,
            long_verified_at,
            short_remaining,
            long_remaining,
        }
    }

    fn stamp(&self, store: &dyn KeyValueStore, key: &str) {
        let value = self.clock.now().timestamp_millis().to_string();
        if let Err(e) = store.set(key, &value) {
            debug!(key, error = %e, "could not record verification time");
        }
    }

    fn erase(&self, store: &dyn KeyValueStore, key: &str) {
        if let Err(e) = store.remove(key) {
            debug!(key, error = %e, "could not clear verification time");
        }
    }

    fn verified_at(&self, store: &dyn KeyValueStore, key: &str) -> Option<DateTime<Utc>> {
        let raw = match store.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                debug!(key, error = %e, "could not read verification time");
                return None;
            }
        };

        let parsed = raw
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single());
        if parsed.is_none() {
            debug!(key, "ignoring malformed verification time");
        }
        parsed
    }

    /// Signed time since the stored stamp, or `None` when it cannot be trusted
    fn age(&self, store: &dyn KeyValueStore, key: &str) -> Option<chrono::Duration> {
        let verified_at = self.verified_at(store, key)?;
        let age = self.clock.now().signed_duration_since(verified_at);
        if age < chrono::Duration::zero() {
            if self.reject_future_stamps {
                debug!(key, %verified_at, "rejecting future-dated verification time");
                return None;
            }
            debug!(key, %verified_at, "verification time is ahead of the clock");
        }
        Some(age)
    }
}

/// Time left in `ttl` for a stamp of the given age; `None` once it has run out
fn remaining(ttl: Duration, age: chrono::Duration) -> Option<Duration> {
    chrono::Duration::from_std(ttl)
        .ok()?
        .checked_sub(&age)?
        .to_std()
        .ok()
}

impl std::fmt::Debug for RecencyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecencyCache")
            .field("ttl", &self.ttl)
            .field("reject_future_stamps", &self.reject_future_stamps)
            .finish_non_exhaustive()
    }
}
