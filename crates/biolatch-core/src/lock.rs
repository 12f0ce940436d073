//! Exclusive execution lock
//!
//! Runs at most one async operation at a time. Overlapping WebAuthn or
//! platform biometric prompts invalidate each other's challenge, so every
//! ceremony goes through a single shared [`ExclusiveLock`].
//!
//! # Ordering
//!
//! Waiters are granted the lock in the order they called
//! [`ExclusiveLock::run_exclusive`]. The underlying `tokio::sync::Mutex` is
//! fair: on release it hands off directly to the oldest waiter, which gives
//! the `HELD -> HELD` transition without ever passing through `IDLE`.
//!
//! # Release
//!
//! The guard is dropped when the operation's future completes, fails, or
//! unwinds, so the next waiter always proceeds.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::error::LockError;

/// Observable lock state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockState {
    /// Nobody holds the lock and the queue is empty
    Idle,
    /// An operation is running
    Held,
}

/// FIFO async lock serializing labelled operations
///
/// Construct once and share with `Arc`.
#[derive(Debug, Default)]
pub struct ExclusiveLock {
    inner: Mutex<()>,
    held: AtomicBool,
    waiting: AtomicUsize,
}

impl ExclusiveLock {
    /// Create an idle lock
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `operation` once every earlier caller has finished
    ///
    /// The operation's output is returned unchanged. A `Result` output that
    /// carries an error is just as final as a success: the lock is released
    /// either way.
    pub async fn run_exclusive<F, Fut, T>(&self, label: &str, operation: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let requested = Instant::now();
        let guard = self.acquire(label).await;
        self.run_held(label, requested, guard, operation).await
    }

    /// Like [`run_exclusive`](Self::run_exclusive) but gives up if the turn is
    /// not granted within `wait`
    ///
    /// Only the queue wait is bounded. Once `operation` starts it runs to
    /// completion.
    pub async fn run_exclusive_with_timeout<F, Fut, T>(
        &self,
        label: &str,
        wait: Duration,
        operation: F,
    ) -> Result<T, LockError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let requested = Instant::now();
        let guard = match tokio::time::timeout(wait, self.acquire(label)).await {
            Ok(guard) => guard,
            Err(_) => {
                debug!(label, waited = ?wait, "gave up waiting for exclusive lock");
                return Err(LockError::AcquireTimeout {
                    label: label.to_string(),
                    waited: wait,
                });
            }
        };
        Ok(self.run_held(label, requested, guard, operation).await)
    }

    /// Current state
    ///
    /// Read from a flag, so observing the lock never takes it.
    pub fn state(&self) -> LockState {
        if self.held.load(Ordering::SeqCst) {
            LockState::Held
        } else {
            LockState::Idle
        }
    }

    /// Number of callers queued behind the current holder
    pub fn waiters(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    async fn acquire(&self, label: &str) -> MutexGuard<'_, ()> {
        if let Ok(guard) = self.inner.try_lock() {
            return guard;
        }

        let _queued = WaitTicket::new(&self.waiting);
        debug!(label, queued = self.waiters(), "waiting for exclusive lock");
        self.inner.lock().await
    }

    async fn run_held<F, Fut, T>(
        &self,
        label: &str,
        requested: Instant,
        guard: MutexGuard<'_, ()>,
        operation: F,
    ) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let turn = Turn::new(&self.held, guard);
        let acquired = Instant::now();
        debug!(label, waited = ?acquired.duration_since(requested), "acquired exclusive lock");

        let output = operation().await;
        drop(turn);

        debug!(label, held = ?acquired.elapsed(), "released exclusive lock");
        output
    }
}

/// The running operation's hold on the lock
///
/// Clears the held flag before the guard hands the lock to the next waiter.
struct Turn<'a> {
    held: &'a AtomicBool,
    _guard: MutexGuard<'a, ()>,
}

impl<'a> Turn<'a> {
    fn new(held: &'a AtomicBool, guard: MutexGuard<'a, ()>) -> Self {
        held.store(true, Ordering::SeqCst);
        Self {
            held,
            _guard: guard,
        }
    }
}

impl Drop for Turn<'_> {
    fn drop(&mut self) {
        self.held.store(false, Ordering::SeqCst);
    }
}

/// Counts a queued caller for as long as it is waiting, including when the
/// waiting future is dropped.
struct WaitTicket<'a>(&'a AtomicUsize);

impl<'a> WaitTicket<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for WaitTicket<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_idle_lock_runs_immediately() {
        let lock = ExclusiveLock::new();
        assert_eq!(lock.state(), LockState::Idle);

        let value = lock.run_exclusive("solo", || async { 42 }).await;
        assert_eq!(value, 42);
        assert_eq!(lock.state(), LockState::Idle);
        assert_eq!(lock.waiters(), 0);
    }

    #[tokio::test]
    async fn test_error_output_is_returned_unchanged() {
        let lock = ExclusiveLock::new();
        let result: std::result::Result<(), String> = lock
            .run_exclusive("failing", || async { Err("boom".to_string()) })
            .await;
        assert_eq!(result, Err("boom".to_string()));
        assert_eq!(lock.state(), LockState::Idle);
    }

    #[tokio::test]
    async fn test_held_while_running_and_queue_counted() {
        let lock = Arc::new(ExclusiveLock::new());
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let (started_tx, started_rx) = oneshot::channel::<()>();

        let holder = {
            let lock = Arc::clone(&lock);
            tokio::spawn(async move {
                lock.run_exclusive("holder", || async move {
                    let _ = started_tx.send(());
                    let _ = release_rx.await;
                })
                .await
            })
        };
        started_rx.await.unwrap();
        assert_eq!(lock.state(), LockState::Held);

        let waiter = {
            let lock = Arc::clone(&lock);
            tokio::spawn(async move { lock.run_exclusive("waiter", || async { 7 }).await })
        };
        while lock.waiters() < 1 {
            tokio::task::yield_now().await;
        }
        assert_eq!(lock.waiters(), 1);

        release_tx.send(()).unwrap();
        holder.await.unwrap();
        assert_eq!(waiter.await.unwrap(), 7);
        assert_eq!(lock.waiters(), 0);
        assert_eq!(lock.state(), LockState::Idle);
    }

    #[tokio::test]
    async fn test_reading_state_does_not_take_the_lock() {
        let lock = Arc::new(ExclusiveLock::new());
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let (started_tx, started_rx) = oneshot::channel::<()>();

        let holder = {
            let lock = Arc::clone(&lock);
            tokio::spawn(async move {
                lock.run_exclusive("holder", || async move {
                    let _ = started_tx.send(());
                    let _ = release_rx.await;
                })
                .await
            })
        };
        started_rx.await.unwrap();
        for _ in 0..100 {
            assert_eq!(lock.state(), LockState::Held);
        }
        release_tx.send(()).unwrap();
        holder.await.unwrap();

        // Repeated reads on an idle lock leave the fast path open
        for _ in 0..100 {
            assert_eq!(lock.state(), LockState::Idle);
        }
        let value = lock
            .run_exclusive("reader", || {
                let lock = Arc::clone(&lock);
                async move { (lock.state(), lock.waiters()) }
            })
            .await;
        assert_eq!(value, (LockState::Held, 0));
        assert_eq!(lock.state(), LockState::Idle);
        assert_eq!(lock.waiters(), 0);
    }

    #[tokio::test]
    async fn test_timeout_while_held() {
        let lock = Arc::new(ExclusiveLock::new());
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let (started_tx, started_rx) = oneshot::channel::<()>();

        let holder = {
            let lock = Arc::clone(&lock);
            tokio::spawn(async move {
                lock.run_exclusive("stuck-prompt", || async move {
                    let _ = started_tx.send(());
                    let _ = release_rx.await;
                })
                .await
            })
        };
        started_rx.await.unwrap();

        let result = lock
            .run_exclusive_with_timeout("impatient", Duration::from_millis(20), || async { 1 })
            .await;
        assert!(matches!(result, Err(LockError::AcquireTimeout { .. })));
        assert_eq!(lock.waiters(), 0);

        release_tx.send(()).unwrap();
        holder.await.unwrap();

        let result = lock
            .run_exclusive_with_timeout("patient", Duration::from_millis(20), || async { 2 })
            .await;
        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_panicking_operation_releases_lock() {
        let lock = Arc::new(ExclusiveLock::new());

        let crashed = {
            let lock = Arc::clone(&lock);
            tokio::spawn(async move {
                lock.run_exclusive("panics", || async {
                    panic!("ceremony crashed");
                })
                .await
            })
        };
        assert!(crashed.await.is_err());

        assert_eq!(lock.state(), LockState::Idle);
        assert_eq!(lock.run_exclusive("after", || async { "ok" }).await, "ok");
    }
}
