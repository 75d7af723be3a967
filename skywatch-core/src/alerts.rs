//! Alert ingress (C6): the shared single-slot mailbox and the interruptible
//! background-listener abstraction that C7 (LVC) and C8 (GRB) build on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use crate::model::Schedule;

/// A single-slot mailbox holding the most recently received schedule,
/// paired with a level-triggered notification. Two alerts arriving before
/// the operator drains the slot coalesce — intentional, since recency beats
/// completeness for preemption.
#[derive(Debug, Default)]
pub struct AlertBuffer {
    slot: Mutex<Option<Schedule>>,
    notify: Notify,
}

impl AlertBuffer {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    /// Writes `schedule` into the slot and raises the notification. Never
    /// blocks on the scheduler.
    pub async fn publish(&self, schedule: Schedule) {
        *self.slot.lock().await = Some(schedule);
        self.notify.notify_one();
    }

    /// Takes and clears whatever is in the slot, if anything.
    pub async fn take(&self) -> Option<Schedule> {
        self.slot.lock().await.take()
    }

    /// Suspends until either the notification fires or `timeout` elapses.
    /// Returns `true` if notified, `false` on timeout.
    pub async fn wait(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.notify.notified()).await.is_ok()
    }
}

/// Source of raw alert payloads for one topic family. The concrete
/// production implementation plugs a broker client (e.g. a GCN/Kafka
/// consumer) in at this seam; tests and the handler's own unit tests use an
/// in-memory stand-in. Mirrors the way the rest of this codebase wraps an
/// external collaborator behind a narrow trait rather than depending on it
/// directly.
#[async_trait]
pub trait AlertSource: Send {
    /// Blocks for up to `timeout` waiting for the next raw payload. Returns
    /// `Ok(None)` on a clean timeout (not an error) so the caller can check
    /// its cancellation token and loop.
    async fn recv_timeout(&mut self, timeout: Duration) -> crate::error::Result<Option<String>>;
}

/// Cooperative cancellation flag shared between a handler's listener task
/// and whoever requests shutdown. Checked between polls so shutdown latency
/// is bounded by the poll period.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The poll period bounding handler shutdown latency (spec P6: an alert
/// received while sleeping wakes the operator within this period).
pub const HANDLER_POLL_PERIOD: Duration = Duration::from_secs(1);

/// Reentrancy lock guarding a handler's construction of its upstream
/// consumer (the broker connection). Held for the duration of that
/// construction; shutdown acquires the same lock before flipping the
/// handler's `CancelFlag`, so it blocks until any construction in flight has
/// finished rather than cancelling a listener that doesn't exist yet.
#[derive(Debug, Clone, Default)]
pub struct ConstructionLock(Arc<Mutex<()>>);

impl ConstructionLock {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(())))
    }

    /// Blocks until any in-flight construction completes, then flips
    /// `cancel`. Call this before waiting on the listener task's handle.
    pub async fn shutdown(&self, cancel: &CancelFlag) {
        let _guard = self.0.lock().await;
        cancel.cancel();
    }
}

/// Builds a handler's `AlertSource` while holding `lock`, then drives it via
/// [`run_listener`] until `cancel` fires. `build` is run to completion before
/// the lock is released, so a shutdown racing the spawn of this task waits
/// for the source to finish constructing.
pub async fn run_listener_guarded<S, B, Fut, F>(
    lock: ConstructionLock,
    build: B,
    cancel: CancelFlag,
    on_message: F,
) where
    B: FnOnce() -> Fut,
    Fut: std::future::Future<Output = S>,
    S: AlertSource,
    F: FnMut(String) -> crate::error::Result<()>,
{
    let source = {
        let _guard = lock.0.lock().await;
        build().await
    };
    run_listener(source, cancel, on_message).await;
}

/// Runs `source` until `cancel` is set, handing each received payload to
/// `on_message`. `on_message` returning an `Err` drops that one message
/// (logged by the caller) without stopping the loop — a handler that fails
/// on one message keeps emitting on the next.
pub async fn run_listener<S, F>(mut source: S, cancel: CancelFlag, mut on_message: F)
where
    S: AlertSource,
    F: FnMut(String) -> crate::error::Result<()>,
{
    while !cancel.is_cancelled() {
        match source.recv_timeout(HANDLER_POLL_PERIOD).await {
            Ok(Some(raw)) => {
                if let Err(err) = on_message(raw) {
                    tracing::error!(error = %err, "alert handler dropped a malformed message");
                }
            }
            Ok(None) => continue,
            Err(err) => {
                tracing::error!(error = %err, "alert source error, handler ceasing to emit");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Target;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn publish_then_take_round_trips() {
        let buffer = AlertBuffer::new();
        let schedule = Schedule::event("ev1", vec![Target::new("t", 1.0, 2.0)], 1, chrono::Utc::now());
        buffer.publish(schedule.clone()).await;
        let taken = buffer.take().await.unwrap();
        assert_eq!(taken.name, "ev1");
        assert!(buffer.take().await.is_none());
    }

    #[tokio::test]
    async fn wait_times_out_with_no_publish() {
        let buffer = AlertBuffer::new();
        let woke = buffer.wait(StdDuration::from_millis(10)).await;
        assert!(!woke);
    }

    #[tokio::test]
    async fn wait_returns_promptly_on_publish() {
        let buffer = Arc::new(AlertBuffer::new());
        let waiter = {
            let buffer = buffer.clone();
            tokio::spawn(async move { buffer.wait(StdDuration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        buffer
            .publish(Schedule::event("ev", vec![], 1, chrono::Utc::now()))
            .await;
        assert!(waiter.await.unwrap());
    }

    struct OnceSource(Option<String>);

    #[async_trait]
    impl AlertSource for OnceSource {
        async fn recv_timeout(&mut self, _timeout: Duration) -> crate::error::Result<Option<String>> {
            Ok(self.0.take())
        }
    }

    #[tokio::test]
    async fn run_listener_stops_when_cancelled() {
        let cancel = CancelFlag::new();
        let cancel_clone = cancel.clone();
        let handle = tokio::spawn(async move {
            run_listener(OnceSource(None), cancel_clone, |_| Ok(())).await;
        });
        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_waits_for_construction_lock() {
        let lock = ConstructionLock::new();
        let cancel = CancelFlag::new();

        let guard = lock.0.clone().lock_owned().await;
        let lock_clone = lock.clone();
        let cancel_clone = cancel.clone();
        let shutdown = tokio::spawn(async move {
            lock_clone.shutdown(&cancel_clone).await;
        });

        tokio::task::yield_now().await;
        assert!(!cancel.is_cancelled());

        drop(guard);
        shutdown.await.unwrap();
        assert!(cancel.is_cancelled());
    }
}
