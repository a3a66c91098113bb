// Author: Quayside contributors
// License: MIT

//! The coalesced-broadcast notifier shared by every manager (spec.md §4.2,
//! §9 "coalesced notifier pattern appears in every manager. Factor into one
//! generic component parameterised by (state type, meaningful-change
//! predicate, subscriber-channel set)").
//!
//! A manager posts to `mark_dirty()` whenever its state may have changed. A
//! single debounce task, armed on the first dirty signal of a burst, wakes
//! up 100ms later, snapshots the current state under the owner's read lock,
//! and — if the snapshot differs from the last broadcast one under the
//! manager-supplied predicate — pushes a clone to every subscriber with
//! drop-if-full semantics.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex, RwLock};

/// Minimum gap between a dirty signal and the broadcast it produces.
pub const COALESCE_WINDOW: Duration = Duration::from_millis(100);

/// Bounded per-subscriber channel capacity (spec.md §3 Subscription: "bounded
/// channel (capacity >= 16)").
pub const SUBSCRIBER_CAPACITY: usize = 16;

/// A single subscriber's outbound channel.
pub type SubscriberTx<T> = mpsc::Sender<T>;
pub type SubscriberRx<T> = mpsc::Receiver<T>;

/// Generic coalescing notifier over a snapshot type `T`.
///
/// `T` must be cheaply cloneable (managers keep their authoritative state
/// behind a lock and hand out clones, never references, per spec.md §5
/// "snapshots are taken under read-lock and copied before broadcast").
pub struct Notifier<T: Clone + Send + Sync + 'static> {
    dirty: watch::Sender<()>,
    last_broadcast: Arc<Mutex<Option<T>>>,
    subscribers: Arc<RwLock<Vec<SubscriberTx<T>>>>,
}

impl<T: Clone + Send + Sync + 'static> Notifier<T> {
    /// Spawn the debounce task. `snapshot` is called on the debounce tick to
    /// obtain the current state (it should take the owning manager's
    /// read-lock internally); `meaningfully_changed` decides whether a new
    /// snapshot differs enough from the last broadcast one to be worth
    /// sending (e.g. network ignores Wi-Fi signal deltas below 5 points).
    pub fn spawn<F, P>(snapshot: F, meaningfully_changed: P) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        P: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        let (dirty_tx, mut dirty_rx) = watch::channel(());
        // Mark the initial value seen so the first `changed()` call in the
        // loop below blocks until a real `mark_dirty()` happens.
        dirty_rx.borrow_and_update();

        let last_broadcast: Arc<Mutex<Option<T>>> = Arc::new(Mutex::new(None));
        let subscribers: Arc<RwLock<Vec<SubscriberTx<T>>>> = Arc::new(RwLock::new(Vec::new()));

        let task_last = Arc::clone(&last_broadcast);
        let task_subs = Arc::clone(&subscribers);

        tokio::spawn(async move {
            loop {
                if dirty_rx.changed().await.is_err() {
                    break; // notifier dropped
                }

                tokio::time::sleep(COALESCE_WINDOW).await;
                // Drain any further dirty signals queued during the debounce
                // window; a burst collapses to a single broadcast.
                dirty_rx.borrow_and_update();

                let current = snapshot();

                let mut last = task_last.lock().await;
                let should_send = match last.as_ref() {
                    Some(prev) => meaningfully_changed(prev, &current),
                    None => true,
                };

                if !should_send {
                    continue;
                }

                *last = Some(current.clone());
                drop(last);

                let mut subs = task_subs.write().await;
                subs.retain(|tx| match tx.try_send(current.clone()) {
                    Ok(()) => true,
                    Err(mpsc::error::TrySendError::Full(_)) => true, // drop-if-full, keep subscriber
                    Err(mpsc::error::TrySendError::Closed(_)) => false,
                });
            }
        });

        Self {
            dirty: dirty_tx,
            last_broadcast,
            subscribers,
        }
    }

    /// Post a dirty signal. Non-blocking and idempotent: multiple calls
    /// within one debounce window collapse into a single broadcast.
    pub fn mark_dirty(&self) {
        let _ = self.dirty.send(());
    }

    /// Register a new subscriber, returning the receiving half.
    pub async fn subscribe(&self) -> SubscriberRx<T> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        self.subscribers.write().await.push(tx);
        rx
    }

    /// The most recently broadcast snapshot, if any has happened yet.
    pub async fn last(&self) -> Option<T> {
        self.last_broadcast.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn burst_collapses_to_one_notification() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&counter);

        let notifier: Notifier<u32> = Notifier::spawn(
            move || c.load(Ordering::SeqCst),
            |prev, cur| prev != cur,
        );

        let mut rx = notifier.subscribe().await;

        for v in 1..=5 {
            counter.store(v, Ordering::SeqCst);
            notifier.mark_dirty();
            tokio::time::advance(Duration::from_millis(10)).await;
        }

        tokio::time::advance(Duration::from_millis(200)).await;

        let first = rx.try_recv().expect("expected exactly one notification");
        assert_eq!(first, 5, "payload must equal the final state of the burst");
        assert!(rx.try_recv().is_err(), "burst must coalesce to a single send");
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_snapshot_suppresses_broadcast() {
        let notifier: Notifier<u32> = Notifier::spawn(|| 42, |prev, cur| prev != cur);
        let mut rx = notifier.subscribe().await;

        notifier.mark_dirty();
        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(rx.try_recv().ok(), Some(42));

        notifier.mark_dirty();
        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(rx.try_recv().is_err(), "identical snapshot must not rebroadcast");
    }
}
