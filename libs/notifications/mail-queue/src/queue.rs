//! The work queue shared by producers and the dispatch worker.
//!
//! Items live in a lock-protected `VecDeque` (FIFO, unbounded). A `Notify`
//! wakes the consumer when something is pushed. Alongside the items the queue
//! keeps an in-flight counter (queued + being processed) published through a
//! `watch` channel, which backs the "drained" barrier.

use crate::envelope::Envelope;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;

/// Unbounded, thread-safe FIFO queue of envelopes.
#[derive(Debug)]
pub struct WorkQueue {
    items: Mutex<VecDeque<Envelope>>,
    available: Notify,
    in_flight: watch::Sender<usize>,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        let (in_flight, _) = watch::channel(0);
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Notify::new(),
            in_flight,
        }
    }

    /// Append an envelope to the tail and count it as in flight.
    ///
    /// The counter is bumped before the item becomes visible, so a consumer
    /// can never finish it before it was counted.
    pub fn push(&self, envelope: Envelope) {
        self.in_flight.send_modify(|n| *n += 1);
        self.items.lock().push_back(envelope);
        self.available.notify_one();
    }

    /// Remove the head without waiting.
    pub fn try_pop(&self) -> Option<Envelope> {
        self.items.lock().pop_front()
    }

    /// Remove the head, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` if the queue stayed empty for the whole wait. The
    /// returned item is counted in flight until [`InFlightGuard`] for it is
    /// dropped.
    pub async fn pop_timeout(&self, timeout: Duration) -> Option<Envelope> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(envelope) = self.try_pop() {
                return Some(envelope);
            }

            // `notify_one` leaves a permit when nobody is waiting, so a push
            // between the check above and this wait is not lost.
            if tokio::time::timeout_at(deadline, self.available.notified())
                .await
                .is_err()
            {
                return self.try_pop();
            }
        }
    }

    /// Mark one dequeued item as finished.
    pub fn complete(&self) {
        self.in_flight.send_modify(|n| *n = n.saturating_sub(1));
    }

    /// Guard that calls [`WorkQueue::complete`] when dropped.
    pub fn in_flight_guard(&self) -> InFlightGuard<'_> {
        InFlightGuard { queue: self }
    }

    /// Wait until every pushed item has been dequeued and completed.
    pub async fn wait_drained(&self) {
        let mut rx = self.in_flight.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Number of items queued and not yet dequeued.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Queued plus currently-processing items.
    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }
}

/// Completes one in-flight item on drop, on every exit path.
#[must_use = "dropping the guard immediately completes the item"]
pub struct InFlightGuard<'a> {
    queue: &'a WorkQueue,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.queue.complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn envelope(n: usize) -> Envelope {
        Envelope::regular(
            "a@x.com",
            vec![format!("user{n}@x.com")],
            format!("subject {n}"),
            "t",
            "<p>t</p>",
        )
    }

    #[test]
    fn test_fifo_order() {
        let queue = WorkQueue::new();
        for n in 0..3 {
            queue.push(envelope(n));
        }

        assert_eq!(queue.len(), 3);
        for n in 0..3 {
            assert_eq!(queue.try_pop(), Some(envelope(n)));
        }
        assert!(queue.is_empty());
        // Popping does not complete anything.
        assert_eq!(queue.in_flight(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pop_timeout_on_empty_queue() {
        let queue = WorkQueue::new();
        let started = Instant::now();

        assert_eq!(queue.pop_timeout(Duration::from_secs(1)).await, None);
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pop_timeout_wakes_on_push() {
        let queue = Arc::new(WorkQueue::new());

        let producer = Arc::clone(&queue);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            producer.push(envelope(7));
        });

        let started = Instant::now();
        let popped = queue.pop_timeout(Duration::from_secs(10)).await;

        assert_eq!(popped, Some(envelope(7)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_wait_drained_with_nothing_queued_returns_immediately() {
        let queue = WorkQueue::new();
        queue.wait_drained().await;
        assert_eq!(queue.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_guard_completes_item() {
        let queue = Arc::new(WorkQueue::new());
        queue.push(envelope(1));
        queue.push(envelope(2));

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.wait_drained().await })
        };

        for _ in 0..2 {
            let _item = queue.try_pop().unwrap();
            let _guard = queue.in_flight_guard();
        }

        waiter.await.unwrap();
        assert_eq!(queue.in_flight(), 0);
    }

    #[test]
    fn test_concurrent_producers() {
        let queue = Arc::new(WorkQueue::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    for n in 0..25 {
                        queue.push(envelope(t * 100 + n));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(queue.len(), 100);
        assert_eq!(queue.in_flight(), 100);
    }
}
