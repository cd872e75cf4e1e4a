//! Priority admission (§4.10): a three-level priority queue that releases waiters FIFO within
//! each level, gating entry into a per-host + global concurrency limiter before a request is
//! admitted into the multiplexing engine.

use crate::config::AdmissionConfig;
use crate::error::RequestError;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    High = 0,
    Normal = 1,
    Low = 2,
}

enum TurnOutcome {
    Go,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShutdownMode {
    Running,
    Graceful,
    Force,
}

struct QueueState {
    levels: [VecDeque<oneshot::Sender<TurnOutcome>>; 3],
    /// Whether a waiter currently holds the turnstile (is mid-acquire).
    active: bool,
    shutdown: ShutdownMode,
}

/// A three-level priority queue. Only one waiter holds the turnstile at a time; releasing it
/// (on success or cancellation) advances to the next waiter in priority order, FIFO within a
/// level. `enqueued - dequeued - cancelled` always equals the number of waiters still queued or
/// holding the turnstile (§8 invariant 6).
struct PriorityQueue {
    state: Mutex<QueueState>,
    enqueued: AtomicU64,
    dequeued: AtomicU64,
    cancelled: AtomicU64,
}

impl PriorityQueue {
    fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                levels: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
                active: false,
                shutdown: ShutdownMode::Running,
            }),
            enqueued: AtomicU64::new(0),
            dequeued: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
        }
    }

    fn try_advance(&self, state: &mut QueueState) {
        if state.active {
            return;
        }
        for level in &mut state.levels {
            if let Some(tx) = level.pop_front() {
                state.active = true;
                self.dequeued.fetch_add(1, Ordering::SeqCst);
                // Waiter may already have dropped its receiver (cancelled mid-queue); that's
                // fine, the turnstile simply advances again on the next release_turn.
                let _ = tx.send(TurnOutcome::Go);
                return;
            }
        }
    }

    fn release_turn(&self) {
        let mut state = self.state.lock().expect("priority queue lock");
        state.active = false;
        self.try_advance(&mut state);
    }

    async fn take_turn(&self, priority: Priority) -> Result<TurnGuard<'_>, RequestError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock().expect("priority queue lock");
            if state.shutdown != ShutdownMode::Running {
                return Err(RequestError::Cancelled);
            }
            state.levels[priority as usize].push_back(tx);
            self.enqueued.fetch_add(1, Ordering::SeqCst);
            self.try_advance(&mut state);
        }

        match rx.await {
            Ok(TurnOutcome::Go) => Ok(TurnGuard { queue: self }),
            Ok(TurnOutcome::Cancelled) | Err(_) => {
                self.cancelled.fetch_add(1, Ordering::SeqCst);
                Err(RequestError::Cancelled)
            }
        }
    }

    /// No further enqueues accepted; every waiter still queued is cancelled.
    fn shutdown(&self) {
        let mut state = self.state.lock().expect("priority queue lock");
        if state.shutdown == ShutdownMode::Running {
            state.shutdown = ShutdownMode::Graceful;
        }
        for level in &mut state.levels {
            for tx in level.drain(..) {
                self.cancelled.fetch_add(1, Ordering::SeqCst);
                let _ = tx.send(TurnOutcome::Cancelled);
            }
        }
    }

    /// As [`Self::shutdown`], and additionally marks the mode as `Force` so callers can tell the
    /// two apart (force shutdown never lets an already-queued waiter proceed, even one whose
    /// turn was about to be signalled).
    fn shutdown_force(&self) {
        self.shutdown();
        self.state.lock().expect("priority queue lock").shutdown = ShutdownMode::Force;
    }

    fn outstanding(&self) -> u64 {
        self.enqueued.load(Ordering::SeqCst)
            - self.dequeued.load(Ordering::SeqCst)
            - self.cancelled.load(Ordering::SeqCst)
    }
}

struct TurnGuard<'a> {
    queue: &'a PriorityQueue,
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        self.queue.release_turn();
    }
}

/// Per-host and global concurrency caps, both enforced simultaneously. Permits are `tokio`
/// owned semaphore permits, so cancellation (dropping the acquire future, or dropping the
/// granted permit on panic/cancellation) can never leak a slot (§8 invariant 7).
struct ConcurrencyLimiter {
    global: Arc<Semaphore>,
    per_host: Mutex<HashMap<String, Arc<Semaphore>>>,
    per_host_limit: usize,
}

impl ConcurrencyLimiter {
    fn new(global_limit: usize, per_host_limit: usize) -> Self {
        Self {
            global: Arc::new(Semaphore::new(global_limit)),
            per_host: Mutex::new(HashMap::new()),
            per_host_limit,
        }
    }

    fn host_semaphore(&self, host: &str) -> Arc<Semaphore> {
        let mut map = self.per_host.lock().expect("concurrency limiter lock");
        map.entry(host.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_host_limit)))
            .clone()
    }

    async fn acquire(&self, host: &str) -> ConcurrencyPermit {
        let host_sem = self.host_semaphore(host);
        let global = self
            .global
            .clone()
            .acquire_owned()
            .await
            .expect("global semaphore is never closed");
        let host = host_sem
            .acquire_owned()
            .await
            .expect("host semaphore is never closed");
        ConcurrencyPermit {
            _global: global,
            _host: host,
        }
    }
}

/// Held for the lifetime of one in-flight request. Dropping it (including via cancellation)
/// releases both the per-host and global permit.
pub struct ConcurrencyPermit {
    _global: OwnedSemaphorePermit,
    _host: OwnedSemaphorePermit,
}

/// The public admission facade: takes a turn in the priority queue, then acquires concurrency
/// permits, handing the caller an [`AdmissionPermit`] that releases everything on drop.
pub struct Admission {
    queue: PriorityQueue,
    limiter: ConcurrencyLimiter,
}

pub struct AdmissionPermit {
    _permit: ConcurrencyPermit,
}

impl Admission {
    pub fn new(config: &AdmissionConfig) -> Self {
        Self {
            queue: PriorityQueue::new(),
            limiter: ConcurrencyLimiter::new(config.global_limit, config.per_host_limit),
        }
    }

    /// Waits for this request's turn (priority order, FIFO within a level), then acquires both
    /// concurrency permits. Fails with `Cancelled` if the queue is shutting down.
    pub async fn acquire(&self, priority: Priority, host: &str) -> Result<AdmissionPermit, RequestError> {
        let turn = self.queue.take_turn(priority).await?;
        let permit = self.limiter.acquire(host).await;
        drop(turn);
        Ok(AdmissionPermit { _permit: permit })
    }

    /// No further enqueue; every currently queued waiter is cancelled.
    pub fn shutdown_graceful(&self) {
        self.queue.shutdown();
    }

    /// As graceful, but documented separately per §4.10 (no queued waiter is allowed to proceed
    /// once force shutdown has been requested).
    pub fn shutdown_force(&self) {
        self.queue.shutdown_force();
    }

    #[cfg(test)]
    fn outstanding(&self) -> u64 {
        self.queue.outstanding()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[tokio::test]
    async fn releases_in_priority_order_fifo_within_level() {
        let admission = Arc::new(Admission::new(&AdmissionConfig {
            global_limit: 1,
            per_host_limit: 1,
        }));
        let order = Arc::new(StdMutex::new(Vec::new()));

        // Hold the only permit so every subsequent acquire() queues up behind the turnstile.
        let holder = admission.acquire(Priority::Normal, "h").await.unwrap();

        let mut handles = Vec::new();
        for (priority, label) in [
            (Priority::Low, "low"),
            (Priority::High, "high-1"),
            (Priority::Normal, "normal"),
            (Priority::High, "high-2"),
        ] {
            let admission = admission.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let _permit = admission.acquire(priority, "h").await.unwrap();
                order.lock().unwrap().push(label);
            }));
        }

        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        drop(holder);
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec!["high-1", "high-2", "normal", "low"]);
    }

    #[tokio::test]
    async fn concurrency_limiter_never_exceeds_global_cap() {
        let admission = Arc::new(Admission::new(&AdmissionConfig {
            global_limit: 2,
            per_host_limit: 2,
        }));
        let in_flight = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let max_seen = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let admission = admission.clone();
            let in_flight = in_flight.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _permit = admission.acquire(Priority::Normal, "h").await.unwrap();
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert!(max_seen.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn cancelled_acquire_does_not_leak_a_permit() {
        let admission = Arc::new(Admission::new(&AdmissionConfig {
            global_limit: 1,
            per_host_limit: 1,
        }));
        let holder = admission.acquire(Priority::Normal, "h").await.unwrap();

        let admission2 = admission.clone();
        let fut = tokio::spawn(async move {
            let _ = admission2.acquire(Priority::Normal, "h").await;
        });
        tokio::task::yield_now().await;
        fut.abort();
        let _ = fut.await;

        drop(holder);
        // If the aborted waiter had leaked a permit, this would hang forever; the test timing
        // out is the failure mode.
        let _permit = admission.acquire(Priority::Normal, "h").await.unwrap();
    }

    #[tokio::test]
    async fn outstanding_count_matches_enqueued_minus_dequeued_minus_cancelled() {
        let admission = Admission::new(&AdmissionConfig {
            global_limit: 1,
            per_host_limit: 1,
        });
        let holder = admission.acquire(Priority::Normal, "h").await.unwrap();
        assert_eq!(admission.outstanding(), 1);
        drop(holder);
        assert_eq!(admission.outstanding(), 0);
    }
}
