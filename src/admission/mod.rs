//! Admission control — bound how many fetches may run at once.
//!
//! [`AdmissionController`] is a counting semaphore with FIFO hand-off: a
//! caller that cannot get a permit queues, and each [`signal`] wakes the
//! longest-waiting caller before any later one. It is built on
//! [`tokio::sync::Semaphore`], whose wait queue is fair.
//!
//! Two styles are offered:
//!
//! - [`wait`] / [`signal`] — explicit pairing, for callers that manage the
//!   permit's lifetime themselves. Every `wait` must be matched by exactly one
//!   `signal`, on every path.
//! - [`acquire`] — returns an [`AdmissionPermit`] that signals on drop. This
//!   is what [`ThrottledCache`](crate::cache::ThrottledCache) uses, so error
//!   paths and aborted tasks cannot leak a permit.
//!
//! [`wait`]: AdmissionController::wait
//! [`signal`]: AdmissionController::signal
//! [`acquire`]: AdmissionController::acquire

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Semaphore;
use tracing::{trace, warn};

/// A FIFO counting semaphore with an explicit `wait`/`signal` API.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use reqcache::admission::AdmissionController;
///
/// # #[tokio::main]
/// # async fn main() {
/// let admission = Arc::new(AdmissionController::new(2));
///
/// let first = admission.acquire().await;
/// admission.wait().await;
/// assert_eq!(admission.in_use(), 2);
///
/// drop(first);
/// admission.signal();
/// assert_eq!(admission.in_use(), 0);
/// # }
/// ```
#[derive(Debug)]
pub struct AdmissionController {
    semaphore: Semaphore,
    limit: usize,
    // Permits currently held; `0 <= held <= limit`.
    held: AtomicUsize,
}

impl AdmissionController {
    /// Creates a controller admitting at most `limit` holders (minimum 1).
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Semaphore::new(limit),
            limit,
            held: AtomicUsize::new(0),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of permits currently held.
    pub fn in_use(&self) -> usize {
        self.held.load(Ordering::Acquire)
    }

    /// Takes a permit, suspending in FIFO order while none is free.
    ///
    /// Cancel-safe: dropping the future before it completes takes nothing.
    pub async fn wait(&self) {
        // The semaphore is never closed, so acquisition cannot fail.
        if let Ok(permit) = self.semaphore.acquire().await {
            permit.forget();
            let held = self.held.fetch_add(1, Ordering::AcqRel) + 1;
            trace!(held, limit = self.limit, "admission granted");
        }
    }

    /// Takes a permit without waiting, if one is free.
    pub fn try_wait(&self) -> bool {
        match self.semaphore.try_acquire() {
            Ok(permit) => {
                permit.forget();
                self.held.fetch_add(1, Ordering::AcqRel);
                true
            }
            Err(_) => false,
        }
    }

    /// Returns a permit: wakes the longest waiter, or frees the slot.
    ///
    /// A `signal` with no permit held is logged and ignored, so the count can
    /// never exceed `limit`.
    pub fn signal(&self) {
        let released = self
            .held
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |held| {
                held.checked_sub(1)
            });

        match released {
            Ok(held) => {
                trace!(held = held - 1, "admission released");
                self.semaphore.add_permits(1);
            }
            Err(_) => warn!("signal without a matching wait; ignored"),
        }
    }

    /// Takes a permit that is returned when the guard is dropped.
    pub async fn acquire(self: &Arc<Self>) -> AdmissionPermit {
        self.wait().await;
        AdmissionPermit {
            controller: Arc::clone(self),
        }
    }
}

/// RAII permit from [`AdmissionController::acquire`]; signals on drop.
#[derive(Debug)]
pub struct AdmissionPermit {
    controller: Arc<AdmissionController>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.controller.signal();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn grants_up_to_limit_without_waiting() {
        let admission = AdmissionController::new(3);
        assert!(admission.try_wait());
        assert!(admission.try_wait());
        assert!(admission.try_wait());
        assert!(!admission.try_wait());
        assert_eq!(admission.in_use(), 3);
    }

    #[tokio::test]
    async fn zero_limit_is_clamped_to_one() {
        let admission = AdmissionController::new(0);
        assert_eq!(admission.limit(), 1);
        admission.wait().await;
        assert!(!admission.try_wait());
    }

    #[tokio::test]
    async fn unpaired_signal_is_ignored() {
        let admission = AdmissionController::new(1);
        admission.signal();
        assert_eq!(admission.in_use(), 0);
        assert!(admission.try_wait());
        assert!(!admission.try_wait());
    }

    #[tokio::test]
    async fn waiters_are_released_in_arrival_order() {
        let admission = Arc::new(AdmissionController::new(1));
        let order = Arc::new(Mutex::new(Vec::new()));
        admission.wait().await;

        let mut waiters = Vec::new();
        for i in 0..5 {
            let admission = Arc::clone(&admission);
            let order = Arc::clone(&order);
            waiters.push(tokio::spawn(async move {
                admission.wait().await;
                order.lock().unwrap().push(i);
                admission.signal();
            }));
            // Let the waiter reach the queue before spawning the next one.
            tokio::task::yield_now().await;
        }

        admission.signal();
        for waiter in waiters {
            waiter.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(admission.in_use(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_holders_never_exceed_limit() {
        let admission = Arc::new(AdmissionController::new(3));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..24)
            .map(|_| {
                let admission = Arc::clone(&admission);
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    let _permit = admission.acquire().await;
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(admission.in_use(), 0);
    }

    #[tokio::test]
    async fn cancelled_waiter_does_not_take_a_permit() {
        let admission = Arc::new(AdmissionController::new(1));
        let held = admission.acquire().await;

        let waiter = {
            let admission = Arc::clone(&admission);
            tokio::spawn(async move { admission.wait().await })
        };
        tokio::task::yield_now().await;
        waiter.abort();
        let _ = waiter.await;

        drop(held);
        assert_eq!(admission.in_use(), 0);
        assert!(admission.try_wait());
    }
}
