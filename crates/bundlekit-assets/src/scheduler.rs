//! Bounded-concurrency gate in front of the bundle loader.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{LoadError, LoadResult};

/// Default number of bundle loads allowed in flight at once.
pub const DEFAULT_MAX_CONCURRENCY: usize = 10;

/// Limits how many physical bundle loads run at the same time.
///
/// Waiters are admitted in FIFO order. A slot is held by a
/// [`SchedulerPermit`] and handed back when the permit is dropped, so every
/// exit path of a load (including failures) frees its slot.
#[derive(Debug, Clone)]
pub struct LoadScheduler {
    slots: Arc<Semaphore>,
    max_concurrency: usize,
    waiting: Arc<AtomicUsize>,
}

/// One admitted slot. Dropping it releases the slot to the next waiter.
#[derive(Debug)]
pub struct SchedulerPermit {
    _permit: OwnedSemaphorePermit,
}

struct WaitingGuard<'a>(&'a AtomicUsize);

impl<'a> WaitingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

impl LoadScheduler {
    /// Create a scheduler admitting at most `max_concurrency` loads (at least one).
    pub fn new(max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            slots: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
            waiting: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Wait for a slot on behalf of `bundle`.
    pub async fn acquire(&self, bundle: &str) -> LoadResult<SchedulerPermit> {
        let _waiting = WaitingGuard::enter(&self.waiting);
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| LoadError::Unknown {
                bundle: bundle.to_string(),
                message: "load scheduler closed".to_string(),
            })?;
        Ok(SchedulerPermit { _permit: permit })
    }

    /// Take a slot without waiting, if one is free.
    pub fn try_acquire(&self) -> Option<SchedulerPermit> {
        self.slots
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| SchedulerPermit { _permit: permit })
    }

    /// The configured limit.
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Number of slots currently held.
    pub fn in_flight(&self) -> usize {
        self.max_concurrency - self.slots.available_permits()
    }

    /// Number of callers suspended in [`acquire`](Self::acquire).
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::Relaxed)
    }
}

impl Default for LoadScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENCY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_zero_concurrency_is_clamped() {
        let scheduler = LoadScheduler::new(0);
        assert_eq!(scheduler.max_concurrency(), 1);
    }

    #[tokio::test]
    async fn test_slots_are_bounded_and_returned() {
        let scheduler = LoadScheduler::new(2);

        let a = scheduler.acquire("a").await.unwrap();
        let b = scheduler.acquire("b").await.unwrap();
        assert_eq!(scheduler.in_flight(), 2);
        assert!(scheduler.try_acquire().is_none());

        drop(a);
        assert_eq!(scheduler.in_flight(), 1);
        let c = scheduler.try_acquire();
        assert!(c.is_some());

        drop(b);
        drop(c);
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_waiters_admitted_in_fifo_order() {
        let scheduler = LoadScheduler::new(1);
        let order = Arc::new(Mutex::new(Vec::new()));
        let held = scheduler.acquire("holder").await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..5 {
            let scheduler = scheduler.clone();
            let order = Arc::clone(&order);
            tasks.push(tokio::spawn(async move {
                let _permit = scheduler.acquire("waiter").await.unwrap();
                order.lock().push(i);
            }));
            // Let the task reach the semaphore queue before spawning the next.
            tokio::task::yield_now().await;
        }
        assert_eq!(scheduler.waiting(), 5);

        drop(held);
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
        assert_eq!(scheduler.waiting(), 0);
        assert_eq!(scheduler.in_flight(), 0);
    }
}
