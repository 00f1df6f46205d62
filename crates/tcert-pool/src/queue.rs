//! Bounded blocking queue
//!
//! One primitive backs the tcert buffer: a `VecDeque` behind a short-lived
//! mutex, with two semaphores counting free slots and ready items. Waiting
//! happens on the semaphores (fair, FIFO), never while holding the mutex.
//!
//! Invariants:
//! - `slots` permits + `ready` permits + in-flight operations == capacity
//! - a `ready` permit exists only after its item is in the deque, so a pop
//!   that acquired one always finds an item
//! - `len` is written under the mutex and is the source of truth for occupancy

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::{Semaphore, SemaphorePermit};

/// Fixed-capacity multi-producer multi-consumer queue.
pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    len: AtomicUsize,
    slots: Semaphore,
    ready: Semaphore,
    capacity: usize,
}

/// A reserved free slot. `put` commits an item into it; dropping the slot
/// without putting releases the space again.
pub struct Slot<'a, T> {
    queue: &'a BoundedQueue<T>,
    permit: SemaphorePermit<'a>,
}

impl<T> Slot<'_, T> {
    pub fn put(self, item: T) {
        self.permit.forget();
        self.queue.commit(item);
    }
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            len: AtomicUsize::new(0),
            slots: Semaphore::new(capacity),
            ready: Semaphore::new(0),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current occupancy. Cheap; does not take the mutex.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for a free slot without committing an item yet.
    ///
    /// Cancel-safe: dropping the future before it resolves reserves nothing.
    pub async fn reserve(&self) -> Slot<'_, T> {
        match self.slots.acquire().await {
            Ok(permit) => Slot { queue: self, permit },
            Err(_) => unreachable!("queue semaphores are never closed"),
        }
    }

    /// Reserve a free slot if one is available right now.
    pub fn try_reserve(&self) -> Option<Slot<'_, T>> {
        self.slots
            .try_acquire()
            .ok()
            .map(|permit| Slot { queue: self, permit })
    }

    /// Push, waiting for as long as the queue is full.
    pub async fn push(&self, item: T) {
        self.reserve().await.put(item);
    }

    /// Push without waiting. Hands the item back if the queue is full.
    pub fn try_push(&self, item: T) -> Result<(), T> {
        match self.try_reserve() {
            Some(slot) => {
                slot.put(item);
                Ok(())
            }
            None => Err(item),
        }
    }

    /// Pop, waiting for as long as the queue is empty.
    ///
    /// Cancel-safe: an item is only removed once the future resolves, so this
    /// can sit inside `tokio::time::timeout` or `select!` without losing items.
    pub async fn pop(&self) -> T {
        match self.ready.acquire().await {
            Ok(permit) => {
                permit.forget();
                self.take()
            }
            Err(_) => unreachable!("queue semaphores are never closed"),
        }
    }

    /// Pop without waiting.
    pub fn try_pop(&self) -> Option<T> {
        let permit = self.ready.try_acquire().ok()?;
        permit.forget();
        Some(self.take())
    }

    /// Remove everything currently queued, stopping as soon as it is empty.
    pub fn drain(&self) -> Vec<T> {
        std::iter::from_fn(|| self.try_pop()).collect()
    }

    fn commit(&self, item: T) {
        {
            let mut items = self.lock();
            items.push_back(item);
            self.len.store(items.len(), Ordering::Release);
        }
        self.ready.add_permits(1);
    }

    fn take(&self) -> T {
        let item = {
            let mut items = self.lock();
            let item = items.pop_front();
            self.len.store(items.len(), Ordering::Release);
            item
        };
        self.slots.add_permits(1);
        match item {
            Some(item) => item,
            None => unreachable!("ready permit acquired with no queued item"),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
