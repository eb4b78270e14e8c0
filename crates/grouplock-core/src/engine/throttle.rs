//! Global concurrency throttle
//!
//! A counting semaphore of fixed capacity shared by every entity's queue
//! runner. It bounds the total number of concurrently in-flight remote
//! mutation calls regardless of how many entities are correcting drift at
//! once, and carries the platform-wide rate-limit backoff: a `RateLimited`
//! reply from any one entity pauses acquisition for all of them.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::debug;

/// A held throttle slot. Dropping it frees the slot and wakes the oldest
/// waiter (tokio semaphores grant permits in FIFO order of waiting).
#[derive(Debug)]
pub struct ThrottleSlot {
    _permit: OwnedSemaphorePermit,
}

/// Counting semaphore bounding concurrent remote mutations, with a
/// platform-wide pause deadline for rate-limit backoff.
#[derive(Debug)]
pub struct GlobalThrottle {
    slots: Arc<Semaphore>,
    capacity: usize,
    pause_until: Mutex<Option<Instant>>,
}

impl GlobalThrottle {
    /// Create a throttle with the given slot capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
            pause_until: Mutex::new(None),
        }
    }

    /// Acquire a slot, suspending until one is available and any active
    /// pause deadline has passed.
    pub async fn acquire(&self) -> ThrottleSlot {
        loop {
            self.wait_while_paused().await;

            // The semaphore is never closed, so acquisition only fails if
            // the throttle itself was dropped mid-acquire.
            let permit = Arc::clone(&self.slots)
                .acquire_owned()
                .await
                .expect("throttle semaphore closed");

            // A pause may have started while we waited for the permit.
            if self.pause_remaining().is_some() {
                drop(permit);
                continue;
            }

            return ThrottleSlot { _permit: permit };
        }
    }

    /// Pause all acquisition for the given duration. An already-active
    /// longer pause is left in place.
    pub fn pause_for(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        let mut pause = self.pause_until.lock().unwrap();
        match *pause {
            Some(existing) if existing >= deadline => {}
            _ => {
                debug!("throttle paused for {:?}", duration);
                *pause = Some(deadline);
            }
        }
    }

    /// Configured slot capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Currently free slots.
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    fn pause_remaining(&self) -> Option<Duration> {
        let mut pause = self.pause_until.lock().unwrap();
        match *pause {
            Some(deadline) => {
                let now = Instant::now();
                if deadline > now {
                    Some(deadline - now)
                } else {
                    *pause = None;
                    None
                }
            }
            None => None,
        }
    }

    async fn wait_while_paused(&self) {
        while let Some(remaining) = self.pause_remaining() {
            tokio::time::sleep(remaining).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn respects_capacity() {
        let throttle = Arc::new(GlobalThrottle::new(2));

        let a = throttle.acquire().await;
        let _b = throttle.acquire().await;
        assert_eq!(throttle.available(), 0);

        // A third acquire must wait until a slot frees
        let t = Arc::clone(&throttle);
        let waiter = tokio::spawn(async move {
            let _slot = t.acquire().await;
        });

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(a);
        waiter.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn pause_blocks_acquisition_until_deadline() {
        let throttle = Arc::new(GlobalThrottle::new(1));
        throttle.pause_for(Duration::from_secs(30));

        let t = Arc::clone(&throttle);
        let start = Instant::now();
        let waiter = tokio::spawn(async move {
            let _slot = t.acquire().await;
            Instant::now()
        });

        let acquired_at = waiter.await.unwrap();
        assert!(acquired_at - start >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn longer_pause_is_not_shortened() {
        let throttle = GlobalThrottle::new(1);
        throttle.pause_for(Duration::from_secs(60));
        throttle.pause_for(Duration::from_secs(5));

        let remaining = throttle.pause_remaining().unwrap();
        assert!(remaining > Duration::from_secs(50));
    }
}
