use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// A counting semaphore bounding concurrent `cat`/`grep`/`map+cat` or
/// `tail`/`map+tail` jobs (spec §4.6 step 4, §5: `MaxConcurrentCats`,
/// `MaxConcurrentTails`).
pub struct Limiter {
    pool: &'static str,
    capacity: usize,
    semaphore: Arc<Semaphore>,
}

impl Limiter {
    #[must_use]
    pub fn new(pool: &'static str, capacity: usize) -> Self {
        Self {
            pool,
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity.max(1))),
        }
    }

    #[must_use]
    pub fn pool(&self) -> &'static str {
        self.pool
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Blocks until a slot is free, returning `None` if `cancel` fires first
    /// (spec §4.6: "limiter acquisition cancelled by context -> silent
    /// teardown").
    pub async fn acquire(&self, cancel: &CancellationToken) -> Option<OwnedSemaphorePermit> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            permit = self.semaphore.clone().acquire_owned() => permit.ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_succeeds_within_capacity() {
        let limiter = Limiter::new("cats", 2);
        let cancel = CancellationToken::new();
        let a = limiter.acquire(&cancel).await;
        let b = limiter.acquire(&cancel).await;
        assert!(a.is_some());
        assert!(b.is_some());
    }

    #[tokio::test]
    async fn acquire_returns_none_when_already_cancelled() {
        let limiter = Limiter::new("tails", 1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(limiter.acquire(&cancel).await.is_none());
    }

    #[tokio::test]
    async fn releasing_a_permit_frees_the_slot() {
        let limiter = Limiter::new("cats", 1);
        let cancel = CancellationToken::new();
        let permit = limiter.acquire(&cancel).await.unwrap();
        drop(permit);
        assert!(limiter.acquire(&cancel).await.is_some());
    }
}
