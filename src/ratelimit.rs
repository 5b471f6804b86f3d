//! Shared-resource policy gates at the API layer: a per-IP token-bucket
//! limiter (delegated to `session_store::RateLimiter`, backed by the KV
//! store) and a process-wide semaphore bounding concurrent in-flight query
//! pipelines.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, SemaphorePermit};

/// Guards the configured number of concurrent query pipelines. Exceeding the
/// bucket returns 429 (handled by the caller via `RateLimiter`); exceeding
/// this semaphore blocks until a slot frees.
pub struct ConcurrentQueryGate {
    semaphore: Arc<Semaphore>,
}

impl ConcurrentQueryGate {
    pub fn new(max_concurrent: usize) -> Self {
        ConcurrentQueryGate { semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))) }
    }

    pub async fn acquire(&self) -> SemaphorePermit<'_> {
        self.semaphore
            .acquire()
            .await
            .expect("query gate semaphore never closes")
    }

    /// `'static` permit for holding across a `tokio::spawn` boundary, as the
    /// chat handler does while the pipeline streams.
    pub async fn acquire_owned(&self) -> OwnedSemaphorePermit {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("query gate semaphore never closes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn gate_admits_up_to_configured_concurrency() {
        let gate = ConcurrentQueryGate::new(2);
        let _a = gate.acquire().await;
        let _b = gate.acquire().await;
        let third = tokio::time::timeout(std::time::Duration::from_millis(50), gate.acquire()).await;
        assert!(third.is_err(), "third acquire should block while two permits are held");
    }
}
