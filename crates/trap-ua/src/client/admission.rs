// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Request admission gate.
//!
//! Bounds the number of read, write and subscription-management requests in
//! flight on one connection. The publish loop and channel renewal do not pass
//! through the gate.
//!
//! ```rust,ignore
//! let gate = AdmissionGate::new(2);
//! let results = gate.submit(|tx| async move {
//!     let r = do_read().await;
//!     tx.end_request();
//!     r
//! }).await?;
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

use crate::error::{ConnectionError, UaResult};

/// Counting gate for data-path requests.
#[derive(Clone)]
pub struct AdmissionGate {
    slots: Arc<Semaphore>,
    limit: usize,
}

impl AdmissionGate {
    /// Creates a gate admitting at most `limit` concurrent requests.
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            slots: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    /// Waits for a free slot. Suspends only the calling task.
    pub async fn start_request(&self) -> UaResult<RequestTransaction> {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| ConnectionError::closed("admission gate closed"))?;
        trace!(in_flight = self.in_flight(), limit = self.limit, "Request admitted");
        Ok(RequestTransaction { permit })
    }

    /// Acquires a slot and runs `work` with it.
    ///
    /// `work` owns the transaction and should call
    /// [`RequestTransaction::end_request`] when its request completes. A
    /// transaction dropped without `end_request` releases its slot as well.
    pub async fn submit<F, Fut, T>(&self, work: F) -> UaResult<T>
    where
        F: FnOnce(RequestTransaction) -> Fut,
        Fut: Future<Output = UaResult<T>>,
    {
        let transaction = self.start_request().await?;
        work(transaction).await
    }

    /// Refuses every future `start_request`.
    pub fn close(&self) {
        self.slots.close();
    }

    /// Requests currently admitted.
    pub fn in_flight(&self) -> usize {
        self.limit - self.slots.available_permits()
    }

    /// Free slots.
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Configured limit.
    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl fmt::Debug for AdmissionGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionGate")
            .field("limit", &self.limit)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// One admitted request. Holds its gate slot until ended or dropped.
#[derive(Debug)]
pub struct RequestTransaction {
    permit: OwnedSemaphorePermit,
}

impl RequestTransaction {
    /// Releases the slot.
    pub fn end_request(self) {
        drop(self.permit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_slots_are_released() {
        let gate = AdmissionGate::new(2);
        let a = gate.start_request().await.unwrap();
        let b = gate.start_request().await.unwrap();
        assert_eq!(gate.in_flight(), 2);
        assert_eq!(gate.available(), 0);

        a.end_request();
        assert_eq!(gate.in_flight(), 1);
        drop(b);
        assert_eq!(gate.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_never_exceeds_limit() {
        let gate = AdmissionGate::new(2);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let gate = gate.clone();
                let current = Arc::clone(&current);
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    gate.submit(|tx| async move {
                        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        current.fetch_sub(1, Ordering::SeqCst);
                        tx.end_request();
                        Ok(())
                    })
                    .await
                })
            })
            .collect();

        for task in futures::future::join_all(tasks).await {
            task.unwrap().unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(gate.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_closed_gate_refuses() {
        let gate = AdmissionGate::new(1);
        gate.close();
        assert!(gate.start_request().await.is_err());
    }
}
