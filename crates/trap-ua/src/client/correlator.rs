// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Transaction correlation.
//!
//! Every request is registered under its transaction id before it is sent.
//! The reader task hands each decoded inbound message to
//! [`Correlator::dispatch`], which completes exactly one waiting
//! [`PendingResponse`]:
//!
//! ```text
//!  register(tid) ──► pending[tid] ──┬── dispatch(tid, msg) ──► Response / Fault / Error
//!                                   ├── expire(tid)        ──► Timeout
//!                                   └── fail_all(reason)   ──► Closed
//! ```
//!
//! Whichever path removes the entry first wins; the others become no-ops.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::error::{
    ConnectionError, OperationError, RequestPhase, TimeoutError, UaError, UaResult,
};
use crate::messages::{AcknowledgeMessage, ServiceKind, ServiceResponse};
use crate::types::StatusCode;

// =============================================================================
// SequenceCounter
// =============================================================================

/// Monotonic `u32` generator that never yields 0.
///
/// After `max` the next value is 1 again. Used for transaction ids, request
/// handles and client handles.
#[derive(Debug)]
pub struct SequenceCounter {
    last: AtomicU32,
    max: u32,
}

impl SequenceCounter {
    /// A counter whose first value is 1 and which wraps after `u32::MAX`.
    pub fn new() -> Self {
        Self::with_max(u32::MAX)
    }

    /// A counter that wraps back to 1 after `max`.
    pub fn with_max(max: u32) -> Self {
        Self {
            last: AtomicU32::new(0),
            max: max.max(1),
        }
    }

    /// Returns the next value.
    pub fn next(&self) -> u32 {
        let max = self.max;
        let previous = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                Some(Self::successor(v, max))
            })
            .unwrap_or(0);
        Self::successor(previous, max)
    }

    /// The last value returned by [`next`](Self::next) (0 before the first call).
    pub fn current(&self) -> u32 {
        self.last.load(Ordering::Acquire)
    }

    /// Resets so the next value is 1.
    pub fn reset(&self) {
        self.last.store(0, Ordering::Release);
    }

    #[inline]
    fn successor(value: u32, max: u32) -> u32 {
        if value >= max {
            1
        } else {
            value + 1
        }
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Inbound
// =============================================================================

/// Payload of an inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundBody {
    /// Transport Acknowledge answering Hello (transaction 0).
    Acknowledge(AcknowledgeMessage),
    /// Decoded service response, including ServiceFault.
    Service(ServiceResponse),
}

/// A decoded inbound message with its secure-frame envelope fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    /// Sequence number of the frame.
    pub sequence_number: u32,
    /// Request id (the correlation key).
    pub request_id: u32,
    /// Secure channel id.
    pub channel_id: u32,
    /// Security token id (0 on OPN and ACK).
    pub token_id: u32,
    /// Payload.
    pub body: InboundBody,
}

impl Inbound {
    /// An Acknowledge, correlated under transaction 0.
    pub fn acknowledge(message: AcknowledgeMessage) -> Self {
        Self {
            sequence_number: 0,
            request_id: 0,
            channel_id: 0,
            token_id: 0,
            body: InboundBody::Acknowledge(message),
        }
    }

    /// Kind of the payload.
    pub fn kind(&self) -> ServiceKind {
        match &self.body {
            InboundBody::Acknowledge(_) => ServiceKind::Acknowledge,
            InboundBody::Service(response) => response.kind(),
        }
    }

    /// Consumes the message, returning the service response if there is one.
    pub fn into_service(self) -> UaResult<ServiceResponse> {
        match self.body {
            InboundBody::Service(response) => Ok(response),
            InboundBody::Acknowledge(_) => Err(OperationError::unexpected_response(
                "service response",
                ServiceKind::Acknowledge,
            )
            .into()),
        }
    }
}

/// How a correlated request completed.
#[derive(Debug)]
pub enum Completion {
    /// The expected response arrived.
    Response(Inbound),
    /// The server answered with a ServiceFault.
    Fault {
        /// Service result of the fault.
        status: StatusCode,
        /// Request handle echoed in the fault header.
        request_handle: u32,
    },
}

// =============================================================================
// Correlator
// =============================================================================

struct PendingRequest {
    expected: ServiceKind,
    operation: &'static str,
    phase: RequestPhase,
    registered_at: Instant,
    sink: oneshot::Sender<UaResult<Completion>>,
}

/// Table of in-flight requests keyed by transaction id.
#[derive(Default)]
pub struct Correlator {
    pending: DashMap<u32, PendingRequest>,
}

impl Correlator {
    /// Creates an empty correlator.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a request that expects a response of kind `expected`.
    ///
    /// Fails if `transaction_id` is already pending.
    pub fn register(
        self: &Arc<Self>,
        transaction_id: u32,
        expected: ServiceKind,
        operation: &'static str,
        phase: RequestPhase,
        deadline: Duration,
    ) -> UaResult<PendingResponse> {
        let (sink, receiver) = oneshot::channel();
        match self.pending.entry(transaction_id) {
            Entry::Occupied(_) => {
                return Err(ConnectionError::invalid_state(
                    "free transaction id",
                    format!("transaction {} already pending", transaction_id),
                )
                .into());
            }
            Entry::Vacant(slot) => {
                slot.insert(PendingRequest {
                    expected,
                    operation,
                    phase,
                    registered_at: Instant::now(),
                    sink,
                });
            }
        }

        debug!(
            transaction_id,
            expected = %expected,
            operation,
            phase = %phase,
            "Request registered"
        );

        Ok(PendingResponse {
            transaction_id,
            operation,
            phase,
            deadline,
            receiver,
            correlator: Arc::clone(self),
        })
    }

    /// Completes the request registered under `transaction_id`.
    ///
    /// A ServiceFault is accepted for any expected kind. Any other kind
    /// mismatch completes the request with an error. Returns `false` when no
    /// request was pending (unknown or already completed id).
    pub fn dispatch(&self, transaction_id: u32, inbound: Inbound) -> bool {
        let Some((_, pending)) = self.pending.remove(&transaction_id) else {
            warn!(
                transaction_id,
                kind = %inbound.kind(),
                "No pending request for inbound message, dropping"
            );
            return false;
        };

        let received = inbound.kind();
        let outcome = match &inbound.body {
            InboundBody::Service(ServiceResponse::ServiceFault(fault)) => {
                error!(
                    transaction_id,
                    operation = pending.operation,
                    status = %fault.status(),
                    "Service fault"
                );
                Ok(Completion::Fault {
                    status: fault.status(),
                    request_handle: fault.response_header.request_handle,
                })
            }
            _ if received != pending.expected => {
                warn!(
                    transaction_id,
                    expected = %pending.expected,
                    received = %received,
                    "Unexpected response type"
                );
                Err(OperationError::unexpected_response(pending.expected, received).into())
            }
            _ => Ok(Completion::Response(inbound)),
        };

        debug!(
            transaction_id,
            operation = pending.operation,
            elapsed_us = pending.registered_at.elapsed().as_micros() as u64,
            "Request completed"
        );
        if pending.sink.send(outcome).is_err() {
            debug!(transaction_id, "Requester went away before completion");
        }
        true
    }

    /// Times out the request if it is still pending. Returns `true` if it was.
    pub fn expire(&self, transaction_id: u32, deadline: Duration) -> bool {
        let Some((_, pending)) = self.pending.remove(&transaction_id) else {
            return false;
        };
        warn!(
            transaction_id,
            operation = pending.operation,
            phase = %pending.phase,
            "Request timed out"
        );
        let _ = pending.sink.send(Err(UaError::timeout(TimeoutError::new(
            pending.operation,
            transaction_id,
            deadline,
            pending.phase,
        ))));
        true
    }

    /// Fails the request with `error` if it is still pending.
    pub fn fail(&self, transaction_id: u32, error: UaError) -> bool {
        match self.pending.remove(&transaction_id) {
            Some((_, pending)) => {
                let _ = pending.sink.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Fails every pending request with a closed-connection error.
    pub fn fail_all(&self, reason: &str) -> usize {
        let ids: Vec<u32> = self.pending.iter().map(|e| *e.key()).collect();
        let mut failed = 0;
        for id in ids {
            if self.fail(id, ConnectionError::closed(reason).into()) {
                failed += 1;
            }
        }
        if failed > 0 {
            debug!(failed, reason, "Pending requests failed");
        }
        failed
    }

    /// Returns `true` if `transaction_id` is pending.
    pub fn is_pending(&self, transaction_id: u32) -> bool {
        self.pending.contains_key(&transaction_id)
    }

    /// Number of pending requests.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns `true` if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl fmt::Debug for Correlator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Correlator")
            .field("pending", &self.pending.len())
            .finish()
    }
}

// =============================================================================
// PendingResponse
// =============================================================================

/// Waiter for one registered request.
#[derive(Debug)]
pub struct PendingResponse {
    transaction_id: u32,
    operation: &'static str,
    phase: RequestPhase,
    deadline: Duration,
    receiver: oneshot::Receiver<UaResult<Completion>>,
    correlator: Arc<Correlator>,
}

impl PendingResponse {
    /// Transaction id of the request.
    pub fn transaction_id(&self) -> u32 {
        self.transaction_id
    }

    /// Waits for the completion, expiring the request at its deadline.
    pub async fn wait(mut self) -> UaResult<Completion> {
        match tokio::time::timeout(self.deadline, &mut self.receiver).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ConnectionError::closed("correlator dropped the request").into()),
            Err(_) => {
                // Either expire() or a racing dispatch() has filled the channel.
                self.correlator.expire(self.transaction_id, self.deadline);
                match self.receiver.try_recv() {
                    Ok(outcome) => outcome,
                    Err(_) => Err(self.timeout_error()),
                }
            }
        }
    }

    /// Waits for the response and converts a fault into an error.
    pub async fn response(self) -> UaResult<Inbound> {
        let operation = self.operation;
        match self.wait().await? {
            Completion::Response(inbound) => Ok(inbound),
            Completion::Fault { status, .. } => Err(UaError::service_fault(operation, status)),
        }
    }

    fn timeout_error(&self) -> UaError {
        UaError::timeout(TimeoutError::new(
            self.operation,
            self.transaction_id,
            self.deadline,
            self.phase,
        ))
    }
}

// =============================================================================
// Tests
// =============================================================================
