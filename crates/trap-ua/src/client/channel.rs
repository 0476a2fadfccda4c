// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Secure channel state.
//!
//! # Phases
//!
//! ```text
//! Disconnected ──► HelloSent ──► ChannelOpen ──► SessionCreated ──► SessionActive
//!      ▲               │              │                │                  │
//!      │               ▼              ▼                ▼                  ▼
//!      └──────────────────────────── Closing ◄─────────────────────────────┘
//! ```
//!
//! Any phase may also drop straight to `Disconnected` when the transport
//! fails. [`PhaseCell`] rejects every other transition.
//!
//! # Shared state
//!
//! Channel id, token id, lifetime and session credentials are read by every
//! send and written by the open/renew path. They live in one immutable
//! [`ChannelState`] value behind [`SharedChannel`], which readers snapshot
//! and writers swap as a whole.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{ConnectionError, UaResult};
use crate::types::NodeId;

// =============================================================================
// ConnectionPhase
// =============================================================================

/// Lifecycle phase of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    /// No transport.
    #[default]
    Disconnected,
    /// Hello sent, waiting for Acknowledge.
    HelloSent,
    /// Secure channel open.
    ChannelOpen,
    /// CreateSession succeeded.
    SessionCreated,
    /// ActivateSession succeeded; data services are available.
    SessionActive,
    /// Close sequence in progress.
    Closing,
}

impl ConnectionPhase {
    /// Returns `true` if `self -> next` is a legal transition.
    pub fn can_transition_to(&self, next: ConnectionPhase) -> bool {
        use ConnectionPhase::*;
        match (self, next) {
            (_, Disconnected) => true,
            (Disconnected, HelloSent) => true,
            (HelloSent, ChannelOpen) => true,
            (ChannelOpen, SessionCreated) | (ChannelOpen, Closing) => true,
            (SessionCreated, SessionActive) | (SessionCreated, Closing) => true,
            (SessionActive, Closing) => true,
            _ => false,
        }
    }

    /// Returns `true` once the session is usable.
    #[inline]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::SessionActive)
    }

    /// Returns `true` while a secure channel exists.
    #[inline]
    pub fn has_channel(&self) -> bool {
        matches!(
            self,
            Self::ChannelOpen | Self::SessionCreated | Self::SessionActive | Self::Closing
        )
    }

    /// Returns `true` during the handshake.
    #[inline]
    pub fn is_handshaking(&self) -> bool {
        matches!(self, Self::HelloSent | Self::ChannelOpen | Self::SessionCreated)
    }
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "Disconnected",
            Self::HelloSent => "HelloSent",
            Self::ChannelOpen => "ChannelOpen",
            Self::SessionCreated => "SessionCreated",
            Self::SessionActive => "SessionActive",
            Self::Closing => "Closing",
        };
        write!(f, "{}", s)
    }
}

/// Current phase with transition checking.
#[derive(Debug, Default)]
pub struct PhaseCell {
    phase: Mutex<ConnectionPhase>,
}

impl PhaseCell {
    /// Creates a cell in `Disconnected`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase.
    pub fn get(&self) -> ConnectionPhase {
        *self.phase.lock()
    }

    /// Moves to `next`, returning the previous phase.
    pub fn transition(&self, next: ConnectionPhase) -> UaResult<ConnectionPhase> {
        let mut phase = self.phase.lock();
        let previous = *phase;
        if !previous.can_transition_to(next) {
            return Err(ConnectionError::invalid_state(
                format!("a phase that leads to {}", next),
                previous,
            )
            .into());
        }
        *phase = next;
        debug!(from = %previous, to = %next, "Connection phase changed");
        Ok(previous)
    }

    /// Fails unless the current phase is `expected`.
    pub fn require(&self, expected: ConnectionPhase) -> UaResult<()> {
        let current = self.get();
        if current == expected {
            Ok(())
        } else {
            Err(ConnectionError::invalid_state(expected, current).into())
        }
    }
}

// =============================================================================
// ChannelState
// =============================================================================

/// Credentials of an established session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    /// Server-assigned session id.
    pub session_id: NodeId,
    /// Token placed in every request header.
    pub authentication_token: NodeId,
    /// Session timeout granted by the server.
    pub revised_timeout: Duration,
    /// Last nonce received from the server.
    pub server_nonce: Option<Vec<u8>>,
    /// Identity policy used for activation.
    pub policy_id: String,
}

/// Snapshot of the secure channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelState {
    /// Secure channel id (0 until opened).
    pub channel_id: u32,
    /// Current security token id.
    pub token_id: u32,
    /// Token lifetime granted by the server, in milliseconds.
    pub revised_lifetime: u32,
    /// Server time at which the token was issued.
    pub token_created_at: Option<DateTime<Utc>>,
    /// Whether bodies pass through the encryption envelope.
    pub encrypted: bool,
    /// Nonce from the last OpenSecureChannel response.
    pub channel_nonce: Option<Vec<u8>>,
    /// Server certificate learned from CreateSession.
    pub server_certificate: Option<Vec<u8>>,
    /// Session credentials, once created.
    pub session: Option<SessionState>,
}

impl ChannelState {
    /// State before the channel is opened.
    pub fn closed() -> Self {
        Self {
            channel_id: 0,
            token_id: 0,
            revised_lifetime: 0,
            token_created_at: None,
            encrypted: false,
            channel_nonce: None,
            server_certificate: None,
            session: None,
        }
    }

    /// Authentication token for request headers (null without a session).
    pub fn authentication_token(&self) -> NodeId {
        self.session
            .as_ref()
            .map(|s| s.authentication_token.clone())
            .unwrap_or_else(NodeId::null)
    }
}

impl Default for ChannelState {
    fn default() -> Self {
        Self::closed()
    }
}

/// Atomically swapped [`ChannelState`].
#[derive(Debug, Default)]
pub struct SharedChannel {
    state: RwLock<Arc<ChannelState>>,
}

impl SharedChannel {
    /// Creates a closed channel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state. Cheap; the snapshot is never mutated.
    pub fn snapshot(&self) -> Arc<ChannelState> {
        Arc::clone(&self.state.read())
    }

    /// Replaces the whole state.
    pub fn replace(&self, state: ChannelState) {
        *self.state.write() = Arc::new(state);
    }

    /// Applies `f` to a copy of the state and swaps it in.
    pub fn update<F>(&self, f: F) -> Arc<ChannelState>
    where
        F: FnOnce(&mut ChannelState),
    {
        let mut guard = self.state.write();
        let mut next = ChannelState::clone(&guard);
        f(&mut next);
        let next = Arc::new(next);
        *guard = Arc::clone(&next);
        next
    }

    /// Returns to the closed state.
    pub fn reset(&self) {
        self.replace(ChannelState::closed());
    }
}

// =============================================================================
// Keep-Alive Renewal
// =============================================================================

/// Something that can renew the security token of an open channel.
#[async_trait]
pub trait ChannelRenewer: Send + Sync {
    /// Issues one OpenSecureChannel renewal and stores the new token.
    async fn renew_channel(&self) -> UaResult<()>;
}

/// Background task renewing the channel on a fixed interval.
pub struct KeepAlive {
    shutdown: Arc<Notify>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl KeepAlive {
    /// Spawns the renewal loop. The first renewal happens one `interval` from now.
    pub fn start(renewer: Arc<dyn ChannelRenewer>, interval: Duration) -> Self {
        let shutdown = Arc::new(Notify::new());
        let running = Arc::new(AtomicBool::new(true));

        let task_shutdown = Arc::clone(&shutdown);
        let task_running = Arc::clone(&running);
        let handle = tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "Channel renewal started");
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if !task_running.load(Ordering::SeqCst) {
                            break;
                        }
                        if let Err(e) = renewer.renew_channel().await {
                            e.log("channel renewal");
                        }
                    }
                    _ = task_shutdown.notified() => {
                        break;
                    }
                }
            }

            task_running.store(false, Ordering::SeqCst);
            info!("Channel renewal stopped");
        });

        Self {
            shutdown,
            running,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Signals the loop to stop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_one();
    }

    /// Stops the loop and waits for it to exit.
    pub async fn shutdown(&self) {
        self.stop();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Returns `true` while the loop runs.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for KeepAlive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeepAlive")
            .field("running", &self.is_running())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_phase_transitions() {
        use ConnectionPhase::*;
        assert!(Disconnected.can_transition_to(HelloSent));
        assert!(HelloSent.can_transition_to(ChannelOpen));
        assert!(ChannelOpen.can_transition_to(SessionCreated));
        assert!(SessionCreated.can_transition_to(SessionActive));
        assert!(SessionActive.can_transition_to(Closing));
        assert!(Closing.can_transition_to(Disconnected));
        assert!(HelloSent.can_transition_to(Disconnected));

        assert!(!Disconnected.can_transition_to(SessionActive));
        assert!(!HelloSent.can_transition_to(SessionCreated));
        assert!(!SessionActive.can_transition_to(ChannelOpen));
        assert!(!Closing.can_transition_to(SessionActive));
    }

    #[test]
    fn test_phase_cell_rejects_skips() {
        let cell = PhaseCell::new();
        assert!(cell.transition(ConnectionPhase::ChannelOpen).is_err());
        assert_eq!(
            cell.transition(ConnectionPhase::HelloSent).unwrap(),
            ConnectionPhase::Disconnected
        );
        assert!(cell.require(ConnectionPhase::HelloSent).is_ok());
        assert!(cell.require(ConnectionPhase::SessionActive).is_err());
    }

    #[test]
    fn test_shared_channel_swaps_whole_state() {
        let shared = SharedChannel::new();
        let before = shared.snapshot();
        assert_eq!(before.channel_id, 0);
        assert!(before.authentication_token().is_null());

        shared.update(|s| {
            s.channel_id = 7;
            s.token_id = 2;
        });
        assert_eq!(before.channel_id, 0);
        let after = shared.snapshot();
        assert_eq!((after.channel_id, after.token_id), (7, 2));

        shared.reset();
        assert_eq!(shared.snapshot().channel_id, 0);
    }

    struct CountingRenewer(AtomicU32);

    #[async_trait]
    impl ChannelRenewer for CountingRenewer {
        async fn renew_channel(&self) -> UaResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_renews_on_interval() {
        let renewer = Arc::new(CountingRenewer(AtomicU32::new(0)));
        let keepalive = KeepAlive::start(renewer.clone(), Duration::from_secs(30));

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(renewer.0.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(62)).await;
        assert_eq!(renewer.0.load(Ordering::SeqCst), 3);

        keepalive.shutdown().await;
        assert!(!keepalive.is_running());
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(renewer.0.load(Ordering::SeqCst), 3);
    }
}
