// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA client engine.
//!
//! - **Correlation**: transaction ids, the pending-request table and deadlines
//! - **Admission**: a bounded gate for data-path requests
//! - **Channel**: connection phases, channel/session state and token renewal
//! - **Handshake**: request builders and response checks for connect and discovery
//! - **Subscriptions**: publish pacing, acknowledgements and consumers
//! - **Connection**: the [`UaConnection`] that ties them together
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        UaConnection                             │
//! │         connect · discover · read · write · subscribe           │
//! └─────────────────────────────────────────────────────────────────┘
//!        │                    │                        │
//!        ▼                    ▼                        ▼
//! ┌──────────────┐   ┌──────────────────┐   ┌──────────────────────┐
//! │ AdmissionGate│   │ SharedChannel /  │   │ SubscriptionHandle   │
//! │              │   │ KeepAlive        │   │ (publish loop)       │
//! └──────────────┘   └──────────────────┘   └──────────────────────┘
//!        │                    │                        │
//!        └────────────────────┼────────────────────────┘
//!                             ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                Correlator  ◄──  reader task                     │
//! └─────────────────────────────────────────────────────────────────┘
//!                             │
//!                             ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  UaTransport (framed stream)                    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod admission;
pub mod channel;
pub mod connection;
pub mod correlator;
pub mod handshake;
pub mod results;
pub mod session;
pub mod subscription;

pub use admission::{AdmissionGate, RequestTransaction};
pub use channel::{
    ChannelRenewer, ChannelState, ConnectionPhase, KeepAlive, PhaseCell, SessionState,
    SharedChannel,
};
pub use connection::{ConnectionEvent, ConnectionStats, ConnectionStatsSnapshot, UaConnection};
pub use correlator::{Completion, Correlator, Inbound, InboundBody, PendingResponse, SequenceCounter};
pub use handshake::EndpointInfo;
pub use results::FieldResults;
pub use session::IdentitySelection;
pub use subscription::{
    AckQueue, BroadcastConsumer, ChannelConsumer, CycleTimeController, PublishChannel, Sleeper,
    SubscriptionConsumer, SubscriptionEvent, SubscriptionHandle, TokioSleeper,
};
