// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA binary client engine for the TRAP gateway.
//!
//! This crate speaks OPC UA over `opc.tcp` without an external stack. It
//! opens a secure channel, creates and activates a session, reads and writes
//! node values, and runs subscriptions with a self-pacing publish loop.
//!
//! # Features
//!
//! - Hello/Acknowledge, OpenSecureChannel, CreateSession, ActivateSession
//! - Endpoint discovery with GetEndpoints
//! - Request correlation by transaction id with per-request deadlines
//! - Bounded concurrency for read, write and subscription management
//! - Periodic secure channel renewal
//! - Subscriptions with congestion back-off and acknowledgement batching
//! - Binary codec for the built-in types and the `Variant` union
//! - Pluggable message security via [`SecurityProvider`]
//!
//! # Error Handling
//!
//! ```text
//! UaError
//! ├── Connection    - Transport, handshake and sequencing failures
//! ├── Session       - Session creation and activation
//! ├── Security      - Envelope and identity token errors
//! ├── Operation     - Read/write batch errors
//! ├── Subscription  - Subscription and publish errors
//! ├── Encoding      - Malformed binary data
//! ├── Conversion    - Variant to value mapping
//! ├── Configuration - Invalid settings
//! ├── Timeout       - Request deadlines
//! └── ServiceFault  - Server-side rejection of a whole request
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use trap_ua::{ChannelConsumer, NodeId, UaConfig, UaConnection, UaField, UaTag};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = UaConfig::builder()
//!         .endpoint("opc.tcp://localhost:4840")
//!         .build()?;
//!
//!     let connection = UaConnection::new(config)?;
//!     connection.connect().await?;
//!
//!     let fields = vec![UaField::new("temperature", UaTag::new("ns=2;s=Temp".parse::<NodeId>()?))];
//!     println!("{:?}", connection.read(&fields).await?);
//!
//!     let subscription = connection.subscribe(&fields).await?;
//!     let (consumer, mut events) = ChannelConsumer::with_channel(64);
//!     subscription.register(Arc::new(consumer));
//!     while let Some(event) = events.recv().await {
//!         println!("{:?}", event.values);
//!     }
//!
//!     connection.disconnect().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod messages;
pub mod security;
pub mod transport;
pub mod types;
pub mod variant;

// Re-export commonly used types
pub use error::{
    ConfigurationError, ConnectionError, ConversionError, EncodingError, ErrorCode,
    ErrorSeverity, OperationError, RequestPhase, SecurityError, ServiceFaultError, SessionError,
    SubscriptionError, TimeoutError, UaError, UaResult,
};

pub use types::{
    AttributeId, FieldResult, MessageSecurityMode, MonitoringMode, NodeId, NodeIdentifier,
    PlcDataType, PlcValue, ResponseCode, SecurityPolicy, StatusCode, SubscriptionType,
    UaField, UaTag, UserTokenKind,
};

pub use config::{SubscriptionSettings, UaConfig, UaConfigBuilder};

// Re-export client types
pub use client::{
    BroadcastConsumer, ChannelConsumer, ConnectionEvent, ConnectionPhase, ConnectionStatsSnapshot,
    EndpointInfo, FieldResults, SubscriptionConsumer, SubscriptionEvent, SubscriptionHandle,
    UaConnection,
};

pub use codec::{BinaryDecode, BinaryEncode, DataValue};
pub use security::{NoSecurity, SecurityProvider, SharedSecurity};
pub use transport::{StreamTransport, UaTransport};
pub use variant::{Scalar, Variant, VariantTypeId};
