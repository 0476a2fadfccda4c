// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The client connection.
//!
//! [`UaConnection`] owns one transport, one secure channel and one session.
//! It drives the handshake, sends requests through the [`Correlator`], runs
//! the reader task that feeds responses back, and hosts the keep-alive and
//! publish loops.
//!
//! # Request flow
//!
//! ```text
//! read / write / subscribe                publish loop, renewal, handshake
//!          │                                           │
//!          ▼                                           │
//!   AdmissionGate (bounded)                            │
//!          │                                           │
//!          └──────────────┬────────────────────────────┘
//!                         ▼
//!     tid = next()  ─►  Correlator::register(tid)  ─►  envelope  ─►  transport
//!                                                                       │
//!     reader task ◄──────────────────────────────────────────────────────┘
//!          │ Frame::decode ─► SecurityProvider::decode_inbound
//!          ▼
//!     Correlator::dispatch(request_id)  ─►  waiting caller
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use trap_ua::{UaConfig, UaConnection, UaField, UaTag, NodeId};
//!
//! let connection = UaConnection::new(UaConfig::new("opc.tcp://plc:4840"))?;
//! connection.connect().await?;
//!
//! let fields = vec![UaField::new("speed", UaTag::new(NodeId::numeric(2, 1001)))];
//! let values = connection.read(&fields).await?;
//!
//! connection.disconnect().await?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex as SendLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::admission::AdmissionGate;
use super::channel::{ChannelRenewer, ConnectionPhase, KeepAlive, PhaseCell, SharedChannel};
use super::correlator::{Completion, Correlator, Inbound, InboundBody, SequenceCounter};
use super::handshake::{
    activate_session_request, apply_activate_session, apply_create_session, apply_open_response,
    check_acknowledge, check_sequence, close_channel_request, close_session_request,
    create_session_request, endpoint_info, get_endpoints_request, hello_frame,
    open_channel_request, select_discovery_endpoint, EndpointInfo,
};
use super::results::{
    read_results, read_status, uniform_results, write_results, write_status, FieldResults,
};
use super::session::{generate_nonce, session_name};
use super::subscription::{
    create_monitored_items_request, create_subscription_request, cycle_time_for, PublishChannel,
    Sleeper, SubscriptionHandle, TokioSleeper,
};
use crate::codec::DataValue;
use crate::config::UaConfig;
use crate::error::{
    ConfigurationError, ConnectionError, OperationError, RequestPhase, SubscriptionError, UaError,
    UaResult,
};
use crate::messages::{
    AcknowledgeMessage, ActivateSessionResponse, AsymmetricSecurityHeader, CloseSessionResponse,
    CreateMonitoredItemsResponse, CreateSessionResponse, CreateSubscriptionResponse,
    DeleteSubscriptionsRequest, DeleteSubscriptionsResponse, Frame,
    GetEndpointsResponse, MessageType, OpenSecureChannelResponse, PublishRequest, PublishResponse,
    ReadRequest, ReadResponse, ReadValueId, RequestHeader, SecureFrame, SecurityHeader,
    ServiceKind, ServiceMessage, ServiceRequest, ServiceResponse, SubscriptionAcknowledgement,
    WriteRequest, WriteResponse, WriteValue,
};
use crate::security::{NoSecurity, SharedSecurity};
use crate::transport::{StreamTransport, UaTransport};
use crate::types::{
    AttributeId, PlcValue, SecurityPolicy, SecurityTokenRequestType, StatusCode,
    TimestampsToReturn, UaField,
};
use crate::variant::Variant;

/// Capacity of the connection event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

// =============================================================================
// Events
// =============================================================================

/// Connection lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ConnectionEvent {
    /// The session is active.
    Connected {
        /// Endpoint URL.
        endpoint: String,
    },
    /// The connection was torn down.
    Disconnected {
        /// Why.
        reason: String,
    },
    /// Discovery selected an endpoint.
    Discovered(EndpointInfo),
}

// =============================================================================
// ConnectionStats
// =============================================================================

/// Connection counters.
#[derive(Debug)]
pub struct ConnectionStats {
    requests_sent: AtomicU64,
    responses_received: AtomicU64,
    service_faults: AtomicU64,
    timeouts: AtomicU64,
    publish_responses: AtomicU64,
    notifications_received: AtomicU64,
    channel_renewals: AtomicU64,
    connects: AtomicU64,
}

impl ConnectionStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self {
            requests_sent: AtomicU64::new(0),
            responses_received: AtomicU64::new(0),
            service_faults: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            publish_responses: AtomicU64::new(0),
            notifications_received: AtomicU64::new(0),
            channel_renewals: AtomicU64::new(0),
            connects: AtomicU64::new(0),
        }
    }

    /// Records a request handed to the transport.
    pub fn record_request(&self) {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a decoded inbound frame.
    pub fn record_response(&self) {
        self.responses_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a ServiceFault.
    pub fn record_service_fault(&self) {
        self.service_faults.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a request that hit its deadline.
    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a publish response carrying `notifications` notification blocks.
    pub fn record_publish(&self, notifications: usize) {
        self.publish_responses.fetch_add(1, Ordering::Relaxed);
        self.notifications_received
            .fetch_add(notifications as u64, Ordering::Relaxed);
    }

    /// Records a channel token renewal.
    pub fn record_renewal(&self) {
        self.channel_renewals.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an established session.
    pub fn record_connect(&self) {
        self.connects.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> ConnectionStatsSnapshot {
        ConnectionStatsSnapshot {
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            responses_received: self.responses_received.load(Ordering::Relaxed),
            service_faults: self.service_faults.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            publish_responses: self.publish_responses.load(Ordering::Relaxed),
            notifications_received: self.notifications_received.load(Ordering::Relaxed),
            channel_renewals: self.channel_renewals.load(Ordering::Relaxed),
            connects: self.connects.load(Ordering::Relaxed),
        }
    }

    /// Zeroes every counter.
    pub fn reset(&self) {
        self.requests_sent.store(0, Ordering::Relaxed);
        self.responses_received.store(0, Ordering::Relaxed);
        self.service_faults.store(0, Ordering::Relaxed);
        self.timeouts.store(0, Ordering::Relaxed);
        self.publish_responses.store(0, Ordering::Relaxed);
        self.notifications_received.store(0, Ordering::Relaxed);
        self.channel_renewals.store(0, Ordering::Relaxed);
        self.connects.store(0, Ordering::Relaxed);
    }
}

impl Default for ConnectionStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable copy of [`ConnectionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatsSnapshot {
    /// Requests handed to the transport.
    pub requests_sent: u64,
    /// Inbound secure frames decoded.
    pub responses_received: u64,
    /// ServiceFaults received.
    pub service_faults: u64,
    /// Requests that hit their deadline.
    pub timeouts: u64,
    /// Publish responses received.
    pub publish_responses: u64,
    /// Notification blocks received in publish responses.
    pub notifications_received: u64,
    /// Channel token renewals.
    pub channel_renewals: u64,
    /// Sessions established.
    pub connects: u64,
}

// =============================================================================
// Internals
// =============================================================================

/// How an outbound service body is framed.
#[derive(Debug, Clone, Copy)]
enum Envelope {
    /// OPN with an asymmetric header for `policy`.
    Open(SecurityPolicy),
    /// MSG.
    Message,
    /// CLO.
    Close,
}

impl Envelope {
    fn message_type(&self) -> MessageType {
        match self {
            Self::Open(_) => MessageType::OpenSecureChannel,
            Self::Message => MessageType::Message,
            Self::Close => MessageType::CloseSecureChannel,
        }
    }
}

/// A correlated reply: the response with its frame sequence number, or a fault.
enum Reply<R> {
    Message { response: R, sequence_number: u32 },
    Fault(StatusCode),
}

impl<R> Reply<R> {
    fn into_response(self, operation: &'static str) -> UaResult<(R, u32)> {
        match self {
            Self::Message {
                response,
                sequence_number,
            } => Ok((response, sequence_number)),
            Self::Fault(status) => Err(UaError::service_fault(operation, status)),
        }
    }
}

struct ConnectionInner {
    config: UaConfig,
    security: SharedSecurity,
    phase: PhaseCell,
    channel: SharedChannel,
    transaction_ids: SequenceCounter,
    request_handles: SequenceCounter,
    send_lock: SendLock<()>,
    correlator: Arc<Correlator>,
    gate: RwLock<AdmissionGate>,
    transport: RwLock<Option<Arc<dyn UaTransport>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    keepalive: Mutex<Option<KeepAlive>>,
    subscriptions: Mutex<HashMap<u32, SubscriptionHandle>>,
    discovered: RwLock<Option<EndpointInfo>>,
    connected: AtomicBool,
    events: broadcast::Sender<ConnectionEvent>,
    stats: ConnectionStats,
    sleeper: Arc<dyn Sleeper>,
}

// =============================================================================
// UaConnection
// =============================================================================

/// An OPC UA client connection.
///
/// Cloning yields another handle to the same connection.
#[derive(Clone)]
pub struct UaConnection {
    inner: Arc<ConnectionInner>,
}

impl UaConnection {
    /// Creates a connection without message security.
    ///
    /// Fails if the configuration is invalid or names an encrypting policy.
    pub fn new(config: UaConfig) -> UaResult<Self> {
        if config.is_encrypted() {
            return Err(ConfigurationError::invalid_value(
                "security_policy",
                format!("{} requires a security provider", config.security_policy),
            )
            .into());
        }
        Self::with_security(config, Arc::new(NoSecurity))
    }

    /// Creates a connection using `security` for the message envelope.
    pub fn with_security(config: UaConfig, security: SharedSecurity) -> UaResult<Self> {
        config.validate()?;
        if security.policy() != config.security_policy {
            return Err(ConfigurationError::invalid_value(
                "security_policy",
                format!(
                    "configured {} but the provider implements {}",
                    config.security_policy,
                    security.policy()
                ),
            )
            .into());
        }

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let gate = AdmissionGate::new(config.max_concurrent_requests);
        Ok(Self {
            inner: Arc::new(ConnectionInner {
                config,
                security,
                phase: PhaseCell::new(),
                channel: SharedChannel::new(),
                transaction_ids: SequenceCounter::new(),
                request_handles: SequenceCounter::new(),
                send_lock: SendLock::new(()),
                correlator: Correlator::new(),
                gate: RwLock::new(gate),
                transport: RwLock::new(None),
                reader: Mutex::new(None),
                keepalive: Mutex::new(None),
                subscriptions: Mutex::new(HashMap::new()),
                discovered: RwLock::new(None),
                connected: AtomicBool::new(false),
                events,
                stats: ConnectionStats::new(),
                sleeper: Arc::new(TokioSleeper),
            }),
        })
    }

    /// Replaces the sleeper used by publish loops. Only effective before connecting.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.sleeper = sleeper;
        } else {
            warn!("Connection already shared, sleeper not replaced");
        }
        self
    }

    /// Uses a previously discovered endpoint for the next connect.
    pub fn with_endpoint_info(self, info: EndpointInfo) -> Self {
        *self.inner.discovered.write() = Some(info);
        self
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Configuration.
    pub fn config(&self) -> &UaConfig {
        &self.inner.config
    }

    /// Current phase.
    pub fn phase(&self) -> ConnectionPhase {
        self.inner.phase.get()
    }

    /// Returns `true` while the session is active.
    pub fn is_connected(&self) -> bool {
        self.inner.phase.get().is_active()
    }

    /// Subscribes to lifecycle events.
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> ConnectionStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// The endpoint selected by the last discovery, if any.
    pub fn discovered_endpoint(&self) -> Option<EndpointInfo> {
        self.inner.discovered.read().clone()
    }

    /// Live subscriptions.
    pub fn subscriptions(&self) -> Vec<SubscriptionHandle> {
        self.inner.subscriptions.lock().values().cloned().collect()
    }

    /// Requests waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.inner.correlator.len()
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Connects over TCP to the configured endpoint.
    ///
    /// With an encrypting policy and no known endpoint, discovery runs first
    /// over a separate connection.
    pub async fn connect(&self) -> UaResult<()> {
        let address = self.tcp_address()?;
        if self.inner.config.is_encrypted() && self.discovered_endpoint().is_none() {
            let discovery = self.open_tcp(&address).await?;
            self.discover_with_transport(discovery).await?;
        }
        let transport = self.open_tcp(&address).await?;
        self.connect_with_transport(transport).await
    }

    /// Runs the connect sequence over an already open transport.
    ///
    /// Hello, OpenSecureChannel, CreateSession and ActivateSession are sent
    /// in order. Exactly one [`ConnectionEvent::Connected`] is emitted on
    /// success. On failure everything is torn down and no event is emitted.
    pub async fn connect_with_transport<T>(&self, transport: T) -> UaResult<()>
    where
        T: UaTransport + 'static,
    {
        let inner = &self.inner;
        inner.phase.require(ConnectionPhase::Disconnected)?;
        info!(endpoint = %inner.config.endpoint, peer = %transport.peer(), "Connecting");
        inner.install(Arc::new(transport));

        match inner.establish().await {
            Ok(()) => {
                inner.stats.record_connect();
                inner.connected.store(true, Ordering::SeqCst);
                inner.start_keepalive();
                info!("Connected");
                let _ = inner.events.send(ConnectionEvent::Connected {
                    endpoint: inner.config.endpoint.clone(),
                });
                Ok(())
            }
            Err(e) => {
                e.log("connect");
                inner.teardown("connect failed").await;
                Err(e)
            }
        }
    }

    /// Disconnects gracefully.
    ///
    /// Publish loops and channel renewal stop, then CloseSession and
    /// CloseSecureChannel are attempted within the close timeout. Emits
    /// [`ConnectionEvent::Disconnected`] if the connection was up.
    pub async fn disconnect(&self) -> UaResult<()> {
        self.inner.shutdown("client disconnect").await;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Discovery
    // -------------------------------------------------------------------------

    /// Discovers the configured endpoint over a fresh TCP connection.
    pub async fn discover(&self) -> UaResult<EndpointInfo> {
        let address = self.tcp_address()?;
        let transport = self.open_tcp(&address).await?;
        self.discover_with_transport(transport).await
    }

    /// Runs GetEndpoints over an unsecured channel on `transport`.
    ///
    /// The endpoint matching the configured URL and policy is remembered for
    /// the next connect. The discovery channel is closed afterwards.
    pub async fn discover_with_transport<T>(&self, transport: T) -> UaResult<EndpointInfo>
    where
        T: UaTransport + 'static,
    {
        let inner = &self.inner;
        inner.phase.require(ConnectionPhase::Disconnected)?;
        info!(endpoint = %inner.config.endpoint, peer = %transport.peer(), "Discovering endpoints");
        inner.install(Arc::new(transport));

        let outcome = inner.discover().await;
        inner.teardown("discovery complete").await;

        let info = outcome.map_err(|e| {
            e.log("discovery");
            e
        })?;
        *inner.discovered.write() = Some(info.clone());
        info!(
            policy = %info.security_policy_uri,
            thumbprint = info.thumbprint.as_deref().unwrap_or("-"),
            "Endpoint discovered"
        );
        let _ = inner.events.send(ConnectionEvent::Discovered(info.clone()));
        Ok(info)
    }

    // -------------------------------------------------------------------------
    // Read / Write
    // -------------------------------------------------------------------------

    /// Reads the `Value` attribute of every field.
    ///
    /// Results are keyed by field name. Per-field failures are reported in
    /// the result; only transport, timeout and protocol errors fail the call.
    pub async fn read(&self, fields: &[UaField]) -> UaResult<FieldResults> {
        if fields.is_empty() {
            return Err(OperationError::EmptyRequest { operation: "Read" }.into());
        }
        let inner = &self.inner;
        inner.require_active()?;

        let gate = inner.gate.read().clone();
        let reply = gate
            .submit(|transaction| async move {
                let state = inner.channel.snapshot();
                let request = ReadRequest {
                    request_header: inner.request_header(state.authentication_token()),
                    max_age: 0.0,
                    timestamps_to_return: TimestampsToReturn::Neither,
                    nodes_to_read: fields
                        .iter()
                        .map(|f| ReadValueId::value_of(f.tag.node_id.clone()))
                        .collect(),
                };
                let reply = inner.data_call::<ReadResponse>(request, "Read").await;
                transaction.end_request();
                reply
            })
            .await?;

        match reply {
            Reply::Fault(status) => Ok(uniform_results(fields, status, read_status)),
            Reply::Message { response, .. } => {
                let status = response.response_header.service_result;
                if status.is_bad() {
                    warn!(status = %status, "Read rejected as a whole");
                    return Ok(uniform_results(fields, status, read_status));
                }
                read_results(fields, &response.results)
            }
        }
    }

    /// Writes `values[i]` to `fields[i]`.
    ///
    /// Every value is converted to the field's declared type before anything
    /// is sent; a conversion failure fails the whole call.
    pub async fn write(&self, fields: &[UaField], values: &[PlcValue]) -> UaResult<FieldResults> {
        if fields.is_empty() {
            return Err(OperationError::EmptyRequest { operation: "Write" }.into());
        }
        if fields.len() != values.len() {
            return Err(OperationError::ResultCountMismatch {
                operation: "Write",
                expected: fields.len(),
                actual: values.len(),
            }
            .into());
        }
        let nodes_to_write = fields
            .iter()
            .zip(values)
            .map(|(field, value)| {
                Ok(WriteValue {
                    node_id: field.tag.node_id.clone(),
                    attribute_id: AttributeId::Value.value(),
                    index_range: None,
                    value: DataValue::new(Variant::from_plc_value(&field.tag.data_type, value)?),
                })
            })
            .collect::<UaResult<Vec<_>>>()?;

        let inner = &self.inner;
        inner.require_active()?;

        let gate = inner.gate.read().clone();
        let reply = gate
            .submit(|transaction| async move {
                let state = inner.channel.snapshot();
                let request = WriteRequest {
                    request_header: inner.request_header(state.authentication_token()),
                    nodes_to_write,
                };
                let reply = inner.data_call::<WriteResponse>(request, "Write").await;
                transaction.end_request();
                reply
            })
            .await?;

        match reply {
            Reply::Fault(status) => Ok(uniform_results(fields, status, write_status)),
            Reply::Message { response, .. } => {
                let status = response.response_header.service_result;
                if status.is_bad() {
                    warn!(status = %status, "Write rejected as a whole");
                    return Ok(uniform_results(fields, status, write_status));
                }
                write_results(fields, &response.results)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------------

    /// Creates a subscription monitoring `fields` and starts its publish loop.
    ///
    /// The publishing interval is the first field's interval or the
    /// configured default. Register consumers on the returned handle.
    pub async fn subscribe(&self, fields: &[UaField]) -> UaResult<SubscriptionHandle> {
        if fields.is_empty() {
            return Err(SubscriptionError::NoFields.into());
        }
        let inner = &self.inner;
        inner.require_active()?;

        let settings = &inner.config.subscription;
        let cycle_time = cycle_time_for(fields, settings);

        let gate = inner.gate.read().clone();
        let subscription_id = gate
            .submit(|transaction| async move {
                let outcome = inner.create_subscription(fields, cycle_time).await;
                transaction.end_request();
                outcome
            })
            .await?;

        let handle = SubscriptionHandle::new(
            subscription_id,
            cycle_time,
            fields.iter().map(|f| f.name.clone()).collect(),
            settings.max_revised_cycle_time,
        );
        inner
            .subscriptions
            .lock()
            .insert(subscription_id, handle.clone());

        let deadline = inner.config.request_timeout
            + cycle_time.saturating_mul(settings.max_keep_alive_count.max(1));
        let link = Arc::new(PublishLink {
            inner: Arc::downgrade(inner),
            deadline,
        });
        handle.start(link, Arc::clone(&inner.sleeper));
        info!(
            subscription_id,
            fields = fields.len(),
            cycle_ms = cycle_time.as_millis() as u64,
            "Subscription created"
        );
        Ok(handle)
    }

    /// Stops a subscription's publish loop and deletes it on the server.
    ///
    /// Deletion is best effort; failures are logged.
    pub async fn unsubscribe(&self, handle: &SubscriptionHandle) -> UaResult<()> {
        let subscription_id = handle.subscription_id();
        handle.stop();
        let known = self.inner.subscriptions.lock().remove(&subscription_id).is_some();
        if !known || !self.is_connected() {
            return Ok(());
        }

        let inner = &self.inner;
        let gate = inner.gate.read().clone();
        let outcome = gate
            .submit(|transaction| async move {
                let state = inner.channel.snapshot();
                let request = DeleteSubscriptionsRequest {
                    request_header: inner.request_header(state.authentication_token()),
                    subscription_ids: vec![subscription_id],
                };
                let reply = inner
                    .data_call::<DeleteSubscriptionsResponse>(request, "DeleteSubscriptions")
                    .await;
                transaction.end_request();
                reply?.into_response("DeleteSubscriptions")
            })
            .await;

        match outcome {
            Ok((response, _)) => {
                let status = response.results.first().copied().unwrap_or(StatusCode::GOOD);
                debug!(subscription_id, status = %status, "Subscription deleted");
            }
            Err(e) => warn!(subscription_id, error = %e, "Subscription deletion failed"),
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    fn tcp_address(&self) -> UaResult<String> {
        let config = &self.inner.config;
        config.host_port().ok_or_else(|| {
            ConfigurationError::invalid_endpoint(&config.endpoint, "expected opc.tcp://host[:port]")
                .into()
        })
    }

    async fn open_tcp(
        &self,
        address: &str,
    ) -> UaResult<StreamTransport<tokio::net::tcp::OwnedReadHalf, tokio::net::tcp::OwnedWriteHalf>>
    {
        let transport =
            StreamTransport::connect_tcp(address, self.inner.config.request_timeout).await?;
        Ok(transport.with_max_frame_size(self.inner.config.max_message_size as usize))
    }
}

impl fmt::Debug for UaConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UaConnection")
            .field("endpoint", &self.inner.config.endpoint)
            .field("phase", &self.inner.phase.get())
            .field("pending", &self.inner.correlator.len())
            .finish()
    }
}

// =============================================================================
// ConnectionInner: sequences
// =============================================================================

impl ConnectionInner {
    /// Handshake steps after the transport is installed.
    async fn establish(&self) -> UaResult<()> {
        let config = &self.config;

        self.hello().await?;

        // OpenSecureChannel
        let client_nonce = config.is_encrypted().then(generate_nonce);
        let request = open_channel_request(
            config,
            config.security_policy,
            SecurityTokenRequestType::Issue,
            self.request_handles.next(),
            client_nonce,
        );
        let (response, sequence) = self
            .handshake_call::<OpenSecureChannelResponse>(
                Envelope::Open(config.security_policy),
                request.into(),
                "OpenSecureChannel",
                None,
            )
            .await?;
        let mut opened = apply_open_response(&self.channel.snapshot(), &response, config.is_encrypted())?;
        if opened.server_certificate.is_none() {
            opened.server_certificate = self
                .discovered
                .read()
                .as_ref()
                .and_then(|info| info.server_certificate.clone());
        }
        self.channel.replace(opened);
        self.phase.transition(ConnectionPhase::ChannelOpen)?;

        // CreateSession
        let request = create_session_request(
            config,
            self.request_handles.next(),
            session_name(&config.application_name),
            generate_nonce(),
            self.security.client_certificate(),
        );
        let (response, sequence) = self
            .handshake_call::<CreateSessionResponse>(
                Envelope::Message,
                request.into(),
                "CreateSession",
                Some(sequence),
            )
            .await?;
        let (created, identity) = apply_create_session(&self.channel.snapshot(), &response, config)?;
        self.channel.replace(created);
        self.phase.transition(ConnectionPhase::SessionCreated)?;

        // ActivateSession
        let request_handle = self.request_handles.next();
        let request = activate_session_request(
            &self.channel.snapshot(),
            &identity,
            config,
            request_handle,
            self.security.as_ref(),
        )?;
        let (response, _) = self
            .handshake_call::<ActivateSessionResponse>(
                Envelope::Message,
                request.into(),
                "ActivateSession",
                Some(sequence),
            )
            .await?;
        let activated = apply_activate_session(&self.channel.snapshot(), request_handle, &response)?;
        self.channel.replace(activated);
        self.phase.transition(ConnectionPhase::SessionActive)?;
        Ok(())
    }

    /// Hello, OpenSecureChannel (no security) and GetEndpoints.
    async fn discover(&self) -> UaResult<EndpointInfo> {
        let config = &self.config;
        self.hello().await?;

        let request = open_channel_request(
            config,
            SecurityPolicy::None,
            SecurityTokenRequestType::Issue,
            self.request_handles.next(),
            None,
        );
        let (response, sequence) = self
            .handshake_call::<OpenSecureChannelResponse>(
                Envelope::Open(SecurityPolicy::None),
                request.into(),
                "OpenSecureChannel",
                None,
            )
            .await?;
        let opened = apply_open_response(&self.channel.snapshot(), &response, false)?;
        self.channel.replace(opened);
        self.phase.transition(ConnectionPhase::ChannelOpen)?;

        let request = get_endpoints_request(config, self.request_handles.next());
        let (response, _) = self
            .handshake_call::<GetEndpointsResponse>(
                Envelope::Message,
                request.into(),
                "GetEndpoints",
                Some(sequence),
            )
            .await?;
        debug!(advertised = response.endpoints.len(), "Endpoints received");
        let endpoint = select_discovery_endpoint(&response.endpoints, config)?;
        let info = endpoint_info(endpoint, self.security.as_ref());

        self.phase.transition(ConnectionPhase::Closing)?;
        self.send_close_channel().await;
        Ok(info)
    }

    /// Sends Hello and waits for the Acknowledge (transaction 0).
    async fn hello(&self) -> UaResult<AcknowledgeMessage> {
        self.phase.transition(ConnectionPhase::HelloSent)?;
        let pending = self.correlator.register(
            0,
            ServiceKind::Acknowledge,
            "Hello",
            RequestPhase::Handshake,
            self.config.request_timeout,
        )?;
        let transport = self.transport()?;
        if let Err(e) = transport.send(&hello_frame(&self.config).encode()).await {
            self.correlator
                .fail(0, ConnectionError::closed("hello not sent").into());
            return Err(e);
        }
        self.stats.record_request();

        let ack = match pending.response().await?.body {
            InboundBody::Acknowledge(ack) => ack,
            InboundBody::Service(other) => {
                return Err(
                    OperationError::unexpected_response(ServiceKind::Acknowledge, other.kind())
                        .into(),
                )
            }
        };
        check_acknowledge(&ack)?;
        Ok(ack)
    }

    /// Issues a new channel token over the open channel.
    async fn renew(&self) -> UaResult<()> {
        if !self.phase.get().is_active() {
            debug!(phase = %self.phase.get(), "Renewal skipped");
            return Ok(());
        }
        let policy = self.config.security_policy;
        let client_nonce = self.config.is_encrypted().then(generate_nonce);
        let request = open_channel_request(
            &self.config,
            policy,
            SecurityTokenRequestType::Issue,
            self.request_handles.next(),
            client_nonce,
        );
        let (response, _) = self
            .call::<OpenSecureChannelResponse>(
                Envelope::Open(policy),
                request.into(),
                "OpenSecureChannel",
                RequestPhase::DataPath,
                self.config.request_timeout,
                None,
            )
            .await?
            .into_response("OpenSecureChannel")?;
        let renewed = apply_open_response(&self.channel.snapshot(), &response, self.config.is_encrypted())?;
        let token_id = renewed.token_id;
        self.channel.replace(renewed);
        self.stats.record_renewal();
        debug!(token_id, "Secure channel renewed");
        Ok(())
    }

    /// CreateSubscription followed by CreateMonitoredItems.
    async fn create_subscription(&self, fields: &[UaField], cycle_time: Duration) -> UaResult<u32> {
        let settings = &self.config.subscription;
        let state = self.channel.snapshot();

        let request = create_subscription_request(
            self.request_header(state.authentication_token()),
            cycle_time,
            settings,
        );
        let (created, _) = self
            .data_call::<CreateSubscriptionResponse>(request, "CreateSubscription")
            .await?
            .into_response("CreateSubscription")
            .map_err(|e| SubscriptionError::creation_failed(e.to_string()))?;
        let status = created.response_header.service_result;
        if status.is_bad() {
            return Err(
                SubscriptionError::creation_failed(format!("server returned {}", status)).into(),
            );
        }
        let subscription_id = created.subscription_id;
        debug!(
            subscription_id,
            revised_interval_ms = created.revised_publishing_interval,
            "Subscription accepted"
        );

        let request = create_monitored_items_request(
            self.request_header(state.authentication_token()),
            subscription_id,
            fields,
            cycle_time,
            settings,
        );
        let (monitored, _) = self
            .data_call::<CreateMonitoredItemsResponse>(request, "CreateMonitoredItems")
            .await?
            .into_response("CreateMonitoredItems")
            .map_err(|e| SubscriptionError::MonitoredItemsFailed {
                subscription_id,
                message: e.to_string(),
            })?;
        let status = monitored.response_header.service_result;
        if status.is_bad() {
            return Err(SubscriptionError::MonitoredItemsFailed {
                subscription_id,
                message: format!("server returned {}", status),
            }
            .into());
        }
        for (field, result) in fields.iter().zip(&monitored.results) {
            if result.status_code.is_bad() {
                warn!(
                    subscription_id,
                    field = %field.name,
                    status = %result.status_code,
                    "Monitored item rejected"
                );
            }
        }
        Ok(subscription_id)
    }

    /// Graceful shutdown: stop loops, close session and channel, tear down.
    async fn shutdown(&self, reason: &str) {
        let phase = self.phase.get();
        if matches!(phase, ConnectionPhase::Disconnected | ConnectionPhase::Closing) {
            return;
        }
        info!(reason, "Disconnecting");
        self.stop_background();

        if phase.has_channel() && self.phase.transition(ConnectionPhase::Closing).is_ok() {
            let has_session = matches!(
                phase,
                ConnectionPhase::SessionCreated | ConnectionPhase::SessionActive
            );
            let close = self.close_sequence(has_session);
            if tokio::time::timeout(self.config.close_timeout, close).await.is_err() {
                warn!(
                    timeout_ms = self.config.close_timeout.as_millis() as u64,
                    "Close sequence timed out"
                );
            }
        }
        self.teardown(reason).await;
    }

    /// The transport failed underneath us. No close sequence is attempted.
    async fn connection_lost(&self, reason: &str) {
        let phase = self.phase.get();
        if matches!(phase, ConnectionPhase::Disconnected | ConnectionPhase::Closing) {
            return;
        }
        warn!(reason, phase = %phase, "Connection lost");
        self.stop_background();
        self.teardown(reason).await;
    }

    async fn close_sequence(&self, has_session: bool) {
        if has_session {
            let request = close_session_request(&self.channel.snapshot(), self.request_handles.next());
            match self
                .handshake_call::<CloseSessionResponse>(
                    Envelope::Message,
                    request.into(),
                    "CloseSession",
                    None,
                )
                .await
            {
                Ok(_) => debug!("Session closed"),
                Err(e) => debug!(error = %e, "CloseSession not acknowledged"),
            }
        }
        self.send_close_channel().await;
    }

    /// CloseSecureChannel is fire-and-forget.
    async fn send_close_channel(&self) {
        let request = close_channel_request(
            &self.channel.snapshot(),
            &self.config,
            self.request_handles.next(),
        )
        .into();
        let _send = self.send_lock.lock().await;
        let transaction_id = self.transaction_ids.next();
        if let Err(e) = self.send_request(transaction_id, Envelope::Close, &request).await {
            debug!(error = %e, "CloseSecureChannel not sent");
        }
    }

    fn stop_background(&self) {
        if let Some(keepalive) = self.keepalive.lock().take() {
            keepalive.stop();
        }
        let subscriptions: Vec<SubscriptionHandle> =
            self.subscriptions.lock().drain().map(|(_, h)| h).collect();
        for handle in subscriptions {
            handle.stop();
        }
    }

    /// Releases every resource and returns to `Disconnected`.
    async fn teardown(&self, reason: &str) {
        self.correlator.fail_all(reason);
        self.gate.read().close();

        let transport = self.transport.write().take();
        if let Some(transport) = transport {
            if let Err(e) = transport.close().await {
                debug!(error = %e, "Transport close failed");
            }
        }

        self.channel.reset();
        let _ = self.phase.transition(ConnectionPhase::Disconnected);
        if self.connected.swap(false, Ordering::SeqCst) {
            info!(reason, "Disconnected");
            let _ = self.events.send(ConnectionEvent::Disconnected {
                reason: reason.to_string(),
            });
        }

        // Last: this may be the reader task itself.
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
    }
}

// =============================================================================
// ConnectionInner: plumbing
// =============================================================================

impl ConnectionInner {
    /// Resets per-connection state and starts the reader on `transport`.
    fn install(self: &Arc<Self>, transport: Arc<dyn UaTransport>) {
        self.transaction_ids.reset();
        self.request_handles.reset();
        self.channel.reset();
        *self.gate.write() = AdmissionGate::new(self.config.max_concurrent_requests);
        *self.transport.write() = Some(Arc::clone(&transport));

        let reader = spawn_reader(Arc::downgrade(self), transport);
        if let Some(previous) = self.reader.lock().replace(reader) {
            previous.abort();
        }
    }

    fn start_keepalive(self: &Arc<Self>) {
        let renewer = Arc::new(RenewLink {
            inner: Arc::downgrade(self),
        });
        let keepalive = KeepAlive::start(renewer, self.config.keepalive_interval);
        if let Some(previous) = self.keepalive.lock().replace(keepalive) {
            previous.stop();
        }
    }

    fn transport(&self) -> UaResult<Arc<dyn UaTransport>> {
        self.transport
            .read()
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(UaError::not_connected)
    }

    fn require_active(&self) -> UaResult<()> {
        if self.phase.get().is_active() {
            Ok(())
        } else {
            Err(UaError::not_connected())
        }
    }

    fn request_header(&self, authentication_token: crate::types::NodeId) -> RequestHeader {
        RequestHeader::new(
            authentication_token,
            self.request_handles.next(),
            self.config.timeout_hint_ms(),
        )
    }

    /// Frames and sends one service request. Sequence number and request id
    /// are both the transaction id.
    ///
    /// Callers hold `send_lock` from minting `transaction_id` until this
    /// returns, so sequence numbers leave in increasing order.
    async fn send_request(
        &self,
        transaction_id: u32,
        envelope: Envelope,
        request: &ServiceRequest,
    ) -> UaResult<()> {
        let state = self.channel.snapshot();
        let message_type = envelope.message_type();

        let mut body = request.encode_body();
        if state.encrypted {
            body = self.security.encode_outbound(message_type, &body)?;
        }

        let security = match envelope {
            Envelope::Open(policy) => SecurityHeader::Asymmetric(self.asymmetric_header(policy)),
            Envelope::Message | Envelope::Close => SecurityHeader::Symmetric {
                token_id: state.token_id,
            },
        };
        let frame = Frame::Secure(SecureFrame {
            message_type,
            channel_id: state.channel_id,
            security,
            sequence_number: transaction_id,
            request_id: transaction_id,
            body,
        });

        self.transport()?.send(&frame.encode()).await?;
        self.stats.record_request();
        debug!(
            transaction_id,
            kind = %request.kind(),
            message_type = ?message_type,
            "Request sent"
        );
        Ok(())
    }

    fn asymmetric_header(&self, policy: SecurityPolicy) -> AsymmetricSecurityHeader {
        if !policy.is_encrypted() {
            return AsymmetricSecurityHeader {
                security_policy_uri: policy.uri(),
                sender_certificate: None,
                receiver_certificate_thumbprint: None,
            };
        }
        let thumbprint = self
            .discovered
            .read()
            .as_ref()
            .and_then(|info| info.server_certificate.as_deref())
            .and_then(|cert| self.security.thumbprint(cert));
        if thumbprint.is_none() {
            warn!("No server certificate thumbprint for the secure channel request");
        }
        AsymmetricSecurityHeader {
            security_policy_uri: policy.uri(),
            sender_certificate: self.security.client_certificate(),
            receiver_certificate_thumbprint: thumbprint,
        }
    }

    /// Mints a transaction id, registers, sends and waits for one
    /// correlated request.
    ///
    /// With `prior_sequence` the new transaction id must directly follow the
    /// sequence number of the previous handshake response.
    async fn call<R>(
        &self,
        envelope: Envelope,
        request: ServiceRequest,
        operation: &'static str,
        phase: RequestPhase,
        deadline: Duration,
        prior_sequence: Option<u32>,
    ) -> UaResult<Reply<R>>
    where
        R: ServiceMessage + TryFrom<ServiceResponse, Error = UaError>,
    {
        let pending = {
            let _send = self.send_lock.lock().await;
            let transaction_id = self.transaction_ids.next();
            if let Some(prior) = prior_sequence {
                check_sequence(transaction_id, prior)?;
            }
            let pending =
                self.correlator
                    .register(transaction_id, R::KIND, operation, phase, deadline)?;
            if let Err(e) = self.send_request(transaction_id, envelope, &request).await {
                self.correlator
                    .fail(transaction_id, ConnectionError::closed("request not sent").into());
                return Err(e);
            }
            pending
        };

        match pending.wait().await {
            Ok(Completion::Response(inbound)) => {
                let sequence_number = inbound.sequence_number;
                let response = R::try_from(inbound.into_service()?)?;
                Ok(Reply::Message {
                    response,
                    sequence_number,
                })
            }
            Ok(Completion::Fault { status, .. }) => {
                self.stats.record_service_fault();
                Ok(Reply::Fault(status))
            }
            Err(e) => {
                if matches!(e, UaError::Timeout(_)) {
                    self.stats.record_timeout();
                }
                Err(e)
            }
        }
    }

    /// A handshake request: faults are errors.
    async fn handshake_call<R>(
        &self,
        envelope: Envelope,
        request: ServiceRequest,
        operation: &'static str,
        prior_sequence: Option<u32>,
    ) -> UaResult<(R, u32)>
    where
        R: ServiceMessage + TryFrom<ServiceResponse, Error = UaError>,
    {
        self.call::<R>(
            envelope,
            request,
            operation,
            RequestPhase::Handshake,
            self.config.request_timeout,
            prior_sequence,
        )
        .await?
        .into_response(operation)
    }

    /// A data-path request.
    async fn data_call<R>(
        &self,
        request: impl Into<ServiceRequest>,
        operation: &'static str,
    ) -> UaResult<Reply<R>>
    where
        R: ServiceMessage + TryFrom<ServiceResponse, Error = UaError>,
    {
        self.call::<R>(
            Envelope::Message,
            request.into(),
            operation,
            RequestPhase::DataPath,
            self.config.request_timeout,
            None,
        )
        .await
    }

    // -------------------------------------------------------------------------
    // Inbound
    // -------------------------------------------------------------------------

    /// Decodes one inbound frame and completes its request.
    ///
    /// Returns an error only for frames that end the connection.
    fn handle_frame(&self, bytes: &[u8]) -> UaResult<()> {
        let frame = match Frame::decode(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, frame = %hex::encode(bytes), "Undecodable frame dropped");
                return Ok(());
            }
        };

        match frame {
            Frame::Acknowledge(ack) => {
                self.correlator.dispatch(0, Inbound::acknowledge(ack));
                Ok(())
            }
            Frame::Error(message) => {
                let reason = message.reason.unwrap_or_default();
                error!(status = %message.error, reason = %reason, "Server sent an error frame");
                Err(ConnectionError::ServerError {
                    status: message.error,
                    reason,
                }
                .into())
            }
            Frame::Hello(_) => {
                warn!("Unexpected Hello from server ignored");
                Ok(())
            }
            Frame::Secure(secure) => {
                self.stats.record_response();
                let request_id = secure.request_id;
                match self.decode_secure(&secure) {
                    Ok(inbound) => {
                        self.correlator.dispatch(request_id, inbound);
                    }
                    Err(e) => {
                        warn!(
                            request_id,
                            error = %e,
                            body = %hex::encode(&secure.body),
                            "Response body could not be decoded"
                        );
                        self.correlator.fail(request_id, e);
                    }
                }
                Ok(())
            }
        }
    }

    fn decode_secure(&self, secure: &SecureFrame) -> UaResult<Inbound> {
        let encrypted = self.channel.snapshot().encrypted;
        let service = if encrypted {
            let body = self.security.decode_inbound(secure.message_type, &secure.body)?;
            ServiceResponse::decode_body(&body)?
        } else {
            ServiceResponse::decode_body(&secure.body)?
        };
        Ok(Inbound {
            sequence_number: secure.sequence_number,
            request_id: secure.request_id,
            channel_id: secure.channel_id,
            token_id: secure.token_id(),
            body: InboundBody::Service(service),
        })
    }
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.get_mut().take() {
            reader.abort();
        }
    }
}

fn spawn_reader(inner: Weak<ConnectionInner>, transport: Arc<dyn UaTransport>) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!(peer = %transport.peer(), "Reader started");
        loop {
            let received = transport.receive().await;
            let Some(inner) = inner.upgrade() else {
                break;
            };
            match received {
                Ok(Some(bytes)) => {
                    if let Err(e) = inner.handle_frame(&bytes) {
                        inner.connection_lost(&e.to_string()).await;
                        break;
                    }
                }
                Ok(None) => {
                    inner.connection_lost("server closed the connection").await;
                    break;
                }
                Err(e) => {
                    e.log("receive");
                    inner.connection_lost(&e.to_string()).await;
                    break;
                }
            }
        }
        debug!("Reader stopped");
    })
}

// =============================================================================
// Background links
// =============================================================================

/// Keep-alive's view of the connection.
struct RenewLink {
    inner: Weak<ConnectionInner>,
}

#[async_trait]
impl ChannelRenewer for RenewLink {
    async fn renew_channel(&self) -> UaResult<()> {
        match self.inner.upgrade() {
            Some(inner) => inner.renew().await,
            None => Err(UaError::not_connected()),
        }
    }
}

/// A publish loop's view of the connection.
struct PublishLink {
    inner: Weak<ConnectionInner>,
    deadline: Duration,
}

#[async_trait]
impl PublishChannel for PublishLink {
    fn next_request_handle(&self) -> u32 {
        self.inner
            .upgrade()
            .map(|inner| inner.request_handles.next())
            .unwrap_or_default()
    }

    async fn publish(
        &self,
        request_handle: u32,
        acknowledgements: Vec<SubscriptionAcknowledgement>,
    ) -> UaResult<PublishResponse> {
        let inner = self.inner.upgrade().ok_or_else(UaError::not_connected)?;
        inner.require_active()?;

        let state = inner.channel.snapshot();
        let request = PublishRequest {
            request_header: RequestHeader::new(
                state.authentication_token(),
                request_handle,
                inner.config.timeout_hint_ms(),
            ),
            subscription_acknowledgements: acknowledgements,
        };
        let (response, _) = inner
            .call::<PublishResponse>(
                Envelope::Message,
                request.into(),
                "Publish",
                RequestPhase::Publish,
                self.deadline,
                None,
            )
            .await?
            .into_response("Publish")?;
        inner
            .stats
            .record_publish(response.notification_message.notification_data.len());
        Ok(response)
    }

    async fn publish_failed(&self, subscription_id: u32, error: UaError) {
        if let Some(inner) = self.inner.upgrade() {
            let reason = format!("publish failed on subscription {}: {}", subscription_id, error);
            inner.shutdown(&reason).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_snapshot_and_reset() {
        let stats = ConnectionStats::new();
        stats.record_request();
        stats.record_request();
        stats.record_response();
        stats.record_service_fault();
        stats.record_publish(3);
        stats.record_renewal();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.requests_sent, 2);
        assert_eq!(snapshot.responses_received, 1);
        assert_eq!(snapshot.service_faults, 1);
        assert_eq!(snapshot.publish_responses, 1);
        assert_eq!(snapshot.notifications_received, 3);
        assert_eq!(snapshot.channel_renewals, 1);

        stats.reset();
        assert_eq!(stats.snapshot(), ConnectionStatsSnapshot::default());
    }

    #[test]
    fn test_encrypting_policy_needs_provider() {
        let config = UaConfig::builder()
            .endpoint("opc.tcp://plc:4840")
            .security_policy(SecurityPolicy::Basic256Sha256)
            .build()
            .unwrap();
        assert!(UaConnection::new(config.clone()).is_err());
        assert!(UaConnection::with_security(config, Arc::new(NoSecurity)).is_err());
    }

    #[test]
    fn test_event_serialization() {
        let event = ConnectionEvent::Connected {
            endpoint: "opc.tcp://plc:4840".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "connected");
        assert_eq!(json["endpoint"], "opc.tcp://plc:4840");
    }

    #[tokio::test]
    async fn test_operations_require_active_session() {
        let connection = UaConnection::new(UaConfig::new("opc.tcp://plc:4840")).unwrap();
        let fields = vec![UaField::new(
            "speed",
            crate::types::UaTag::new(crate::types::NodeId::numeric(2, 1)),
        )];

        assert!(matches!(
            connection.read(&[]).await,
            Err(UaError::Operation(OperationError::EmptyRequest { .. }))
        ));
        assert!(connection.read(&fields).await.is_err());
        assert!(matches!(
            connection.subscribe(&[]).await,
            Err(UaError::Subscription(SubscriptionError::NoFields))
        ));
        assert!(matches!(
            connection.write(&fields, &[]).await,
            Err(UaError::Operation(OperationError::ResultCountMismatch { .. }))
        ));
        assert_eq!(connection.phase(), ConnectionPhase::Disconnected);
        connection.disconnect().await.unwrap();
    }
}
