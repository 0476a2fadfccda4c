// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Scripted OPC UA Server
//!
//! An in-memory server speaking the binary protocol over a duplex pipe.
//! Behavior comes from a [`Script`]; every request is recorded for
//! verification.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Once};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

use trap_ua::codec::{DataValue, ExtensionObject};
use trap_ua::messages::subscription::DATA_CHANGE_NOTIFICATION_ID;
use trap_ua::messages::{
    AcknowledgeMessage, ActivateSessionResponse, ApplicationDescription, AsymmetricSecurityHeader,
    ChannelSecurityToken, CloseSessionResponse, CreateMonitoredItemsResponse,
    CreateSessionResponse, CreateSubscriptionResponse, DataChangeNotification,
    DeleteSubscriptionsResponse, EndpointDescription, Frame, GetEndpointsResponse, MessageType,
    MonitoredItemCreateResult, MonitoredItemNotification, NotificationMessage,
    OpenSecureChannelResponse, PublishResponse, ReadResponse, ResponseHeader, SecureFrame,
    SecurityHeader, ServiceFault, ServiceKind, ServiceRequest, ServiceResponse, SignatureData,
    UserTokenPolicy, WriteResponse,
};
use trap_ua::types::{SecurityPolicy, StatusCode, UserTokenKind};
use trap_ua::{
    NodeId, SecurityProvider, StreamTransport, UaConfig, UaResult, UaTransport, Variant,
};

pub const ENDPOINT: &str = "opc.tcp://mock:4840";
pub const CHANNEL_ID: u32 = 7;
pub const SUBSCRIPTION_ID: u32 = 42;

static INIT: Once = Once::new();

/// Initialize test logging once per test binary.
pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new("warn,trap_ua=debug")),
            )
            .with_test_writer()
            .init();
    });
}

pub type PipeTransport = StreamTransport<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

/// A client configuration pointing at the mock endpoint.
pub fn config() -> UaConfig {
    UaConfig::builder()
        .endpoint(ENDPOINT)
        .request_timeout(Duration::from_secs(2))
        .close_timeout(Duration::from_secs(1))
        .build()
        .unwrap()
}

// =============================================================================
// Script
// =============================================================================

/// What the server answers.
#[derive(Clone)]
pub struct Script {
    /// Node values served by Read and changed by Write.
    pub values: HashMap<NodeId, Variant>,
    /// Sequence numbers to use instead of echoing the request's.
    pub sequence_overrides: HashMap<ServiceKind, u32>,
    /// Answer every Publish with this fault.
    pub publish_fault: Option<StatusCode>,
    /// Data change `(client handle, value)` delivered in the first Publish.
    pub first_publish: Vec<(u32, Variant)>,
    /// Policy advertised by the endpoint list.
    pub policy: SecurityPolicy,
    /// Server certificate advertised by the endpoint list.
    pub server_certificate: Option<Vec<u8>>,
    /// XOR key of the message envelope once the channel is open.
    pub envelope_key: Option<u8>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            values: HashMap::new(),
            sequence_overrides: HashMap::new(),
            publish_fault: None,
            first_publish: Vec::new(),
            policy: SecurityPolicy::None,
            server_certificate: None,
            envelope_key: None,
        }
    }
}

impl Script {
    pub fn with_value(mut self, node: NodeId, value: Variant) -> Self {
        self.values.insert(node, value);
        self
    }

    pub fn with_sequence_override(mut self, kind: ServiceKind, sequence: u32) -> Self {
        self.sequence_overrides.insert(kind, sequence);
        self
    }

    pub fn with_publish_fault(mut self, status: StatusCode) -> Self {
        self.publish_fault = Some(status);
        self
    }

    pub fn with_first_publish(mut self, client_handle: u32, value: Variant) -> Self {
        self.first_publish.push((client_handle, value));
        self
    }

    pub fn with_policy(mut self, policy: SecurityPolicy, certificate: &[u8]) -> Self {
        self.policy = policy;
        self.server_certificate = Some(certificate.to_vec());
        self
    }

    pub fn with_envelope(mut self, key: u8) -> Self {
        self.envelope_key = Some(key);
        self
    }

    fn endpoints(&self) -> Vec<EndpointDescription> {
        vec![EndpointDescription {
            endpoint_url: ENDPOINT.to_string(),
            server: ApplicationDescription::default(),
            server_certificate: self.server_certificate.clone(),
            security_mode: self.policy.message_mode(),
            security_policy_uri: self.policy.uri(),
            user_identity_tokens: vec![
                UserTokenPolicy::new("anonymous", UserTokenKind::Anonymous),
                UserTokenPolicy::new("username", UserTokenKind::UserName),
            ],
            transport_profile_uri: String::new(),
            security_level: 1,
        }]
    }
}

// =============================================================================
// MockServer
// =============================================================================

#[derive(Default)]
struct ServerState {
    requests: Vec<ServiceRequest>,
    message_types: Vec<MessageType>,
    open_headers: Vec<AsymmetricSecurityHeader>,
    sequence_numbers: Vec<u32>,
    message_tokens: Vec<u32>,
    hellos: usize,
    tokens_issued: u32,
    publishes: u32,
    encrypted: bool,
}

/// Handle to a running scripted server.
pub struct MockServer {
    state: Arc<Mutex<ServerState>>,
    task: JoinHandle<()>,
}

impl MockServer {
    /// Starts a server and returns the client end of its pipe.
    pub fn start(script: Script) -> (PipeTransport, MockServer) {
        init_test_logging();
        let (client, server) = tokio::io::duplex(256 * 1024);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, server_write) = tokio::io::split(server);

        let state = Arc::new(Mutex::new(ServerState::default()));
        let transport = StreamTransport::new(server_read, server_write, "mock-server");
        let task_state = Arc::clone(&state);
        let task = tokio::spawn(async move {
            serve(transport, script, task_state).await;
        });

        (
            StreamTransport::new(client_read, client_write, "mock-client"),
            MockServer { state, task },
        )
    }

    /// Service kinds of every request received, in order.
    pub fn request_kinds(&self) -> Vec<ServiceKind> {
        self.state.lock().requests.iter().map(|r| r.kind()).collect()
    }

    /// Every request received.
    pub fn requests(&self) -> Vec<ServiceRequest> {
        self.state.lock().requests.clone()
    }

    /// Frame types of every secure frame received.
    pub fn message_types(&self) -> Vec<MessageType> {
        self.state.lock().message_types.clone()
    }

    /// Asymmetric headers of every OPN received.
    pub fn open_headers(&self) -> Vec<AsymmetricSecurityHeader> {
        self.state.lock().open_headers.clone()
    }

    /// Sequence numbers of every secure frame, in arrival order.
    pub fn sequence_numbers(&self) -> Vec<u32> {
        self.state.lock().sequence_numbers.clone()
    }

    /// Token ids of every MSG frame, in arrival order.
    pub fn message_tokens(&self) -> Vec<u32> {
        self.state.lock().message_tokens.clone()
    }

    /// Channel tokens handed out so far.
    pub fn tokens_issued(&self) -> u32 {
        self.state.lock().tokens_issued
    }

    /// Hello frames received.
    pub fn hellos(&self) -> usize {
        self.state.lock().hellos
    }

    /// Waits until a request of `kind` has arrived.
    pub async fn wait_for(&self, kind: ServiceKind) -> bool {
        for _ in 0..200 {
            if self.request_kinds().contains(&kind) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    /// Waits until a Publish acknowledging `sequence_number` has arrived.
    pub async fn wait_for_ack(&self, sequence_number: u32) -> bool {
        for _ in 0..200 {
            let acked = self.requests().iter().any(|r| match r {
                ServiceRequest::Publish(p) => p
                    .subscription_acknowledgements
                    .iter()
                    .any(|a| a.subscription_id == SUBSCRIPTION_ID && a.sequence_number == sequence_number),
                _ => false,
            });
            if acked {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(transport: PipeTransport, script: Script, state: Arc<Mutex<ServerState>>) {
    let mut values = script.values.clone();
    while let Ok(Some(bytes)) = transport.receive().await {
        let frame = match Frame::decode(&bytes) {
            Ok(frame) => frame,
            Err(_) => break,
        };
        let reply = match frame {
            Frame::Hello(_) => {
                state.lock().hellos += 1;
                Some(Frame::Acknowledge(AcknowledgeMessage {
                    protocol_version: 0,
                    receive_buffer_size: 65535,
                    send_buffer_size: 65535,
                    max_message_size: 2_097_152,
                    max_chunk_count: 64,
                }))
            }
            Frame::Secure(secure) => handle_secure(secure, &script, &mut values, &state),
            _ => None,
        };
        if let Some(reply) = reply {
            if transport.send(&reply.encode()).await.is_err() {
                break;
            }
        }
    }
}

fn handle_secure(
    secure: SecureFrame,
    script: &Script,
    values: &mut HashMap<NodeId, Variant>,
    state: &Mutex<ServerState>,
) -> Option<Frame> {
    let encrypted = state.lock().encrypted;
    let body = match (encrypted, script.envelope_key) {
        (true, Some(key)) => xor(&secure.body, key),
        _ => secure.body.clone(),
    };
    let request = ServiceRequest::decode_body(&body).ok()?;

    {
        let mut s = state.lock();
        s.message_types.push(secure.message_type);
        s.sequence_numbers.push(secure.sequence_number);
        match &secure.security {
            SecurityHeader::Asymmetric(header) => s.open_headers.push(header.clone()),
            SecurityHeader::Symmetric { token_id } => {
                if secure.message_type == MessageType::Message {
                    s.message_tokens.push(*token_id);
                }
            }
        }
        s.requests.push(request.clone());
    }

    let handle = request.header().request_handle;
    let response = respond(&request, handle, script, values, state)?;
    let kind = response.kind();
    let sequence_number = script
        .sequence_overrides
        .get(&kind)
        .copied()
        .unwrap_or(secure.sequence_number);

    let mut body = response.encode_body();
    if let (true, Some(key)) = (encrypted, script.envelope_key) {
        body = xor(&body, key);
    }
    let is_open = matches!(request, ServiceRequest::OpenSecureChannel(_));
    if is_open && script.envelope_key.is_some() {
        state.lock().encrypted = true;
    }

    Some(Frame::Secure(SecureFrame {
        message_type: if is_open {
            MessageType::OpenSecureChannel
        } else {
            MessageType::Message
        },
        channel_id: CHANNEL_ID,
        security: if is_open {
            SecurityHeader::Asymmetric(AsymmetricSecurityHeader {
                security_policy_uri: script.policy.uri(),
                ..Default::default()
            })
        } else {
            SecurityHeader::Symmetric {
                token_id: state.lock().tokens_issued,
            }
        },
        sequence_number,
        request_id: secure.request_id,
        body,
    }))
}

fn respond(
    request: &ServiceRequest,
    handle: u32,
    script: &Script,
    values: &mut HashMap<NodeId, Variant>,
    state: &Mutex<ServerState>,
) -> Option<ServiceResponse> {
    let good = ResponseHeader::good(handle);
    Some(match request {
        ServiceRequest::OpenSecureChannel(_) => {
            let token_id = {
                let mut s = state.lock();
                s.tokens_issued += 1;
                s.tokens_issued
            };
            OpenSecureChannelResponse {
                response_header: good,
                server_protocol_version: 0,
                security_token: ChannelSecurityToken {
                    channel_id: CHANNEL_ID,
                    token_id,
                    created_at: Utc::now(),
                    revised_lifetime: 3_600_000,
                },
                server_nonce: None,
            }
            .into()
        }
        ServiceRequest::CloseSecureChannel(_) => return None,
        ServiceRequest::GetEndpoints(_) => GetEndpointsResponse {
            response_header: good,
            endpoints: script.endpoints(),
        }
        .into(),
        ServiceRequest::CreateSession(_) => CreateSessionResponse {
            response_header: good,
            session_id: NodeId::numeric(1, 100),
            authentication_token: NodeId::numeric(1, 200),
            revised_session_timeout: 120_000.0,
            server_nonce: Some(vec![1; 32]),
            server_certificate: script.server_certificate.clone(),
            server_endpoints: script.endpoints(),
            server_software_certificates: Vec::new(),
            server_signature: SignatureData::default(),
            max_request_message_size: 0,
        }
        .into(),
        ServiceRequest::ActivateSession(_) => ActivateSessionResponse {
            response_header: good,
            server_nonce: Some(vec![2; 32]),
            results: Vec::new(),
            diagnostic_infos: Vec::new(),
        }
        .into(),
        ServiceRequest::CloseSession(_) => CloseSessionResponse {
            response_header: good,
        }
        .into(),
        ServiceRequest::Read(read) => ReadResponse {
            response_header: good,
            results: read
                .nodes_to_read
                .iter()
                .map(|node| match values.get(&node.node_id) {
                    Some(value) => DataValue::new(value.clone()),
                    None => DataValue::with_status(StatusCode::BAD_NODE_ID_UNKNOWN),
                })
                .collect(),
            diagnostic_infos: Vec::new(),
        }
        .into(),
        ServiceRequest::Write(write) => WriteResponse {
            response_header: good,
            results: write
                .nodes_to_write
                .iter()
                .map(|node| {
                    if values.contains_key(&node.node_id) {
                        if let Some(value) = node.value.value.clone() {
                            values.insert(node.node_id.clone(), value);
                        }
                        StatusCode::GOOD
                    } else {
                        StatusCode::BAD_NODE_ID_UNKNOWN
                    }
                })
                .collect(),
            diagnostic_infos: Vec::new(),
        }
        .into(),
        ServiceRequest::CreateSubscription(create) => CreateSubscriptionResponse {
            response_header: good,
            subscription_id: SUBSCRIPTION_ID,
            revised_publishing_interval: create.requested_publishing_interval,
            revised_lifetime_count: create.requested_lifetime_count,
            revised_max_keep_alive_count: create.requested_max_keep_alive_count,
        }
        .into(),
        ServiceRequest::CreateMonitoredItems(create) => CreateMonitoredItemsResponse {
            response_header: good,
            results: create
                .items_to_create
                .iter()
                .enumerate()
                .map(|(i, item)| MonitoredItemCreateResult {
                    status_code: StatusCode::GOOD,
                    monitored_item_id: i as u32 + 1,
                    revised_sampling_interval: item.requested_parameters.sampling_interval,
                    revised_queue_size: item.requested_parameters.queue_size,
                    filter_result: ExtensionObject::null(),
                })
                .collect(),
            diagnostic_infos: Vec::new(),
        }
        .into(),
        ServiceRequest::Publish(_) => {
            if let Some(status) = script.publish_fault {
                return Some(
                    ServiceFault {
                        response_header: ResponseHeader::new(handle, status),
                    }
                    .into(),
                );
            }
            let sequence_number = {
                let mut s = state.lock();
                s.publishes += 1;
                s.publishes
            };
            let notification_data = if sequence_number == 1 && !script.first_publish.is_empty() {
                let change = DataChangeNotification {
                    monitored_items: script
                        .first_publish
                        .iter()
                        .map(|(client_handle, value)| MonitoredItemNotification {
                            client_handle: *client_handle,
                            value: DataValue::new(value.clone()),
                        })
                        .collect(),
                    diagnostic_infos: Vec::new(),
                };
                vec![ExtensionObject::from_encodable(DATA_CHANGE_NOTIFICATION_ID, &change)]
            } else {
                Vec::new()
            };
            PublishResponse {
                response_header: good,
                subscription_id: SUBSCRIPTION_ID,
                available_sequence_numbers: if notification_data.is_empty() {
                    Vec::new()
                } else {
                    vec![sequence_number]
                },
                more_notifications: false,
                notification_message: NotificationMessage {
                    sequence_number,
                    publish_time: Utc::now(),
                    notification_data,
                },
                results: Vec::new(),
                diagnostic_infos: Vec::new(),
            }
            .into()
        }
        ServiceRequest::DeleteSubscriptions(delete) => DeleteSubscriptionsResponse {
            response_header: good,
            results: vec![StatusCode::GOOD; delete.subscription_ids.len()],
            diagnostic_infos: Vec::new(),
        }
        .into(),
    })
}

fn xor(data: &[u8], key: u8) -> Vec<u8> {
    data.iter().map(|b| b ^ key).collect()
}

// =============================================================================
// XorSecurity
// =============================================================================

/// A reversible stand-in for real message security.
#[derive(Debug, Clone)]
pub struct XorSecurity {
    pub key: u8,
}

impl SecurityProvider for XorSecurity {
    fn policy(&self) -> SecurityPolicy {
        SecurityPolicy::Basic256Sha256
    }

    fn client_certificate(&self) -> Option<Vec<u8>> {
        Some(b"client-cert".to_vec())
    }

    fn encode_outbound(&self, _: MessageType, body: &[u8]) -> UaResult<Vec<u8>> {
        Ok(xor(body, self.key))
    }

    fn decode_inbound(&self, _: MessageType, body: &[u8]) -> UaResult<Vec<u8>> {
        Ok(xor(body, self.key))
    }

    fn encrypt_password(&self, _: &[u8], plaintext: &[u8]) -> UaResult<Vec<u8>> {
        Ok(plaintext.iter().rev().copied().collect())
    }

    fn thumbprint(&self, certificate: &[u8]) -> Option<Vec<u8>> {
        Some(certificate.iter().take(4).copied().collect())
    }
}
