// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Handshake steps.
//!
//! Each step of connection establishment is a pair of pure functions: one
//! building the request from configuration and the current [`ChannelState`],
//! one folding the response into the next `ChannelState`. The connection
//! drives them in order:
//!
//! ```text
//! hello_frame ─► open_channel_request ─► apply_open_response
//!             ─► check_sequence ─► create_session_request ─► apply_create_session
//!             ─► check_sequence ─► activate_session_request ─► apply_activate_session
//! ```
//!
//! Keeping the steps free of I/O lets tests drive every transition alone.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use super::channel::{ChannelState, SessionState};
use super::session::{identity_token, select_identity, IdentitySelection};
use crate::codec::LocalizedText;
use crate::config::{UaConfig, PROTOCOL_VERSION};
use crate::error::{ConnectionError, SessionError, UaResult};
use crate::messages::session::APPLICATION_TYPE_CLIENT;
use crate::messages::{
    AcknowledgeMessage, ActivateSessionRequest, ActivateSessionResponse, ApplicationDescription,
    CloseSecureChannelRequest, CloseSessionRequest, CreateSessionRequest, CreateSessionResponse,
    EndpointDescription, Frame, GetEndpointsRequest, HelloMessage, OpenSecureChannelRequest,
    OpenSecureChannelResponse, RequestHeader, SignatureData,
};
use crate::security::SecurityProvider;
use crate::types::{MessageSecurityMode, NodeId, SecurityPolicy, SecurityTokenRequestType};

/// Timeout hint of the CloseSession request, in milliseconds.
pub const CLOSE_SESSION_TIMEOUT_HINT: u32 = 5000;

// =============================================================================
// Hello / Acknowledge
// =============================================================================

/// The Hello frame opening the connection.
pub fn hello_frame(config: &UaConfig) -> Frame {
    Frame::Hello(HelloMessage {
        protocol_version: PROTOCOL_VERSION,
        receive_buffer_size: config.receive_buffer_size,
        send_buffer_size: config.send_buffer_size,
        max_message_size: config.max_message_size,
        max_chunk_count: config.max_chunk_count,
        endpoint_url: config.endpoint.clone(),
    })
}

/// Validates the server's Acknowledge.
pub fn check_acknowledge(ack: &AcknowledgeMessage) -> UaResult<()> {
    if ack.protocol_version != PROTOCOL_VERSION {
        return Err(ConnectionError::handshake(
            "Acknowledge",
            format!("unsupported protocol version {}", ack.protocol_version),
        )
        .into());
    }
    debug!(
        receive_buffer_size = ack.receive_buffer_size,
        send_buffer_size = ack.send_buffer_size,
        max_message_size = ack.max_message_size,
        max_chunk_count = ack.max_chunk_count,
        "Transport parameters negotiated"
    );
    Ok(())
}

// =============================================================================
// OpenSecureChannel
// =============================================================================

/// Builds an OpenSecureChannel request for `policy`.
///
/// Initial open and keep-alive renewal both use `Issue`, on the channel id
/// currently held by the caller.
pub fn open_channel_request(
    config: &UaConfig,
    policy: SecurityPolicy,
    request_type: SecurityTokenRequestType,
    request_handle: u32,
    client_nonce: Option<Vec<u8>>,
) -> OpenSecureChannelRequest {
    OpenSecureChannelRequest {
        request_header: RequestHeader::new(NodeId::null(), request_handle, config.timeout_hint_ms()),
        client_protocol_version: PROTOCOL_VERSION,
        request_type,
        security_mode: policy.message_mode(),
        client_nonce,
        requested_lifetime: config.channel_lifetime_ms(),
    }
}

/// Folds an OpenSecureChannel response into the channel state.
///
/// Session credentials and the server certificate survive renewal.
pub fn apply_open_response(
    state: &ChannelState,
    response: &OpenSecureChannelResponse,
    encrypted: bool,
) -> UaResult<ChannelState> {
    let status = response.response_header.service_result;
    if status.is_bad() {
        return Err(ConnectionError::handshake(
            "OpenSecureChannel",
            format!("server returned {}", status),
        )
        .into());
    }

    let token = &response.security_token;
    debug!(
        channel_id = token.channel_id,
        token_id = token.token_id,
        revised_lifetime = token.revised_lifetime,
        "Secure channel token issued"
    );
    Ok(ChannelState {
        channel_id: token.channel_id,
        token_id: token.token_id,
        revised_lifetime: token.revised_lifetime,
        token_created_at: Some(token.created_at),
        encrypted,
        channel_nonce: response.server_nonce.clone(),
        ..state.clone()
    })
}

// =============================================================================
// Sequencing
// =============================================================================

/// Requires `transaction_id` to directly follow the last response's sequence number.
///
/// Reordering during session establishment is fatal. Nothing is retried.
pub fn check_sequence(transaction_id: u32, prior_sequence: u32) -> UaResult<()> {
    let next = if prior_sequence == u32::MAX {
        1
    } else {
        prior_sequence + 1
    };
    if transaction_id != next {
        error!(
            transaction_id,
            prior_sequence,
            "Sequence number isn't as expected, we might have missed a packet"
        );
        return Err(ConnectionError::sequence_mismatch(transaction_id, prior_sequence).into());
    }
    Ok(())
}

// =============================================================================
// CreateSession
// =============================================================================

/// Builds the CreateSession request.
pub fn create_session_request(
    config: &UaConfig,
    request_handle: u32,
    session_name: String,
    client_nonce: Vec<u8>,
    client_certificate: Option<Vec<u8>>,
) -> CreateSessionRequest {
    CreateSessionRequest {
        request_header: RequestHeader::new(NodeId::null(), request_handle, config.timeout_hint_ms()),
        client_description: client_description(config),
        server_uri: None,
        endpoint_url: config.endpoint.clone(),
        session_name,
        client_nonce: Some(client_nonce),
        client_certificate,
        requested_session_timeout: config.session_timeout.as_millis() as f64,
        max_response_message_size: 0,
    }
}

fn client_description(config: &UaConfig) -> ApplicationDescription {
    ApplicationDescription {
        application_uri: config.application_uri.clone(),
        product_uri: config.product_uri.clone(),
        application_name: LocalizedText::new(config.application_name.clone()),
        application_type: APPLICATION_TYPE_CLIENT,
        gateway_server_uri: None,
        discovery_profile_uri: None,
        discovery_urls: Vec::new(),
    }
}

/// Folds a CreateSession response into the channel state and picks the identity.
pub fn apply_create_session(
    state: &ChannelState,
    response: &CreateSessionResponse,
    config: &UaConfig,
) -> UaResult<(ChannelState, IdentitySelection)> {
    let status = response.response_header.service_result;
    if status.is_bad() {
        return Err(SessionError::creation_failed(format!("server returned {}", status)).into());
    }

    let identity = select_identity(&response.server_endpoints, config);
    let revised_timeout = Duration::from_millis(response.revised_session_timeout.max(0.0) as u64);
    debug!(
        session_id = %response.session_id,
        revised_timeout_ms = revised_timeout.as_millis() as u64,
        "Session created"
    );

    let next = ChannelState {
        server_certificate: response
            .server_certificate
            .clone()
            .or_else(|| state.server_certificate.clone()),
        session: Some(SessionState {
            session_id: response.session_id.clone(),
            authentication_token: response.authentication_token.clone(),
            revised_timeout,
            server_nonce: response.server_nonce.clone(),
            policy_id: identity.policy_id.clone(),
        }),
        ..state.clone()
    };
    Ok((next, identity))
}

// =============================================================================
// ActivateSession
// =============================================================================

/// Builds the ActivateSession request carrying the identity token.
pub fn activate_session_request(
    state: &ChannelState,
    identity: &IdentitySelection,
    config: &UaConfig,
    request_handle: u32,
    security: &dyn SecurityProvider,
) -> UaResult<ActivateSessionRequest> {
    let session = state
        .session
        .as_ref()
        .ok_or_else(|| SessionError::activation_failed("no session has been created"))?;
    let server_nonce = session.server_nonce.as_deref().unwrap_or_default();
    let token = identity_token(
        identity,
        config,
        server_nonce,
        state.server_certificate.as_deref(),
        security,
    )?;

    Ok(ActivateSessionRequest {
        request_header: RequestHeader::new(
            session.authentication_token.clone(),
            request_handle,
            config.timeout_hint_ms(),
        ),
        client_signature: SignatureData::default(),
        client_software_certificates: Vec::new(),
        locale_ids: Vec::new(),
        user_identity_token: token,
        user_token_signature: SignatureData::default(),
    })
}

/// Checks the ActivateSession response.
///
/// A request handle mismatch is logged and tolerated.
pub fn apply_activate_session(
    state: &ChannelState,
    request_handle: u32,
    response: &ActivateSessionResponse,
) -> UaResult<ChannelState> {
    let header = &response.response_header;
    if header.request_handle != request_handle {
        error!(
            request_handle,
            returned = header.request_handle,
            "Request handle isn't as expected, we might have missed a packet"
        );
    }
    if header.service_result.is_bad() {
        return Err(SessionError::activation_failed(format!(
            "server returned {}",
            header.service_result
        ))
        .into());
    }

    let mut next = state.clone();
    if let (Some(session), Some(nonce)) = (next.session.as_mut(), response.server_nonce.as_ref()) {
        session.server_nonce = Some(nonce.clone());
    }
    info!("Session activated");
    Ok(next)
}

// =============================================================================
// Discovery
// =============================================================================

/// Summary of the endpoint chosen by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointInfo {
    /// Endpoint URL.
    pub endpoint_url: String,
    /// Security policy URI.
    pub security_policy_uri: String,
    /// Message security mode.
    pub security_mode: MessageSecurityMode,
    /// Server certificate (DER), if advertised.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_certificate: Option<Vec<u8>>,
    /// Hex SHA-1 thumbprint of the server certificate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbprint: Option<String>,
}

/// Builds the GetEndpoints request.
pub fn get_endpoints_request(config: &UaConfig, request_handle: u32) -> GetEndpointsRequest {
    GetEndpointsRequest {
        request_header: RequestHeader::new(NodeId::null(), request_handle, config.timeout_hint_ms()),
        endpoint_url: config.endpoint.clone(),
        locale_ids: Vec::new(),
        profile_uris: Vec::new(),
    }
}

/// Selects the endpoint matching the configured URL and security policy.
pub fn select_discovery_endpoint<'a>(
    endpoints: &'a [EndpointDescription],
    config: &UaConfig,
) -> UaResult<&'a EndpointDescription> {
    let policy_uri = config.security_policy.uri();
    endpoints
        .iter()
        .find(|e| e.endpoint_url == config.endpoint && e.security_policy_uri == policy_uri)
        .ok_or_else(|| {
            ConnectionError::NoSuitableEndpoint {
                endpoint: config.endpoint.clone(),
                policy: policy_uri,
            }
            .into()
        })
}

/// Describes `endpoint`, digesting its certificate through `security`.
pub fn endpoint_info(endpoint: &EndpointDescription, security: &dyn SecurityProvider) -> EndpointInfo {
    let thumbprint = endpoint
        .server_certificate
        .as_deref()
        .and_then(|cert| security.thumbprint(cert))
        .map(hex::encode);
    EndpointInfo {
        endpoint_url: endpoint.endpoint_url.clone(),
        security_policy_uri: endpoint.security_policy_uri.clone(),
        security_mode: endpoint.security_mode,
        server_certificate: endpoint.server_certificate.clone(),
        thumbprint,
    }
}

// =============================================================================
// Teardown
// =============================================================================

/// Builds the CloseSession request. Subscriptions are deleted with the session.
pub fn close_session_request(state: &ChannelState, request_handle: u32) -> CloseSessionRequest {
    CloseSessionRequest {
        request_header: RequestHeader::new(
            state.authentication_token(),
            request_handle,
            CLOSE_SESSION_TIMEOUT_HINT,
        ),
        delete_subscriptions: true,
    }
}

/// Builds the CloseSecureChannel request.
pub fn close_channel_request(
    state: &ChannelState,
    config: &UaConfig,
    request_handle: u32,
) -> CloseSecureChannelRequest {
    CloseSecureChannelRequest {
        request_header: RequestHeader::new(
            state.authentication_token(),
            request_handle,
            config.timeout_hint_ms(),
        ),
    }
}

// =============================================================================
// Tests
// =============================================================================
