// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Connection lifecycle, read/write and discovery against a scripted server.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use common::{config, MockServer, Script, XorSecurity};
use trap_ua::client::ConnectionPhase;
use trap_ua::messages::session::USER_NAME_IDENTITY_TOKEN_ID;
use trap_ua::messages::{MessageType, ServiceKind, ServiceRequest, UserNameIdentityToken};
use trap_ua::types::SecurityTokenRequestType;
use trap_ua::variant::Scalar;
use trap_ua::{
    ConnectionError, ConnectionEvent, NodeId, PlcDataType, PlcValue, ResponseCode, SecurityPolicy,
    UaConfig, UaConnection, UaError, UaField, UaTag, Variant,
};

// =============================================================================
// Helpers
// =============================================================================

fn speed_node() -> NodeId {
    NodeId::numeric(2, 1)
}

fn speed() -> UaField {
    UaField::new("speed", UaTag::new(speed_node()).with_data_type(PlcDataType::Dint))
}

fn missing() -> UaField {
    UaField::new("missing", UaTag::new(NodeId::numeric(2, 99)).with_data_type(PlcDataType::Dint))
}

fn plant_script() -> Script {
    Script::default().with_value(speed_node(), Variant::scalar(Scalar::Int32(42)))
}

async fn next_event(events: &mut broadcast::Receiver<ConnectionEvent>) -> ConnectionEvent {
    tokio::time::timeout(Duration::from_secs(3), events.recv())
        .await
        .expect("event timed out")
        .expect("event channel closed")
}

async fn connected(script: Script) -> (UaConnection, MockServer) {
    let (transport, server) = MockServer::start(script);
    let connection = UaConnection::new(config()).unwrap();
    connection.connect_with_transport(transport).await.unwrap();
    (connection, server)
}

// =============================================================================
// Connect / Disconnect
// =============================================================================

#[tokio::test]
async fn test_connect_runs_handshake_in_order() {
    let (transport, server) = MockServer::start(plant_script());
    let connection = UaConnection::new(config()).unwrap();
    let mut events = connection.events();

    connection.connect_with_transport(transport).await.unwrap();

    assert_eq!(connection.phase(), ConnectionPhase::SessionActive);
    assert_eq!(server.hellos(), 1);
    assert_eq!(
        server.request_kinds(),
        vec![
            ServiceKind::OpenSecureChannelRequest,
            ServiceKind::CreateSessionRequest,
            ServiceKind::ActivateSessionRequest,
        ]
    );
    assert_eq!(
        server.message_types(),
        vec![MessageType::OpenSecureChannel, MessageType::Message, MessageType::Message]
    );

    match &server.requests()[1] {
        ServiceRequest::CreateSession(request) => {
            assert!(request.session_name.starts_with("UaSession:"));
            assert_eq!(request.client_nonce.as_ref().map(Vec::len), Some(40));
            assert_eq!(request.requested_session_timeout, 120_000.0);
            assert_eq!(request.max_response_message_size, 0);
        }
        other => panic!("expected CreateSession, got {:?}", other.kind()),
    }

    assert_eq!(
        next_event(&mut events).await,
        ConnectionEvent::Connected {
            endpoint: common::ENDPOINT.to_string()
        }
    );
    assert!(events.try_recv().is_err());

    let stats = connection.stats();
    assert_eq!(stats.connects, 1);
    assert_eq!(stats.requests_sent, 4);
}

#[tokio::test]
async fn test_username_identity_without_security() {
    let (transport, server) = MockServer::start(plant_script());
    let config = UaConfig::builder()
        .endpoint(common::ENDPOINT)
        .request_timeout(Duration::from_secs(2))
        .close_timeout(Duration::from_secs(1))
        .username("operator", "secret")
        .build()
        .unwrap();
    let connection = UaConnection::new(config).unwrap();

    connection.connect_with_transport(transport).await.unwrap();
    assert_eq!(connection.phase(), ConnectionPhase::SessionActive);

    let activate = server.requests().into_iter().find_map(|r| match r {
        ServiceRequest::ActivateSession(a) => Some(a),
        _ => None,
    });
    let token: UserNameIdentityToken = activate
        .expect("ActivateSession sent")
        .user_identity_token
        .decode_as(USER_NAME_IDENTITY_TOKEN_ID)
        .unwrap();
    assert_eq!(token.policy_id, "username");
    assert_eq!(token.user_name, "operator");
    assert_eq!(token.password, Some(b"secret".to_vec()));
    assert_eq!(token.encryption_algorithm, None);

    connection.disconnect().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_keepalive_renews_channel_and_keeps_session() {
    let (transport, server) = MockServer::start(plant_script());
    let config = UaConfig::builder()
        .endpoint(common::ENDPOINT)
        .request_timeout(Duration::from_secs(2))
        .close_timeout(Duration::from_secs(1))
        .keepalive_interval(Duration::from_secs(30))
        .build()
        .unwrap();
    let connection = UaConnection::new(config).unwrap();
    connection.connect_with_transport(transport).await.unwrap();

    connection.read(&[speed()]).await.unwrap();
    assert_eq!(server.tokens_issued(), 1);
    assert_eq!(server.message_tokens().last(), Some(&1));

    tokio::time::sleep(Duration::from_secs(31)).await;

    assert_eq!(server.tokens_issued(), 2);
    assert_eq!(connection.stats().channel_renewals, 1);
    let opens: Vec<_> = server
        .requests()
        .into_iter()
        .filter_map(|r| match r {
            ServiceRequest::OpenSecureChannel(open) => Some(open),
            _ => None,
        })
        .collect();
    assert_eq!(opens.len(), 2);
    assert_eq!(opens[1].request_type, SecurityTokenRequestType::Issue);
    assert_eq!(connection.phase(), ConnectionPhase::SessionActive);

    let results = connection.read(&[speed()]).await.unwrap();
    assert_eq!(results["speed"].value, Some(PlcValue::Dint(42)));
    assert_eq!(server.message_tokens().last(), Some(&2));
    let sessions_created = server
        .request_kinds()
        .iter()
        .filter(|kind| **kind == ServiceKind::CreateSessionRequest)
        .count();
    assert_eq!(sessions_created, 1);

    connection.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_connect_twice_is_rejected() {
    let (connection, _server) = connected(plant_script()).await;
    let (second, _other) = MockServer::start(Script::default());

    let result = connection.connect_with_transport(second).await;
    assert!(matches!(
        result,
        Err(UaError::Connection(ConnectionError::InvalidState { .. }))
    ));
    assert!(connection.is_connected());
}

#[tokio::test]
async fn test_sequence_mismatch_aborts_before_activation() {
    let script = plant_script().with_sequence_override(ServiceKind::CreateSessionResponse, 5);
    let (transport, server) = MockServer::start(script);
    let connection = UaConnection::new(config()).unwrap();
    let mut events = connection.events();

    let error = connection.connect_with_transport(transport).await.unwrap_err();

    assert!(matches!(
        error,
        UaError::Connection(ConnectionError::SequenceMismatch {
            expected: 3,
            actual: 5
        })
    ));
    assert!(error.to_string().contains("5 != 3"));
    assert!(!server
        .request_kinds()
        .contains(&ServiceKind::ActivateSessionRequest));
    assert_eq!(connection.phase(), ConnectionPhase::Disconnected);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_disconnect_closes_session_then_channel() {
    let (connection, server) = connected(plant_script()).await;
    let mut events = connection.events();

    connection.disconnect().await.unwrap();

    assert!(server.wait_for(ServiceKind::CloseSecureChannelRequest).await);
    let kinds = server.request_kinds();
    let close_session = kinds
        .iter()
        .position(|k| *k == ServiceKind::CloseSessionRequest)
        .expect("CloseSession sent");
    let close_channel = kinds
        .iter()
        .position(|k| *k == ServiceKind::CloseSecureChannelRequest)
        .expect("CloseSecureChannel sent");
    assert!(close_session < close_channel);

    match server
        .requests()
        .into_iter()
        .find(|r| r.kind() == ServiceKind::CloseSessionRequest)
    {
        Some(ServiceRequest::CloseSession(request)) => {
            assert!(request.delete_subscriptions);
            assert_eq!(request.request_header.timeout_hint, 5000);
        }
        _ => unreachable!(),
    }

    assert!(matches!(
        next_event(&mut events).await,
        ConnectionEvent::Disconnected { .. }
    ));
    assert_eq!(connection.phase(), ConnectionPhase::Disconnected);

    // A second disconnect is a no-op.
    connection.disconnect().await.unwrap();
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_transport_loss_disconnects() {
    let (connection, server) = connected(plant_script()).await;
    let mut events = connection.events();

    drop(server);

    assert!(matches!(
        next_event(&mut events).await,
        ConnectionEvent::Disconnected { .. }
    ));
    assert_eq!(connection.phase(), ConnectionPhase::Disconnected);
    assert!(matches!(
        connection.read(&[speed()]).await,
        Err(UaError::Connection(ConnectionError::NotConnected))
    ));
}

// =============================================================================
// Read / Write
// =============================================================================

#[tokio::test]
async fn test_read_maps_values_and_unknown_nodes() {
    let (connection, server) = connected(plant_script()).await;

    let results = connection.read(&[speed(), missing()]).await.unwrap();

    assert_eq!(results["speed"].code, ResponseCode::Ok);
    assert_eq!(results["speed"].value, Some(PlcValue::Dint(42)));
    assert_eq!(results["missing"].code, ResponseCode::NotFound);
    assert_eq!(results["missing"].value, None);

    match server.requests().last() {
        Some(ServiceRequest::Read(request)) => {
            assert_eq!(request.max_age, 0.0);
            assert_eq!(request.nodes_to_read.len(), 2);
            assert!(request.nodes_to_read.iter().all(|n| n.attribute_id == 13));
            assert_eq!(request.request_header.timeout_hint, 2000);
        }
        _ => panic!("expected a Read request"),
    }
}

#[tokio::test]
async fn test_write_maps_statuses() {
    let (connection, server) = connected(plant_script()).await;

    let results = connection
        .write(&[speed(), missing()], &[PlcValue::Dint(7), PlcValue::Dint(8)])
        .await
        .unwrap();

    assert_eq!(results["speed"].code, ResponseCode::Ok);
    assert_eq!(results["missing"].code, ResponseCode::NotFound);

    match server.requests().last() {
        Some(ServiceRequest::Write(request)) => {
            assert_eq!(
                request.nodes_to_write[0].value.value,
                Some(Variant::scalar(Scalar::Int32(7)))
            );
        }
        _ => panic!("expected a Write request"),
    }

    let read_back = connection.read(&[speed()]).await.unwrap();
    assert_eq!(read_back["speed"].value, Some(PlcValue::Dint(7)));
}

#[tokio::test]
async fn test_write_with_unknown_type_is_not_sent() {
    let (connection, server) = connected(plant_script()).await;
    let field = UaField::new(
        "recipe",
        UaTag::new(NodeId::numeric(2, 5)).with_data_type(PlcDataType::Unknown("UDT_Recipe".into())),
    );

    let result = connection.write(&[field], &[PlcValue::Dint(1)]).await;

    assert!(matches!(result, Err(UaError::Conversion(_))));
    assert!(!server.request_kinds().contains(&ServiceKind::WriteRequest));
}

#[tokio::test]
async fn test_concurrent_reads_share_the_connection() {
    let (connection, _server) = connected(plant_script()).await;

    let reads = (0..8).map(|_| {
        let connection = connection.clone();
        async move { connection.read(&[speed()]).await }
    });
    let results = futures::future::join_all(reads).await;

    assert!(results
        .iter()
        .all(|r| r.as_ref().map(|m| m["speed"].code == ResponseCode::Ok).unwrap_or(false)));
    assert_eq!(connection.pending_requests(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sequence_numbers_leave_in_order_under_load() {
    let (transport, server) = MockServer::start(plant_script());
    let config = UaConfig::builder()
        .endpoint(common::ENDPOINT)
        .request_timeout(Duration::from_secs(2))
        .close_timeout(Duration::from_secs(1))
        .max_concurrent_requests(8)
        .build()
        .unwrap();
    let connection = UaConnection::new(config).unwrap();
    connection.connect_with_transport(transport).await.unwrap();

    let fast = UaField::new(
        "speed",
        UaTag::new(speed_node()).with_interval(Duration::from_millis(5)),
    );
    let subscription = connection.subscribe(&[fast]).await.unwrap();

    let reads: Vec<_> = (0..64)
        .map(|_| {
            let connection = connection.clone();
            tokio::spawn(async move { connection.read(&[speed()]).await })
        })
        .collect();
    for result in futures::future::join_all(reads).await {
        assert_eq!(result.unwrap().unwrap()["speed"].code, ResponseCode::Ok);
    }

    connection.unsubscribe(&subscription).await.unwrap();
    connection.disconnect().await.unwrap();

    let sequence_numbers = server.sequence_numbers();
    assert!(sequence_numbers.len() > 64);
    assert!(
        sequence_numbers.windows(2).all(|pair| pair[0] < pair[1]),
        "sequence numbers out of order: {:?}",
        sequence_numbers
    );
}

// =============================================================================
// Discovery and Message Security
// =============================================================================

#[tokio::test]
async fn test_discovery_selects_matching_endpoint() {
    let (transport, server) = MockServer::start(Script::default());
    let connection = UaConnection::new(config()).unwrap();
    let mut events = connection.events();

    let info = connection.discover_with_transport(transport).await.unwrap();

    assert_eq!(info.endpoint_url, common::ENDPOINT);
    assert_eq!(info.security_policy_uri, SecurityPolicy::None.uri());
    assert_eq!(
        &server.request_kinds()[..2],
        &[ServiceKind::OpenSecureChannelRequest, ServiceKind::GetEndpointsRequest]
    );
    assert!(matches!(
        next_event(&mut events).await,
        ConnectionEvent::Discovered(_)
    ));
    assert_eq!(connection.phase(), ConnectionPhase::Disconnected);
    assert_eq!(connection.discovered_endpoint(), Some(info));
}

#[tokio::test]
async fn test_discovery_without_matching_policy_fails() {
    let (transport, _server) = MockServer::start(Script::default());
    let config = UaConfig::builder()
        .endpoint(common::ENDPOINT)
        .security_policy(SecurityPolicy::Basic256Sha256)
        .build()
        .unwrap();
    let connection = UaConnection::with_security(config, Arc::new(XorSecurity { key: 0x5A })).unwrap();

    let result = connection.discover_with_transport(transport).await;

    assert!(matches!(
        result,
        Err(UaError::Connection(ConnectionError::NoSuitableEndpoint { .. }))
    ));
    assert!(connection.discovered_endpoint().is_none());
}

#[tokio::test]
async fn test_encrypted_connect_after_discovery() {
    let certificate = b"server-cert";
    let config = UaConfig::builder()
        .endpoint(common::ENDPOINT)
        .security_policy(SecurityPolicy::Basic256Sha256)
        .request_timeout(Duration::from_secs(2))
        .build()
        .unwrap();
    let connection =
        UaConnection::with_security(config, Arc::new(XorSecurity { key: 0x5A })).unwrap();

    let (discovery, _discovery_server) = MockServer::start(
        Script::default().with_policy(SecurityPolicy::Basic256Sha256, certificate),
    );
    let info = connection.discover_with_transport(discovery).await.unwrap();
    assert_eq!(info.thumbprint.as_deref(), Some(hex::encode(b"serv").as_str()));

    let (transport, server) = MockServer::start(
        plant_script()
            .with_policy(SecurityPolicy::Basic256Sha256, certificate)
            .with_envelope(0x5A),
    );
    connection.connect_with_transport(transport).await.unwrap();

    let headers = server.open_headers();
    assert_eq!(headers.len(), 1);
    assert_eq!(headers[0].security_policy_uri, SecurityPolicy::Basic256Sha256.uri());
    assert_eq!(headers[0].sender_certificate.as_deref(), Some(&b"client-cert"[..]));
    assert_eq!(
        headers[0].receiver_certificate_thumbprint.as_deref(),
        Some(&b"serv"[..])
    );

    let results = connection.read(&[speed()]).await.unwrap();
    assert_eq!(results["speed"].value, Some(PlcValue::Dint(42)));
    assert!(connection.stats().responses_received >= 4);
}
