// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Subscriptions and the publish loop against a scripted server.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{config, MockServer, Script, SUBSCRIPTION_ID};
use trap_ua::client::ConnectionPhase;
use trap_ua::messages::{ServiceKind, ServiceRequest};
use trap_ua::types::StatusCode;
use trap_ua::variant::Scalar;
use trap_ua::{
    ChannelConsumer, ConnectionEvent, NodeId, PlcValue, ResponseCode, UaConnection, UaField,
    UaTag, Variant,
};

fn fields() -> Vec<UaField> {
    vec![
        UaField::new(
            "speed",
            UaTag::new(NodeId::numeric(2, 1)).with_interval(Duration::from_millis(50)),
        ),
        UaField::new("temperature", UaTag::new(NodeId::numeric(2, 2))),
    ]
}

async fn connected(script: Script) -> (UaConnection, MockServer) {
    let (transport, server) = MockServer::start(script);
    let connection = UaConnection::new(config()).unwrap();
    connection.connect_with_transport(transport).await.unwrap();
    (connection, server)
}

#[tokio::test]
async fn test_subscribe_creates_subscription_and_items() {
    let (connection, server) = connected(Script::default()).await;

    let handle = connection.subscribe(&fields()).await.unwrap();

    assert_eq!(handle.subscription_id(), SUBSCRIPTION_ID);
    assert_eq!(handle.cycle_time(), Duration::from_millis(50));
    assert_eq!(handle.fields(), &["speed".to_string(), "temperature".to_string()]);

    let requests = server.requests();
    let create = requests.iter().find_map(|r| match r {
        ServiceRequest::CreateSubscription(c) => Some(c.clone()),
        _ => None,
    });
    assert_eq!(create.map(|c| c.requested_publishing_interval), Some(50.0));

    let items = requests.iter().find_map(|r| match r {
        ServiceRequest::CreateMonitoredItems(c) => Some(c.clone()),
        _ => None,
    });
    let items = items.expect("CreateMonitoredItems sent");
    assert_eq!(items.subscription_id, SUBSCRIPTION_ID);
    let handles: Vec<u32> = items
        .items_to_create
        .iter()
        .map(|i| i.requested_parameters.client_handle)
        .collect();
    assert_eq!(handles, vec![1, 2]);

    assert!(server.wait_for(ServiceKind::PublishRequest).await);
    assert_eq!(connection.subscriptions().len(), 1);
    connection.disconnect().await.unwrap();
    assert!(handle.is_stopped());
}

#[tokio::test]
async fn test_data_change_is_delivered_and_acknowledged() {
    let script = Script::default().with_first_publish(1, Variant::scalar(Scalar::Int32(7)));
    let (connection, server) = connected(script).await;

    let handle = connection.subscribe(&fields()).await.unwrap();
    let (consumer, mut events) = ChannelConsumer::with_channel(16);
    handle.register(Arc::new(consumer));

    let event = tokio::time::timeout(Duration::from_secs(3), events.recv())
        .await
        .expect("no data change")
        .expect("consumer channel closed");

    assert_eq!(event.subscription_id, SUBSCRIPTION_ID);
    assert_eq!(event.values["speed"].code, ResponseCode::Ok);
    assert_eq!(event.values["speed"].value, Some(PlcValue::Dint(7)));
    assert!(!event.values.contains_key("temperature"));

    assert!(server.wait_for_ack(1).await);
    assert!(handle.publish_responses() >= 1);
    assert!(connection.stats().publish_responses >= 1);

    connection.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_publish_fault_disconnects() {
    let script = Script::default().with_publish_fault(StatusCode::BAD_SESSION_ID_INVALID);
    let (connection, server) = connected(script).await;
    let mut lifecycle = connection.events();

    let handle = connection.subscribe(&fields()).await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(3), lifecycle.recv())
        .await
        .expect("no disconnect")
        .expect("event channel closed");
    assert!(matches!(event, ConnectionEvent::Disconnected { .. }));

    assert!(handle.is_stopped());
    assert_eq!(connection.phase(), ConnectionPhase::Disconnected);
    assert!(server.request_kinds().contains(&ServiceKind::CloseSessionRequest));
    assert!(connection.stats().service_faults >= 1);
}

#[tokio::test]
async fn test_unsubscribe_deletes_on_server() {
    let (connection, server) = connected(Script::default()).await;
    let handle = connection.subscribe(&fields()).await.unwrap();

    connection.unsubscribe(&handle).await.unwrap();

    assert!(handle.is_stopped());
    assert!(connection.subscriptions().is_empty());
    let deleted = server.requests().into_iter().find_map(|r| match r {
        ServiceRequest::DeleteSubscriptions(d) => Some(d.subscription_ids),
        _ => None,
    });
    assert_eq!(deleted, Some(vec![SUBSCRIPTION_ID]));
    assert!(connection.is_connected());

    connection.disconnect().await.unwrap();
}
