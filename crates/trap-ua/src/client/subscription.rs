// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Subscriptions and the publish loop.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     SubscriptionHandle                        │
//! │  subscription id · cycle time · ordered fields · consumers    │
//! └──────────────────────────────────────────────────────────────┘
//!          │ start()
//!          ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │ publish loop (one task per subscription)                      │
//! │   stop? ─► CycleTimeController ─► AckQueue::drain ─► spawn    │
//! │   publish ─► sleep(revised) ─► ...                            │
//! └──────────────────────────────────────────────────────────────┘
//!          │ PublishChannel::publish
//!          ▼
//!   PublishResponse ─► acks queued ─► DataChangeNotification
//!                  ─► clientHandle - 1 ─► field name ─► SubscriptionEvent
//!                  ─► every registered SubscriptionConsumer
//! ```
//!
//! The loop never waits for a publish response before issuing the next
//! request. When more than [`CONGESTION_THRESHOLD`] requests are outstanding
//! the sleep between requests grows by a tenth of the nominal cycle time per
//! iteration and decays back once the server catches up.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::results::read_result;
use crate::codec::ExtensionObject;
use crate::config::SubscriptionSettings;
use crate::error::{SubscriptionError, UaError, UaResult};
use crate::messages::subscription::DATA_CHANGE_NOTIFICATION_ID;
use crate::messages::{
    CreateMonitoredItemsRequest, CreateSubscriptionRequest, DataChangeNotification,
    MonitoredItemCreateRequest, MonitoringParameters, PublishResponse, ReadValueId, RequestHeader,
    SubscriptionAcknowledgement,
};
use crate::types::{FieldResult, TimestampsToReturn, UaField};

/// Outstanding publish requests tolerated before backing off.
pub const CONGESTION_THRESHOLD: usize = 2;

// =============================================================================
// Requests
// =============================================================================

/// Cycle time of a subscription: the first field's interval, else the default.
pub fn cycle_time_for(fields: &[UaField], settings: &SubscriptionSettings) -> Duration {
    fields
        .first()
        .and_then(|f| f.tag.interval)
        .unwrap_or(settings.default_cycle_time)
}

/// Builds the CreateSubscription request.
pub fn create_subscription_request(
    header: RequestHeader,
    cycle_time: Duration,
    settings: &SubscriptionSettings,
) -> CreateSubscriptionRequest {
    CreateSubscriptionRequest {
        request_header: header,
        requested_publishing_interval: cycle_time.as_millis() as f64,
        requested_lifetime_count: settings.lifetime_count,
        requested_max_keep_alive_count: settings.max_keep_alive_count,
        max_notifications_per_publish: settings.max_notifications_per_publish,
        publishing_enabled: true,
        priority: settings.priority,
    }
}

/// Builds the CreateMonitoredItems request.
///
/// Each field's client handle is its 1-based position in `fields`.
pub fn create_monitored_items_request(
    header: RequestHeader,
    subscription_id: u32,
    fields: &[UaField],
    cycle_time: Duration,
    settings: &SubscriptionSettings,
) -> CreateMonitoredItemsRequest {
    let items_to_create = fields
        .iter()
        .enumerate()
        .map(|(index, field)| MonitoredItemCreateRequest {
            item_to_monitor: ReadValueId::value_of(field.tag.node_id.clone()),
            monitoring_mode: field.tag.subscription_type.monitoring_mode(),
            requested_parameters: MonitoringParameters {
                client_handle: index as u32 + 1,
                sampling_interval: cycle_time.as_millis() as f64,
                filter: ExtensionObject::null(),
                queue_size: settings.queue_size,
                discard_oldest: settings.discard_oldest,
            },
        })
        .collect();

    CreateMonitoredItemsRequest {
        request_header: header,
        subscription_id,
        timestamps_to_return: TimestampsToReturn::Both,
        items_to_create,
    }
}

// =============================================================================
// CycleTimeController
// =============================================================================

/// Adaptive publish pacing.
#[derive(Debug, Clone)]
pub struct CycleTimeController {
    nominal: Duration,
    step: Duration,
    revised: Duration,
    ceiling: Option<Duration>,
}

impl CycleTimeController {
    /// Creates a controller at the nominal cycle time.
    pub fn new(nominal: Duration) -> Self {
        Self {
            nominal,
            step: nominal / 10,
            revised: nominal,
            ceiling: None,
        }
    }

    /// Caps back-off at `ceiling` (never below nominal).
    pub fn with_ceiling(mut self, ceiling: Option<Duration>) -> Self {
        self.ceiling = ceiling.map(|c| c.max(self.nominal));
        self
    }

    /// Adjusts for `outstanding` in-flight publish requests and returns the
    /// next sleep.
    pub fn adjust(&mut self, outstanding: usize) -> Duration {
        if outstanding > CONGESTION_THRESHOLD {
            self.revised += self.step;
            if let Some(ceiling) = self.ceiling {
                self.revised = self.revised.min(ceiling);
            }
            warn!(
                outstanding,
                revised_ms = self.revised.as_millis() as u64,
                "Publish requests piling up, backing off"
            );
        } else if self.revised > self.nominal {
            self.revised = self.revised.saturating_sub(self.step).max(self.nominal);
        }
        self.revised
    }

    /// Current sleep.
    pub fn revised(&self) -> Duration {
        self.revised
    }

    /// Nominal cycle time.
    pub fn nominal(&self) -> Duration {
        self.nominal
    }
}

// =============================================================================
// AckQueue
// =============================================================================

/// Sequence numbers waiting to be acknowledged in the next publish request.
#[derive(Debug, Default)]
pub struct AckQueue {
    pending: Mutex<VecDeque<u32>>,
}

impl AckQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues sequence numbers.
    pub fn push_all(&self, sequence_numbers: &[u32]) {
        self.pending.lock().extend(sequence_numbers.iter().copied());
    }

    /// Removes everything queued.
    pub fn drain(&self, subscription_id: u32) -> Vec<SubscriptionAcknowledgement> {
        self.pending
            .lock()
            .drain(..)
            .map(|sequence_number| SubscriptionAcknowledgement {
                subscription_id,
                sequence_number,
            })
            .collect()
    }

    /// Number of queued sequence numbers.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

// =============================================================================
// Sleeper
// =============================================================================

/// Sleep source of the publish loop.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Suspends for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

// =============================================================================
// Events and Consumers
// =============================================================================

/// Values delivered by one data change notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionEvent {
    /// Server subscription id.
    pub subscription_id: u32,
    /// Arrival time.
    pub timestamp: DateTime<Utc>,
    /// Field name to result.
    pub values: HashMap<String, FieldResult>,
}

/// Receives subscription events.
#[async_trait]
pub trait SubscriptionConsumer: Send + Sync {
    /// Called for every data change batch.
    async fn on_event(&self, event: SubscriptionEvent);

    /// Called once when the publish loop fails.
    async fn on_error(&self, _subscription_id: u32, _error: &UaError) {}
}

/// mpsc-backed consumer.
pub struct ChannelConsumer {
    sender: mpsc::Sender<SubscriptionEvent>,
}

impl ChannelConsumer {
    /// Wraps a sender.
    pub fn new(sender: mpsc::Sender<SubscriptionEvent>) -> Self {
        Self { sender }
    }

    /// Creates a consumer and its receiver.
    pub fn with_channel(capacity: usize) -> (Self, mpsc::Receiver<SubscriptionEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl SubscriptionConsumer for ChannelConsumer {
    async fn on_event(&self, event: SubscriptionEvent) {
        let _ = self.sender.send(event).await;
    }
}

/// Broadcast-backed consumer for several receivers.
pub struct BroadcastConsumer {
    sender: broadcast::Sender<SubscriptionEvent>,
}

impl BroadcastConsumer {
    /// Creates a consumer with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Adds a receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<SubscriptionEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl SubscriptionConsumer for BroadcastConsumer {
    async fn on_event(&self, event: SubscriptionEvent) {
        let _ = self.sender.send(event);
    }
}

// =============================================================================
// PublishChannel
// =============================================================================

/// The connection as seen by a publish loop.
#[async_trait]
pub trait PublishChannel: Send + Sync {
    /// Mints a request handle.
    fn next_request_handle(&self) -> u32;

    /// Sends one publish request and waits for its response.
    ///
    /// Service faults surface as errors.
    async fn publish(
        &self,
        request_handle: u32,
        acknowledgements: Vec<SubscriptionAcknowledgement>,
    ) -> UaResult<PublishResponse>;

    /// Reports a failed publish. The connection is expected to disconnect.
    async fn publish_failed(&self, subscription_id: u32, error: UaError);
}

// =============================================================================
// SubscriptionHandle
// =============================================================================

struct SubscriptionShared {
    subscription_id: u32,
    cycle_time: Duration,
    fields: Vec<String>,
    consumers: RwLock<HashMap<u64, Arc<dyn SubscriptionConsumer>>>,
    next_consumer_id: AtomicU64,
    outstanding: Mutex<HashSet<u32>>,
    acks: AckQueue,
    controller: Mutex<CycleTimeController>,
    stopped: AtomicBool,
    stop_signal: Notify,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
    publish_responses: AtomicU64,
    events_delivered: AtomicU64,
}

/// A live subscription.
///
/// Cloning yields another handle to the same subscription.
#[derive(Clone)]
pub struct SubscriptionHandle {
    shared: Arc<SubscriptionShared>,
}

impl SubscriptionHandle {
    /// Creates a handle for `fields` in client-handle order.
    pub fn new(
        subscription_id: u32,
        cycle_time: Duration,
        fields: Vec<String>,
        max_revised_cycle_time: Option<Duration>,
    ) -> Self {
        Self {
            shared: Arc::new(SubscriptionShared {
                subscription_id,
                cycle_time,
                fields,
                consumers: RwLock::new(HashMap::new()),
                next_consumer_id: AtomicU64::new(1),
                outstanding: Mutex::new(HashSet::new()),
                acks: AckQueue::new(),
                controller: Mutex::new(
                    CycleTimeController::new(cycle_time).with_ceiling(max_revised_cycle_time),
                ),
                stopped: AtomicBool::new(false),
                stop_signal: Notify::new(),
                loop_handle: Mutex::new(None),
                publish_responses: AtomicU64::new(0),
                events_delivered: AtomicU64::new(0),
            }),
        }
    }

    /// Server subscription id.
    pub fn subscription_id(&self) -> u32 {
        self.shared.subscription_id
    }

    /// Nominal cycle time.
    pub fn cycle_time(&self) -> Duration {
        self.shared.cycle_time
    }

    /// Current publish pacing.
    pub fn revised_cycle_time(&self) -> Duration {
        self.shared.controller.lock().revised()
    }

    /// Field names in client-handle order.
    pub fn fields(&self) -> &[String] {
        &self.shared.fields
    }

    /// Field name for a 1-based client handle.
    pub fn field_for_handle(&self, client_handle: u32) -> Option<&str> {
        let index = usize::try_from(client_handle).ok()?.checked_sub(1)?;
        self.shared.fields.get(index).map(String::as_str)
    }

    /// Registers a consumer and returns its registration id.
    pub fn register(&self, consumer: Arc<dyn SubscriptionConsumer>) -> u64 {
        let id = self.shared.next_consumer_id.fetch_add(1, Ordering::Relaxed);
        self.shared.consumers.write().insert(id, consumer);
        debug!(subscription_id = self.subscription_id(), consumer = id, "Consumer registered");
        id
    }

    /// Removes a consumer.
    pub fn unregister(&self, registration: u64) -> UaResult<()> {
        self.shared
            .consumers
            .write()
            .remove(&registration)
            .map(|_| ())
            .ok_or_else(|| SubscriptionError::ConsumerNotFound(registration).into())
    }

    /// Registered consumers.
    pub fn consumer_count(&self) -> usize {
        self.shared.consumers.read().len()
    }

    /// Publish requests sent but not yet answered.
    pub fn outstanding(&self) -> usize {
        self.shared.outstanding.lock().len()
    }

    /// Publish responses received.
    pub fn publish_responses(&self) -> u64 {
        self.shared.publish_responses.load(Ordering::Relaxed)
    }

    /// Events handed to consumers.
    pub fn events_delivered(&self) -> u64 {
        self.shared.events_delivered.load(Ordering::Relaxed)
    }

    /// Asks the publish loop to exit at the top of its next iteration.
    ///
    /// In-flight publish requests are left to complete.
    pub fn stop(&self) {
        if !self.shared.stopped.swap(true, Ordering::SeqCst) {
            info!(subscription_id = self.subscription_id(), "Subscription stopping");
        }
        self.shared.stop_signal.notify_waiters();
    }

    /// Returns `true` once [`stop`](Self::stop) was called.
    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::SeqCst)
    }

    /// Waits for the publish loop task to exit.
    pub async fn join(&self) {
        let handle = self.shared.loop_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Starts the publish loop.
    pub fn start(&self, channel: Arc<dyn PublishChannel>, sleeper: Arc<dyn Sleeper>) {
        let handle = self.clone();
        let task = tokio::spawn(async move {
            handle.run(channel, sleeper).await;
        });
        *self.shared.loop_handle.lock() = Some(task);
    }

    async fn run(self, channel: Arc<dyn PublishChannel>, sleeper: Arc<dyn Sleeper>) {
        let subscription_id = self.subscription_id();
        info!(
            subscription_id,
            cycle_ms = self.cycle_time().as_millis() as u64,
            "Publish loop started"
        );

        loop {
            if self.is_stopped() {
                break;
            }

            let outstanding = self.outstanding();
            let revised = self.shared.controller.lock().adjust(outstanding);
            let acknowledgements = self.shared.acks.drain(subscription_id);
            let request_handle = channel.next_request_handle();
            self.shared.outstanding.lock().insert(request_handle);
            trace!(
                subscription_id,
                request_handle,
                acks = acknowledgements.len(),
                "Publishing"
            );

            let handle = self.clone();
            let publisher = Arc::clone(&channel);
            tokio::spawn(async move {
                handle
                    .publish_once(publisher, request_handle, acknowledgements)
                    .await;
            });

            tokio::select! {
                _ = sleeper.sleep(revised) => {}
                _ = self.shared.stop_signal.notified() => {}
            }
        }

        info!(subscription_id, "Publish loop stopped");
    }

    async fn publish_once(
        &self,
        channel: Arc<dyn PublishChannel>,
        request_handle: u32,
        acknowledgements: Vec<SubscriptionAcknowledgement>,
    ) {
        let subscription_id = self.subscription_id();
        let outcome = channel.publish(request_handle, acknowledgements).await;
        self.shared.outstanding.lock().remove(&request_handle);

        let result = outcome.and_then(|response| {
            let status = response.response_header.service_result;
            if status.is_bad() {
                Err(SubscriptionError::publish_failed(
                    subscription_id,
                    format!("server returned {}", status),
                )
                .into())
            } else {
                Ok(response)
            }
        });

        match result {
            Ok(response) => {
                self.shared.publish_responses.fetch_add(1, Ordering::Relaxed);
                self.shared.acks.push_all(&response.available_sequence_numbers);
                for event in self.events_from(&response) {
                    self.deliver(event).await;
                }
            }
            Err(e) => {
                if self.is_stopped() {
                    debug!(subscription_id, error = %e, "Publish failed after stop");
                    return;
                }
                error!(subscription_id, request_handle, error = %e, "Publish failed");
                self.stop();
                let consumers = self.consumers();
                for consumer in consumers {
                    consumer.on_error(subscription_id, &e).await;
                }
                channel.publish_failed(subscription_id, e).await;
            }
        }
    }

    /// Decodes the data change batches of a publish response.
    fn events_from(&self, response: &PublishResponse) -> Vec<SubscriptionEvent> {
        let mut events = Vec::new();
        for notification in &response.notification_message.notification_data {
            if notification.type_id.as_numeric() != Some(DATA_CHANGE_NOTIFICATION_ID) {
                warn!(
                    subscription_id = self.subscription_id(),
                    type_id = %notification.type_id,
                    "Unsupported Notification type"
                );
                continue;
            }
            let batch: DataChangeNotification =
                match notification.decode_as(DATA_CHANGE_NOTIFICATION_ID) {
                    Ok(batch) => batch,
                    Err(e) => {
                        e.log("data change notification");
                        continue;
                    }
                };

            let mut values = HashMap::with_capacity(batch.monitored_items.len());
            for item in &batch.monitored_items {
                match self.field_for_handle(item.client_handle) {
                    Some(field) => {
                        values.insert(field.to_string(), read_result(field, &item.value));
                    }
                    None => warn!(
                        subscription_id = self.subscription_id(),
                        client_handle = item.client_handle,
                        "Notification for unknown client handle"
                    ),
                }
            }
            if !values.is_empty() {
                events.push(SubscriptionEvent {
                    subscription_id: self.subscription_id(),
                    timestamp: Utc::now(),
                    values,
                });
            }
        }
        events
    }

    fn consumers(&self) -> Vec<Arc<dyn SubscriptionConsumer>> {
        self.shared.consumers.read().values().cloned().collect()
    }

    async fn deliver(&self, event: SubscriptionEvent) {
        for consumer in self.consumers() {
            consumer.on_event(event.clone()).await;
        }
        self.shared.events_delivered.fetch_add(1, Ordering::Relaxed);
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("subscription_id", &self.subscription_id())
            .field("cycle_time", &self.cycle_time())
            .field("fields", &self.shared.fields)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::DataValue;
    use crate::messages::{MonitoredItemNotification, NotificationMessage, ResponseHeader};
    use crate::types::{NodeId, PlcValue, ResponseCode, StatusCode, UaTag};
    use crate::variant::{Scalar, Variant};
    use std::sync::atomic::AtomicU32;

    fn fields(names: &[&str]) -> Vec<UaField> {
        names
            .iter()
            .enumerate()
            .map(|(i, n)| UaField::new(*n, UaTag::new(NodeId::numeric(2, i as u32 + 1))))
            .collect()
    }

    fn data_change(items: Vec<(u32, Variant)>) -> ExtensionObject {
        ExtensionObject::from_encodable(
            DATA_CHANGE_NOTIFICATION_ID,
            &DataChangeNotification {
                monitored_items: items
                    .into_iter()
                    .map(|(client_handle, v)| MonitoredItemNotification {
                        client_handle,
                        value: DataValue::new(v),
                    })
                    .collect(),
                diagnostic_infos: Vec::new(),
            },
        )
    }

    fn publish_response(
        request_handle: u32,
        available: Vec<u32>,
        data: Vec<ExtensionObject>,
    ) -> PublishResponse {
        PublishResponse {
            response_header: ResponseHeader::good(request_handle),
            subscription_id: 5,
            available_sequence_numbers: available,
            more_notifications: false,
            notification_message: NotificationMessage {
                sequence_number: 1,
                publish_time: Utc::now(),
                notification_data: data,
            },
            results: Vec::new(),
            diagnostic_infos: Vec::new(),
        }
    }

    /// Answers the first publish with `first`, then never answers again.
    struct ScriptedChannel {
        handles: AtomicU32,
        first: Mutex<Option<UaResult<PublishResponse>>>,
        acks_seen: Mutex<Vec<Vec<SubscriptionAcknowledgement>>>,
        failures: Mutex<Vec<u32>>,
    }

    impl ScriptedChannel {
        fn new(first: Option<UaResult<PublishResponse>>) -> Arc<Self> {
            Arc::new(Self {
                handles: AtomicU32::new(0),
                first: Mutex::new(first),
                acks_seen: Mutex::new(Vec::new()),
                failures: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl PublishChannel for ScriptedChannel {
        fn next_request_handle(&self) -> u32 {
            self.handles.fetch_add(1, Ordering::SeqCst) + 1
        }

        async fn publish(
            &self,
            _request_handle: u32,
            acknowledgements: Vec<SubscriptionAcknowledgement>,
        ) -> UaResult<PublishResponse> {
            self.acks_seen.lock().push(acknowledgements);
            let scripted = self.first.lock().take();
            match scripted {
                Some(outcome) => outcome,
                None => futures::future::pending().await,
            }
        }

        async fn publish_failed(&self, subscription_id: u32, _error: UaError) {
            self.failures.lock().push(subscription_id);
        }
    }

    /// Records each requested sleep and stops the subscription after `limit`.
    struct RecordingSleeper {
        handle: SubscriptionHandle,
        limit: usize,
        sleeps: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            let count = {
                let mut sleeps = self.sleeps.lock();
                sleeps.push(duration);
                sleeps.len()
            };
            if count >= self.limit {
                self.handle.stop();
            }
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_congestion_backoff_and_decay() {
        let mut controller = CycleTimeController::new(Duration::from_millis(1000));
        assert_eq!(controller.adjust(3), Duration::from_millis(1100));
        assert_eq!(controller.adjust(3), Duration::from_millis(1200));
        assert_eq!(controller.adjust(2), Duration::from_millis(1100));
        assert_eq!(controller.adjust(0), Duration::from_millis(1000));
        assert_eq!(controller.adjust(1), Duration::from_millis(1000));
    }

    #[test]
    fn test_backoff_ceiling() {
        let mut controller = CycleTimeController::new(Duration::from_millis(1000))
            .with_ceiling(Some(Duration::from_millis(1150)));
        controller.adjust(5);
        assert_eq!(controller.adjust(5), Duration::from_millis(1150));
    }

    #[test]
    fn test_client_handles_round_trip_to_fields() {
        let fields = fields(&["temp", "pressure", "level"]);
        let settings = SubscriptionSettings::default();
        let request = create_monitored_items_request(
            RequestHeader::new(NodeId::null(), 1, 10_000),
            5,
            &fields,
            Duration::from_millis(500),
            &settings,
        );
        let handle = SubscriptionHandle::new(
            5,
            Duration::from_millis(500),
            fields.iter().map(|f| f.name.clone()).collect(),
            None,
        );
        for (item, field) in request.items_to_create.iter().zip(&fields) {
            let client_handle = item.requested_parameters.client_handle;
            assert_eq!(handle.field_for_handle(client_handle), Some(field.name.as_str()));
            assert_eq!(item.requested_parameters.sampling_interval, 500.0);
            assert_eq!(item.requested_parameters.queue_size, 1);
        }
        assert_eq!(handle.field_for_handle(0), None);
        assert_eq!(handle.field_for_handle(4), None);
        assert_eq!(request.timestamps_to_return, TimestampsToReturn::Both);
    }

    #[test]
    fn test_ack_queue_drains() {
        let queue = AckQueue::new();
        queue.push_all(&[4, 5]);
        let acks = queue.drain(9);
        assert_eq!(acks.len(), 2);
        assert_eq!(acks[0].subscription_id, 9);
        assert_eq!(acks[1].sequence_number, 5);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_unregister_unknown_consumer() {
        let handle = SubscriptionHandle::new(1, Duration::from_secs(1), vec!["a".into()], None);
        let (consumer, _rx) = ChannelConsumer::with_channel(1);
        let id = handle.register(Arc::new(consumer));
        assert!(handle.unregister(id).is_ok());
        assert!(handle.unregister(id).is_err());
    }

    #[tokio::test]
    async fn test_loop_backs_off_when_responses_stall() {
        let handle = SubscriptionHandle::new(5, Duration::from_millis(1000), vec!["a".into()], None);
        let channel = ScriptedChannel::new(None);
        let sleeper = Arc::new(RecordingSleeper {
            handle: handle.clone(),
            limit: 5,
            sleeps: Mutex::new(Vec::new()),
        });

        handle.start(channel.clone(), sleeper.clone());
        handle.join().await;

        let sleeps: Vec<u64> = sleeper.sleeps.lock().iter().map(|d| d.as_millis() as u64).collect();
        assert_eq!(sleeps, vec![1000, 1000, 1000, 1100, 1200]);
        assert_eq!(handle.outstanding(), 5);
    }

    #[tokio::test]
    async fn test_data_change_reaches_consumers_and_acks_are_sent() {
        let names = vec!["temp".to_string(), "pressure".to_string()];
        let handle = SubscriptionHandle::new(5, Duration::from_millis(1000), names, None);
        let (consumer, mut rx) = ChannelConsumer::with_channel(4);
        handle.register(Arc::new(consumer));

        let response = publish_response(
            1,
            vec![17],
            vec![
                data_change(vec![
                    (1, Variant::scalar(Scalar::Int32(42))),
                    (2, Variant::scalar(Scalar::Double(1.5))),
                    (9, Variant::scalar(Scalar::Boolean(true))),
                ]),
                ExtensionObject::from_encodable(
                    crate::messages::subscription::EVENT_NOTIFICATION_LIST_ID,
                    &DataValue::with_status(StatusCode::GOOD),
                ),
            ],
        );
        let channel = ScriptedChannel::new(Some(Ok(response)));
        let sleeper = Arc::new(RecordingSleeper {
            handle: handle.clone(),
            limit: 3,
            sleeps: Mutex::new(Vec::new()),
        });
        handle.start(channel.clone(), sleeper);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.subscription_id, 5);
        assert_eq!(event.values.len(), 2);
        assert_eq!(event.values["temp"], FieldResult::ok(PlcValue::Dint(42)));
        assert_eq!(event.values["pressure"].code, ResponseCode::Ok);

        handle.join().await;
        let seen = channel.acks_seen.lock().clone();
        assert!(seen
            .iter()
            .flatten()
            .any(|ack| ack.sequence_number == 17 && ack.subscription_id == 5));
    }

    #[tokio::test]
    async fn test_publish_fault_stops_and_reports() {
        let handle = SubscriptionHandle::new(5, Duration::from_millis(1000), vec!["a".into()], None);
        let channel = ScriptedChannel::new(Some(Err(UaError::service_fault(
            "Publish",
            StatusCode::BAD_SESSION_ID_INVALID,
        ))));
        let sleeper = Arc::new(RecordingSleeper {
            handle: handle.clone(),
            limit: 100,
            sleeps: Mutex::new(Vec::new()),
        });
        handle.start(channel.clone(), sleeper);
        handle.join().await;

        // The loop may exit before the failing task reports.
        for _ in 0..10 {
            if !channel.failures.lock().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(handle.is_stopped());
        assert_eq!(*channel.failures.lock(), vec![5]);
    }
}
