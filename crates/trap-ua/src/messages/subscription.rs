// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Subscription, monitored item and publish service bodies.

use chrono::{DateTime, Utc};

use super::attribute::ReadValueId;
use super::header::{RequestHeader, ResponseHeader};
use crate::codec::{
    BinaryDecode, BinaryEncode, DataValue, DiagnosticInfo, ExtensionObject, UaReader, UaWriter,
};
use crate::error::UaResult;
use crate::types::{MonitoringMode, StatusCode, TimestampsToReturn};

/// Binary encoding id of `DataChangeNotification`.
pub const DATA_CHANGE_NOTIFICATION_ID: u32 = 811;

/// Binary encoding id of `EventNotificationList`.
pub const EVENT_NOTIFICATION_LIST_ID: u32 = 916;

/// Binary encoding id of `StatusChangeNotification`.
pub const STATUS_CHANGE_NOTIFICATION_ID: u32 = 820;

// =============================================================================
// CreateSubscription
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct CreateSubscriptionRequest {
    pub request_header: RequestHeader,
    pub requested_publishing_interval: f64,
    pub requested_lifetime_count: u32,
    pub requested_max_keep_alive_count: u32,
    pub max_notifications_per_publish: u32,
    pub publishing_enabled: bool,
    pub priority: u8,
}

impl BinaryEncode for CreateSubscriptionRequest {
    fn encode(&self, w: &mut UaWriter) {
        self.request_header.encode(w);
        w.write_f64(self.requested_publishing_interval);
        w.write_u32(self.requested_lifetime_count);
        w.write_u32(self.requested_max_keep_alive_count);
        w.write_u32(self.max_notifications_per_publish);
        w.write_bool(self.publishing_enabled);
        w.write_u8(self.priority);
    }
}

impl BinaryDecode for CreateSubscriptionRequest {
    fn decode(r: &mut UaReader<'_>) -> UaResult<Self> {
        Ok(Self {
            request_header: RequestHeader::decode(r)?,
            requested_publishing_interval: r.read_f64()?,
            requested_lifetime_count: r.read_u32()?,
            requested_max_keep_alive_count: r.read_u32()?,
            max_notifications_per_publish: r.read_u32()?,
            publishing_enabled: r.read_bool()?,
            priority: r.read_u8()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateSubscriptionResponse {
    pub response_header: ResponseHeader,
    pub subscription_id: u32,
    pub revised_publishing_interval: f64,
    pub revised_lifetime_count: u32,
    pub revised_max_keep_alive_count: u32,
}

impl BinaryEncode for CreateSubscriptionResponse {
    fn encode(&self, w: &mut UaWriter) {
        self.response_header.encode(w);
        w.write_u32(self.subscription_id);
        w.write_f64(self.revised_publishing_interval);
        w.write_u32(self.revised_lifetime_count);
        w.write_u32(self.revised_max_keep_alive_count);
    }
}

impl BinaryDecode for CreateSubscriptionResponse {
    fn decode(r: &mut UaReader<'_>) -> UaResult<Self> {
        Ok(Self {
            response_header: ResponseHeader::decode(r)?,
            subscription_id: r.read_u32()?,
            revised_publishing_interval: r.read_f64()?,
            revised_lifetime_count: r.read_u32()?,
            revised_max_keep_alive_count: r.read_u32()?,
        })
    }
}

// =============================================================================
// CreateMonitoredItems
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct MonitoringParameters {
    pub client_handle: u32,
    pub sampling_interval: f64,
    pub filter: ExtensionObject,
    pub queue_size: u32,
    pub discard_oldest: bool,
}

impl BinaryEncode for MonitoringParameters {
    fn encode(&self, w: &mut UaWriter) {
        w.write_u32(self.client_handle);
        w.write_f64(self.sampling_interval);
        self.filter.encode(w);
        w.write_u32(self.queue_size);
        w.write_bool(self.discard_oldest);
    }
}

impl BinaryDecode for MonitoringParameters {
    fn decode(r: &mut UaReader<'_>) -> UaResult<Self> {
        Ok(Self {
            client_handle: r.read_u32()?,
            sampling_interval: r.read_f64()?,
            filter: ExtensionObject::decode(r)?,
            queue_size: r.read_u32()?,
            discard_oldest: r.read_bool()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredItemCreateRequest {
    pub item_to_monitor: ReadValueId,
    pub monitoring_mode: MonitoringMode,
    pub requested_parameters: MonitoringParameters,
}

impl BinaryEncode for MonitoredItemCreateRequest {
    fn encode(&self, w: &mut UaWriter) {
        self.item_to_monitor.encode(w);
        w.write_u32(self.monitoring_mode.value());
        self.requested_parameters.encode(w);
    }
}

impl BinaryDecode for MonitoredItemCreateRequest {
    fn decode(r: &mut UaReader<'_>) -> UaResult<Self> {
        Ok(Self {
            item_to_monitor: ReadValueId::decode(r)?,
            monitoring_mode: MonitoringMode::from_value(r.read_u32()?),
            requested_parameters: MonitoringParameters::decode(r)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateMonitoredItemsRequest {
    pub request_header: RequestHeader,
    pub subscription_id: u32,
    pub timestamps_to_return: TimestampsToReturn,
    pub items_to_create: Vec<MonitoredItemCreateRequest>,
}

impl BinaryEncode for CreateMonitoredItemsRequest {
    fn encode(&self, w: &mut UaWriter) {
        self.request_header.encode(w);
        w.write_u32(self.subscription_id);
        w.write_u32(self.timestamps_to_return.value());
        w.write_array(&self.items_to_create);
    }
}

impl BinaryDecode for CreateMonitoredItemsRequest {
    fn decode(r: &mut UaReader<'_>) -> UaResult<Self> {
        Ok(Self {
            request_header: RequestHeader::decode(r)?,
            subscription_id: r.read_u32()?,
            timestamps_to_return: TimestampsToReturn::from_value(r.read_u32()?),
            items_to_create: r.read_array()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredItemCreateResult {
    pub status_code: StatusCode,
    pub monitored_item_id: u32,
    pub revised_sampling_interval: f64,
    pub revised_queue_size: u32,
    pub filter_result: ExtensionObject,
}

impl BinaryEncode for MonitoredItemCreateResult {
    fn encode(&self, w: &mut UaWriter) {
        self.status_code.encode(w);
        w.write_u32(self.monitored_item_id);
        w.write_f64(self.revised_sampling_interval);
        w.write_u32(self.revised_queue_size);
        self.filter_result.encode(w);
    }
}

impl BinaryDecode for MonitoredItemCreateResult {
    fn decode(r: &mut UaReader<'_>) -> UaResult<Self> {
        Ok(Self {
            status_code: StatusCode::decode(r)?,
            monitored_item_id: r.read_u32()?,
            revised_sampling_interval: r.read_f64()?,
            revised_queue_size: r.read_u32()?,
            filter_result: ExtensionObject::decode(r)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateMonitoredItemsResponse {
    pub response_header: ResponseHeader,
    pub results: Vec<MonitoredItemCreateResult>,
    pub diagnostic_infos: Vec<DiagnosticInfo>,
}

impl BinaryEncode for CreateMonitoredItemsResponse {
    fn encode(&self, w: &mut UaWriter) {
        self.response_header.encode(w);
        w.write_array(&self.results);
        w.write_array(&self.diagnostic_infos);
    }
}

impl BinaryDecode for CreateMonitoredItemsResponse {
    fn decode(r: &mut UaReader<'_>) -> UaResult<Self> {
        Ok(Self {
            response_header: ResponseHeader::decode(r)?,
            results: r.read_array()?,
            diagnostic_infos: r.read_array()?,
        })
    }
}

// =============================================================================
// Publish
// =============================================================================

/// Acknowledges one received notification message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionAcknowledgement {
    pub subscription_id: u32,
    pub sequence_number: u32,
}

impl BinaryEncode for SubscriptionAcknowledgement {
    fn encode(&self, w: &mut UaWriter) {
        w.write_u32(self.subscription_id);
        w.write_u32(self.sequence_number);
    }
}

impl BinaryDecode for SubscriptionAcknowledgement {
    fn decode(r: &mut UaReader<'_>) -> UaResult<Self> {
        Ok(Self {
            subscription_id: r.read_u32()?,
            sequence_number: r.read_u32()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishRequest {
    pub request_header: RequestHeader,
    pub subscription_acknowledgements: Vec<SubscriptionAcknowledgement>,
}

impl BinaryEncode for PublishRequest {
    fn encode(&self, w: &mut UaWriter) {
        self.request_header.encode(w);
        w.write_array(&self.subscription_acknowledgements);
    }
}

impl BinaryDecode for PublishRequest {
    fn decode(r: &mut UaReader<'_>) -> UaResult<Self> {
        Ok(Self {
            request_header: RequestHeader::decode(r)?,
            subscription_acknowledgements: r.read_array()?,
        })
    }
}

/// A batch of notifications sent in a publish response.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationMessage {
    pub sequence_number: u32,
    pub publish_time: DateTime<Utc>,
    pub notification_data: Vec<ExtensionObject>,
}

impl BinaryEncode for NotificationMessage {
    fn encode(&self, w: &mut UaWriter) {
        w.write_u32(self.sequence_number);
        self.publish_time.encode(w);
        w.write_array(&self.notification_data);
    }
}

impl BinaryDecode for NotificationMessage {
    fn decode(r: &mut UaReader<'_>) -> UaResult<Self> {
        Ok(Self {
            sequence_number: r.read_u32()?,
            publish_time: DateTime::<Utc>::decode(r)?,
            notification_data: r.read_array()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishResponse {
    pub response_header: ResponseHeader,
    pub subscription_id: u32,
    pub available_sequence_numbers: Vec<u32>,
    pub more_notifications: bool,
    pub notification_message: NotificationMessage,
    pub results: Vec<StatusCode>,
    pub diagnostic_infos: Vec<DiagnosticInfo>,
}

impl BinaryEncode for PublishResponse {
    fn encode(&self, w: &mut UaWriter) {
        self.response_header.encode(w);
        w.write_u32(self.subscription_id);
        w.write_u32_array(&self.available_sequence_numbers);
        w.write_bool(self.more_notifications);
        self.notification_message.encode(w);
        w.write_array(&self.results);
        w.write_array(&self.diagnostic_infos);
    }
}

impl BinaryDecode for PublishResponse {
    fn decode(r: &mut UaReader<'_>) -> UaResult<Self> {
        Ok(Self {
            response_header: ResponseHeader::decode(r)?,
            subscription_id: r.read_u32()?,
            available_sequence_numbers: r.read_u32_array()?,
            more_notifications: r.read_bool()?,
            notification_message: NotificationMessage::decode(r)?,
            results: r.read_array()?,
            diagnostic_infos: r.read_array()?,
        })
    }
}

/// Value change of one monitored item.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredItemNotification {
    pub client_handle: u32,
    pub value: DataValue,
}

impl BinaryEncode for MonitoredItemNotification {
    fn encode(&self, w: &mut UaWriter) {
        w.write_u32(self.client_handle);
        self.value.encode(w);
    }
}

impl BinaryDecode for MonitoredItemNotification {
    fn decode(r: &mut UaReader<'_>) -> UaResult<Self> {
        Ok(Self {
            client_handle: r.read_u32()?,
            value: DataValue::decode(r)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataChangeNotification {
    pub monitored_items: Vec<MonitoredItemNotification>,
    pub diagnostic_infos: Vec<DiagnosticInfo>,
}

impl BinaryEncode for DataChangeNotification {
    fn encode(&self, w: &mut UaWriter) {
        w.write_array(&self.monitored_items);
        w.write_array(&self.diagnostic_infos);
    }
}

impl BinaryDecode for DataChangeNotification {
    fn decode(r: &mut UaReader<'_>) -> UaResult<Self> {
        Ok(Self {
            monitored_items: r.read_array()?,
            diagnostic_infos: r.read_array()?,
        })
    }
}

// =============================================================================
// DeleteSubscriptions / ServiceFault
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteSubscriptionsRequest {
    pub request_header: RequestHeader,
    pub subscription_ids: Vec<u32>,
}

impl BinaryEncode for DeleteSubscriptionsRequest {
    fn encode(&self, w: &mut UaWriter) {
        self.request_header.encode(w);
        w.write_u32_array(&self.subscription_ids);
    }
}

impl BinaryDecode for DeleteSubscriptionsRequest {
    fn decode(r: &mut UaReader<'_>) -> UaResult<Self> {
        Ok(Self {
            request_header: RequestHeader::decode(r)?,
            subscription_ids: r.read_u32_array()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteSubscriptionsResponse {
    pub response_header: ResponseHeader,
    pub results: Vec<StatusCode>,
    pub diagnostic_infos: Vec<DiagnosticInfo>,
}

impl BinaryEncode for DeleteSubscriptionsResponse {
    fn encode(&self, w: &mut UaWriter) {
        self.response_header.encode(w);
        w.write_array(&self.results);
        w.write_array(&self.diagnostic_infos);
    }
}

impl BinaryDecode for DeleteSubscriptionsResponse {
    fn decode(r: &mut UaReader<'_>) -> UaResult<Self> {
        Ok(Self {
            response_header: ResponseHeader::decode(r)?,
            results: r.read_array()?,
            diagnostic_infos: r.read_array()?,
        })
    }
}

/// Service-level failure. The status is `response_header.service_result`.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceFault {
    pub response_header: ResponseHeader,
}

impl ServiceFault {
    /// Status reported by the server.
    pub fn status(&self) -> StatusCode {
        self.response_header.service_result
    }
}

impl BinaryEncode for ServiceFault {
    fn encode(&self, w: &mut UaWriter) {
        self.response_header.encode(w);
    }
}

impl BinaryDecode for ServiceFault {
    fn decode(r: &mut UaReader<'_>) -> UaResult<Self> {
        Ok(Self {
            response_header: ResponseHeader::decode(r)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_from_slice, encode_to_vec};
    use crate::variant::{Scalar, Variant};

    #[test]
    fn test_publish_response_with_data_change() {
        let change = DataChangeNotification {
            monitored_items: vec![MonitoredItemNotification {
                client_handle: 2,
                value: DataValue::new(Variant::scalar(Scalar::Double(21.5))),
            }],
            diagnostic_infos: Vec::new(),
        };
        let response = PublishResponse {
            response_header: ResponseHeader::good(5),
            subscription_id: 1,
            available_sequence_numbers: vec![3, 4],
            more_notifications: false,
            notification_message: NotificationMessage {
                sequence_number: 4,
                publish_time: DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
                notification_data: vec![ExtensionObject::from_encodable(
                    DATA_CHANGE_NOTIFICATION_ID,
                    &change,
                )],
            },
            results: Vec::new(),
            diagnostic_infos: Vec::new(),
        };

        let decoded: PublishResponse = decode_from_slice(&encode_to_vec(&response)).unwrap();
        assert_eq!(decoded.available_sequence_numbers, vec![3, 4]);
        let inner: DataChangeNotification = decoded.notification_message.notification_data[0]
            .decode_as(DATA_CHANGE_NOTIFICATION_ID)
            .unwrap();
        assert_eq!(inner, change);
    }
}
