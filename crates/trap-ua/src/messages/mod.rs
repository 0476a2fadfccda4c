// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Wire messages.
//!
//! - [`frame`]: transport frames (HEL/ACK/ERR/OPN/MSG/CLO)
//! - [`header`]: request/response headers
//! - [`channel`], [`session`], [`attribute`], [`subscription`]: service bodies
//!
//! A service body on the wire is the numeric binary-encoding id of its type
//! (as a NodeId) followed by the structure. [`ServiceRequest`] and
//! [`ServiceResponse`] dispatch on that id.

pub mod attribute;
pub mod channel;
pub mod frame;
pub mod header;
pub mod session;
pub mod subscription;

use std::fmt;

use crate::codec::{BinaryDecode, BinaryEncode, UaReader, UaWriter};
use crate::error::{EncodingError, OperationError, UaError, UaResult};
use crate::types::NodeId;

pub use attribute::{ReadRequest, ReadResponse, ReadValueId, WriteRequest, WriteResponse, WriteValue};
pub use channel::{
    ChannelSecurityToken, CloseSecureChannelRequest, CloseSecureChannelResponse,
    OpenSecureChannelRequest, OpenSecureChannelResponse,
};
pub use frame::{
    AcknowledgeMessage, AsymmetricSecurityHeader, ErrorMessage, Frame, HelloMessage, MessageType,
    SecureFrame, SecurityHeader,
};
pub use header::{RequestHeader, ResponseHeader};
pub use session::{
    ActivateSessionRequest, ActivateSessionResponse, AnonymousIdentityToken,
    ApplicationDescription, CloseSessionRequest, CloseSessionResponse, CreateSessionRequest,
    CreateSessionResponse, EndpointDescription, GetEndpointsRequest, GetEndpointsResponse,
    SignatureData, UserNameIdentityToken, UserTokenPolicy,
};
pub use subscription::{
    CreateMonitoredItemsRequest, CreateMonitoredItemsResponse, CreateSubscriptionRequest,
    CreateSubscriptionResponse, DataChangeNotification, DeleteSubscriptionsRequest,
    DeleteSubscriptionsResponse, MonitoredItemCreateRequest, MonitoredItemCreateResult,
    MonitoredItemNotification, MonitoringParameters, NotificationMessage, PublishRequest,
    PublishResponse, ServiceFault, SubscriptionAcknowledgement,
};

// =============================================================================
// ServiceKind
// =============================================================================

/// Every message kind the engine sends or expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    /// Transport-level Acknowledge to a Hello. Not a service body.
    Acknowledge,
    OpenSecureChannelRequest,
    OpenSecureChannelResponse,
    CloseSecureChannelRequest,
    CloseSecureChannelResponse,
    GetEndpointsRequest,
    GetEndpointsResponse,
    CreateSessionRequest,
    CreateSessionResponse,
    ActivateSessionRequest,
    ActivateSessionResponse,
    CloseSessionRequest,
    CloseSessionResponse,
    ReadRequest,
    ReadResponse,
    WriteRequest,
    WriteResponse,
    CreateSubscriptionRequest,
    CreateSubscriptionResponse,
    CreateMonitoredItemsRequest,
    CreateMonitoredItemsResponse,
    PublishRequest,
    PublishResponse,
    DeleteSubscriptionsRequest,
    DeleteSubscriptionsResponse,
    ServiceFault,
}

impl ServiceKind {
    const ALL: [ServiceKind; 25] = [
        Self::OpenSecureChannelRequest,
        Self::OpenSecureChannelResponse,
        Self::CloseSecureChannelRequest,
        Self::CloseSecureChannelResponse,
        Self::GetEndpointsRequest,
        Self::GetEndpointsResponse,
        Self::CreateSessionRequest,
        Self::CreateSessionResponse,
        Self::ActivateSessionRequest,
        Self::ActivateSessionResponse,
        Self::CloseSessionRequest,
        Self::CloseSessionResponse,
        Self::ReadRequest,
        Self::ReadResponse,
        Self::WriteRequest,
        Self::WriteResponse,
        Self::CreateSubscriptionRequest,
        Self::CreateSubscriptionResponse,
        Self::CreateMonitoredItemsRequest,
        Self::CreateMonitoredItemsResponse,
        Self::PublishRequest,
        Self::PublishResponse,
        Self::DeleteSubscriptionsRequest,
        Self::DeleteSubscriptionsResponse,
        Self::ServiceFault,
    ];

    /// Binary encoding id (namespace 0). `0` for [`ServiceKind::Acknowledge`].
    pub const fn type_id(&self) -> u32 {
        match self {
            Self::Acknowledge => 0,
            Self::OpenSecureChannelRequest => 446,
            Self::OpenSecureChannelResponse => 449,
            Self::CloseSecureChannelRequest => 452,
            Self::CloseSecureChannelResponse => 455,
            Self::GetEndpointsRequest => 428,
            Self::GetEndpointsResponse => 431,
            Self::CreateSessionRequest => 461,
            Self::CreateSessionResponse => 464,
            Self::ActivateSessionRequest => 467,
            Self::ActivateSessionResponse => 470,
            Self::CloseSessionRequest => 473,
            Self::CloseSessionResponse => 476,
            Self::ReadRequest => 631,
            Self::ReadResponse => 634,
            Self::WriteRequest => 673,
            Self::WriteResponse => 676,
            Self::CreateSubscriptionRequest => 787,
            Self::CreateSubscriptionResponse => 790,
            Self::CreateMonitoredItemsRequest => 751,
            Self::CreateMonitoredItemsResponse => 754,
            Self::PublishRequest => 826,
            Self::PublishResponse => 829,
            Self::DeleteSubscriptionsRequest => 847,
            Self::DeleteSubscriptionsResponse => 850,
            Self::ServiceFault => 397,
        }
    }

    /// Looks up a service by binary encoding id.
    pub fn from_type_id(type_id: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.type_id() == type_id)
    }

    /// Returns `true` for the service fault.
    #[inline]
    pub const fn is_fault(&self) -> bool {
        matches!(self, Self::ServiceFault)
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// =============================================================================
// ServiceMessage
// =============================================================================

/// A structure that travels as a service body.
pub trait ServiceMessage: BinaryEncode + BinaryDecode {
    /// Kind (and therefore type id) of this message.
    const KIND: ServiceKind;

    /// Encodes the type id followed by the structure.
    fn encode_body(&self) -> Vec<u8> {
        let mut w = UaWriter::with_capacity(128);
        NodeId::numeric(0, Self::KIND.type_id()).encode(&mut w);
        self.encode(&mut w);
        w.into_inner()
    }
}

/// Reads the leading type id of a service body.
fn read_kind(reader: &mut UaReader<'_>) -> UaResult<ServiceKind> {
    let type_id = NodeId::decode(reader)?;
    let numeric = type_id
        .as_numeric()
        .filter(|_| type_id.namespace_index == 0)
        .ok_or_else(|| EncodingError::invalid("ServiceBody", format!("type id {}", type_id)))?;
    ServiceKind::from_type_id(numeric)
        .ok_or_else(|| UaError::from(EncodingError::UnknownTypeId { type_id: numeric }))
}

macro_rules! service_union {
    (
        $(#[$meta:meta])*
        $name:ident, $header_ty:ty, $header_field:ident {
            $($variant:ident($ty:ty)),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        pub enum $name {
            $(
                #[allow(missing_docs)]
                $variant($ty),
            )*
        }

        impl $name {
            /// Kind of the contained message.
            pub fn kind(&self) -> ServiceKind {
                match self {
                    $(Self::$variant(_) => <$ty as ServiceMessage>::KIND,)*
                }
            }

            /// Header of the contained message.
            pub fn header(&self) -> &$header_ty {
                match self {
                    $(Self::$variant(m) => &m.$header_field,)*
                }
            }

            /// Encodes type id and structure.
            pub fn encode_body(&self) -> Vec<u8> {
                match self {
                    $(Self::$variant(m) => m.encode_body(),)*
                }
            }

            /// Decodes a service body, dispatching on its type id.
            pub fn decode_body(body: &[u8]) -> UaResult<Self> {
                let mut reader = UaReader::new(body);
                let kind = read_kind(&mut reader)?;
                $(
                    if kind == <$ty as ServiceMessage>::KIND {
                        return Ok(Self::$variant(<$ty>::decode(&mut reader)?));
                    }
                )*
                Err(OperationError::unexpected_response(stringify!($name), kind).into())
            }
        }

        $(
            impl From<$ty> for $name {
                fn from(message: $ty) -> Self {
                    Self::$variant(message)
                }
            }

            impl TryFrom<$name> for $ty {
                type Error = UaError;

                fn try_from(value: $name) -> UaResult<Self> {
                    match value {
                        $name::$variant(m) => Ok(m),
                        #[allow(unreachable_patterns)]
                        other => Err(OperationError::unexpected_response(
                            <$ty as ServiceMessage>::KIND,
                            other.kind(),
                        )
                        .into()),
                    }
                }
            }
        )*
    };
}

service_union! {
    /// Any request the client sends.
    ServiceRequest, RequestHeader, request_header {
        OpenSecureChannel(OpenSecureChannelRequest),
        CloseSecureChannel(CloseSecureChannelRequest),
        GetEndpoints(GetEndpointsRequest),
        CreateSession(CreateSessionRequest),
        ActivateSession(ActivateSessionRequest),
        CloseSession(CloseSessionRequest),
        Read(ReadRequest),
        Write(WriteRequest),
        CreateSubscription(CreateSubscriptionRequest),
        CreateMonitoredItems(CreateMonitoredItemsRequest),
        Publish(PublishRequest),
        DeleteSubscriptions(DeleteSubscriptionsRequest),
    }
}

service_union! {
    /// Any response the client accepts, including the service fault.
    ServiceResponse, ResponseHeader, response_header {
        OpenSecureChannel(OpenSecureChannelResponse),
        CloseSecureChannel(CloseSecureChannelResponse),
        GetEndpoints(GetEndpointsResponse),
        CreateSession(CreateSessionResponse),
        ActivateSession(ActivateSessionResponse),
        CloseSession(CloseSessionResponse),
        Read(ReadResponse),
        Write(WriteResponse),
        CreateSubscription(CreateSubscriptionResponse),
        CreateMonitoredItems(CreateMonitoredItemsResponse),
        Publish(PublishResponse),
        DeleteSubscriptions(DeleteSubscriptionsResponse),
        ServiceFault(ServiceFault),
    }
}

macro_rules! impl_service_message {
    ($($ty:ident),* $(,)?) => {
        $(
            impl ServiceMessage for $ty {
                const KIND: ServiceKind = ServiceKind::$ty;
            }
        )*
    };
}

impl_service_message!(
    OpenSecureChannelRequest,
    OpenSecureChannelResponse,
    CloseSecureChannelRequest,
    CloseSecureChannelResponse,
    GetEndpointsRequest,
    GetEndpointsResponse,
    CreateSessionRequest,
    CreateSessionResponse,
    ActivateSessionRequest,
    ActivateSessionResponse,
    CloseSessionRequest,
    CloseSessionResponse,
    ReadRequest,
    ReadResponse,
    WriteRequest,
    WriteResponse,
    CreateSubscriptionRequest,
    CreateSubscriptionResponse,
    CreateMonitoredItemsRequest,
    CreateMonitoredItemsResponse,
    PublishRequest,
    PublishResponse,
    DeleteSubscriptionsRequest,
    DeleteSubscriptionsResponse,
    ServiceFault,
);

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StatusCode;

    #[test]
    fn test_type_id_lookup() {
        assert_eq!(ServiceKind::from_type_id(631), Some(ServiceKind::ReadRequest));
        assert_eq!(ServiceKind::from_type_id(829), Some(ServiceKind::PublishResponse));
        assert_eq!(ServiceKind::from_type_id(397), Some(ServiceKind::ServiceFault));
        assert_eq!(ServiceKind::from_type_id(0), None);
        assert_eq!(ServiceKind::from_type_id(12345), None);
    }

    #[test]
    fn test_fault_dispatch() {
        let fault = ServiceFault {
            response_header: ResponseHeader::new(9, StatusCode::BAD_SESSION_ID_INVALID),
        };
        let body = fault.encode_body();
        let decoded = ServiceResponse::decode_body(&body).unwrap();
        assert_eq!(decoded.kind(), ServiceKind::ServiceFault);
        assert_eq!(decoded.header().request_handle, 9);
        assert!(ReadResponse::try_from(decoded).is_err());
    }

    #[test]
    fn test_request_is_not_a_response() {
        let body = CloseSecureChannelRequest {
            request_header: RequestHeader::new(NodeId::null(), 1, 1000),
        }
        .encode_body();
        assert!(ServiceResponse::decode_body(&body).is_err());
        assert_eq!(
            ServiceRequest::decode_body(&body).unwrap().kind(),
            ServiceKind::CloseSecureChannelRequest
        );
    }
}
