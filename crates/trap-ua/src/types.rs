// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Shared OPC UA types used across the client engine.
//!
//! - **NodeId**: server-side addresses in all four identifier encodings
//! - **StatusCode**: service and per-operation result codes
//! - **Security enums**: policy, message mode, token request type
//! - **UaTag**: the client-side description of one addressable field
//! - **PlcValue / ResponseCode**: what application code gets back
//!
//! # Examples
//!
//! ```
//! use trap_ua::types::{NodeId, UaTag, PlcDataType};
//!
//! let tag = UaTag::new("ns=2;s=Line1.Speed".parse::<NodeId>().unwrap())
//!     .with_data_type(PlcDataType::Real);
//! assert_eq!(tag.node_id.namespace_index, 2);
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ConfigurationError, UaError};

// =============================================================================
// NodeId
// =============================================================================

/// OPC UA node identifier.
///
/// A namespace index plus one of the numeric, string, GUID or opaque
/// identifier forms. The binary codec picks the most compact wire encoding
/// (two-byte, four-byte or full numeric) for numeric identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId {
    /// Namespace index (0 = OPC UA standard namespace).
    pub namespace_index: u16,

    /// The node identifier.
    pub identifier: NodeIdentifier,
}

impl NodeId {
    /// Creates a numeric node ID.
    #[inline]
    pub fn numeric(namespace_index: u16, value: u32) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Numeric(value),
        }
    }

    /// Creates a string node ID.
    #[inline]
    pub fn string(namespace_index: u16, value: impl Into<String>) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::String(value.into()),
        }
    }

    /// Creates a GUID node ID.
    #[inline]
    pub fn guid(namespace_index: u16, value: Uuid) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Guid(value),
        }
    }

    /// Creates an opaque (byte string) node ID.
    #[inline]
    pub fn opaque(namespace_index: u16, value: Vec<u8>) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Opaque(value),
        }
    }

    /// The null node id (`ns=0;i=0`), used as the authentication token
    /// before a session exists.
    #[inline]
    pub fn null() -> Self {
        Self::numeric(0, 0)
    }

    /// Returns `true` for the null node id.
    pub fn is_null(&self) -> bool {
        self.namespace_index == 0 && matches!(self.identifier, NodeIdentifier::Numeric(0))
    }

    /// Returns the numeric identifier, if any.
    pub fn as_numeric(&self) -> Option<u32> {
        match self.identifier {
            NodeIdentifier::Numeric(v) => Some(v),
            _ => None,
        }
    }

    /// Formats as `ns=<n>;<t>=<id>`, omitting `ns=0;`.
    pub fn to_opc_string(&self) -> String {
        if self.namespace_index == 0 {
            self.identifier.to_string()
        } else {
            format!("ns={};{}", self.namespace_index, self.identifier)
        }
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_opc_string())
    }
}

impl FromStr for NodeId {
    type Err = UaError;

    /// Parses `ns=2;i=1001`, `ns=2;s=Name`, `ns=2;g=<uuid>`, `ns=2;b=<base64>`
    /// and the namespace-0 short forms (`i=85`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = |reason: &str| {
            UaError::configuration(ConfigurationError::invalid_node_id(s, reason))
        };

        let (namespace_index, identifier_part) = match s.strip_prefix("ns=") {
            Some(rest) => {
                let (ns, id) = rest
                    .split_once(';')
                    .ok_or_else(|| invalid("Missing identifier after namespace"))?;
                let ns: u16 = ns.parse().map_err(|_| invalid("Invalid namespace index"))?;
                (ns, id)
            }
            None => (0, s),
        };

        let identifier = if let Some(id) = identifier_part.strip_prefix("i=") {
            NodeIdentifier::Numeric(id.parse().map_err(|_| invalid("Invalid numeric identifier"))?)
        } else if let Some(id) = identifier_part.strip_prefix("s=") {
            NodeIdentifier::String(id.to_string())
        } else if let Some(id) = identifier_part.strip_prefix("g=") {
            NodeIdentifier::Guid(Uuid::parse_str(id).map_err(|_| invalid("Invalid GUID"))?)
        } else if let Some(id) = identifier_part.strip_prefix("b=") {
            NodeIdentifier::Opaque(BASE64.decode(id).map_err(|_| invalid("Invalid base64"))?)
        } else {
            return Err(invalid("Unknown identifier type. Expected i=, s=, g=, or b="));
        };

        Ok(Self {
            namespace_index,
            identifier,
        })
    }
}

/// OPC UA node identifier forms.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum NodeIdentifier {
    /// Numeric identifier.
    Numeric(u32),
    /// String identifier.
    String(String),
    /// GUID identifier.
    Guid(Uuid),
    /// Opaque identifier.
    Opaque(Vec<u8>),
}

impl fmt::Display for NodeIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(v) => write!(f, "i={}", v),
            Self::String(v) => write!(f, "s={}", v),
            Self::Guid(v) => write!(f, "g={}", v),
            Self::Opaque(v) => write!(f, "b={}", BASE64.encode(v)),
        }
    }
}

/// Identifier-type tag produced by the field address grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierKind {
    /// Two-byte numeric identifier in namespace 0.
    Binary,
    /// Numeric identifier.
    #[default]
    Numeric,
    /// String identifier.
    String,
    /// GUID identifier.
    Guid,
}

impl IdentifierKind {
    /// Builds the wire node id for a `(namespace, identifier)` pair.
    pub fn node_id(self, namespace_index: u16, identifier: &str) -> Result<NodeId, UaError> {
        let invalid = |reason: &str| {
            UaError::configuration(ConfigurationError::invalid_node_id(identifier, reason))
        };
        match self {
            Self::Binary => {
                let value: u8 = identifier
                    .parse()
                    .map_err(|_| invalid("Two-byte identifier must fit in 0..=255"))?;
                Ok(NodeId::numeric(0, u32::from(value)))
            }
            Self::Numeric => {
                let value: u32 = identifier
                    .parse()
                    .map_err(|_| invalid("Invalid numeric identifier"))?;
                Ok(NodeId::numeric(namespace_index, value))
            }
            Self::String => Ok(NodeId::string(namespace_index, identifier)),
            Self::Guid => {
                let value = Uuid::parse_str(identifier).map_err(|_| invalid("Invalid GUID"))?;
                Ok(NodeId::guid(namespace_index, value))
            }
        }
    }
}

// =============================================================================
// StatusCode
// =============================================================================

/// OPC UA status code.
///
/// The top two bits carry severity: `00` good, `01` uncertain, `10` bad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct StatusCode(pub u32);

impl StatusCode {
    /// Good.
    pub const GOOD: StatusCode = StatusCode(0x0000_0000);
    /// An unexpected error occurred.
    pub const BAD_UNEXPECTED_ERROR: StatusCode = StatusCode(0x8001_0000);
    /// An internal error occurred.
    pub const BAD_INTERNAL_ERROR: StatusCode = StatusCode(0x8002_0000);
    /// The operation timed out.
    pub const BAD_TIMEOUT: StatusCode = StatusCode(0x800A_0000);
    /// The server does not support the requested service.
    pub const BAD_SERVICE_UNSUPPORTED: StatusCode = StatusCode(0x800B_0000);
    /// The server is shutting down.
    pub const BAD_SHUTDOWN: StatusCode = StatusCode(0x800C_0000);
    /// The secure channel id is not valid.
    pub const BAD_SECURE_CHANNEL_ID_INVALID: StatusCode = StatusCode(0x8022_0000);
    /// The session id is not valid.
    pub const BAD_SESSION_ID_INVALID: StatusCode = StatusCode(0x8025_0000);
    /// The session was closed by the client.
    pub const BAD_SESSION_CLOSED: StatusCode = StatusCode(0x8026_0000);
    /// The subscription id is not valid.
    pub const BAD_SUBSCRIPTION_ID_INVALID: StatusCode = StatusCode(0x8028_0000);
    /// The node id refers to a node that does not exist.
    pub const BAD_NODE_ID_UNKNOWN: StatusCode = StatusCode(0x8034_0000);
    /// The attribute is not supported for the node.
    pub const BAD_ATTRIBUTE_ID_INVALID: StatusCode = StatusCode(0x8035_0000);
    /// The user does not have permission for the operation.
    pub const BAD_USER_ACCESS_DENIED: StatusCode = StatusCode(0x801F_0000);
    /// The identity token is not valid.
    pub const BAD_IDENTITY_TOKEN_INVALID: StatusCode = StatusCode(0x8020_0000);
    /// The value supplied does not match the node's data type.
    pub const BAD_TYPE_MISMATCH: StatusCode = StatusCode(0x8074_0000);
    /// The server has too many outstanding publish requests.
    pub const BAD_TOO_MANY_PUBLISH_REQUESTS: StatusCode = StatusCode(0x8078_0000);
    /// There is no subscription available for this session.
    pub const BAD_NO_SUBSCRIPTION: StatusCode = StatusCode(0x8079_0000);

    /// Returns `true` if the severity bits are good.
    #[inline]
    pub const fn is_good(&self) -> bool {
        self.0 & 0xC000_0000 == 0
    }

    /// Returns `true` if the severity bits are bad.
    #[inline]
    pub const fn is_bad(&self) -> bool {
        self.0 & 0x8000_0000 != 0
    }

    /// Returns the symbolic name for well-known codes.
    pub fn name(&self) -> &'static str {
        match *self {
            Self::GOOD => "Good",
            Self::BAD_UNEXPECTED_ERROR => "BadUnexpectedError",
            Self::BAD_INTERNAL_ERROR => "BadInternalError",
            Self::BAD_TIMEOUT => "BadTimeout",
            Self::BAD_SERVICE_UNSUPPORTED => "BadServiceUnsupported",
            Self::BAD_SHUTDOWN => "BadShutdown",
            Self::BAD_SECURE_CHANNEL_ID_INVALID => "BadSecureChannelIdInvalid",
            Self::BAD_SESSION_ID_INVALID => "BadSessionIdInvalid",
            Self::BAD_SESSION_CLOSED => "BadSessionClosed",
            Self::BAD_SUBSCRIPTION_ID_INVALID => "BadSubscriptionIdInvalid",
            Self::BAD_NODE_ID_UNKNOWN => "BadNodeIdUnknown",
            Self::BAD_ATTRIBUTE_ID_INVALID => "BadAttributeIdInvalid",
            Self::BAD_USER_ACCESS_DENIED => "BadUserAccessDenied",
            Self::BAD_IDENTITY_TOKEN_INVALID => "BadIdentityTokenInvalid",
            Self::BAD_TYPE_MISMATCH => "BadTypeMismatch",
            Self::BAD_TOO_MANY_PUBLISH_REQUESTS => "BadTooManyPublishRequests",
            Self::BAD_NO_SUBSCRIPTION => "BadNoSubscription",
            _ if self.is_good() => "Good",
            _ if self.is_bad() => "Bad",
            _ => "Uncertain",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:08X})", self.name(), self.0)
    }
}

// =============================================================================
// Security
// =============================================================================

/// Base of every security policy URI.
pub const SECURITY_POLICY_URI_PREFIX: &str = "http://opcfoundation.org/UA/SecurityPolicy#";

/// OPC UA security policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityPolicy {
    /// No security.
    #[default]
    None,
    /// Basic128Rsa15 (deprecated).
    Basic128Rsa15,
    /// Basic256 (deprecated).
    Basic256,
    /// Basic256Sha256.
    Basic256Sha256,
    /// Aes128_Sha256_RsaOaep.
    Aes128Sha256RsaOaep,
    /// Aes256_Sha256_RsaPss.
    Aes256Sha256RsaPss,
}

impl SecurityPolicy {
    /// Returns the policy name as it appears in the URI fragment.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Basic128Rsa15 => "Basic128Rsa15",
            Self::Basic256 => "Basic256",
            Self::Basic256Sha256 => "Basic256Sha256",
            Self::Aes128Sha256RsaOaep => "Aes128_Sha256_RsaOaep",
            Self::Aes256Sha256RsaPss => "Aes256_Sha256_RsaPss",
        }
    }

    /// Returns the full policy URI.
    pub fn uri(&self) -> String {
        format!("{}{}", SECURITY_POLICY_URI_PREFIX, self.name())
    }

    /// Parses a policy URI.
    pub fn from_uri(uri: &str) -> Option<Self> {
        let name = uri.strip_prefix(SECURITY_POLICY_URI_PREFIX)?;
        [
            Self::None,
            Self::Basic128Rsa15,
            Self::Basic256,
            Self::Basic256Sha256,
            Self::Aes128Sha256RsaOaep,
            Self::Aes256Sha256RsaPss,
        ]
        .into_iter()
        .find(|p| p.name() == name)
    }

    /// Returns `true` if frames on this policy go through the encryption envelope.
    #[inline]
    pub const fn is_encrypted(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Message security mode requested for this policy.
    pub const fn message_mode(&self) -> MessageSecurityMode {
        if self.is_encrypted() {
            MessageSecurityMode::SignAndEncrypt
        } else {
            MessageSecurityMode::None
        }
    }
}

impl fmt::Display for SecurityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for SecurityPolicy {
    type Err = UaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(policy) = Self::from_uri(s) {
            return Ok(policy);
        }
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "none" => Ok(Self::None),
            "basic128rsa15" => Ok(Self::Basic128Rsa15),
            "basic256" => Ok(Self::Basic256),
            "basic256sha256" => Ok(Self::Basic256Sha256),
            "aes128sha256rsaoaep" => Ok(Self::Aes128Sha256RsaOaep),
            "aes256sha256rsapss" => Ok(Self::Aes256Sha256RsaPss),
            _ => Err(UaError::configuration(
                ConfigurationError::invalid_security_policy(s),
            )),
        }
    }
}

/// Message security mode on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageSecurityMode {
    /// Invalid (0).
    Invalid,
    /// No security (1).
    #[default]
    None,
    /// Signed (2).
    Sign,
    /// Signed and encrypted (3).
    SignAndEncrypt,
}

impl MessageSecurityMode {
    /// Wire value.
    pub const fn value(&self) -> u32 {
        match self {
            Self::Invalid => 0,
            Self::None => 1,
            Self::Sign => 2,
            Self::SignAndEncrypt => 3,
        }
    }

    /// Parses a wire value.
    pub fn from_value(value: u32) -> Self {
        match value {
            1 => Self::None,
            2 => Self::Sign,
            3 => Self::SignAndEncrypt,
            _ => Self::Invalid,
        }
    }
}

/// OpenSecureChannel request type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityTokenRequestType {
    /// Issue a new token (0).
    Issue,
    /// Renew the current token (1).
    Renew,
}

impl SecurityTokenRequestType {
    /// Wire value.
    pub const fn value(&self) -> u32 {
        match self {
            Self::Issue => 0,
            Self::Renew => 1,
        }
    }

    /// Parses a wire value.
    pub fn from_value(value: u32) -> Self {
        if value == 1 {
            Self::Renew
        } else {
            Self::Issue
        }
    }
}

/// User identity token kind advertised in a `UserTokenPolicy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserTokenKind {
    /// Anonymous (0).
    Anonymous,
    /// Username and password (1).
    UserName,
    /// X.509 certificate (2).
    Certificate,
    /// Externally issued token (3).
    IssuedToken,
}

impl UserTokenKind {
    /// Wire value.
    pub const fn value(&self) -> u32 {
        match self {
            Self::Anonymous => 0,
            Self::UserName => 1,
            Self::Certificate => 2,
            Self::IssuedToken => 3,
        }
    }

    /// Parses a wire value.
    pub fn from_value(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Anonymous),
            1 => Some(Self::UserName),
            2 => Some(Self::Certificate),
            3 => Some(Self::IssuedToken),
            _ => None,
        }
    }
}

// =============================================================================
// Service Parameters
// =============================================================================

/// Which timestamps the server should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampsToReturn {
    /// Source timestamp only.
    Source,
    /// Server timestamp only.
    Server,
    /// Both timestamps.
    Both,
    /// No timestamps.
    Neither,
}

impl TimestampsToReturn {
    /// Wire value.
    pub const fn value(&self) -> u32 {
        match self {
            Self::Source => 0,
            Self::Server => 1,
            Self::Both => 2,
            Self::Neither => 3,
        }
    }

    /// Parses a wire value.
    pub fn from_value(value: u32) -> Self {
        match value {
            0 => Self::Source,
            1 => Self::Server,
            2 => Self::Both,
            _ => Self::Neither,
        }
    }
}

/// Monitored item monitoring mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MonitoringMode {
    /// Disabled (0).
    Disabled,
    /// Sampling without reporting (1).
    #[default]
    Sampling,
    /// Sampling and reporting (2).
    Reporting,
}

impl MonitoringMode {
    /// Wire value.
    pub const fn value(&self) -> u32 {
        match self {
            Self::Disabled => 0,
            Self::Sampling => 1,
            Self::Reporting => 2,
        }
    }

    /// Parses a wire value.
    pub fn from_value(value: u32) -> Self {
        match value {
            1 => Self::Sampling,
            2 => Self::Reporting,
            _ => Self::Disabled,
        }
    }
}

/// Node attribute identifiers used by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeId {
    /// NodeId (1).
    NodeId,
    /// BrowseName (3).
    BrowseName,
    /// DisplayName (4).
    DisplayName,
    /// Value (13).
    Value,
    /// DataType (14).
    DataType,
}

impl AttributeId {
    /// Wire value.
    pub const fn value(&self) -> u32 {
        match self {
            Self::NodeId => 1,
            Self::BrowseName => 3,
            Self::DisplayName => 4,
            Self::Value => 13,
            Self::DataType => 14,
        }
    }
}

// =============================================================================
// PlcDataType
// =============================================================================

/// Declared IEC 61131-3 data type of a tag.
///
/// `Null` is the unresolved placeholder: the write path infers a concrete
/// type from the value. `Unknown` keeps a declared name the engine cannot
/// encode so the write can be rejected before anything is sent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlcDataType {
    /// Unresolved placeholder.
    #[default]
    Null,
    /// BOOL / BIT.
    Bool,
    /// BYTE / USINT / UINT8 / BIT8 / BITARR8.
    Byte,
    /// SINT / INT8.
    Sint,
    /// INT / INT16.
    Int,
    /// UINT / UINT16 / WORD / BITARR16.
    Uint,
    /// DINT / INT32.
    Dint,
    /// UDINT / UINT32 / DWORD / BITARR32.
    Udint,
    /// LINT / INT64.
    Lint,
    /// ULINT / UINT64 / LWORD.
    Ulint,
    /// REAL / FLOAT.
    Real,
    /// LREAL / DOUBLE.
    Lreal,
    /// CHAR / WCHAR / STRING / WSTRING.
    String,
    /// DATE_AND_TIME.
    DateAndTime,
    /// A declared type name this engine does not know.
    Unknown(String),
}

impl PlcDataType {
    /// Returns `true` for the unresolved placeholder.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Canonical name.
    pub fn name(&self) -> &str {
        match self {
            Self::Null => "NULL",
            Self::Bool => "BOOL",
            Self::Byte => "BYTE",
            Self::Sint => "SINT",
            Self::Int => "INT",
            Self::Uint => "UINT",
            Self::Dint => "DINT",
            Self::Udint => "UDINT",
            Self::Lint => "LINT",
            Self::Ulint => "ULINT",
            Self::Real => "REAL",
            Self::Lreal => "LREAL",
            Self::String => "STRING",
            Self::DateAndTime => "DATE_AND_TIME",
            Self::Unknown(name) => name,
        }
    }
}

impl fmt::Display for PlcDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for PlcDataType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_uppercase().as_str() {
            "" | "NULL" | "IEC61131_NULL" => Self::Null,
            "BOOL" | "BIT" => Self::Bool,
            "BYTE" | "USINT" | "UINT8" | "BIT8" | "BITARR8" => Self::Byte,
            "SINT" | "INT8" => Self::Sint,
            "INT" | "INT16" => Self::Int,
            "UINT" | "UINT16" | "WORD" | "BITARR16" => Self::Uint,
            "DINT" | "INT32" => Self::Dint,
            "UDINT" | "UINT32" | "DWORD" | "BITARR32" => Self::Udint,
            "LINT" | "INT64" => Self::Lint,
            "ULINT" | "UINT64" | "LWORD" => Self::Ulint,
            "REAL" | "FLOAT" => Self::Real,
            "LREAL" | "DOUBLE" => Self::Lreal,
            "CHAR" | "WCHAR" | "STRING" | "WSTRING" => Self::String,
            "DATE_AND_TIME" => Self::DateAndTime,
            other => Self::Unknown(other.to_string()),
        })
    }
}

/// How a subscribed tag reports changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionType {
    /// Fixed-rate sampling.
    #[default]
    Cyclic,
    /// Report on value change.
    ChangeOfState,
    /// Report on events.
    Event,
}

impl SubscriptionType {
    /// Monitoring mode used for monitored items of this type.
    pub const fn monitoring_mode(&self) -> MonitoringMode {
        match self {
            Self::Cyclic => MonitoringMode::Sampling,
            Self::ChangeOfState | Self::Event => MonitoringMode::Reporting,
        }
    }
}

// =============================================================================
// UaTag
// =============================================================================

/// One addressable field as handed to read, write and subscribe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UaTag {
    /// Server node.
    pub node_id: NodeId,

    /// Declared data type.
    #[serde(default)]
    pub data_type: PlcDataType,

    /// Declared element count (1 = scalar).
    #[serde(default = "default_array_len")]
    pub array_len: u32,

    /// Subscription behaviour.
    #[serde(default)]
    pub subscription_type: SubscriptionType,

    /// Requested sampling interval for subscriptions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<Duration>,
}

fn default_array_len() -> u32 {
    1
}

impl UaTag {
    /// Creates a scalar tag with an unresolved type.
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            data_type: PlcDataType::Null,
            array_len: 1,
            subscription_type: SubscriptionType::Cyclic,
            interval: None,
        }
    }

    /// Creates a tag from the address grammar's output.
    pub fn from_address(
        kind: IdentifierKind,
        namespace_index: u16,
        identifier: &str,
    ) -> Result<Self, UaError> {
        Ok(Self::new(kind.node_id(namespace_index, identifier)?))
    }

    /// Sets the declared data type.
    pub fn with_data_type(mut self, data_type: PlcDataType) -> Self {
        self.data_type = data_type;
        self
    }

    /// Sets the declared element count.
    pub fn with_array_len(mut self, array_len: u32) -> Self {
        self.array_len = array_len;
        self
    }

    /// Sets the subscription type.
    pub fn with_subscription_type(mut self, subscription_type: SubscriptionType) -> Self {
        self.subscription_type = subscription_type;
        self
    }

    /// Sets the requested sampling interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }
}

/// A named tag. Read, write and subscription results are keyed by `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UaField {
    /// Application-side field name.
    pub name: String,
    /// Server-side address and type.
    pub tag: UaTag,
}

impl UaField {
    /// Creates a named field.
    pub fn new(name: impl Into<String>, tag: UaTag) -> Self {
        Self {
            name: name.into(),
            tag,
        }
    }
}

// =============================================================================
// PlcValue / ResponseCode
// =============================================================================

/// Application-side value produced by decoding a Variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PlcValue {
    /// No value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed 8-bit.
    Sint(i8),
    /// Unsigned 8-bit.
    Usint(u8),
    /// Signed 16-bit.
    Int(i16),
    /// Unsigned 16-bit.
    Uint(u16),
    /// Signed 32-bit.
    Dint(i32),
    /// Unsigned 32-bit.
    Udint(u32),
    /// Signed 64-bit.
    Lint(i64),
    /// Unsigned 64-bit.
    Ulint(u64),
    /// 32-bit float.
    Real(f32),
    /// 64-bit float.
    Lreal(f64),
    /// Text.
    String(String),
    /// Timestamp.
    DateTime(DateTime<Utc>),
    /// Raw bytes.
    Raw(Vec<u8>),
    /// Array of values.
    List(Vec<PlcValue>),
}

impl PlcValue {
    /// Returns the number of elements (1 for scalars, 0 for null).
    pub fn len(&self) -> usize {
        match self {
            Self::Null => 0,
            Self::List(items) => items.len(),
            _ => 1,
        }
    }

    /// Returns `true` for `Null` and empty lists.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the elements as a slice view (scalars yield themselves).
    pub fn elements(&self) -> Vec<&PlcValue> {
        match self {
            Self::Null => Vec::new(),
            Self::List(items) => items.iter().collect(),
            other => vec![other],
        }
    }

    /// Returns the value as `i64` if it is an integer type.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::Sint(v) => Some(i64::from(v)),
            Self::Usint(v) => Some(i64::from(v)),
            Self::Int(v) => Some(i64::from(v)),
            Self::Uint(v) => Some(i64::from(v)),
            Self::Dint(v) => Some(i64::from(v)),
            Self::Udint(v) => Some(i64::from(v)),
            Self::Lint(v) => Some(v),
            Self::Ulint(v) => i64::try_from(v).ok(),
            Self::Bool(v) => Some(i64::from(v)),
            _ => None,
        }
    }

    /// Returns the value as `f64` if it is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::Real(v) => Some(f64::from(v)),
            Self::Lreal(v) => Some(v),
            Self::Ulint(v) => Some(v as f64),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    /// Returns the value as `bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            other => other.as_i64().map(|v| v != 0),
        }
    }

    /// Returns the string contents.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Type name used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "Null",
            Self::Bool(_) => "Bool",
            Self::Sint(_) => "Sint",
            Self::Usint(_) => "Usint",
            Self::Int(_) => "Int",
            Self::Uint(_) => "Uint",
            Self::Dint(_) => "Dint",
            Self::Udint(_) => "Udint",
            Self::Lint(_) => "Lint",
            Self::Ulint(_) => "Ulint",
            Self::Real(_) => "Real",
            Self::Lreal(_) => "Lreal",
            Self::String(_) => "String",
            Self::DateTime(_) => "DateTime",
            Self::Raw(_) => "Raw",
            Self::List(_) => "List",
        }
    }
}

/// Per-field outcome of a read, write or notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseCode {
    /// Success.
    Ok,
    /// The node does not exist.
    NotFound,
    /// The server refused access.
    AccessDenied,
    /// The server reported another failure.
    RemoteError,
    /// The value could not be represented.
    Unsupported,
    /// The address could not be resolved.
    InvalidAddress,
}

impl ResponseCode {
    /// Returns `true` for `Ok`.
    #[inline]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ok => "OK",
            Self::NotFound => "NOT_FOUND",
            Self::AccessDenied => "ACCESS_DENIED",
            Self::RemoteError => "REMOTE_ERROR",
            Self::Unsupported => "UNSUPPORTED",
            Self::InvalidAddress => "INVALID_ADDRESS",
        };
        write!(f, "{}", s)
    }
}

/// A response code with an optional decoded value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldResult {
    /// Outcome.
    pub code: ResponseCode,
    /// Decoded value, present when `code` is `Ok` on reads and notifications.
    pub value: Option<PlcValue>,
}

impl FieldResult {
    /// A successful result carrying a value.
    pub fn ok(value: PlcValue) -> Self {
        Self {
            code: ResponseCode::Ok,
            value: Some(value),
        }
    }

    /// A result carrying only a code.
    pub fn code(code: ResponseCode) -> Self {
        Self { code, value: None }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_parse_forms() {
        let n: NodeId = "ns=2;i=1001".parse().unwrap();
        assert_eq!(n, NodeId::numeric(2, 1001));

        let s: NodeId = "ns=3;s=Line.Speed".parse().unwrap();
        assert_eq!(s, NodeId::string(3, "Line.Speed"));

        let short: NodeId = "i=85".parse().unwrap();
        assert_eq!(short, NodeId::numeric(0, 85));

        let g: NodeId = "ns=1;g=550e8400-e29b-41d4-a716-446655440000".parse().unwrap();
        assert!(matches!(g.identifier, NodeIdentifier::Guid(_)));

        assert!("ns=x;i=1".parse::<NodeId>().is_err());
        assert!("ns=2;q=1".parse::<NodeId>().is_err());
    }

    #[test]
    fn test_node_id_display_roundtrip() {
        let node = NodeId::string(2, "Tank.Level");
        assert_eq!(node.to_string(), "ns=2;s=Tank.Level");
        assert_eq!(node.to_string().parse::<NodeId>().unwrap(), node);
        assert_eq!(NodeId::numeric(0, 84).to_string(), "i=84");
    }

    #[test]
    fn test_identifier_kind_builds_node_ids() {
        assert_eq!(
            IdentifierKind::Binary.node_id(5, "17").unwrap(),
            NodeId::numeric(0, 17)
        );
        assert!(IdentifierKind::Binary.node_id(0, "300").is_err());
        assert_eq!(
            IdentifierKind::Numeric.node_id(2, "1001").unwrap(),
            NodeId::numeric(2, 1001)
        );
        assert_eq!(
            IdentifierKind::String.node_id(2, "Motor").unwrap(),
            NodeId::string(2, "Motor")
        );
        assert!(IdentifierKind::Guid.node_id(2, "not-a-guid").is_err());
    }

    #[test]
    fn test_status_code_severity() {
        assert!(StatusCode::GOOD.is_good());
        assert!(StatusCode::BAD_NODE_ID_UNKNOWN.is_bad());
        assert_eq!(StatusCode::BAD_NODE_ID_UNKNOWN.0, 0x8034_0000);
        assert_eq!(StatusCode::BAD_NODE_ID_UNKNOWN.name(), "BadNodeIdUnknown");
        assert!(!StatusCode(0x4000_0000).is_good());
        assert!(!StatusCode(0x4000_0000).is_bad());
    }

    #[test]
    fn test_security_policy_uri() {
        assert_eq!(
            SecurityPolicy::None.uri(),
            "http://opcfoundation.org/UA/SecurityPolicy#None"
        );
        assert_eq!(
            SecurityPolicy::from_uri("http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256"),
            Some(SecurityPolicy::Basic256Sha256)
        );
        assert!(!SecurityPolicy::None.is_encrypted());
        assert_eq!(
            SecurityPolicy::Basic256Sha256.message_mode(),
            MessageSecurityMode::SignAndEncrypt
        );
        assert_eq!("basic256sha256".parse::<SecurityPolicy>().unwrap(), SecurityPolicy::Basic256Sha256);
    }

    #[test]
    fn test_plc_data_type_aliases() {
        assert_eq!("BITARR16".parse::<PlcDataType>().unwrap(), PlcDataType::Uint);
        assert_eq!("uint8".parse::<PlcDataType>().unwrap(), PlcDataType::Byte);
        assert_eq!("WSTRING".parse::<PlcDataType>().unwrap(), PlcDataType::String);
        assert_eq!(
            "STRUCT".parse::<PlcDataType>().unwrap(),
            PlcDataType::Unknown("STRUCT".into())
        );
    }

    #[test]
    fn test_subscription_type_monitoring_mode() {
        assert_eq!(SubscriptionType::Cyclic.monitoring_mode(), MonitoringMode::Sampling);
        assert_eq!(
            SubscriptionType::ChangeOfState.monitoring_mode(),
            MonitoringMode::Reporting
        );
        assert_eq!(SubscriptionType::Event.monitoring_mode(), MonitoringMode::Reporting);
    }

    #[test]
    fn test_plc_value_accessors() {
        assert_eq!(PlcValue::Dint(42).as_i64(), Some(42));
        assert_eq!(PlcValue::Real(1.5).as_f64(), Some(1.5));
        assert_eq!(PlcValue::Null.len(), 0);
        assert_eq!(PlcValue::List(vec![PlcValue::Bool(true); 3]).len(), 3);
        assert_eq!(ResponseCode::NotFound.to_string(), "NOT_FOUND");
    }
}
