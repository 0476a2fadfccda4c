// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Error types for the OPC UA client engine.
//!
//! # Error Categories
//!
//! ```text
//! UaError
//! ├── Connection    - Transport, handshake and sequencing failures
//! ├── Session       - CreateSession / ActivateSession failures
//! ├── Security      - Envelope and credential encryption failures
//! ├── Operation     - Read/write batch failures
//! ├── Subscription  - Subscription management and publish failures
//! ├── Encoding      - Binary encode/decode failures
//! ├── Conversion    - Variant <-> application value failures
//! ├── Configuration - Invalid settings
//! ├── Timeout       - Correlated request deadlines
//! └── ServiceFault  - Server-reported service failure
//! ```
//!
//! # Examples
//!
//! ```
//! use trap_ua::error::{ConnectionError, UaError};
//!
//! let error = UaError::connection(ConnectionError::sequence_mismatch(3, 5));
//! assert!(error.is_connection_fatal());
//! assert!(!error.is_retryable());
//! ```

use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;
use tracing::Level;

use crate::types::StatusCode;

/// Result alias used throughout the crate.
pub type UaResult<T> = Result<T, UaError>;

// =============================================================================
// UaError - Main Error Type
// =============================================================================

/// The main error type for the OPC UA client engine.
#[derive(Debug, Error)]
pub enum UaError {
    /// Connection-related errors.
    #[error("{0}")]
    Connection(#[from] ConnectionError),

    /// Session lifecycle errors.
    #[error("{0}")]
    Session(#[from] SessionError),

    /// Security errors.
    #[error("{0}")]
    Security(#[from] SecurityError),

    /// Read/write operation errors.
    #[error("{0}")]
    Operation(#[from] OperationError),

    /// Subscription errors.
    #[error("{0}")]
    Subscription(#[from] SubscriptionError),

    /// Binary encoding errors.
    #[error("{0}")]
    Encoding(#[from] EncodingError),

    /// Value conversion errors.
    #[error("{0}")]
    Conversion(#[from] ConversionError),

    /// Configuration errors.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// Timeout errors.
    #[error("{0}")]
    Timeout(#[from] TimeoutError),

    /// Service fault returned by the server.
    #[error("{0}")]
    ServiceFault(#[from] ServiceFaultError),
}

impl UaError {
    // =========================================================================
    // Factory Methods
    // =========================================================================

    /// Creates a connection error.
    #[inline]
    pub fn connection(error: ConnectionError) -> Self {
        Self::Connection(error)
    }

    /// Creates a session error.
    #[inline]
    pub fn session(error: SessionError) -> Self {
        Self::Session(error)
    }

    /// Creates a security error.
    #[inline]
    pub fn security(error: SecurityError) -> Self {
        Self::Security(error)
    }

    /// Creates an operation error.
    #[inline]
    pub fn operation(error: OperationError) -> Self {
        Self::Operation(error)
    }

    /// Creates a subscription error.
    #[inline]
    pub fn subscription(error: SubscriptionError) -> Self {
        Self::Subscription(error)
    }

    /// Creates an encoding error.
    #[inline]
    pub fn encoding(error: EncodingError) -> Self {
        Self::Encoding(error)
    }

    /// Creates a conversion error.
    #[inline]
    pub fn conversion(error: ConversionError) -> Self {
        Self::Conversion(error)
    }

    /// Creates a configuration error.
    #[inline]
    pub fn configuration(error: ConfigurationError) -> Self {
        Self::Configuration(error)
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(error: TimeoutError) -> Self {
        Self::Timeout(error)
    }

    /// Creates a service fault error.
    pub fn service_fault(operation: impl Into<String>, status: StatusCode) -> Self {
        Self::ServiceFault(ServiceFaultError {
            operation: operation.into(),
            status,
        })
    }

    /// Creates a not connected error.
    pub fn not_connected() -> Self {
        Self::Connection(ConnectionError::NotConnected)
    }

    // =========================================================================
    // Error Properties
    // =========================================================================

    /// Returns `true` if a retry of the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(e) => e.is_retryable(),
            Self::Session(_) => false,
            Self::Security(_) => false,
            Self::Operation(_) => false,
            Self::Subscription(e) => e.is_retryable(),
            Self::Timeout(e) => !e.phase.is_handshake(),
            Self::ServiceFault(e) => e.status == StatusCode::BAD_TIMEOUT,
            Self::Encoding(_) | Self::Conversion(_) | Self::Configuration(_) => false,
        }
    }

    /// Returns `true` if this error invalidates the whole connection.
    ///
    /// Handshake-phase failures and anything observed on the publish path
    /// are fatal; data-path failures only fail their own operation.
    pub fn is_connection_fatal(&self) -> bool {
        match self {
            Self::Connection(e) => !matches!(e, ConnectionError::NotConnected),
            Self::Session(_) => true,
            Self::Timeout(e) => e.phase.is_handshake() || e.phase == RequestPhase::Publish,
            Self::Subscription(SubscriptionError::PublishFailed { .. }) => true,
            _ => false,
        }
    }

    /// Returns the severity level of this error.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Connection(e) => e.severity(),
            Self::Session(_) => ErrorSeverity::Error,
            Self::Security(_) => ErrorSeverity::Critical,
            Self::Operation(_) => ErrorSeverity::Error,
            Self::Subscription(_) => ErrorSeverity::Error,
            Self::Encoding(_) => ErrorSeverity::Error,
            Self::Conversion(_) => ErrorSeverity::Warning,
            Self::Configuration(_) => ErrorSeverity::Critical,
            Self::Timeout(_) => ErrorSeverity::Warning,
            Self::ServiceFault(_) => ErrorSeverity::Error,
        }
    }

    /// Returns the error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Session(_) => "session",
            Self::Security(_) => "security",
            Self::Operation(_) => "operation",
            Self::Subscription(_) => "subscription",
            Self::Encoding(_) => "encoding",
            Self::Conversion(_) => "conversion",
            Self::Configuration(_) => "configuration",
            Self::Timeout(_) => "timeout",
            Self::ServiceFault(_) => "service_fault",
        }
    }

    /// Returns a unique error code for this error.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Connection(e) => e.error_code(),
            Self::Session(e) => e.error_code(),
            Self::Security(e) => e.error_code(),
            Self::Operation(e) => e.error_code(),
            Self::Subscription(e) => e.error_code(),
            Self::Encoding(e) => e.error_code(),
            Self::Conversion(e) => e.error_code(),
            Self::Configuration(e) => e.error_code(),
            Self::Timeout(_) => ErrorCode::new(9, 1),
            Self::ServiceFault(_) => ErrorCode::new(10, 1),
        }
    }

    /// Returns the server status code carried by this error, if any.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            Self::ServiceFault(e) => Some(e.status),
            Self::Connection(ConnectionError::ServerError { status, .. }) => Some(*status),
            _ => None,
        }
    }

    /// Returns the tracing level for this error.
    pub fn tracing_level(&self) -> Level {
        self.severity().to_tracing_level()
    }

    /// Logs this error with appropriate level and context.
    pub fn log(&self, context: &str) {
        let code = self.error_code();
        match self.tracing_level() {
            Level::ERROR => tracing::error!(
                error_code = %code,
                category = self.category(),
                context = context,
                "{self}"
            ),
            Level::WARN => tracing::warn!(
                error_code = %code,
                category = self.category(),
                context = context,
                "{self}"
            ),
            _ => tracing::debug!(
                error_code = %code,
                category = self.category(),
                context = context,
                "{self}"
            ),
        }
    }
}

// =============================================================================
// ConnectionError
// =============================================================================

/// Transport, handshake and sequencing errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Connection refused.
    #[error("Connection refused to '{endpoint}'")]
    Refused {
        /// Target endpoint.
        endpoint: String,
        /// Underlying error.
        #[source]
        source: Option<io::Error>,
    },

    /// Connection timed out.
    #[error("Connection timed out to '{endpoint}' after {duration:?}")]
    TimedOut {
        /// Target endpoint.
        endpoint: String,
        /// Timeout duration.
        duration: Duration,
    },

    /// Connection closed.
    #[error("Connection closed: {}", .reason.as_deref().unwrap_or("no reason given"))]
    Closed {
        /// Reason for closure.
        reason: Option<String>,
    },

    /// Not connected.
    #[error("Not connected to OPC UA server")]
    NotConnected,

    /// A handshake step failed.
    #[error("Handshake failed during {stage}: {message}")]
    HandshakeFailed {
        /// Step that failed.
        stage: String,
        /// Error message.
        message: String,
    },

    /// The next transaction id did not follow the server's sequence number.
    #[error("Sequence number isn't as expected, we might have missed a packet: {actual} != {expected}")]
    SequenceMismatch {
        /// Transaction id about to be sent.
        expected: u32,
        /// Sequence number of the last response received.
        actual: u32,
    },

    /// The server sent an ERR frame.
    #[error("Server error {status}: {reason}")]
    ServerError {
        /// Status code from the frame.
        status: StatusCode,
        /// Reason text from the frame.
        reason: String,
    },

    /// No endpoint matched the configured URL and policy.
    #[error("No endpoint matching '{endpoint}' with policy '{policy}'")]
    NoSuitableEndpoint {
        /// Configured endpoint.
        endpoint: String,
        /// Configured policy URI.
        policy: String,
    },

    /// An operation was attempted in the wrong connection phase.
    #[error("Invalid connection state: expected {expected}, found {actual}")]
    InvalidState {
        /// Expected phase.
        expected: String,
        /// Actual phase.
        actual: String,
    },

    /// I/O error.
    #[error("I/O error: {message}")]
    Io {
        /// Error message.
        message: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

impl ConnectionError {
    /// Creates a connection refused error with source.
    pub fn refused_with(endpoint: impl Into<String>, source: io::Error) -> Self {
        Self::Refused {
            endpoint: endpoint.into(),
            source: Some(source),
        }
    }

    /// Creates a connection timed out error.
    pub fn timed_out(endpoint: impl Into<String>, duration: Duration) -> Self {
        Self::TimedOut {
            endpoint: endpoint.into(),
            duration,
        }
    }

    /// Creates a connection closed error.
    pub fn closed(reason: impl Into<String>) -> Self {
        Self::Closed {
            reason: Some(reason.into()),
        }
    }

    /// Creates a handshake failure.
    pub fn handshake(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HandshakeFailed {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Creates a sequence mismatch error.
    pub fn sequence_mismatch(expected: u32, actual: u32) -> Self {
        Self::SequenceMismatch { expected, actual }
    }

    /// Creates an invalid state error.
    pub fn invalid_state(expected: impl fmt::Display, actual: impl fmt::Display) -> Self {
        Self::InvalidState {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Creates an I/O error.
    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Returns `true` if reconnecting may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Refused { .. } | Self::TimedOut { .. } | Self::Closed { .. } => true,
            Self::NotConnected => true,
            Self::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
            ),
            Self::HandshakeFailed { .. }
            | Self::SequenceMismatch { .. }
            | Self::ServerError { .. }
            | Self::NoSuitableEndpoint { .. }
            | Self::InvalidState { .. } => false,
        }
    }

    /// Returns the severity level.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::NotConnected | Self::TimedOut { .. } | Self::Closed { .. } => {
                ErrorSeverity::Warning
            }
            _ => ErrorSeverity::Error,
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Refused { .. } => ErrorCode::new(1, 1),
            Self::TimedOut { .. } => ErrorCode::new(1, 2),
            Self::Closed { .. } => ErrorCode::new(1, 3),
            Self::NotConnected => ErrorCode::new(1, 4),
            Self::HandshakeFailed { .. } => ErrorCode::new(1, 5),
            Self::SequenceMismatch { .. } => ErrorCode::new(1, 6),
            Self::ServerError { .. } => ErrorCode::new(1, 7),
            Self::NoSuitableEndpoint { .. } => ErrorCode::new(1, 8),
            Self::InvalidState { .. } => ErrorCode::new(1, 9),
            Self::Io { .. } => ErrorCode::new(1, 10),
        }
    }
}

impl From<io::Error> for ConnectionError {
    fn from(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe => Self::Closed {
                reason: Some(error.to_string()),
            },
            _ => Self::Io {
                message: error.to_string(),
                source: error,
            },
        }
    }
}

impl From<io::Error> for UaError {
    fn from(error: io::Error) -> Self {
        Self::Connection(error.into())
    }
}

// =============================================================================
// SessionError
// =============================================================================

/// Session lifecycle errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// CreateSession failed.
    #[error("Failed to create session: {message}")]
    CreationFailed {
        /// Error message.
        message: String,
    },

    /// ActivateSession failed.
    #[error("Failed to activate session: {message}")]
    ActivationFailed {
        /// Error message.
        message: String,
    },
}

impl SessionError {
    /// Creates a creation failure.
    pub fn creation_failed(message: impl Into<String>) -> Self {
        Self::CreationFailed {
            message: message.into(),
        }
    }

    /// Creates an activation failure.
    pub fn activation_failed(message: impl Into<String>) -> Self {
        Self::ActivationFailed {
            message: message.into(),
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::CreationFailed { .. } => ErrorCode::new(2, 1),
            Self::ActivationFailed { .. } => ErrorCode::new(2, 2),
        }
    }
}

// =============================================================================
// SecurityError
// =============================================================================

/// Security envelope and credential errors.
#[derive(Debug, Error)]
pub enum SecurityError {
    /// The provider cannot encrypt passwords.
    #[error("Password encryption is not available under security policy '{policy}'")]
    PasswordEncryptionUnavailable {
        /// Active policy.
        policy: String,
    },

    /// The server did not supply a certificate.
    #[error("Server certificate missing")]
    MissingServerCertificate,
}

impl SecurityError {
    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::PasswordEncryptionUnavailable { .. } => ErrorCode::new(3, 1),
            Self::MissingServerCertificate => ErrorCode::new(3, 2),
        }
    }
}

// =============================================================================
// OperationError
// =============================================================================

/// Read/write batch errors.
#[derive(Debug, Error)]
pub enum OperationError {
    /// Nothing to do.
    #[error("Empty {operation} request")]
    EmptyRequest {
        /// Operation name.
        operation: &'static str,
    },

    /// The response carried a different number of results than requested.
    #[error("{operation} returned {actual} results for {expected} items")]
    ResultCountMismatch {
        /// Operation name.
        operation: &'static str,
        /// Requested item count.
        expected: usize,
        /// Received result count.
        actual: usize,
    },

    /// The correlated response was not the expected service.
    #[error("Unexpected response: expected {expected}, received {actual}")]
    UnexpectedResponse {
        /// Expected service.
        expected: String,
        /// Received service.
        actual: String,
    },
}

impl OperationError {
    /// Creates an unexpected response error.
    pub fn unexpected_response(expected: impl fmt::Display, actual: impl fmt::Display) -> Self {
        Self::UnexpectedResponse {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::EmptyRequest { .. } => ErrorCode::new(5, 1),
            Self::ResultCountMismatch { .. } => ErrorCode::new(5, 2),
            Self::UnexpectedResponse { .. } => ErrorCode::new(5, 3),
        }
    }
}

// =============================================================================
// SubscriptionError
// =============================================================================

/// Subscription management and publish errors.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    /// CreateSubscription failed.
    #[error("Failed to create subscription: {message}")]
    CreationFailed {
        /// Error message.
        message: String,
    },

    /// CreateMonitoredItems failed.
    #[error("Failed to create monitored items on subscription {subscription_id}: {message}")]
    MonitoredItemsFailed {
        /// Subscription id.
        subscription_id: u32,
        /// Error message.
        message: String,
    },

    /// A publish round trip failed.
    #[error("Publish failed on subscription {subscription_id}: {message}")]
    PublishFailed {
        /// Subscription id.
        subscription_id: u32,
        /// Error message.
        message: String,
    },

    /// No fields were given.
    #[error("Subscription requires at least one field")]
    NoFields,

    /// Unknown consumer registration.
    #[error("Consumer registration {0} not found")]
    ConsumerNotFound(u64),
}

impl SubscriptionError {
    /// Creates a creation failure.
    pub fn creation_failed(message: impl Into<String>) -> Self {
        Self::CreationFailed {
            message: message.into(),
        }
    }

    /// Creates a publish failure.
    pub fn publish_failed(subscription_id: u32, message: impl Into<String>) -> Self {
        Self::PublishFailed {
            subscription_id,
            message: message.into(),
        }
    }

    /// Returns `true` if retrying may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CreationFailed { .. } | Self::MonitoredItemsFailed { .. })
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::CreationFailed { .. } => ErrorCode::new(6, 1),
            Self::MonitoredItemsFailed { .. } => ErrorCode::new(6, 2),
            Self::PublishFailed { .. } => ErrorCode::new(6, 3),
            Self::NoFields => ErrorCode::new(6, 4),
            Self::ConsumerNotFound(_) => ErrorCode::new(6, 5),
        }
    }
}

// =============================================================================
// EncodingError
// =============================================================================

/// Binary encode/decode errors.
#[derive(Debug, Error)]
pub enum EncodingError {
    /// The buffer ended before the structure did.
    #[error("Unexpected end of data while decoding {structure}")]
    UnexpectedEof {
        /// Structure being decoded.
        structure: &'static str,
    },

    /// A field held a value the codec cannot accept.
    #[error("Invalid {structure}: {message}")]
    Invalid {
        /// Structure being encoded or decoded.
        structure: &'static str,
        /// Error message.
        message: String,
    },

    /// The body type id is not one this engine handles.
    #[error("Unknown service type id {type_id}")]
    UnknownTypeId {
        /// Binary encoding node id.
        type_id: u32,
    },

    /// Self-containing values nest deeper than the decoder allows.
    #[error("{structure} nested deeper than {max} levels")]
    NestingTooDeep {
        /// Structure being decoded.
        structure: &'static str,
        /// Depth limit.
        max: usize,
    },

    /// A frame exceeds the negotiated size.
    #[error("Frame of {size} bytes exceeds limit of {max}")]
    FrameTooLarge {
        /// Frame size.
        size: usize,
        /// Limit.
        max: usize,
    },
}

impl EncodingError {
    /// Creates an invalid-value error.
    pub fn invalid(structure: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            structure,
            message: message.into(),
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::UnexpectedEof { .. } => ErrorCode::new(7, 1),
            Self::Invalid { .. } => ErrorCode::new(7, 2),
            Self::UnknownTypeId { .. } => ErrorCode::new(7, 3),
            Self::FrameTooLarge { .. } => ErrorCode::new(7, 4),
            Self::NestingTooDeep { .. } => ErrorCode::new(7, 5),
        }
    }
}

// =============================================================================
// ConversionError
// =============================================================================

/// Variant <-> application value conversion errors.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// A Variant tag this engine does not decode.
    #[error("Unsupported variant type id {type_id}")]
    UnsupportedVariant {
        /// Variant type id.
        type_id: u8,
    },

    /// A declared write type this engine cannot encode.
    #[error("Unsupported write field type {data_type}")]
    UnsupportedWriteType {
        /// Declared type name.
        data_type: String,
    },

    /// The value does not fit the declared type.
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Expected type.
        expected: String,
        /// Actual type.
        actual: String,
    },

    /// No value was available to infer a write type from.
    #[error("Cannot infer a wire type for field '{field}'")]
    CannotInferType {
        /// Field name.
        field: String,
    },
}

impl ConversionError {
    /// Creates a type mismatch error.
    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::UnsupportedVariant { .. } => ErrorCode::new(8, 1),
            Self::UnsupportedWriteType { .. } => ErrorCode::new(8, 2),
            Self::TypeMismatch { .. } => ErrorCode::new(8, 3),
            Self::CannotInferType { .. } => ErrorCode::new(8, 4),
        }
    }
}

// =============================================================================
// ConfigurationError
// =============================================================================

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// Required field missing.
    #[error("Missing required field: {field}")]
    MissingField {
        /// Field name.
        field: String,
    },

    /// Invalid endpoint URL.
    #[error("Invalid endpoint '{url}': {reason}")]
    InvalidEndpoint {
        /// The URL.
        url: String,
        /// Reason.
        reason: String,
    },

    /// Invalid field value.
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue {
        /// Field name.
        field: String,
        /// Reason.
        reason: String,
    },

    /// Invalid node id text.
    #[error("Invalid node id '{input}': {reason}")]
    InvalidNodeId {
        /// The input.
        input: String,
        /// Reason.
        reason: String,
    },

    /// Unknown security policy.
    #[error("Unknown security policy '{value}'")]
    InvalidSecurityPolicy {
        /// The input.
        value: String,
    },

    /// The configuration document could not be deserialized.
    #[error("Failed to parse configuration: {message}")]
    Parse {
        /// Error message.
        message: String,
    },
}

impl ConfigurationError {
    /// Creates a missing field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Creates an invalid endpoint error.
    pub fn invalid_endpoint(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid value error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid node id error.
    pub fn invalid_node_id(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidNodeId {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid security policy error.
    pub fn invalid_security_policy(value: impl Into<String>) -> Self {
        Self::InvalidSecurityPolicy {
            value: value.into(),
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::MissingField { .. } => ErrorCode::new(4, 1),
            Self::InvalidEndpoint { .. } => ErrorCode::new(4, 2),
            Self::InvalidValue { .. } => ErrorCode::new(4, 3),
            Self::InvalidNodeId { .. } => ErrorCode::new(4, 4),
            Self::InvalidSecurityPolicy { .. } => ErrorCode::new(4, 5),
            Self::Parse { .. } => ErrorCode::new(4, 6),
        }
    }
}

// =============================================================================
// TimeoutError
// =============================================================================

/// Which request stream a correlated request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestPhase {
    /// Hello, OpenSecureChannel, CreateSession, ActivateSession, GetEndpoints.
    Handshake,
    /// Read, write, subscription management, renewal, close.
    DataPath,
    /// The publish loop.
    Publish,
}

impl RequestPhase {
    /// Returns `true` for handshake-phase requests.
    #[inline]
    pub const fn is_handshake(&self) -> bool {
        matches!(self, Self::Handshake)
    }
}

impl fmt::Display for RequestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Handshake => "handshake",
            Self::DataPath => "data",
            Self::Publish => "publish",
        };
        write!(f, "{}", s)
    }
}

/// A correlated request passed its deadline.
#[derive(Debug, Error)]
#[error("{operation} timed out after {duration:?} ({phase} request {transaction_id})")]
pub struct TimeoutError {
    /// Service name.
    pub operation: String,
    /// Transaction id of the request.
    pub transaction_id: u32,
    /// Deadline that elapsed.
    pub duration: Duration,
    /// Request stream.
    pub phase: RequestPhase,
}

impl TimeoutError {
    /// Creates a timeout error.
    pub fn new(
        operation: impl Into<String>,
        transaction_id: u32,
        duration: Duration,
        phase: RequestPhase,
    ) -> Self {
        Self {
            operation: operation.into(),
            transaction_id,
            duration,
            phase,
        }
    }
}

// =============================================================================
// ServiceFaultError
// =============================================================================

/// The server answered with a ServiceFault.
#[derive(Debug, Error)]
#[error("Service fault on {operation}: {status}")]
pub struct ServiceFaultError {
    /// Service that faulted.
    pub operation: String,
    /// Service result.
    pub status: StatusCode,
}

// =============================================================================
// ErrorSeverity
// =============================================================================

/// Error severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Informational.
    Info,
    /// Warning.
    Warning,
    /// Error.
    Error,
    /// Critical.
    Critical,
}

impl ErrorSeverity {
    /// Converts to tracing level.
    pub fn to_tracing_level(self) -> Level {
        match self {
            Self::Info => Level::INFO,
            Self::Warning => Level::WARN,
            Self::Error | Self::Critical => Level::ERROR,
        }
    }

    /// Returns the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// ErrorCode
// =============================================================================

/// Structured error code, rendered as `UA-XXYY`.
///
/// Categories: 1 connection, 2 session, 3 security, 4 configuration,
/// 5 operation, 6 subscription, 7 encoding, 8 conversion, 9 timeout,
/// 10 service fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode {
    /// Category.
    pub category: u8,
    /// Specific error within category.
    pub code: u8,
}

impl ErrorCode {
    /// Creates a new error code.
    pub const fn new(category: u8, code: u8) -> Self {
        Self { category, code }
    }

    /// Returns the full error code as a u16.
    pub fn as_u16(&self) -> u16 {
        (u16::from(self.category) << 8) | u16::from(self.code)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UA-{:02X}{:02X}", self.category, self.code)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_mismatch_is_fatal_not_retryable() {
        let error = UaError::connection(ConnectionError::sequence_mismatch(3, 5));
        assert!(error.is_connection_fatal());
        assert!(!error.is_retryable());
        assert_eq!(error.category(), "connection");
        assert!(error.to_string().contains("5 != 3"));
    }

    #[test]
    fn test_timeout_phase_decides_fatality() {
        let handshake = UaError::timeout(TimeoutError::new(
            "CreateSession",
            2,
            Duration::from_secs(10),
            RequestPhase::Handshake,
        ));
        assert!(handshake.is_connection_fatal());
        assert!(!handshake.is_retryable());

        let read = UaError::timeout(TimeoutError::new(
            "Read",
            9,
            Duration::from_secs(10),
            RequestPhase::DataPath,
        ));
        assert!(!read.is_connection_fatal());
        assert!(read.is_retryable());
    }

    #[test]
    fn test_service_fault_status() {
        let error = UaError::service_fault("Publish", StatusCode::BAD_SESSION_ID_INVALID);
        assert_eq!(error.status_code(), Some(StatusCode::BAD_SESSION_ID_INVALID));
        assert_eq!(error.error_code().to_string(), "UA-0A01");
    }

    #[test]
    fn test_io_error_conversion() {
        let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        let error: UaError = eof.into();
        assert!(matches!(
            error,
            UaError::Connection(ConnectionError::Closed { .. })
        ));
        assert!(error.is_retryable());
    }

    #[test]
    fn test_error_code_display() {
        assert_eq!(ErrorCode::new(1, 6).to_string(), "UA-0106");
        assert_eq!(ErrorCode::new(1, 6).as_u16(), 0x0106);
        assert_eq!(ErrorSeverity::Warning.to_tracing_level(), Level::WARN);
    }
}
