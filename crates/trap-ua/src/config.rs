// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Client configuration.
//!
//! # Examples
//!
//! ```
//! use trap_ua::config::UaConfig;
//! use std::time::Duration;
//!
//! let config = UaConfig::builder()
//!     .endpoint("opc.tcp://localhost:4840")
//!     .username("operator", "secret")
//!     .request_timeout(Duration::from_secs(5))
//!     .build()
//!     .unwrap();
//! assert!(config.username.is_some());
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigurationError, UaError, UaResult};
use crate::types::SecurityPolicy;

/// Protocol version sent in Hello and OpenSecureChannel.
pub const PROTOCOL_VERSION: u32 = 0;

// =============================================================================
// UaConfig
// =============================================================================

/// Connection configuration for [`UaConnection`](crate::client::UaConnection).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UaConfig {
    /// Server endpoint URL (e.g., "opc.tcp://localhost:4840").
    pub endpoint: String,

    /// Security policy. Frames are encrypted unless this is `None`.
    #[serde(default)]
    pub security_policy: SecurityPolicy,

    /// Username for UserName identity tokens. Anonymous when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Password for UserName identity tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Application name sent in the client description.
    #[serde(default = "default_application_name")]
    pub application_name: String,

    /// Application URI.
    #[serde(default = "default_application_uri")]
    pub application_uri: String,

    /// Product URI.
    #[serde(default = "default_application_uri")]
    pub product_uri: String,

    /// Per-request deadline, also sent as the request header timeout hint.
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Interval between secure channel renewals.
    #[serde(default = "default_keepalive_interval", with = "humantime_serde")]
    pub keepalive_interval: Duration,

    /// Requested secure channel lifetime.
    #[serde(default = "default_channel_lifetime", with = "humantime_serde")]
    pub channel_lifetime: Duration,

    /// Requested session timeout.
    #[serde(default = "default_session_timeout", with = "humantime_serde")]
    pub session_timeout: Duration,

    /// Budget for the best-effort close sequence.
    #[serde(default = "default_close_timeout", with = "humantime_serde")]
    pub close_timeout: Duration,

    /// Receive buffer size advertised in Hello.
    #[serde(default = "default_buffer_size")]
    pub receive_buffer_size: u32,

    /// Send buffer size advertised in Hello.
    #[serde(default = "default_buffer_size")]
    pub send_buffer_size: u32,

    /// Maximum message size advertised in Hello.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: u32,

    /// Maximum chunk count advertised in Hello.
    #[serde(default = "default_max_chunk_count")]
    pub max_chunk_count: u32,

    /// Concurrent read/write/subscription-management requests allowed.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// Subscription defaults.
    #[serde(default)]
    pub subscription: SubscriptionSettings,
}

fn default_application_name() -> String {
    "TRAP OPC UA Client".to_string()
}

fn default_application_uri() -> String {
    "urn:trap:ua:client".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_keepalive_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_channel_lifetime() -> Duration {
    Duration::from_millis(36_000_000)
}

fn default_session_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_close_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_buffer_size() -> u32 {
    65535
}

fn default_max_message_size() -> u32 {
    2_097_152
}

fn default_max_chunk_count() -> u32 {
    64
}

fn default_max_concurrent_requests() -> usize {
    1
}

impl UaConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> UaConfigBuilder {
        UaConfigBuilder::default()
    }

    /// Creates a configuration with defaults for everything but the endpoint.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Deserializes and validates a configuration from a JSON value.
    pub fn from_json(value: serde_json::Value) -> UaResult<Self> {
        let config: Self = serde_json::from_value(value).map_err(|e| {
            UaError::configuration(ConfigurationError::Parse {
                message: e.to_string(),
            })
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates this configuration.
    pub fn validate(&self) -> UaResult<()> {
        if self.endpoint.is_empty() {
            return Err(UaError::configuration(ConfigurationError::missing_field(
                "endpoint",
            )));
        }

        if !self.endpoint.starts_with("opc.tcp://") {
            return Err(UaError::configuration(ConfigurationError::invalid_endpoint(
                &self.endpoint,
                "Endpoint must start with opc.tcp://",
            )));
        }

        if self.host_port().is_none() {
            return Err(UaError::configuration(ConfigurationError::invalid_endpoint(
                &self.endpoint,
                "Endpoint must contain a host",
            )));
        }

        if self.password.is_some() && self.username.is_none() {
            return Err(UaError::configuration(ConfigurationError::missing_field(
                "username",
            )));
        }

        for (field, value) in [
            ("request_timeout", self.request_timeout),
            ("keepalive_interval", self.keepalive_interval),
            ("channel_lifetime", self.channel_lifetime),
            ("session_timeout", self.session_timeout),
        ] {
            if value.is_zero() {
                return Err(UaError::configuration(ConfigurationError::invalid_value(
                    field,
                    "must be greater than 0",
                )));
            }
        }

        if self.max_concurrent_requests == 0 {
            return Err(UaError::configuration(ConfigurationError::invalid_value(
                "max_concurrent_requests",
                "must be at least 1",
            )));
        }

        self.subscription.validate()
    }

    /// Returns `true` if frames are passed through the encryption envelope.
    #[inline]
    pub fn is_encrypted(&self) -> bool {
        self.security_policy.is_encrypted()
    }

    /// Returns `host:port` from the endpoint URL (port defaults to 4840).
    pub fn host_port(&self) -> Option<String> {
        let rest = self.endpoint.strip_prefix("opc.tcp://")?;
        let authority = rest.split('/').next().filter(|a| !a.is_empty())?;
        if authority.rsplit_once(':').is_some_and(|(_, p)| p.parse::<u16>().is_ok()) {
            Some(authority.to_string())
        } else {
            Some(format!("{}:4840", authority))
        }
    }

    /// Request timeout in milliseconds, as sent in request headers.
    pub fn timeout_hint_ms(&self) -> u32 {
        u32::try_from(self.request_timeout.as_millis()).unwrap_or(u32::MAX)
    }

    /// Channel lifetime in milliseconds.
    pub fn channel_lifetime_ms(&self) -> u32 {
        u32::try_from(self.channel_lifetime.as_millis()).unwrap_or(u32::MAX)
    }
}

impl Default for UaConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            security_policy: SecurityPolicy::default(),
            username: None,
            password: None,
            application_name: default_application_name(),
            application_uri: default_application_uri(),
            product_uri: default_application_uri(),
            request_timeout: default_request_timeout(),
            keepalive_interval: default_keepalive_interval(),
            channel_lifetime: default_channel_lifetime(),
            session_timeout: default_session_timeout(),
            close_timeout: default_close_timeout(),
            receive_buffer_size: default_buffer_size(),
            send_buffer_size: default_buffer_size(),
            max_message_size: default_max_message_size(),
            max_chunk_count: default_max_chunk_count(),
            max_concurrent_requests: default_max_concurrent_requests(),
            subscription: SubscriptionSettings::default(),
        }
    }
}

// =============================================================================
// UaConfigBuilder
// =============================================================================

/// Builder for [`UaConfig`].
#[derive(Debug, Default)]
pub struct UaConfigBuilder {
    config: UaConfig,
}

impl UaConfigBuilder {
    /// Sets the server endpoint URL.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = endpoint.into();
        self
    }

    /// Sets the security policy.
    pub fn security_policy(mut self, policy: SecurityPolicy) -> Self {
        self.config.security_policy = policy;
        self
    }

    /// Sets username/password authentication.
    pub fn username(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.username = Some(username.into());
        self.config.password = Some(password.into());
        self
    }

    /// Sets the application name.
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.config.application_name = name.into();
        self
    }

    /// Sets the application URI.
    pub fn application_uri(mut self, uri: impl Into<String>) -> Self {
        self.config.application_uri = uri.into();
        self
    }

    /// Sets the product URI.
    pub fn product_uri(mut self, uri: impl Into<String>) -> Self {
        self.config.product_uri = uri.into();
        self
    }

    /// Sets the per-request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Sets the channel renewal interval.
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.config.keepalive_interval = interval;
        self
    }

    /// Sets the requested channel lifetime.
    pub fn channel_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.channel_lifetime = lifetime;
        self
    }

    /// Sets the requested session timeout.
    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.config.session_timeout = timeout;
        self
    }

    /// Sets the close sequence budget.
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.config.close_timeout = timeout;
        self
    }

    /// Sets the admission gate limit.
    pub fn max_concurrent_requests(mut self, limit: usize) -> Self {
        self.config.max_concurrent_requests = limit;
        self
    }

    /// Sets subscription defaults.
    pub fn subscription(mut self, settings: SubscriptionSettings) -> Self {
        self.config.subscription = settings;
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> UaResult<UaConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// =============================================================================
// SubscriptionSettings
// =============================================================================

/// CreateSubscription and monitored item parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionSettings {
    /// Cycle time for tags without a requested interval.
    #[serde(default = "default_cycle_time", with = "humantime_serde")]
    pub default_cycle_time: Duration,

    /// Requested lifetime count.
    #[serde(default = "default_lifetime_count")]
    pub lifetime_count: u32,

    /// Requested maximum keep-alive count.
    #[serde(default = "default_max_keep_alive_count")]
    pub max_keep_alive_count: u32,

    /// Maximum notifications per publish response.
    #[serde(default = "default_max_notifications")]
    pub max_notifications_per_publish: u32,

    /// Subscription priority.
    #[serde(default)]
    pub priority: u8,

    /// Monitored item queue size.
    #[serde(default = "default_queue_size")]
    pub queue_size: u32,

    /// Discard oldest queued value on overflow.
    #[serde(default = "default_true")]
    pub discard_oldest: bool,

    /// Upper bound for the congestion-adjusted cycle time. Unbounded when unset.
    #[serde(default, with = "humantime_serde_opt", skip_serializing_if = "Option::is_none")]
    pub max_revised_cycle_time: Option<Duration>,
}

fn default_cycle_time() -> Duration {
    Duration::from_secs(1)
}

fn default_lifetime_count() -> u32 {
    12000
}

fn default_max_keep_alive_count() -> u32 {
    50
}

fn default_max_notifications() -> u32 {
    65536
}

fn default_queue_size() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            default_cycle_time: default_cycle_time(),
            lifetime_count: default_lifetime_count(),
            max_keep_alive_count: default_max_keep_alive_count(),
            max_notifications_per_publish: default_max_notifications(),
            priority: 0,
            queue_size: default_queue_size(),
            discard_oldest: true,
            max_revised_cycle_time: None,
        }
    }
}

impl SubscriptionSettings {
    /// Validates the settings.
    pub fn validate(&self) -> UaResult<()> {
        if self.default_cycle_time.is_zero() {
            return Err(UaError::configuration(ConfigurationError::invalid_value(
                "subscription.default_cycle_time",
                "must be greater than 0",
            )));
        }
        if self.lifetime_count < 3 * self.max_keep_alive_count {
            return Err(UaError::configuration(ConfigurationError::invalid_value(
                "subscription.lifetime_count",
                "must be at least three times max_keep_alive_count",
            )));
        }
        if let Some(max) = self.max_revised_cycle_time {
            if max < self.default_cycle_time {
                return Err(UaError::configuration(ConfigurationError::invalid_value(
                    "subscription.max_revised_cycle_time",
                    "must not be below default_cycle_time",
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// humantime_serde helpers
// =============================================================================

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        humantime::format_duration(*duration)
            .to_string()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

mod humantime_serde_opt {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration
            .map(|d| humantime::format_duration(d).to_string())
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = UaConfig::new("opc.tcp://plc:4840");
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.keepalive_interval, Duration::from_secs(30));
        assert_eq!(config.channel_lifetime_ms(), 36_000_000);
        assert_eq!(config.max_message_size, 2_097_152);
        assert_eq!(config.max_chunk_count, 64);
        assert_eq!(config.max_concurrent_requests, 1);
        assert_eq!(config.subscription.lifetime_count, 12000);
        assert!(config.subscription.max_revised_cycle_time.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_failures() {
        assert!(UaConfig::builder().build().is_err());
        assert!(UaConfig::builder().endpoint("http://plc").build().is_err());
        assert!(UaConfig::builder()
            .endpoint("opc.tcp://plc:4840")
            .max_concurrent_requests(0)
            .build()
            .is_err());
        assert!(UaConfig::builder()
            .endpoint("opc.tcp://plc:4840")
            .request_timeout(Duration::ZERO)
            .build()
            .is_err());

        let mut orphan_password = UaConfig::new("opc.tcp://plc:4840");
        orphan_password.password = Some("secret".into());
        assert!(orphan_password.validate().is_err());
    }

    #[test]
    fn test_host_port() {
        assert_eq!(
            UaConfig::new("opc.tcp://plc:4841/UA/Server").host_port().as_deref(),
            Some("plc:4841")
        );
        assert_eq!(
            UaConfig::new("opc.tcp://plc").host_port().as_deref(),
            Some("plc:4840")
        );
        assert_eq!(UaConfig::new("opc.tcp:///path").host_port(), None);
    }

    #[test]
    fn test_from_json_with_humantime() {
        let config = UaConfig::from_json(serde_json::json!({
            "endpoint": "opc.tcp://plc:4840",
            "security_policy": "basic256_sha256",
            "request_timeout": "3s",
            "subscription": { "default_cycle_time": "250ms", "max_revised_cycle_time": "5s" }
        }))
        .unwrap();

        assert!(config.is_encrypted());
        assert_eq!(config.request_timeout, Duration::from_secs(3));
        assert_eq!(config.timeout_hint_ms(), 3000);
        assert_eq!(config.subscription.default_cycle_time, Duration::from_millis(250));
        assert_eq!(
            config.subscription.max_revised_cycle_time,
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn test_serde_roundtrip() {
        let config = UaConfig::builder()
            .endpoint("opc.tcp://plc:4840")
            .username("op", "pw")
            .build()
            .unwrap();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["request_timeout"], "10s");
        let back = UaConfig::from_json(json).unwrap();
        assert_eq!(back, config);
    }
}
