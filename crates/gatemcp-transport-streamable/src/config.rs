//! Binding configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Endpoint paths, keep-alive and limits shared by both bindings.
///
/// Durations are whole seconds on the wire (`keep_alive_secs`,
/// `idle_timeout_secs`, `request_timeout_secs`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BindingConfig {
    /// Path of the event-stream endpoint
    pub event_stream_path: String,
    /// Path of the multiplexed endpoint
    pub multiplexed_path: String,
    /// Interval between SSE keep-alive comments
    #[serde(rename = "keep_alive_secs", with = "secs")]
    pub keep_alive: Duration,
    /// Sessions idle longer than this are closed
    #[serde(rename = "idle_timeout_secs", with = "secs")]
    pub idle_timeout: Duration,
    /// How long a multiplexed send waits for its reply
    #[serde(rename = "request_timeout_secs", with = "secs")]
    pub request_timeout: Duration,
    /// Maximum accepted request body
    pub max_body_bytes: usize,
}

impl Default for BindingConfig {
    fn default() -> Self {
        Self {
            event_stream_path: "/sse".to_string(),
            multiplexed_path: "/mcp".to_string(),
            keep_alive: Duration::from_secs(15),
            idle_timeout: Duration::from_secs(30 * 60),
            request_timeout: Duration::from_secs(60),
            max_body_bytes: 4 * 1024 * 1024,
        }
    }
}

impl BindingConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the event-stream endpoint path.
    pub fn with_event_stream_path(mut self, path: impl Into<String>) -> Self {
        self.event_stream_path = path.into();
        self
    }

    /// Set the multiplexed endpoint path.
    pub fn with_multiplexed_path(mut self, path: impl Into<String>) -> Self {
        self.multiplexed_path = path.into();
        self
    }

    /// Set the keep-alive interval.
    pub fn with_keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive = interval;
        self
    }

    /// Set the idle timeout.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the per-request reply timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the maximum body size.
    pub fn with_max_body_bytes(mut self, size: usize) -> Self {
        self.max_body_bytes = size;
        self
    }

    /// URL the client posts to for a given event-stream session.
    pub fn event_stream_post_url(&self, session_id: &str) -> String {
        format!(
            "{}?{}={}",
            self.event_stream_path,
            crate::headers::SESSION_ID_QUERY,
            session_id
        )
    }
}

/// Durations as whole seconds in config files.
mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BindingConfig::default();
        assert_eq!(config.event_stream_path, "/sse");
        assert_eq!(config.multiplexed_path, "/mcp");
        assert_eq!(config.keep_alive, Duration::from_secs(15));
    }

    #[test]
    fn test_builder_pattern() {
        let config = BindingConfig::new()
            .with_event_stream_path("/events")
            .with_request_timeout(Duration::from_secs(5));
        assert_eq!(config.event_stream_post_url("s1"), "/events?sessionId=s1");
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_durations_are_seconds_on_the_wire() {
        let config: BindingConfig =
            serde_json::from_value(serde_json::json!({"keep_alive_secs": 3, "idle_timeout_secs": 60}))
                .unwrap();
        assert_eq!(config.keep_alive, Duration::from_secs(3));
        assert_eq!(config.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.multiplexed_path, "/mcp");

        let json = serde_json::to_value(BindingConfig::default()).unwrap();
        assert_eq!(json["request_timeout_secs"], 60);
        assert_eq!(json["max_body_bytes"], 4 * 1024 * 1024);
    }
}
