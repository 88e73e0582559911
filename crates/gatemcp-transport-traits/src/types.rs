//! Binding identity and state types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The two HTTP stream bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BindingKind {
    /// Long-lived server push stream plus short-lived client posts (`/sse`)
    EventStream,
    /// Single endpoint multiplexing send, push-open and terminate (`/mcp`)
    Multiplexed,
}

impl BindingKind {
    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EventStream => "event-stream",
            Self::Multiplexed => "multiplexed",
        }
    }

    /// Human readable transport label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::EventStream => "SSE",
            Self::Multiplexed => "Streamable HTTP",
        }
    }
}

impl fmt::Display for BindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a binding kind name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseBindingKindError(pub String);

impl fmt::Display for ParseBindingKindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown binding kind: {}", self.0)
    }
}

impl std::error::Error for ParseBindingKindError {}

impl FromStr for BindingKind {
    type Err = ParseBindingKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "event-stream" | "sse" => Ok(Self::EventStream),
            "multiplexed" | "streamable" | "streamable-http" | "http" => Ok(Self::Multiplexed),
            _ => Err(ParseBindingKindError(s.to_string())),
        }
    }
}

/// Why a binding closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Explicit terminate request
    Terminated,
    /// The peer dropped the underlying connection
    PeerDisconnected,
    /// Idle timeout elapsed
    Expired,
    /// Process shutdown
    Shutdown,
    /// Local caller closed the binding
    Local,
}

impl CloseReason {
    /// Stable name used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Terminated => "terminated",
            Self::PeerDisconnected => "peer-disconnected",
            Self::Expired => "expired",
            Self::Shutdown => "shutdown",
            Self::Local => "local",
        }
    }

    /// Inverse of [`as_str`](Self::as_str).
    pub fn from_name(name: &str) -> Option<Self> {
        [
            Self::Terminated,
            Self::PeerDisconnected,
            Self::Expired,
            Self::Shutdown,
            Self::Local,
        ]
        .into_iter()
        .find(|reason| reason.as_str() == name)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Terminated => "terminated",
            Self::PeerDisconnected => "peer disconnected",
            Self::Expired => "expired",
            Self::Shutdown => "shutdown",
            Self::Local => "closed locally",
        })
    }
}

/// Lifecycle state of a binding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BindingState {
    /// Created, not yet opened
    #[default]
    Pending,
    /// Carrying traffic
    Open,
    /// Closed for good
    Closed(CloseReason),
}

impl BindingState {
    /// Whether the binding has closed.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_kind_parse_aliases() {
        assert_eq!("sse".parse::<BindingKind>().unwrap(), BindingKind::EventStream);
        assert_eq!(
            "Streamable-HTTP".parse::<BindingKind>().unwrap(),
            BindingKind::Multiplexed
        );
        assert!("websocket".parse::<BindingKind>().is_err());
    }

    #[test]
    fn test_binding_kind_serde_names() {
        let json = serde_json::to_string(&BindingKind::EventStream).unwrap();
        assert_eq!(json, "\"event-stream\"");
        let kind: BindingKind = serde_json::from_str("\"multiplexed\"").unwrap();
        assert_eq!(kind, BindingKind::Multiplexed);
    }

    #[test]
    fn test_close_reason_names() {
        assert_eq!(
            CloseReason::from_name(CloseReason::PeerDisconnected.as_str()),
            Some(CloseReason::PeerDisconnected)
        );
        assert_eq!(CloseReason::from_name("closed locally"), None);
    }
}
