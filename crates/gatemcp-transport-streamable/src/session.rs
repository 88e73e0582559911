//! Session identifiers.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum accepted session id length.
pub const MAX_SESSION_ID_LEN: usize = 256;

/// Opaque, globally unique session identifier.
///
/// Generated ids are `{unix-millis as hex}-{uuid v4 simple}`: the time part
/// keeps ids roughly sortable in logs, the random part carries 122 bits of
/// entropy so ids cannot be guessed or collide across processes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh session id.
    pub fn generate() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        Self(format!("{millis:x}-{}", Uuid::new_v4().simple()))
    }

    /// Validate an id received from a peer.
    ///
    /// Returns `None` for empty or oversized ids and for ids containing
    /// characters outside visible ASCII.
    pub fn parse(s: &str) -> Option<Self> {
        let valid = !s.is_empty()
            && s.len() <= MAX_SESSION_ID_LEN
            && s.bytes().all(|b| (0x21..=0x7e).contains(&b));
        valid.then(|| Self(s.to_string()))
    }

    /// Get the session ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the session ID and return the inner string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
