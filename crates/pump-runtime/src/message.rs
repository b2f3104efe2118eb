//! Message types and core domain identifiers.

use crate::error::ValidationError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Unique identifier for messages within the entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        let id = uuid::Uuid::new_v4();
        Self(id.to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

/// Opaque handle identifying a broker-held exclusive claim on a message.
///
/// The token is issued when a message is delivered and must accompany every
/// renew-lock and settlement call for that delivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockToken(String);

impl LockToken {
    /// Create lock token from an opaque broker-issued value
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Get token as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LockToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for a session-scoped ordered stream of messages
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Create new session ID with validation
    pub fn new(id: String) -> Result<Self, ValidationError> {
        if id.is_empty() {
            return Err(ValidationError::Required {
                field: "session_id".to_string(),
            });
        }

        if id.len() > 128 {
            return Err(ValidationError::OutOfRange {
                field: "session_id".to_string(),
                message: "maximum 128 characters".to_string(),
            });
        }

        // Validate ASCII printable characters only
        if !id.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
            return Err(ValidationError::InvalidFormat {
                field: "session_id".to_string(),
                message: "only ASCII printable characters allowed".to_string(),
            });
        }

        Ok(Self(id))
    }

    /// Get session ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

/// Timestamp wrapper for broker wall-clock instants
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create timestamp from DateTime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Create timestamp a duration from now
    pub fn from_now(duration: Duration) -> Self {
        Self(Utc::now() + chrono::Duration::milliseconds(duration.as_millis() as i64))
    }

    /// Broker-agnostic "maximum" sentinel meaning "no upper bound".
    ///
    /// Used as the default last-updated filter when browsing sessions.
    pub fn far_future() -> Self {
        Self(DateTime::<Utc>::MAX_UTC)
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Time remaining until this instant, or zero if already past
    pub fn duration_until(&self) -> Duration {
        let now = Utc::now();
        if now >= self.0 {
            Duration::ZERO
        } else {
            (self.0 - now).to_std().unwrap_or(Duration::ZERO)
        }
    }

    /// Check if this instant is in the past
    pub fn is_past(&self) -> bool {
        Utc::now() >= self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

// ============================================================================
// Message
// ============================================================================

/// A message delivered by the broker with its lock metadata.
///
/// Owned exclusively by whichever dispatch slot currently holds it; the
/// delivery reaches a terminal state once settled (complete/abandon
/// acknowledged) or once the lock lapses without renewal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: MessageId,
    #[serde(with = "bytes_serde")]
    pub body: Bytes,
    pub attributes: HashMap<String, String>,
    pub session_id: Option<SessionId>,
    pub lock_token: LockToken,
    pub locked_until: Timestamp,
    pub delivery_count: u32,
}

impl Message {
    /// Create new message with lock metadata
    pub fn new(
        message_id: MessageId,
        body: Bytes,
        lock_token: LockToken,
        locked_until: Timestamp,
    ) -> Self {
        Self {
            message_id,
            body,
            attributes: HashMap::new(),
            session_id: None,
            lock_token,
            locked_until,
            delivery_count: 1,
        }
    }

    /// Associate message with a session
    pub fn with_session_id(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Add message attribute
    pub fn with_attribute(mut self, key: String, value: String) -> Self {
        self.attributes.insert(key, value);
        self
    }

    /// Set delivery count reported by the broker
    pub fn with_delivery_count(mut self, count: u32) -> Self {
        self.delivery_count = count;
        self
    }

    /// Check if the message lock has already lapsed
    pub fn is_lock_expired(&self) -> bool {
        self.locked_until.is_past()
    }
}

/// Custom serialization for Bytes
mod bytes_serde {
    use base64::{engine::general_purpose, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded = general_purpose::STANDARD.encode(bytes);
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let decoded = general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)?;
        Ok(Bytes::from(decoded))
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
