// Message types - the records the persistence layer stores and revives

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Composition state of a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageState {
    /// Composed but not yet handed to the transport
    Pending,
    /// Left this device
    Sent,
    /// Accepted by the remote party's client
    Accepted,
    /// Delivered to the remote party's device
    Delivered,
    /// Rendered on the remote party's screen
    Displayed,
    /// Transport gave up
    Failed,
    /// Rejected or malformed
    Error,
    /// Incoming message (never transitions)
    Received,
}

impl MessageState {
    /// `Displayed` is final: stored state updates stop there
    pub fn is_final(&self) -> bool {
        matches!(self, MessageState::Displayed)
    }
}

/// Disposition marker carried next to the composition state.
///
/// Set by receipt handling; independent of `MessageState` and never
/// consulted for deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispositionState {
    Pending,
    Delivered,
    Displayed,
    Failed,
    Error,
}

/// A chat message as persisted in a conversation log.
///
/// Produced by the signalling layer. This crate stores, revives and pages
/// these records; it never interprets `content`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique message ID (UUID v4)
    pub id: String,
    /// Sender URI
    pub sender: String,
    /// Receiver URI
    pub receiver: String,
    /// Message body
    pub content: String,
    /// MIME type of the body (e.g. "text/plain")
    pub content_type: String,
    /// Composition state
    pub state: MessageState,
    /// Disposition marker. Absent until receipt handling first sets it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disposition_state: Option<DispositionState>,
    /// Wall-clock time of the message, millisecond precision
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
}

/// A requested composition-state change for one stored message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateUpdate {
    /// ID of the message to update
    pub message_id: String,
    /// Target composition state
    pub state: MessageState,
}

impl Message {
    /// Create an outgoing message addressed to `receiver`
    pub fn outgoing(sender: String, receiver: String, content: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender,
            receiver,
            content: content.to_string(),
            content_type: "text/plain".to_string(),
            state: MessageState::Pending,
            disposition_state: None,
            timestamp: now_millis(),
        }
    }

    /// Create an incoming message from `sender`
    pub fn incoming(sender: String, receiver: String, content: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender,
            receiver,
            content: content.to_string(),
            content_type: "text/plain".to_string(),
            state: MessageState::Received,
            disposition_state: None,
            timestamp: now_millis(),
        }
    }

    /// The conversation log this message belongs to: the remote party's
    /// URI, so `sender` for incoming messages and `receiver` otherwise.
    pub fn conversation_key(&self) -> &str {
        if self.state == MessageState::Received {
            &self.sender
        } else {
            &self.receiver
        }
    }
}

/// Current time clamped to the stored millisecond precision
pub fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

/// Wire format for timestamps: ISO 8601 UTC with exactly three fractional
/// digits, e.g. `2024-01-15T10:30:00.123Z`. Revival matches this shape;
/// records carrying any other timestamp shape fail to decode.
pub(crate) mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub(crate) const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

    pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&ts.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }
}
