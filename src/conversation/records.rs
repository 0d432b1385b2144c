//! Conversation, message and user metadata records.
//!
//! Attribute names follow the stored wire format (`PK`, `SK`, `createdAt`,
//! `totalMessages`, ...), so records serialize directly into store items and
//! into HTTP responses.

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::conversation::keys::MessageId;
use crate::storage::{Item, StoreError, StoreResult};

/// Attribute holding the embedded message list.
pub const MESSAGES_ATTR: &str = "messages";
/// Attribute holding the message counter.
pub const TOTAL_MESSAGES_ATTR: &str = "totalMessages";
/// Attribute holding the last update time.
pub const UPDATED_AT_ATTR: &str = "updatedAt";
/// Attribute holding the per-user conversation counter.
pub const TOTAL_CONVERSATIONS_ATTR: &str = "totalConversations";

/// Who wrote a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderType {
    /// The end user.
    User,
    /// The assistant.
    Bot,
}

impl SenderType {
    /// `Bot` when `is_bot`, otherwise `User`.
    #[must_use]
    pub const fn from_is_bot(is_bot: bool) -> Self {
        if is_bot { Self::Bot } else { Self::User }
    }
}

/// Kind of message payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Plain text.
    Text,
    /// Reference to an uploaded file.
    File,
}

/// A message embedded in a conversation record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Message identifier.
    pub message_id: MessageId,
    /// Text content; for files, a description such as `File: report.pdf`.
    pub content: String,
    /// Object key of the stored file, for file messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_key: Option<String>,
    /// Author classification.
    pub sender_type: SenderType,
    /// Creation time in epoch seconds.
    pub timestamp: i64,
    /// Payload classification.
    #[serde(rename = "type")]
    pub message_type: MessageType,
}

/// A message before it gets an id and timestamp.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewMessage {
    /// Text content.
    pub content: String,
    /// Author classification.
    pub sender_type: SenderType,
    /// Payload classification.
    pub message_type: MessageType,
    /// Object key for file messages.
    pub file_key: Option<String>,
}

impl NewMessage {
    /// A text message.
    #[must_use]
    pub fn text(content: impl Into<String>, sender_type: SenderType) -> Self {
        Self {
            content: content.into(),
            sender_type,
            message_type: MessageType::Text,
            file_key: None,
        }
    }

    /// A user file message pointing at `file_key`.
    #[must_use]
    pub fn file(filename: &str, file_key: String) -> Self {
        Self {
            content: format!("File: {filename}"),
            sender_type: SenderType::User,
            message_type: MessageType::File,
            file_key: Some(file_key),
        }
    }

    /// Stamp the message with an id and creation time.
    #[must_use]
    pub fn into_message(self, now: i64) -> Message {
        Message {
            message_id: MessageId::generate(now),
            content: self.content,
            file_key: self.file_key,
            sender_type: self.sender_type,
            timestamp: now,
            message_type: self.message_type,
        }
    }
}

/// A conversation record.
///
/// `created_at` and `title` are optional because a record fabricated by an
/// upsert append carries neither.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Partition key, `USER#{email}`.
    #[serde(rename = "PK")]
    pub pk: String,
    /// Sort key, `CONV#{id}`.
    #[serde(rename = "SK")]
    pub sk: String,
    /// Creation time in epoch seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    /// Last update time in epoch seconds.
    #[serde(
        default,
        deserialize_with = "lenient_epoch_seconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<i64>,
    /// Display title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Message counter.
    #[serde(default)]
    pub total_messages: i64,
    /// Messages in chronological (append) order.
    #[serde(default, deserialize_with = "lenient_messages")]
    pub messages: Vec<Message>,
}

impl Conversation {
    /// Decode a stored item.
    ///
    /// # Errors
    /// Returns an error if the item does not have the conversation shape.
    pub fn from_item(item: Item) -> StoreResult<Self> {
        Ok(serde_json::from_value(Value::Object(item))?)
    }

    /// Encode as a store item.
    ///
    /// # Errors
    /// Returns an error if serialization does not produce an object.
    pub fn to_item(&self) -> StoreResult<Item> {
        match serde_json::to_value(self)? {
            Value::Object(item) => Ok(item),
            _ => Err(StoreError::InvalidItem(
                "conversation did not serialize to an object".to_string(),
            )),
        }
    }

    /// Object keys of every file referenced by this conversation.
    #[must_use]
    pub fn file_keys(&self) -> Vec<&str> {
        self.messages
            .iter()
            .filter_map(|m| m.file_key.as_deref())
            .collect()
    }
}

/// Per-user counters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMetadata {
    /// Partition key, `USER#{email}`.
    #[serde(rename = "PK")]
    pub pk: String,
    /// Always `METADATA`.
    #[serde(rename = "SK")]
    pub sk: String,
    /// Number of conversations created minus deleted.
    #[serde(default)]
    pub total_conversations: i64,
}

impl UserMetadata {
    /// Decode a stored item.
    ///
    /// # Errors
    /// Returns an error if the item does not have the metadata shape.
    pub fn from_item(item: Item) -> StoreResult<Self> {
        Ok(serde_json::from_value(Value::Object(item))?)
    }
}

/// Absent or non-list `messages` read back as an empty list.
fn lenient_messages<'de, D>(deserializer: D) -> Result<Vec<Message>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Array(items) => serde_json::from_value(Value::Array(items))
            .map_err(serde::de::Error::custom),
        _ => Ok(Vec::new()),
    }
}

/// Accept epoch seconds or an ISO-8601 string (older records).
fn lenient_epoch_seconds<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => parse_iso_seconds(&s),
        _ => None,
    })
}

fn parse_iso_seconds(raw: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp());
    }
    // Naive timestamps are read as UTC.
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|dt| dt.and_utc().timestamp())
}
