// File: src/conversation/keys.rs

//! Key scheme and identifier types for conversation records.
//!
//! Everything a user owns lives in the partition `USER#{email}`. Inside it,
//! conversations sort under `CONV#{id}` and the per-user counters sit at
//! `METADATA`, so a prefix query on `CONV#` lists a user's conversations.
//!
//! Conversation identifiers supplied by callers are opaque: they are not
//! required to be UUIDs, and may arrive with or without the `CONV#` prefix.

use core::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::storage::ItemKey;

/// Partition key prefix for everything owned by one user.
pub const USER_PREFIX: &str = "USER#";

/// Sort key prefix of conversation records.
pub const CONVERSATION_PREFIX: &str = "CONV#";

/// Sort key of the per-user metadata record.
pub const METADATA_SORT_KEY: &str = "METADATA";

/// Prefix of generated message identifiers.
pub const MESSAGE_PREFIX: &str = "MSG#";

/// Number of UUID characters kept in message ids and default titles.
const SHORT_ID_LEN: usize = 8;

/// Partition key for a user.
#[must_use]
pub fn user_partition_key(email: &str) -> String {
    format!("{USER_PREFIX}{email}")
}

/// Key of the user's metadata record.
#[must_use]
pub fn metadata_key(email: &str) -> ItemKey {
    ItemKey::new(user_partition_key(email), METADATA_SORT_KEY)
}

/// Identifier of a conversation, stored without its `CONV#` prefix.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Generate a new random identifier (UUID v4).
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Normalize a caller-supplied identifier, stripping one `CONV#` prefix if present.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        Self(raw.strip_prefix(CONVERSATION_PREFIX).unwrap_or(raw).to_string())
    }

    /// The bare identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The sort key form, `CONV#{id}`.
    #[must_use]
    pub fn sort_key(&self) -> String {
        format!("{CONVERSATION_PREFIX}{}", self.0)
    }

    /// Full item key of this conversation for `email`.
    #[must_use]
    pub fn item_key(&self, email: &str) -> ItemKey {
        ItemKey::new(user_partition_key(email), self.sort_key())
    }

    /// Title given to new conversations: `Conversation {first 8 chars}`.
    #[must_use]
    pub fn default_title(&self) -> String {
        let short: String = self.0.chars().take(SHORT_ID_LEN).collect();
        format!("Conversation {short}")
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a message: `MSG#{epoch seconds}#{8 random hex chars}`.
///
/// The random suffix lowers the collision risk between messages created in
/// the same second; it does not make ids globally unique.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Generate an id for a message created at `epoch_seconds`.
    #[must_use]
    pub fn generate(epoch_seconds: i64) -> Self {
        let random = Uuid::new_v4().simple().to_string();
        Self(format!(
            "{MESSAGE_PREFIX}{epoch_seconds}#{}",
            &random[..SHORT_ID_LEN]
        ))
    }

    /// Borrow the id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Object key of an uploaded file: `{email}/CONV#{id}/{filename}`.
#[must_use]
pub fn file_object_key(email: &str, conversation: &ConversationId, filename: &str) -> String {
    format!("{email}/{}/{filename}", conversation.sort_key())
}
