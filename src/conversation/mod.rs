//! Conversation data-access layer.
//!
//! - `keys`: partition/sort key scheme and identifier types
//! - `records`: conversation, message and metadata records
//! - `gateway`: the operations exposed to the HTTP layer
//! - `config`: runtime configuration
//! - `errors`: gateway error type

pub mod config;
pub mod errors;
pub mod gateway;
pub mod keys;
pub mod records;

pub use config::{AppendMode, GatewayConfig, KvBackend, KvConfig, ObjectConfig, ServerConfig};
pub use errors::{GatewayError, GatewayResult};
pub use gateway::{ConversationGateway, UploadReceipt};
pub use keys::{ConversationId, MessageId};
pub use records::{Conversation, Message, MessageType, NewMessage, SenderType, UserMetadata};
