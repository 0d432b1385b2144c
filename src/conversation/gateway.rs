//! Conversation store gateway.
//!
//! Translates chat operations into key-value and object store calls:
//!
//! | Operation | Store calls |
//! |-----------|-------------|
//! | create    | one transaction: put conversation + bump user counter |
//! | append    | one conditional update of the conversation record |
//! | upload    | object put, then append (object deleted if the append fails) |
//! | get/list  | get item / prefix query |
//! | delete    | get, transaction: delete conversation + drop user counter, then file cleanup |

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::conversation::config::AppendMode;
use crate::conversation::errors::{GatewayError, GatewayResult};
use crate::conversation::keys::{
    CONVERSATION_PREFIX, ConversationId, MessageId, file_object_key, metadata_key,
    user_partition_key,
};
use crate::conversation::records::{
    Conversation, MESSAGES_ATTR, NewMessage, SenderType, TOTAL_CONVERSATIONS_ATTR,
    TOTAL_MESSAGES_ATTR, UPDATED_AT_ATTR, UserMetadata,
};
use crate::storage::{
    Condition, KeyValueStore, ObjectStore, ObjectStoreError, StoreError, TransactWrite,
    UpdateAction, UpdateItem,
};

/// Result of a file upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadReceipt {
    /// Object key the bytes were written to.
    pub file_key: String,
    /// Id of the file message appended to the conversation.
    pub message_id: MessageId,
}

/// Gateway between chat operations and the storage collaborators.
pub struct ConversationGateway {
    kv: Arc<dyn KeyValueStore>,
    objects: Arc<dyn ObjectStore>,
    bucket: String,
    append_mode: AppendMode,
}

impl ConversationGateway {
    /// Create a gateway over the given stores.
    #[must_use]
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        objects: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        append_mode: AppendMode,
    ) -> Self {
        Self {
            kv,
            objects,
            bucket: bucket.into(),
            append_mode,
        }
    }

    /// Bucket receiving uploaded files.
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Configured append behavior.
    #[must_use]
    pub const fn append_mode(&self) -> AppendMode {
        self.append_mode
    }

    /// Create an empty conversation and count it in the user's metadata.
    ///
    /// # Errors
    /// Returns an error if `email` is empty or the store write fails.
    pub async fn create_conversation(&self, email: &str) -> GatewayResult<ConversationId> {
        require("email", email)?;

        let id = ConversationId::generate();
        let now = now_seconds();
        let conversation = Conversation {
            pk: user_partition_key(email),
            sk: id.sort_key(),
            created_at: Some(now),
            updated_at: Some(now),
            title: Some(id.default_title()),
            total_messages: 0,
            messages: Vec::new(),
        };

        self.kv
            .transact_write(vec![
                TransactWrite::Put {
                    item: conversation.to_item()?,
                    condition: Condition::ItemNotExists,
                },
                TransactWrite::Update(UpdateItem::new(
                    metadata_key(email),
                    vec![UpdateAction::increment(TOTAL_CONVERSATIONS_ATTR, 1)],
                )),
            ])
            .await?;

        info!("Created conversation {} for {}", id, email);
        Ok(id)
    }

    /// Append a message to a conversation.
    ///
    /// The list append, the `updatedAt` bump and the counter increment are a
    /// single update, so `totalMessages` always matches the list length.
    ///
    /// # Errors
    /// Returns [`GatewayError::NotFound`] when the conversation is missing and
    /// the append mode is [`AppendMode::RequireExisting`], or a store error.
    pub async fn append_message(
        &self,
        email: &str,
        conv_id: &str,
        message: NewMessage,
    ) -> GatewayResult<MessageId> {
        require("email", email)?;
        require("conv_id", conv_id)?;

        let id = ConversationId::parse(conv_id);
        let now = now_seconds();
        let message = message.into_message(now);
        let message_id = message.message_id.clone();
        let encoded = serde_json::to_value(&message).map_err(StoreError::from)?;

        let condition = match self.append_mode {
            AppendMode::RequireExisting => Condition::ItemExists,
            AppendMode::Upsert => Condition::None,
        };
        let update = UpdateItem::new(
            id.item_key(email),
            vec![
                UpdateAction::append(MESSAGES_ATTR, vec![encoded]),
                UpdateAction::set(UPDATED_AT_ATTR, now),
                UpdateAction::increment(TOTAL_MESSAGES_ATTR, 1),
            ],
        )
        .with_condition(condition);

        match self.kv.update_item(update).await {
            Ok(_) => {}
            Err(e) if e.is_condition_failed() => return Err(GatewayError::NotFound("Conversation")),
            Err(e) => return Err(e.into()),
        }

        debug!("Appended {} to conversation {} of {}", message_id, id, email);
        Ok(message_id)
    }

    /// Append a text message from the user or the bot.
    ///
    /// # Errors
    /// See [`ConversationGateway::append_message`].
    pub async fn send_message(
        &self,
        email: &str,
        conv_id: &str,
        content: &str,
        is_bot: bool,
    ) -> GatewayResult<MessageId> {
        self.append_message(
            email,
            conv_id,
            NewMessage::text(content, SenderType::from_is_bot(is_bot)),
        )
        .await
    }

    /// Store file bytes and append a file message referencing them.
    ///
    /// A failed object write aborts before any append. If the append fails,
    /// the object is deleted again so no unreferenced file is left behind.
    ///
    /// # Errors
    /// Returns an error if inputs are invalid, the object write fails, or the append fails.
    pub async fn upload_file(
        &self,
        email: &str,
        conv_id: &str,
        filename: &str,
        bytes: Vec<u8>,
    ) -> GatewayResult<UploadReceipt> {
        require("email", email)?;
        require("conv_id", conv_id)?;
        validate_filename(filename)?;

        let id = ConversationId::parse(conv_id);
        let file_key = file_object_key(email, &id, filename);
        let size = bytes.len();

        self.objects
            .put(self.bucket.clone(), file_key.clone(), bytes)
            .await
            .map_err(object_error)?;

        match self
            .append_message(email, id.as_str(), NewMessage::file(filename, file_key.clone()))
            .await
        {
            Ok(message_id) => {
                info!("Uploaded {} ({} bytes) for {}", file_key, size, email);
                Ok(UploadReceipt {
                    file_key,
                    message_id,
                })
            }
            Err(err) => {
                warn!("Append failed after upload of {}: {}; removing object", file_key, err);
                if let Err(cleanup) = self.objects.delete(self.bucket.clone(), file_key.clone()).await {
                    warn!("Failed to remove orphaned object {}: {}", file_key, cleanup);
                }
                Err(err)
            }
        }
    }

    /// Read back an uploaded file.
    ///
    /// # Errors
    /// Returns [`GatewayError::NotFound`] if no such file exists, or a store error.
    pub async fn download_file(
        &self,
        email: &str,
        conv_id: &str,
        filename: &str,
    ) -> GatewayResult<Vec<u8>> {
        require("email", email)?;
        require("conv_id", conv_id)?;
        validate_filename(filename)?;

        let file_key = file_object_key(email, &ConversationId::parse(conv_id), filename);
        self.objects
            .get(self.bucket.clone(), file_key)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    GatewayError::NotFound("File")
                } else {
                    object_error(e)
                }
            })
    }

    /// Fetch one conversation. `conv_id` may carry the `CONV#` prefix.
    ///
    /// # Errors
    /// Returns [`GatewayError::NotFound`] if the record does not exist, or a store error.
    pub async fn get_conversation(&self, email: &str, conv_id: &str) -> GatewayResult<Conversation> {
        require("email", email)?;
        require("conv_id", conv_id)?;

        let id = ConversationId::parse(conv_id);
        debug!("Fetching conversation {} for {}", id, email);

        let item = self
            .kv
            .get_item(id.item_key(email))
            .await?
            .ok_or(GatewayError::NotFound("Conversation"))?;
        Ok(Conversation::from_item(item)?)
    }

    /// All conversations of a user in sort key order; empty if there are none.
    ///
    /// # Errors
    /// Returns an error if `email` is empty or the query fails.
    pub async fn list_conversations(&self, email: &str) -> GatewayResult<Vec<Conversation>> {
        require("email", email)?;

        let items = self
            .kv
            .query(user_partition_key(email), CONVERSATION_PREFIX.to_string())
            .await?;
        debug!("Found {} conversations for {}", items.len(), email);

        items
            .into_iter()
            .map(|item| Conversation::from_item(item).map_err(GatewayError::from))
            .collect()
    }

    /// Delete a conversation and the files its messages reference.
    ///
    /// Deleting a conversation that does not exist succeeds without touching
    /// the user's counter.
    ///
    /// # Errors
    /// Returns an error if inputs are empty or the store write fails.
    pub async fn delete_conversation(&self, email: &str, conv_id: &str) -> GatewayResult<()> {
        require("email", email)?;
        require("conv_id", conv_id)?;

        let id = ConversationId::parse(conv_id);
        let key = id.item_key(email);

        let Some(item) = self.kv.get_item(key.clone()).await? else {
            debug!("Conversation {} of {} already absent", id, email);
            return Ok(());
        };
        // Only records written by `create_conversation` carry `createdAt`
        // and were counted; upserted shells were not.
        let (file_keys, counted): (Vec<String>, bool) = match Conversation::from_item(item) {
            Ok(conversation) => (
                conversation.file_keys().into_iter().map(str::to_string).collect(),
                conversation.created_at.is_some(),
            ),
            Err(e) => {
                warn!("Unreadable conversation {} of {}: {}", id, email, e);
                (Vec::new(), false)
            }
        };

        let mut writes = vec![TransactWrite::Delete {
            key,
            condition: Condition::ItemExists,
        }];
        if counted {
            writes.push(TransactWrite::Update(UpdateItem::new(
                metadata_key(email),
                vec![UpdateAction::increment(TOTAL_CONVERSATIONS_ATTR, -1)],
            )));
        }
        let result = self.kv.transact_write(writes).await;

        match result {
            Ok(()) => info!("Deleted conversation {} of {}", id, email),
            // Removed concurrently; the other delete already adjusted the counter.
            Err(e) if e.is_condition_failed() => {
                debug!("Conversation {} of {} deleted concurrently", id, email);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        for file_key in file_keys {
            if let Err(e) = self.objects.delete(self.bucket.clone(), file_key.clone()).await {
                warn!("Failed to delete file {} of conversation {}: {}", file_key, id, e);
            }
        }

        Ok(())
    }

    /// Per-user counters; a user without a metadata record has zero conversations.
    ///
    /// # Errors
    /// Returns an error if `email` is empty or the read fails.
    pub async fn user_metadata(&self, email: &str) -> GatewayResult<UserMetadata> {
        require("email", email)?;

        let key = metadata_key(email);
        match self.kv.get_item(key.clone()).await? {
            Some(item) => Ok(UserMetadata::from_item(item)?),
            None => Ok(UserMetadata {
                pk: key.pk,
                sk: key.sk,
                total_conversations: 0,
            }),
        }
    }
}

fn now_seconds() -> i64 {
    chrono::Utc::now().timestamp()
}

fn require(field: &str, value: &str) -> GatewayResult<()> {
    if value.trim().is_empty() {
        return Err(GatewayError::invalid_input(format!("{field} must not be empty")));
    }
    Ok(())
}

/// Keys are built from caller input, so a rejected key is the caller's fault.
fn object_error(err: ObjectStoreError) -> GatewayError {
    if err.is_invalid_key() {
        GatewayError::invalid_input(err.to_string())
    } else {
        err.into()
    }
}

/// Filenames become the last segment of an object key.
fn validate_filename(filename: &str) -> GatewayResult<()> {
    require("filename", filename)?;
    if filename == "." || filename == ".." || filename.contains(['/', '\\']) {
        return Err(GatewayError::invalid_input(format!(
            "invalid filename: {filename:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use futures::future::join_all;

    use super::*;
    use crate::conversation::records::MessageType;
    use crate::storage::{
        Item, ItemKey, MemoryKvStore, OpendalObjectStore, SqliteKvStore, StoreFuture, StoreResult,
    };

    const EMAIL: &str = "a@x.com";

    fn gateway_with(
        kv: Arc<dyn KeyValueStore>,
        mode: AppendMode,
    ) -> (ConversationGateway, Arc<OpendalObjectStore>) {
        let objects = Arc::new(OpendalObjectStore::in_memory());
        let gateway = ConversationGateway::new(kv, objects.clone(), "docs", mode);
        (gateway, objects)
    }

    fn gateway() -> ConversationGateway {
        gateway_with(Arc::new(MemoryKvStore::new()), AppendMode::RequireExisting).0
    }

    /// Memory store whose updates fail on demand.
    #[derive(Default)]
    struct FlakyUpdates {
        inner: MemoryKvStore,
        fail_updates: AtomicBool,
    }

    impl KeyValueStore for FlakyUpdates {
        fn get_item(&self, key: ItemKey) -> StoreFuture<'_, StoreResult<Option<Item>>> {
            self.inner.get_item(key)
        }

        fn put_item(&self, item: Item, condition: Condition) -> StoreFuture<'_, StoreResult<()>> {
            self.inner.put_item(item, condition)
        }

        fn update_item(&self, update: UpdateItem) -> StoreFuture<'_, StoreResult<Item>> {
            if self.fail_updates.load(Ordering::SeqCst) {
                return Box::pin(async { Err(StoreError::Backend("throttled".to_string())) });
            }
            self.inner.update_item(update)
        }

        fn query(
            &self,
            partition_key: String,
            sort_key_prefix: String,
        ) -> StoreFuture<'_, StoreResult<Vec<Item>>> {
            self.inner.query(partition_key, sort_key_prefix)
        }

        fn delete_item(&self, key: ItemKey) -> StoreFuture<'_, StoreResult<Option<Item>>> {
            self.inner.delete_item(key)
        }

        fn transact_write(&self, writes: Vec<TransactWrite>) -> StoreFuture<'_, StoreResult<()>> {
            self.inner.transact_write(writes)
        }
    }

    #[tokio::test]
    async fn test_create_send_get_scenario() {
        let gateway = gateway();
        let id = gateway.create_conversation(EMAIL).await.unwrap();

        gateway
            .send_message(EMAIL, id.as_str(), "hello", false)
            .await
            .unwrap();

        let conv = gateway.get_conversation(EMAIL, id.as_str()).await.unwrap();
        assert_eq!(conv.total_messages, 1);
        assert_eq!(conv.messages.len(), 1);
        let message = &conv.messages[0];
        assert_eq!(message.content, "hello");
        assert_eq!(message.sender_type, SenderType::User);
        assert_eq!(message.message_type, MessageType::Text);
        assert!(message.file_key.is_none());
    }

    #[tokio::test]
    async fn test_new_conversation_is_empty_and_prefixed() {
        let gateway = gateway();
        let id = gateway.create_conversation(EMAIL).await.unwrap();

        let conv = gateway.get_conversation(EMAIL, id.as_str()).await.unwrap();
        assert_eq!(conv.sk, format!("CONV#{id}"));
        assert_eq!(conv.pk, "USER#a@x.com");
        assert!(conv.messages.is_empty());
        assert_eq!(conv.total_messages, 0);
        assert_eq!(conv.created_at, conv.updated_at);
        assert_eq!(conv.title, Some(id.default_title()));

        // The prefixed form addresses the same record.
        let prefixed = gateway.get_conversation(EMAIL, &conv.sk).await.unwrap();
        assert_eq!(prefixed, conv);

        let meta = gateway.user_metadata(EMAIL).await.unwrap();
        assert_eq!(meta.total_conversations, 1);
    }

    #[tokio::test]
    async fn test_sent_message_is_last() {
        let gateway = gateway();
        let id = gateway.create_conversation(EMAIL).await.unwrap();
        for text in ["one", "two", "three"] {
            gateway.send_message(EMAIL, id.as_str(), text, false).await.unwrap();
        }
        let bot_id = gateway
            .send_message(EMAIL, id.as_str(), "reply", true)
            .await
            .unwrap();

        let conv = gateway.get_conversation(EMAIL, id.as_str()).await.unwrap();
        let last = conv.messages.last().unwrap();
        assert_eq!(last.message_id, bot_id);
        assert_eq!(last.content, "reply");
        assert_eq!(last.sender_type, SenderType::Bot);
        assert_eq!(conv.total_messages, 4);
        let contents: Vec<_> = conv.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two", "three", "reply"]);
    }

    #[tokio::test]
    async fn test_upload_file_bytes_are_readable_by_file_key() {
        let (gateway, objects) =
            gateway_with(Arc::new(MemoryKvStore::new()), AppendMode::RequireExisting);
        let id = gateway.create_conversation(EMAIL).await.unwrap();
        let bytes = vec![0_u8, 159, 146, 150, 255];

        let receipt = gateway
            .upload_file(EMAIL, id.as_str(), "blob.bin", bytes.clone())
            .await
            .unwrap();
        assert_eq!(receipt.file_key, format!("a@x.com/CONV#{id}/blob.bin"));

        let conv = gateway.get_conversation(EMAIL, id.as_str()).await.unwrap();
        let message = conv.messages.last().unwrap();
        assert_eq!(message.message_id, receipt.message_id);
        assert_eq!(message.message_type, MessageType::File);
        assert_eq!(message.content, "File: blob.bin");

        let key = message.file_key.clone().unwrap();
        let stored = objects.get("docs".to_string(), key).await.unwrap();
        assert_eq!(stored, bytes);

        let downloaded = gateway
            .download_file(EMAIL, id.as_str(), "blob.bin")
            .await
            .unwrap();
        assert_eq!(downloaded, bytes);
    }

    #[tokio::test]
    async fn test_upload_rejects_path_like_filenames() {
        let gateway = gateway();
        let id = gateway.create_conversation(EMAIL).await.unwrap();
        for name in ["", "..", "a/b.txt", "..\\x"] {
            let err = gateway
                .upload_file(EMAIL, id.as_str(), name, vec![1])
                .await
                .unwrap_err();
            assert!(matches!(err, GatewayError::InvalidInput(_)), "{name}");
        }
    }

    #[tokio::test]
    async fn test_failed_append_removes_uploaded_object() {
        let kv = Arc::new(FlakyUpdates::default());
        let (gateway, objects) = gateway_with(kv.clone(), AppendMode::RequireExisting);
        let id = gateway.create_conversation(EMAIL).await.unwrap();

        kv.fail_updates.store(true, Ordering::SeqCst);
        let err = gateway
            .upload_file(EMAIL, id.as_str(), "a.txt", b"data".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Store(_)));

        let key = format!("a@x.com/CONV#{id}/a.txt");
        assert!(objects.get("docs".to_string(), key).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_then_get_is_not_found() {
        let gateway = gateway();
        let id = gateway.create_conversation(EMAIL).await.unwrap();
        gateway.delete_conversation(EMAIL, id.as_str()).await.unwrap();

        let err = gateway.get_conversation(EMAIL, id.as_str()).await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound("Conversation")));
        assert_eq!(gateway.user_metadata(EMAIL).await.unwrap().total_conversations, 0);
    }

    #[tokio::test]
    async fn test_delete_missing_never_drives_counter_negative() {
        let gateway = gateway();
        gateway.delete_conversation(EMAIL, "never-existed").await.unwrap();
        gateway.delete_conversation(EMAIL, "never-existed").await.unwrap();

        assert_eq!(gateway.user_metadata(EMAIL).await.unwrap().total_conversations, 0);
    }

    #[tokio::test]
    async fn test_delete_removes_referenced_files() {
        let (gateway, objects) =
            gateway_with(Arc::new(MemoryKvStore::new()), AppendMode::RequireExisting);
        let id = gateway.create_conversation(EMAIL).await.unwrap();
        let receipt = gateway
            .upload_file(EMAIL, id.as_str(), "a.txt", b"x".to_vec())
            .await
            .unwrap();

        gateway.delete_conversation(EMAIL, id.as_str()).await.unwrap();
        assert!(
            objects
                .get("docs".to_string(), receipt.file_key)
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn test_concurrent_appends_keep_every_message() {
        let gateway = Arc::new(gateway());
        let id = gateway.create_conversation(EMAIL).await.unwrap();

        let sends = (0..10).map(|n| {
            let gateway = Arc::clone(&gateway);
            let id = id.clone();
            tokio::spawn(async move {
                gateway
                    .send_message(EMAIL, id.as_str(), &format!("msg {n}"), false)
                    .await
            })
        });
        for joined in join_all(sends).await {
            joined.unwrap().unwrap();
        }

        let conv = gateway.get_conversation(EMAIL, id.as_str()).await.unwrap();
        assert_eq!(conv.messages.len(), 10);
        assert_eq!(conv.total_messages, 10);
    }

    #[tokio::test]
    async fn test_concurrent_appends_on_sqlite() {
        let kv = Arc::new(
            SqliteKvStore::open_in_memory(SqliteKvStore::DEFAULT_TABLE)
                .await
                .unwrap(),
        );
        let gateway = Arc::new(gateway_with(kv, AppendMode::RequireExisting).0);
        let id = gateway.create_conversation(EMAIL).await.unwrap();

        let sends = (0..10).map(|n| {
            let gateway = Arc::clone(&gateway);
            let id = id.clone();
            async move {
                gateway
                    .send_message(EMAIL, id.as_str(), &n.to_string(), n % 2 == 0)
                    .await
            }
        });
        for sent in join_all(sends).await {
            sent.unwrap();
        }

        let conv = gateway.get_conversation(EMAIL, id.as_str()).await.unwrap();
        assert_eq!(conv.messages.len(), 10);
        assert_eq!(conv.total_messages, 10);
    }

    #[tokio::test]
    async fn test_list_for_unknown_user_is_empty() {
        let gateway = gateway();
        assert!(gateway.list_conversations("nobody@x.com").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_excludes_metadata_and_other_users() {
        let gateway = gateway();
        let first = gateway.create_conversation(EMAIL).await.unwrap();
        let second = gateway.create_conversation(EMAIL).await.unwrap();
        gateway.create_conversation("b@x.com").await.unwrap();

        let listed = gateway.list_conversations(EMAIL).await.unwrap();
        let mut sks: Vec<String> = listed.into_iter().map(|c| c.sk).collect();
        sks.sort();
        let mut expected = vec![first.sort_key(), second.sort_key()];
        expected.sort();
        assert_eq!(sks, expected);
        assert_eq!(gateway.user_metadata(EMAIL).await.unwrap().total_conversations, 2);
    }

    #[tokio::test]
    async fn test_append_to_missing_conversation_require_existing() {
        let gateway = gateway();
        let err = gateway
            .send_message(EMAIL, "ghost", "hi", false)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NotFound("Conversation")));
        assert!(gateway.list_conversations(EMAIL).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_to_missing_conversation_upsert() {
        let (gateway, _) = gateway_with(Arc::new(MemoryKvStore::new()), AppendMode::Upsert);
        gateway.send_message(EMAIL, "ghost", "hi", false).await.unwrap();

        let conv = gateway.get_conversation(EMAIL, "ghost").await.unwrap();
        assert_eq!(conv.total_messages, 1);
        assert!(conv.created_at.is_none());
        assert!(conv.title.is_none());
        // Shells are not counted in the user's metadata.
        assert_eq!(gateway.user_metadata(EMAIL).await.unwrap().total_conversations, 0);
    }

    #[tokio::test]
    async fn test_deleting_upserted_shell_keeps_counter() {
        let (gateway, _) = gateway_with(Arc::new(MemoryKvStore::new()), AppendMode::Upsert);
        let counted = gateway.create_conversation(EMAIL).await.unwrap();
        gateway.send_message(EMAIL, "ghost", "hi", false).await.unwrap();

        gateway.delete_conversation(EMAIL, "ghost").await.unwrap();
        assert!(matches!(
            gateway.get_conversation(EMAIL, "ghost").await,
            Err(GatewayError::NotFound("Conversation"))
        ));
        assert_eq!(gateway.user_metadata(EMAIL).await.unwrap().total_conversations, 1);

        gateway.delete_conversation(EMAIL, counted.as_str()).await.unwrap();
        assert_eq!(gateway.user_metadata(EMAIL).await.unwrap().total_conversations, 0);
    }

    /// Concurrent duplicate deletes mixed with creates must leave the
    /// counter equal to the number of stored conversations.
    async fn assert_counter_tracks_records(gateway: Arc<ConversationGateway>) {
        let mut ids = Vec::new();
        for _ in 0..6 {
            ids.push(gateway.create_conversation(EMAIL).await.unwrap());
        }

        let mut tasks = Vec::new();
        for id in ids.iter().take(3) {
            for _ in 0..3 {
                let gateway = Arc::clone(&gateway);
                let id = id.clone();
                tasks.push(tokio::spawn(async move {
                    gateway.delete_conversation(EMAIL, id.as_str()).await
                }));
            }
            let gateway = Arc::clone(&gateway);
            tasks.push(tokio::spawn(async move {
                gateway.create_conversation(EMAIL).await.map(|_| ())
            }));
        }
        for joined in join_all(tasks).await {
            joined.unwrap().unwrap();
        }

        let records = gateway.list_conversations(EMAIL).await.unwrap().len();
        let counter = gateway.user_metadata(EMAIL).await.unwrap().total_conversations;
        assert_eq!(records, 6);
        assert_eq!(i64::try_from(records).unwrap(), counter);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_deletes_and_creates_keep_counter() {
        assert_counter_tracks_records(Arc::new(gateway())).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_deletes_and_creates_keep_counter_on_sqlite() {
        let kv = Arc::new(
            SqliteKvStore::open_in_memory(SqliteKvStore::DEFAULT_TABLE)
                .await
                .unwrap(),
        );
        assert_counter_tracks_records(Arc::new(
            gateway_with(kv, AppendMode::RequireExisting).0,
        ))
        .await;
    }

    #[tokio::test]
    async fn test_unusable_object_keys_are_invalid_input() {
        let gateway = gateway();
        let err = gateway
            .upload_file(".", "c1", "a.txt", b"x".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidInput(_)));

        let err = gateway
            .download_file("a/..", "c1", "a.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_empty_identifiers_are_rejected() {
        let gateway = gateway();
        assert!(matches!(
            gateway.create_conversation("  ").await,
            Err(GatewayError::InvalidInput(_))
        ));
        assert!(matches!(
            gateway.get_conversation(EMAIL, "").await,
            Err(GatewayError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_download_missing_file() {
        let gateway = gateway();
        let err = gateway
            .download_file(EMAIL, "c1", "nothing.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NotFound("File")));
    }
}
