//! `SQLite`-backed key-value store.
//!
//! Items are stored as JSON bodies keyed by `(pk, sk)`. Every write runs in a
//! `SQLite` transaction on the single connection thread owned by
//! `tokio-rusqlite`, which serializes concurrent writers.

use std::path::Path;
use std::sync::Arc;

use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

use crate::storage::errors::{StoreError, StoreResult};
use crate::storage::item::{
    Condition, Item, ItemKey, TransactWrite, UpdateItem, apply_update, transaction_keys,
};
use crate::storage::kv_store::{KeyValueStore, StoreFuture};

/// `SQLite` implementation of [`KeyValueStore`].
pub struct SqliteKvStore {
    conn: Arc<Connection>,
    table: String,
}

impl SqliteKvStore {
    /// Table name used when none is configured.
    pub const DEFAULT_TABLE: &'static str = "ChatAppConversations";

    /// Open (or create) a database file.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or the table cannot be created.
    pub async fn open(path: impl AsRef<Path>, table: &str) -> StoreResult<Self> {
        let conn = Connection::open(path.as_ref()).await?;
        Self::new(Arc::new(conn), table).await
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    /// Returns an error if the table cannot be created.
    pub async fn open_in_memory(table: &str) -> StoreResult<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::new(Arc::new(conn), table).await
    }

    /// Initialize the store on an existing connection and create the table if needed.
    ///
    /// # Errors
    /// Returns an error if the table name is invalid or database operations fail.
    pub async fn new(conn: Arc<Connection>, table: &str) -> StoreResult<Self> {
        if !is_valid_table_name(table) {
            return Err(StoreError::InvalidItem(format!("invalid table name: {table}")));
        }
        let table = table.to_string();
        let table_name = table.clone();

        conn.call(move |conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS \"{table_name}\" (
                    pk TEXT NOT NULL,
                    sk TEXT NOT NULL,
                    body TEXT NOT NULL,
                    PRIMARY KEY (pk, sk)
                ) WITHOUT ROWID;"
            ))?;
            Ok(())
        })
        .await?;

        Ok(Self { conn, table })
    }
}

/// Table names are interpolated into SQL, so only plain identifiers are allowed.
#[must_use]
pub fn is_valid_table_name(table: &str) -> bool {
    !table.is_empty()
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn abort(err: StoreError) -> tokio_rusqlite::Error {
    tokio_rusqlite::Error::Other(Box::new(err))
}

fn decode(body: &str) -> tokio_rusqlite::Result<Item> {
    serde_json::from_str(body).map_err(|e| abort(e.into()))
}

fn select(
    conn: &rusqlite::Connection,
    table: &str,
    key: &ItemKey,
) -> tokio_rusqlite::Result<Option<Item>> {
    let body: Option<String> = conn
        .query_row(
            &format!("SELECT body FROM \"{table}\" WHERE pk = ?1 AND sk = ?2"),
            rusqlite::params![key.pk, key.sk],
            |row| row.get(0),
        )
        .optional()?;
    body.as_deref().map(decode).transpose()
}

fn upsert(
    conn: &rusqlite::Connection,
    table: &str,
    key: &ItemKey,
    item: &Item,
) -> tokio_rusqlite::Result<()> {
    let body = serde_json::to_string(item).map_err(|e| abort(e.into()))?;
    conn.execute(
        &format!("INSERT OR REPLACE INTO \"{table}\" (pk, sk, body) VALUES (?1, ?2, ?3)"),
        rusqlite::params![key.pk, key.sk, body],
    )?;
    Ok(())
}

fn remove(conn: &rusqlite::Connection, table: &str, key: &ItemKey) -> tokio_rusqlite::Result<()> {
    conn.execute(
        &format!("DELETE FROM \"{table}\" WHERE pk = ?1 AND sk = ?2"),
        rusqlite::params![key.pk, key.sk],
    )?;
    Ok(())
}

fn apply_write(
    conn: &rusqlite::Connection,
    table: &str,
    key: &ItemKey,
    write: &TransactWrite,
) -> tokio_rusqlite::Result<()> {
    let existing = select(conn, table, key)?;
    match write {
        TransactWrite::Put { item, condition } => {
            condition
                .check(existing.is_some(), key)
                .map_err(abort)?;
            upsert(conn, table, key, item)
        }
        TransactWrite::Update(update) => {
            let next = apply_update(existing.as_ref(), update).map_err(abort)?;
            upsert(conn, table, key, &next)
        }
        TransactWrite::Delete { condition, .. } => {
            condition
                .check(existing.is_some(), key)
                .map_err(abort)?;
            remove(conn, table, key)
        }
    }
}

impl KeyValueStore for SqliteKvStore {
    fn get_item(&self, key: ItemKey) -> StoreFuture<'_, StoreResult<Option<Item>>> {
        Box::pin(async move {
            let table = self.table.clone();
            let item = self
                .conn
                .call(move |conn| select(conn, &table, &key))
                .await?;
            Ok(item)
        })
    }

    fn put_item(&self, item: Item, condition: Condition) -> StoreFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            let key = ItemKey::from_item(&item)?;
            let table = self.table.clone();
            self.conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    apply_write(&tx, &table, &key, &TransactWrite::Put { item, condition })?;
                    tx.commit()?;
                    Ok(())
                })
                .await?;
            Ok(())
        })
    }

    fn update_item(&self, update: UpdateItem) -> StoreFuture<'_, StoreResult<Item>> {
        Box::pin(async move {
            let table = self.table.clone();
            let item = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    let existing = select(&tx, &table, &update.key)?;
                    let next = apply_update(existing.as_ref(), &update).map_err(abort)?;
                    upsert(&tx, &table, &update.key, &next)?;
                    tx.commit()?;
                    Ok(next)
                })
                .await?;
            Ok(item)
        })
    }

    fn query(
        &self,
        partition_key: String,
        sort_key_prefix: String,
    ) -> StoreFuture<'_, StoreResult<Vec<Item>>> {
        Box::pin(async move {
            let table = self.table.clone();
            let items = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT body FROM \"{table}\"
                         WHERE pk = ?1 AND substr(sk, 1, length(?2)) = ?2
                         ORDER BY sk"
                    ))?;
                    let bodies = stmt
                        .query_map(rusqlite::params![partition_key, sort_key_prefix], |row| {
                            row.get::<_, String>(0)
                        })?
                        .collect::<Result<Vec<_>, _>>()?;
                    bodies.iter().map(|body| decode(body)).collect()
                })
                .await?;
            Ok(items)
        })
    }

    fn delete_item(&self, key: ItemKey) -> StoreFuture<'_, StoreResult<Option<Item>>> {
        Box::pin(async move {
            let table = self.table.clone();
            let removed = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    let existing = select(&tx, &table, &key)?;
                    if existing.is_some() {
                        remove(&tx, &table, &key)?;
                    }
                    tx.commit()?;
                    Ok(existing)
                })
                .await?;
            Ok(removed)
        })
    }

    fn transact_write(&self, writes: Vec<TransactWrite>) -> StoreFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            let keys = transaction_keys(&writes)?;
            let table = self.table.clone();
            self.conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    for (write, key) in writes.iter().zip(&keys) {
                        apply_write(&tx, &table, key, write)?;
                    }
                    tx.commit()?;
                    Ok(())
                })
                .await?;
            Ok(())
        })
    }
}
