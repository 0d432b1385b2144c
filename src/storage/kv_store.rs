//! Key-value store abstraction.

use std::future::Future;
use std::pin::Pin;

use crate::storage::errors::StoreResult;
use crate::storage::item::{Condition, Item, ItemKey, TransactWrite, UpdateItem};

/// Boxed future type for store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Partition/sort-key item store.
///
/// Every single-item write is atomic with respect to other writes on the
/// same item; `transact_write` extends that to a group of items.
pub trait KeyValueStore: Send + Sync {
    /// Fetch one item.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn get_item(&self, key: ItemKey) -> StoreFuture<'_, StoreResult<Option<Item>>>;

    /// Write a whole item, replacing any existing one.
    ///
    /// # Errors
    /// Returns an error if the item has no key, the condition fails, or storage access fails.
    fn put_item(&self, item: Item, condition: Condition) -> StoreFuture<'_, StoreResult<()>>;

    /// Apply an update expression and return the resulting item.
    ///
    /// # Errors
    /// Returns an error if the condition fails, an action is invalid, or storage access fails.
    fn update_item(&self, update: UpdateItem) -> StoreFuture<'_, StoreResult<Item>>;

    /// All items of a partition whose sort key starts with `sort_key_prefix`,
    /// in ascending sort key order.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn query(
        &self,
        partition_key: String,
        sort_key_prefix: String,
    ) -> StoreFuture<'_, StoreResult<Vec<Item>>>;

    /// Delete one item and return it if it existed.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn delete_item(&self, key: ItemKey) -> StoreFuture<'_, StoreResult<Option<Item>>>;

    /// Apply several writes as one all-or-nothing unit.
    ///
    /// # Errors
    /// Returns an error (and applies nothing) if any write fails.
    fn transact_write(&self, writes: Vec<TransactWrite>) -> StoreFuture<'_, StoreResult<()>>;
}
