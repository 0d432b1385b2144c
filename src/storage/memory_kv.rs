//! In-process key-value store backed by `DashMap`.

use std::collections::BTreeMap;

use dashmap::DashMap;

use crate::storage::errors::{StoreError, StoreResult};
use crate::storage::item::{
    Condition, Item, ItemKey, TransactWrite, UpdateItem, apply_update, transaction_keys,
};
use crate::storage::kv_store::{KeyValueStore, StoreFuture};

type Partition = BTreeMap<String, Item>;

/// Thread-safe in-memory store.
///
/// Items are grouped by partition key; holding a partition's shard lock for
/// the whole read-modify-write makes each write atomic. Transactions are
/// limited to a single partition. Empty partitions are never kept.
#[derive(Default)]
pub struct MemoryKvStore {
    partitions: DashMap<String, Partition>,
}

impl MemoryKvStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.partitions.iter().map(|p| p.value().len()).sum()
    }

    /// Whether the store holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// Run `f` under the lock of partition `pk`, then drop the partition if
    /// `f` left it empty (a rejected write or the last item deleted).
    fn with_partition<T>(
        &self,
        pk: &str,
        f: impl FnOnce(&mut Partition) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let result = {
            let mut partition = self.partitions.entry(pk.to_string()).or_default();
            f(partition.value_mut())
        };
        self.partitions.remove_if(pk, |_, partition| partition.is_empty());
        result
    }

    fn put(&self, item: Item, condition: Condition) -> StoreResult<()> {
        let key = ItemKey::from_item(&item)?;
        self.with_partition(&key.pk, |partition| {
            condition.check(partition.contains_key(&key.sk), &key)?;
            partition.insert(key.sk.clone(), item);
            Ok(())
        })
    }

    fn update(&self, update: &UpdateItem) -> StoreResult<Item> {
        self.with_partition(&update.key.pk, |partition| {
            let next = apply_update(partition.get(&update.key.sk), update)?;
            partition.insert(update.key.sk.clone(), next.clone());
            Ok(next)
        })
    }

    fn transact(&self, writes: Vec<TransactWrite>) -> StoreResult<()> {
        let keys = transaction_keys(&writes)?;
        let Some(first) = keys.first() else {
            return Ok(());
        };
        if keys.iter().any(|k| k.pk != first.pk) {
            return Err(StoreError::InvalidItem(
                "in-memory transactions must target a single partition".to_string(),
            ));
        }

        let pk = first.pk.clone();

        self.with_partition(&pk, |partition| {
            // Validate and compute everything before touching the partition.
            let mut staged: Vec<(String, Option<Item>)> = Vec::with_capacity(writes.len());
            for (write, key) in writes.into_iter().zip(keys) {
                let existing = partition.get(&key.sk);
                match write {
                    TransactWrite::Put { item, condition } => {
                        condition.check(existing.is_some(), &key)?;
                        staged.push((key.sk, Some(item)));
                    }
                    TransactWrite::Update(update) => {
                        let next = apply_update(existing, &update)?;
                        staged.push((key.sk, Some(next)));
                    }
                    TransactWrite::Delete { condition, .. } => {
                        condition.check(existing.is_some(), &key)?;
                        staged.push((key.sk, None));
                    }
                }
            }

            for (sk, item) in staged {
                match item {
                    Some(item) => {
                        partition.insert(sk, item);
                    }
                    None => {
                        partition.remove(&sk);
                    }
                }
            }
            Ok(())
        })
    }
}

impl KeyValueStore for MemoryKvStore {
    fn get_item(&self, key: ItemKey) -> StoreFuture<'_, StoreResult<Option<Item>>> {
        Box::pin(async move {
            Ok(self
                .partitions
                .get(&key.pk)
                .and_then(|partition| partition.get(&key.sk).cloned()))
        })
    }

    fn put_item(&self, item: Item, condition: Condition) -> StoreFuture<'_, StoreResult<()>> {
        Box::pin(async move { self.put(item, condition) })
    }

    fn update_item(&self, update: UpdateItem) -> StoreFuture<'_, StoreResult<Item>> {
        Box::pin(async move { self.update(&update) })
    }

    fn query(
        &self,
        partition_key: String,
        sort_key_prefix: String,
    ) -> StoreFuture<'_, StoreResult<Vec<Item>>> {
        Box::pin(async move {
            Ok(self
                .partitions
                .get(&partition_key)
                .map(|partition| {
                    partition
                        .iter()
                        .filter(|(sk, _)| sk.starts_with(&sort_key_prefix))
                        .map(|(_, item)| item.clone())
                        .collect()
                })
                .unwrap_or_default())
        })
    }

    fn delete_item(&self, key: ItemKey) -> StoreFuture<'_, StoreResult<Option<Item>>> {
        Box::pin(async move {
            if !self.partitions.contains_key(&key.pk) {
                return Ok(None);
            }
            self.with_partition(&key.pk, |partition| Ok(partition.remove(&key.sk)))
        })
    }

    fn transact_write(&self, writes: Vec<TransactWrite>) -> StoreFuture<'_, StoreResult<()>> {
        Box::pin(async move { self.transact(writes) })
    }
}
