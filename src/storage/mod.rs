//! Storage collaborators of the conversation gateway.
//!
//! - `item`: item model, update expressions and their shared semantics
//! - `kv_store`: the key-value store trait
//! - `memory_kv` / `sqlite_kv`: key-value backends
//! - `object_store`: byte storage for uploaded files

pub mod errors;
pub mod item;
pub mod kv_store;
pub mod memory_kv;
pub mod object_store;
pub mod sqlite_kv;

pub use errors::{ObjectResult, ObjectStoreError, StoreError, StoreResult};
pub use item::{
    Condition, Item, ItemKey, PARTITION_KEY_ATTR, SORT_KEY_ATTR, TransactWrite, UpdateAction,
    UpdateItem, apply_update,
};
pub use kv_store::{KeyValueStore, StoreFuture};
pub use memory_kv::MemoryKvStore;
pub use object_store::{ObjectBackendConfig, ObjectStore, OpendalObjectStore};
pub use sqlite_kv::SqliteKvStore;
