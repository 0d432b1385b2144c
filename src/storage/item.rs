//! Item model and update semantics shared by every key-value backend.
//!
//! Items are attribute maps addressed by a composite key: a partition key
//! (`PK`) grouping related records and a sort key (`SK`) ordering them inside
//! the partition. Updates are expressed as a list of [`UpdateAction`]s applied
//! to one item as a single unit, so backends only need to guarantee that
//! [`apply_update`] runs under a per-item lock.

use serde_json::{Map, Value};

use crate::storage::errors::{StoreError, StoreResult};

/// Attribute holding the partition key.
pub const PARTITION_KEY_ATTR: &str = "PK";

/// Attribute holding the sort key.
pub const SORT_KEY_ATTR: &str = "SK";

/// A stored record: attribute name to JSON value.
pub type Item = Map<String, Value>;

/// Composite primary key of an item.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemKey {
    /// Partition key.
    pub pk: String,
    /// Sort key.
    pub sk: String,
}

impl ItemKey {
    /// Build a key from its two components.
    #[must_use]
    pub fn new(pk: impl Into<String>, sk: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            sk: sk.into(),
        }
    }

    /// Extract the key attributes from an item.
    ///
    /// # Errors
    /// Returns [`StoreError::InvalidItem`] if either attribute is missing or not a string.
    pub fn from_item(item: &Item) -> StoreResult<Self> {
        let pk = key_attr(item, PARTITION_KEY_ATTR)?;
        let sk = key_attr(item, SORT_KEY_ATTR)?;
        Ok(Self::new(pk, sk))
    }

    /// A fresh item holding only the key attributes.
    #[must_use]
    pub fn to_item(&self) -> Item {
        let mut item = Item::new();
        item.insert(PARTITION_KEY_ATTR.to_string(), Value::String(self.pk.clone()));
        item.insert(SORT_KEY_ATTR.to_string(), Value::String(self.sk.clone()));
        item
    }
}

fn key_attr<'a>(item: &'a Item, name: &str) -> StoreResult<&'a str> {
    match item.get(name) {
        Some(Value::String(value)) if !value.is_empty() => Ok(value),
        Some(_) => Err(StoreError::InvalidItem(format!(
            "{name} must be a non-empty string"
        ))),
        None => Err(StoreError::InvalidItem(format!("missing key attribute {name}"))),
    }
}

/// Existence condition checked atomically with a write.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Condition {
    /// Unconditional write.
    #[default]
    None,
    /// The item must already exist (`attribute_exists(PK)`).
    ItemExists,
    /// The item must not exist yet (`attribute_not_exists(PK)`).
    ItemNotExists,
}

impl Condition {
    /// Check the condition against the current state of `key`.
    ///
    /// # Errors
    /// Returns [`StoreError::ConditionFailed`] when the condition does not hold.
    pub fn check(self, exists: bool, key: &ItemKey) -> StoreResult<()> {
        let holds = match self {
            Self::None => true,
            Self::ItemExists => exists,
            Self::ItemNotExists => !exists,
        };
        if holds {
            Ok(())
        } else {
            Err(StoreError::ConditionFailed {
                pk: key.pk.clone(),
                sk: key.sk.clone(),
            })
        }
    }
}

/// One clause of an update expression.
#[derive(Clone, Debug, PartialEq)]
pub enum UpdateAction {
    /// `SET attribute = value`.
    Set {
        /// Target attribute.
        attribute: String,
        /// New value.
        value: Value,
    },
    /// `SET attribute = list_append(if_not_exists(attribute, []), values)`.
    AppendToList {
        /// Target list attribute.
        attribute: String,
        /// Values appended in order.
        values: Vec<Value>,
    },
    /// `SET attribute = if_not_exists(attribute, 0) + by` (also covers `ADD`).
    Increment {
        /// Target counter attribute.
        attribute: String,
        /// Signed delta.
        by: i64,
    },
}

impl UpdateAction {
    /// Shorthand for [`UpdateAction::Set`].
    #[must_use]
    pub fn set(attribute: &str, value: impl Into<Value>) -> Self {
        Self::Set {
            attribute: attribute.to_string(),
            value: value.into(),
        }
    }

    /// Shorthand for [`UpdateAction::AppendToList`].
    #[must_use]
    pub fn append(attribute: &str, values: Vec<Value>) -> Self {
        Self::AppendToList {
            attribute: attribute.to_string(),
            values,
        }
    }

    /// Shorthand for [`UpdateAction::Increment`].
    #[must_use]
    pub fn increment(attribute: &str, by: i64) -> Self {
        Self::Increment {
            attribute: attribute.to_string(),
            by,
        }
    }

    fn attribute(&self) -> &str {
        match self {
            Self::Set { attribute, .. }
            | Self::AppendToList { attribute, .. }
            | Self::Increment { attribute, .. } => attribute,
        }
    }
}

/// A single-item update request.
#[derive(Clone, Debug, PartialEq)]
pub struct UpdateItem {
    /// Target item.
    pub key: ItemKey,
    /// Clauses applied in order.
    pub actions: Vec<UpdateAction>,
    /// Existence condition.
    pub condition: Condition,
}

impl UpdateItem {
    /// Unconditional update of `key`.
    #[must_use]
    pub const fn new(key: ItemKey, actions: Vec<UpdateAction>) -> Self {
        Self {
            key,
            actions,
            condition: Condition::None,
        }
    }

    /// Attach an existence condition.
    #[must_use]
    pub const fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = condition;
        self
    }
}

/// One write inside an all-or-nothing transaction.
#[derive(Clone, Debug, PartialEq)]
pub enum TransactWrite {
    /// Put a whole item.
    Put {
        /// Item including its key attributes.
        item: Item,
        /// Existence condition.
        condition: Condition,
    },
    /// Update one item.
    Update(UpdateItem),
    /// Delete one item.
    Delete {
        /// Target item.
        key: ItemKey,
        /// Existence condition.
        condition: Condition,
    },
}

impl TransactWrite {
    /// Key of the item this write touches.
    ///
    /// # Errors
    /// Returns an error if a put item lacks key attributes.
    pub fn key(&self) -> StoreResult<ItemKey> {
        match self {
            Self::Put { item, .. } => ItemKey::from_item(item),
            Self::Update(update) => Ok(update.key.clone()),
            Self::Delete { key, .. } => Ok(key.clone()),
        }
    }
}

/// Compute the item produced by `update` on top of `existing`.
///
/// A missing item starts from its key attributes alone, so updates behave as
/// upserts unless the request carries [`Condition::ItemExists`].
///
/// # Errors
/// Returns an error if the condition fails, an action targets a key attribute,
/// or an attribute has an incompatible type.
pub fn apply_update(existing: Option<&Item>, update: &UpdateItem) -> StoreResult<Item> {
    update.condition.check(existing.is_some(), &update.key)?;

    let mut item = existing.cloned().unwrap_or_else(|| update.key.to_item());

    for action in &update.actions {
        let attribute = action.attribute();
        if attribute == PARTITION_KEY_ATTR || attribute == SORT_KEY_ATTR {
            return Err(StoreError::InvalidItem(format!(
                "cannot update key attribute {attribute}"
            )));
        }

        match action {
            UpdateAction::Set { attribute, value } => {
                item.insert(attribute.clone(), value.clone());
            }
            UpdateAction::AppendToList { attribute, values } => {
                let slot = item
                    .entry(attribute.clone())
                    .or_insert_with(|| Value::Array(Vec::new()));
                match slot {
                    Value::Array(list) => list.extend(values.iter().cloned()),
                    _ => {
                        return Err(StoreError::TypeMismatch {
                            attribute: attribute.clone(),
                            expected: "list",
                        });
                    }
                }
            }
            UpdateAction::Increment { attribute, by } => {
                let current = match item.get(attribute) {
                    None | Some(Value::Null) => 0,
                    Some(value) => value.as_i64().ok_or_else(|| StoreError::TypeMismatch {
                        attribute: attribute.clone(),
                        expected: "integer",
                    })?,
                };
                let next = current
                    .checked_add(*by)
                    .ok_or_else(|| StoreError::Overflow(attribute.clone()))?;
                item.insert(attribute.clone(), Value::from(next));
            }
        }
    }

    Ok(item)
}

/// Reject transactions that touch the same item twice.
///
/// # Errors
/// Returns [`StoreError::InvalidItem`] on duplicates or malformed put items.
pub fn transaction_keys(writes: &[TransactWrite]) -> StoreResult<Vec<ItemKey>> {
    let mut keys: Vec<ItemKey> = Vec::with_capacity(writes.len());
    for write in writes {
        let key = write.key()?;
        if keys.contains(&key) {
            return Err(StoreError::InvalidItem(format!(
                "transaction touches {}/{} more than once",
                key.pk, key.sk
            )));
        }
        keys.push(key);
    }
    Ok(keys)
}
