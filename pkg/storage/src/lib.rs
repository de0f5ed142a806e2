//! The key/value contract the balloon trees are built on.
//!
//! All tree state lives in a [`Store`]: a prefixed byte key→value map with
//! range scans, last-key lookup and atomic batch mutations. Trees never
//! write inline — every operation returns [`Mutation`]s which the caller
//! applies in one atomic batch, so a failed append leaves the store
//! untouched.

use std::fmt;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use rocks::RocksdbStore;

mod error;
mod memory;
mod rocks;

/// The tables of the store, distinguished by a single leading prefix byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    /// `eventDigest → version(8) ‖ leafHeight(2)`, one row per unique event
    Index,
    /// `index(8) ‖ height(2) → digest`, frozen history-tree nodes
    HistoryCache,
    /// `index(L/8) ‖ height(2) → digest`, hyper-tree cache-level nodes
    HyperCache,
}

impl Table {
    #[inline]
    #[must_use]
    pub fn prefix(self) -> u8 {
        match self {
            Table::Index => 0x00,
            Table::HistoryCache => 0x01,
            Table::HyperCache => 0x02,
        }
    }
}

/// A key and its stored value, without the table prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KVPair {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl KVPair {
    #[inline]
    #[must_use]
    pub fn new(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self { key, value }
    }
}

/// Whether a [`Mutation`] sets or deletes its key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Set,
    Delete,
}

/// A pending single-key write
///
/// Mutations are the only way state crosses the tree boundary towards
/// persistence. Within one batch they apply in order, so a `Set` after a
/// `Delete` of the same key wins.
#[derive(Clone, PartialEq, Eq)]
pub struct Mutation {
    pub table: Table,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub kind: MutationKind,
}

impl Mutation {
    #[inline]
    #[must_use]
    pub fn set(table: Table, key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            table,
            key,
            value,
            kind: MutationKind::Set,
        }
    }

    #[inline]
    #[must_use]
    pub fn delete(table: Table, key: Vec<u8>) -> Self {
        Self {
            table,
            key,
            value: Vec::new(),
            kind: MutationKind::Delete,
        }
    }
}

impl fmt::Debug for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutation")
            .field("table", &self.table)
            .field("key", &hex::encode(&self.key))
            .field("value", &hex::encode(&self.value))
            .field("kind", &self.kind)
            .finish()
    }
}

/// A batched reader over every pair of one table, in key order
pub trait KVPairReader {
    /// Pull up to `max` pairs; an empty vector means the table is exhausted
    fn read(&mut self, max: usize) -> Result<Vec<KVPair>, StoreError>;
}

/// The store contract consumed by the balloon trees
pub trait Store: Send + Sync {
    /// Point lookup; [`StoreError::KeyNotFound`] if the key is absent
    fn get(&self, table: Table, key: &[u8]) -> Result<KVPair, StoreError>;

    /// Every pair with `start ≤ key ≤ end`, sorted ascending by key
    fn get_range(&self, table: Table, start: &[u8], end: &[u8])
        -> Result<Vec<KVPair>, StoreError>;

    /// The pair with the lexicographically largest key in the table
    fn get_last(&self, table: Table) -> Result<KVPair, StoreError>;

    /// A batched reader over the whole table
    fn get_all<'a>(&'a self, table: Table) -> Box<dyn KVPairReader + 'a>;

    /// Apply `mutations` atomically, in order
    fn mutate(&self, mutations: &[Mutation]) -> Result<(), StoreError>;

    /// Remove one key outside any batch
    fn delete(&self, table: Table, key: &[u8]) -> Result<(), StoreError>;
}
