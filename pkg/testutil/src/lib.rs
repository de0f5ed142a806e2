//! Shared helpers for tests: random payloads and temp-backed stores.

use std::sync::Arc;

use rand::RngCore;
use storage::{MemoryStore, RocksdbStore, Store};
use tempdir::TempDir;

/// `n` random bytes
#[must_use]
pub fn rand_bytes(n: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; n];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// A fresh in-memory store
#[must_use]
pub fn open_memory_store() -> Arc<dyn Store> {
    Arc::new(MemoryStore::new())
}

/// A fresh rocksdb store in a temp directory
///
/// The returned [`TempDir`] keeps the directory alive; drop it to clean up.
#[must_use]
pub fn open_rocksdb_store(name: &str) -> (Arc<dyn Store>, TempDir) {
    let dir = TempDir::new(name).expect("creating temp dir");
    let store = RocksdbStore::open(dir.path().join("db")).expect("opening rocksdb");
    (Arc::new(store), dir)
}
