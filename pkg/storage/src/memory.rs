use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::{KVPair, KVPairReader, Mutation, MutationKind, Store, StoreError, Table};

/// An ordered in-memory [`Store`], used by unit tests and small deployments
///
/// Keys of all tables share one map, each prefixed with its table byte, so
/// iteration order matches the on-disk stores byte for byte.
#[derive(Debug, Default)]
pub struct MemoryStore {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

fn full_key(table: Table, key: &[u8]) -> Vec<u8> {
    let mut k = Vec::with_capacity(key.len() + 1);
    k.push(table.prefix());
    k.extend_from_slice(key);
    k
}

impl MemoryStore {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn get(&self, table: Table, key: &[u8]) -> Result<KVPair, StoreError> {
        let map = self.map.read();
        match map.get(&full_key(table, key)) {
            Some(value) => Ok(KVPair::new(key.to_vec(), value.clone())),
            None => Err(StoreError::KeyNotFound),
        }
    }

    fn get_range(
        &self,
        table: Table,
        start: &[u8],
        end: &[u8],
    ) -> Result<Vec<KVPair>, StoreError> {
        let map = self.map.read();
        let range = full_key(table, start)..=full_key(table, end);
        Ok(map
            .range(range)
            .map(|(k, v)| KVPair::new(k[1..].to_vec(), v.clone()))
            .collect())
    }

    fn get_last(&self, table: Table) -> Result<KVPair, StoreError> {
        let map = self.map.read();
        let lower = vec![table.prefix()];
        map.range(lower..)
            .take_while(|(k, _)| k[0] == table.prefix())
            .next_back()
            .map(|(k, v)| KVPair::new(k[1..].to_vec(), v.clone()))
            .ok_or(StoreError::KeyNotFound)
    }

    fn get_all<'a>(&'a self, table: Table) -> Box<dyn KVPairReader + 'a> {
        // Snapshot the table so the reader does not hold the lock across
        // read calls.
        let map = self.map.read();
        let lower = vec![table.prefix()];
        let pairs = map
            .range(lower..)
            .take_while(|(k, _)| k[0] == table.prefix())
            .map(|(k, v)| KVPair::new(k[1..].to_vec(), v.clone()))
            .collect();
        Box::new(SnapshotReader { pairs, next: 0 })
    }

    fn mutate(&self, mutations: &[Mutation]) -> Result<(), StoreError> {
        let mut map = self.map.write();
        for m in mutations {
            let key = full_key(m.table, &m.key);
            match m.kind {
                MutationKind::Set => {
                    map.insert(key, m.value.clone());
                }
                MutationKind::Delete => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn delete(&self, table: Table, key: &[u8]) -> Result<(), StoreError> {
        self.map.write().remove(&full_key(table, key));
        Ok(())
    }
}

struct SnapshotReader {
    pairs: Vec<KVPair>,
    next: usize,
}

impl KVPairReader for SnapshotReader {
    fn read(&mut self, max: usize) -> Result<Vec<KVPair>, StoreError> {
        let end = self.next.saturating_add(max).min(self.pairs.len());
        let batch = self.pairs[self.next..end].to_vec();
        self.next = end;
        Ok(batch)
    }
}
