use std::path::Path;

use rocksdb::{BlockBasedOptions, DBIteratorWithThreadMode, Direction, IteratorMode, Options,
    WriteBatch, DB};

use crate::{KVPair, KVPairReader, Mutation, MutationKind, Store, StoreError, Table};

// Longer than any real key (prefix byte + 32-byte digest + 2-byte height),
// so seeking backwards from it lands on the last key of the table.
const SEEK_PAST_TABLE: usize = 64;

/// The production [`Store`]: a rocksdb database with one keyspace, tables
/// separated by their prefix byte
pub struct RocksdbStore {
    db: DB,
}

impl RocksdbStore {
    /// Open (or create) a database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.increase_parallelism(4);

        let mut block_opts = BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);

        let db = DB::open(&opts, path)?;
        Ok(Self { db })
    }
}

fn full_key(table: Table, key: &[u8]) -> Vec<u8> {
    let mut k = Vec::with_capacity(key.len() + 1);
    k.push(table.prefix());
    k.extend_from_slice(key);
    k
}

impl Store for RocksdbStore {
    fn get(&self, table: Table, key: &[u8]) -> Result<KVPair, StoreError> {
        match self.db.get(full_key(table, key))? {
            Some(value) => Ok(KVPair::new(key.to_vec(), value)),
            None => Err(StoreError::KeyNotFound),
        }
    }

    fn get_range(
        &self,
        table: Table,
        start: &[u8],
        end: &[u8],
    ) -> Result<Vec<KVPair>, StoreError> {
        let start_key = full_key(table, start);
        let end_key = full_key(table, end);

        let mut result = Vec::new();
        let iter = self
            .db
            .iterator(IteratorMode::From(&start_key, Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if key.as_ref() > end_key.as_slice() {
                break;
            }
            result.push(KVPair::new(key[1..].to_vec(), value.to_vec()));
        }
        Ok(result)
    }

    fn get_last(&self, table: Table) -> Result<KVPair, StoreError> {
        let mut upper = vec![table.prefix()];
        upper.extend_from_slice(&[0xff; SEEK_PAST_TABLE]);

        let mut iter = self
            .db
            .iterator(IteratorMode::From(&upper, Direction::Reverse));
        match iter.next() {
            Some(item) => {
                let (key, value) = item?;
                if key.first() == Some(&table.prefix()) {
                    Ok(KVPair::new(key[1..].to_vec(), value.to_vec()))
                } else {
                    Err(StoreError::KeyNotFound)
                }
            }
            None => Err(StoreError::KeyNotFound),
        }
    }

    fn get_all<'a>(&'a self, table: Table) -> Box<dyn KVPairReader + 'a> {
        let lower = vec![table.prefix()];
        let iter = self
            .db
            .iterator(IteratorMode::From(&lower, Direction::Forward));
        Box::new(RocksReader {
            prefix: table.prefix(),
            iter,
            done: false,
        })
    }

    fn mutate(&self, mutations: &[Mutation]) -> Result<(), StoreError> {
        let mut batch = WriteBatch::default();
        for m in mutations {
            let key = full_key(m.table, &m.key);
            match m.kind {
                MutationKind::Set => batch.put(key, &m.value),
                MutationKind::Delete => batch.delete(key),
            }
        }
        self.db.write(batch)?;
        Ok(())
    }

    fn delete(&self, table: Table, key: &[u8]) -> Result<(), StoreError> {
        self.db.delete(full_key(table, key))?;
        Ok(())
    }
}

struct RocksReader<'a> {
    prefix: u8,
    iter: DBIteratorWithThreadMode<'a, DB>,
    done: bool,
}

impl KVPairReader for RocksReader<'_> {
    fn read(&mut self, max: usize) -> Result<Vec<KVPair>, StoreError> {
        let mut batch = Vec::with_capacity(max.min(1024));
        if self.done {
            return Ok(batch);
        }
        while batch.len() < max {
            match self.iter.next() {
                Some(item) => {
                    let (key, value) = item?;
                    if key.first() != Some(&self.prefix) {
                        self.done = true;
                        break;
                    }
                    batch.push(KVPair::new(key[1..].to_vec(), value.to_vec()));
                }
                None => {
                    self.done = true;
                    break;
                }
            }
        }
        Ok(batch)
    }
}
