use std::num::NonZeroUsize;
use std::sync::Arc;

use hashing::{Digest, Hasher};
use lru::LruCache;
use parking_lot::Mutex;
use storage::{Mutation, Store, Table};
use tracing::debug;

use crate::{default_hashes, error::Error, AuditPath};

use super::position::HistoryPosition;
use super::proof::{ConsistencyProof, HistoryProof};

/// A persistent, append-only Merkle tree over versioned event digests
///
/// State lives in the store's `HistoryCache` table; the tree object itself
/// holds only the hasher, precomputed default hashes and a small LRU of
/// recently frozen digests, so reopening a tree over an existing store
/// needs no recovery work.
pub struct HistoryTree<H: Hasher> {
    hasher: H,
    store: Arc<dyn Store>,
    defaults: Vec<Digest>,
    cache: Mutex<LruCache<HistoryPosition, Digest>>,
}

impl<H: Hasher> HistoryTree<H> {
    /// `cache_entries` bounds the in-memory LRU of frozen digests; ~300 is
    /// plenty, since appends only revisit the recent right edge of the tree
    pub fn new(hasher: H, store: Arc<dyn Store>, cache_entries: usize) -> Self {
        let defaults = default_hashes(&hasher, 64);
        let capacity = NonZeroUsize::new(cache_entries.max(1)).unwrap();
        Self {
            hasher,
            store,
            defaults,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Append `event_digest` as the leaf for `version`
    ///
    /// Returns the new root digest and one mutation per newly frozen node
    /// (always at least the leaf itself). Nothing is written here; the
    /// caller applies the mutations atomically.
    pub fn add(
        &mut self,
        event_digest: &Digest,
        version: u64,
    ) -> Result<(Digest, Vec<Mutation>), Error> {
        let mut mutations = Vec::new();
        let root = self.grow(
            HistoryPosition::root(version),
            event_digest,
            version,
            &mut mutations,
        )?;
        debug!(version, frozen = mutations.len(), "appended history leaf");
        Ok((root, mutations))
    }

    /// The audit path proving that leaf `index` is committed by the root at
    /// `version`
    pub fn prove_membership(
        &self,
        index: u64,
        version: u64,
    ) -> Result<HistoryProof<H>, Error> {
        if index > version {
            return Err(Error::VersionOutOfRange {
                version: index,
                current: version,
            });
        }

        let mut audit_path = AuditPath::new();
        let mut pos = HistoryPosition::root(version);
        while pos.height > 0 {
            let right = pos.right_child();
            let (next, sibling) = if index < right.index {
                (pos.left_child(), right)
            } else {
                (right, pos.left_child())
            };
            self.collect(sibling, version, &mut audit_path)?;
            pos = next;
        }
        debug!(index, version, siblings = audit_path.len(), "proved membership");

        Ok(HistoryProof::new(
            index,
            version,
            audit_path,
            self.hasher.clone(),
        ))
    }

    /// The minimal set of digests from which both the root at `start` and
    /// the root at `end` can be reconstructed
    pub fn prove_consistency(
        &self,
        start: u64,
        end: u64,
    ) -> Result<ConsistencyProof<H>, Error> {
        if start > end {
            return Err(Error::VersionOutOfRange {
                version: start,
                current: end,
            });
        }

        let mut audit_path = AuditPath::new();
        self.collect_incremental(HistoryPosition::root(end), start, end, &mut audit_path)?;
        debug!(start, end, entries = audit_path.len(), "proved consistency");

        Ok(ConsistencyProof::new(
            start,
            end,
            audit_path,
            self.hasher.clone(),
        ))
    }

    /// Release the in-memory working set; the store remains authoritative
    pub fn close(&mut self) {
        self.cache.lock().clear();
    }

    /// Digest of `pos` at `version`, freezing nodes filled by this append
    fn grow(
        &self,
        pos: HistoryPosition,
        event_digest: &Digest,
        version: u64,
        mutations: &mut Vec<Mutation>,
    ) -> Result<Digest, Error> {
        // filled by an earlier append, digest already persisted
        if pos.last_leaf() < u128::from(version) {
            return self.frozen(pos);
        }

        let digest = if pos.height == 0 {
            self.hasher.digest(&[event_digest.as_bytes()])
        } else {
            let left = self.grow(pos.left_child(), event_digest, version, mutations)?;
            let right_pos = pos.right_child();
            let right = if right_pos.is_empty_at(version) {
                self.defaults[right_pos.height as usize].clone()
            } else {
                self.grow(right_pos, event_digest, version, mutations)?
            };
            self.hasher
                .digest(&[left.as_bytes(), right.as_bytes()])
        };

        if pos.last_leaf() == u128::from(version) {
            // this append completed the subtree
            mutations.push(Mutation::set(
                Table::HistoryCache,
                pos.bytes(),
                digest.as_bytes().to_vec(),
            ));
            self.cache.lock().put(pos, digest.clone());
        }

        Ok(digest)
    }

    /// Emit the minimal frozen decomposition of the subtree at `pos`
    fn collect(
        &self,
        pos: HistoryPosition,
        version: u64,
        path: &mut AuditPath,
    ) -> Result<(), Error> {
        if pos.is_empty_at(version) {
            return Ok(());
        }
        if pos.is_frozen_at(version) {
            path.insert(pos.id(), self.frozen(pos)?);
            return Ok(());
        }
        self.collect(pos.left_child(), version, path)?;
        self.collect(pos.right_child(), version, path)
    }

    /// Like [`Self::collect`], but descends through the path to leaf
    /// `start` so the emitted digests also reconstruct the root at `start`
    fn collect_incremental(
        &self,
        pos: HistoryPosition,
        start: u64,
        end: u64,
        path: &mut AuditPath,
    ) -> Result<(), Error> {
        if pos.is_empty_at(end) {
            return Ok(());
        }
        if pos.contains(start) && pos.height > 0 {
            self.collect_incremental(pos.left_child(), start, end, path)?;
            return self.collect_incremental(pos.right_child(), start, end, path);
        }
        if pos.contains(start) || pos.is_frozen_at(end) {
            path.insert(pos.id(), self.frozen(pos)?);
            return Ok(());
        }
        self.collect_incremental(pos.left_child(), start, end, path)?;
        self.collect_incremental(pos.right_child(), start, end, path)
    }

    /// A frozen digest, from the LRU or the store
    fn frozen(&self, pos: HistoryPosition) -> Result<Digest, Error> {
        if let Some(digest) = self.cache.lock().get(&pos) {
            return Ok(digest.clone());
        }
        let pair = self.store.get(Table::HistoryCache, &pos.bytes())?;
        let digest = Digest::new(pair.value);
        self.cache.lock().put(pos, digest.clone());
        Ok(digest)
    }
}

#[cfg(test)]
mod tests {
    use hashing::XorHasher;
    use testutil::open_memory_store;

    use super::*;

    fn digest(byte: u8) -> Digest {
        Digest::new(vec![byte])
    }

    fn path(entries: &[(&str, u8)]) -> AuditPath {
        entries
            .iter()
            .map(|(id, byte)| (id.to_string(), digest(*byte)))
            .collect()
    }

    fn new_tree() -> (HistoryTree<XorHasher>, Arc<dyn Store>) {
        let store = open_memory_store();
        let tree = HistoryTree::new(XorHasher::new(), Arc::clone(&store), 30);
        (tree, store)
    }

    #[test]
    fn add_roots_and_mutation_counts() {
        // (event, expected root, expected number of newly frozen nodes)
        let cases: [(u8, u8, usize); 10] = [
            (0x0, 0x0, 1),
            (0x1, 0x1, 2),
            (0x2, 0x3, 1),
            (0x3, 0x0, 3),
            (0x4, 0x4, 1),
            (0x5, 0x1, 2),
            (0x6, 0x7, 1),
            (0x7, 0x0, 4),
            (0x8, 0x8, 1),
            (0x9, 0x1, 2),
        ];

        let (mut tree, store) = new_tree();
        for (i, (event, root, frozen)) in cases.into_iter().enumerate() {
            let (root_hash, mutations) = tree.add(&digest(event), i as u64).unwrap();
            assert_eq!(root_hash, digest(root), "root mismatch at version {i}");
            assert_eq!(mutations.len(), frozen, "mutations mismatch at version {i}");
            store.mutate(&mutations).unwrap();
        }
    }

    #[test]
    fn prove_membership_audit_paths() {
        let events: [u8; 10] = [0x0, 0x1, 0x2, 0x3, 0x4, 0x5, 0x6, 0x7, 0x8, 0x9];

        let (mut tree, store) = new_tree();
        for (i, event) in events.into_iter().enumerate() {
            let (_, mutations) = tree.add(&digest(event), i as u64).unwrap();
            store.mutate(&mutations).unwrap();
        }

        let cases: [(u64, u64, AuditPath); 12] = [
            (0, 0, path(&[])),
            (1, 1, path(&[("0|0", 0x0)])),
            (2, 2, path(&[("0|1", 0x1)])),
            (3, 3, path(&[("0|1", 0x1), ("2|0", 0x2)])),
            (4, 4, path(&[("0|2", 0x0)])),
            (5, 5, path(&[("0|2", 0x0), ("4|0", 0x4)])),
            (6, 6, path(&[("0|2", 0x0), ("4|1", 0x1)])),
            (7, 7, path(&[("0|2", 0x0), ("4|1", 0x1), ("6|0", 0x6)])),
            (0, 1, path(&[("1|0", 0x1)])),
            (0, 2, path(&[("1|0", 0x1), ("2|0", 0x2)])),
            (0, 5, path(&[("1|0", 0x1), ("2|1", 0x1), ("4|1", 0x1)])),
            (0, 7, path(&[("1|0", 0x1), ("2|1", 0x1), ("4|2", 0x0)])),
        ];

        for (index, version, expected) in cases {
            let proof = tree.prove_membership(index, version).unwrap();
            assert_eq!(
                proof.audit_path, expected,
                "audit path mismatch for index {index} at version {version}"
            );
            assert_eq!(proof.index, index);
            assert_eq!(proof.version, version);
        }
    }

    #[test]
    fn prove_membership_rejects_future_leaf() {
        let (mut tree, store) = new_tree();
        let (_, mutations) = tree.add(&digest(0x0), 0).unwrap();
        store.mutate(&mutations).unwrap();

        assert!(matches!(
            tree.prove_membership(1, 0),
            Err(Error::VersionOutOfRange { .. })
        ));
    }

    #[test]
    fn prove_consistency_audit_paths() {
        let cases: [(u8, AuditPath); 10] = [
            (0x0, path(&[("0|0", 0x0)])),
            (0x1, path(&[("0|0", 0x0), ("1|0", 0x1)])),
            (0x2, path(&[("0|0", 0x0), ("1|0", 0x1), ("2|0", 0x2)])),
            (0x3, path(&[("0|1", 0x1), ("2|0", 0x2), ("3|0", 0x3)])),
            (
                0x4,
                path(&[("0|1", 0x1), ("2|0", 0x2), ("3|0", 0x3), ("4|0", 0x4)]),
            ),
            (0x5, path(&[("0|2", 0x0), ("4|0", 0x4), ("5|0", 0x5)])),
            (
                0x6,
                path(&[("0|2", 0x0), ("4|0", 0x4), ("5|0", 0x5), ("6|0", 0x6)]),
            ),
            (
                0x7,
                path(&[("0|2", 0x0), ("4|1", 0x1), ("6|0", 0x6), ("7|0", 0x7)]),
            ),
            (
                0x8,
                path(&[
                    ("0|2", 0x0),
                    ("4|1", 0x1),
                    ("6|0", 0x6),
                    ("7|0", 0x7),
                    ("8|0", 0x8),
                ]),
            ),
            (0x9, path(&[("0|3", 0x0), ("8|0", 0x8), ("9|0", 0x9)])),
        ];

        let (mut tree, store) = new_tree();
        for (i, (event, expected)) in cases.into_iter().enumerate() {
            let version = i as u64;
            let (_, mutations) = tree.add(&digest(event), version).unwrap();
            store.mutate(&mutations).unwrap();

            let start = version.saturating_sub(1);
            let proof = tree.prove_consistency(start, version).unwrap();
            assert_eq!(proof.start, start);
            assert_eq!(proof.end, version);
            assert_eq!(
                proof.audit_path, expected,
                "audit path mismatch for versions ({start}, {version})"
            );
        }
    }

    #[test]
    fn prove_consistency_same_versions() {
        let cases: [(u8, AuditPath); 5] = [
            (0x0, path(&[("0|0", 0x0)])),
            (0x1, path(&[("0|0", 0x0), ("1|0", 0x1)])),
            (0x2, path(&[("0|1", 0x1), ("2|0", 0x2)])),
            (0x3, path(&[("0|1", 0x1), ("2|0", 0x2), ("3|0", 0x3)])),
            (0x4, path(&[("0|2", 0x0), ("4|0", 0x4)])),
        ];

        let (mut tree, store) = new_tree();
        for (i, (event, expected)) in cases.into_iter().enumerate() {
            let version = i as u64;
            let (_, mutations) = tree.add(&digest(event), version).unwrap();
            store.mutate(&mutations).unwrap();

            let proof = tree.prove_consistency(version, version).unwrap();
            assert_eq!(
                proof.audit_path, expected,
                "audit path mismatch at version {version}"
            );
        }
    }

    #[test]
    fn membership_proofs_verify_against_roots() {
        let (mut tree, store) = new_tree();
        let mut roots = Vec::new();
        for version in 0u64..10 {
            let event = digest(version as u8);
            let (root, mutations) = tree.add(&event, version).unwrap();
            store.mutate(&mutations).unwrap();
            roots.push(root);
        }

        for index in 0u64..10 {
            for version in index..10 {
                let proof = tree.prove_membership(index, version).unwrap();
                let event = digest(index as u8);
                assert!(
                    proof.verify(&event, &roots[version as usize]),
                    "proof for leaf {index} at version {version} should verify"
                );
                assert!(
                    !proof.verify(&digest(0x5a), &roots[version as usize]),
                    "proof for leaf {index} must not verify a different event"
                );
            }
        }
    }

    #[test]
    fn consistency_proofs_verify_against_roots() {
        let (mut tree, store) = new_tree();
        let mut roots = Vec::new();
        for version in 0u64..10 {
            let (root, mutations) = tree.add(&digest(version as u8), version).unwrap();
            store.mutate(&mutations).unwrap();
            roots.push(root);
        }

        for start in 0u64..10 {
            for end in start..10 {
                let proof = tree.prove_consistency(start, end).unwrap();
                assert!(
                    proof.verify(&roots[start as usize], &roots[end as usize]),
                    "consistency ({start}, {end}) should verify"
                );
            }
        }
    }
}
