use std::sync::Arc;

use hashing::{Digest, Hasher};
use storage::{KVPair, Mutation, Store, Table};
use tracing::{debug, info};

use crate::{cache::DigestCache, default_hashes, error::Error, AuditPath};

use super::navigator::{bit_is_set, Navigator};
use super::position::HyperPosition;
use super::proof::HyperProof;

/// The height that splits the memoised upper region from the recomputed
/// lower region
///
/// `L − 25` is empirical: it trades cache memory (one entry per non-empty
/// node at the boundary) against leaves scanned per insert. Hashers shorter
/// than that get the midpoint, which keeps the 8-bit test hasher workable.
#[must_use]
pub fn default_cache_level(num_bits: u16) -> u16 {
    if num_bits > 25 {
        num_bits - 25
    } else {
        (num_bits / 2).max(1)
    }
}

/// One stored leaf of the lower region, plus the in-flight one
///
/// `value` is the 8-byte big-endian version; `stored_height` is the level
/// recorded in the index row, `None` for the leaf being inserted.
struct Leaf {
    key: Vec<u8>,
    value: Vec<u8>,
    stored_height: Option<u16>,
}

impl Leaf {
    fn from_row(pair: KVPair) -> Result<Self, Error> {
        if pair.value.len() != 10 {
            return Err(Error::InvariantViolation("malformed index row"));
        }
        let height = u16::from_be_bytes([pair.value[8], pair.value[9]]);
        Ok(Self {
            key: pair.key,
            value: pair.value[..8].to_vec(),
            stored_height: Some(height),
        })
    }

    /// The index row value: `version(8) ‖ height(2)`
    fn row(&self, height: u16) -> Vec<u8> {
        let mut value = self.value.clone();
        value.extend_from_slice(&height.to_be_bytes());
        value
    }
}

/// A sparse Merkle tree over the full digest keyspace
pub struct HyperTree<H: Hasher> {
    hasher: H,
    store: Arc<dyn Store>,
    cache: DigestCache,
    navigator: Navigator,
    cache_level: u16,
    defaults: Vec<Digest>,
}

impl<H: Hasher> HyperTree<H> {
    /// Open a tree over `store`, warming `cache` from the persisted
    /// cache-level digests
    pub fn new(hasher: H, store: Arc<dyn Store>, cache: DigestCache) -> Result<Self, Error> {
        let cache_level = default_cache_level(hasher.len());
        Self::with_cache_level(hasher, store, cache, cache_level)
    }

    /// Like [`Self::new`] with an explicit cache level
    pub fn with_cache_level(
        hasher: H,
        store: Arc<dyn Store>,
        cache: DigestCache,
        cache_level: u16,
    ) -> Result<Self, Error> {
        let num_bits = hasher.len();
        assert!(
            cache_level >= 1 && cache_level < num_bits,
            "cache level must lie strictly inside the tree"
        );
        let defaults = default_hashes(&hasher, num_bits);
        let mut tree = Self {
            navigator: Navigator::new(num_bits),
            hasher,
            store,
            cache,
            cache_level,
            defaults,
        };
        tree.rebuild_cache()?;
        Ok(tree)
    }

    /// Insert `event_digest` with `version` as its value
    ///
    /// Returns the new root digest plus the mutations to persist: index
    /// rows for the new leaf and any pushed-down neighbours, and one
    /// cache-level digest.
    pub fn add(
        &mut self,
        event_digest: &Digest,
        version: u64,
    ) -> Result<(Digest, Vec<Mutation>), Error> {
        let key = event_digest.as_bytes();
        if key.len() != usize::from(self.hasher.len() / 8) {
            return Err(Error::InvariantViolation("digest length mismatch"));
        }
        let value = version.to_be_bytes().to_vec();
        let mut mutations = Vec::new();

        let root = self.navigator.root();
        let left = self.insert_at(self.navigator.go_left(&root), key, &value, &mut mutations)?;
        let right = self.insert_at(self.navigator.go_right(&root), key, &value, &mut mutations)?;
        let digest = self
            .hasher
            .salted(&root.bytes(), &[left.as_bytes(), right.as_bytes()]);
        debug!(version, mutations = mutations.len(), "inserted hyper leaf");

        Ok((digest, mutations))
    }

    /// The audit path for `key_digest`, whose index row is `row`
    ///
    /// One sibling per level, from just below the root down to the height
    /// where the leaf currently rests.
    pub fn query_membership(
        &self,
        key_digest: &Digest,
        row: &[u8],
    ) -> Result<HyperProof<H>, Error> {
        if row.len() < 8 {
            return Err(Error::InvariantViolation("malformed index row"));
        }
        let key = key_digest.as_bytes();
        let num_bits = self.hasher.len();
        let mut audit_path = AuditPath::new();

        // upper region: every sibling is memoised or default
        let mut pos = self.navigator.root();
        while pos.height > self.cache_level {
            let left = self.navigator.go_left(&pos);
            let right = self.navigator.go_right(&pos);
            let (next, sibling) = match bit_is_set(key, num_bits - pos.height) {
                false => (left, right),
                true => (right, left),
            };
            audit_path.insert(sibling.id(), self.cached_or_default(&sibling));
            pos = next;
        }

        // lower region: recompute sibling digests from the stored leaves
        let first = self.navigator.descend_to_first(&pos);
        let last = self.navigator.descend_to_last(&pos);
        let range = self
            .store
            .get_range(Table::Index, &first.index, &last.index)?;
        let leaves = range
            .into_iter()
            .map(Leaf::from_row)
            .collect::<Result<Vec<_>, _>>()?;

        let mut slice: &[Leaf] = &leaves;
        loop {
            if slice.is_empty() {
                return Err(Error::NotFound);
            }
            if slice.len() == 1 && pos.height < self.cache_level {
                if slice[0].key != key {
                    return Err(Error::NotFound);
                }
                break;
            }
            if pos.height == 0 {
                return Err(Error::InvariantViolation(
                    "unsorted leaf slice or broken split",
                ));
            }
            let left_pos = self.navigator.go_left(&pos);
            let right_pos = self.navigator.go_right(&pos);
            let at = split_point(slice, &right_pos.index);
            match bit_is_set(key, num_bits - pos.height) {
                false => {
                    audit_path.insert(right_pos.id(), self.subtree_digest(&right_pos, &slice[at..])?);
                    pos = left_pos;
                    slice = &slice[..at];
                }
                true => {
                    audit_path.insert(left_pos.id(), self.subtree_digest(&left_pos, &slice[..at])?);
                    pos = right_pos;
                    slice = &slice[at..];
                }
            }
        }

        Ok(HyperProof::new(
            audit_path,
            key_digest.clone(),
            row[..8].to_vec(),
            self.hasher.clone(),
        ))
    }

    /// Rebuild the in-memory cache from the persisted cache-level digests
    ///
    /// Fills the boundary from the `HyperCache` table, then recomputes the
    /// upper region above it, substituting defaults for empty subtrees and
    /// descending only where stored digests exist.
    pub fn rebuild_cache(&mut self) -> Result<(), Error> {
        info!("warming up hyper cache");
        let mut boundary: Vec<(Vec<u8>, Digest)> = Vec::new();
        {
            let mut reader = self.store.get_all(Table::HyperCache);
            loop {
                let batch = reader.read(100)?;
                if batch.is_empty() {
                    break;
                }
                for pair in batch {
                    let digest = Digest::new(pair.value);
                    self.cache.put(pair.key.clone(), digest.clone());
                    boundary.push((pair.key, digest));
                }
            }
        }

        if !boundary.is_empty() {
            let root = self.navigator.root();
            self.populate(&self.navigator.go_left(&root), &boundary);
            self.populate(&self.navigator.go_right(&root), &boundary);
        }
        info!(entries = self.cache.len(), "hyper cache warm");
        Ok(())
    }

    /// Release the in-memory cache; the store remains authoritative
    pub fn close(&mut self) {
        self.cache.clear();
    }

    /// The in-memory digest cache, exposed for inspection
    #[must_use]
    pub fn cache(&self) -> &DigestCache {
        &self.cache
    }

    fn insert_at(
        &mut self,
        pos: HyperPosition,
        key: &[u8],
        value: &[u8],
        mutations: &mut Vec<Mutation>,
    ) -> Result<Digest, Error> {
        let num_bits = self.hasher.len();
        let on_path =
            bit_is_set(key, num_bits - pos.height - 1) == bit_is_set(&pos.index, num_bits - pos.height - 1);

        if pos.height >= self.cache_level && !on_path {
            return Ok(self.cached_or_default(&pos));
        }

        if pos.height == self.cache_level {
            // entering the lower region: one range scan retrieves every
            // leaf that can collide below this node
            let first = self.navigator.descend_to_first(&pos);
            let last = self.navigator.descend_to_last(&pos);
            let range = self
                .store
                .get_range(Table::Index, &first.index, &last.index)?;
            let mut leaves = range
                .into_iter()
                .map(Leaf::from_row)
                .collect::<Result<Vec<_>, _>>()?;
            merge_pending(&mut leaves, key, value);

            let left_pos = self.navigator.go_left(&pos);
            let right_pos = self.navigator.go_right(&pos);
            let at = split_point(&leaves, &right_pos.index);
            let left = self.insert_below(&left_pos, &leaves[..at], mutations)?;
            let right = self.insert_below(&right_pos, &leaves[at..], mutations)?;

            let digest = self
                .hasher
                .salted(&pos.bytes(), &[left.as_bytes(), right.as_bytes()]);
            self.cache.put(pos.bytes(), digest.clone());
            mutations.push(Mutation::set(
                Table::HyperCache,
                pos.bytes(),
                digest.as_bytes().to_vec(),
            ));
            return Ok(digest);
        }

        // upper on-path node: recurse and memoise
        let left = self.insert_at(self.navigator.go_left(&pos), key, value, mutations)?;
        let right = self.insert_at(self.navigator.go_right(&pos), key, value, mutations)?;
        let digest = self
            .hasher
            .salted(&pos.bytes(), &[left.as_bytes(), right.as_bytes()]);
        self.cache.put(pos.bytes(), digest.clone());
        Ok(digest)
    }

    fn insert_below(
        &self,
        pos: &HyperPosition,
        leaves: &[Leaf],
        mutations: &mut Vec<Mutation>,
    ) -> Result<Digest, Error> {
        match leaves {
            [] => Ok(self.defaults[usize::from(pos.height)].clone()),
            [leaf] => {
                let digest = self.hasher.salted(&pos.bytes(), &[&leaf.value]);
                match leaf.stored_height {
                    // the new leaf comes to rest here
                    None => {
                        mutations.push(Mutation::set(
                            Table::Index,
                            leaf.key.clone(),
                            leaf.row(pos.height),
                        ));
                    }
                    // an earlier leaf displaced to a deeper slot
                    Some(height) if height > pos.height => {
                        mutations.push(Mutation::delete(Table::Index, leaf.key.clone()));
                        mutations.push(Mutation::set(
                            Table::Index,
                            leaf.key.clone(),
                            leaf.row(pos.height),
                        ));
                    }
                    Some(_) => {}
                }
                Ok(digest)
            }
            _ => {
                if pos.height == 0 {
                    return Err(Error::InvariantViolation(
                        "unsorted leaf slice or broken split",
                    ));
                }
                let left_pos = self.navigator.go_left(pos);
                let right_pos = self.navigator.go_right(pos);
                let at = split_point(leaves, &right_pos.index);
                let left = self.insert_below(&left_pos, &leaves[..at], mutations)?;
                let right = self.insert_below(&right_pos, &leaves[at..], mutations)?;
                Ok(self
                    .hasher
                    .salted(&pos.bytes(), &[left.as_bytes(), right.as_bytes()]))
            }
        }
    }

    /// Digest of a lower-region subtree from its leaf slice alone
    fn subtree_digest(&self, pos: &HyperPosition, leaves: &[Leaf]) -> Result<Digest, Error> {
        match leaves {
            [] => Ok(self.defaults[usize::from(pos.height)].clone()),
            [leaf] => Ok(self.hasher.salted(&pos.bytes(), &[&leaf.value])),
            _ => {
                if pos.height == 0 {
                    return Err(Error::InvariantViolation(
                        "unsorted leaf slice or broken split",
                    ));
                }
                let left_pos = self.navigator.go_left(pos);
                let right_pos = self.navigator.go_right(pos);
                let at = split_point(leaves, &right_pos.index);
                let left = self.subtree_digest(&left_pos, &leaves[..at])?;
                let right = self.subtree_digest(&right_pos, &leaves[at..])?;
                Ok(self
                    .hasher
                    .salted(&pos.bytes(), &[left.as_bytes(), right.as_bytes()]))
            }
        }
    }

    fn cached_or_default(&self, pos: &HyperPosition) -> Digest {
        self.cache
            .get(&pos.bytes())
            .unwrap_or_else(|| self.defaults[usize::from(pos.height)].clone())
    }

    /// Recompute the digest at `pos` from the boundary rows below it;
    /// `None` prunes an empty subtree
    fn populate(&self, pos: &HyperPosition, boundary: &[(Vec<u8>, Digest)]) -> Option<Digest> {
        if boundary.is_empty() {
            return None;
        }
        if pos.height == self.cache_level {
            let key = pos.bytes();
            return boundary
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, digest)| digest.clone());
        }
        let left_pos = self.navigator.go_left(pos);
        let right_pos = self.navigator.go_right(pos);
        // boundary keys start with the node index, so they split like leaves
        let at = boundary.partition_point(|(k, _)| k.as_slice() < right_pos.index.as_slice());
        let left = self.populate(&left_pos, &boundary[..at]);
        let right = self.populate(&right_pos, &boundary[at..]);
        if left.is_none() && right.is_none() {
            return None;
        }
        let left = left.unwrap_or_else(|| self.defaults[usize::from(left_pos.height)].clone());
        let right = right.unwrap_or_else(|| self.defaults[usize::from(right_pos.height)].clone());
        let digest = self
            .hasher
            .salted(&pos.bytes(), &[left.as_bytes(), right.as_bytes()]);
        self.cache.put(pos.bytes(), digest.clone());
        Some(digest)
    }
}

/// The number of leaves that fall left of `split_index`
fn split_point(leaves: &[Leaf], split_index: &[u8]) -> usize {
    leaves.partition_point(|leaf| leaf.key.as_slice() < split_index)
}

/// Insert the pending leaf into the sorted slice; an already-present key
/// wins, so the stored value stays the version of first insertion
fn merge_pending(leaves: &mut Vec<Leaf>, key: &[u8], value: &[u8]) {
    match leaves.binary_search_by(|leaf| leaf.key.as_slice().cmp(key)) {
        Ok(_) => {}
        Err(at) => leaves.insert(
            at,
            Leaf {
                key: key.to_vec(),
                value: value.to_vec(),
                stored_height: None,
            },
        ),
    }
}
