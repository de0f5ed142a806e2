use hashing::{Digest, Hasher};

use crate::{default_hashes, AuditPath};

use super::position::HistoryPosition;

/// Proof that a leaf is committed by a history root
///
/// Contains the minimal frozen digests of every sibling subtree along the
/// path from leaf `index` to the root at `version`; the verifier pads
/// still-empty subtrees with default hashes.
#[derive(Debug, Clone)]
pub struct HistoryProof<H: Hasher> {
    pub index: u64,
    pub version: u64,
    pub audit_path: AuditPath,
    hasher: H,
}

impl<H: Hasher> HistoryProof<H> {
    pub(crate) fn new(index: u64, version: u64, audit_path: AuditPath, hasher: H) -> Self {
        Self {
            index,
            version,
            audit_path,
            hasher,
        }
    }

    /// Recompute the root at `self.version` with `event_digest` in leaf
    /// `self.index` and compare it against `expected_root`
    ///
    /// Never fails: a structurally broken path yields `false`.
    #[must_use]
    pub fn verify(&self, event_digest: &Digest, expected_root: &Digest) -> bool {
        if self.index > self.version {
            return false;
        }
        let root = HistoryPosition::root(self.version);
        let defaults = default_hashes(&self.hasher, root.height);
        let leaf = self.hasher.digest(&[event_digest.as_bytes()]);

        match self.fold(root, &leaf, &defaults) {
            Some(computed) => &computed == expected_root,
            None => false,
        }
    }

    fn fold(
        &self,
        pos: HistoryPosition,
        leaf: &Digest,
        defaults: &[Digest],
    ) -> Option<Digest> {
        if pos.is_empty_at(self.version) {
            return Some(defaults[pos.height as usize].clone());
        }
        if pos.contains(self.index) {
            if pos.height == 0 {
                return Some(leaf.clone());
            }
        } else {
            if let Some(digest) = self.audit_path.get(&pos.id()) {
                return Some(digest.clone());
            }
            if pos.height == 0 {
                return None;
            }
        }
        let left = self.fold(pos.left_child(), leaf, defaults)?;
        let right = self.fold(pos.right_child(), leaf, defaults)?;
        Some(self.hasher.digest(&[left.as_bytes(), right.as_bytes()]))
    }
}

/// Proof that the log at version `end` is an extension of the log at
/// version `start`
///
/// The audit path carries enough frozen digests to rebuild both roots.
#[derive(Debug, Clone)]
pub struct ConsistencyProof<H: Hasher> {
    pub start: u64,
    pub end: u64,
    pub audit_path: AuditPath,
    hasher: H,
}

impl<H: Hasher> ConsistencyProof<H> {
    pub(crate) fn new(start: u64, end: u64, audit_path: AuditPath, hasher: H) -> Self {
        Self {
            start,
            end,
            audit_path,
            hasher,
        }
    }

    /// True iff the path rebuilds `start_root` at `self.start` and
    /// `end_root` at `self.end`
    #[must_use]
    pub fn verify(&self, start_root: &Digest, end_root: &Digest) -> bool {
        if self.start > self.end {
            return false;
        }
        let defaults = default_hashes(&self.hasher, HistoryPosition::root(self.end).height);

        let start = self.fold(HistoryPosition::root(self.start), self.start, &defaults);
        let end = self.fold(HistoryPosition::root(self.end), self.end, &defaults);

        match (start, end) {
            (Some(start), Some(end)) => &start == start_root && &end == end_root,
            _ => false,
        }
    }

    fn fold(&self, pos: HistoryPosition, version: u64, defaults: &[Digest]) -> Option<Digest> {
        // emptiness takes precedence over the path: an entry for a leaf
        // beyond `version` belongs to the other root only
        if pos.is_empty_at(version) {
            return Some(defaults[pos.height as usize].clone());
        }
        if let Some(digest) = self.audit_path.get(&pos.id()) {
            return Some(digest.clone());
        }
        if pos.height == 0 {
            return None;
        }
        let left = self.fold(pos.left_child(), version, defaults)?;
        let right = self.fold(pos.right_child(), version, defaults)?;
        Some(self.hasher.digest(&[left.as_bytes(), right.as_bytes()]))
    }
}
