//! # Balloon
//!
//! A persistent, append-only authenticated data structure that records a
//! stream of opaque byte events and produces compact cryptographic proofs
//! of two properties:
//!
//! - **membership** — "this event was appended at some version ≤ Q";
//! - **incremental consistency** — "the log at version E is an extension of
//!   the log at version S".
//!
//! Every append drives two Merkle trees in parallel over one key/value
//! store and yields a succinct [`Snapshot`] (three digests plus the
//! version) which, once signed and published by an outer layer, binds the
//! system to its entire history. A verifier who trusts only snapshots and
//! the hash function can check any proof offline.
//!
//! ```rust
//! # use std::sync::Arc;
//! # use balloon::Balloon;
//! # use hashing::Sha256Hasher;
//! # use storage::{MemoryStore, Store};
//! let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
//! let mut balloon = Balloon::new(Arc::clone(&store), Sha256Hasher::new()).unwrap();
//!
//! let (snapshot, mutations) = balloon.add(b"an event").unwrap();
//! store.mutate(&mutations).unwrap();
//!
//! let proof = balloon.query_membership(b"an event", snapshot.version).unwrap();
//! assert!(proof.verify(b"an event", &snapshot));
//! ```
//!
//! Writes never happen inline: every operation returns the
//! [`Mutation`][storage::Mutation]s it wants applied, and the caller
//! commits them in one atomic batch. A failed append therefore leaves the
//! store untouched, which is what the replication layer above relies on.

use std::collections::BTreeMap;

use hashing::{Digest, Hasher};

pub use crate::balloon::{
    Balloon, IncrementalProof, MembershipProof, Snapshot, HYPER_CACHE_BYTES,
};
pub use crate::cache::{CacheMetrics, DigestCache};
pub use crate::error::Error;

mod balloon;
mod cache;
mod error;
pub mod history;
pub mod hyper;

/// An audit path: sibling-node identifier → digest, enough to rebuild a
/// root
///
/// History entries are keyed `index|height` with a decimal index; hyper
/// entries use a hex index.
pub type AuditPath = BTreeMap<String, Digest>;

/// Digests of empty subtrees by height: `H_0 = H(0x00, 0x00)` and
/// `H_h = H(H_{h-1}, H_{h-1})`
pub(crate) fn default_hashes<H: Hasher>(hasher: &H, up_to: u16) -> Vec<Digest> {
    let mut hashes = Vec::with_capacity(usize::from(up_to) + 1);
    hashes.push(hasher.digest(&[&[0x00], &[0x00]]));
    for _ in 1..=up_to {
        let prev = hashes.last().expect("seeded above");
        let next = hasher.digest(&[prev.as_bytes(), prev.as_bytes()]);
        hashes.push(next);
    }
    hashes
}

#[cfg(test)]
mod tests {
    use hashing::{Sha256Hasher, XorHasher};

    use super::*;

    #[test]
    fn default_hashes_chain() {
        let hasher = Sha256Hasher::new();
        let defaults = default_hashes(&hasher, 8);

        assert_eq!(defaults.len(), 9);
        assert_eq!(defaults[0], hasher.digest(&[&[0x00], &[0x00]]));
        for h in 1..defaults.len() {
            let prev = defaults[h - 1].as_bytes();
            assert_eq!(defaults[h], hasher.digest(&[prev, prev]));
        }
    }

    #[test]
    fn xor_default_hashes_are_all_zero() {
        let defaults = default_hashes(&XorHasher::new(), 8);
        assert!(defaults.iter().all(|d| d.as_bytes() == [0x00]));
    }
}
