//! The history tree: a perfect-binary Merkle tree over event digests,
//! indexed by append version.
//!
//! Only "frozen" digests are ever persisted: a node is frozen once the
//! subtree below it is fully populated, after which its digest can never
//! change again. Everything else — partially filled nodes, padding for
//! still-empty subtrees — is recomputed on demand from frozen digests and
//! default hashes, which is what makes the structure append-only on disk.

pub use proof::{ConsistencyProof, HistoryProof};
pub use tree::HistoryTree;

pub(crate) mod position;
mod proof;
mod tree;
