//! The hyper tree: a sparse Merkle tree of depth `L` (the hash bit-length)
//! keyed by event digest, whose leaf value is the version at which the
//! digest was first inserted.
//!
//! Three things keep a `2^L`-slot tree tractable:
//!
//! - leaves are stored at the height where they currently sit (the highest
//!   subtree of which they are the sole occupant) and pushed down lazily as
//!   colliding digests arrive, so an insert touches one index row per
//!   affected leaf instead of `L` internal rows;
//! - a fixed cache level `C` splits the tree into an upper region whose
//!   digests are memoised in memory (and persisted at exactly height `C`)
//!   and a lower region recomputed from stored leaves on every touch;
//! - one range scan per operation retrieves every leaf below the traversed
//!   cache-level node.

pub use proof::HyperProof;
pub use tree::{default_cache_level, HyperTree};

mod navigator;
mod position;
mod proof;
mod tree;
