use std::sync::Arc;

use hashing::{Digest, Hasher};
use storage::{Mutation, Store, StoreError, Table};
use tracing::debug;

use crate::cache::DigestCache;
use crate::error::Error;
use crate::history::{ConsistencyProof, HistoryProof, HistoryTree};
use crate::hyper::{HyperProof, HyperTree};
use crate::AuditPath;

/// Byte budget of the hyper tree's in-memory cache: room for every
/// cache-level digest of a tree in the tens of millions of events.
pub const HYPER_CACHE_BYTES: usize = (1 << 26) * 70;

/// Entry budget of the history tree's LRU; appends only revisit the recent
/// right edge, so a few hundred entries absorb almost every read.
const HISTORY_CACHE_ENTRIES: usize = 300;

/// A snapshot of the whole balloon after one append
///
/// Once signed and published, the tuple binds the system to its entire
/// history: a verifier holding snapshots and a hasher can check any proof
/// offline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub event_digest: Digest,
    pub history_digest: Digest,
    pub hyper_digest: Digest,
    pub version: u64,
}

/// The balloon: a history tree and a hyper tree fed in lockstep over one
/// store
///
/// Appends take `&mut self` and must be serialised by the caller (in
/// production, the replication layer); queries take `&self` and may run
/// concurrently with each other.
pub struct Balloon<H: Hasher> {
    version: u64,
    hasher: H,
    store: Arc<dyn Store>,
    history: HistoryTree<H>,
    hyper: HyperTree<H>,
}

impl<H: Hasher> Balloon<H> {
    /// Open a balloon over `store`, rebuilding caches and recovering the
    /// version counter from the stored history
    pub fn new(store: Arc<dyn Store>, hasher: H) -> Result<Self, Error> {
        let hyper_cache = DigestCache::with_max_bytes(HYPER_CACHE_BYTES);
        let history = HistoryTree::new(hasher.clone(), Arc::clone(&store), HISTORY_CACHE_ENTRIES);
        let hyper = HyperTree::new(hasher.clone(), Arc::clone(&store), hyper_cache)?;

        let mut balloon = Self {
            version: 0,
            hasher,
            store,
            history,
            hyper,
        };
        balloon.refresh_version()?;
        Ok(balloon)
    }

    /// The next version to be assigned
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Recover the version counter from the last stored history leaf
    ///
    /// `HistoryCache` keys sort by `(index, height)`, and every append
    /// writes its leaf, so the last key's index is the last version.
    pub fn refresh_version(&mut self) -> Result<(), Error> {
        match self.store.get_last(Table::HistoryCache) {
            Ok(pair) => {
                let index: [u8; 8] = pair
                    .key
                    .get(..8)
                    .and_then(|bytes| bytes.try_into().ok())
                    .ok_or(Error::InvariantViolation("malformed history cache key"))?;
                self.version = u64::from_be_bytes(index) + 1;
                Ok(())
            }
            Err(StoreError::KeyNotFound) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Append `event`, growing both trees in parallel
    ///
    /// Returns the snapshot for the new version and the mutations to
    /// persist; nothing is written here, so a failed replication attempt
    /// leaves neither tree advanced on disk. (The in-process hyper cache
    /// may have been warmed with digests that never land; that is benign,
    /// as misses recompute from stored leaves.)
    pub fn add(&mut self, event: &[u8]) -> Result<(Snapshot, Vec<Mutation>), Error> {
        let version = self.version;
        self.version += 1;

        let event_digest = self.hasher.digest(&[event]);

        let history = &mut self.history;
        let hyper = &mut self.hyper;
        let digest = &event_digest;
        let (history_result, hyper_result) = rayon::join(
            move || history.add(digest, version),
            move || hyper.add(digest, version),
        );
        let (history_digest, history_mutations) = history_result?;
        let (hyper_digest, mut mutations) = hyper_result?;

        mutations.extend(history_mutations);
        debug!(version, mutations = mutations.len(), "appended event");

        let snapshot = Snapshot {
            event_digest,
            history_digest,
            hyper_digest,
            version,
        };
        Ok((snapshot, mutations))
    }

    /// Membership proof for `event` against the log at `query_version`
    pub fn query_membership(
        &self,
        event: &[u8],
        query_version: u64,
    ) -> Result<MembershipProof<H>, Error> {
        self.query_digest_membership(self.hasher.digest(&[event]), query_version)
    }

    /// Membership proof for an already-hashed event digest
    pub fn query_digest_membership(
        &self,
        key_digest: Digest,
        query_version: u64,
    ) -> Result<MembershipProof<H>, Error> {
        let pair = match self.store.get(Table::Index, key_digest.as_bytes()) {
            Ok(pair) => pair,
            Err(StoreError::KeyNotFound) => return Err(Error::NotFound),
            Err(err) => return Err(err.into()),
        };

        let version_bytes: [u8; 8] = pair
            .value
            .get(..8)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or(Error::InvariantViolation("malformed index row"))?;
        let actual_version = u64::from_be_bytes(version_bytes);

        if query_version < actual_version {
            return Err(Error::VersionTooOld {
                query: query_version,
                actual: actual_version,
            });
        }
        let current_version = self.version.saturating_sub(1);
        if query_version > current_version {
            return Err(Error::VersionOutOfRange {
                version: query_version,
                current: current_version,
            });
        }

        let (history_result, hyper_result) = rayon::join(
            || self.history.prove_membership(actual_version, query_version),
            || self.hyper.query_membership(&key_digest, &pair.value),
        );
        let history_proof = history_result?;
        let hyper_proof = hyper_result?;
        debug!(
            %key_digest,
            query_version,
            actual_version,
            "served membership proof"
        );

        Ok(MembershipProof {
            exists: true,
            hyper_proof,
            history_proof,
            current_version,
            query_version,
            actual_version,
            key_digest,
            hasher: self.hasher.clone(),
        })
    }

    /// Incremental proof that the log at `end` extends the log at `start`
    pub fn query_consistency(&self, start: u64, end: u64) -> Result<IncrementalProof<H>, Error> {
        let current = self.version.saturating_sub(1);
        if self.version == 0 || end > current {
            return Err(Error::VersionOutOfRange {
                version: end,
                current,
            });
        }

        let proof = self.history.prove_consistency(start, end)?;
        debug!(start, end, "served consistency proof");
        Ok(IncrementalProof {
            start,
            end,
            audit_path: proof.audit_path,
            hasher: self.hasher.clone(),
        })
    }

    /// Release the in-memory caches; on-disk state survives and a new
    /// balloon over the same store resumes where this one left off
    pub fn close(mut self) {
        self.history.close();
        self.hyper.close();
    }
}

/// Proof that an event was recorded at some version of the log
#[derive(Debug, Clone)]
pub struct MembershipProof<H: Hasher> {
    pub exists: bool,
    pub hyper_proof: HyperProof<H>,
    pub history_proof: HistoryProof<H>,
    pub current_version: u64,
    pub query_version: u64,
    /// The version the event was inserted at; also needed to pick the
    /// matching snapshot for a later consistency proof
    pub actual_version: u64,
    pub key_digest: Digest,
    hasher: H,
}

impl<H: Hasher> MembershipProof<H> {
    /// Verify against the snapshot published for `query_version`
    ///
    /// Run by a client on input that should be verified; never errors.
    #[must_use]
    pub fn verify(&self, event: &[u8], snapshot: &Snapshot) -> bool {
        self.digest_verify(&self.hasher.digest(&[event]), snapshot)
    }

    /// Like [`Self::verify`], with the event digest precomputed
    #[must_use]
    pub fn digest_verify(&self, event_digest: &Digest, snapshot: &Snapshot) -> bool {
        let hyper_ok = self.hyper_proof.verify(event_digest, &snapshot.hyper_digest);
        verdict(
            self.exists,
            self.query_version,
            self.actual_version,
            hyper_ok,
            || self.history_proof.verify(event_digest, &snapshot.history_digest),
        )
    }
}

/// The membership decision: the hyper check always applies; the history
/// check only when the event exists and the queried version does not
/// predate its insertion
fn verdict(
    exists: bool,
    query_version: u64,
    actual_version: u64,
    hyper_ok: bool,
    history_ok: impl FnOnce() -> bool,
) -> bool {
    if exists && query_version <= actual_version {
        return hyper_ok && history_ok();
    }
    hyper_ok
}

/// Proof that the log at version `end` is an extension of the log at
/// version `start`
#[derive(Debug, Clone)]
pub struct IncrementalProof<H: Hasher> {
    pub start: u64,
    pub end: u64,
    pub audit_path: AuditPath,
    hasher: H,
}

impl<H: Hasher> IncrementalProof<H> {
    /// Verify against the snapshots published for the two versions
    #[must_use]
    pub fn verify(&self, start: &Snapshot, end: &Snapshot) -> bool {
        ConsistencyProof::new(
            self.start,
            self.end,
            self.audit_path.clone(),
            self.hasher.clone(),
        )
        .verify(&start.history_digest, &end.history_digest)
    }
}
