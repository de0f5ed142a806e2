use storage::StoreError;

/// An error from a balloon operation
///
/// Client-side proof verification never returns this type: `verify` methods
/// return `bool`, and any structural defect in a proof yields `false`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The event digest is absent from the index; either it was never
    /// inserted or the index row was tampered with
    #[error("no leaf for the queried digest")]
    NotFound,

    /// A queried version exceeds the current version
    #[error("version {version} is out of range, current version is {current}")]
    VersionOutOfRange { version: u64, current: u64 },

    /// The event was inserted after the version being queried
    #[error("query version {query} predates the event, inserted at version {actual}")]
    VersionTooOld { query: u64, actual: u64 },

    /// An error from the underlying store
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A broken internal invariant; a bug, not a user-recoverable condition
    #[error("invariant violation: {0}")]
    InvariantViolation(&'static str),
}
