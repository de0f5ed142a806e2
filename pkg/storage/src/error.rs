/// An error from a [`Store`] operation
///
/// [`Store`]: crate::Store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested key is not present
    #[error("key not found")]
    KeyNotFound,

    /// An error from the rocksdb engine
    #[error("rocksdb error: {0}")]
    Rocksdb(#[from] rocksdb::Error),
}
