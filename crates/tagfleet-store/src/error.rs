use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique-key insert failed because the row already exists — used to
    /// signal "lock already held" / "file already claimed" to callers that
    /// need to distinguish that from a real database error.
    #[error("conflict: row already exists")]
    Conflict,
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
