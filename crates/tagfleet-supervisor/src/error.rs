use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("store error: {0}")]
    Store(#[from] tagfleet_store::StoreError),

    #[error("failed to spawn worker subprocess: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("malformed component id: {0}")]
    MalformedComponentId(String),
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
