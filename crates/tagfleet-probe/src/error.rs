use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("nvidia-smi not found on PATH")]
    NotFound,
    #[error("nvidia-smi timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("nvidia-smi exited with failure: {0}")]
    ExitFailure(String),
    #[error("failed to parse nvidia-smi output: {0}")]
    ParseFailure(String),
    #[error("io error running nvidia-smi: {0}")]
    Io(#[from] std::io::Error),
}
