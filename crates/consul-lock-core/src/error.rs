use thiserror::Error;

/// Errors raised while acquiring or releasing a lock
#[derive(Error, Debug)]
pub enum LockError {
    #[error("Backend request failed: {0}")]
    Transport(String),

    #[error("Unexpected status {status} from {context}")]
    UnexpectedStatus { status: u16, context: String },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("unable to lock {key}")]
    Contended { key: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl LockError {
    pub fn unexpected_status(status: u16, context: impl Into<String>) -> Self {
        LockError::UnexpectedStatus {
            status,
            context: context.into(),
        }
    }

    pub fn contended(key: impl Into<String>) -> Self {
        LockError::Contended { key: key.into() }
    }

    /// The key is held by someone else; not a failure of the backend
    pub fn is_contention(&self) -> bool {
        matches!(self, LockError::Contended { .. })
    }

    /// Only transport failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, LockError::Transport(_))
    }
}

/// Errors raised while supervising the child process
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to spawn process: {0}")]
    SpawnFailed(String),

    #[error("Failed to forward signal {signal}: {reason}")]
    Signal { signal: String, reason: String },

    #[error("Failed to wait for process: {0}")]
    Wait(String),

    #[error("Termination status cannot be decoded on this platform: {0}")]
    UndecodableStatus(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
