use std::path::PathBuf;

use thiserror::Error;

/// A tmux invocation that did not do what was asked.
#[derive(Debug, Error)]
pub enum TmuxError {
    /// The tmux binary could not be run at all
    #[error("failed to execute tmux {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    /// tmux ran and reported failure
    #[error("tmux {command} failed for {target}: {stderr}")]
    Failed {
        command: String,
        target: String,
        stderr: String,
    },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize session store: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to lock session store {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Tmux(#[from] TmuxError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}
