//! Error taxonomy for a mutation run.
//!
//! Fatal errors surface from [`crate::pipeline::run_pipeline`] after every
//! backed-up file has been restored. Per-mutation failures never appear here;
//! they are recorded as an `error` outcome instead.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not inside a git repository: {}", .0.display())]
    NotARepository(PathBuf),

    #[error("git {args} failed: {stderr}")]
    Git { args: String, stderr: String },

    #[error("{message}")]
    Preflight { message: String, output: String },

    #[error("mutation provider failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("no backup exists for {}; call backup() first", .0.display())]
    NoBackup(PathBuf),

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid glob pattern: {0}")]
    Glob(#[from] globset::Error),

    #[error("invalid config {}: {message}", .path.display())]
    Config { path: PathBuf, message: String },

    #[error("a test command is required (pass --test-command or set test_command in .diffmut.toml)")]
    MissingTestCommand,
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failure reported by a [`crate::provider::MutationProvider`].
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("provider returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("malformed provider response: {0}")]
    Malformed(String),

    #[error("provider command exited with {code:?}: {stderr}")]
    Command { code: Option<i32>, stderr: String },
}

impl ProviderError {
    /// Default retry predicate: rate limiting, overloaded/5xx gateways and dropped connections.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Status { status, .. } => {
                matches!(status, 429 | 500 | 502 | 503 | 529)
            }
            ProviderError::Connection(_) => true,
            _ => false,
        }
    }
}
