use std::fmt;
use thiserror::Error;

/// Result type alias for digester operations
pub type Result<T, E = DigesterError> = std::result::Result<T, E>;

/// Coarse classification of every failure that can reach a handler.
///
/// Handlers branch on the kind, never on error messages. Anything that is
/// not explicitly classified collapses to `Dependency` at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    InProgress,
    NotFound,
    Conflict,
    Dependency,
}

/// The collaborator an error originated from. Used as the `dependency`
/// field when logging failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dependency {
    Storage,
    Marker,
    Queuer,
    Pipeline,
}

impl Dependency {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Dependency::Storage => "storage",
            Dependency::Marker => "marker",
            Dependency::Queuer => "queuer",
            Dependency::Pipeline => "pipeline",
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected client input. The message is the underlying parse reason and is
/// safe to return to the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct InvalidInput(pub String);

/// Process level errors raised while wiring up and serving the digester
#[derive(Error, Debug)]
pub enum DigesterError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] crate::config::ValidationError),

    #[error("queuer error: {0}")]
    Queuer(#[from] crate::queuer::QueueError),
}
