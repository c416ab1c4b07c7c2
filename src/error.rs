use std::fmt;

use crate::storage::ContentId;

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
    Git(git2::Error),
    /// Remote unreachable, negotiation or authentication failed, or the relay
    /// is misconfigured.
    Network(String),
    /// The local store could not be read. Callers of the query operations
    /// never see this; it is mapped to "no checkpoint" / "empty history".
    ReadUnavailable(String),
    /// A single file could not be read from the store or written out.
    MaterializationSkip { path: String, reason: String },
    StoreDeletion(String),
    /// A baseline checkpoint that the local store does not contain.
    UnknownCheckpoint(ContentId),
    /// A configuration value the transport cannot use.
    Config(String),
}

impl Error {
    /// True when `err` (or anything in its cause chain) is a network failure.
    pub fn is_network(err: &anyhow::Error) -> bool {
        err.chain()
            .any(|cause| matches!(cause.downcast_ref::<Error>(), Some(Error::Network(_))))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Yaml(e) => write!(f, "YAML error: {}", e),
            Error::Git(e) => write!(f, "Git error: {}", e),
            Error::Network(msg) => write!(f, "Network error: {}", msg),
            Error::ReadUnavailable(msg) => write!(f, "Local store unreadable: {}", msg),
            Error::MaterializationSkip { path, reason } => {
                write!(f, "Skipped {}: {}", path, reason)
            }
            Error::StoreDeletion(msg) => write!(f, "Failed to delete store: {}", msg),
            Error::UnknownCheckpoint(id) => write!(f, "Checkpoint {} not found in store", id),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Yaml(e)
    }
}

impl From<git2::Error> for Error {
    fn from(e: git2::Error) -> Self {
        Error::Git(e)
    }
}
