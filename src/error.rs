use zarrs::array::{ArrayCreateError, ArrayError};
use zarrs::group::GroupCreateError;
use zarrs::storage::StorageError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    General(String),
    /// The store or the base path could not be listed.
    #[error("store discovery failed: {0}")]
    Discovery(String),
    #[error("ref {0:?} not found")]
    RefNotFound(String),
    #[error("no node at {0:?}")]
    NodeNotFound(String),
    #[error("invalid metadata at {path:?}: {reason}")]
    Metadata { path: String, reason: String },
    /// Chunk bytes could not be turned back into typed values.
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("unrecognised time encoding: {0}")]
    TimeParse(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    Wrapped(Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    pub fn general(message: impl Into<String>) -> Self {
        Self::General(message.into())
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    pub fn metadata(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Metadata {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn wrap(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Wrapped(Box::new(error))
    }

    pub(crate) fn array_open(path: &str, error: ArrayCreateError) -> Self {
        match error {
            ArrayCreateError::MissingMetadata => Self::NodeNotFound(path.to_string()),
            ArrayCreateError::StorageError(e) => Self::Storage(e),
            e => Self::metadata(path, e.to_string()),
        }
    }

    pub(crate) fn group_open(path: &str, error: GroupCreateError) -> Self {
        match error {
            GroupCreateError::MissingMetadata => Self::NodeNotFound(path.to_string()),
            GroupCreateError::StorageError(e) => Self::Storage(e),
            e => Self::metadata(path, e.to_string()),
        }
    }
}

impl From<ArrayError> for Error {
    fn from(value: ArrayError) -> Self {
        match value {
            ArrayError::CodecError(e) => Self::Decode(e.to_string()),
            ArrayError::StorageError(e) => Self::Storage(e),
            e => Self::wrap(e),
        }
    }
}
