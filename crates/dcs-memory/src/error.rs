use helmsman_dcs::{StoreError, StoreErrorKind};
use thiserror::Error as ThisError;

/// Errors that can occur in this crate.
#[derive(Clone, Debug, ThisError)]
pub enum Error {
    /// The addressed resource does not exist.
    #[error("resource {0} not found")]
    NotFound(String),

    /// A conditional update lost the race to a concurrent writer.
    #[error("resource {0} version conflict")]
    Conflict(String),

    /// A create found the resource already present.
    #[error("resource {0} already exists")]
    AlreadyExists(String),
}

impl StoreError for Error {
    fn kind(&self) -> StoreErrorKind {
        match self {
            Self::NotFound(_) => StoreErrorKind::NotFound,
            Self::Conflict(_) => StoreErrorKind::Conflict,
            Self::AlreadyExists(_) => StoreErrorKind::AlreadyExists,
        }
    }
}
