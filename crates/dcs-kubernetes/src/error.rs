use helmsman_dcs::{StoreError, StoreErrorKind};
use thiserror::Error as ThisError;

/// Errors that can occur in this crate.
#[derive(Debug, ThisError)]
pub enum Error {
    /// A required environment variable is missing or malformed.
    #[error("configuration: {0}")]
    Config(String),

    /// The Kubernetes API rejected or failed a request.
    #[error("kubernetes api: {0}")]
    Api(#[from] kube::Error),

    /// A fetched object is missing a field the protocol relies on.
    #[error("malformed object {name}: missing {field}")]
    MalformedObject {
        /// Object name.
        name: String,
        /// The absent field.
        field: &'static str,
    },
}

impl StoreError for Error {
    fn kind(&self) -> StoreErrorKind {
        match self {
            Self::Api(kube::Error::Api(response)) => match response.code {
                404 => StoreErrorKind::NotFound,
                409 if response.reason == "AlreadyExists" => StoreErrorKind::AlreadyExists,
                409 => StoreErrorKind::Conflict,
                _ => StoreErrorKind::Other,
            },
            _ => StoreErrorKind::Other,
        }
    }
}
