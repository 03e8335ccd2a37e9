use std::error::Error as StdError;
use std::fmt::{self, Debug};

use thiserror::Error as ThisError;

/// The kind of a backend store error.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StoreErrorKind {
    /// The addressed resource does not exist.
    NotFound,

    /// A conditional update lost the race to a concurrent writer.
    Conflict,

    /// A create found the resource already present.
    AlreadyExists,

    /// Any other backend failure.
    Other,
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Marker trait for backend store errors.
pub trait StoreError: Debug + StdError + Send + Sync + 'static {
    /// Returns the kind of this error.
    fn kind(&self) -> StoreErrorKind;
}

/// Errors returned by the coordination engine.
#[derive(Debug, ThisError)]
pub enum Error {
    /// The addressed resource does not exist. Reads that tolerate absence
    /// (`get_leader`, `get_switchover`) return `None` instead; mutations that
    /// require prior existence surface this.
    #[error("resource {name} not found")]
    NotFound {
        /// Name of the missing resource.
        name: String,
    },

    /// A concurrent writer updated the resource first. Retryable with a
    /// fresh read.
    #[error("conflict updating {name}: resource version changed since read")]
    Conflict {
        /// Name of the contended resource.
        name: String,
    },

    /// An idempotent create found the resource already present. For
    /// switchovers this means another handover request is still unresolved.
    #[error("resource {name} already exists")]
    AlreadyExists {
        /// Name of the conflicting resource.
        name: String,
    },

    /// The recorded lease holder no longer matches this process's identity.
    /// Fatal to this process's leadership; not retryable as leader.
    #[error("lost lease: leader record held by {holder:?}, not {identity:?}")]
    LostLease {
        /// Holder currently recorded on the lease.
        holder: String,
        /// This process's member identity.
        identity: String,
    },

    /// The loaded HA config carries no backing resource handle, so there is
    /// nothing to conditionally update.
    #[error("no HA config resource loaded for {name}")]
    NoHaConfig {
        /// Name the HA config resource would have.
        name: String,
    },

    /// The operation needs a cluster snapshot that has not been loaded yet.
    #[error("cluster snapshot not loaded; call get_cluster first")]
    NotInitialized,

    /// Malformed input, rejected before any store access.
    #[error("invalid request: {reason}")]
    Validation {
        /// What was wrong with the input.
        reason: String,
    },

    /// A structured annotation payload failed to encode or decode.
    #[error("malformed annotation {key}: {reason}")]
    Codec {
        /// Annotation key holding the payload.
        key: &'static str,
        /// Decoder diagnostic.
        reason: String,
    },

    /// The backend store failed in a way the protocol has no special
    /// handling for.
    #[error("{op} {name}: {source}")]
    Store {
        /// Store operation that failed.
        op: &'static str,
        /// Resource the operation addressed.
        name: String,
        /// Underlying backend error.
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl Error {
    /// Translates a backend error into the engine's error space, attaching
    /// the operation and resource it came from.
    pub(crate) fn from_store<E: StoreError>(op: &'static str, name: &str, err: E) -> Self {
        match err.kind() {
            StoreErrorKind::NotFound => Self::NotFound {
                name: name.to_string(),
            },
            StoreErrorKind::Conflict => Self::Conflict {
                name: name.to_string(),
            },
            StoreErrorKind::AlreadyExists => Self::AlreadyExists {
                name: name.to_string(),
            },
            StoreErrorKind::Other => Self::Store {
                op,
                name: name.to_string(),
                source: Box::new(err),
            },
        }
    }
}
