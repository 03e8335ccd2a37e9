//! Distributed leader election and switchover coordination for replicated
//! database clusters, using a shared versioned resource store as the only
//! point of coordination.
//!
//! The core is deliberately passive: every operation performs at most one
//! round trip to the backing store and returns. Safety rests entirely on the
//! store's conditional-update primitive (a write is rejected when the
//! resource's version token changed since it was read), so exactly one of
//! several racing writers succeeds and the others observe a conflict.
//! Retry cadence, lease renewal timing and expiry enforcement all belong to
//! the control loop consuming this crate.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod codec;
mod dcs;
mod error;
mod resource;
mod store;
mod types;

pub use dcs::{DEFAULT_TTL, DcsConfig, DcsStore, HaDefaults};
pub use error::{Error, StoreError, StoreErrorKind};
pub use resource::{ClusterResource, Resource};
pub use store::{ClusterSource, VersionedStore};
pub use types::{
    Cluster, DBState, HaConfig, Leader, Member, MemberToDelete, Switchover, is_expired,
};
