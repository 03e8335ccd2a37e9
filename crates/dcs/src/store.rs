use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::resource::{ClusterResource, Resource};
use crate::types::Member;

/// A store of named, versioned, annotated resources with atomic
/// create-if-absent and compare-and-swap update semantics.
///
/// This is the only synchronization mechanism the coordination protocols
/// rely on. A Kubernetes-object-backed store is one instantiation; any
/// key-value store offering single-key read-modify-write can satisfy the
/// contract.
#[async_trait]
pub trait VersionedStore: Send + Sync + 'static {
    /// The error type for this store.
    type Error: StoreError;

    /// Fetches a resource by name. Absence is `Ok(None)`, not an error.
    async fn get(&self, name: &str) -> Result<Option<Resource>, Self::Error>;

    /// Atomically creates a resource carrying `annotations`. Fails with an
    /// `AlreadyExists`-kind error when the name is taken; exactly one of
    /// several racing creators succeeds.
    async fn create(
        &self,
        name: &str,
        annotations: BTreeMap<String, String>,
    ) -> Result<Resource, Self::Error>;

    /// Conditionally replaces the annotations of `resource`. The write
    /// succeeds only while the stored version token still matches
    /// `resource.version`; otherwise a `Conflict`-kind error is returned and
    /// the stored resource is untouched.
    async fn update(
        &self,
        resource: &Resource,
        annotations: BTreeMap<String, String>,
    ) -> Result<Resource, Self::Error>;

    /// Deletes a resource. Fails with a `NotFound`-kind error when it does
    /// not exist, so callers can detect "nothing to delete".
    async fn delete(&self, name: &str) -> Result<(), Self::Error>;
}

/// Source of cluster topology: the defining resource and the platform's
/// membership listing.
///
/// Membership is discovered fresh on every call and never persisted by the
/// coordination core.
#[async_trait]
pub trait ClusterSource: Send + Sync + 'static {
    /// The error type for this source.
    type Error: StoreError;

    /// Fetches metadata of the resource defining the cluster.
    async fn cluster(&self) -> Result<ClusterResource, Self::Error>;

    /// Lists the members currently participating in the cluster.
    async fn members(&self) -> Result<Vec<Member>, Self::Error>;
}
