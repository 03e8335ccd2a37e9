//! In-memory (single process) implementation of the versioned resource
//! store, for tests and local development.
//!
//! Version tokens are a shared monotonic counter, so a conditional update
//! against a stale token fails exactly like a compare-and-swap on the real
//! platform would.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use helmsman_dcs::{ClusterResource, ClusterSource, Member, Resource, VersionedStore};
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct Inner {
    resources: HashMap<String, Resource>,
    cluster: ClusterResource,
    members: Vec<Member>,
    next_version: u64,
}

/// In-memory versioned resource store. Clones share the same state.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    /// Creates an empty store with a default cluster resource.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store anchored to `cluster`.
    #[must_use]
    pub fn with_cluster(cluster: ClusterResource) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                cluster,
                ..Inner::default()
            })),
        }
    }

    /// Replaces the membership listing.
    pub async fn set_members(&self, members: Vec<Member>) {
        self.inner.lock().await.members = members;
    }

    /// Replaces the cluster resource metadata.
    pub async fn set_cluster(&self, cluster: ClusterResource) {
        self.inner.lock().await.cluster = cluster;
    }

    /// Inserts a resource verbatim, bypassing the create path. Useful for
    /// seeding state with explicit creation times or version tokens.
    pub async fn put_resource(&self, resource: Resource) {
        self.inner
            .lock()
            .await
            .resources
            .insert(resource.name.clone(), resource);
    }

    fn now_unix() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
    }
}

#[async_trait]
impl VersionedStore for MemoryStore {
    type Error = Error;

    async fn get(&self, name: &str) -> Result<Option<Resource>, Self::Error> {
        Ok(self.inner.lock().await.resources.get(name).cloned())
    }

    async fn create(
        &self,
        name: &str,
        annotations: std::collections::BTreeMap<String, String>,
    ) -> Result<Resource, Self::Error> {
        let mut inner = self.inner.lock().await;
        if inner.resources.contains_key(name) {
            return Err(Error::AlreadyExists(name.to_string()));
        }

        inner.next_version += 1;
        let resource = Resource {
            name: name.to_string(),
            version: inner.next_version.to_string(),
            uid: format!("uid-{}", inner.next_version),
            created_at: Self::now_unix(),
            annotations,
        };
        inner.resources.insert(name.to_string(), resource.clone());
        Ok(resource)
    }

    async fn update(
        &self,
        resource: &Resource,
        annotations: std::collections::BTreeMap<String, String>,
    ) -> Result<Resource, Self::Error> {
        let mut inner = self.inner.lock().await;
        inner.next_version += 1;
        let next_version = inner.next_version;

        let Some(stored) = inner.resources.get_mut(&resource.name) else {
            return Err(Error::NotFound(resource.name.clone()));
        };
        if stored.version != resource.version {
            return Err(Error::Conflict(resource.name.clone()));
        }

        stored.version = next_version.to_string();
        stored.annotations = annotations;
        Ok(stored.clone())
    }

    async fn delete(&self, name: &str) -> Result<(), Self::Error> {
        match self.inner.lock().await.resources.remove(name) {
            Some(_) => Ok(()),
            None => Err(Error::NotFound(name.to_string())),
        }
    }
}

#[async_trait]
impl ClusterSource for MemoryStore {
    type Error = Error;

    async fn cluster(&self) -> Result<ClusterResource, Self::Error> {
        Ok(self.inner.lock().await.cluster.clone())
    }

    async fn members(&self) -> Result<Vec<Member>, Self::Error> {
        Ok(self.inner.lock().await.members.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn annotations(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[tokio::test]
    async fn create_and_get() {
        let store = MemoryStore::new();
        let created = store
            .create("pg-rs-leader", annotations(&[("leader", "pg-rs-0")]))
            .await
            .unwrap();

        let fetched = store.get("pg-rs-leader").await.unwrap().unwrap();
        assert_eq!(fetched, created);
        assert_eq!(fetched.annotations["leader"], "pg-rs-0");
    }

    #[tokio::test]
    async fn create_is_exclusive() {
        let store = MemoryStore::new();
        store.create("x", BTreeMap::new()).await.unwrap();

        let err = store.create("x", BTreeMap::new()).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn stale_update_conflicts() {
        let store = MemoryStore::new();
        let first_read = store.create("x", BTreeMap::new()).await.unwrap();

        // A concurrent writer wins the race.
        store
            .update(&first_read, annotations(&[("leader", "other")]))
            .await
            .unwrap();

        let err = store
            .update(&first_read, annotations(&[("leader", "me")]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        // The winner's write is untouched.
        let stored = store.get("x").await.unwrap().unwrap();
        assert_eq!(stored.annotations["leader"], "other");
    }

    #[tokio::test]
    async fn update_missing_is_not_found() {
        let store = MemoryStore::new();
        let ghost = Resource {
            name: "ghost".to_string(),
            ..Resource::default()
        };

        let err = store.update(&ghost, BTreeMap::new()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_is_not_idempotent() {
        let store = MemoryStore::new();
        store.create("x", BTreeMap::new()).await.unwrap();

        store.delete("x").await.unwrap();
        let err = store.delete("x").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
