use std::collections::BTreeMap;

/// A point-in-time copy of a named, versioned, annotated resource.
///
/// The version token is opaque to the protocol; its only contract is that a
/// conditional update against a stale token fails with a conflict.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Resource {
    /// Resource name within the cluster's namespace.
    pub name: String,

    /// Opaque version token observed at read time.
    pub version: String,

    /// Stable unique id assigned by the platform.
    pub uid: String,

    /// Creation time in unix seconds.
    pub created_at: i64,

    /// Flat string metadata carrying the coordination state.
    pub annotations: BTreeMap<String, String>,
}

/// Metadata of the resource that defines the cluster itself.
///
/// Never mutated by the coordination core; its creation time anchors the
/// "does this lease belong to the current cluster incarnation" heuristic.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ClusterResource {
    /// Name of the defining resource.
    pub name: String,

    /// Namespace holding the cluster and its coordination resources.
    pub namespace: String,

    /// Stable unique id assigned by the platform.
    pub uid: String,

    /// Desired replica count.
    pub replicas: i32,

    /// Creation time in unix seconds.
    pub created_at: i64,
}
