//! The declarative object store consumed by the reconciler.
//!
//! Backends: `svnop-kubehub` talks to the API server, `svnop-store` keeps
//! everything in memory. Both honor optimistic concurrency: updates carry the
//! `resourceVersion` observed at read time and fail with [`StoreError::Conflict`]
//! when it is stale.

use std::fmt::Debug;

use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use serde::{de::DeserializeOwned, Serialize};

/// JSON pointer of the server back-reference on repositories, groups and users.
pub const SERVER_REF_POINTER: &str = "/spec/svnServer";

/// Any namespaced kind the store can hold.
pub trait Object:
    Resource<DynamicType = (), Scope = NamespaceResourceScope> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> Object for T where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Kinds that belong to exactly one server.
pub trait ServerScoped {
    fn server_name(&self) -> &str;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound { kind: String, namespace: String, name: String },
    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists { kind: String, namespace: String, name: String },
    #[error("{kind} {namespace}/{name} was modified concurrently (stale resourceVersion)")]
    Conflict { kind: String, namespace: String, name: String },
    #[error("{kind} is missing metadata.{field}")]
    MissingField { kind: String, field: &'static str },
    #[error("encoding {kind}: {source}")]
    Codec { kind: String, #[source] source: serde_json::Error },
    #[error("{kind} {namespace}/{name}: {source}")]
    Backend {
        kind: String,
        namespace: String,
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl StoreError {
    /// Conflicts and backend hiccups go away on a fresh read.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict { .. } | StoreError::Backend { .. } | StoreError::AlreadyExists { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait::async_trait]
pub trait Store: Send + Sync {
    /// Fetch one object; a missing object is `Ok(None)`, not an error.
    async fn get<K: Object>(&self, namespace: &str, name: &str) -> StoreResult<Option<K>>;

    /// List objects of `K` in `namespace` whose server back-reference equals `server`.
    async fn list_scoped<K: Object + ServerScoped>(&self, namespace: &str, server: &str) -> StoreResult<Vec<K>>;

    async fn create<K: Object>(&self, obj: &K) -> StoreResult<K>;

    /// Replace the object; `metadata.resourceVersion` must match the stored one.
    async fn update<K: Object>(&self, obj: &K) -> StoreResult<K>;

    /// Replace only the status subresource, under the same version check as [`Store::update`].
    async fn update_status<K: Object>(&self, obj: &K) -> StoreResult<K>;
}
