//! svnop kubehub: the API-server backed [`Store`] and the controller loop.

#![forbid(unsafe_code)]

use std::any::{Any, TypeId};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use kube::api::{Api, ListParams, PostParams};
use kube::runtime::reflector;
use kube::{Client, Resource, ResourceExt};
use metrics::counter;
use rustc_hash::FxHashMap;
use svnop_core::{Object, ServerScoped, Store, StoreError, StoreResult};
use tracing::debug;

pub mod controller;

pub use controller::{run_controller, ControllerConfig};

/// Client from the ambient kubeconfig or in-cluster service account.
pub async fn get_kube_client() -> Result<Client> {
    Client::try_default().await.context("building kube client")
}

/// Reflector readers keyed by kind, consulted before the API server on
/// scoped listing.
#[derive(Clone, Default)]
pub struct ScopedCaches {
    by_kind: FxHashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl ScopedCaches {
    pub fn insert<K: Object>(&mut self, reader: reflector::Store<K>) {
        self.by_kind.insert(TypeId::of::<K>(), Arc::new(reader));
    }

    fn get<K: Object>(&self) -> Option<&reflector::Store<K>> {
        self.by_kind.get(&TypeId::of::<K>())?.downcast_ref()
    }

    /// Cached rows of `K` in `namespace` referencing `server`, sorted by name.
    /// `None` when no reader is registered for `K`.
    pub fn scoped<K: Object + ServerScoped>(&self, namespace: &str, server: &str) -> Option<Vec<K>> {
        let reader = self.get::<K>()?;
        let mut rows: Vec<K> = reader
            .state()
            .into_iter()
            .filter(|o| o.meta().namespace.as_deref() == Some(namespace) && o.server_name() == server)
            .map(|o| K::clone(&o))
            .collect();
        rows.sort_by_cached_key(|o| o.name_any());
        Some(rows)
    }
}

/// [`Store`] backed by the Kubernetes API server.
///
/// Scoped listing reads the registered reflector caches. Kinds without a
/// cache fall back to a namespace LIST filtered client-side, since
/// `spec.svnServer` is not a supported field selector for custom resources.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    caches: ScopedCaches,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client, caches: ScopedCaches::default() }
    }

    pub fn with_caches(mut self, caches: ScopedCaches) -> Self {
        self.caches = caches;
        self
    }

    fn api<K: Object>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait::async_trait]
impl Store for KubeStore {
    async fn get<K: Object>(&self, namespace: &str, name: &str) -> StoreResult<Option<K>> {
        self.api::<K>(namespace).get_opt(name).await.map_err(|e| api_error::<K>(namespace, name, e))
    }

    async fn list_scoped<K: Object + ServerScoped>(&self, namespace: &str, server: &str) -> StoreResult<Vec<K>> {
        if let Some(rows) = self.caches.scoped::<K>(namespace, server) {
            counter!("kube_cache_reads_total", 1u64);
            return Ok(rows);
        }
        let list = self
            .api::<K>(namespace)
            .list(&ListParams::default())
            .await
            .map_err(|e| api_error::<K>(namespace, "", e))?;
        let total = list.items.len();
        let rows: Vec<K> = list.items.into_iter().filter(|o| o.server_name() == server).collect();
        debug!(kind = %K::kind(&()), ns = %namespace, server = %server, total, scoped = rows.len(), "list scoped");
        Ok(rows)
    }

    async fn create<K: Object>(&self, obj: &K) -> StoreResult<K> {
        let (namespace, name) = identity(obj)?;
        let res = self.api::<K>(&namespace).create(&PostParams::default(), obj).await;
        counter!("kube_writes_total", 1u64);
        res.map_err(|e| api_error::<K>(&namespace, &name, e))
    }

    async fn update<K: Object>(&self, obj: &K) -> StoreResult<K> {
        let (namespace, name) = identity(obj)?;
        let res = self.api::<K>(&namespace).replace(&name, &PostParams::default(), obj).await;
        counter!("kube_writes_total", 1u64);
        res.map_err(|e| api_error::<K>(&namespace, &name, e))
    }

    async fn update_status<K: Object>(&self, obj: &K) -> StoreResult<K> {
        let (namespace, name) = identity(obj)?;
        let body = serde_json::to_vec(obj)
            .map_err(|source| StoreError::Codec { kind: K::kind(&()).to_string(), source })?;
        let res = self.api::<K>(&namespace).replace_status(&name, &PostParams::default(), body).await;
        counter!("kube_writes_total", 1u64);
        res.map_err(|e| api_error::<K>(&namespace, &name, e))
    }
}

fn identity<K: Object>(obj: &K) -> StoreResult<(String, String)> {
    let kind = K::kind(&()).to_string();
    let namespace = obj.namespace().ok_or_else(|| StoreError::MissingField { kind: kind.clone(), field: "namespace" })?;
    let name = obj.meta().name.clone().ok_or(StoreError::MissingField { kind, field: "name" })?;
    Ok((namespace, name))
}

/// Map API-server status codes onto the store taxonomy.
fn api_error<K: Object>(namespace: &str, name: &str, err: kube::Error) -> StoreError {
    let kind = K::kind(&()).to_string();
    let (namespace, name) = (namespace.to_string(), name.to_string());
    match &err {
        kube::Error::Api(resp) if resp.code == 404 => StoreError::NotFound { kind, namespace, name },
        kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
            StoreError::AlreadyExists { kind, namespace, name }
        }
        kube::Error::Api(resp) if resp.code == 409 => StoreError::Conflict { kind, namespace, name },
        _ => StoreError::Backend { kind, namespace, name, source: Box::new(err) },
    }
}
