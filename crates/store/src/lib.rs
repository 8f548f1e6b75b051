//! svnop store: in-RAM object store keyed by kind/namespace/name.
//!
//! Objects are held as raw JSON, the way the API server would return them.
//! A server-scope index (kind, namespace, `spec.svnServer`) is maintained on
//! every write so scoped listing never scans the whole store.

#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use kube::{Resource, ResourceExt};
use metrics::counter;
use rustc_hash::FxHashMap;
use serde_json::Value as Json;
use svnop_core::store::SERVER_REF_POINTER;
use svnop_core::{Object, ServerScoped, Store, StoreError, StoreResult};
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

type ObjKey = (String, String, String);
type ScopeKey = (String, String, String);

#[derive(Default)]
struct Inner {
    objects: BTreeMap<ObjKey, Json>,
    by_server: FxHashMap<ScopeKey, BTreeSet<String>>,
    revision: u64,
    writes: u64,
}

impl Inner {
    fn reindex(&mut self, key: &ObjKey, old: Option<&Json>, new: Option<&Json>) {
        let (kind, ns, name) = key;
        if let Some(server) = old.and_then(server_ref) {
            let scope = (kind.clone(), ns.clone(), server.to_string());
            if let Some(names) = self.by_server.get_mut(&scope) {
                names.remove(name);
                if names.is_empty() {
                    self.by_server.remove(&scope);
                }
            }
        }
        if let Some(server) = new.and_then(server_ref) {
            self.by_server
                .entry((kind.clone(), ns.clone(), server.to_string()))
                .or_default()
                .insert(name.clone());
        }
    }

    fn bump(&mut self) -> u64 {
        self.revision += 1;
        self.writes += 1;
        self.revision
    }
}

/// Cloneable handle; clones share the same objects.
#[derive(Clone)]
pub struct MemStore {
    inner: Arc<Mutex<Inner>>,
    rev_tx: Arc<watch::Sender<u64>>,
}

impl Default for MemStore {
    fn default() -> Self { Self::new() }
}

impl MemStore {
    pub fn new() -> Self {
        let (rev_tx, _rx) = watch::channel(0u64);
        Self { inner: Arc::new(Mutex::new(Inner::default())), rev_tx: Arc::new(rev_tx) }
    }

    /// Number of successful create/update/status writes so far.
    pub fn writes(&self) -> u64 { self.lock().writes }

    pub fn len(&self) -> usize { self.lock().objects.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Subscribe to the store revision; it advances on every write.
    pub fn subscribe_revision(&self) -> watch::Receiver<u64> { self.rev_tx.subscribe() }

    /// Drop an object (and its index entry). Returns whether it existed.
    pub fn remove<K: Object>(&self, namespace: &str, name: &str) -> bool {
        let key = obj_key::<K>(namespace, name);
        let mut inner = self.lock();
        let Some(old) = inner.objects.remove(&key) else { return false };
        inner.reindex(&key, Some(&old), None);
        let rev = inner.bump();
        drop(inner);
        self.rev_tx.send_replace(rev);
        true
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write<K: Object>(&self, obj: &K, op: Write) -> StoreResult<K> {
        let (namespace, name) = identity(obj)?;
        let key = obj_key::<K>(&namespace, &name);
        let mut inner = self.lock();
        let current = inner.objects.get(&key).cloned();

        let stored = match (&op, current.as_ref()) {
            (Write::Create, Some(_)) => return Err(already_exists::<K>(&namespace, &name)),
            (Write::Create, None) => {
                let mut fresh = obj.clone();
                fresh.meta_mut().uid.get_or_insert_with(|| Uuid::new_v4().to_string());
                to_json(&fresh)?
            }
            (Write::Update | Write::Status, None) => return Err(not_found::<K>(&namespace, &name)),
            (Write::Update | Write::Status, Some(cur)) => {
                check_version::<K>(obj, cur, &namespace, &name)?;
                let incoming = to_json(obj)?;
                match op {
                    // spec writes never touch status, status writes never touch anything else
                    Write::Update => with_field(incoming, "status", cur.get("status")),
                    _ => with_field(cur.clone(), "status", incoming.get("status")),
                }
            }
        };

        let rev = inner.bump();
        let mut stored = stored;
        if let Some(meta) = stored.get_mut("metadata").and_then(Json::as_object_mut) {
            meta.insert("resourceVersion".into(), Json::String(rev.to_string()));
            if let Some(uid) = current.as_ref().and_then(|c| c.pointer("/metadata/uid")) {
                meta.insert("uid".into(), uid.clone());
            }
        }
        inner.reindex(&key, current.as_ref(), Some(&stored));
        inner.objects.insert(key, stored.clone());
        drop(inner);

        counter!("store_writes_total", 1u64);
        debug!(kind = %K::kind(&()), ns = %namespace, name = %name, op = op.as_str(), rev, "store write");
        self.rev_tx.send_replace(rev);
        from_json(stored)
    }
}

#[derive(Clone, Copy)]
enum Write {
    Create,
    Update,
    Status,
}

impl Write {
    fn as_str(&self) -> &'static str {
        match self {
            Write::Create => "create",
            Write::Update => "update",
            Write::Status => "update_status",
        }
    }
}

#[async_trait::async_trait]
impl Store for MemStore {
    async fn get<K: Object>(&self, namespace: &str, name: &str) -> StoreResult<Option<K>> {
        let found = self.lock().objects.get(&obj_key::<K>(namespace, name)).cloned();
        found.map(from_json::<K>).transpose()
    }

    async fn list_scoped<K: Object + ServerScoped>(&self, namespace: &str, server: &str) -> StoreResult<Vec<K>> {
        let kind = K::kind(&()).to_string();
        let rows: Vec<Json> = {
            let inner = self.lock();
            let scope = (kind.clone(), namespace.to_string(), server.to_string());
            match inner.by_server.get(&scope) {
                Some(names) => names
                    .iter()
                    .filter_map(|n| inner.objects.get(&(kind.clone(), namespace.to_string(), n.clone())).cloned())
                    .collect(),
                None => Vec::new(),
            }
        };
        rows.into_iter().map(from_json::<K>).collect()
    }

    async fn create<K: Object>(&self, obj: &K) -> StoreResult<K> { self.write(obj, Write::Create) }

    async fn update<K: Object>(&self, obj: &K) -> StoreResult<K> { self.write(obj, Write::Update) }

    async fn update_status<K: Object>(&self, obj: &K) -> StoreResult<K> { self.write(obj, Write::Status) }
}

fn obj_key<K: Object>(namespace: &str, name: &str) -> ObjKey {
    (K::kind(&()).to_string(), namespace.to_string(), name.to_string())
}

fn identity<K: Object>(obj: &K) -> StoreResult<(String, String)> {
    let kind = K::kind(&()).to_string();
    let namespace = obj.namespace().ok_or_else(|| StoreError::MissingField { kind: kind.clone(), field: "namespace" })?;
    let name = obj.meta().name.clone().ok_or(StoreError::MissingField { kind, field: "name" })?;
    Ok((namespace, name))
}

fn check_version<K: Object>(obj: &K, current: &Json, namespace: &str, name: &str) -> StoreResult<()> {
    let Some(expected) = obj.meta().resource_version.as_deref() else { return Ok(()) };
    let stored = current.pointer("/metadata/resourceVersion").and_then(Json::as_str);
    if stored == Some(expected) {
        Ok(())
    } else {
        counter!("store_conflicts_total", 1u64);
        Err(StoreError::Conflict { kind: K::kind(&()).to_string(), namespace: namespace.into(), name: name.into() })
    }
}

fn server_ref(v: &Json) -> Option<&str> {
    v.pointer(SERVER_REF_POINTER).and_then(Json::as_str)
}

fn with_field(mut target: Json, field: &str, value: Option<&Json>) -> Json {
    if let Some(obj) = target.as_object_mut() {
        match value {
            Some(v) => {
                obj.insert(field.to_string(), v.clone());
            }
            None => {
                obj.remove(field);
            }
        }
    }
    target
}

fn to_json<K: Object>(obj: &K) -> StoreResult<Json> {
    serde_json::to_value(obj).map_err(|source| StoreError::Codec { kind: K::kind(&()).to_string(), source })
}

fn from_json<K: Object>(v: Json) -> StoreResult<K> {
    serde_json::from_value(v).map_err(|source| StoreError::Codec { kind: K::kind(&()).to_string(), source })
}

fn not_found<K: Object>(namespace: &str, name: &str) -> StoreError {
    StoreError::NotFound { kind: K::kind(&()).to_string(), namespace: namespace.into(), name: name.into() }
}

fn already_exists<K: Object>(namespace: &str, name: &str) -> StoreError {
    StoreError::AlreadyExists { kind: K::kind(&()).to_string(), namespace: namespace.into(), name: name.into() }
}
