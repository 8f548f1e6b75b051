#![forbid(unsafe_code)]

use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;
use svnop_core::{Store, StoreError, SvnRepository, SvnRepositorySpec, SvnServer, SvnServerSpec, SvnServerStatus};
use svnop_store::MemStore;

fn repo(ns: &str, name: &str, server: &str) -> SvnRepository {
    let mut r = SvnRepository::new(name, SvnRepositorySpec { svn_server: server.to_string() });
    r.metadata.namespace = Some(ns.to_string());
    r
}

fn cm(ns: &str, name: &str, value: &str) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta { name: Some(name.into()), namespace: Some(ns.into()), ..Default::default() },
        data: Some([("k".to_string(), value.to_string())].into()),
        ..Default::default()
    }
}

#[tokio::test]
async fn scoped_list_only_returns_rows_of_that_server() {
    let store = MemStore::new();
    for (ns, name, server) in [("ns", "b", "s1"), ("ns", "a", "s1"), ("ns", "c", "s2"), ("other", "d", "s1")] {
        store.create(&repo(ns, name, server)).await.unwrap();
    }
    let rows: Vec<SvnRepository> = store.list_scoped("ns", "s1").await.unwrap();
    let names: Vec<_> = rows.iter().map(|r| r.metadata.name.clone().unwrap()).collect();
    assert_eq!(names, vec!["a", "b"]);

    let none: Vec<SvnRepository> = store.list_scoped("ns", "missing").await.unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn index_follows_back_reference_changes_and_removal() {
    let store = MemStore::new();
    let created = store.create(&repo("ns", "r", "s1")).await.unwrap();

    let mut moved = created.clone();
    moved.spec.svn_server = "s2".into();
    store.update(&moved).await.unwrap();
    assert!(store.list_scoped::<SvnRepository>("ns", "s1").await.unwrap().is_empty());
    assert_eq!(store.list_scoped::<SvnRepository>("ns", "s2").await.unwrap().len(), 1);

    assert!(store.remove::<SvnRepository>("ns", "r"));
    assert!(store.list_scoped::<SvnRepository>("ns", "s2").await.unwrap().is_empty());
    assert!(!store.remove::<SvnRepository>("ns", "r"));
}

#[tokio::test]
async fn create_assigns_uid_and_version_and_rejects_duplicates() {
    let store = MemStore::new();
    let created = store.create(&cm("ns", "x", "1")).await.unwrap();
    assert!(created.metadata.uid.is_some());
    assert_eq!(created.metadata.resource_version.as_deref(), Some("1"));

    let err = store.create(&cm("ns", "x", "2")).await.unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists { .. }), "err={err}");
    assert_eq!(store.writes(), 1);
}

#[tokio::test]
async fn stale_resource_version_is_a_conflict() {
    let store = MemStore::new();
    let v1 = store.create(&cm("ns", "x", "1")).await.unwrap();

    let mut a = v1.clone();
    a.data = Some([("k".to_string(), "a".to_string())].into());
    let v2 = store.update(&a).await.unwrap();
    assert_ne!(v2.metadata.resource_version, v1.metadata.resource_version);
    assert_eq!(v2.metadata.uid, v1.metadata.uid);

    let mut b = v1.clone();
    b.data = Some([("k".to_string(), "b".to_string())].into());
    let err = store.update(&b).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict { .. }));
    assert!(err.is_retryable());

    let live: ConfigMap = store.get("ns", "x").await.unwrap().unwrap();
    assert_eq!(live.data.unwrap()["k"], "a");
}

#[tokio::test]
async fn update_of_missing_object_is_not_found() {
    let store = MemStore::new();
    let err = store.update(&cm("ns", "ghost", "1")).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));
    assert!(store.get::<ConfigMap>("ns", "ghost").await.unwrap().is_none());
}

#[tokio::test]
async fn status_and_spec_writes_do_not_clobber_each_other() {
    let store = MemStore::new();
    let mut s = SvnServer::new("s1", SvnServerSpec::default());
    s.metadata.namespace = Some("ns".into());
    let created = store.create(&s).await.unwrap();

    let mut with_status = created.clone();
    with_status.status = Some(SvnServerStatus { conditions: vec![Default::default()] });
    with_status.spec.pod_template.image = Some("ignored-by-status-write".into());
    let after_status = store.update_status(&with_status).await.unwrap();
    assert_eq!(after_status.status.as_ref().map(|st| st.conditions.len()), Some(1));
    assert_eq!(after_status.spec.pod_template.image, None);

    let mut spec_change = after_status.clone();
    spec_change.status = None;
    spec_change.spec.pod_template.image = Some("svn:2".into());
    let after_spec = store.update(&spec_change).await.unwrap();
    assert_eq!(after_spec.spec.pod_template.image.as_deref(), Some("svn:2"));
    assert_eq!(after_spec.status.map(|st| st.conditions.len()), Some(1));
}

#[tokio::test]
async fn revision_channel_advances_on_writes() {
    let store = MemStore::new();
    let rx = store.subscribe_revision();
    assert_eq!(*rx.borrow(), 0);
    store.create(&cm("ns", "a", "1")).await.unwrap();
    store.create(&cm("ns", "b", "1")).await.unwrap();
    assert_eq!(*rx.borrow(), 2);
    assert_eq!(store.len(), 2);
}
