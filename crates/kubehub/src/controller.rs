//! Controller loop: SvnServer is the primary; owned workloads and
//! repositories, groups and users referencing a server re-trigger it.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use anyhow::anyhow;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::reflector::{self, store::Writer, ObjectRef};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, ResourceExt};
use metrics::counter;
use svnop_core::{Object, ServerScoped, SvnGroup, SvnRepository, SvnServer, SvnUser};
use svnop_reconcile::{Outcome, ReconcileError, Reconciler, ReconcilerConfig};
use tracing::{debug, info, warn};

use crate::{KubeStore, ScopedCaches};

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Watch a single namespace; `None` watches the whole cluster.
    pub namespace: Option<String>,
    pub reconciler: ReconcilerConfig,
    /// Delay before a failed pass is retried.
    pub error_backoff: Duration,
}

struct Ctx {
    reconciler: Reconciler<KubeStore>,
    error_backoff: Duration,
}

fn api<K: Object>(client: &Client, namespace: Option<&str>) -> Api<K> {
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Reference to the server a repository, group or user belongs to.
pub fn server_ref<K: ServerScoped + ResourceExt>(obj: &K) -> Option<ObjectRef<SvnServer>> {
    let ns = obj.namespace()?;
    let server = obj.server_name();
    if server.is_empty() {
        return None;
    }
    Some(ObjectRef::new(server).within(&ns))
}

/// Translate a pass outcome into the next controller action.
pub fn action_for(outcome: Outcome) -> Action {
    match outcome {
        Outcome::Requeue => Action::requeue(Duration::ZERO),
        Outcome::Gone | Outcome::Unchanged | Outcome::Synced => Action::await_change(),
    }
}

async fn reconcile(server: Arc<SvnServer>, ctx: Arc<Ctx>) -> Result<Action, ReconcileError> {
    let Some(ns) = server.namespace() else {
        warn!(name = %server.name_any(), "server without namespace; skipping");
        return Ok(Action::await_change());
    };
    let outcome = ctx.reconciler.reconcile(&ns, &server.name_any()).await?;
    Ok(action_for(outcome))
}

fn error_policy(server: Arc<SvnServer>, err: &ReconcileError, ctx: Arc<Ctx>) -> Action {
    warn!(
        name = %server.name_any(),
        ns = ?server.namespace(),
        step = %err.step(),
        retryable = err.is_retryable(),
        error = %err,
        "reconcile error; backing off"
    );
    Action::requeue(ctx.error_backoff)
}

/// Feed one reflector cache until the watch stream ends.
async fn drive_cache<K: Object>(api: Api<K>, writer: Writer<K>) {
    reflector::reflector(writer, watcher(api, watcher::Config::default()).default_backoff())
        .for_each(|ev| async move {
            if let Err(e) = ev {
                warn!(kind = %K::kind(&()), error = %e, "cache watch error");
            }
        })
        .await;
}

/// Run the controller until the process is asked to stop.
pub async fn run_controller(client: Client, config: ControllerConfig) -> anyhow::Result<()> {
    let ns = config.namespace.as_deref();

    let (repos, repos_writer) = reflector::store::<SvnRepository>();
    let (groups, groups_writer) = reflector::store::<SvnGroup>();
    let (users, users_writer) = reflector::store::<SvnUser>();
    let drivers = [
        tokio::spawn(drive_cache(api::<SvnRepository>(&client, ns), repos_writer)),
        tokio::spawn(drive_cache(api::<SvnGroup>(&client, ns), groups_writer)),
        tokio::spawn(drive_cache(api::<SvnUser>(&client, ns), users_writer)),
    ];
    futures::try_join!(repos.wait_until_ready(), groups.wait_until_ready(), users.wait_until_ready())
        .map_err(|_| anyhow!("cache watch stopped before its first sync"))?;
    debug!("scoped caches synced");

    let mut caches = ScopedCaches::default();
    caches.insert(repos);
    caches.insert(groups);
    caches.insert(users);
    let store = KubeStore::new(client.clone()).with_caches(caches);
    let ctx = Arc::new(Ctx {
        reconciler: Reconciler::new(store, config.reconciler.clone()),
        error_backoff: config.error_backoff,
    });

    info!(ns = ?ns, image = %config.reconciler.default_image, "controller starting");
    Controller::new(api::<SvnServer>(&client, ns), watcher::Config::default())
        .owns(api::<Service>(&client, ns), watcher::Config::default())
        .owns(api::<StatefulSet>(&client, ns), watcher::Config::default())
        .owns(api::<ConfigMap>(&client, ns), watcher::Config::default())
        .watches(api::<SvnRepository>(&client, ns), watcher::Config::default(), |o| server_ref(&o))
        .watches(api::<SvnGroup>(&client, ns), watcher::Config::default(), |o| server_ref(&o))
        .watches(api::<SvnUser>(&client, ns), watcher::Config::default(), |o| server_ref(&o))
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => {
                    counter!("controller_reconciled_total", 1u64);
                    debug!(name = %obj.name, ns = ?obj.namespace, "reconciled");
                }
                Err(e) => warn!(error = %e, "controller event"),
            }
        })
        .await;
    for d in drivers {
        d.abort();
    }
    info!("controller stopped");
    Ok(())
}
