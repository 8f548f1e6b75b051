//! svnop reconcile: one convergence pass per SvnServer.
//!
//! A pass makes sure the server's headless Service, StatefulSet and ConfigMap
//! exist and match what the server and its repositories, groups and users
//! describe. Missing objects are created one per pass and the pass asks to be
//! requeued; existing ones are updated in place and a `Synced` condition is
//! appended to the server status.

#![forbid(unsafe_code)]

use std::fmt;
use std::time::Instant;

use chrono::Utc;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use metrics::{counter, histogram};
use svnop_core::{
    add_condition, Condition, Store, StoreError, SvnGroup, SvnRepository, SvnServer, SvnServerStatus, SvnUser,
};
use svnop_render::{build_generator, RenderError};
use tracing::{debug, error, info};

pub mod desired;
pub mod merge;

use desired::{config_map_for, service_for, stateful_set_for};
use merge::override_with_pod_template;

/// Image used when a server does not override it.
pub const DEFAULT_IMAGE: &str = "svnop/svn-server:latest";

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub default_image: String,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self { default_image: DEFAULT_IMAGE.to_string() }
    }
}

/// How a pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The server no longer exists; nothing to do.
    Gone,
    /// An owned object was just created; run again right away.
    Requeue,
    /// Everything already matched. No writes were made.
    Unchanged,
    /// Owned objects were updated and a condition was recorded.
    Synced,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Gone => "gone",
            Outcome::Requeue => "requeue",
            Outcome::Unchanged => "unchanged",
            Outcome::Synced => "synced",
        }
    }
}

/// Stage of a pass, carried on errors and log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Load,
    Endpoint,
    Workload,
    Related,
    Bundle,
    Merge,
    Status,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Step::Load => "load server",
            Step::Endpoint => "ensure service",
            Step::Workload => "ensure statefulset",
            Step::Related => "list related",
            Step::Bundle => "ensure configmap",
            Step::Merge => "update statefulset",
            Step::Status => "update status",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("{step}: {source}")]
    Store { step: Step, #[source] source: StoreError },
    #[error("{step}: {source}")]
    Render { step: Step, #[source] source: RenderError },
}

impl ReconcileError {
    pub fn step(&self) -> Step {
        match self {
            ReconcileError::Store { step, .. } | ReconcileError::Render { step, .. } => *step,
        }
    }

    /// Whether a later pass can be expected to succeed without outside changes.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReconcileError::Store { source, .. } => source.is_retryable(),
            ReconcileError::Render { .. } => false,
        }
    }
}

trait AtStep<T> {
    fn at(self, step: Step) -> Result<T, ReconcileError>;
}

impl<T> AtStep<T> for Result<T, StoreError> {
    fn at(self, step: Step) -> Result<T, ReconcileError> {
        self.map_err(|source| ReconcileError::Store { step, source })
    }
}

impl<T> AtStep<T> for Result<T, RenderError> {
    fn at(self, step: Step) -> Result<T, ReconcileError> {
        self.map_err(|source| ReconcileError::Render { step, source })
    }
}

pub struct Reconciler<S> {
    store: S,
    config: ReconcilerConfig,
}

impl<S: Store> Reconciler<S> {
    pub fn new(store: S, config: ReconcilerConfig) -> Self {
        Self { store, config }
    }

    /// Run one pass for the server `namespace/name`.
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Outcome, ReconcileError> {
        let started = Instant::now();
        counter!("reconcile_total", 1u64);
        let res = self.pass(namespace, name).await;
        histogram!("reconcile_latency_ms", started.elapsed().as_secs_f64() * 1000.0);
        match &res {
            Ok(outcome) => debug!(ns = %namespace, name = %name, outcome = outcome.as_str(), "reconcile done"),
            Err(e) => {
                counter!("reconcile_errors_total", 1u64);
                error!(ns = %namespace, name = %name, step = %e.step(), error = %e, "reconcile failed");
            }
        }
        res
    }

    async fn pass(&self, ns: &str, name: &str) -> Result<Outcome, ReconcileError> {
        let Some(server) = self.store.get::<SvnServer>(ns, name).await.at(Step::Load)? else {
            debug!(ns = %ns, name = %name, "server gone");
            return Ok(Outcome::Gone);
        };

        if self.store.get::<Service>(ns, name).await.at(Step::Endpoint)?.is_none() {
            self.store.create(&service_for(&server)).await.at(Step::Endpoint)?;
            info!(ns = %ns, name = %name, "created service");
            return Ok(Outcome::Requeue);
        }

        let Some(observed_ss) = self.store.get::<StatefulSet>(ns, name).await.at(Step::Workload)? else {
            self.store.create(&stateful_set_for(&server, &self.config.default_image)).await.at(Step::Workload)?;
            info!(ns = %ns, name = %name, "created statefulset");
            return Ok(Outcome::Requeue);
        };

        let repos: Vec<SvnRepository> = self.store.list_scoped(ns, name).await.at(Step::Related)?;
        let groups: Vec<SvnGroup> = self.store.list_scoped(ns, name).await.at(Step::Related)?;
        let users: Vec<SvnUser> = self.store.list_scoped(ns, name).await.at(Step::Related)?;
        let generator = build_generator(&repos, &groups, &users);

        let Some(observed_cm) = self.store.get::<ConfigMap>(ns, name).await.at(Step::Bundle)? else {
            let cm = config_map_for(&server, &generator).at(Step::Bundle)?;
            self.store.create(&cm).await.at(Step::Bundle)?;
            info!(ns = %ns, name = %name, "created configmap");
            return Ok(Outcome::Requeue);
        };
        let desired_data = generator.render().at(Step::Bundle)?.into_data();

        let mut desired_ss = observed_ss.clone();
        override_with_pod_template(&server, &mut desired_ss, &self.config.default_image);

        let mut writes = 0u64;
        if desired_ss != observed_ss {
            self.store.update(&desired_ss).await.at(Step::Merge)?;
            info!(ns = %ns, name = %name, "updated statefulset");
            writes += 1;
        }
        if observed_cm.data.as_ref() != Some(&desired_data) {
            let mut cm = observed_cm;
            cm.data = Some(desired_data);
            self.store.update(&cm).await.at(Step::Bundle)?;
            info!(ns = %ns, name = %name, "updated configmap");
            writes += 1;
        }
        if writes == 0 {
            return Ok(Outcome::Unchanged);
        }
        counter!("reconcile_writes_total", writes);

        let mut server = server;
        let history = server.status.take().map(|s| s.conditions).unwrap_or_default();
        server.status = Some(SvnServerStatus { conditions: add_condition(history, Condition::synced_at(Utc::now())) });
        self.store.update_status(&server).await.at(Step::Status)?;
        Ok(Outcome::Synced)
    }
}
