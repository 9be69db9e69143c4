use std::sync::Arc;

use futures_util::StreamExt;
use k8s_openapi::api::core::v1::{Pod, Secret};
use kube::{
    Client, Resource, ResourceExt,
    api::Api,
    runtime::{
        Controller,
        controller::{self, Action},
        reflector::ObjectRef,
        watcher::Config,
    },
};
use tokio::time::Duration;
use tracing::{error, info, instrument, warn};

use crate::config::{OperatorConfig, ReconcileConfig};
use crate::crd::GithubActionRunner;
use crate::github::{FetchError, GithubClient};

pub mod applier;
pub mod events;
pub mod inventory;
pub mod planner;
pub mod reconcile;
pub mod resolver;
pub mod status;
pub mod store;
pub mod types;


pub use reconcile::{Capabilities, PoolReconciler, ReconcileSettings};
pub use types::{ControlSignal, ReconcileOutcome};

use events::KubeEventSink;
use inventory::POOL_LABEL;
use store::KubeStore;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconcileErr {
    #[error("invalid pool spec: {0}")]
    SpecInvalid(String),
    #[error("credential unresolvable: {0}")]
    CredentialUnresolvable(String),
    #[error("runner registry unavailable: {0}")]
    ExternalServiceUnavailable(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("cluster api unavailable: {0}")]
    StoreUnavailable(String),
    #[error("{failed} of {attempted} pod actions failed: {}", .errors.join("; "))]
    PodActionFailed {
        failed: usize,
        attempted: usize,
        errors: Vec<String>,
    },
}

impl ReconcileErr {
    /// Transient failures are retried after the backoff; the rest wait for
    /// the pool or its secret to change.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReconcileErr::ExternalServiceUnavailable(_)
                | ReconcileErr::StoreUnavailable(_)
                | ReconcileErr::PodActionFailed { .. }
        )
    }

    /// Short machine-readable kind, used as condition reason.
    pub fn reason(&self) -> &'static str {
        match self {
            ReconcileErr::SpecInvalid(_) => "SpecInvalid",
            ReconcileErr::CredentialUnresolvable(_) => "CredentialUnresolvable",
            ReconcileErr::ExternalServiceUnavailable(_) => {
                "ExternalServiceUnavailable"
            }
            ReconcileErr::Unauthorized(_) => "Unauthorized",
            ReconcileErr::StoreUnavailable(_) => "StoreUnavailable",
            ReconcileErr::PodActionFailed { .. } => "PodActionFailed",
        }
    }
}

impl From<FetchError> for ReconcileErr {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Unavailable(m) => ReconcileErr::ExternalServiceUnavailable(m),
            FetchError::Unauthorized(m) => ReconcileErr::Unauthorized(m),
        }
    }
}

#[derive(Clone)]
pub struct ControllerContext {
    pub client: Client,
    pub cfg: OperatorConfig,
    pub reconciler: PoolReconciler,
}

fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = kube::core::NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

pub async fn run_controller(
    client: Client,
    cfg: OperatorConfig,
) -> anyhow::Result<()> {
    let ns = cfg.watch_namespace.as_deref();
    let pools: Api<GithubActionRunner> = scoped_api(&client, ns);
    let pods: Api<Pod> = scoped_api(&client, ns);

    let kube_store = Arc::new(KubeStore::new(client.clone()));
    let github = GithubClient::new(&cfg.github, cfg.reconcile.call_timeout())?;
    let reconciler = PoolReconciler::new(
        Capabilities {
            pools: kube_store.clone(),
            secrets: kube_store.clone(),
            pods: kube_store,
            runners: Arc::new(github),
            events: Arc::new(KubeEventSink::new(client.clone(), &cfg.reporter)),
        },
        ReconcileSettings::from(&cfg.reconcile),
    );

    let concurrency = cfg.reconcile.controller_concurrency.unwrap_or(0);
    let watch_secrets = cfg.reconcile.watch_secrets.unwrap_or(false);
    info!(
        namespace = ns.unwrap_or("*"),
        concurrency, watch_secrets, "controller: starting"
    );

    let mut ctrl = Controller::new(pools, Config::default())
        .owns(pods, Config::default().labels(POOL_LABEL))
        .with_config(controller::Config::default().concurrency(concurrency));

    if watch_secrets {
        let secrets: Api<Secret> = scoped_api(&client, ns);
        let cache = ctrl.store();
        ctrl = ctrl.watches(secrets, Config::default(), move |secret| {
            let secret_ns = secret.namespace();
            let secret_name = secret.name_any();
            cache
                .state()
                .into_iter()
                .filter(|p| {
                    p.namespace() == secret_ns
                        && p.spec.token_ref.name == secret_name
                })
                .map(|p| ObjectRef::from_obj(&*p))
                .collect::<Vec<_>>()
        });
    }

    let ctx = Arc::new(ControllerContext {
        client,
        cfg,
        reconciler,
    });

    ctrl.shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj_ref, action)) => {
                    info!(pool = %obj_ref, "reconciled: requeue={:?}", action)
                }
                Err(e) => warn!(error = %e, "reconcile failed"),
            }
        })
        .await;

    info!("controller: stopped");
    Ok(())
}

#[instrument(skip_all, fields(ns = %obj.namespace().unwrap_or_default(), name = %obj.name_any()))]
async fn reconcile(
    obj: Arc<GithubActionRunner>,
    ctx: Arc<ControllerContext>,
) -> Result<Action, ReconcileErr> {
    // Owned pods are garbage collected through their owner references
    if obj.meta().deletion_timestamp.is_some() {
        info!("reconcile: pool is being deleted; skipping");
        return Ok(Action::await_change());
    }

    let outcome = ctx.reconciler.reconcile(&obj).await;
    status::patch_status(&ctx.client, &obj, &outcome).await;
    next_action(outcome.signal, &ctx.cfg.reconcile)
}

/// Translate a pass outcome into what the controller runtime does next.
pub fn next_action(
    signal: ControlSignal,
    cfg: &ReconcileConfig,
) -> Result<Action, ReconcileErr> {
    match signal {
        ControlSignal::NoRequeue => Ok(match cfg.resync() {
            Some(d) => Action::requeue(d),
            None => Action::await_change(),
        }),
        ControlSignal::Requeue => Ok(Action::requeue(Duration::from_secs(1))),
        ControlSignal::RequeueAfter(d) => Ok(Action::requeue(d)),
        ControlSignal::Error(e) if e.is_retryable() => Err(e),
        ControlSignal::Error(e) => {
            error!(error = %e, "reconcile: terminal error; waiting for a change");
            Ok(Action::await_change())
        }
    }
}

fn error_policy(
    _obj: Arc<GithubActionRunner>,
    _error: &ReconcileErr,
    ctx: Arc<ControllerContext>,
) -> Action {
    Action::requeue(ctx.cfg.reconcile.backoff())
}
