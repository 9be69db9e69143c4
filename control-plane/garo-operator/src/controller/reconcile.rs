use std::sync::Arc;
use std::time::Duration;

use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use super::ReconcileErr;
use super::applier::Applier;
use super::events::EventSink;
use super::inventory::{observe_pods, pod_name_prefix};
use super::planner::{PlanInput, plan};
use super::resolver::resolve;
use super::store::{PodStore, PoolSource, SecretSource};
use super::types::{ActionKind, ControlSignal, PassSummary, PodAction, ReconcileOutcome};
use crate::config::ReconcileConfig;
use crate::crd::GithubActionRunner;
use crate::github::{FetchError, RunnerApi, RunnerStatus};

/// External capabilities a reconciliation pass works against.
#[derive(Clone)]
pub struct Capabilities {
    pub pools: Arc<dyn PoolSource>,
    pub secrets: Arc<dyn SecretSource>,
    pub pods: Arc<dyn PodStore>,
    pub runners: Arc<dyn RunnerApi>,
    pub events: Arc<dyn EventSink>,
}

#[derive(Clone, Debug)]
pub struct ReconcileSettings {
    /// Delay returned with `RequeueAfter` when GitHub is unavailable.
    pub backoff: Duration,
    /// Bound applied to every external call.
    pub call_timeout: Duration,
    pub max_parallel_actions: usize,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(30),
            call_timeout: Duration::from_secs(15),
            max_parallel_actions: 1,
        }
    }
}

impl From<&ReconcileConfig> for ReconcileSettings {
    fn from(cfg: &ReconcileConfig) -> Self {
        Self {
            backoff: cfg.backoff(),
            call_timeout: cfg.call_timeout(),
            max_parallel_actions: cfg.parallel_actions(),
        }
    }
}

/// Drives one pool from its declared state to its live state.
///
/// Holds no state between passes: every pass re-reads the pool, its pods and
/// the registrations, so an interrupted pass is simply redone by the next one.
#[derive(Clone)]
pub struct PoolReconciler {
    caps: Capabilities,
    settings: ReconcileSettings,
}

impl PoolReconciler {
    pub fn new(caps: Capabilities, settings: ReconcileSettings) -> Self {
        Self { caps, settings }
    }

    /// Reconcile the pool identified by namespace and name. A pool that no
    /// longer exists needs nothing.
    pub async fn reconcile_pool(&self, namespace: &str, name: &str) -> ReconcileOutcome {
        let loaded = tokio::time::timeout(
            self.settings.call_timeout,
            self.caps.pools.get_pool(namespace, name),
        )
        .await;
        match loaded {
            Ok(Ok(Some(pool))) => self.reconcile(&pool).await,
            Ok(Ok(None)) => {
                debug!(%namespace, %name, "reconcile: pool not found; nothing to do");
                ReconcileOutcome::aborted(ControlSignal::NoRequeue)
            }
            Ok(Err(e)) => ReconcileOutcome::aborted(ControlSignal::Error(
                ReconcileErr::StoreUnavailable(e.to_string()),
            )),
            Err(_) => ReconcileOutcome::aborted(ControlSignal::Error(
                ReconcileErr::StoreUnavailable(format!(
                    "loading pool timed out after {:?}",
                    self.settings.call_timeout
                )),
            )),
        }
    }

    #[instrument(skip_all, fields(ns = %obj.namespace().unwrap_or_default(), name = %obj.name_any()))]
    pub async fn reconcile(&self, obj: &GithubActionRunner) -> ReconcileOutcome {
        let timeout = self.settings.call_timeout;

        let resolved = match resolve(obj, self.caps.secrets.as_ref(), timeout).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "reconcile: pool could not be resolved");
                return ReconcileOutcome::aborted(ControlSignal::Error(e));
            }
        };

        // Registrations and inventory are independent; both must be in hand
        // before planning.
        let (runners, pods) = tokio::join!(
            self.fetch_runners(&resolved.organization, &resolved.repository, resolved.token.as_str()),
            observe_pods(self.caps.pods.as_ref(), &resolved.pool, timeout),
        );

        let runners = match runners {
            Ok(r) => r,
            Err(FetchError::Unavailable(msg)) => {
                warn!(error = %msg, backoff = ?self.settings.backoff, "reconcile: runner registry unavailable; deferring");
                return ReconcileOutcome::deferred(
                    ReconcileErr::ExternalServiceUnavailable(msg),
                    self.settings.backoff,
                );
            }
            Err(FetchError::Unauthorized(msg)) => {
                warn!(error = %msg, "reconcile: runner registry rejected token");
                return ReconcileOutcome::aborted(ControlSignal::Error(
                    ReconcileErr::Unauthorized(msg),
                ));
            }
        };
        let pods = match pods {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "reconcile: pod inventory unavailable");
                return ReconcileOutcome::aborted(ControlSignal::Error(e));
            }
        };

        let prefix = pod_name_prefix(&resolved.pool);
        let plan = plan(PlanInput {
            bounds: resolved.bounds,
            name_prefix: &prefix,
            pods: &pods,
            runners: &runners,
        });
        info!(
            pods = pods.len(),
            runners = runners.len(),
            min = resolved.bounds.min,
            max = resolved.bounds.max,
            actions = plan.actions.len(),
            target = plan.resulting_pods(pods.len()),
            "reconcile: plan computed"
        );
        for action in &plan.actions {
            if let PodAction::Delete { pod } = action {
                debug!(%pod, class = ?plan.classes.get(pod), "reconcile: pod selected for deletion");
            }
        }
        if !plan.stale_registrations.is_empty() {
            info!(stale = ?plan.stale_registrations, "reconcile: offline registrations without pods");
        }

        let report = Applier {
            store: self.caps.pods.as_ref(),
            events: self.caps.events.as_ref(),
            max_parallel: self.settings.max_parallel_actions,
            call_timeout: timeout,
        }
        .apply(&resolved, &plan.actions)
        .await;

        let created = report
            .applied
            .iter()
            .filter(|a| a.kind == ActionKind::Create)
            .count();
        let deleted = report.applied.len() - created;
        let summary = PassSummary {
            observed_pods: pods.len(),
            registered_runners: runners.len(),
            resulting_pods: (pods.len() + created).saturating_sub(deleted),
            stale_registrations: plan.stale_registrations,
        };

        let signal = match report.error() {
            Some(e) => {
                warn!(error = %e, "reconcile: some pod actions failed");
                ControlSignal::Error(e)
            }
            None => ControlSignal::NoRequeue,
        };

        ReconcileOutcome {
            actions: report.applied,
            signal,
            summary: Some(summary),
            deferred: None,
        }
    }

    async fn fetch_runners(
        &self,
        organization: &str,
        repository: &str,
        token: &str,
    ) -> Result<Vec<RunnerStatus>, FetchError> {
        tokio::time::timeout(
            self.settings.call_timeout,
            self.caps.runners.list_runners(organization, repository, token),
        )
        .await
        .map_err(|_| {
            FetchError::Unavailable(format!(
                "listing runners timed out after {:?}",
                self.settings.call_timeout
            ))
        })?
    }
}
