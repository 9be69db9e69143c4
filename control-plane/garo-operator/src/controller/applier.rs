use std::time::Duration;

use futures_util::{StreamExt, stream};
use tracing::{info, warn};

use super::ReconcileErr;
use super::events::EventSink;
use super::resolver::ResolvedPool;
use super::store::PodStore;
use super::types::{ActionKind, AppliedAction, PodAction};
use crate::templates::render_runner_pod;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailedAction {
    pub kind: ActionKind,
    /// Target pod for deletes; creates have no name until the server assigns one.
    pub pod: Option<String>,
    pub error: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub applied: Vec<AppliedAction>,
    pub failed: Vec<FailedAction>,
}

impl ApplyReport {
    /// Aggregate error when at least one action failed.
    pub fn error(&self) -> Option<ReconcileErr> {
        if self.failed.is_empty() {
            return None;
        }
        Some(ReconcileErr::PodActionFailed {
            failed: self.failed.len(),
            attempted: self.failed.len() + self.applied.len(),
            errors: self
                .failed
                .iter()
                .map(|f| match &f.pod {
                    Some(p) => format!("{} {}: {}", f.kind.as_str(), p, f.error),
                    None => format!("{}: {}", f.kind.as_str(), f.error),
                })
                .collect(),
        })
    }
}

pub struct Applier<'a> {
    pub store: &'a dyn PodStore,
    pub events: &'a dyn EventSink,
    pub max_parallel: usize,
    pub call_timeout: Duration,
}

impl Applier<'_> {
    /// Apply every action, keeping going past individual failures. Results are
    /// reported in action order; nothing is retried or rolled back here.
    pub async fn apply(
        &self,
        resolved: &ResolvedPool,
        actions: &[PodAction],
    ) -> ApplyReport {
        let results: Vec<Result<AppliedAction, FailedAction>> =
            stream::iter(actions.iter().cloned())
                .map(|action| async move { self.apply_one(resolved, &action).await })
                .buffered(self.max_parallel.max(1))
                .collect()
                .await;

        let mut report = ApplyReport::default();
        for r in results {
            match r {
                Ok(applied) => report.applied.push(applied),
                Err(failed) => report.failed.push(failed),
            }
        }
        report
    }

    async fn apply_one(
        &self,
        resolved: &ResolvedPool,
        action: &PodAction,
    ) -> Result<AppliedAction, FailedAction> {
        let ns = resolved.pool.namespace.as_str();
        let kind = action.kind();
        let result = match action {
            PodAction::Create => {
                let pod = render_runner_pod(resolved);
                tokio::time::timeout(self.call_timeout, self.store.create(ns, pod))
                    .await
                    .map_err(|_| format!("timed out after {:?}", self.call_timeout))
                    .and_then(|r| r.map_err(|e| e.to_string()))
            }
            PodAction::Delete { pod } => {
                tokio::time::timeout(self.call_timeout, self.store.delete(ns, pod))
                    .await
                    .map_err(|_| format!("timed out after {:?}", self.call_timeout))
                    .and_then(|r| r.map_err(|e| e.to_string()))
                    .map(|_| pod.clone())
            }
        };

        match result {
            Ok(pod) => {
                info!(pool = %resolved.pool, action = kind.as_str(), %pod, "applier: action applied");
                let recorded = tokio::time::timeout(
                    self.call_timeout,
                    self.events.record(&resolved.pool, kind, &pod),
                )
                .await
                .map_err(|_| format!("timed out after {:?}", self.call_timeout))
                .and_then(|r| r);
                if let Err(e) = recorded {
                    warn!(pool = %resolved.pool, %pod, error = %e, "applier: failed to record event");
                }
                Ok(AppliedAction { kind, pod })
            }
            Err(error) => {
                let pod = match action {
                    PodAction::Delete { pod } => Some(pod.clone()),
                    PodAction::Create => None,
                };
                warn!(pool = %resolved.pool, action = kind.as_str(), pod = ?pod, %error, "applier: action failed");
                Err(FailedAction { kind, pod, error })
            }
        }
    }
}
