use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;

use super::ReconcileErr;

/// Identity of a runner pool (the `GithubActionRunner` object).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PoolRef {
    pub namespace: String,
    pub name: String,
    pub uid: Option<String>,
}

impl fmt::Display for PoolRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    pub fn parse(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => PodPhase::Pending,
            Some("Running") => PodPhase::Running,
            Some("Succeeded") => PodPhase::Succeeded,
            Some("Failed") => PodPhase::Failed,
            // Freshly created pods carry no status yet
            None => PodPhase::Pending,
            Some(_) => PodPhase::Unknown,
        }
    }

    pub fn is_terminated(self) -> bool {
        matches!(self, PodPhase::Succeeded | PodPhase::Failed)
    }
}

/// A runner pod belonging to a pool, as seen in the cluster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManagedPod {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub phase: PodPhase,
}

impl From<&Pod> for ManagedPod {
    fn from(pod: &Pod) -> Self {
        ManagedPod {
            name: pod.name_any(),
            created_at: pod
                .metadata
                .creation_timestamp
                .as_ref()
                .map(|t| t.0)
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            phase: PodPhase::parse(
                pod.status.as_ref().and_then(|s| s.phase.as_deref()),
            ),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Create,
    Delete,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Create => "Create",
            ActionKind::Delete => "Delete",
        }
    }
}

/// A single pod mutation computed by the planner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PodAction {
    /// Instantiate one pod from the pool template.
    Create,
    Delete { pod: String },
}

impl PodAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            PodAction::Create => ActionKind::Create,
            PodAction::Delete { .. } => ActionKind::Delete,
        }
    }
}

/// An action that reached the pod store, with the name of the affected pod.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppliedAction {
    pub kind: ActionKind,
    pub pod: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlSignal {
    NoRequeue,
    Requeue,
    RequeueAfter(Duration),
    Error(ReconcileErr),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub observed_pods: usize,
    pub registered_runners: usize,
    pub resulting_pods: usize,
    pub stale_registrations: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub actions: Vec<AppliedAction>,
    pub signal: ControlSignal,
    /// Present once inventory and registrations were both observed.
    pub summary: Option<PassSummary>,
    /// Transient failure behind a `RequeueAfter`.
    pub deferred: Option<ReconcileErr>,
}

impl ReconcileOutcome {
    pub fn aborted(signal: ControlSignal) -> Self {
        ReconcileOutcome {
            actions: Vec::new(),
            signal,
            summary: None,
            deferred: None,
        }
    }

    pub fn deferred(cause: ReconcileErr, after: Duration) -> Self {
        ReconcileOutcome {
            deferred: Some(cause),
            ..Self::aborted(ControlSignal::RequeueAfter(after))
        }
    }

    /// The error that ended or deferred the pass, if any.
    pub fn error(&self) -> Option<&ReconcileErr> {
        match &self.signal {
            ControlSignal::Error(e) => Some(e),
            _ => self.deferred.as_ref(),
        }
    }

    pub fn count(&self, kind: ActionKind) -> usize {
        self.actions.iter().filter(|a| a.kind == kind).count()
    }
}
