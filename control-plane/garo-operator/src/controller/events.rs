use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::Client;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};

#[cfg(test)]
use mockall::automock;

use super::types::{ActionKind, PoolRef};
use crate::crd::runner_pool::{GROUP, KIND, VERSION};

pub const REASON_POD_CREATED: &str = "PodCreated";
pub const REASON_POD_DELETED: &str = "PodDeleted";

pub fn reason_for(kind: ActionKind) -> &'static str {
    match kind {
        ActionKind::Create => REASON_POD_CREATED,
        ActionKind::Delete => REASON_POD_DELETED,
    }
}

/// Append-only sink for per-action events. Recording is best effort; callers
/// log failures and carry on.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn record(
        &self,
        pool: &PoolRef,
        kind: ActionKind,
        pod: &str,
    ) -> Result<(), String>;
}

pub fn build_obj_ref(pool: &PoolRef) -> ObjectReference {
    ObjectReference {
        api_version: Some(format!("{GROUP}/{VERSION}")),
        kind: Some(KIND.to_string()),
        name: Some(pool.name.clone()),
        namespace: Some(pool.namespace.clone()),
        uid: pool.uid.clone(),
        ..Default::default()
    }
}

/// Publishes Kubernetes events against the pool object.
#[derive(Clone)]
pub struct KubeEventSink {
    recorder: Recorder,
}

impl KubeEventSink {
    pub fn new(client: Client, reporter: &str) -> Self {
        let reporter = Reporter {
            controller: reporter.to_string(),
            instance: std::env::var("HOSTNAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventSink for KubeEventSink {
    async fn record(
        &self,
        pool: &PoolRef,
        kind: ActionKind,
        pod: &str,
    ) -> Result<(), String> {
        let note = match kind {
            ActionKind::Create => format!("Created runner pod {pod}"),
            ActionKind::Delete => format!("Deleted runner pod {pod}"),
        };
        self.recorder
            .publish(
                &Event {
                    type_: EventType::Normal,
                    reason: reason_for(kind).into(),
                    note: Some(note),
                    action: kind.as_str().into(),
                    secondary: None,
                },
                &build_obj_ref(pool),
            )
            .await
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_reference_points_at_pool() {
        let r = build_obj_ref(&PoolRef {
            namespace: "ci".into(),
            name: "runners".into(),
            uid: Some("uid-1".into()),
        });
        assert_eq!(r.api_version.as_deref(), Some("garo.tietoevry.com/v1alpha1"));
        assert_eq!(r.kind.as_deref(), Some("GithubActionRunner"));
        assert_eq!(r.namespace.as_deref(), Some("ci"));
        assert_eq!(r.uid.as_deref(), Some("uid-1"));
        assert_eq!(reason_for(ActionKind::Delete), REASON_POD_DELETED);
    }
}
