use chrono::{DateTime, SecondsFormat, Utc};
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, Resource, ResourceExt};
use serde_json::{Value as JsonValue, json};
use tracing::{debug, trace, warn};

use super::ReconcileErr;
use super::types::{ActionKind, ControlSignal, ReconcileOutcome};
use crate::crd::GithubActionRunner;
use crate::crd::runner_pool::{
    Condition, ConditionStatus, ConditionType, GithubActionRunnerStatus,
};

pub const PHASE_READY: &str = "Ready";
pub const PHASE_SCALING: &str = "Scaling";
pub const PHASE_DEGRADED: &str = "Degraded";
pub const PHASE_ERROR: &str = "Error";

/// Derive the pool status from a pass outcome.
///
/// Counts are carried over from `current` when the pass ended before the
/// inventory was observed, and a condition keeps its `lastTransitionTime`
/// while its status does not change.
pub fn build_status(
    current: Option<&GithubActionRunnerStatus>,
    generation: Option<i64>,
    outcome: &ReconcileOutcome,
    now: DateTime<Utc>,
) -> GithubActionRunnerStatus {
    let now = now.to_rfc3339_opts(SecondsFormat::Secs, true);
    let err = outcome.error();

    let (phase, message) = match (&outcome.signal, err) {
        (ControlSignal::Error(e), _) if outcome.summary.is_some() => {
            (PHASE_DEGRADED, e.to_string())
        }
        (ControlSignal::Error(e), _) => (PHASE_ERROR, e.to_string()),
        (_, Some(e)) => (PHASE_DEGRADED, e.to_string()),
        _ if outcome.actions.is_empty() => {
            (PHASE_READY, "pool size within bounds".to_string())
        }
        _ => (
            PHASE_SCALING,
            format!(
                "created {} and deleted {} runner pods",
                outcome.count(ActionKind::Create),
                outcome.count(ActionKind::Delete)
            ),
        ),
    };

    let prev_conditions = current.and_then(|c| c.conditions.as_deref());
    let ready = if phase == PHASE_READY {
        (ConditionStatus::True, "PoolWithinBounds".to_string())
    } else {
        (
            ConditionStatus::False,
            err.map(|e| e.reason().to_string())
                .unwrap_or_else(|| PHASE_SCALING.to_string()),
        )
    };
    let mut conditions = vec![with_transition(
        prev_conditions,
        Condition {
            type_: ConditionType::Ready,
            status: ready.0,
            reason: Some(ready.1),
            message: Some(message.clone()),
            last_transition_time: None,
        },
        &now,
    )];
    if let Some(cred) = credentials_condition(prev_conditions, err) {
        conditions.push(with_transition(prev_conditions, cred, &now));
    }

    let (current_size, registered_runners, stale_registrations) =
        match &outcome.summary {
            Some(s) => (
                Some(s.resulting_pods as i32),
                Some(s.registered_runners as i32),
                Some(s.stale_registrations.clone()),
            ),
            None => (
                current.and_then(|c| c.current_size),
                current.and_then(|c| c.registered_runners),
                current.and_then(|c| c.stale_registrations.clone()),
            ),
        };

    GithubActionRunnerStatus {
        phase: Some(phase.to_string()),
        message: Some(message),
        current_size,
        registered_runners,
        stale_registrations,
        observed_generation: generation,
        last_updated: Some(now),
        conditions: Some(conditions),
    }
}

fn credentials_condition(
    prev: Option<&[Condition]>,
    err: Option<&ReconcileErr>,
) -> Option<Condition> {
    let (status, reason, message) = match err {
        Some(e @ (ReconcileErr::CredentialUnresolvable(_) | ReconcileErr::Unauthorized(_))) => {
            (ConditionStatus::False, e.reason().to_string(), Some(e.to_string()))
        }
        Some(ReconcileErr::SpecInvalid(_)) => {
            (ConditionStatus::Unknown, "SpecInvalid".to_string(), None)
        }
        // Could have failed before or after the secret was read
        Some(ReconcileErr::StoreUnavailable(_)) => {
            return prev.and_then(|p| find(p, &ConditionType::CredentialsResolved).cloned());
        }
        _ => (ConditionStatus::True, "TokenResolved".to_string(), None),
    };
    Some(Condition {
        type_: ConditionType::CredentialsResolved,
        status,
        reason: Some(reason),
        message,
        last_transition_time: None,
    })
}

fn find<'a>(conds: &'a [Condition], type_: &ConditionType) -> Option<&'a Condition> {
    conds.iter().find(|c| &c.type_ == type_)
}

fn with_transition(
    prev: Option<&[Condition]>,
    mut cond: Condition,
    now: &str,
) -> Condition {
    if cond.last_transition_time.is_some() {
        return cond;
    }
    cond.last_transition_time = prev
        .and_then(|p| find(p, &cond.type_))
        .filter(|p| p.status == cond.status)
        .and_then(|p| p.last_transition_time.clone())
        .or_else(|| Some(now.to_string()));
    cond
}

/// Compare two status objects for material differences, ignoring timestamp-only
/// fields that would otherwise rewrite the status on every resync.
pub fn should_patch_status(
    current: Option<&GithubActionRunnerStatus>,
    desired: &GithubActionRunnerStatus,
) -> bool {
    match current {
        None => true,
        Some(cur) => {
            let differs = normalize_status(cur) != normalize_status(desired);
            if !differs {
                trace!("should_patch_status: status identical, skipping patch");
            }
            differs
        }
    }
}

fn normalize_status(s: &GithubActionRunnerStatus) -> JsonValue {
    let mut v = serde_json::to_value(s).unwrap_or_else(|_| json!({}));
    if let JsonValue::Object(ref mut map) = v {
        map.remove("lastUpdated");
        if let Some(JsonValue::Array(conds)) = map.get_mut("conditions") {
            for c in conds.iter_mut() {
                if let Some(obj) = c.as_object_mut() {
                    obj.remove("lastTransitionTime");
                }
            }
        }
    }
    v
}

/// Write the status subresource. Best effort: failures are logged and the
/// next pass writes it again.
pub async fn patch_status(
    client: &Client,
    obj: &GithubActionRunner,
    outcome: &ReconcileOutcome,
) {
    let Some(ns) = obj.namespace() else {
        return;
    };
    let name = obj.name_any();
    let desired = build_status(
        obj.status.as_ref(),
        obj.meta().generation,
        outcome,
        Utc::now(),
    );
    if !should_patch_status(obj.status.as_ref(), &desired) {
        return;
    }

    let api: Api<GithubActionRunner> = Api::namespaced(client.clone(), &ns);
    let patch = json!({ "status": &desired });
    match api
        .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
    {
        Ok(_) => debug!(%ns, %name, phase = ?desired.phase, "status: patched"),
        Err(e) => warn!(%ns, %name, error = %e, "status: patch failed"),
    }
}
