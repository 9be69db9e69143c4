//! Desired-state calculation.
//!
//! Pure function of the declared bounds, the pods found in the cluster and the
//! runners GitHub reports. No I/O happens here so the result is reproducible
//! for identical input.

use std::collections::{HashMap, HashSet};

use crate::github::{RunnerState, RunnerStatus};

use super::types::{ManagedPod, PodAction};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolBounds {
    pub min: usize,
    pub max: usize,
}

/// How a pod relates to the runner registrations. Variant order is the
/// deletion preference: earlier variants are removed first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PodClass {
    /// Pod finished or crashed; its runner is gone.
    Terminated,
    /// Registered runner reported offline.
    Offline,
    /// Registered runner online and waiting for work.
    Idle,
    /// No registration yet; the runner is most likely still starting.
    Pending,
    /// Registered runner executing a job.
    Busy,
}

pub struct PlanInput<'a> {
    pub bounds: PoolBounds,
    /// `generateName` prefix of the pool; used to spot stale registrations.
    pub name_prefix: &'a str,
    pub pods: &'a [ManagedPod],
    pub runners: &'a [RunnerStatus],
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Plan {
    pub actions: Vec<PodAction>,
    /// Classification per pod name.
    pub classes: HashMap<String, PodClass>,
    /// Offline registrations with the pool's name prefix and no live pod, sorted.
    pub stale_registrations: Vec<String>,
}

impl Plan {
    pub fn resulting_pods(&self, current: usize) -> usize {
        self.actions.iter().fold(current, |n, a| match a {
            PodAction::Create => n + 1,
            PodAction::Delete { .. } => n.saturating_sub(1),
        })
    }
}

/// Correlate a pod with a runner registration. Runners register under their
/// hostname, which is the pod name.
pub fn classify(pod: &ManagedPod, runner: Option<&RunnerStatus>) -> PodClass {
    if pod.phase.is_terminated() {
        return PodClass::Terminated;
    }
    match runner.map(|r| r.state) {
        None => PodClass::Pending,
        Some(RunnerState::Offline) => PodClass::Offline,
        Some(RunnerState::Online) => PodClass::Idle,
        Some(RunnerState::Busy) => PodClass::Busy,
    }
}

pub fn plan(input: PlanInput<'_>) -> Plan {
    let by_name: HashMap<&str, &RunnerStatus> = input
        .runners
        .iter()
        .map(|r| (r.name.as_str(), r))
        .collect();

    let mut ranked: Vec<(PodClass, &ManagedPod)> = input
        .pods
        .iter()
        .map(|p| (classify(p, by_name.get(p.name.as_str()).copied()), p))
        .collect();

    let classes = ranked
        .iter()
        .map(|(c, p)| (p.name.clone(), *c))
        .collect::<HashMap<_, _>>();

    let stale_registrations = stale_registrations(&input);

    let current = input.pods.len();
    let PoolBounds { min, max } = input.bounds;
    let actions = if current < min {
        vec![PodAction::Create; min - current]
    } else if current > max {
        ranked.sort_by(|(ca, a), (cb, b)| {
            ca.cmp(cb)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.name.cmp(&b.name))
        });
        ranked
            .into_iter()
            .take(current - max)
            .map(|(_, p)| PodAction::Delete {
                pod: p.name.clone(),
            })
            .collect()
    } else {
        Vec::new()
    };

    Plan {
        actions,
        classes,
        stale_registrations,
    }
}

fn stale_registrations(input: &PlanInput<'_>) -> Vec<String> {
    if input.name_prefix.is_empty() {
        return Vec::new();
    }
    let live: HashSet<&str> = input.pods.iter().map(|p| p.name.as_str()).collect();
    let mut stale: Vec<String> = input
        .runners
        .iter()
        .filter(|r| r.state == RunnerState::Offline)
        .filter(|r| r.name.starts_with(input.name_prefix))
        .filter(|r| !live.contains(r.name.as_str()))
        .map(|r| r.name.clone())
        .collect();
    stale.sort();
    stale.dedup();
    stale
}
