#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use garo_operator::controller::events::EventSink;
use garo_operator::controller::store::{
    PodStore, PoolSource, SecretSource, StoreError,
};
use garo_operator::controller::types::{ActionKind, PoolRef};
use garo_operator::controller::{Capabilities, PoolReconciler, ReconcileSettings};
use garo_operator::crd::runner_pool::TokenRef;
use garo_operator::crd::{GithubActionRunner, GithubActionRunnerSpec};
use garo_operator::github::{FetchError, RunnerApi, RunnerState, RunnerStatus};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::{
    Container, Pod, PodSpec, PodStatus, PodTemplateSpec, Secret,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

pub const NS: &str = "ci";
pub const POOL: &str = "runners";
pub const TOKEN: &str = "someToken";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

// ---------- pods ----------

/// In-memory pod store. Names come from `generateName` plus a counter and
/// creation timestamps increase by one minute per pod, so "oldest" is stable.
#[derive(Default)]
pub struct FakePodStore {
    pods: Mutex<Vec<Pod>>,
    seq: Mutex<u32>,
    /// Zero-based create attempts that are rejected.
    pub reject_creates: Mutex<HashSet<u32>>,
    attempts: Mutex<u32>,
    pub fail_list: Mutex<bool>,
    /// Deletes only mark the pod terminating, as with a grace period.
    pub graceful_delete: Mutex<bool>,
}

impl FakePodStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a running pod carrying the given labels.
    pub fn seed(&self, name: &str, labels: BTreeMap<String, String>, minutes: i64) {
        self.pods.lock().unwrap().push(Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(NS.to_string()),
                labels: Some(labels),
                creation_timestamp: Some(Time(t0() + Duration::minutes(minutes))),
                ..Default::default()
            },
            spec: None,
            status: Some(PodStatus {
                phase: Some("Running".into()),
                ..Default::default()
            }),
        });
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .pods
            .lock()
            .unwrap()
            .iter()
            .filter_map(|p| p.metadata.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Names of pods not marked for deletion.
    pub fn live_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .pods
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.metadata.deletion_timestamp.is_none())
            .filter_map(|p| p.metadata.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn pods(&self) -> Vec<Pod> {
        self.pods.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.pods.lock().unwrap().len()
    }
}

fn matches_selector(pod: &Pod, selector: &str) -> bool {
    let labels = pod.metadata.labels.clone().unwrap_or_default();
    selector.split(',').all(|term| match term.split_once('=') {
        Some((k, v)) => labels.get(k).map(String::as_str) == Some(v),
        None => labels.contains_key(term),
    })
}

#[async_trait]
impl PodStore for FakePodStore {
    async fn list(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Pod>, StoreError> {
        if *self.fail_list.lock().unwrap() {
            return Err(StoreError::Api("connection refused".into()));
        }
        Ok(self
            .pods
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.metadata.namespace.as_deref() == Some(namespace))
            .filter(|p| matches_selector(p, label_selector))
            .cloned()
            .collect())
    }

    async fn create(&self, namespace: &str, mut pod: Pod) -> Result<String, StoreError> {
        let attempt = {
            let mut a = self.attempts.lock().unwrap();
            let n = *a;
            *a += 1;
            n
        };
        if self.reject_creates.lock().unwrap().contains(&attempt) {
            return Err(StoreError::Rejected {
                code: 403,
                message: "exceeded quota".into(),
            });
        }
        let n = {
            let mut s = self.seq.lock().unwrap();
            *s += 1;
            *s
        };
        let name = format!(
            "{}{:05}",
            pod.metadata.generate_name.clone().unwrap_or_default(),
            n
        );
        pod.metadata.name = Some(name.clone());
        pod.metadata.namespace = Some(namespace.to_string());
        pod.metadata.creation_timestamp =
            Some(Time(t0() + Duration::hours(1) + Duration::minutes(n as i64)));
        self.pods.lock().unwrap().push(pod);
        Ok(name)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let is_target = |p: &Pod| {
            p.metadata.namespace.as_deref() == Some(namespace)
                && p.metadata.name.as_deref() == Some(name)
        };
        if *self.graceful_delete.lock().unwrap() {
            for p in self.pods.lock().unwrap().iter_mut().filter(|p| is_target(p)) {
                p.metadata
                    .deletion_timestamp
                    .get_or_insert(Time(t0() + Duration::days(1)));
            }
            return Ok(());
        }
        self.pods.lock().unwrap().retain(|p| !is_target(p));
        Ok(())
    }
}

// ---------- github ----------

pub struct FakeRunnerApi {
    result: Mutex<Result<Vec<RunnerStatus>, FetchError>>,
    /// (organization, repository, token) per call.
    pub calls: Mutex<Vec<(String, String, String)>>,
    /// Calls never complete.
    pub stalled: Mutex<bool>,
}

impl FakeRunnerApi {
    pub fn returning(result: Result<Vec<RunnerStatus>, FetchError>) -> Self {
        Self {
            result: Mutex::new(result),
            calls: Mutex::new(Vec::new()),
            stalled: Mutex::new(false),
        }
    }

    pub fn set(&self, result: Result<Vec<RunnerStatus>, FetchError>) {
        *self.result.lock().unwrap() = result;
    }

    pub fn calls(&self) -> Vec<(String, String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RunnerApi for FakeRunnerApi {
    async fn list_runners(
        &self,
        organization: &str,
        repository: &str,
        token: &str,
    ) -> Result<Vec<RunnerStatus>, FetchError> {
        self.calls.lock().unwrap().push((
            organization.to_string(),
            repository.to_string(),
            token.to_string(),
        ));
        let stalled = *self.stalled.lock().unwrap();
        if stalled {
            std::future::pending::<()>().await;
        }
        self.result.lock().unwrap().clone()
    }
}

pub fn runner(id: i64, name: &str, state: RunnerState) -> RunnerStatus {
    RunnerStatus {
        id,
        name: name.to_string(),
        os: "Linux".into(),
        state,
    }
}

// ---------- secrets / pools ----------

#[derive(Default)]
pub struct FakeSecrets {
    secrets: Mutex<BTreeMap<(String, String), Secret>>,
}

impl FakeSecrets {
    pub fn with_token(key: &str, value: &str) -> Self {
        let s = Self::default();
        s.put(NS, "gh-token", key, value);
        s
    }

    pub fn put(&self, ns: &str, name: &str, key: &str, value: &str) {
        self.secrets.lock().unwrap().insert(
            (ns.to_string(), name.to_string()),
            Secret {
                data: Some(BTreeMap::from([(
                    key.to_string(),
                    ByteString(value.as_bytes().to_vec()),
                )])),
                ..Default::default()
            },
        );
    }
}

#[async_trait]
impl SecretSource for FakeSecrets {
    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Secret>, StoreError> {
        Ok(self
            .secrets
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }
}

#[derive(Default)]
pub struct FakePools {
    pools: Mutex<Vec<GithubActionRunner>>,
}

impl FakePools {
    pub fn with(pool: GithubActionRunner) -> Self {
        Self {
            pools: Mutex::new(vec![pool]),
        }
    }
}

#[async_trait]
impl PoolSource for FakePools {
    async fn get_pool(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<GithubActionRunner>, StoreError> {
        Ok(self
            .pools
            .lock()
            .unwrap()
            .iter()
            .find(|p| {
                p.metadata.namespace.as_deref() == Some(namespace)
                    && p.metadata.name.as_deref() == Some(name)
            })
            .cloned())
    }
}

// ---------- events ----------

#[derive(Default)]
pub struct RecordingEventSink {
    pub events: Mutex<Vec<(PoolRef, ActionKind, String)>>,
    pub fail: bool,
}

impl RecordingEventSink {
    pub fn failing() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn recorded(&self) -> Vec<(ActionKind, String)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, k, p)| (*k, p.clone()))
            .collect()
    }
}

#[async_trait]
impl EventSink for RecordingEventSink {
    async fn record(
        &self,
        pool: &PoolRef,
        kind: ActionKind,
        pod: &str,
    ) -> Result<(), String> {
        if self.fail {
            return Err("events api unavailable".into());
        }
        self.events
            .lock()
            .unwrap()
            .push((pool.clone(), kind, pod.to_string()));
        Ok(())
    }
}

// ---------- fixtures ----------

pub fn pool(min: i32, max: i32) -> GithubActionRunner {
    let mut obj = GithubActionRunner::new(
        POOL,
        GithubActionRunnerSpec {
            organization: "SomeOrg".into(),
            repository: String::new(),
            min_runners: min,
            max_runners: max,
            pod_template_spec: PodTemplateSpec {
                metadata: None,
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "runner".into(),
                        image: Some("quay.io/evryfs/github-actions-runner:latest".into()),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            token_ref: TokenRef {
                name: "gh-token".into(),
                key: "GH_TOKEN".into(),
            },
        },
    );
    obj.metadata.namespace = Some(NS.into());
    obj.metadata.uid = Some("0b4ed0b4-pool".into());
    obj.metadata.generation = Some(1);
    obj
}

pub struct Harness {
    pub pods: Arc<FakePodStore>,
    pub runners: Arc<FakeRunnerApi>,
    pub secrets: Arc<FakeSecrets>,
    pub pools: Arc<FakePools>,
    pub events: Arc<RecordingEventSink>,
}

impl Harness {
    pub fn new(pool: GithubActionRunner, runners: Result<Vec<RunnerStatus>, FetchError>) -> Self {
        Self {
            pods: Arc::new(FakePodStore::new()),
            runners: Arc::new(FakeRunnerApi::returning(runners)),
            secrets: Arc::new(FakeSecrets::with_token("GH_TOKEN", TOKEN)),
            pools: Arc::new(FakePools::with(pool)),
            events: Arc::new(RecordingEventSink::default()),
        }
    }

    pub fn reconciler(&self) -> PoolReconciler {
        PoolReconciler::new(
            Capabilities {
                pools: self.pools.clone(),
                secrets: self.secrets.clone(),
                pods: self.pods.clone(),
                runners: self.runners.clone(),
                events: self.events.clone(),
            },
            ReconcileSettings {
                backoff: std::time::Duration::from_secs(30),
                call_timeout: std::time::Duration::from_secs(5),
                max_parallel_actions: 2,
            },
        )
    }
}
