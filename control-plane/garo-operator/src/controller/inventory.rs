use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::debug;

use super::ReconcileErr;
use super::store::PodStore;
use super::types::{ManagedPod, PoolRef};

/// Label carried by every pod of a pool; the inventory is rebuilt from it alone.
pub const POOL_LABEL: &str = "garo.tietoevry.com/pool";

const MAX_LABEL_VALUE: usize = 63;
const MAX_GENERATE_NAME: usize = 58;

/// Pool label value: the pool name when it is a valid label value, otherwise a
/// truncated name with a hash of `namespace/name` so it stays unique and stable.
pub fn pool_label_value(pool: &PoolRef) -> String {
    if pool.name.len() <= MAX_LABEL_VALUE {
        return pool.name.clone();
    }
    let digest = Sha256::digest(format!("{}/{}", pool.namespace, pool.name));
    let hash = hex::encode(digest);
    let prefix = pool.name[..52].trim_end_matches(&['-', '.', '_'][..]);
    format!("{}-{}", prefix, &hash[..10])
}

pub fn pool_selector(pool: &PoolRef) -> String {
    format!("{}={}", POOL_LABEL, pool_label_value(pool))
}

/// `generateName` prefix for pool pods; runners register under the pod name.
pub fn pod_name_prefix(pool: &PoolRef) -> String {
    let mut base = pool.name.clone();
    if base.len() > MAX_GENERATE_NAME - 1 {
        base.truncate(MAX_GENERATE_NAME - 1);
    }
    format!("{}-", base.trim_end_matches(&['-', '.'][..]))
}

/// List the live pods of a pool. An empty pool is a valid result.
///
/// Pods already marked for deletion are left out: they were removed by an
/// earlier pass (or by someone else) and must not be counted or picked again.
#[tracing::instrument(level = "debug", skip_all, fields(pool = %pool))]
pub async fn observe_pods(
    store: &dyn PodStore,
    pool: &PoolRef,
    timeout: Duration,
) -> Result<Vec<ManagedPod>, ReconcileErr> {
    let selector = pool_selector(pool);
    let pods = tokio::time::timeout(timeout, store.list(&pool.namespace, &selector))
        .await
        .map_err(|_| {
            ReconcileErr::StoreUnavailable(format!(
                "listing pods timed out after {timeout:?}"
            ))
        })?
        .map_err(|e| ReconcileErr::StoreUnavailable(e.to_string()))?;
    let listed = pods.len();
    let pods: Vec<ManagedPod> = pods
        .iter()
        .filter(|p| p.metadata.deletion_timestamp.is_none())
        .map(ManagedPod::from)
        .collect();
    debug!(
        count = pods.len(),
        terminating = listed - pods.len(),
        %selector,
        "inventory: pods observed"
    );
    Ok(pods)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::store::{MockPodStore, StoreError};
    use k8s_openapi::api::core::v1::{Pod, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

    fn pool(name: &str) -> PoolRef {
        PoolRef {
            namespace: "ci".into(),
            name: name.into(),
            uid: None,
        }
    }

    #[test]
    fn short_names_label_as_is() {
        assert_eq!(pool_label_value(&pool("runners")), "runners");
        assert_eq!(
            pool_selector(&pool("runners")),
            "garo.tietoevry.com/pool=runners"
        );
    }

    #[test]
    fn long_names_hash_deterministically() {
        let name = "r".repeat(80);
        let a = pool_label_value(&pool(&name));
        let b = pool_label_value(&pool(&name));
        assert_eq!(a, b);
        assert!(a.len() <= MAX_LABEL_VALUE);

        let other_ns = PoolRef {
            namespace: "other".into(),
            ..pool(&name)
        };
        assert_ne!(a, pool_label_value(&other_ns));
    }

    #[test]
    fn generate_name_prefix_is_bounded() {
        assert_eq!(pod_name_prefix(&pool("runners")), "runners-");
        let long = pod_name_prefix(&pool(&"x".repeat(100)));
        assert!(long.len() <= MAX_GENERATE_NAME);
        assert!(long.ends_with('-'));
    }

    #[tokio::test]
    async fn observe_pods_queries_by_pool_label() {
        let mut store = MockPodStore::new();
        store
            .expect_list()
            .withf(|ns, sel| ns == "ci" && sel == "garo.tietoevry.com/pool=runners")
            .times(1)
            .returning(|_, _| {
                Ok(vec![Pod {
                    metadata: ObjectMeta {
                        name: Some("runners-abc".into()),
                        ..Default::default()
                    },
                    ..Default::default()
                }])
            });
        let pods = observe_pods(&store, &pool("runners"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].name, "runners-abc");
    }

    #[tokio::test]
    async fn list_failure_is_store_unavailable() {
        let mut store = MockPodStore::new();
        store
            .expect_list()
            .returning(|_, _| Err(StoreError::Api("connection refused".into())));
        let err = observe_pods(&store, &pool("runners"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileErr::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn terminating_pods_are_not_inventoried() {
        let mut store = MockPodStore::new();
        store.expect_list().returning(|_, _| {
            let running = |name: &str| Pod {
                metadata: ObjectMeta {
                    name: Some(name.into()),
                    ..Default::default()
                },
                status: Some(PodStatus {
                    phase: Some("Running".into()),
                    ..Default::default()
                }),
                ..Default::default()
            };
            let mut leaving = running("runners-leaving");
            leaving.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
            Ok(vec![running("runners-a"), leaving, running("runners-b")])
        });
        let pods = observe_pods(&store, &pool("runners"), Duration::from_secs(1))
            .await
            .unwrap();
        let names: Vec<&str> = pods.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["runners-a", "runners-b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn list_timeout_is_store_unavailable() {
        struct StalledList;

        #[async_trait::async_trait]
        impl PodStore for StalledList {
            async fn list(&self, _: &str, _: &str) -> Result<Vec<Pod>, StoreError> {
                std::future::pending().await
            }

            async fn create(&self, _: &str, _: Pod) -> Result<String, StoreError> {
                unreachable!()
            }

            async fn delete(&self, _: &str, _: &str) -> Result<(), StoreError> {
                unreachable!()
            }
        }

        let err = observe_pods(&StalledList, &pool("runners"), Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            ReconcileErr::StoreUnavailable(msg) => assert!(msg.contains("timed out")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
