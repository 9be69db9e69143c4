use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Secret};
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::{Client, ResourceExt};

#[cfg(test)]
use mockall::automock;

use crate::crd::GithubActionRunner;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("kubernetes api error: {0}")]
    Api(String),
    #[error("rejected by api server ({code}): {message}")]
    Rejected { code: u16, message: String },
}

impl From<kube::Error> for StoreError {
    fn from(e: kube::Error) -> Self {
        match e {
            kube::Error::Api(resp) => StoreError::Rejected {
                code: resp.code,
                message: resp.message,
            },
            other => StoreError::Api(other.to_string()),
        }
    }
}

/// Pod operations the reconciler needs. Implementations must be safe to share
/// across concurrent reconciliations of different pools.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PodStore: Send + Sync {
    async fn list(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Pod>, StoreError>;

    /// Returns the name assigned to the created pod.
    async fn create(&self, namespace: &str, pod: Pod) -> Result<String, StoreError>;

    /// Deleting a pod that no longer exists succeeds.
    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecretSource: Send + Sync {
    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Secret>, StoreError>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait PoolSource: Send + Sync {
    async fn get_pool(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<GithubActionRunner>, StoreError>;
}

/// Cluster-backed implementation of every store capability.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PodStore for KubeStore {
    async fn list(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Pod>, StoreError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(list.items)
    }

    async fn create(&self, namespace: &str, pod: Pod) -> Result<String, StoreError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let created = api.create(&PostParams::default(), &pod).await?;
        Ok(created.name_any())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl SecretSource for KubeStore {
    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Secret>, StoreError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }
}

#[async_trait]
impl PoolSource for KubeStore {
    async fn get_pool(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<GithubActionRunner>, StoreError> {
        let api: Api<GithubActionRunner> =
            Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }
}
