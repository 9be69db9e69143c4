use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use k8s_openapi::api::core::v1::PodTemplateSpec;
use kube::{Resource, ResourceExt};

use super::ReconcileErr;
use super::planner::PoolBounds;
use super::store::SecretSource;
use super::types::PoolRef;
use crate::crd::GithubActionRunner;

/// Bearer token for the GitHub API. Never logged.
#[derive(Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    pub fn new(value: impl Into<String>) -> Self {
        Token(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(***)")
    }
}

/// Everything one reconciliation pass needs from the pool object.
#[derive(Clone, Debug)]
pub struct ResolvedPool {
    pub pool: PoolRef,
    pub organization: String,
    pub repository: String,
    pub bounds: PoolBounds,
    pub template: PodTemplateSpec,
    /// Labels of the pool object, propagated onto its pods.
    pub user_labels: BTreeMap<String, String>,
    pub token: Token,
}

pub fn pool_ref(obj: &GithubActionRunner) -> Result<PoolRef, ReconcileErr> {
    let namespace = obj
        .namespace()
        .ok_or_else(|| ReconcileErr::SpecInvalid("pool has no namespace".into()))?;
    Ok(PoolRef {
        namespace,
        name: obj.name_any(),
        uid: obj.meta().uid.clone(),
    })
}

/// Check the declared bounds and scope.
pub fn validate(obj: &GithubActionRunner) -> Result<PoolBounds, ReconcileErr> {
    let spec = &obj.spec;
    if spec.organization.trim().is_empty() {
        return Err(ReconcileErr::SpecInvalid(
            "organization must not be empty".into(),
        ));
    }
    if spec.min_runners < 0 || spec.max_runners < 0 {
        return Err(ReconcileErr::SpecInvalid(format!(
            "runner bounds must not be negative (min={}, max={})",
            spec.min_runners, spec.max_runners
        )));
    }
    if spec.min_runners > spec.max_runners {
        return Err(ReconcileErr::SpecInvalid(format!(
            "minRunners {} exceeds maxRunners {}",
            spec.min_runners, spec.max_runners
        )));
    }
    Ok(PoolBounds {
        min: spec.min_runners as usize,
        max: spec.max_runners as usize,
    })
}

/// Resolve `tokenRef` to a token. Fails closed: there is no fallback credential.
pub async fn resolve_token(
    secrets: &dyn SecretSource,
    namespace: &str,
    obj: &GithubActionRunner,
    timeout: Duration,
) -> Result<Token, ReconcileErr> {
    let token_ref = &obj.spec.token_ref;
    let secret = tokio::time::timeout(
        timeout,
        secrets.get_secret(namespace, &token_ref.name),
    )
    .await
    .map_err(|_| {
        ReconcileErr::StoreUnavailable(format!(
            "reading secret {} timed out after {timeout:?}",
            token_ref.name
        ))
    })?
    .map_err(|e| ReconcileErr::StoreUnavailable(e.to_string()))?
    .ok_or_else(|| {
        ReconcileErr::CredentialUnresolvable(format!(
            "secret {}/{} not found",
            namespace, token_ref.name
        ))
    })?;

    let raw = secret
        .data
        .as_ref()
        .and_then(|d| d.get(&token_ref.key))
        .ok_or_else(|| {
            ReconcileErr::CredentialUnresolvable(format!(
                "key {} missing in secret {}/{}",
                token_ref.key, namespace, token_ref.name
            ))
        })?;
    let value = std::str::from_utf8(&raw.0).map_err(|_| {
        ReconcileErr::CredentialUnresolvable(format!(
            "key {} in secret {} is not valid UTF-8",
            token_ref.key, token_ref.name
        ))
    })?;
    let value = value.trim();
    if value.is_empty() {
        return Err(ReconcileErr::CredentialUnresolvable(format!(
            "key {} in secret {} is empty",
            token_ref.key, token_ref.name
        )));
    }
    Ok(Token(value.to_string()))
}

/// Validate the pool and resolve its credential. Read-only.
#[tracing::instrument(level = "debug", skip_all, fields(name = %obj.name_any()))]
pub async fn resolve(
    obj: &GithubActionRunner,
    secrets: &dyn SecretSource,
    timeout: Duration,
) -> Result<ResolvedPool, ReconcileErr> {
    let pool = pool_ref(obj)?;
    let bounds = validate(obj)?;
    let token = resolve_token(secrets, &pool.namespace, obj, timeout).await?;
    Ok(ResolvedPool {
        organization: obj.spec.organization.clone(),
        repository: obj.spec.repository.clone(),
        bounds,
        template: obj.spec.pod_template_spec.clone(),
        user_labels: obj.labels().clone(),
        token,
        pool,
    })
}
