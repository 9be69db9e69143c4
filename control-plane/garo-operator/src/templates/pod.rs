use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

use crate::controller::inventory::{POOL_LABEL, pod_name_prefix, pool_label_value};
use crate::controller::resolver::ResolvedPool;
use crate::crd::runner_pool::{GROUP, KIND, VERSION};

/// Render one runner pod from the pool template.
///
/// Labels are layered template < pool object labels < pool label, so the
/// membership label can never be overridden. The pod name is left to the API
/// server via `generateName`.
pub fn render_runner_pod(resolved: &ResolvedPool) -> Pod {
    let tpl_meta = resolved.template.metadata.clone().unwrap_or_default();

    let mut labels: BTreeMap<String, String> = tpl_meta.labels.unwrap_or_default();
    labels.extend(
        resolved
            .user_labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone())),
    );
    labels.insert(POOL_LABEL.to_string(), pool_label_value(&resolved.pool));

    Pod {
        metadata: ObjectMeta {
            generate_name: Some(pod_name_prefix(&resolved.pool)),
            namespace: Some(resolved.pool.namespace.clone()),
            labels: Some(labels),
            annotations: tpl_meta.annotations,
            owner_references: owner_refs(resolved),
            ..Default::default()
        },
        spec: resolved.template.spec.clone(),
        status: None,
    }
}

fn owner_refs(resolved: &ResolvedPool) -> Option<Vec<OwnerReference>> {
    resolved.pool.uid.as_ref().map(|u| {
        vec![OwnerReference {
            api_version: format!("{GROUP}/{VERSION}"),
            kind: KIND.to_string(),
            name: resolved.pool.name.clone(),
            uid: u.clone(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }]
    })
}
