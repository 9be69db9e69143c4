use k8s_openapi::api::core::v1::PodTemplateSpec;
use kube::CustomResource;
use schemars::JsonSchema;
use schemars::r#gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};
use serde::{Deserialize, Serialize};

pub const GROUP: &str = "garo.tietoevry.com";
pub const VERSION: &str = "v1alpha1";
pub const KIND: &str = "GithubActionRunner";

/// Desired state of a pool of self-hosted GitHub Actions runner pods.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "garo.tietoevry.com",
    version = "v1alpha1",
    kind = "GithubActionRunner",
    plural = "githubactionrunners",
    shortname = "garo",
    namespaced,
    status = "GithubActionRunnerStatus",
    printcolumn = r#"{"name":"Min","type":"integer","jsonPath":".spec.minRunners"}"#,
    printcolumn = r#"{"name":"Max","type":"integer","jsonPath":".spec.maxRunners"}"#,
    printcolumn = r#"{"name":"Current","type":"integer","jsonPath":".status.currentSize"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct GithubActionRunnerSpec {
    /// GitHub organization owning the runners
    pub organization: String,
    /// Repository within the organization; empty means organization-wide runners
    #[serde(default)]
    pub repository: String,
    /// Lower bound of the pool size
    pub min_runners: i32,
    /// Upper bound of the pool size
    pub max_runners: i32,
    /// Template every runner pod is instantiated from
    #[serde(default)]
    #[schemars(schema_with = "preserve_unknown_object")]
    pub pod_template_spec: PodTemplateSpec,
    /// Secret key holding the GitHub token used to query runner registrations
    pub token_ref: TokenRef,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq, Eq)]
pub struct TokenRef {
    /// Name of the secret in the pool's namespace
    pub name: String,
    /// Key within the secret's data
    pub key: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct GithubActionRunnerStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Pod count after the last reconciliation pass
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_size: Option<i32>,
    /// Runners GitHub reported for the pool's scope
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registered_runners: Option<i32>,
    /// Offline registrations carrying this pool's name prefix without a live pod
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stale_registrations: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<Condition>>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    pub status: ConditionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(
        rename = "lastTransitionTime",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_transition_time: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum ConditionType {
    Ready,
    CredentialsResolved,
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

// Pod templates are validated by the API server when pods are created; the CRD
// only needs to keep them intact.
fn preserve_unknown_object(_: &mut SchemaGenerator) -> Schema {
    let mut obj = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..Default::default()
    };
    obj.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".into(),
        serde_json::Value::Bool(true),
    );
    Schema::Object(obj)
}
