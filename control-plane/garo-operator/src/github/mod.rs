//! Runner registrations as reported by GitHub.
//!
//! The reconciler only depends on [`RunnerApi`]; [`GithubClient`] is the REST
//! implementation used in production.

mod client;

pub use client::GithubClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[cfg(test)]
use mockall::automock;

/// Lifecycle state of a registered runner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunnerState {
    Online,
    Offline,
    /// Online and currently executing a job.
    Busy,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerStatus {
    pub id: i64,
    pub name: String,
    pub os: String,
    pub state: RunnerState,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Transient: network failure, 5xx, rate limiting, timeout.
    #[error("runner registry unavailable: {0}")]
    Unavailable(String),
    /// The token was rejected or cannot see the requested scope.
    #[error("runner registry rejected credentials: {0}")]
    Unauthorized(String),
}

/// Read-only view of the runners registered for an organization or repository.
///
/// An empty `repository` selects organization-scoped runners.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RunnerApi: Send + Sync {
    async fn list_runners(
        &self,
        organization: &str,
        repository: &str,
        token: &str,
    ) -> Result<Vec<RunnerStatus>, FetchError>;
}
