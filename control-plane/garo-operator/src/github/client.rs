use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, header};
use serde::Deserialize;
use tracing::{debug, trace};

use super::{FetchError, RunnerApi, RunnerState, RunnerStatus};
use crate::config::GithubConfig;

const PER_PAGE: usize = 100;
const API_VERSION: &str = "2022-11-28";

#[derive(Deserialize, Debug)]
struct RunnersPage {
    total_count: usize,
    #[serde(default)]
    runners: Vec<RunnerEntry>,
}

#[derive(Deserialize, Debug)]
struct RunnerEntry {
    id: i64,
    name: String,
    #[serde(default)]
    os: String,
    status: String,
    #[serde(default)]
    busy: bool,
}

impl From<RunnerEntry> for RunnerStatus {
    fn from(r: RunnerEntry) -> Self {
        let state = match (r.status.as_str(), r.busy) {
            ("online", true) => RunnerState::Busy,
            ("online", false) => RunnerState::Online,
            _ => RunnerState::Offline,
        };
        RunnerStatus {
            id: r.id,
            name: r.name,
            os: r.os,
            state,
        }
    }
}

/// GitHub REST client for self-hosted runner listings.
#[derive(Clone, Debug)]
pub struct GithubClient {
    http: reqwest::Client,
    base_url: String,
}

impl GithubClient {
    pub fn new(
        cfg: &GithubConfig,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: cfg.api_url.trim_end_matches('/').to_string(),
        })
    }

    fn runners_url(&self, organization: &str, repository: &str) -> String {
        if repository.is_empty() {
            format!("{}/orgs/{}/actions/runners", self.base_url, organization)
        } else {
            format!(
                "{}/repos/{}/{}/actions/runners",
                self.base_url, organization, repository
            )
        }
    }

    async fn fetch_page(
        &self,
        url: &str,
        token: &str,
        page: usize,
    ) -> Result<RunnersPage, FetchError> {
        let resp = self
            .http
            .get(url)
            .bearer_auth(token)
            .header(header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .query(&[("per_page", PER_PAGE), ("page", page)])
            .send()
            .await
            .map_err(|e| FetchError::Unavailable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(classify(status, resp.headers()));
        }
        resp.json::<RunnersPage>()
            .await
            .map_err(|e| FetchError::Unavailable(format!("decode: {e}")))
    }
}

fn classify(status: StatusCode, headers: &header::HeaderMap) -> FetchError {
    let rate_limited = headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim() == "0")
        .unwrap_or(false);
    match status {
        StatusCode::FORBIDDEN if rate_limited => {
            FetchError::Unavailable("rate limit exhausted".into())
        }
        StatusCode::UNAUTHORIZED
        | StatusCode::FORBIDDEN
        | StatusCode::NOT_FOUND => {
            FetchError::Unauthorized(format!("status {status}"))
        }
        _ => FetchError::Unavailable(format!("status {status}")),
    }
}

#[async_trait]
impl RunnerApi for GithubClient {
    #[tracing::instrument(level = "debug", skip(self, token), fields(org = %organization, repo = %repository))]
    async fn list_runners(
        &self,
        organization: &str,
        repository: &str,
        token: &str,
    ) -> Result<Vec<RunnerStatus>, FetchError> {
        let url = self.runners_url(organization, repository);
        let mut runners: Vec<RunnerStatus> = Vec::new();
        let mut page = 1;
        loop {
            let body = self.fetch_page(&url, token, page).await?;
            trace!(page, got = body.runners.len(), total = body.total_count, "github: runners page");
            let empty = body.runners.is_empty();
            runners.extend(body.runners.into_iter().map(RunnerStatus::from));
            if empty || runners.len() >= body.total_count {
                break;
            }
            page += 1;
        }
        debug!(count = runners.len(), "github: runners listed");
        Ok(runners)
    }
}
