use std::time::Duration;

use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct OperatorConfig {
    #[envconfig(from = "GARO_PROFILE", default = "dev")]
    pub profile: String,

    #[envconfig(from = "HTTP_PORT", default = "8080")]
    pub http_port: u16,

    /// Restrict the controller to one namespace; all namespaces when unset.
    /// Env: GARO_WATCH_NAMESPACE
    #[envconfig(from = "GARO_WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    /// Controller name attached to emitted events.
    #[envconfig(from = "GARO_REPORTER", default = "garo-operator")]
    pub reporter: String,

    #[envconfig(nested)]
    pub github: GithubConfig,

    #[envconfig(nested)]
    pub reconcile: ReconcileConfig,
}

#[derive(Envconfig, Clone, Debug)]
pub struct GithubConfig {
    /// REST base URL; point at `https://<host>/api/v3` for GitHub Enterprise Server.
    /// Env: GARO_GITHUB_API_URL
    #[envconfig(from = "GARO_GITHUB_API_URL", default = "https://api.github.com")]
    pub api_url: String,

    #[envconfig(
        from = "GARO_GITHUB_USER_AGENT",
        default = "github-actions-runner-operator"
    )]
    pub user_agent: String,
}

#[derive(Envconfig, Clone, Debug, Default)]
pub struct ReconcileConfig {
    /// Periodic resync after a clean pass; 0 waits for watch events only.
    /// Env: GARO_RESYNC_SECS
    #[envconfig(from = "GARO_RESYNC_SECS", default = "60")]
    pub resync_secs: u64,
    /// Delay before retrying a pass that hit a transient failure.
    /// Env: GARO_BACKOFF_SECS
    #[envconfig(from = "GARO_BACKOFF_SECS", default = "30")]
    pub backoff_secs: u64,
    /// Upper bound for every single GitHub or cluster API call.
    /// Env: GARO_CALL_TIMEOUT_SECS
    #[envconfig(from = "GARO_CALL_TIMEOUT_SECS", default = "15")]
    pub call_timeout_secs: u64,
    /// If Some, env explicitly set; otherwise, profile defaults apply
    #[envconfig(from = "GARO_MAX_PARALLEL_ACTIONS")]
    pub max_parallel_actions: Option<usize>,
    #[envconfig(from = "GARO_CONTROLLER_CONCURRENCY")]
    pub controller_concurrency: Option<u16>,
    #[envconfig(from = "GARO_WATCH_SECRETS")]
    pub watch_secrets: Option<bool>,
}

impl OperatorConfig {
    /// Apply profile → defaults mapping, while respecting explicit env overrides.
    ///
    /// Rules:
    /// - dev: max_parallel_actions=1, controller_concurrency=0 (unbounded), watch_secrets=false
    /// - full: max_parallel_actions=4, controller_concurrency=8, watch_secrets=true
    pub fn apply_profile_defaults(mut self) -> Self {
        let (def_parallel, def_concurrency, def_secrets) =
            match self.profile.as_str() {
                "full" | "prod" | "production" => (4, 8, true),
                _ /* dev */ => (1, 0, false),
            };

        let r = &mut self.reconcile;
        if r.max_parallel_actions.is_none() {
            r.max_parallel_actions = Some(def_parallel);
        }
        if r.controller_concurrency.is_none() {
            r.controller_concurrency = Some(def_concurrency);
        }
        if r.watch_secrets.is_none() {
            r.watch_secrets = Some(def_secrets);
        }
        // A zero would stall the applier
        if r.max_parallel_actions == Some(0) {
            r.max_parallel_actions = Some(1);
        }

        self
    }
}

impl ReconcileConfig {
    pub fn resync(&self) -> Option<Duration> {
        (self.resync_secs > 0).then(|| Duration::from_secs(self.resync_secs))
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs.max(1))
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs.max(1))
    }

    pub fn parallel_actions(&self) -> usize {
        self.max_parallel_actions.unwrap_or(1).max(1)
    }
}
