pub mod runner_pool;

pub use runner_pool::{GithubActionRunner, GithubActionRunnerSpec, GithubActionRunnerStatus};
