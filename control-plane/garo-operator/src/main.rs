use envconfig::Envconfig;
use garo_operator::{config::OperatorConfig, init_tracing, runtime};
use kube::Client;
use tracing::info;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing("info");

    // Cluster API and GitHub API clients share this TLS provider
    if rustls::crypto::CryptoProvider::install_default(
        rustls::crypto::aws_lc_rs::default_provider(),
    )
    .is_err()
    {
        tracing::debug!("rustls provider already installed");
    }

    let cfg = OperatorConfig::init_from_env()?.apply_profile_defaults();
    info!(profile = %cfg.profile, namespace = ?cfg.watch_namespace, "garo-operator starting");

    let client = Client::try_default().await?;
    runtime::run_all(client, cfg).await
}
