//! Prints the GithubActionRunner CRD; pipe into `kubectl apply -f -`.
use garo_operator::crd::GithubActionRunner;
use kube::core::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let yaml = serde_yaml::to_string(&GithubActionRunner::crd())?;
    print!("{yaml}");
    Ok(())
}
