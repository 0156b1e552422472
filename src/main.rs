use kube_loggregator_bridge::{cli::Cli, config::Config, errors::AppResult};

#[tokio::main]
async fn main() -> AppResult<()> {
    kube_loggregator_bridge::logging::init();

    let cli = <Cli as clap::Parser>::parse();
    let config = Config::try_from(cli)
        .inspect_err(|e| tracing::error!(error = %e, "invalid configuration"))?;

    kube_loggregator_bridge::run(config)
        .await
        .inspect_err(|e| tracing::error!(error = %e, "bridge stopped"))
}
