use std::path::Path;

use kube::config::{KubeConfigOptions, Kubeconfig};

use crate::errors::AppResult;

/// In-cluster or default kubeconfig, unless an explicit kubeconfig file is given.
pub async fn make_client(kubeconfig: Option<&Path>) -> AppResult<kube::Client> {
    let client = match kubeconfig {
        Some(path) => {
            let kc = Kubeconfig::read_from(path)?;
            let config =
                kube::Config::from_custom_kubeconfig(kc, &KubeConfigOptions::default()).await?;
            kube::Client::try_from(config)?
        }
        None => kube::Client::try_default().await?,
    };
    Ok(client)
}
