use std::io;

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("config file error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    #[error("kubeconfig error: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("tls setup failed: {0}")]
    Tls(String),

    #[error("invalid loggregator endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("malformed pod snapshot: {0}")]
    Reconcile(String),

    #[error("{0}")]
    Other(String),
}
