use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "kube-loggregator-bridge",
    version,
    about = "Streams Kubernetes container logs to a Loggregator v2 ingress endpoint"
)]
pub struct Cli {
    /// YAML config file; flags and environment override its values
    #[arg(long = "config")]
    pub config: Option<PathBuf>,

    /// Kubeconfig file (in-cluster config is used when unset)
    #[arg(long = "kubeconfig", env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Namespace to watch
    #[arg(short = 'n', long = "namespace", env = "NAMESPACE")]
    pub namespace: Option<String>,

    /// Loggregator ingress address (host:port)
    #[arg(long = "loggregator-endpoint", env = "LOGGREGATOR_ENDPOINT")]
    pub loggregator_endpoint: Option<String>,

    /// CA certificate used to verify the ingress endpoint
    #[arg(long = "loggregator-ca-path", env = "LOGGREGATOR_CA_PATH")]
    pub loggregator_ca_path: Option<PathBuf>,

    /// Client certificate presented to the ingress endpoint
    #[arg(long = "loggregator-cert-path", env = "LOGGREGATOR_CERT_PATH")]
    pub loggregator_cert_path: Option<PathBuf>,

    /// Client key matching --loggregator-cert-path
    #[arg(long = "loggregator-key-path", env = "LOGGREGATOR_KEY_PATH")]
    pub loggregator_key_path: Option<PathBuf>,

    /// TLS server name expected on the ingress certificate [default: metron]
    #[arg(long = "loggregator-server-name", env = "LOGGREGATOR_SERVER_NAME")]
    pub loggregator_server_name: Option<String>,

    /// Value of the `cluster` tag on every envelope
    #[arg(long = "cluster-name", env = "CLUSTER_NAME")]
    pub cluster_name: Option<String>,

    /// Dev mode: simulate pods and print envelopes instead of shipping them
    #[arg(long = "dev", default_value_t = false)]
    pub dev: bool,

    /// Dev: milliseconds between lines
    #[arg(long = "dev-rate-ms", default_value_t = 500)]
    pub dev_rate_ms: u64,

    /// Dev: lines per container before its stream ends
    #[arg(long = "dev-lines", default_value_t = 10)]
    pub dev_lines: u64,
}
