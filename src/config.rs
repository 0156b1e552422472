use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tokio::time::Duration;

use crate::cli::Cli;
use crate::errors::{AppError, AppResult};

pub const DEFAULT_SERVER_NAME: &str = "metron";

/// Connection settings for the Loggregator ingress endpoint (mutual TLS).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LoggregatorOptions {
    pub endpoint: String,
    pub ca_path: PathBuf,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub server_name: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub namespace: String,
    pub kubeconfig: Option<PathBuf>,
    pub cluster: String,
    pub loggregator: LoggregatorOptions,

    pub dev_mode: bool,
    pub dev_rate_ms: u64,
    pub dev_lines: Option<u64>,
}

impl Config {
    /// How long each step of the dev pod script lasts: long enough for every
    /// container to print its lines.
    pub fn dev_phase(&self) -> Duration {
        let lines = self.dev_lines.unwrap_or(10);
        let ms = self.dev_rate_ms.saturating_mul(lines.saturating_add(2));
        Duration::from_millis(ms.max(200))
    }
}

/// On-disk configuration. Keys match the command-line flag names.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileConfig {
    pub namespace: Option<String>,
    pub kubeconfig: Option<PathBuf>,
    pub cluster_name: Option<String>,
    pub loggregator_endpoint: Option<String>,
    pub loggregator_ca_path: Option<PathBuf>,
    pub loggregator_cert_path: Option<PathBuf>,
    pub loggregator_key_path: Option<PathBuf>,
    pub loggregator_server_name: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> AppResult<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("cannot read config {}: {e}", path.display()))
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> AppResult<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }
}

impl TryFrom<Cli> for Config {
    type Error = AppError;

    fn try_from(cli: Cli) -> AppResult<Self> {
        let file = match &cli.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::from_sources(cli, file)
    }
}

impl Config {
    /// Merges flags/env over the config file and validates the result.
    pub fn from_sources(cli: Cli, file: FileConfig) -> AppResult<Self> {
        let namespace = non_empty(cli.namespace.or(file.namespace));
        let endpoint = non_empty(cli.loggregator_endpoint.or(file.loggregator_endpoint));
        let ca_path = non_empty_path(cli.loggregator_ca_path.or(file.loggregator_ca_path));
        let cert_path = non_empty_path(cli.loggregator_cert_path.or(file.loggregator_cert_path));
        let key_path = non_empty_path(cli.loggregator_key_path.or(file.loggregator_key_path));

        let Some(namespace) = namespace else {
            return Err(AppError::Config("namespace is required".to_string()));
        };

        let loggregator = if cli.dev {
            LoggregatorOptions::default()
        } else {
            let mut missing = Vec::new();
            if endpoint.is_none() {
                missing.push("loggregator-endpoint");
            }
            if ca_path.is_none() {
                missing.push("loggregator-ca-path");
            }
            if cert_path.is_none() {
                missing.push("loggregator-cert-path");
            }
            if key_path.is_none() {
                missing.push("loggregator-key-path");
            }
            if !missing.is_empty() {
                return Err(AppError::Config(format!(
                    "missing required options: {}",
                    missing.join(", ")
                )));
            }

            LoggregatorOptions {
                endpoint: endpoint.unwrap_or_default(),
                ca_path: ca_path.unwrap_or_default(),
                cert_path: cert_path.unwrap_or_default(),
                key_path: key_path.unwrap_or_default(),
                server_name: non_empty(
                    cli.loggregator_server_name.or(file.loggregator_server_name),
                )
                .unwrap_or_else(|| DEFAULT_SERVER_NAME.to_string()),
            }
        };

        let config = Self {
            namespace,
            kubeconfig: cli.kubeconfig.or(file.kubeconfig),
            cluster: cli.cluster_name.or(file.cluster_name).unwrap_or_default(),
            loggregator,
            dev_mode: cli.dev,
            dev_rate_ms: cli.dev_rate_ms,
            dev_lines: (cli.dev_lines > 0).then_some(cli.dev_lines),
        };

        tracing::debug!(
            namespace = %config.namespace,
            endpoint = %config.loggregator.endpoint,
            ca = %config.loggregator.ca_path.display(),
            cert = %config.loggregator.cert_path.display(),
            key = %config.loggregator.key_path.display(),
            "configuration loaded"
        );

        Ok(config)
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.trim().is_empty())
}

fn non_empty_path(v: Option<PathBuf>) -> Option<PathBuf> {
    v.filter(|p| !p.as_os_str().is_empty())
}
