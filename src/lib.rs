pub mod cli;
pub mod config;
pub mod dev;
pub mod errors;
pub mod kube;
pub mod logging;
pub mod loggregator;
pub mod podwatch;
pub mod shutdown;
pub mod stream;
pub mod types;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::errors::{AppError, AppResult};
use crate::loggregator::stdout::StdoutEmitter;
use crate::loggregator::{EnvelopeEmitter, IngressClient};
use crate::podwatch::{ContainerRegistry, Reconciler};
use crate::shutdown::{Shutdown, ShutdownReason};
use crate::stream::dev::DevLogSource;
use crate::stream::kube::KubeLogSource;
use crate::stream::LogSource;
use crate::types::PodEvent;

pub async fn run(config: Config) -> AppResult<()> {
    let shutdown = Shutdown::new();
    let registry = Arc::new(ContainerRegistry::new());
    let (tx, mut rx) = mpsc::channel::<PodEvent>(128);

    let mut ingress: Option<Arc<IngressClient>> = None;

    let source: Arc<dyn LogSource>;
    let emitter: Arc<dyn EnvelopeEmitter>;
    let watcher: JoinHandle<AppResult<()>>;

    // Start the appropriate pod source, log source and sink depending on mode.
    if config.dev_mode {
        source = Arc::new(DevLogSource::new(config.dev_rate_ms, config.dev_lines));
        emitter = Arc::new(StdoutEmitter::new());
        watcher =
            crate::dev::pods::spawn_dev_pods(config.namespace.clone(), config.dev_phase(), tx);
    } else {
        // Without a working ingress client there is nothing to tail for.
        let client = Arc::new(IngressClient::connect(&config.loggregator)?);
        ingress = Some(Arc::clone(&client));
        emitter = client;

        let kube_client = crate::kube::client::make_client(config.kubeconfig.as_deref()).await?;
        source = Arc::new(KubeLogSource::new(kube_client.clone()));
        watcher = crate::podwatch::watcher::spawn_pod_watcher(
            kube_client,
            config.namespace.clone(),
            tx,
        );
    }

    let reconciler = Reconciler::new(
        Arc::clone(&registry),
        source,
        emitter,
        config.cluster.clone(),
        shutdown.token(),
    );

    tracing::info!(namespace = %config.namespace, dev = config.dev_mode, "watching pods");

    let ctrl_c = crate::shutdown::wait_ctrl_c(&shutdown);
    let sigterm = crate::shutdown::wait_sigterm(&shutdown);
    tokio::pin!(ctrl_c, sigterm);

    let reason = loop {
        tokio::select! {
            reason = &mut ctrl_c => break reason,
            reason = &mut sigterm => break reason,
            event = rx.recv() => match event {
                Some(event) => crate::podwatch::watcher::dispatch(&reconciler, event),
                None => break ShutdownReason::EventsClosed,
            },
        }
    };

    tracing::info!(reason = ?reason, tails = registry.active_tails(), "shutting down");

    shutdown.cancel();
    registry.remove_all();
    registry.wait().await;

    if let Some(client) = ingress {
        client.shutdown().await;
    }

    if reason != ShutdownReason::EventsClosed {
        watcher.abort();
        return Ok(());
    }

    // The event channel closed on its own; surface the source's outcome.
    match watcher.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e),
        Err(e) => Err(AppError::Other(format!("pod watcher task failed: {e}"))),
    }
}
