use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::errors::{AppError, AppResult};
use crate::loggregator::{EnvelopeEmitter, LoggregatorAppMeta, LoggregatorWriter};
use crate::podwatch::registry::{container_key, Container, ContainerRegistry};
use crate::stream::tail::{tail, LogSource, TailTarget};
use crate::types::{ContainerStatus, PodSnapshot};

/// Turns pod snapshots into tailer starts and stops.
pub struct Reconciler {
    registry: Arc<ContainerRegistry>,
    source: Arc<dyn LogSource>,
    emitter: Arc<dyn EnvelopeEmitter>,
    cluster: String,
    shutdown: CancellationToken,
}

struct Declared<'a> {
    key: String,
    name: &'a str,
    is_init: bool,
    status: Option<&'a ContainerStatus>,
}

impl Declared<'_> {
    fn is_eligible(&self) -> bool {
        self.status.is_some_and(ContainerStatus::is_running)
    }
}

impl Reconciler {
    pub fn new(
        registry: Arc<ContainerRegistry>,
        source: Arc<dyn LogSource>,
        emitter: Arc<dyn EnvelopeEmitter>,
        cluster: impl Into<String>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            source,
            emitter,
            cluster: cluster.into(),
            shutdown,
        }
    }

    pub fn registry(&self) -> &Arc<ContainerRegistry> {
        &self.registry
    }

    /// Makes the registry's view of `pod` match its running containers.
    ///
    /// Running containers (init containers included) that are not tracked
    /// get a tailer; tracked ones that are gone, lost their status, or
    /// stopped running are removed and cancelled. Calling it again with the
    /// same snapshot changes nothing.
    pub fn ensure_pod_status(&self, pod: &PodSnapshot) -> AppResult<()> {
        let declared = declared_containers(pod)?;

        let eligible: HashSet<&str> = declared
            .iter()
            .filter(|d| d.is_eligible())
            .map(|d| d.key.as_str())
            .collect();
        let declared_keys: HashSet<String> = declared.iter().map(|d| d.key.clone()).collect();

        for tracked in self.registry.tracked_for_pod(&pod.pod.uid, &declared_keys) {
            if eligible.contains(tracked.key.as_str()) {
                continue;
            }
            if self.registry.remove_container(&tracked.key).is_some() {
                tracing::info!(
                    namespace = %pod.pod.namespace,
                    pod = %pod.pod.name,
                    container = %tracked.name,
                    key = %tracked.key,
                    "stopping tailer"
                );
            }
        }

        for d in declared.iter().filter(|d| d.is_eligible()) {
            if self.registry.get_container(&d.key).is_some() {
                continue;
            }
            self.start(pod, d);
        }

        Ok(())
    }

    fn start(&self, pod: &PodSnapshot, d: &Declared<'_>) {
        let cancel = self.shutdown.child_token();
        let id = self.registry.next_id();

        let container = Container {
            id,
            key: d.key.clone(),
            uid: d
                .status
                .and_then(|s| s.container_id.clone())
                .unwrap_or_default(),
            name: d.name.to_string(),
            pod_uid: pod.pod.uid.clone(),
            is_init_container: d.is_init,
            cancel: cancel.clone(),
        };

        let meta = LoggregatorAppMeta::for_container(
            &pod.pod.namespace,
            &pod.pod.name,
            &pod.labels,
            d.name,
            &self.cluster,
        );
        let mut writer = LoggregatorWriter::new(meta, Arc::clone(&self.emitter));
        let target = TailTarget {
            namespace: pod.pod.namespace.clone(),
            pod: pod.pod.name.clone(),
            container: d.name.to_string(),
        };

        tracing::info!(
            namespace = %target.namespace,
            pod = %target.pod,
            container = %target.container,
            init = d.is_init,
            key = %d.key,
            "starting tailer"
        );

        self.registry.add_container(d.key.clone(), container);
        let guard = self.registry.track_tail();

        let registry = Arc::clone(&self.registry);
        let source = Arc::clone(&self.source);
        let key = d.key.clone();

        tokio::spawn(async move {
            match tail(source.as_ref(), &target, &mut writer, &cancel).await {
                Ok(()) if cancel.is_cancelled() => {}
                Ok(()) => tracing::info!(
                    namespace = %target.namespace,
                    pod = %target.pod,
                    container = %target.container,
                    "log stream ended"
                ),
                Err(e) => tracing::warn!(
                    namespace = %target.namespace,
                    pod = %target.pod,
                    container = %target.container,
                    error = %e,
                    "log stream failed"
                ),
            }

            // Free the key so the next reconciliation can restart it.
            registry.remove_if_current(&key, id);
            drop(guard);
        });
    }
}

/// Every declared container with its status entry, rejecting snapshots
/// whose keys would be ambiguous.
fn declared_containers(pod: &PodSnapshot) -> AppResult<Vec<Declared<'_>>> {
    if pod.pod.uid.is_empty() {
        return Err(AppError::Reconcile(format!(
            "pod {}/{} has no uid",
            pod.pod.namespace, pod.pod.name
        )));
    }

    let regular = status_index(&pod.container_statuses);
    let init = status_index(&pod.init_container_statuses);

    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(pod.containers.len() + pod.init_containers.len());

    let all = pod
        .containers
        .iter()
        .map(|n| (n, false))
        .chain(pod.init_containers.iter().map(|n| (n, true)));

    for (name, is_init) in all {
        if name.is_empty() {
            return Err(AppError::Reconcile(format!(
                "pod {} declares a container without a name",
                pod.pod.uid
            )));
        }
        if !seen.insert(name.as_str()) {
            return Err(AppError::Reconcile(format!(
                "pod {} declares container {name:?} twice",
                pod.pod.uid
            )));
        }

        let statuses = if is_init { &init } else { &regular };
        out.push(Declared {
            key: container_key(&pod.pod.uid, name),
            name,
            is_init,
            status: statuses.get(name.as_str()).copied(),
        });
    }

    Ok(out)
}

fn status_index(statuses: &[ContainerStatus]) -> HashMap<&str, &ContainerStatus> {
    statuses.iter().map(|s| (s.name.as_str(), s)).collect()
}
