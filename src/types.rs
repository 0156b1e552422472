use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ContainerStatus as K8sContainerStatus, Pod};
use kube::ResourceExt;

/// Pod identity (use UID to avoid confusing replaced pods).
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct PodKey {
    pub namespace: String,
    pub name: String,
    pub uid: String,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContainerState {
    Running,
    Waiting,
    Terminated,
    /// The status entry exists but carries no state yet.
    Unknown,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ContainerStatus {
    pub name: String,
    /// Runtime id such as `containerd://...`, when the kubelet reported one.
    pub container_id: Option<String>,
    pub state: ContainerState,
}

impl ContainerStatus {
    pub fn new(name: impl Into<String>, state: ContainerState) -> Self {
        Self {
            name: name.into(),
            container_id: None,
            state,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == ContainerState::Running
    }
}

/// What the reconciler needs to know about one pod at one point in time.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PodSnapshot {
    pub pod: PodKey,
    pub labels: BTreeMap<String, String>,
    pub containers: Vec<String>,
    pub init_containers: Vec<String>,
    pub container_statuses: Vec<ContainerStatus>,
    pub init_container_statuses: Vec<ContainerStatus>,
}

impl PodSnapshot {
    /// Builds a snapshot from a Kubernetes pod. Pods without a UID are skipped.
    pub fn from_pod(pod: &Pod) -> Option<Self> {
        let uid = pod.uid()?;

        let (containers, init_containers) = pod
            .spec
            .as_ref()
            .map(|s| {
                let containers: Vec<String> =
                    s.containers.iter().map(|c| c.name.clone()).collect();
                let init: Vec<String> = s
                    .init_containers
                    .iter()
                    .flatten()
                    .map(|c| c.name.clone())
                    .collect();
                (containers, init)
            })
            .unwrap_or_default();

        let status = pod.status.as_ref();
        let container_statuses: Vec<ContainerStatus> = status
            .and_then(|s| s.container_statuses.as_ref())
            .map(|v| v.iter().map(convert_status).collect())
            .unwrap_or_default();
        let init_container_statuses: Vec<ContainerStatus> = status
            .and_then(|s| s.init_container_statuses.as_ref())
            .map(|v| v.iter().map(convert_status).collect())
            .unwrap_or_default();

        Some(Self {
            pod: PodKey {
                namespace: pod.namespace().unwrap_or_default(),
                name: pod.name_any(),
                uid,
            },
            labels: pod.labels().clone(),
            containers,
            init_containers,
            container_statuses,
            init_container_statuses,
        })
    }

    /// The same pod with nothing declared: reconciling it stops every tailer.
    pub fn emptied(&self) -> Self {
        Self {
            pod: self.pod.clone(),
            labels: self.labels.clone(),
            ..Default::default()
        }
    }

    /// A snapshot for a pod known only by UID (vanished during a relist).
    pub fn gone(uid: impl Into<String>) -> Self {
        Self {
            pod: PodKey {
                uid: uid.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

fn convert_status(s: &K8sContainerStatus) -> ContainerStatus {
    let state = match s.state.as_ref() {
        Some(st) if st.running.is_some() => ContainerState::Running,
        Some(st) if st.terminated.is_some() => ContainerState::Terminated,
        Some(st) if st.waiting.is_some() => ContainerState::Waiting,
        _ => ContainerState::Unknown,
    };

    ContainerStatus {
        name: s.name.clone(),
        container_id: s.container_id.clone(),
        state,
    }
}

/// Pod lifecycle notifications, produced by a pod source and consumed by the
/// single reconciliation driver.
#[derive(Clone, Debug)]
pub enum PodEvent {
    Applied(PodSnapshot),
    Deleted(PodSnapshot),
    /// Full relist after the watch (re)started.
    Resync(Vec<PodSnapshot>),
}
