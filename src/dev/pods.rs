use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

use crate::errors::AppResult;
use crate::types::{ContainerState, ContainerStatus, PodEvent, PodKey, PodSnapshot};

/// Scripted pod lifecycle for running without a cluster: a pod comes up with
/// two running containers, its sidecar terminates, the pod is replaced by a
/// new one, and the replacement is deleted.
pub fn spawn_dev_pods(
    namespace: String,
    phase: Duration,
    tx: mpsc::Sender<PodEvent>,
) -> tokio::task::JoinHandle<AppResult<()>> {
    tokio::spawn(async move {
        tracing::info!("starting dev-mode pod source");

        let pod = dev_pod(&namespace, "dev-uid-1", ContainerState::Running);
        tx.send(PodEvent::Applied(pod.clone())).await.ok();
        sleep(phase).await;

        tracing::info!("simulating sidecar exit");
        let sidecar_done = dev_pod(&namespace, "dev-uid-1", ContainerState::Terminated);
        tx.send(PodEvent::Applied(sidecar_done.clone())).await.ok();
        sleep(phase).await;

        tracing::info!("simulating pod restart");
        tx.send(PodEvent::Deleted(sidecar_done)).await.ok();

        let replacement = dev_pod(&namespace, "dev-uid-2", ContainerState::Running);
        tx.send(PodEvent::Applied(replacement.clone())).await.ok();
        sleep(phase).await;

        tx.send(PodEvent::Deleted(replacement)).await.ok();

        tracing::info!("dev-mode finished");

        Ok(())
    })
}

fn dev_pod(namespace: &str, uid: &str, sidecar: ContainerState) -> PodSnapshot {
    PodSnapshot {
        pod: PodKey {
            namespace: namespace.to_string(),
            name: "dev-pod-0".to_string(),
            uid: uid.to_string(),
        },
        containers: vec!["app".to_string(), "sidecar".to_string()],
        container_statuses: vec![
            ContainerStatus::new("app", ContainerState::Running),
            ContainerStatus::new("sidecar", sidecar),
        ],
        ..Default::default()
    }
}
