use std::collections::HashSet;

use futures::{pin_mut, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client};
use kube_runtime::{watcher, WatchStreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::errors::AppResult;
use crate::podwatch::reconciler::Reconciler;
use crate::types::{PodEvent, PodSnapshot};

/// Watches pods in `namespace` and forwards every notification as a
/// `PodEvent`. Watch errors are retried with backoff; the task ends only
/// when the receiver is gone.
pub fn spawn_pod_watcher(
    client: Client,
    namespace: String,
    tx: mpsc::Sender<PodEvent>,
) -> JoinHandle<AppResult<()>> {
    tokio::spawn(async move {
        let api: Api<Pod> = Api::namespaced(client, &namespace);

        let stream = watcher(api, watcher::Config::default()).default_backoff();
        pin_mut!(stream);

        while let Some(item) = stream.next().await {
            let ev = match item {
                Ok(ev) => ev,
                Err(e) => {
                    tracing::warn!(namespace = %namespace, error = %e, "pod watch error");
                    continue;
                }
            };

            let event = match ev {
                watcher::Event::Applied(pod) => match PodSnapshot::from_pod(&pod) {
                    Some(snap) => PodEvent::Applied(snap),
                    None => continue,
                },
                watcher::Event::Deleted(pod) => match PodSnapshot::from_pod(&pod) {
                    Some(snap) => PodEvent::Deleted(snap),
                    None => continue,
                },
                watcher::Event::Restarted(pods) => {
                    PodEvent::Resync(pods.iter().filter_map(PodSnapshot::from_pod).collect())
                }
            };

            if tx.send(event).await.is_err() {
                break;
            }
        }

        Ok(())
    })
}

/// Applies one pod notification. Errors are logged and the pod is skipped;
/// they never stop the event loop.
pub fn dispatch(reconciler: &Reconciler, event: PodEvent) {
    match event {
        PodEvent::Applied(snap) => ensure(reconciler, &snap),
        PodEvent::Deleted(snap) => {
            tracing::info!(
                namespace = %snap.pod.namespace,
                pod = %snap.pod.name,
                uid = %snap.pod.uid,
                "pod deleted"
            );
            ensure(reconciler, &snap.emptied());
        }
        PodEvent::Resync(snaps) => {
            let listed: HashSet<&str> = snaps.iter().map(|s| s.pod.uid.as_str()).collect();

            for snap in &snaps {
                ensure(reconciler, snap);
            }

            // Pods deleted while the watch was down never got a Deleted event.
            for uid in reconciler.registry().pod_uids() {
                if !listed.contains(uid.as_str()) {
                    ensure(reconciler, &PodSnapshot::gone(uid));
                }
            }
        }
    }
}

fn ensure(reconciler: &Reconciler, snap: &PodSnapshot) {
    if let Err(e) = reconciler.ensure_pod_status(snap) {
        tracing::warn!(
            namespace = %snap.pod.namespace,
            pod = %snap.pod.name,
            error = %e,
            "skipping pod"
        );
    }
}
