//! Reconciliation scenarios driven through the public API.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use tokio_util::sync::CancellationToken;

use kube_loggregator_bridge::errors::AppResult;
use kube_loggregator_bridge::loggregator::proto::Envelope;
use kube_loggregator_bridge::loggregator::EnvelopeEmitter;
use kube_loggregator_bridge::podwatch::{Container, ContainerRegistry, Reconciler};
use kube_loggregator_bridge::stream::{LogReader, LogSource, TailTarget};
use kube_loggregator_bridge::types::{ContainerState, ContainerStatus, PodKey, PodSnapshot};

struct Discard;

impl EnvelopeEmitter for Discard {
    fn emit(&self, _envelope: Envelope) {}
}

/// Streams that stay open until their tailer is cancelled.
struct Endless;

#[async_trait]
impl LogSource for Endless {
    async fn open(&self, _target: &TailTarget) -> AppResult<LogReader> {
        let s = stream::pending::<io::Result<Vec<u8>>>().boxed();
        Ok(Box::pin(s.into_async_read()))
    }
}

struct Harness {
    registry: Arc<ContainerRegistry>,
    reconciler: Reconciler,
}

impl Harness {
    fn new() -> Self {
        let registry = Arc::new(ContainerRegistry::new());
        let reconciler = Reconciler::new(
            registry.clone(),
            Arc::new(Endless),
            Arc::new(Discard),
            "k",
            CancellationToken::new(),
        );
        Self {
            registry,
            reconciler,
        }
    }

    fn preload(&self, key: &str, name: &str, pod_uid: &str, init: bool) {
        let mut c = Container::new(key, name, pod_uid);
        c.uid = key.to_string();
        c.is_init_container = init;
        self.registry.add_container(key, c);
    }

    fn has(&self, key: &str) -> bool {
        self.registry.get_container(key).is_some()
    }

    async fn drain(&self) {
        self.registry.remove_all();
        tokio::time::timeout(Duration::from_secs(2), self.registry.wait())
            .await
            .expect("all tailers stop after removal");
        assert_eq!(self.registry.active_tails(), 0);
    }
}

fn running(name: &str) -> ContainerStatus {
    ContainerStatus::new(name, ContainerState::Running)
}

fn pod() -> PodSnapshot {
    PodSnapshot {
        pod: PodKey {
            namespace: "ns".into(),
            name: "p".into(),
            uid: "poduid".into(),
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn new_running_containers_are_tracked() {
    let h = Harness::new();
    let mut snap = pod();
    snap.containers = vec!["testcontainer".into()];
    snap.init_containers = vec!["testinitcontainer".into()];
    snap.container_statuses = vec![running("testcontainer")];
    snap.init_container_statuses = vec![running("testinitcontainer")];

    h.reconciler.ensure_pod_status(&snap).unwrap();

    let c = h.registry.get_container("poduid-testcontainer").unwrap();
    assert_eq!(c.name, "testcontainer");
    assert!(!c.is_init_container);
    let init = h.registry.get_container("poduid-testinitcontainer").unwrap();
    assert_eq!(init.name, "testinitcontainer");
    assert!(init.is_init_container);
    assert_eq!(h.registry.active_tails(), 2);

    h.drain().await;
}

#[tokio::test]
async fn tracked_and_new_running_containers_are_all_kept() {
    let h = Harness::new();
    h.preload("poduid-mycontainer", "MyContainer", "", false);
    h.preload("poduid-myinitcontainer", "MyInitContainer", "", true);

    let mut snap = pod();
    snap.containers = vec!["mycontainer".into(), "mycontainer2".into()];
    snap.init_containers = vec!["myinitcontainer".into(), "myinitcontainer2".into()];
    snap.container_statuses = vec![running("mycontainer"), running("mycontainer2")];
    snap.init_container_statuses = vec![running("myinitcontainer"), running("myinitcontainer2")];

    h.reconciler.ensure_pod_status(&snap).unwrap();

    for key in [
        "poduid-mycontainer",
        "poduid-mycontainer2",
        "poduid-myinitcontainer",
        "poduid-myinitcontainer2",
    ] {
        assert!(h.has(key), "{key} should be tracked");
    }
    // Already-tracked entries are left alone; only the two new ones start.
    assert_eq!(h.registry.active_tails(), 2);

    h.drain().await;
}

#[tokio::test]
async fn removed_containers_leave_other_pods_alone() {
    let h = Harness::new();
    h.preload("podContainerUID", "MyContainer", "poduid", false);
    h.preload("otherPodContainerUID", "MyContainer", "someOtherPodUID", false);
    h.preload("podInitContainerUID", "MyInitContainer", "poduid", true);
    h.preload("otherPodInitContainerUID", "MyInitContainer", "someOtherPodUID", true);

    h.reconciler.ensure_pod_status(&pod()).unwrap();

    assert!(!h.has("podContainerUID"));
    assert!(!h.has("podInitContainerUID"));
    assert!(h.has("otherPodContainerUID"));
    assert!(h.has("otherPodInitContainerUID"));
}

#[tokio::test]
async fn containers_without_status_are_removed() {
    let h = Harness::new();
    h.preload("poduid-mycontainer", "MyContainer", "", false);
    h.preload("poduid-myinitcontainer", "MyInitContainer", "", true);

    let mut snap = pod();
    snap.containers = vec!["mycontainer".into()];
    snap.init_containers = vec!["myinitcontainer".into()];

    h.reconciler.ensure_pod_status(&snap).unwrap();

    assert!(!h.has("poduid-mycontainer"));
    assert!(!h.has("poduid-myinitcontainer"));
    assert!(h.registry.is_empty());
}

#[tokio::test]
async fn non_running_containers_are_removed() {
    let h = Harness::new();
    h.preload("poduid-mycontainer", "MyContainer", "", false);
    h.preload("poduid-myinitcontainer", "MyInitContainer", "", true);

    let mut snap = pod();
    snap.containers = vec!["mycontainer".into()];
    snap.init_containers = vec!["myinitcontainer".into()];
    // The init container's status sits in the regular list, so it has none.
    snap.container_statuses = vec![
        ContainerStatus::new("myinitcontainer", ContainerState::Waiting),
        ContainerStatus::new("mycontainer", ContainerState::Waiting),
    ];

    h.reconciler.ensure_pod_status(&snap).unwrap();

    assert!(!h.has("poduid-mycontainer"));
    assert!(!h.has("poduid-myinitcontainer"));
}

#[tokio::test]
async fn converges_to_running_set_across_pods_with_shared_names() {
    let h = Harness::new();

    let mut a = pod();
    a.containers = vec!["app".into(), "sidecar".into(), "pending".into()];
    a.container_statuses = vec![
        running("app"),
        running("sidecar"),
        ContainerStatus::new("pending", ContainerState::Waiting),
    ];

    let mut b = pod();
    b.pod.uid = "other".into();
    b.containers = vec!["app".into()];
    b.container_statuses = vec![running("app")];

    h.reconciler.ensure_pod_status(&a).unwrap();
    h.reconciler.ensure_pod_status(&b).unwrap();
    assert_eq!(
        h.registry.keys(),
        vec!["other-app", "poduid-app", "poduid-sidecar"]
    );

    // Pod A's sidecar stops; pod B is untouched.
    a.container_statuses[1] = ContainerStatus::new("sidecar", ContainerState::Terminated);
    h.reconciler.ensure_pod_status(&a).unwrap();
    h.reconciler.ensure_pod_status(&a).unwrap();
    assert_eq!(h.registry.keys(), vec!["other-app", "poduid-app"]);

    // Let the cancelled sidecar tailer confirm before counting.
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(h.registry.active_tails(), 2);

    h.drain().await;
}
