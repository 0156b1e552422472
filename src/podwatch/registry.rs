use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// A container whose logs are being tailed.
#[derive(Clone, Debug)]
pub struct Container {
    /// Registry generation; a tailer only deregisters the entry it created.
    pub id: u64,
    pub key: String,
    pub uid: String,
    pub name: String,
    pub pod_uid: String,
    pub is_init_container: bool,
    pub cancel: CancellationToken,
}

impl Container {
    pub fn new(
        key: impl Into<String>,
        name: impl Into<String>,
        pod_uid: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            key: key.into(),
            uid: String::new(),
            name: name.into(),
            pod_uid: pod_uid.into(),
            is_init_container: false,
            cancel: CancellationToken::new(),
        }
    }
}

/// Registry key of a pod's container.
pub fn container_key(pod_uid: &str, name: &str) -> String {
    format!("{pod_uid}-{name}")
}

/// Tracked containers plus a drain barrier over their tail tasks.
///
/// The map lock is only held for map operations, never across I/O.
pub struct ContainerRegistry {
    containers: Mutex<HashMap<String, Container>>,
    active_tails: Arc<watch::Sender<usize>>,
    next_id: AtomicU64,
}

impl ContainerRegistry {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0usize);
        Self {
            containers: Mutex::new(HashMap::new()),
            active_tails: Arc::new(tx),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Container>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.containers.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn get_container(&self, key: &str) -> Option<Container> {
        self.lock().get(key).cloned()
    }

    /// Inserts or replaces. A replaced entry's tailer is cancelled.
    pub fn add_container(&self, key: impl Into<String>, container: Container) {
        if let Some(old) = self.lock().insert(key.into(), container) {
            old.cancel.cancel();
        }
    }

    /// Removes and cancels. Absent keys are a no-op.
    pub fn remove_container(&self, key: &str) -> Option<Container> {
        let removed = self.lock().remove(key);
        if let Some(c) = &removed {
            c.cancel.cancel();
        }
        removed
    }

    /// Removes `key` only if it still holds generation `id`.
    pub fn remove_if_current(&self, key: &str, id: u64) -> bool {
        let mut map = self.lock();
        if !map.get(key).is_some_and(|c| c.id == id) {
            return false;
        }
        if let Some(c) = map.remove(key) {
            c.cancel.cancel();
        }
        true
    }

    /// Entries owned by `pod_uid`. Entries registered without an owner
    /// (empty `pod_uid`) are claimed when stored under one of the pod's
    /// declared keys; entries owned by another pod never are.
    pub fn tracked_for_pod(
        &self,
        pod_uid: &str,
        declared_keys: &HashSet<String>,
    ) -> Vec<Container> {
        self.lock()
            .iter()
            .filter(|(key, c)| {
                c.pod_uid == pod_uid
                    || (c.pod_uid.is_empty() && declared_keys.contains(key.as_str()))
            })
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn pod_uids(&self) -> HashSet<String> {
        self.lock().values().map(|c| c.pod_uid.clone()).collect()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Removes and cancels everything (shutdown).
    pub fn remove_all(&self) -> usize {
        let drained: Vec<Container> = self.lock().drain().map(|(_, c)| c).collect();
        for c in &drained {
            c.cancel.cancel();
        }
        drained.len()
    }

    /// Counts one tail task until the returned guard is dropped.
    /// Call before spawning the task so `wait` never misses it.
    pub fn track_tail(&self) -> TailGuard {
        self.active_tails.send_modify(|n| *n += 1);
        TailGuard {
            active_tails: Arc::clone(&self.active_tails),
        }
    }

    pub fn active_tails(&self) -> usize {
        *self.active_tails.borrow()
    }

    /// Resolves once no tail task is running.
    pub async fn wait(&self) {
        let mut rx = self.active_tails.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

impl Default for ContainerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Drain-barrier token held by a running tail task.
#[derive(Debug)]
pub struct TailGuard {
    active_tails: Arc<watch::Sender<usize>>,
}

impl Drop for TailGuard {
    fn drop(&mut self) {
        self.active_tails.send_modify(|n| *n = n.saturating_sub(1));
    }
}
