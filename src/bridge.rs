//! Capability-scoped channel between the shell and the viewer.
//!
//! The viewer holds a [`Bridge`] and can do exactly three things with it:
//! subscribe to open-file pushes, ask for the pending open path, and ask the
//! shell to read a file. The shell holds the [`BridgeHost`] (push side) and
//! the [`BridgeRequests`] receiver (serve side).

use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{mpsc, oneshot};

use crate::error::LoadError;

/// Requests the viewer can send to the shell.
#[derive(Debug)]
pub enum BridgeRequest {
    /// Non-clearing query of the pending open path
    InitialOpenPath {
        reply: oneshot::Sender<Option<PathBuf>>,
    },
    /// Read a whole file into memory
    ReadFile {
        path: PathBuf,
        reply: oneshot::Sender<Result<Vec<u8>, LoadError>>,
    },
}

type Listener = Arc<dyn Fn(PathBuf) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: Vec<(u64, Listener)>,
}

type SharedRegistry = Arc<Mutex<Registry>>;

fn lock(registry: &SharedRegistry) -> std::sync::MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(|e| e.into_inner())
}

/// Create a connected bridge.
pub fn channel(capacity: usize) -> (Bridge, BridgeHost, BridgeRequests) {
    let (tx, rx) = mpsc::channel(capacity);
    let registry = SharedRegistry::default();

    (
        Bridge {
            requests: tx,
            registry: Arc::clone(&registry),
        },
        BridgeHost { registry },
        BridgeRequests { rx },
    )
}

/// Viewer-side handle.
#[derive(Clone)]
pub struct Bridge {
    requests: mpsc::Sender<BridgeRequest>,
    registry: SharedRegistry,
}

impl Bridge {
    /// Register `callback` for every path the shell pushes, in push order.
    /// The callback stays registered until the returned [`Subscription`] is
    /// dropped or unsubscribed.
    pub fn subscribe_open_file<F>(&self, callback: F) -> Subscription
    where
        F: Fn(PathBuf) + Send + Sync + 'static,
    {
        let mut registry = lock(&self.registry);
        registry.next_id += 1;
        let id = registry.next_id;
        registry.listeners.push((id, Arc::new(callback)));

        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// The shell's pending open path, if any. Does not clear it.
    pub async fn get_initial_open_path(&self) -> Option<PathBuf> {
        let (reply, rx) = oneshot::channel();
        if self
            .requests
            .send(BridgeRequest::InitialOpenPath { reply })
            .await
            .is_err()
        {
            return None;
        }
        rx.await.ok().flatten()
    }

    /// Ask the shell to read `path` in full.
    pub async fn read_file_buffer(&self, path: impl Into<PathBuf>) -> Result<Vec<u8>, LoadError> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(BridgeRequest::ReadFile {
                path: path.into(),
                reply,
            })
            .await
            .map_err(|_| LoadError::ShellUnavailable)?;
        rx.await.map_err(|_| LoadError::ShellUnavailable)?
    }
}

/// Keeps an open-file callback registered.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).listeners.retain(|(id, _)| *id != self.id);
        }
    }
}

/// Shell-side push handle.
#[derive(Clone)]
pub struct BridgeHost {
    registry: SharedRegistry,
}

impl BridgeHost {
    /// Deliver `path` to every subscriber. Returns how many received it.
    pub fn push_open_file(&self, path: PathBuf) -> usize {
        // Call outside the lock so a callback may unsubscribe.
        let listeners: Vec<Listener> = lock(&self.registry)
            .listeners
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        for listener in &listeners {
            listener(path.clone());
        }
        listeners.len()
    }
}

/// Shell-side request stream.
pub struct BridgeRequests {
    rx: mpsc::Receiver<BridgeRequest>,
}

impl BridgeRequests {
    /// Next request, or `None` once every [`Bridge`] has been dropped.
    pub async fn next(&mut self) -> Option<BridgeRequest> {
        self.rx.recv().await
    }
}
