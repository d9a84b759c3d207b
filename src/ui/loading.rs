//! Asynchronous model loading off the render loop.
//!
//! Every request is stamped with a generation. Only the result of the most
//! recent request is handed back to the UI; a slow earlier load that finishes
//! late is dropped instead of replacing a newer model.

use std::path::PathBuf;

use eframe::egui;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::bridge::Bridge;
use crate::error::LoadError;
use crate::vrm::VrmModel;

/// Where model bytes come from.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadSource {
    /// Read through the shell
    Path(PathBuf),
    /// Already in memory (file picker, dropped file without a path)
    Bytes { name: String, bytes: Vec<u8> },
}

impl LoadSource {
    /// What the readout shows for this source.
    pub fn display_name(&self) -> String {
        match self {
            LoadSource::Path(path) => path.display().to_string(),
            LoadSource::Bytes { name, .. } => name.clone(),
        }
    }
}

pub struct LoadOutcome {
    pub generation: u64,
    pub name: String,
    pub result: Result<VrmModel, LoadError>,
}

/// Monotonic load counter.
#[derive(Debug, Default)]
pub struct Generation {
    latest: u64,
}

impl Generation {
    pub fn begin(&mut self) -> u64 {
        self.latest += 1;
        self.latest
    }

    pub fn is_current(&self, generation: u64) -> bool {
        generation == self.latest
    }

    pub fn latest(&self) -> u64 {
        self.latest
    }
}

pub struct Loader {
    bridge: Bridge,
    runtime: tokio::runtime::Handle,
    generation: Generation,
    /// Path of the current request while it is still running
    in_flight: Option<PathBuf>,
    /// Set from `request` until the latest outcome is accepted, whatever the source
    waiting: bool,
    tx: mpsc::UnboundedSender<LoadOutcome>,
    rx: mpsc::UnboundedReceiver<LoadOutcome>,
    repaint: Option<egui::Context>,
}

impl Loader {
    pub fn new(bridge: Bridge, runtime: tokio::runtime::Handle, repaint: Option<egui::Context>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            bridge,
            runtime,
            generation: Generation::default(),
            in_flight: None,
            waiting: false,
            tx,
            rx,
            repaint,
        }
    }

    /// Start loading `source`. Returns the request's generation, or `None`
    /// when the same path is already loading.
    pub fn request(&mut self, source: LoadSource) -> Option<u64> {
        if let LoadSource::Path(path) = &source {
            if self.in_flight.as_ref() == Some(path) {
                debug!("Already loading {}", path.display());
                return None;
            }
        }

        let generation = self.generation.begin();
        let name = source.display_name();
        self.in_flight = match &source {
            LoadSource::Path(path) => Some(path.clone()),
            LoadSource::Bytes { .. } => None,
        };
        self.waiting = true;
        info!("Loading {} (request {})", name, generation);

        let bridge = self.bridge.clone();
        let tx = self.tx.clone();
        let repaint = self.repaint.clone();
        self.runtime.spawn(async move {
            let bytes = match source {
                LoadSource::Path(path) => bridge.read_file_buffer(path).await,
                LoadSource::Bytes { bytes, .. } => Ok(bytes),
            };
            let result = match bytes {
                Ok(bytes) => decode(bytes).await,
                Err(e) => Err(e),
            };

            // The receiver is gone only when the window is closing.
            let _ = tx.send(LoadOutcome {
                generation,
                name,
                result,
            });
            if let Some(ctx) = repaint {
                ctx.request_repaint();
            }
        });

        Some(generation)
    }

    /// The latest request's outcome, once it has arrived. Outcomes of
    /// superseded requests are discarded.
    pub fn poll(&mut self) -> Option<LoadOutcome> {
        while let Ok(outcome) = self.rx.try_recv() {
            if let Some(current) = self.accept(outcome) {
                return Some(current);
            }
        }
        None
    }

    fn accept(&mut self, outcome: LoadOutcome) -> Option<LoadOutcome> {
        if !self.generation.is_current(outcome.generation) {
            debug!(
                "Discarding stale load {} of {} (latest is {})",
                outcome.generation,
                outcome.name,
                self.generation.latest()
            );
            return None;
        }
        self.in_flight = None;
        self.waiting = false;
        Some(outcome)
    }

    /// True from any request until its outcome has been taken by `poll`.
    pub fn is_loading(&self) -> bool {
        self.waiting
    }
}

/// Status line for a failed load. Read failures and decode failures read differently.
pub fn describe_failure(name: &str, err: &LoadError) -> String {
    if err.is_io() {
        format!("Could not read {name}: {err}")
    } else {
        format!("Could not open {name}: {err}")
    }
}

async fn decode(bytes: Vec<u8>) -> Result<VrmModel, LoadError> {
    tokio::task::spawn_blocking(move || VrmModel::from_slice(&bytes))
        .await
        .map_err(|e| LoadError::MalformedPayload(format!("decoder stopped: {e}")))?
}

/// Reconciles the startup query for the pending path with the first pushed
/// path, which can both carry the same file when the query wins the race.
#[derive(Debug, Default)]
pub struct StartupHandshake {
    initial: Option<PathBuf>,
    first_push: Option<PathBuf>,
    push_seen: bool,
}

impl StartupHandshake {
    /// Answer to the initial query. Returns the path to load, if any.
    pub fn on_initial(&mut self, path: Option<PathBuf>) -> Option<PathBuf> {
        let path = path?;
        if self.first_push.as_ref() == Some(&path) {
            return None;
        }
        self.initial = Some(path.clone());
        Some(path)
    }

    /// A pushed path. Returns the path to load, if any.
    pub fn on_push(&mut self, path: PathBuf) -> Option<PathBuf> {
        if self.push_seen {
            return Some(path);
        }
        self.push_seen = true;
        self.first_push = Some(path.clone());
        if self.initial.take().as_ref() == Some(&path) {
            return None;
        }
        Some(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{self, BridgeRequest};
    use crate::vrm::fixtures;
    use std::time::Duration;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap()
    }

    /// Block until an outcome is accepted or nothing more arrives.
    fn wait(rt: &tokio::runtime::Runtime, loader: &mut Loader) -> Option<LoadOutcome> {
        loop {
            let next = rt.block_on(async { tokio::time::timeout(Duration::from_secs(5), loader.rx.recv()).await });
            match next {
                Ok(Some(outcome)) => {
                    if let Some(current) = loader.accept(outcome) {
                        return Some(current);
                    }
                }
                _ => return None,
            }
        }
    }

    #[test]
    fn test_bytes_load_decodes() {
        let rt = runtime();
        let (bridge, _host, _requests) = bridge::channel(4);
        let mut loader = Loader::new(bridge, rt.handle().clone(), None);

        let generation = loader.request(LoadSource::Bytes {
            name: "tri.vrm".into(),
            bytes: fixtures::triangle(None),
        });
        assert_eq!(generation, Some(1));

        let outcome = wait(&rt, &mut loader).unwrap();
        assert_eq!(outcome.name, "tri.vrm");
        assert!(outcome.result.is_ok());
    }

    #[test]
    fn test_stale_generation_is_discarded() {
        let rt = runtime();
        let (bridge, _host, _requests) = bridge::channel(4);
        let mut loader = Loader::new(bridge, rt.handle().clone(), None);

        loader.request(LoadSource::Bytes {
            name: "first.vrm".into(),
            bytes: fixtures::triangle(None),
        });
        loader.request(LoadSource::Bytes {
            name: "second.vrm".into(),
            bytes: fixtures::morph_triangle(None),
        });

        let outcome = wait(&rt, &mut loader).unwrap();
        assert_eq!(outcome.generation, 2);
        assert_eq!(outcome.name, "second.vrm");
        // Whatever else arrives is the first request, which is stale.
        assert!(wait(&rt, &mut loader).is_none());
    }

    #[test]
    fn test_poll_drains_from_a_non_runtime_thread() {
        let rt = runtime();
        let (bridge, _host, _requests) = bridge::channel(4);
        let mut loader = Loader::new(bridge, rt.handle().clone(), None);
        assert!(loader.poll().is_none());

        loader.request(LoadSource::Bytes {
            name: "frame.vrm".into(),
            bytes: fixtures::triangle(None),
        });
        let mut outcome = None;
        for _ in 0..500 {
            outcome = loader.poll();
            if outcome.is_some() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(outcome.unwrap().name, "frame.vrm");
        assert!(loader.poll().is_none());
    }

    #[test]
    fn test_bytes_load_counts_as_loading_until_polled() {
        let rt = runtime();
        let (bridge, _host, _requests) = bridge::channel(4);
        let mut loader = Loader::new(bridge, rt.handle().clone(), None);
        assert!(!loader.is_loading());

        loader.request(LoadSource::Bytes {
            name: "picked.vrm".into(),
            bytes: fixtures::triangle(None),
        });
        assert!(loader.is_loading());

        wait(&rt, &mut loader).unwrap();
        assert!(!loader.is_loading());
    }

    #[test]
    fn test_stale_outcome_keeps_loading_flag() {
        let rt = runtime();
        let (bridge, _host, _requests) = bridge::channel(4);
        let mut loader = Loader::new(bridge, rt.handle().clone(), None);

        loader.request(LoadSource::Bytes {
            name: "old.vrm".into(),
            bytes: fixtures::triangle(None),
        });
        loader.request(LoadSource::Bytes {
            name: "new.vrm".into(),
            bytes: fixtures::triangle(None),
        });
        let stale = LoadOutcome {
            generation: 1,
            name: "old.vrm".into(),
            result: Err(LoadError::MalformedPayload("late".into())),
        };
        assert!(loader.accept(stale).is_none());
        assert!(loader.is_loading());
    }

    #[test]
    fn test_garbage_reports_malformed() {
        let rt = runtime();
        let (bridge, _host, _requests) = bridge::channel(4);
        let mut loader = Loader::new(bridge, rt.handle().clone(), None);

        loader.request(LoadSource::Bytes {
            name: "junk.vrm".into(),
            bytes: b"definitely not a model".to_vec(),
        });
        let outcome = wait(&rt, &mut loader).unwrap();
        assert!(matches!(outcome.result, Err(LoadError::MalformedPayload(_))));
    }

    #[test]
    fn test_path_load_goes_through_the_shell() {
        let rt = runtime();
        let (bridge, _host, mut requests) = bridge::channel(4);
        rt.spawn(async move {
            while let Some(req) = requests.next().await {
                if let BridgeRequest::ReadFile { path, reply } = req {
                    let _ = reply.send(Err(LoadError::NotFound(path)));
                }
            }
        });

        let mut loader = Loader::new(bridge, rt.handle().clone(), None);
        let path = PathBuf::from("/nowhere/a.vrm");
        assert!(loader.request(LoadSource::Path(path.clone())).is_some());
        assert!(loader.is_loading());
        // Same path while in flight is not requested twice.
        assert!(loader.request(LoadSource::Path(path.clone())).is_none());

        let outcome = wait(&rt, &mut loader).unwrap();
        assert_eq!(outcome.result.err(), Some(LoadError::NotFound(path)));
        assert!(!loader.is_loading());
    }

    #[test]
    fn test_failure_wording_follows_error_kind() {
        let missing = LoadError::NotFound(PathBuf::from("/m/a.vrm"));
        assert!(describe_failure("a.vrm", &missing).starts_with("Could not read a.vrm"));

        let broken = LoadError::MalformedPayload("bad magic".into());
        let text = describe_failure("b.vrm", &broken);
        assert!(text.starts_with("Could not open b.vrm"));
        assert!(text.contains("bad magic"));
    }

    #[test]
    fn test_handshake_initial_then_push_loads_once() {
        let mut hs = StartupHandshake::default();
        let p = PathBuf::from("a.vrm");
        assert_eq!(hs.on_initial(Some(p.clone())), Some(p.clone()));
        assert_eq!(hs.on_push(p.clone()), None);
        // A later open of the same file is a real request.
        assert_eq!(hs.on_push(p.clone()), Some(p));
    }

    #[test]
    fn test_handshake_push_then_initial_loads_once() {
        let mut hs = StartupHandshake::default();
        let p = PathBuf::from("a.vrm");
        assert_eq!(hs.on_push(p.clone()), Some(p.clone()));
        assert_eq!(hs.on_initial(Some(p)), None);
    }

    #[test]
    fn test_handshake_different_paths_both_load() {
        let mut hs = StartupHandshake::default();
        assert_eq!(hs.on_initial(None), None);
        let a = PathBuf::from("a.vrm");
        assert_eq!(hs.on_push(a.clone()), Some(a));
    }
}
