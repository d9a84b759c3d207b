//! Privileged side of the application.
//!
//! Owns the window lifecycle, the single-instance policy, file-open routing
//! and the file reads served over the bridge. Everything the viewer learns
//! about the filesystem goes through here.

pub mod args;
pub mod instance;
pub mod pending;
pub mod window;

pub use args::{extract_model_path, extract_model_path_in};
pub use pending::PendingOpenPath;
pub use window::WindowHandle;

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::bridge::{Bridge, BridgeHost, BridgeRequest, BridgeRequests};
use crate::error::LoadError;

#[derive(Default)]
struct ShellState {
    pending: PendingOpenPath,
    window: Option<Arc<dyn WindowHandle>>,
}

/// Shell state shared between the UI thread and the async services.
pub struct Shell {
    state: Mutex<ShellState>,
    host: BridgeHost,
    /// Viewer-side handle given to every window this shell builds
    bridge: Bridge,
}

impl Shell {
    pub fn new(bridge: Bridge, host: BridgeHost) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ShellState::default()),
            host,
            bridge,
        })
    }

    fn state(&self) -> MutexGuard<'_, ShellState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The capability handed to a newly built viewer.
    pub fn bridge(&self) -> Bridge {
        self.bridge.clone()
    }

    /// Scan this process's own arguments. A match becomes pending unless
    /// something (e.g. a forwarded launch) already claimed the slot.
    pub fn claim_startup_args<I, S>(&self, argv: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        if let Some(path) = extract_model_path(argv) {
            if self.state().pending.set_if_empty(path.clone()) {
                info!("Opening {} from launch arguments", path.display());
            } else {
                debug!("Launch argument {} ignored, slot already claimed", path.display());
            }
        }
    }

    /// A later launch was forwarded to us. `cwd` is the directory that
    /// launch ran in, for resolving a relative model path.
    pub fn second_instance<I, S>(&self, argv: I, cwd: Option<&Path>)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        debug!("Second instance launched");
        match extract_model_path_in(argv, cwd) {
            Some(path) => self.route(path),
            None => debug!("No model path in forwarded arguments"),
        }
    }

    /// Platform "open this file" event (file association, dock drop).
    pub fn open_file_event(&self, path: PathBuf) {
        debug!("Open-file event: {}", path.display());
        self.route(path);
    }

    /// Deliver now if a window is live, otherwise buffer (latest wins).
    fn route(&self, path: PathBuf) {
        let window = self.state().window.clone();

        if let Some(window) = window {
            window.restore_and_focus();
            if self.host.push_open_file(path.clone()) > 0 {
                window.request_repaint();
                return;
            }
            warn!("Window has no open-file subscriber, buffering {}", path.display());
        }

        if let Some(replaced) = self.state().pending.set(path) {
            debug!("Pending open path {} superseded", replaced.display());
        }
    }

    /// The window's content finished its first frame: register it and flush
    /// the pending path.
    pub fn window_ready(&self, window: Arc<dyn WindowHandle>) {
        let pending = {
            let mut state = self.state();
            state.window = Some(Arc::clone(&window));
            state.pending.take()
        };

        info!("Main window ready");

        if let Some(path) = pending {
            if self.host.push_open_file(path.clone()) == 0 {
                warn!("No open-file subscriber, keeping {} pending", path.display());
                self.state().pending.set_if_empty(path);
            } else {
                window.request_repaint();
            }
        }
    }

    pub fn window_closed(&self) {
        if self.state().window.take().is_some() {
            info!("Main window closed");
        }
    }

    /// Current pending path. Never clears it.
    pub fn pending_open_path(&self) -> Option<PathBuf> {
        self.state().pending.peek().map(Path::to_path_buf)
    }

    /// Read a whole file. No retries; the caller decides how to report.
    pub async fn read_file(path: &Path) -> Result<Vec<u8>, LoadError> {
        tokio::fs::read(path).await.map_err(|e| {
            warn!("Failed to read {}: {}", path.display(), e);
            LoadError::from_io(path, &e)
        })
    }

    /// Serve bridge requests until every viewer-side handle is gone.
    pub async fn serve(self: Arc<Self>, mut requests: BridgeRequests) {
        while let Some(request) = requests.next().await {
            match request {
                BridgeRequest::InitialOpenPath { reply } => {
                    let _ = reply.send(self.pending_open_path());
                }
                BridgeRequest::ReadFile { path, reply } => {
                    // Reads run concurrently so a slow disk never stalls queries.
                    tokio::spawn(async move {
                        let result = Self::read_file(&path).await;
                        if let Ok(bytes) = &result {
                            debug!("Read {} bytes from {}", bytes.len(), path.display());
                        }
                        let _ = reply.send(result);
                    });
                }
            }
        }
        debug!("Bridge closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeWindow {
        focused: AtomicUsize,
        repaints: AtomicUsize,
    }

    impl WindowHandle for FakeWindow {
        fn restore_and_focus(&self) {
            self.focused.fetch_add(1, Ordering::SeqCst);
        }

        fn request_repaint(&self) {
            self.repaints.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn shell_with_recorder() -> (Arc<Shell>, Arc<Mutex<Vec<PathBuf>>>, bridge::Subscription) {
        let (bridge, host, _requests) = bridge::channel(4);
        let shell = Shell::new(bridge.clone(), host);
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&delivered);
        let sub = bridge.subscribe_open_file(move |p| sink.lock().unwrap().push(p));
        (shell, delivered, sub)
    }

    #[test]
    fn test_second_instance_before_window_is_delivered_once_on_ready() {
        let (shell, delivered, _sub) = shell_with_recorder();

        shell.second_instance(&["viewer", "/models/a.vrm"], None);
        assert!(delivered.lock().unwrap().is_empty());
        assert_eq!(shell.pending_open_path(), Some(PathBuf::from("/models/a.vrm")));

        shell.window_ready(Arc::new(FakeWindow::default()));
        assert_eq!(*delivered.lock().unwrap(), vec![PathBuf::from("/models/a.vrm")]);
        assert_eq!(shell.pending_open_path(), None);

        // A later ready (e.g. a rebuilt window) does not redeliver.
        shell.window_closed();
        shell.window_ready(Arc::new(FakeWindow::default()));
        assert_eq!(delivered.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_query_does_not_clear_pending() {
        let (shell, _delivered, _sub) = shell_with_recorder();
        shell.open_file_event(PathBuf::from("x.vrm"));

        assert_eq!(shell.pending_open_path(), Some(PathBuf::from("x.vrm")));
        assert_eq!(shell.pending_open_path(), Some(PathBuf::from("x.vrm")));
    }

    #[test]
    fn test_rapid_signals_before_window_keep_latest() {
        let (shell, delivered, _sub) = shell_with_recorder();
        shell.second_instance(&["viewer", "first.vrm"], None);
        shell.open_file_event(PathBuf::from("second.vrm"));
        shell.second_instance(&["viewer", "third.VRM"], None);

        shell.window_ready(Arc::new(FakeWindow::default()));
        assert_eq!(*delivered.lock().unwrap(), vec![PathBuf::from("third.VRM")]);
    }

    #[test]
    fn test_live_window_is_focused_and_receives_push() {
        let (shell, delivered, _sub) = shell_with_recorder();
        let window = Arc::new(FakeWindow::default());
        shell.window_ready(window.clone());

        shell.second_instance(&["viewer", "b.vrm"], None);
        assert_eq!(window.focused.load(Ordering::SeqCst), 1);
        assert_eq!(*delivered.lock().unwrap(), vec![PathBuf::from("b.vrm")]);
        assert_eq!(shell.pending_open_path(), None);
    }

    #[test]
    fn test_second_instance_without_model_does_nothing_to_pending() {
        let (shell, delivered, _sub) = shell_with_recorder();
        shell.second_instance(&["viewer", "--flag"], None);
        assert_eq!(shell.pending_open_path(), None);
        assert!(delivered.lock().unwrap().is_empty());
    }

    #[test]
    fn test_forwarded_launch_after_close_only_buffers() {
        let (shell, delivered, _sub) = shell_with_recorder();
        let window = Arc::new(FakeWindow::default());
        shell.window_ready(window.clone());
        shell.window_closed();

        shell.second_instance(&["viewer", "--flag"], None);
        assert_eq!(shell.pending_open_path(), None);

        shell.second_instance(&["viewer", "late.vrm"], Some(Path::new("/home/me")));
        assert_eq!(window.focused.load(Ordering::SeqCst), 0);
        assert!(delivered.lock().unwrap().is_empty());
        assert_eq!(shell.pending_open_path(), Some(PathBuf::from("/home/me/late.vrm")));
    }

    #[test]
    fn test_startup_args_do_not_override_forwarded_path() {
        let (shell, _delivered, _sub) = shell_with_recorder();
        shell.second_instance(&["viewer", "forwarded.vrm"], None);
        shell.claim_startup_args(["viewer", "argv.vrm"]);
        assert_eq!(shell.pending_open_path(), Some(PathBuf::from("forwarded.vrm")));
    }

    #[test]
    fn test_closed_window_buffers_again() {
        let (shell, delivered, _sub) = shell_with_recorder();
        shell.window_ready(Arc::new(FakeWindow::default()));
        shell.window_closed();
        assert!(shell.state().window.is_none());

        shell.open_file_event(PathBuf::from("later.vrm"));
        assert!(delivered.lock().unwrap().is_empty());
        assert_eq!(shell.pending_open_path(), Some(PathBuf::from("later.vrm")));
    }

    #[tokio::test]
    async fn test_serve_answers_queries_and_reads() {
        let (bridge, host, requests) = bridge::channel(4);
        let shell = Shell::new(bridge.clone(), host);
        shell.open_file_event(PathBuf::from("queued.vrm"));
        tokio::spawn(Arc::clone(&shell).serve(requests));

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("model.vrm");
        std::fs::write(&file, b"glTF-bytes").unwrap();

        assert_eq!(
            bridge.get_initial_open_path().await,
            Some(PathBuf::from("queued.vrm"))
        );
        assert_eq!(
            bridge.get_initial_open_path().await,
            Some(PathBuf::from("queued.vrm"))
        );
        assert_eq!(bridge.read_file_buffer(&file).await.unwrap(), b"glTF-bytes");

        let missing = dir.path().join("missing.vrm");
        assert_eq!(
            bridge.read_file_buffer(&missing).await,
            Err(LoadError::NotFound(missing))
        );
    }
}
