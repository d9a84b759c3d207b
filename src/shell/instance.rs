//! Single-instance lock and launch forwarding.
//!
//! The first instance owns a local endpoint (a Unix domain socket, or a named
//! pipe on Windows). Later launches connect to it, send their argument list
//! and working directory as one JSON line and exit without opening a window.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use super::Shell;
use crate::error::InstanceError;

/// One line on the instance endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InstanceMessage {
    /// A later launch, its full argument list and the directory it was
    /// started in. Relative model paths in `argv` are relative to `cwd`.
    SecondInstance {
        argv: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<PathBuf>,
    },
    /// A platform open-file request for a single path
    OpenFile { path: PathBuf },
}

impl InstanceMessage {
    pub fn encode(&self) -> Result<String, InstanceError> {
        let mut line =
            serde_json::to_string(self).map_err(|e| InstanceError::Protocol(e.to_string()))?;
        line.push('\n');
        Ok(line)
    }

    pub fn decode(line: &str) -> Result<Self, InstanceError> {
        serde_json::from_str(line.trim()).map_err(|e| InstanceError::Protocol(e.to_string()))
    }
}

/// Hand a received message to the shell.
pub fn dispatch(shell: &Shell, message: InstanceMessage) {
    match message {
        InstanceMessage::SecondInstance { argv, cwd } => shell.second_instance(&argv, cwd.as_deref()),
        InstanceMessage::OpenFile { path } => shell.open_file_event(path),
    }
}

/// Where the instance endpoint lives.
#[derive(Debug, Clone)]
pub struct Endpoint {
    #[cfg(unix)]
    path: PathBuf,
    #[cfg(windows)]
    pipe_name: String,
}

impl Endpoint {
    /// Per-user endpoint for `name`.
    pub fn for_name(name: &str) -> Self {
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "user".to_string());

        #[cfg(unix)]
        {
            let dir = std::env::var_os("XDG_RUNTIME_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir);
            Self {
                path: dir.join(format!("{name}-{user}.sock")),
            }
        }

        #[cfg(windows)]
        {
            Self {
                pipe_name: format!(r"\\.\pipe\{name}-{user}"),
            }
        }
    }

    /// Endpoint at an explicit socket path.
    #[cfg(unix)]
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn describe(&self) -> String {
        #[cfg(unix)]
        {
            self.path.display().to_string()
        }
        #[cfg(windows)]
        {
            self.pipe_name.clone()
        }
    }
}

/// Outcome of trying to become the running instance.
pub enum Acquired {
    /// We own the endpoint; serve it with [`InstanceListener::run`].
    Primary(InstanceListener),
    /// Another instance owns it and has our arguments now.
    Forwarded,
}

async fn forward<W>(mut stream: W, argv: &[String]) -> Result<(), InstanceError>
where
    W: AsyncWrite + Unpin,
{
    let line = InstanceMessage::SecondInstance {
        argv: argv.to_vec(),
        cwd: std::env::current_dir().ok(),
    }
    .encode()?;

    stream
        .write_all(line.as_bytes())
        .await
        .map_err(|e| InstanceError::Forward(e.to_string()))?;
    stream
        .shutdown()
        .await
        .map_err(|e| InstanceError::Forward(e.to_string()))?;
    Ok(())
}

async fn handle_connection<R>(stream: R, shell: &Shell)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match InstanceMessage::decode(&line) {
                Ok(message) => dispatch(shell, message),
                Err(e) => warn!("Ignoring instance message: {}", e),
            },
            Ok(None) => break,
            Err(e) => {
                warn!("Instance connection error: {}", e);
                break;
            }
        }
    }
}

/// Try to become the single running instance. If another instance is
/// running, `argv` is forwarded to it.
#[cfg(unix)]
pub async fn acquire(endpoint: &Endpoint, argv: &[String]) -> Result<Acquired, InstanceError> {
    use std::io::ErrorKind;
    use tokio::net::{UnixListener, UnixStream};

    let acquire_error = |e: std::io::Error| InstanceError::Acquire {
        endpoint: endpoint.describe(),
        message: e.to_string(),
    };

    let primary = |listener: UnixListener| {
        info!("Instance lock acquired at {}", endpoint.describe());
        Acquired::Primary(InstanceListener {
            listener,
            path: endpoint.path.clone(),
        })
    };

    // Binding is the lock: of two simultaneous launches only one can bind.
    match UnixListener::bind(&endpoint.path) {
        Ok(listener) => return Ok(primary(listener)),
        Err(e) if e.kind() == ErrorKind::AddrInUse => {}
        Err(e) => return Err(acquire_error(e)),
    }

    match UnixStream::connect(&endpoint.path).await {
        Ok(stream) => {
            debug!("Instance already running at {}", endpoint.describe());
            forward(stream, argv).await?;
            return Ok(Acquired::Forwarded);
        }
        Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::ConnectionRefused) => {}
        Err(e) => return Err(acquire_error(e)),
    }

    // Nobody is listening: whatever is left at the path is stale.
    match std::fs::remove_file(&endpoint.path) {
        Ok(()) => debug!("Removed stale instance socket {}", endpoint.describe()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(acquire_error(e)),
    }

    let listener = UnixListener::bind(&endpoint.path).map_err(acquire_error)?;
    Ok(primary(listener))
}

/// Try to become the single running instance. If another instance is
/// running, `argv` is forwarded to it.
#[cfg(windows)]
pub async fn acquire(endpoint: &Endpoint, argv: &[String]) -> Result<Acquired, InstanceError> {
    use tokio::net::windows::named_pipe::{ClientOptions, ServerOptions};

    match ServerOptions::new()
        .first_pipe_instance(true)
        .create(&endpoint.pipe_name)
    {
        Ok(server) => {
            info!("Instance lock acquired at {}", endpoint.describe());
            Ok(Acquired::Primary(InstanceListener {
                server,
                pipe_name: endpoint.pipe_name.clone(),
            }))
        }
        Err(_) => {
            let client = ClientOptions::new()
                .open(&endpoint.pipe_name)
                .map_err(|e| InstanceError::Acquire {
                    endpoint: endpoint.describe(),
                    message: e.to_string(),
                })?;
            debug!("Instance already running at {}", endpoint.describe());
            forward(client, argv).await?;
            Ok(Acquired::Forwarded)
        }
    }
}

/// The owned endpoint. Accepts forwarded launches until dropped.
pub struct InstanceListener {
    #[cfg(unix)]
    listener: tokio::net::UnixListener,
    #[cfg(unix)]
    path: PathBuf,
    #[cfg(windows)]
    server: tokio::net::windows::named_pipe::NamedPipeServer,
    #[cfg(windows)]
    pipe_name: String,
}

impl InstanceListener {
    #[cfg(unix)]
    pub async fn run(self, shell: Arc<Shell>) {
        loop {
            match self.listener.accept().await {
                Ok((stream, _)) => {
                    let shell = Arc::clone(&shell);
                    tokio::spawn(async move { handle_connection(stream, &shell).await });
                }
                Err(e) => {
                    warn!("Instance accept failed: {}", e);
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            }
        }
    }

    #[cfg(windows)]
    pub async fn run(mut self, shell: Arc<Shell>) {
        use tokio::net::windows::named_pipe::ServerOptions;

        loop {
            if let Err(e) = self.server.connect().await {
                warn!("Instance accept failed: {}", e);
                continue;
            }

            // Open the next pipe instance before serving this one.
            let next = match ServerOptions::new().create(&self.pipe_name) {
                Ok(server) => server,
                Err(e) => {
                    warn!("Failed to reopen instance pipe: {}", e);
                    return;
                }
            };
            let connected = std::mem::replace(&mut self.server, next);

            let shell = Arc::clone(&shell);
            tokio::spawn(async move { handle_connection(connected, &shell).await });
        }
    }
}

#[cfg(unix)]
impl Drop for InstanceListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
