//! Player resource backed by a locally spawned media player process.
//!
//! With mpv, an IPC socket is opened and polled for `paused-for-cache` so
//! buffering stalls surface as [`PlayerEvent::Waiting`].

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{PlayerError, PlayerEvent, PlayerEventHandler, PlayerFactory, PlayerResource};
use crate::config::PlayerConfig;
use crate::session::Sources;

const BUFFERING_POLL: Duration = Duration::from_millis(500);

static NEXT_SOCKET: AtomicU64 = AtomicU64::new(0);

pub struct ProcessPlayerFactory {
    command: String,
    args: Vec<String>,
}

impl ProcessPlayerFactory {
    pub fn new(config: &PlayerConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    fn is_mpv(&self) -> bool {
        self.command.contains("mpv")
    }
}

impl PlayerFactory for ProcessPlayerFactory {
    fn create(&self, sources: &Sources) -> Result<Box<dyn PlayerResource>, PlayerError> {
        let mut cmd = Command::new(&self.command);
        let mut ipc_socket = None;

        if self.is_mpv() {
            let socket_path = std::env::temp_dir().join(format!(
                "magnetplay-mpv-{}-{}.sock",
                std::process::id(),
                NEXT_SOCKET.fetch_add(1, Ordering::Relaxed)
            ));

            cmd.args([
                "--force-seekable=yes",
                "--cache=yes",
                "--demuxer-max-bytes=150M",
                "--really-quiet",
            ]);
            cmd.arg(format!("--input-ipc-server={}", socket_path.display()));
            ipc_socket = Some(socket_path);
        }

        // mpv and vlc both take --sub-file
        if let Some(subtitle) = &sources.subtitle {
            cmd.arg(format!("--sub-file={}", subtitle));
        }

        cmd.args(&self.args);
        cmd.arg(&sources.video);

        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| PlayerError::Launch(self.command.clone(), e.to_string()))?;

        info!(command = %self.command, pid = child.id(), "player process started");
        Ok(Box::new(ProcessPlayer::new(child, ipc_socket)))
    }
}

type Handlers = Arc<Mutex<Vec<PlayerEventHandler>>>;

fn emit(handlers: &Handlers, event: PlayerEvent) {
    let handlers: Vec<PlayerEventHandler> = handlers
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    for handler in handlers {
        handler(event);
    }
}

struct ProcessPlayer {
    /// Held here only when no runtime was around to supervise the process.
    child: Option<Child>,
    ipc_socket: Option<PathBuf>,
    handlers: Handlers,
    cancel: CancellationToken,
    disposed: bool,
}

impl ProcessPlayer {
    fn new(child: Child, ipc_socket: Option<PathBuf>) -> Self {
        let handlers: Handlers = Arc::new(Mutex::new(Vec::new()));
        let cancel = CancellationToken::new();

        let child = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(supervise(child, Arc::clone(&handlers), cancel.clone()));
                if let Some(socket) = ipc_socket.clone() {
                    runtime.spawn(watch_buffering(
                        socket,
                        Arc::clone(&handlers),
                        cancel.clone(),
                    ));
                }
                None
            }
            Err(_) => Some(child),
        };

        Self {
            child,
            ipc_socket,
            handlers,
            cancel,
            disposed: false,
        }
    }
}

impl PlayerResource for ProcessPlayer {
    fn on_event(&mut self, handler: PlayerEventHandler) {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    fn dispose(&mut self) -> Result<(), PlayerError> {
        if self.disposed {
            return Ok(());
        }
        self.disposed = true;
        self.cancel.cancel();

        let killed = match &mut self.child {
            Some(child) => child.start_kill(),
            None => Ok(()),
        };

        if let Some(socket) = &self.ipc_socket {
            let _ = std::fs::remove_file(socket);
        }

        emit(&self.handlers, PlayerEvent::Disposed);

        killed.map_err(|e| PlayerError::Dispose(e.to_string()))
    }
}

impl Drop for ProcessPlayer {
    fn drop(&mut self) {
        let _ = self.dispose();
    }
}

/// Own the process until it exits or the player is disposed. An exit the
/// user caused is reported as [`PlayerEvent::Exited`] and stops the
/// buffering watcher.
async fn supervise(mut child: Child, handlers: Handlers, cancel: CancellationToken) {
    let exited = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        status = child.wait() => Some(status),
    };

    match exited {
        Some(status) => {
            info!(?status, "player process exited");
            cancel.cancel();
            emit(&handlers, PlayerEvent::Exited);
        }
        None => {
            if let Err(e) = child.start_kill() {
                debug!(error = %e, "player process already gone");
            }
            let _ = child.wait().await;
            debug!("player process stopped");
        }
    }
}

/// Report every transition into a buffering stall until cancelled.
async fn watch_buffering(socket: PathBuf, handlers: Handlers, cancel: CancellationToken) {
    let mut waiting = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(BUFFERING_POLL) => {}
        }

        let Some(stalled) = query_bool_property(&socket, "paused-for-cache").await else {
            continue;
        };

        if stalled && !waiting {
            emit(&handlers, PlayerEvent::Waiting);
        }
        waiting = stalled;
    }

    debug!("buffering watcher stopped");
}

#[cfg(unix)]
async fn query_bool_property(socket_path: &Path, property: &str) -> Option<bool> {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::UnixStream;

    let stream = UnixStream::connect(socket_path).await.ok()?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let request = serde_json::json!({ "command": ["get_property", property] });
    writer
        .write_all(format!("{}\n", request).as_bytes())
        .await
        .ok()?;

    let mut response = String::new();
    reader.read_line(&mut response).await.ok()?;

    serde_json::from_str::<serde_json::Value>(&response)
        .ok()?
        .get("data")?
        .as_bool()
}

#[cfg(not(unix))]
async fn query_bool_property(_socket_path: &Path, _property: &str) -> Option<bool> {
    None
}
