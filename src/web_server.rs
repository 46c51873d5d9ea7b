//! Lifecycle of the long-running bundle web server subprocess.
//!
//! Startup never relies on a fixed delay alone. Three observers race against
//! the freshly spawned process:
//!
//! 1. a stdout watcher that reports the readiness marker as soon as it shows
//!    up in the output, with or without a trailing newline,
//! 2. the process exit, which means startup failed,
//! 3. a timeout, after which the server is assumed to be up.
//!
//! The first observer to fire decides the outcome. The losing futures are
//! dropped with the `select!`, so the timer can never fire after a decision,
//! and the stdout watcher keeps draining output without being able to change
//! the result.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::{HarnessError, Result};

const PORT_FLAG: &str = "--port";
const AUTH_CONFIG_FLAG: &str = "--auth-config";
const STDOUT_CHUNK_SIZE: usize = 4096;

/// How a successful start was confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The readiness marker was observed on stdout.
    Confirmed,
    /// Neither the marker nor an exit arrived before the timeout.
    Assumed,
}

#[derive(Debug)]
enum Decision {
    Ready,
    Exited(String),
    TimedOut,
}

#[derive(Debug)]
pub struct WebServer {
    command: PathBuf,
    marker: String,
    timeout: Duration,
    process: Option<Child>,
    base_uri: Option<String>,
}

impl WebServer {
    #[must_use]
    pub fn new(command: impl Into<PathBuf>, marker: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            marker: marker.into(),
            timeout,
            process: None,
            base_uri: None,
        }
    }

    /// Starts the server on `port` and waits until it is confirmed ready.
    ///
    /// # Errors
    /// Returns a state error on double start, a spawn error, or
    /// [`HarnessError::Readiness`] if the process exits first.
    pub async fn start(&mut self, port: u16) -> Result<Readiness> {
        self.spawn_and_confirm(port, None).await
    }

    /// Starts the server with `--auth-config <path>`.
    ///
    /// # Errors
    /// Same as [`WebServer::start`].
    pub async fn start_with_auth(&mut self, port: u16, auth_config: &Path) -> Result<Readiness> {
        self.spawn_and_confirm(port, Some(auth_config)).await
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.process.is_some()
    }

    /// `http://localhost:<port>` once the server has started.
    #[must_use]
    pub fn base_uri(&self) -> Option<&str> {
        self.base_uri.as_deref()
    }

    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(Child::id)
    }

    /// Requests graceful shutdown with SIGINT and releases the process handle.
    ///
    /// Calling this without a running server is a no-op.
    ///
    /// # Errors
    /// Returns the signal delivery failure; the handle is released regardless.
    pub fn stop(&mut self) -> Result<()> {
        self.base_uri = None;
        let Some(child) = self.process.take() else {
            return Ok(());
        };
        let Some(pid) = child.id() else {
            debug!("Web server already exited before stop");
            return Ok(());
        };
        let pid = i32::try_from(pid)
            .map_err(|_| HarnessError::state(format!("Web server pid {pid} is out of range")))?;
        signal::kill(Pid::from_raw(pid), Signal::SIGINT)?;
        info!("Sent SIGINT to web server (pid={pid})");
        Ok(())
    }

    async fn spawn_and_confirm(
        &mut self,
        port: u16,
        auth_config: Option<&Path>,
    ) -> Result<Readiness> {
        if self.process.is_some() {
            return Err(HarnessError::state(
                "Tried to start web server, but web server is already running",
            ));
        }

        let mut command = Command::new(&self.command);
        command
            .arg(PORT_FLAG)
            .arg(port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(path) = auth_config {
            command.arg(AUTH_CONFIG_FLAG).arg(path);
        }

        let mut child = command.spawn().map_err(|source| HarnessError::Spawn {
            program: self.command.display().to_string(),
            source,
        })?;
        info!(
            "Spawned web server {} on port {port} (pid={:?})",
            self.command.display(),
            child.id()
        );

        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(watch_stdout(child.stdout.take(), self.marker.clone(), ready_tx));
        tokio::spawn(drain_stderr(child.stderr.take()));

        match race_readiness(&mut child, ready_rx, self.timeout).await {
            Decision::Ready => {
                info!("Web server reported readiness on port {port}");
                self.adopt(child, port);
                Ok(Readiness::Confirmed)
            }
            Decision::TimedOut => {
                warn!(
                    "Web server printed no readiness marker within {:?}; assuming it is up",
                    self.timeout
                );
                self.adopt(child, port);
                Ok(Readiness::Assumed)
            }
            Decision::Exited(status) => Err(HarnessError::Readiness(status)),
        }
    }

    fn adopt(&mut self, child: Child, port: u16) {
        self.process = Some(child);
        self.base_uri = Some(format!("http://localhost:{port}"));
    }
}

impl Drop for WebServer {
    fn drop(&mut self) {
        if self.process.is_some()
            && let Err(err) = self.stop()
        {
            warn!("Web server process was not successfully stopped: {err}");
        }
    }
}

async fn race_readiness(
    child: &mut Child,
    ready_rx: oneshot::Receiver<()>,
    timeout: Duration,
) -> Decision {
    // A closed channel (stdout hit EOF without the marker) disables the first
    // branch; exit or timeout still decide.
    tokio::select! {
        biased;
        Ok(()) = ready_rx => Decision::Ready,
        status = child.wait() => Decision::Exited(match status {
            Ok(status) => status.to_string(),
            Err(err) => format!("wait failed: {err}"),
        }),
        () = tokio::time::sleep(timeout) => Decision::TimedOut,
    }
}

// Scans raw chunks so a marker without a trailing newline still counts.
async fn watch_stdout<R>(stdout: Option<R>, marker: String, ready_tx: oneshot::Sender<()>)
where
    R: AsyncRead + Unpin,
{
    let Some(mut stdout) = stdout else {
        return;
    };
    let mut ready_tx = Some(ready_tx);
    let mut pending = String::new();
    let mut chunk = [0u8; STDOUT_CHUNK_SIZE];
    loop {
        match stdout.read(&mut chunk).await {
            Ok(0) => break,
            Ok(read) => {
                pending.push_str(&String::from_utf8_lossy(&chunk[..read]));
                if pending.contains(&marker)
                    && let Some(tx) = ready_tx.take()
                {
                    // The receiver is gone once a decision was made.
                    let _ = tx.send(());
                }
                // Only the unfinished last line is carried over.
                if let Some(end) = pending.rfind('\n') {
                    for line in pending[..end].lines() {
                        debug!("web server stdout: {line}");
                    }
                    pending.drain(..=end);
                }
            }
            Err(err) => {
                debug!("Stopped reading web server stdout: {err}");
                break;
            }
        }
    }
}

async fn drain_stderr<R>(stderr: Option<R>)
where
    R: AsyncRead + Unpin,
{
    let Some(stderr) = stderr else {
        return;
    };
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!("web server stderr: {line}");
    }
}
