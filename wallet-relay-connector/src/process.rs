//! # Daemon process
//!
//! Everything that touches the child process directly: validating the launch
//! configuration, building its argument list, spawning it, forwarding its
//! console output line by line, and recognizing the console markers the
//! supervisor reacts to.

use crate::config::DaemonConfig;
use crate::error::{ConfigError, ServiceError};
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::Path;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

/// How long to wait for the output readers to drain once the child has exited.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Wide enough that the daemon never wraps a log line.
const TERMINAL_COLUMNS: u16 = 512;

/// Messages a running daemon sends back to the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Line(String),
    Exited(Option<i32>),
}

/// Console lines the supervisor reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    ContainerLoading,
    ContainerLoaded,
    WalletLoaded,
    WrongPassword,
}

/// Severity tags found in daemon log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Warning,
    Error,
}

/// Checks the launch configuration and returns the container path.
pub fn validate(config: &DaemonConfig) -> Result<&Path, ConfigError> {
    match (&config.rpc_password, config.rpc_legacy_security) {
        (None, false) => return Err(ConfigError::MissingRpcCredential),
        (Some(_), true) => return Err(ConfigError::ConflictingRpcCredential),
        _ => {}
    }

    let container = config
        .container_file
        .as_deref()
        .ok_or(ConfigError::MissingContainerFile)?;
    if !container.exists() {
        return Err(ConfigError::ContainerFileNotFound(container.to_path_buf()));
    }
    Ok(container)
}

/// Builds the daemon's argument list in its documented order.
pub fn build_args(config: &DaemonConfig) -> Vec<String> {
    let mut args = vec![
        "--bind-address".to_string(),
        config.bind_address.clone(),
        "--bind-port".to_string(),
        config.bind_port.to_string(),
    ];

    match &config.rpc_password {
        Some(password) => args.extend(["--rpc-password".to_string(), password.clone()]),
        None => args.push("--rpc-legacy-security".to_string()),
    }

    if let Some(container) = &config.container_file {
        args.extend([
            "--container-file".to_string(),
            container.display().to_string(),
        ]);
    }
    if let Some(password) = &config.container_password {
        args.extend(["--container-password".to_string(), password.clone()]);
    }
    if let Some(log_file) = &config.log_file {
        args.extend(["--log-file".to_string(), log_file.display().to_string()]);
    }
    args.extend(["--log-level".to_string(), config.log_level.to_string()]);
    if config.sync_from_zero {
        args.push("--sync-from-zero".to_string());
    }
    args.extend([
        "--daemon-address".to_string(),
        config.daemon_address.clone(),
        "--daemon-port".to_string(),
        config.daemon_port.to_string(),
    ]);
    args
}

/// The full command line, as reported by the `start` event.
pub fn command_line(config: &DaemonConfig) -> String {
    std::iter::once(config.binary.display().to_string())
        .chain(build_args(config))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn detect_marker(line: &str) -> Option<Marker> {
    let line = line.to_ascii_lowercase();
    if line.contains("the password is wrong") {
        Some(Marker::WrongPassword)
    } else if line.contains("wallet loading is finished") {
        Some(Marker::WalletLoaded)
    } else if line.contains("container loaded") {
        Some(Marker::ContainerLoaded)
    } else if line.contains("loading container") {
        Some(Marker::ContainerLoading)
    } else {
        None
    }
}

/// Finds a whole-word `ERROR` or `WARNING` tag in a log line.
pub fn detect_level(line: &str) -> Option<LogLevel> {
    line.split(|c: char| !c.is_ascii_alphabetic())
        .find_map(|word| match word {
            "ERROR" => Some(LogLevel::Error),
            "WARNING" => Some(LogLevel::Warning),
            _ => None,
        })
}

/// Removes terminal escape sequences (colors, cursor movement) from a line.
pub fn strip_ansi(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\u{1b}' {
            out.push(c);
            continue;
        }
        if chars.next_if_eq(&'[').is_some() {
            // CSI: parameters and intermediates up to a final byte in '@'..='~'
            for c in chars.by_ref() {
                if ('@'..='~').contains(&c) {
                    break;
                }
            }
        } else {
            chars.next();
        }
    }
    out
}

/// A handle to a running daemon. Output and exit are reported through the
/// channel passed to [`DaemonProcess::spawn`].
///
/// The daemon runs on a pseudo-terminal so its console output is line
/// buffered and arrives as it is printed. Dropping the handle without
/// [`shutdown`](DaemonProcess::shutdown) kills the child.
#[derive(Debug)]
pub struct DaemonProcess {
    pid: Option<u32>,
    stdin_tx: mpsc::UnboundedSender<String>,
    kill_tx: Option<oneshot::Sender<()>>,
}

impl DaemonProcess {
    pub fn spawn(
        config: &DaemonConfig,
        events: mpsc::UnboundedSender<ProcessEvent>,
    ) -> Result<Self, ServiceError> {
        let pair = native_pty_system()
            .openpty(PtySize {
                rows: 24,
                cols: TERMINAL_COLUMNS,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(ServiceError::Terminal)?;

        let mut command = CommandBuilder::new(&config.binary);
        command.args(build_args(config));
        command.cwd(std::env::current_dir()?);

        let child = pair
            .slave
            .spawn_command(command)
            .map_err(ServiceError::Terminal)?;
        // the child holds its own copy; ours would keep the master from seeing EOF
        drop(pair.slave);

        let pid = child.process_id();
        tracing::info!(pid = ?pid, binary = %config.binary.display(), "Spawned wallet daemon");

        let output = pair.master.try_clone_reader().map_err(ServiceError::Terminal)?;
        let console = pair.master.take_writer().map_err(ServiceError::Terminal)?;
        let reader = spawn_line_reader(output, events.clone());

        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();
        tokio::task::spawn_blocking(move || write_console(console, stdin_rx));

        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(wait_for_exit(child, pair.master, kill_rx, reader, events));

        Ok(Self {
            pid,
            stdin_tx,
            kill_tx: Some(kill_tx),
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Sends one newline-terminated line to the daemon's console.
    pub fn write(&self, text: &str) {
        if self.stdin_tx.send(text.to_string()).is_err() {
            tracing::warn!(pid = ?self.pid, "Daemon console is closed; dropping input");
        }
    }

    /// Asks the daemon to exit, then kills it once `grace` has elapsed.
    pub fn shutdown(mut self, grace: Duration) {
        self.write("exit");
        if let Some(kill_tx) = self.kill_tx.take() {
            let pid = self.pid;
            tokio::spawn(async move {
                sleep(grace).await;
                if kill_tx.send(()).is_ok() {
                    tracing::debug!(pid = ?pid, "Grace period elapsed, killing daemon");
                }
            });
        }
    }
}

/// Reads the terminal on a blocking thread. Reading the master side fails
/// with EIO once the child has closed the terminal, which ends the reader.
fn spawn_line_reader(
    stream: Box<dyn Read + Send>,
    events: mpsc::UnboundedSender<ProcessEvent>,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let raw = String::from_utf8_lossy(&buf);
                    let line = strip_ansi(raw.trim_end_matches(['\r', '\n']));
                    if events.send(ProcessEvent::Line(line)).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::debug!("Daemon terminal closed: {}", e);
                    break;
                }
            }
        }
    })
}

fn write_console(mut console: Box<dyn Write + Send>, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(text) = rx.blocking_recv() {
        let mut line = text.into_bytes();
        line.push(b'\n');
        if let Err(e) = console.write_all(&line).and_then(|()| console.flush()) {
            tracing::warn!("Failed to write to daemon console: {}", e);
            break;
        }
    }
}

async fn wait_for_exit(
    mut child: Box<dyn Child + Send + Sync>,
    master: Box<dyn MasterPty + Send>,
    mut kill_rx: oneshot::Receiver<()>,
    reader: JoinHandle<()>,
    events: mpsc::UnboundedSender<ProcessEvent>,
) {
    let mut killer = child.clone_killer();
    let mut waiting = tokio::task::spawn_blocking(move || child.wait());

    let status = tokio::select! {
        status = &mut waiting => status,
        _ = &mut kill_rx => {
            // a dropped handle kills the child as well
            if let Err(e) = killer.kill() {
                tracing::warn!("Failed to kill wallet daemon: {}", e);
            }
            waiting.await
        }
    };

    if timeout(OUTPUT_DRAIN_TIMEOUT, reader).await.is_err() {
        tracing::warn!("Daemon output did not drain after exit");
    }
    drop(master);

    let code = match status {
        Ok(Ok(status)) if status.signal().is_some() => None,
        Ok(Ok(status)) => i32::try_from(status.exit_code()).ok(),
        Ok(Err(e)) => {
            tracing::error!("Failed to wait for wallet daemon: {}", e);
            None
        }
        Err(e) => {
            tracing::error!("Wallet daemon wait task failed: {}", e);
            None
        }
    };
    tracing::info!(exit_code = ?code, "Wallet daemon exited");
    let _ = events.send(ProcessEvent::Exited(code));
}
