//! # Wallet Service
//!
//! [`WalletService`] is the single owner of the daemon's process state. It runs
//! as one actor task: commands from [`WalletServiceHandle`], daemon output,
//! timer ticks and RPC replies all arrive as messages and are handled one at a
//! time, so the process state and the scan cursor are never mutated from two
//! places at once.
//!
//! ## Lifecycle
//!
//! - `start` validates the configuration, spawns the daemon and emits `start`.
//! - When the daemon prints "Wallet loading is finished", status polling and
//!   periodic saving begin.
//! - The first `synced` transition arms the scan timer.
//! - `stop` cancels every timer, asks the daemon to exit and kills it after a
//!   grace period. The service never restarts the daemon on its own.

use crate::config::ConnectorConfig;
use crate::error::ServiceError;
use crate::events::{EventBus, ServiceEvent, StatusSnapshot};
use crate::monitor::{HealthMonitor, ProcessState, Transition};
use crate::process::{self, DaemonProcess, LogLevel, Marker, ProcessEvent};
use crate::rpc::{RpcError, WalletRpc};
use crate::scanner::ScanWorker;
use crate::scheduler::{RepeatingTask, Timer};
use crate::storage::CursorStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};

/// Delay between the daemon exiting and `close` being emitted.
const CLOSE_DELAY: Duration = Duration::from_secs(2);

/// Commands accepted by the service actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCommand {
    Start,
    Stop,
    Restart,
    Write(String),
    Shutdown,
}

/// Messages the actor sends to itself from timers and spawned RPC calls.
#[derive(Debug)]
enum Internal {
    PollTick,
    SaveTick,
    ScanTick,
    Status {
        generation: u64,
        result: Result<StatusSnapshot, RpcError>,
    },
    DownExpired {
        seq: u64,
    },
    ScanDone,
    EmitClose {
        exit_code: Option<i32>,
        expected: bool,
    },
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

#[derive(Default)]
struct Timers {
    poll: Option<RepeatingTask>,
    save: Option<RepeatingTask>,
    scan: Option<RepeatingTask>,
    down: Option<Timer>,
}

impl Timers {
    fn cancel_all(&mut self) {
        for task in [&mut self.poll, &mut self.save, &mut self.scan] {
            if let Some(mut task) = task.take() {
                task.cancel();
            }
        }
        if let Some(mut timer) = self.down.take() {
            timer.cancel();
        }
    }
}

/// A clonable, thread-safe handle for interacting with a running [`WalletService`].
#[derive(Clone)]
pub struct WalletServiceHandle {
    command_tx: mpsc::Sender<ServiceCommand>,
    bus: EventBus,
    state_rx: watch::Receiver<ProcessState>,
    rpc: Arc<dyn WalletRpc>,
}

impl WalletServiceHandle {
    async fn send(&self, command: ServiceCommand) {
        if self.command_tx.send(command).await.is_err() {
            tracing::warn!("Failed to send command: wallet service may be down");
        }
    }

    /// Validates the configuration and spawns the daemon.
    pub async fn start(&self) {
        self.send(ServiceCommand::Start).await;
    }

    /// Cancels all timers and shuts the daemon down. Safe to call repeatedly.
    pub async fn stop(&self) {
        self.send(ServiceCommand::Stop).await;
    }

    /// Stops the daemon and starts it again once it has exited.
    pub async fn restart(&self) {
        self.send(ServiceCommand::Restart).await;
    }

    /// Writes one line to the daemon's console. No reply is awaited.
    pub async fn write(&self, text: impl Into<String>) {
        self.send(ServiceCommand::Write(text.into())).await;
    }

    /// Stops the daemon and ends the service run-loop once it has exited.
    pub async fn shutdown(&self) {
        self.send(ServiceCommand::Shutdown).await;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.bus.subscribe()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn state(&self) -> ProcessState {
        *self.state_rx.borrow()
    }

    pub fn rpc(&self) -> Arc<dyn WalletRpc> {
        self.rpc.clone()
    }
}

/// The supervisor actor. Created once, then consumed by [`WalletService::run`].
pub struct WalletService {
    config: Arc<ConnectorConfig>,
    rpc: Arc<dyn WalletRpc>,
    bus: EventBus,
    scanner: Arc<ScanWorker>,
    command_rx: mpsc::Receiver<ServiceCommand>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    process_tx: mpsc::UnboundedSender<ProcessEvent>,
    process_rx: mpsc::UnboundedReceiver<ProcessEvent>,
    state_tx: watch::Sender<ProcessState>,
    monitor: HealthMonitor,
    timers: Timers,
    daemon: Option<DaemonProcess>,
    /// A spawned child whose exit has not been observed yet.
    child_running: bool,
    stop_requested: bool,
    start_pending: bool,
    shutting_down: bool,
    scan_in_flight: bool,
    /// Bumped whenever polling is torn down; replies from older polls are dropped.
    generation: u64,
    down_seq: u64,
}

impl WalletService {
    /// Creates a new `WalletService` and its associated [`WalletServiceHandle`].
    ///
    /// Nothing runs until [`run()`](WalletService::run) is spawned, and the daemon
    /// is not spawned until [`WalletServiceHandle::start`] is called.
    pub fn new(
        config: Arc<ConnectorConfig>,
        rpc: Arc<dyn WalletRpc>,
        store: Arc<dyn CursorStore>,
    ) -> (Self, WalletServiceHandle) {
        let bus = EventBus::new(config.channels.event_bus_capacity);
        let (command_tx, command_rx) = mpsc::channel(config.channels.command_buffer.max(1));
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (process_tx, process_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ProcessState::default());

        let scanner = Arc::new(ScanWorker::new(
            rpc.clone(),
            store,
            bus.clone(),
            config.scanner.app_name.clone(),
        ));

        let handle = WalletServiceHandle {
            command_tx,
            bus: bus.clone(),
            state_rx,
            rpc: rpc.clone(),
        };

        let service = Self {
            config,
            rpc,
            bus,
            scanner,
            command_rx,
            internal_tx,
            internal_rx,
            process_tx,
            process_rx,
            state_tx,
            monitor: HealthMonitor::new(),
            timers: Timers::default(),
            daemon: None,
            child_running: false,
            stop_requested: false,
            start_pending: false,
            shutting_down: false,
            scan_in_flight: false,
            generation: 0,
            down_seq: 0,
        };

        (service, handle)
    }

    /// Runs the actor until shutdown, or until an unrecoverable daemon error.
    pub async fn run(mut self) -> Result<(), ServiceError> {
        tracing::info!("Wallet service is running.");
        loop {
            let flow = tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        tracing::info!("All service handles dropped. Shutting down.");
                        self.stop();
                        Flow::Exit
                    }
                },
                Some(event) = self.process_rx.recv() => self.handle_process_event(event)?,
                Some(message) = self.internal_rx.recv() => self.handle_internal(message),
            };
            if flow == Flow::Exit {
                break;
            }
        }
        tracing::info!("Wallet service has shut down.");
        Ok(())
    }

    fn handle_command(&mut self, command: ServiceCommand) -> Flow {
        if self.shutting_down {
            tracing::debug!(?command, "Ignoring command during shutdown");
            return Flow::Continue;
        }
        match command {
            ServiceCommand::Start => self.start(),
            ServiceCommand::Stop => self.stop(),
            ServiceCommand::Restart => {
                if self.child_running {
                    self.stop();
                    self.start_pending = true;
                } else {
                    self.start();
                }
            }
            ServiceCommand::Write(text) => match &self.daemon {
                Some(daemon) => daemon.write(&text),
                None => self
                    .bus
                    .emit(ServiceEvent::Warning("Wallet daemon is not running".into())),
            },
            ServiceCommand::Shutdown => {
                self.shutting_down = true;
                self.start_pending = false;
                self.stop();
                if !self.child_running {
                    return Flow::Exit;
                }
            }
        }
        Flow::Continue
    }

    fn start(&mut self) {
        if self.daemon.is_some() {
            self.bus
                .emit(ServiceEvent::Warning("Wallet daemon is already running".into()));
            return;
        }
        if self.child_running {
            tracing::info!("Previous daemon is still exiting; start deferred until it has closed");
            self.start_pending = true;
            return;
        }

        let daemon_config = &self.config.daemon;
        if let Err(e) = process::validate(daemon_config) {
            self.bus.emit(ServiceEvent::Error(e.to_string()));
            return;
        }

        match DaemonProcess::spawn(daemon_config, self.process_tx.clone()) {
            Ok(daemon) => {
                self.daemon = Some(daemon);
                self.child_running = true;
                self.stop_requested = false;
                self.monitor.reset();
                self.publish_state();
                self.bus.emit(ServiceEvent::Start {
                    command_line: process::command_line(daemon_config),
                });
            }
            Err(e) => self.bus.emit(ServiceEvent::Error(e.to_string())),
        }
    }

    fn stop(&mut self) {
        self.timers.cancel_all();
        self.generation += 1;
        self.monitor.mark_unsynced();
        self.publish_state();

        if let Some(daemon) = self.daemon.take() {
            tracing::info!(pid = ?daemon.pid(), "Stopping wallet daemon");
            self.stop_requested = true;
            daemon.shutdown(self.config.rpc.timeout() * 2);
        }
    }

    fn handle_process_event(&mut self, event: ProcessEvent) -> Result<Flow, ServiceError> {
        match event {
            ProcessEvent::Line(line) => self.handle_line(line)?,
            ProcessEvent::Exited(exit_code) => self.handle_exit(exit_code),
        }
        Ok(Flow::Continue)
    }

    fn handle_line(&mut self, line: String) -> Result<(), ServiceError> {
        self.bus.emit(ServiceEvent::Data(line.clone()));

        match process::detect_marker(&line) {
            Some(Marker::ContainerLoading) => {
                self.bus.emit(ServiceEvent::Info("Loading wallet container...".into()))
            }
            Some(Marker::ContainerLoaded) => {
                self.bus.emit(ServiceEvent::Info("Wallet container loaded".into()))
            }
            Some(Marker::WalletLoaded) => {
                self.bus.emit(ServiceEvent::Info("Wallet loading is finished".into()));
                self.on_wallet_loaded();
            }
            Some(Marker::WrongPassword) => {
                for message in [
                    "The wallet container password is wrong",
                    "Check the container password in the configuration",
                    "Shutting down: this error cannot be recovered automatically",
                ] {
                    self.bus.emit(ServiceEvent::Error(message.into()));
                }
                self.timers.cancel_all();
                if let Some(daemon) = self.daemon.take() {
                    daemon.shutdown(Duration::ZERO);
                }
                return Err(ServiceError::WrongPassword);
            }
            None => match process::detect_level(&line) {
                Some(LogLevel::Error) => self.bus.emit(ServiceEvent::Error(line)),
                Some(LogLevel::Warning) => self.bus.emit(ServiceEvent::Warning(line)),
                None => {}
            },
        }
        Ok(())
    }

    fn on_wallet_loaded(&mut self) {
        self.monitor.starting();
        self.publish_state();

        let rpc = self.rpc.clone();
        let bus = self.bus.clone();
        tokio::spawn(async move {
            match rpc.get_addresses().await {
                Ok(addresses) => match addresses.first() {
                    Some(address) => {
                        tracing::info!(%address, "Wallet opened");
                        bus.emit(ServiceEvent::Info(format!("Using wallet address {}", address)));
                    }
                    None => bus.emit(ServiceEvent::Warning("Wallet has no addresses".into())),
                },
                Err(e) => bus.emit(ServiceEvent::Error(format!(
                    "Failed to look up wallet address: {}",
                    e
                ))),
            }
        });

        let monitor_config = &self.config.monitor;
        if self.timers.poll.is_none() {
            let tx = self.internal_tx.clone();
            self.timers.poll = Some(RepeatingTask::spawn(
                monitor_config.polling_interval(),
                move || {
                    let _ = tx.send(Internal::PollTick);
                },
            ));
        }
        if self.timers.save.is_none() {
            let tx = self.internal_tx.clone();
            self.timers.save = Some(RepeatingTask::spawn(
                monitor_config.save_interval(),
                move || {
                    let _ = tx.send(Internal::SaveTick);
                },
            ));
        }
    }

    fn handle_exit(&mut self, exit_code: Option<i32>) {
        self.child_running = false;
        self.daemon = None;
        self.timers.cancel_all();
        self.generation += 1;
        self.monitor.reset();
        self.publish_state();

        let expected = std::mem::take(&mut self.stop_requested) || self.shutting_down;
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(CLOSE_DELAY).await;
            let _ = tx.send(Internal::EmitClose {
                exit_code,
                expected,
            });
        });
    }

    fn handle_internal(&mut self, message: Internal) -> Flow {
        match message {
            Internal::PollTick => self.poll(),
            Internal::SaveTick => self.save(),
            Internal::ScanTick => self.scan(),
            Internal::Status { generation, result } => {
                if generation == self.generation {
                    self.on_status(result);
                }
            }
            Internal::DownExpired { seq } => self.on_down_expired(seq),
            Internal::ScanDone => self.scan_in_flight = false,
            Internal::EmitClose {
                exit_code,
                expected,
            } => {
                self.bus.emit(ServiceEvent::Close {
                    exit_code,
                    expected,
                });
                if self.shutting_down {
                    return Flow::Exit;
                }
                if std::mem::take(&mut self.start_pending) {
                    self.start();
                }
            }
        }
        Flow::Continue
    }

    fn poll(&mut self) {
        let rpc = self.rpc.clone();
        let tx = self.internal_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let result = rpc.get_status().await;
            let _ = tx.send(Internal::Status { generation, result });
        });
    }

    fn on_status(&mut self, result: Result<StatusSnapshot, RpcError>) {
        match result {
            Ok(snapshot) => {
                self.bus.emit(ServiceEvent::Status(snapshot.clone()));
                let transitions = self.monitor.on_status(&snapshot);
                if let Some(mut timer) = self.timers.down.take() {
                    timer.cancel();
                }
                self.publish_state();

                for transition in transitions {
                    match transition {
                        Transition::Alive => self.bus.emit(ServiceEvent::Alive),
                        Transition::Synced => {
                            self.bus.emit(ServiceEvent::Synced);
                            self.arm_scan_timer();
                        }
                    }
                }
            }
            Err(e) => {
                self.bus
                    .emit(ServiceEvent::Error(format!("Status poll failed: {}", e)));
                if self.monitor.on_poll_failure() {
                    self.down_seq += 1;
                    let seq = self.down_seq;
                    let tx = self.internal_tx.clone();
                    self.timers.down = Some(Timer::spawn(
                        self.config.monitor.down_debounce(),
                        async move {
                            let _ = tx.send(Internal::DownExpired { seq });
                        },
                    ));
                    self.publish_state();
                }
            }
        }
    }

    fn on_down_expired(&mut self, seq: u64) {
        if self.timers.down.is_none() || seq != self.down_seq {
            return;
        }
        self.timers.down = None;
        if self.monitor.on_debounce_expired() {
            self.bus.emit(ServiceEvent::Down);
        }
        self.publish_state();
    }

    fn save(&mut self) {
        let rpc = self.rpc.clone();
        let bus = self.bus.clone();
        tokio::spawn(async move {
            match rpc.save().await {
                Ok(()) => bus.emit(ServiceEvent::Save),
                Err(e) => bus.emit(ServiceEvent::Error(format!("Save failed: {}", e))),
            }
        });
    }

    fn arm_scan_timer(&mut self) {
        if self.timers.scan.is_some() {
            return;
        }
        let tx = self.internal_tx.clone();
        self.timers.scan = Some(RepeatingTask::spawn(
            self.config.scanner.scan_interval(),
            move || {
                let _ = tx.send(Internal::ScanTick);
            },
        ));
    }

    fn scan(&mut self) {
        let state = self.monitor.state();
        if !state.health.is_synced() || self.scan_in_flight {
            return;
        }
        self.scan_in_flight = true;

        let scanner = self.scanner.clone();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            scanner.step(state.known_block_count).await;
            let _ = tx.send(Internal::ScanDone);
        });
    }

    fn publish_state(&self) {
        self.state_tx.send_replace(self.monitor.state());
    }
}
