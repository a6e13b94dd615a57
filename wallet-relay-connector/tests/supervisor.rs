//! Drives `WalletService` against small shell scripts standing in for the
//! wallet daemon, so process spawning, console input and shutdown run for real.

use async_trait::async_trait;
use serde_json::Value;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::time::{timeout, Instant};
use wallet_relay_connector::{
    ConnectorConfig, CursorStore, RpcError, ServiceEvent, WalletRpc, WalletService,
    WalletServiceHandle,
};

/// The daemon's RPC endpoint is never reachable in these tests.
struct Unreachable;

#[async_trait]
impl WalletRpc for Unreachable {
    async fn call(&self, _method: &str, _params: Value) -> Result<Value, RpcError> {
        Err(RpcError::Transport("connection refused".into()))
    }
}

struct NoCursor;

#[async_trait]
impl CursorStore for NoCursor {
    async fn get_cursor(&self, _app: &str) -> anyhow::Result<u64> {
        Ok(1)
    }

    async fn set_cursor(&self, _app: &str, _height: u64) -> anyhow::Result<()> {
        Ok(())
    }
}

struct Daemon {
    dir: TempDir,
    handle: WalletServiceHandle,
    events: broadcast::Receiver<ServiceEvent>,
}

impl Daemon {
    /// Installs `body` as the daemon binary and starts the service around it.
    /// The RPC timeout is one second, so the shutdown grace period is two.
    async fn start(body: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("wallet-service");
        std::fs::write(&binary, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();
        let container = dir.path().join("main.wallet");
        std::fs::write(&container, b"").unwrap();

        let mut config = ConnectorConfig::default();
        config.daemon.binary = binary;
        config.daemon.container_file = Some(container);
        config.daemon.rpc_password = Some("pw".into());
        config.rpc.timeout_ms = 1_000;

        let (service, handle) =
            WalletService::new(Arc::new(config), Arc::new(Unreachable), Arc::new(NoCursor));
        let events = handle.subscribe();
        tokio::spawn(service.run());
        handle.start().await;

        Self { dir, handle, events }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Receives events until `matches` accepts one.
    async fn next(&mut self, matches: impl Fn(&ServiceEvent) -> bool) -> ServiceEvent {
        loop {
            match self.events.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    }

    async fn wait_for(
        &mut self,
        within: Duration,
        matches: impl Fn(&ServiceEvent) -> bool,
    ) -> ServiceEvent {
        timeout(within, self.next(matches))
            .await
            .expect("expected event was not emitted in time")
    }
}

fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_twice_sends_exit_then_kills_after_grace() {
    // ignores `exit`, so only the kill ends it
    let mut daemon = Daemon::start(
        r#"echo "Loading container..."
while read line; do echo "$line" >> "$(dirname "$0")/console.log"; done"#,
    )
    .await;

    let start = daemon
        .wait_for(Duration::from_secs(5), |e| matches!(e, ServiceEvent::Start { .. }))
        .await;
    let ServiceEvent::Start { command_line } = start else {
        unreachable!()
    };
    assert!(command_line.contains("--rpc-password pw"));

    daemon
        .wait_for(Duration::from_secs(5), |e| {
            *e == ServiceEvent::Data("Loading container...".into())
        })
        .await;
    daemon
        .wait_for(Duration::from_secs(1), |e| {
            *e == ServiceEvent::Info("Loading wallet container...".into())
        })
        .await;

    let stopped_at = Instant::now();
    daemon.handle.stop().await;
    daemon.handle.stop().await;

    let close = daemon
        .wait_for(Duration::from_secs(15), |e| matches!(e, ServiceEvent::Close { .. }))
        .await;
    assert_eq!(
        close,
        ServiceEvent::Close {
            exit_code: None,
            expected: true
        }
    );
    assert!(
        stopped_at.elapsed() >= Duration::from_secs(2),
        "daemon was killed before the grace period elapsed"
    );
    assert_eq!(read_lines(&daemon.path("console.log")), vec!["exit"]);

    // the second stop must not produce another exit
    let again = timeout(
        Duration::from_secs(3),
        daemon.next(|e| matches!(e, ServiceEvent::Close { .. })),
    )
    .await;
    assert!(again.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn daemon_that_exits_on_request_closes_without_kill() {
    let mut daemon = Daemon::start(
        r#"echo "Container loaded"
read line
echo "$line" > "$(dirname "$0")/console.log"
exit 3"#,
    )
    .await;

    daemon
        .wait_for(Duration::from_secs(5), |e| {
            *e == ServiceEvent::Info("Wallet container loaded".into())
        })
        .await;
    daemon.handle.stop().await;

    let close = daemon
        .wait_for(Duration::from_secs(10), |e| matches!(e, ServiceEvent::Close { .. }))
        .await;
    assert_eq!(
        close,
        ServiceEvent::Close {
            exit_code: Some(3),
            expected: true
        }
    );
    assert_eq!(read_lines(&daemon.path("console.log")), vec!["exit"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn buffered_console_output_arrives_line_by_line() {
    // grep only flushes per line when its stdout is a terminal
    let mut daemon = Daemon::start(
        r#"(echo "Wallet loading is finished."; sleep 5) | grep ."#,
    )
    .await;

    daemon
        .wait_for(Duration::from_secs(3), |e| {
            *e == ServiceEvent::Data("Wallet loading is finished.".into())
        })
        .await;
    daemon
        .wait_for(Duration::from_secs(1), |e| {
            *e == ServiceEvent::Info("Wallet loading is finished".into())
        })
        .await;

    daemon.handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn console_writes_reach_the_daemon() {
    let mut daemon = Daemon::start(
        r#"read line
echo "WARNING got $line""#,
    )
    .await;

    daemon
        .wait_for(Duration::from_secs(5), |e| matches!(e, ServiceEvent::Start { .. }))
        .await;
    daemon.handle.write("balance").await;

    daemon
        .wait_for(Duration::from_secs(5), |e| {
            *e == ServiceEvent::Warning("WARNING got balance".into())
        })
        .await;
    let close = daemon
        .wait_for(Duration::from_secs(10), |e| matches!(e, ServiceEvent::Close { .. }))
        .await;
    assert_eq!(
        close,
        ServiceEvent::Close {
            exit_code: Some(0),
            expected: false
        }
    );
}
