use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use wallet_relay_connector::config::ConnectorConfig;
use wallet_relay_connector::{RpcError, ServiceEvent, WalletRpc, WalletService, WalletServiceHandle};
use wallet_relay_gateway::gateway::protocol::{hash_secret, Frame};
use wallet_relay_gateway::gateway::{GatewayEvent, Hub, HubOptions};
use wallet_relay_gateway::storage::SledCursorStore;

const SECRET: &str = "s3cret";

/// Answers `getBalance` after the number of milliseconds given in `delay`.
struct SlowWallet;

#[async_trait]
impl WalletRpc for SlowWallet {
    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match method {
            "getBalance" => {
                let delay = params["delay"].as_u64().unwrap_or(0);
                sleep(Duration::from_millis(delay)).await;
                Ok(json!({ "availableBalance": delay, "lockedAmount": 0 }))
            }
            _ => Err(RpcError::Rpc {
                code: -32601,
                message: "Method not found".into(),
            }),
        }
    }
}

/// A hub backed by a wallet service whose daemon is never started.
struct TestHarness {
    hub: Arc<Hub>,
    service: WalletServiceHandle,
    _db: tempfile::TempDir,
}

impl TestHarness {
    fn new() -> Self {
        let db = tempfile::tempdir().unwrap();
        let store = Arc::new(SledCursorStore::new(sled::open(db.path()).unwrap()));
        let (_service, handle) =
            WalletService::new(Arc::new(ConnectorConfig::default()), Arc::new(SlowWallet), store);

        let hub = Arc::new(Hub::new(
            handle.clone(),
            hash_secret(SECRET),
            HubOptions {
                auth_timeout: Duration::from_secs(10),
                outbound_buffer: 16,
            },
        ));
        tokio::spawn(hub.clone().relay(handle.subscribe()));

        Self {
            hub,
            service: handle,
            _db: db,
        }
    }

    fn connect(&self) -> TestClient {
        self.connect_with_buffer(16)
    }

    fn connect_with_buffer(&self, buffer: usize) -> TestClient {
        let (to_hub, inbound) = mpsc::channel(16);
        let (outbound, from_hub) = mpsc::channel(buffer);
        let task = tokio::spawn(self.hub.clone().serve_connection(inbound, outbound));
        TestClient {
            to_hub,
            from_hub,
            task,
        }
    }
}

struct TestClient {
    to_hub: mpsc::Sender<Frame>,
    from_hub: mpsc::Receiver<Frame>,
    task: JoinHandle<()>,
}

impl TestClient {
    async fn send(&self, event: &str, data: Value) {
        self.to_hub.send(Frame::new(event, data)).await.unwrap();
    }

    /// The next frame, or `None` once the server has closed the connection.
    async fn next(&mut self) -> Option<Frame> {
        timeout(Duration::from_secs(60), self.from_hub.recv())
            .await
            .ok()
            .flatten()
    }

    async fn login(&mut self, secret: &str) -> Option<Frame> {
        assert_eq!(self.next().await, Some(Frame::signal("challenge")));
        self.send("challenge", json!(hash_secret(secret))).await;
        self.next().await
    }
}

fn next_gateway_event(events: &mut broadcast::Receiver<GatewayEvent>) -> Option<GatewayEvent> {
    events.try_recv().ok()
}

#[tokio::test(start_paused = true)]
async fn correct_secret_authenticates() {
    let harness = TestHarness::new();
    let mut events = harness.hub.subscribe();
    let mut client = harness.connect();

    assert_eq!(client.login(SECRET).await, Some(Frame::new("auth", json!(true))));
    sleep(Duration::from_millis(1)).await;
    assert_eq!(harness.hub.authenticated_count(), 1);
    assert!(matches!(
        next_gateway_event(&mut events),
        Some(GatewayEvent::AuthSuccess { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn wrong_secret_is_rejected_and_disconnected() {
    let harness = TestHarness::new();
    let mut events = harness.hub.subscribe();
    let mut client = harness.connect();

    assert_eq!(client.login("guess").await, Some(Frame::new("auth", json!(false))));
    assert_eq!(client.next().await, None);
    assert_eq!(harness.hub.authenticated_count(), 0);
    assert!(matches!(
        next_gateway_event(&mut events),
        Some(GatewayEvent::AuthFailure { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn silent_connection_times_out_without_broadcasts() {
    let harness = TestHarness::new();
    let mut client = harness.connect();
    assert_eq!(client.next().await, Some(Frame::signal("challenge")));

    // requests before the handshake are ignored
    client.send("getBalance", json!({ "nonce": 1 })).await;
    harness.service.bus().emit(ServiceEvent::Synced);

    sleep(Duration::from_secs(11)).await;
    assert_eq!(client.next().await, None);
    assert!(client.task.is_finished());
}

#[tokio::test(start_paused = true)]
async fn only_authenticated_connections_receive_broadcasts() {
    let harness = TestHarness::new();
    let mut member = harness.connect();
    let mut stranger = harness.connect();

    member.login(SECRET).await;
    assert_eq!(stranger.next().await, Some(Frame::signal("challenge")));

    harness.service.bus().emit(ServiceEvent::Start {
        command_line: "wallet-service".into(),
    });
    harness.service.bus().emit(ServiceEvent::Scan { from: 1, to: 11 });
    harness.service.bus().emit(ServiceEvent::Alive);
    sleep(Duration::from_millis(1)).await;

    assert_eq!(
        member.next().await,
        Some(Frame::new("scan", json!({ "from": 1, "to": 11 })))
    );
    assert_eq!(member.next().await, Some(Frame::signal("alive")));
    assert!(stranger.from_hub.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn replies_carry_their_own_nonce() {
    let harness = TestHarness::new();
    let mut client = harness.connect();
    client.login(SECRET).await;

    client.send("getBalance", json!({ "nonce": 111, "delay": 50 })).await;
    client.send("getBalance", json!({ "nonce": 222, "delay": 10 })).await;

    let first = client.next().await.unwrap();
    let second = client.next().await.unwrap();
    assert_eq!(first.event, "getBalance");
    assert_eq!(
        first.data,
        Some(json!({ "nonce": 222, "data": { "availableBalance": 10, "lockedAmount": 0 } }))
    );
    assert_eq!(
        second.data,
        Some(json!({ "nonce": 111, "data": { "availableBalance": 50, "lockedAmount": 0 } }))
    );
}

#[tokio::test(start_paused = true)]
async fn failures_are_answered_to_the_requester_only() -> anyhow::Result<()> {
    let harness = TestHarness::new();
    let mut client = harness.connect();
    let mut other = harness.connect();
    client.login(SECRET).await;
    other.login(SECRET).await;

    client.send("mineBlocks", json!({ "nonce": 5 })).await;
    let reply = client.next().await.unwrap();
    assert_eq!(reply.event, "mineBlocks");
    let data = reply.data.unwrap();
    assert_eq!(data["nonce"], json!(5));
    assert!(data["error"].as_str().unwrap().contains("Unknown command"));

    client.send("getViewKey", Value::Null).await;
    let reply = client.next().await.unwrap();
    let data = reply.data.unwrap();
    assert!(data["nonce"].is_u64());
    assert!(data["error"].as_str().unwrap().contains("Method not found"));

    client
        .send("newTransfer", json!({ "nonce": 6, "address": "TRTLx", "amount": 1.5 }))
        .await;
    let reply = client.next().await.unwrap();
    assert_eq!(
        reply.data,
        Some(json!({ "nonce": 6, "data": { "address": "TRTLx", "amount": 1.5 } }))
    );

    sleep(Duration::from_millis(1)).await;
    assert!(other.from_hub.try_recv().is_err());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn logout_leaves_the_authenticated_set() {
    let harness = TestHarness::new();
    let mut client = harness.connect();
    client.login(SECRET).await;
    sleep(Duration::from_millis(1)).await;
    assert_eq!(harness.hub.authenticated_count(), 1);

    client.send("logout", Value::Null).await;
    assert_eq!(client.next().await, None);
    assert_eq!(harness.hub.authenticated_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn full_queue_is_reported_internally() {
    let harness = TestHarness::new();
    let mut events = harness.hub.subscribe();
    let mut slow = harness.connect_with_buffer(1);
    slow.login(SECRET).await;
    sleep(Duration::from_millis(1)).await;
    while next_gateway_event(&mut events).is_some() {}

    harness.service.bus().emit(ServiceEvent::Save);
    harness.service.bus().emit(ServiceEvent::Save);
    sleep(Duration::from_millis(1)).await;

    match next_gateway_event(&mut events) {
        Some(GatewayEvent::Error { message }) => assert!(message.contains("full")),
        other => panic!("expected a delivery error, got {:?}", other),
    }
    assert_eq!(slow.next().await, Some(Frame::signal("save")));
}
