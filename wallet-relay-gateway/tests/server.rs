use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use wallet_relay_connector::config::ConnectorConfig;
use wallet_relay_connector::{JsonRpcClient, ServiceEvent, WalletService, WalletServiceHandle};
use wallet_relay_gateway::config::{GatewaySettings, WsConfig};
use wallet_relay_gateway::gateway::{self, protocol::hash_secret, GatewayServer};
use wallet_relay_gateway::storage::SledCursorStore;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A gateway on a free port in front of a service whose daemon never runs.
struct Listening {
    _dir: TempDir,
    handle: WalletServiceHandle,
    server: GatewayServer,
}

impl Listening {
    async fn start() -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        let port = portpicker::pick_unused_port().expect("No free ports");
        let connector = ConnectorConfig::default();
        let rpc = Arc::new(JsonRpcClient::new(&connector.daemon, &connector.rpc)?);
        let store = Arc::new(SledCursorStore::new(sled::open(dir.path())?));
        let (_service, handle) = WalletService::new(Arc::new(connector), rpc, store);

        let settings = GatewaySettings {
            secret: "s3cret".into(),
            ws: WsConfig {
                host: "127.0.0.1".into(),
                port,
            },
            ..GatewaySettings::default()
        };
        let server = gateway::start(&settings, handle.clone()).await?;
        Ok(Self {
            _dir: dir,
            handle,
            server,
        })
    }

    async fn connect(&self) -> anyhow::Result<Socket> {
        let url = format!("ws://{}/", self.server.local_addr());
        let (socket, _) = connect_async(url).await?;
        Ok(socket)
    }
}

async fn send(socket: &mut Socket, frame: Value) -> anyhow::Result<()> {
    socket.send(Message::text(frame.to_string())).await?;
    Ok(())
}

/// The next JSON text frame from the server.
async fn recv(socket: &mut Socket) -> anyhow::Result<Value> {
    loop {
        let message = timeout(Duration::from_secs(5), socket.next())
            .await?
            .ok_or_else(|| anyhow::anyhow!("socket closed"))??;
        if let Message::Text(text) = message {
            return Ok(serde_json::from_str(text.as_str())?);
        }
    }
}

/// Waits for the server to close the socket, failing on any further text frame.
async fn expect_closed(socket: &mut Socket) -> anyhow::Result<()> {
    loop {
        match timeout(Duration::from_secs(5), socket.next()).await? {
            None | Some(Ok(Message::Close(_))) | Some(Err(_)) => return Ok(()),
            Some(Ok(Message::Text(text))) => anyhow::bail!("unexpected frame {}", text.as_str()),
            Some(Ok(_)) => {}
        }
    }
}

#[tokio::test]
async fn gateway_listens_and_requires_an_upgrade() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let port = portpicker::pick_unused_port().expect("No free ports");
    let connector = ConnectorConfig::default();
    let rpc = Arc::new(JsonRpcClient::new(&connector.daemon, &connector.rpc)?);
    let store = Arc::new(SledCursorStore::new(sled::open(dir.path())?));
    let (_service, handle) = WalletService::new(Arc::new(connector), rpc, store);

    let settings = GatewaySettings {
        secret: "s3cret".into(),
        ws: WsConfig {
            host: "127.0.0.1".into(),
            port,
        },
        ..GatewaySettings::default()
    };
    let server = gateway::start(&settings, handle).await?;
    assert_eq!(server.local_addr().port(), port);

    let response = reqwest::Client::new()
        .get(format!("http://127.0.0.1:{}/", port))
        .timeout(Duration::from_secs(5))
        .send()
        .await?;
    assert!(response.status().is_client_error());

    server.stop();
    Ok(())
}

#[tokio::test]
async fn gateway_refuses_to_start_without_a_secret() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let connector = ConnectorConfig::default();
    let rpc = Arc::new(JsonRpcClient::new(&connector.daemon, &connector.rpc)?);
    let store = Arc::new(SledCursorStore::new(sled::open(dir.path())?));
    let (_service, handle) = WalletService::new(Arc::new(connector), rpc, store);

    assert!(gateway::start(&GatewaySettings::default(), handle).await.is_err());
    Ok(())
}

#[tokio::test]
async fn wrong_secret_hash_closes_the_socket() -> anyhow::Result<()> {
    let gateway = Listening::start().await?;
    let mut socket = gateway.connect().await?;

    assert_eq!(recv(&mut socket).await?, json!({ "event": "challenge" }));
    send(&mut socket, json!({ "event": "challenge", "data": hash_secret("wrong") })).await?;
    assert_eq!(recv(&mut socket).await?, json!({ "event": "auth", "data": false }));
    expect_closed(&mut socket).await?;

    assert_eq!(gateway.server.hub().authenticated_count(), 0);
    gateway.server.stop();
    Ok(())
}

#[tokio::test]
async fn authenticated_socket_gets_replies_and_broadcasts() -> anyhow::Result<()> {
    let gateway = Listening::start().await?;
    let mut socket = gateway.connect().await?;

    assert_eq!(recv(&mut socket).await?, json!({ "event": "challenge" }));
    send(&mut socket, json!({ "event": "challenge", "data": hash_secret("s3cret") })).await?;
    assert_eq!(recv(&mut socket).await?, json!({ "event": "auth", "data": true }));

    send(&mut socket, json!({ "event": "noSuchCommand", "data": { "nonce": 111 } })).await?;
    assert_eq!(
        recv(&mut socket).await?,
        json!({
            "event": "noSuchCommand",
            "data": { "nonce": 111, "error": "Unknown command 'noSuchCommand'" }
        })
    );

    gateway.handle.bus().emit(ServiceEvent::Info("hello".into()));
    assert_eq!(recv(&mut socket).await?, json!({ "event": "info", "data": "hello" }));

    send(&mut socket, json!({ "event": "logout" })).await?;
    expect_closed(&mut socket).await?;

    gateway.server.stop();
    Ok(())
}
