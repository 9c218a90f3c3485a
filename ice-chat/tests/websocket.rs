use std::{net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{Context, Result, anyhow};
use futures::{SinkExt, StreamExt};
use ice_chat::{
    message::Message,
    server::{ChatServer, ServerConfig, UpgradeConfig},
};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::oneshot,
    task::JoinHandle,
    time::timeout,
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{self, Message as WsFrame, client::IntoClientRequest, http::HeaderValue},
};

const WAIT: Duration = Duration::from_secs(2);

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct RunningServer {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl RunningServer {
    async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.task.await;
    }
}

async fn start_server(config: ServerConfig) -> Result<RunningServer> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let server = ChatServer::new(listener, config);
    let addr = server.local_addr()?;

    let (shutdown, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        let shutdown = async move {
            let _ = shutdown_rx.await;
        };
        let _ = server.run_until(shutdown).await;
    });

    Ok(RunningServer {
        addr,
        shutdown,
        task,
    })
}

fn config() -> ServerConfig {
    ServerConfig {
        web_root: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("web"),
        ..ServerConfig::default()
    }
}

async fn join(addr: SocketAddr) -> Result<Client> {
    let (client, _) = connect_async(format!("ws://{addr}/ws")).await?;
    Ok(client)
}

async fn next_message(client: &mut Client) -> Result<Message> {
    loop {
        let frame = timeout(WAIT, client.next())
            .await
            .context("timed out waiting for a frame")?
            .context("server closed the socket")??;
        if let WsFrame::Text(text) = frame {
            return Ok(Message::decode(&text)?);
        }
    }
}

async fn next_roster(client: &mut Client) -> Result<Vec<String>> {
    let mut names = next_message(client)
        .await?
        .online_users
        .context("expected a presence update")?;
    names.sort();
    Ok(names)
}

async fn send(client: &mut Client, message: &Message) -> Result<()> {
    client.send(WsFrame::Text(message.encode()?)).await?;
    Ok(())
}

#[tokio::test]
async fn clients_chat_and_track_presence_over_websockets() -> Result<()> {
    let server = start_server(config()).await?;

    let mut alice = join(server.addr).await?;
    assert_eq!(next_roster(&mut alice).await?, vec!["Anonymous"]);

    let mut bob = join(server.addr).await?;
    assert_eq!(next_roster(&mut alice).await?, vec!["Anonymous", "Anonymous"]);
    assert_eq!(next_roster(&mut bob).await?, vec!["Anonymous", "Anonymous"]);

    send(&mut alice, &Message::update_username("alice")).await?;
    assert_eq!(next_roster(&mut alice).await?, vec!["Anonymous", "alice"]);
    assert_eq!(next_roster(&mut bob).await?, vec!["Anonymous", "alice"]);

    send(&mut bob, &Message::chat("bob", "hello alice")).await?;
    for client in [&mut alice, &mut bob] {
        assert_eq!(
            next_message(client).await?,
            Message::chat("bob", "hello alice")
        );
    }

    alice.close(None).await?;
    assert_eq!(next_roster(&mut bob).await?, vec!["Anonymous"]);

    bob.close(None).await?;
    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn server_closes_with_normal_closure_after_malformed_frame() -> Result<()> {
    let server = start_server(config()).await?;
    let mut client = join(server.addr).await?;
    next_message(&mut client).await?;

    client.send(WsFrame::Text("{oops".into())).await?;

    let frame = timeout(WAIT, client.next())
        .await
        .context("timed out waiting for close")?
        .context("socket ended without a close frame")??;
    match frame {
        WsFrame::Close(Some(close)) => {
            assert_eq!(u16::from(close.code), 1000);
            assert_eq!(close.reason, "Normal closure");
        }
        other => return Err(anyhow!("expected close frame, got {other:?}")),
    }

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn disallowed_origin_is_refused() -> Result<()> {
    let server = start_server(ServerConfig {
        upgrade: UpgradeConfig {
            allowed_origins: vec!["http://chat.example".into()],
            ..UpgradeConfig::default()
        },
        ..config()
    })
    .await?;

    let mut request = format!("ws://{}/ws", server.addr).into_client_request()?;
    request
        .headers_mut()
        .insert("Origin", HeaderValue::from_static("http://evil.example"));

    match connect_async(request).await {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status().as_u16(), 403),
        Err(other) => return Err(other.into()),
        Ok(_) => return Err(anyhow!("upgrade from a disallowed origin succeeded")),
    }

    let mut request = format!("ws://{}/ws", server.addr).into_client_request()?;
    request
        .headers_mut()
        .insert("Origin", HeaderValue::from_static("http://chat.example"));
    let (mut allowed, _) = connect_async(request).await?;
    assert_eq!(next_roster(&mut allowed).await?, vec!["Anonymous"]);

    allowed.close(None).await?;
    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn chat_page_is_served() -> Result<()> {
    let server = start_server(config()).await?;

    let page = reqwest::get(format!("http://{}/", server.addr))
        .await?
        .error_for_status()?
        .text()
        .await?;
    assert!(page.contains("/js/chat.js"));

    let script = reqwest::get(format!("http://{}/js/chat.js", server.addr)).await?;
    assert_eq!(script.status().as_u16(), 200);

    server.stop().await;
    Ok(())
}
