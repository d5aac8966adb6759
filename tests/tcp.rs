/// End-to-end tests over the raw TCP line transport.
///
/// Each test binds the gateway on an ephemeral loopback port and talks to it
/// with a small line client.
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

use swarmgate::irc::bridge::NoopBridge;
use swarmgate::irc::identity::{AgentIdentity, StaticIdentities};
use swarmgate::irc::sanitize::MarkupSanitizer;
use swarmgate::irc::server::{Gateway, GatewayConfig};
use swarmgate::irc::session;

async fn start() -> (Gateway, u16) {
    let agents = ["alice", "bob"]
        .into_iter()
        .map(|name| AgentIdentity {
            id: format!("id-{name}"),
            name: name.into(),
            api_key: format!("key-{name}"),
            capabilities: Vec::new(),
            description: String::new(),
        })
        .collect();
    let gateway = Gateway::new(
        GatewayConfig {
            server_name: "swarm.test".into(),
            network: "TestNet".into(),
            ..GatewayConfig::default()
        },
        Arc::new(StaticIdentities::new(agents)),
        Arc::new(MarkupSanitizer),
        Arc::new(NoopBridge),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(session::accept_tcp(listener, gateway.clone()));
    (gateway, port)
}

/// Simple line client for testing.
struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    lines: Vec<String>,
}

impl TestClient {
    async fn connect(port: u16) -> Self {
        let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let (read, writer) = stream.into_split();
        let mut client = Self {
            reader: BufReader::new(read),
            writer,
            lines: Vec::new(),
        };
        client.read_until("Authenticate with AUTH").await;
        client
    }

    async fn authed(port: u16, name: &str) -> Self {
        let mut client = Self::connect(port).await;
        client.send(&format!("AUTH key-{name}")).await;
        client.read_until(" 376 ").await;
        client
    }

    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .unwrap();
    }

    /// Read lines until one contains `marker`; returns that line.
    async fn read_until(&mut self, marker: &str) -> String {
        loop {
            let mut line = String::new();
            let read = tokio::time::timeout(Duration::from_secs(3), self.reader.read_line(&mut line))
                .await
                .unwrap_or_else(|_| panic!("timeout waiting for {marker:?}; saw {:?}", self.lines))
                .unwrap();
            assert!(read > 0, "connection closed waiting for {marker:?}");
            let trimmed = line.trim_end().to_string();
            self.lines.push(trimmed.clone());
            if trimmed.contains(marker) {
                return trimmed;
            }
        }
    }

    /// Whether the server has closed the connection (after draining).
    async fn closed(&mut self) -> bool {
        loop {
            let mut line = String::new();
            match tokio::time::timeout(Duration::from_secs(3), self.reader.read_line(&mut line)).await {
                Ok(Ok(0)) | Ok(Err(_)) => return true,
                Ok(Ok(_)) => self.lines.push(line.trim_end().to_string()),
                Err(_) => return false,
            }
        }
    }
}

#[tokio::test]
async fn banner_auth_and_welcome() {
    let (_gw, port) = start().await;
    let mut c = TestClient::connect(port).await;
    assert_eq!(
        c.lines[0],
        ":swarm.test NOTICE * :*** Welcome to TestNet. Authenticate with AUTH <api_key>"
    );

    c.send("JOIN #general").await;
    let line = c.read_until(" 464 ").await;
    assert_eq!(line, ":swarm.test 464 * :You have not registered");

    c.send("AUTH key-alice").await;
    let line = c.read_until(" 001 ").await;
    assert_eq!(line, ":swarm.test 001 alice :Welcome to TestNet, alice!");
    c.read_until(" 376 ").await;
}

#[tokio::test]
async fn channel_message_between_tcp_clients() {
    let (_gw, port) = start().await;
    let mut a = TestClient::authed(port, "alice").await;
    let mut b = TestClient::authed(port, "bob").await;

    a.send("JOIN #general").await;
    a.read_until(" 366 ").await;
    b.send("JOIN #general").await;
    b.read_until(" 366 ").await;
    a.read_until(":bob JOIN #general").await;

    // Bare LF terminators are accepted too.
    b.writer.write_all(b"PRIVMSG #general :hello alice\n").await.unwrap();
    let line = a.read_until("PRIVMSG").await;
    assert_eq!(line, ":bob PRIVMSG #general :hello alice");
}

#[tokio::test]
async fn quit_closes_and_notifies() {
    let (gw, port) = start().await;
    let mut a = TestClient::authed(port, "alice").await;
    let mut b = TestClient::authed(port, "bob").await;
    a.send("JOIN #general").await;
    a.read_until(" 366 ").await;
    b.send("JOIN #general").await;
    b.read_until(" 366 ").await;

    b.send("QUIT :done for today").await;
    let line = b.read_until("ERROR").await;
    assert!(line.starts_with("ERROR :Closing link"));
    assert!(b.closed().await);

    let line = a.read_until("QUIT").await;
    assert_eq!(line, ":bob QUIT :done for today");

    // Cleanup has run by the time the QUIT was broadcast.
    assert_eq!(gw.stats().await.connections, 1);
}

#[tokio::test]
async fn takeover_closes_old_socket() {
    let (_gw, port) = start().await;
    let mut old = TestClient::authed(port, "alice").await;
    let mut new = TestClient::authed(port, "alice").await;

    let line = old.read_until("ERROR").await;
    assert_eq!(line, "ERROR :Closing link: session replaced by a new connection");
    assert!(old.closed().await);

    new.send("PING :still-here").await;
    let line = new.read_until("PONG").await;
    assert_eq!(line, ":swarm.test PONG swarm.test :still-here");
}

#[tokio::test]
async fn over_long_line_keeps_connection() {
    let (_gw, port) = start().await;
    let mut a = TestClient::authed(port, "alice").await;
    let long = "x".repeat(9000);
    a.send(&format!("PRIVMSG #general :{long}")).await;
    let line = a.read_until(" 417 ").await;
    assert_eq!(line, ":swarm.test 417 alice :Input line was too long");

    a.send("PING :after").await;
    a.read_until("PONG").await;
}
