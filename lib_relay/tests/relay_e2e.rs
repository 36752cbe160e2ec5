//! End-to-end tests: a real listener, real WebSocket clients.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use lib_relay::{serve, LifecycleCoordinator, TransportSettings};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Relay {
    addr: SocketAddr,
    coordinator: Arc<LifecycleCoordinator>,
    stop: Option<oneshot::Sender<()>>,
    server: JoinHandle<std::io::Result<()>>,
}

impl Relay {
    async fn start() -> Self {
        Self::start_with(TransportSettings::default()).await
    }

    async fn start_with(settings: TransportSettings) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let coordinator = Arc::new(LifecycleCoordinator::default());
        let (stop, stopped) = oneshot::channel::<()>();

        let server = tokio::spawn(serve(
            listener,
            Arc::clone(&coordinator),
            settings,
            async move {
                let _ = stopped.await;
            },
        ));

        Self {
            addr,
            coordinator,
            stop: Some(stop),
            server,
        }
    }

    async fn connect(&self, path: &str) -> Client {
        let url = format!("ws://{}{}", self.addr, path);
        let (client, _) = connect_async(url).await.unwrap();
        client
    }

    async fn wait_for_connections(&self, expected: usize) {
        self.wait_for_connections_within(expected, Duration::from_secs(5))
            .await
    }

    async fn wait_for_connections_within(&self, expected: usize, limit: Duration) {
        let deadline = tokio::time::Instant::now() + limit;
        while self.coordinator.connection_count() != expected {
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected {} connections, have {}",
                expected,
                self.coordinator.connection_count()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn get(&self, path: &str) -> String {
        let mut stream = TcpStream::connect(self.addr).await.unwrap();
        let request = format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
            path, self.addr
        );
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let result = tokio::time::timeout(Duration::from_secs(5), self.server)
            .await
            .expect("server did not stop")
            .unwrap();
        assert!(result.is_ok());
    }
}

async fn next_message(client: &mut Client) -> Message {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for a message")
            .expect("stream ended")
            .unwrap();
        match msg {
            Message::Ping(_) | Message::Pong(_) => continue,
            other => return other,
        }
    }
}

// Enough data to fill the socket buffers of a peer that never reads.
const FLOOD_FRAMES: usize = 64;
const FLOOD_FRAME_SIZE: usize = 1 << 20;

async fn flood(client: &mut Client) {
    let chunk = Bytes::from(vec![0x5au8; FLOOD_FRAME_SIZE]);
    for _ in 0..FLOOD_FRAMES {
        client.send(Message::Binary(chunk.clone())).await.unwrap();
    }
}

async fn assert_silent(client: &mut Client) {
    let waited = tokio::time::timeout(Duration::from_millis(300), client.next()).await;
    assert!(waited.is_err(), "unexpected message: {:?}", waited);
}

#[tokio::test]
async fn hello_world_fan_out() {
    let relay = Relay::start().await;
    let mut a = relay.connect("/ws").await;
    let mut b = relay.connect("/ws").await;
    let mut c = relay.connect("/").await;
    relay.wait_for_connections(3).await;

    a.send(Message::text("hello")).await.unwrap();
    assert_eq!(next_message(&mut b).await, Message::text("hello"));
    assert_eq!(next_message(&mut c).await, Message::text("hello"));
    assert_silent(&mut a).await;

    c.close(None).await.unwrap();
    relay.wait_for_connections(2).await;

    a.send(Message::text("world")).await.unwrap();
    assert_eq!(next_message(&mut b).await, Message::text("world"));
    assert_silent(&mut a).await;

    relay.stop().await;
}

#[tokio::test]
async fn binary_frames_stay_binary() {
    let relay = Relay::start().await;
    let mut a = relay.connect("/ws").await;
    let mut b = relay.connect("/ws").await;
    relay.wait_for_connections(2).await;

    b.send(Message::binary(vec![0u8, 159, 146, 150])).await.unwrap();
    assert_eq!(
        next_message(&mut a).await,
        Message::binary(vec![0u8, 159, 146, 150])
    );

    relay.stop().await;
}

#[tokio::test]
async fn messages_from_one_sender_arrive_in_order() {
    let relay = Relay::start().await;
    let mut a = relay.connect("/ws").await;
    let mut b = relay.connect("/ws").await;
    relay.wait_for_connections(2).await;

    for i in 0..50 {
        a.send(Message::text(format!("m{}", i))).await.unwrap();
    }
    for i in 0..50 {
        assert_eq!(next_message(&mut b).await, Message::text(format!("m{}", i)));
    }

    relay.stop().await;
}

#[tokio::test]
async fn lone_client_gets_nothing_back() {
    let relay = Relay::start().await;
    let mut a = relay.connect("/ws").await;
    relay.wait_for_connections(1).await;

    a.send(Message::text("anyone?")).await.unwrap();
    assert_silent(&mut a).await;

    relay.stop().await;
}

#[tokio::test]
async fn dropped_client_is_removed() {
    let relay = Relay::start().await;
    let a = relay.connect("/ws").await;
    let mut b = relay.connect("/ws").await;
    relay.wait_for_connections(2).await;

    // No close handshake, just a vanished socket.
    drop(a);
    relay.wait_for_connections(1).await;

    b.send(Message::text("still here")).await.unwrap();
    assert_silent(&mut b).await;

    relay.stop().await;
}

#[tokio::test]
async fn health_and_status_endpoints() {
    let relay = Relay::start().await;

    let health = relay.get("/health").await;
    assert!(health.starts_with("HTTP/1.1 200"), "{}", health);
    assert!(health.ends_with("OK"), "{}", health);

    let _a = relay.connect("/ws").await;
    relay.wait_for_connections(1).await;
    let status = relay.get("/status").await;
    assert!(status.starts_with("HTTP/1.1 200"), "{}", status);
    assert!(status.contains(r#""connections":1"#), "{}", status);
    assert!(status.contains(r#""ts":""#), "{}", status);

    relay.stop().await;
}

#[tokio::test]
async fn shutdown_closes_open_connections() {
    let relay = Relay::start().await;
    let mut a = relay.connect("/ws").await;
    relay.wait_for_connections(1).await;
    let coordinator = Arc::clone(&relay.coordinator);

    relay.stop().await;
    assert_eq!(coordinator.connection_count(), 0);

    // The client sees a close frame or the end of the stream.
    let ended = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match a.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(ended.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn slow_peer_is_dropped_without_stalling_the_others() {
    let relay = Relay::start_with(TransportSettings {
        send_timeout: Duration::from_secs(2),
        ..TransportSettings::default()
    })
    .await;
    // `_stalled` is kept open but never read from.
    let _stalled = relay.connect("/ws").await;
    let mut sender = relay.connect("/ws").await;
    let mut reader = relay.connect("/ws").await;
    relay.wait_for_connections(3).await;

    let received = tokio::spawn(async move {
        let mut frames = 0;
        loop {
            match next_message(&mut reader).await {
                Message::Binary(bytes) => {
                    assert_eq!(bytes.len(), FLOOD_FRAME_SIZE);
                    frames += 1;
                }
                Message::Text(text) if text.as_str() == "done" => return frames,
                other => panic!("unexpected message {:?}", other),
            }
        }
    });

    flood(&mut sender).await;
    sender.send(Message::text("done")).await.unwrap();

    let frames = tokio::time::timeout(Duration::from_secs(30), received)
        .await
        .expect("reader starved by the stalled peer")
        .unwrap();
    assert_eq!(frames, FLOOD_FRAMES);

    // The stalled peer misses its write deadline and is force-closed.
    relay
        .wait_for_connections_within(2, Duration::from_secs(15))
        .await;

    relay.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn closing_peer_is_removed_while_its_writer_is_blocked() {
    let relay = Relay::start_with(TransportSettings {
        send_timeout: Duration::from_secs(60),
        ..TransportSettings::default()
    })
    .await;
    let mut stalled = relay.connect("/ws").await;
    let mut sender = relay.connect("/ws").await;
    relay.wait_for_connections(2).await;

    // Back the stalled peer's writer up, then have it hang up.
    flood(&mut sender).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    let _ = tokio::time::timeout(Duration::from_secs(2), stalled.send(Message::Close(None))).await;

    // Far sooner than the 60 s write deadline.
    relay.wait_for_connections(1).await;

    sender.send(Message::text("anyone left?")).await.unwrap();
    assert_silent(&mut sender).await;

    relay.stop().await;
}
