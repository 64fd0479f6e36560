use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use stream_road::server::BoundAddrs;
use stream_road::{BrokerInstance, Server, ServerConfig};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    addrs: BoundAddrs,
    producer_edge: Arc<BrokerInstance>,
    consumer_edge: Arc<BrokerInstance>,
    _shutdown: oneshot::Sender<()>,
}

async fn start() -> Harness {
    let server = Server::bind(&ServerConfig::ephemeral(), None)
        .await
        .expect("bind ephemeral listeners");
    let addrs = server.addrs();
    let producer_edge = server.producer_edge();
    let consumer_edge = server.consumer_edge();

    let (shutdown, stop) = oneshot::channel::<()>();
    tokio::spawn(server.serve(async move {
        let _ = stop.await;
    }));

    Harness {
        addrs,
        producer_edge,
        consumer_edge,
        _shutdown: shutdown,
    }
}

struct Client {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    id: String,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let (ws, _) = timeout(WAIT, connect_async(format!("ws://{addr}/ws")))
            .await
            .expect("connect timed out")
            .expect("websocket handshake");
        let mut client = Client {
            ws,
            id: String::new(),
        };
        let hello = client.recv().await;
        assert_eq!(hello["type"], "connected");
        client.id = hello["connectionId"].as_str().unwrap().to_string();
        client
    }

    async fn send(&mut self, message: Value) {
        self.ws
            .send(Message::Text(message.to_string().into()))
            .await
            .unwrap();
    }

    async fn recv(&mut self) -> Value {
        loop {
            let frame = timeout(WAIT, self.ws.next())
                .await
                .expect("timed out waiting for a message")
                .expect("connection closed")
                .expect("websocket error");
            if let Message::Text(text) = frame {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    /// Assert nothing arrives for a short while.
    async fn expect_silence(&mut self) {
        if let Ok(Some(Ok(frame))) = timeout(Duration::from_millis(200), self.ws.next()).await {
            panic!("unexpected frame: {frame:?}");
        }
    }

    async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

async fn eventually(mut check: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn single_instance_lifecycle() {
    let harness = start().await;
    let mut producer = Client::connect(harness.addrs.streamer).await;
    let mut c1 = Client::connect(harness.addrs.streamer).await;

    producer
        .send(json!({"type": "producer-register", "streamId": "s1"}))
        .await;
    assert_eq!(
        producer.recv().await,
        json!({"type": "producer-ready", "streamId": "s1"})
    );

    c1.send(json!({"type": "consumer-join", "streamId": "s1"}))
        .await;
    assert_eq!(
        c1.recv().await,
        json!({"type": "consumer-ready", "streamId": "s1"})
    );
    assert_eq!(
        producer.recv().await,
        json!({"type": "peer-joined", "id": c1.id})
    );

    c1.send(json!({
        "type": "answer",
        "target": producer.id,
        "sender": "forged",
        "payload": {"sdp": "v=0"}
    }))
    .await;
    let answer = producer.recv().await;
    assert_eq!(answer["type"], "answer");
    assert_eq!(answer["sender"], json!(c1.id));
    assert_eq!(answer["payload"], json!({"sdp": "v=0"}));

    producer.close().await;
    assert_eq!(
        c1.recv().await,
        json!({"type": "session-ended", "streamId": "s1"})
    );

    let mut c2 = Client::connect(harness.addrs.streamer).await;
    c2.send(json!({"type": "consumer-join", "streamId": "s1"}))
        .await;
    assert_eq!(
        c2.recv().await,
        json!({"type": "stream-not-found", "streamId": "s1"})
    );
    assert!(harness.producer_edge.list_sessions().is_empty());
}

#[tokio::test]
async fn cross_instance_handshake_and_data() {
    let harness = start().await;
    let mut producer = Client::connect(harness.addrs.streamer).await;
    let mut viewer = Client::connect(harness.addrs.viewer).await;

    producer
        .send(json!({"type": "producer-register", "streamId": "cam", "metadata": {"room": "lab"}}))
        .await;
    assert_eq!(producer.recv().await["type"], "producer-ready");

    let mirrored = harness.consumer_edge.get_session("cam").unwrap();
    assert!(mirrored.bridged);
    assert_eq!(mirrored.metadata.get("room"), Some(&json!("lab")));

    viewer
        .send(json!({"type": "consumer-join", "streamId": "cam"}))
        .await;
    assert_eq!(
        viewer.recv().await,
        json!({"type": "consumer-ready", "streamId": "cam"})
    );

    viewer
        .send(json!({"type": "offer", "streamId": "cam", "payload": {"sdp": "offer"}}))
        .await;
    assert_eq!(
        producer.recv().await,
        json!({
            "type": "offer",
            "sender": viewer.id,
            "streamId": "cam",
            "payload": {"sdp": "offer"}
        })
    );

    producer
        .send(json!({"type": "answer", "target": viewer.id, "payload": {"sdp": "answer"}}))
        .await;
    assert_eq!(
        viewer.recv().await,
        json!({
            "type": "answer",
            "sender": producer.id,
            "streamId": "cam",
            "payload": {"sdp": "answer"}
        })
    );

    producer
        .send(json!({"type": "data", "streamId": "cam", "payload": {"seq": 1}}))
        .await;
    assert_eq!(
        viewer.recv().await,
        json!({"type": "data", "streamId": "cam", "payload": {"seq": 1}})
    );

    producer.close().await;
    assert_eq!(
        viewer.recv().await,
        json!({"type": "session-ended", "streamId": "cam"})
    );
    let consumer_edge = harness.consumer_edge.clone();
    eventually(move || consumer_edge.get_session("cam").is_err()).await;
}

#[tokio::test]
async fn overwrite_ends_the_previous_session() {
    let harness = start().await;
    let mut first = Client::connect(harness.addrs.streamer).await;
    let mut second = Client::connect(harness.addrs.streamer).await;
    let mut consumer = Client::connect(harness.addrs.streamer).await;

    first
        .send(json!({"type": "producer-register", "streamId": "s1"}))
        .await;
    first.recv().await;
    consumer
        .send(json!({"type": "consumer-join", "streamId": "s1"}))
        .await;
    consumer.recv().await;
    first.recv().await;

    second
        .send(json!({"type": "producer-register", "streamId": "s1"}))
        .await;
    assert_eq!(
        second.recv().await,
        json!({"type": "producer-ready", "streamId": "s1"})
    );
    let ended = json!({"type": "session-ended", "streamId": "s1"});
    assert_eq!(consumer.recv().await, ended);
    assert_eq!(first.recv().await, ended);

    let session = harness.producer_edge.get_session("s1").unwrap();
    assert_eq!(session.producer_id.to_string(), second.id);
    assert_eq!(session.consumer_count, 0);
}

#[tokio::test]
async fn malformed_frames_leave_the_connection_usable() {
    let harness = start().await;
    let mut client = Client::connect(harness.addrs.viewer).await;

    client
        .ws
        .send(Message::Text("{not json".to_string().into()))
        .await
        .unwrap();
    let error = client.recv().await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], "malformed_request");

    client.send(json!({"type": "offer", "payload": {}})).await;
    assert_eq!(client.recv().await["code"], "malformed_request");

    client.send(json!({"type": "ping"})).await;
    assert_eq!(client.recv().await, json!({"type": "pong"}));
}

#[tokio::test]
async fn consumer_disconnect_is_cleaned_up() {
    let harness = start().await;
    let mut producer = Client::connect(harness.addrs.streamer).await;
    let mut local = Client::connect(harness.addrs.streamer).await;
    let mut remote = Client::connect(harness.addrs.viewer).await;

    producer
        .send(json!({"type": "producer-register", "streamId": "s1"}))
        .await;
    producer.recv().await;
    local
        .send(json!({"type": "consumer-join", "streamId": "s1"}))
        .await;
    local.recv().await;
    remote
        .send(json!({"type": "consumer-join", "streamId": "s1"}))
        .await;
    remote.recv().await;
    let local_id = local.id.clone();
    assert_eq!(
        producer.recv().await,
        json!({"type": "peer-joined", "id": local_id})
    );

    local.close().await;
    assert_eq!(
        producer.recv().await,
        json!({"type": "peer-left", "id": local_id})
    );
    remote.close().await;

    let producer_edge = harness.producer_edge.clone();
    let consumer_edge = harness.consumer_edge.clone();
    eventually(move || {
        producer_edge.stats().active_connections == 1
            && consumer_edge.stats().active_connections == 0
    })
    .await;
    assert_eq!(
        harness.consumer_edge.get_session("s1").unwrap().consumer_count,
        0
    );
    assert_eq!(
        harness.producer_edge.get_session("s1").unwrap().consumer_count,
        0
    );
    producer.expect_silence().await;
}
