//! End-to-end coordinator behaviour over real sockets.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Map, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use fl_protocol::{encode_envelope, BulkFrame, ControlEnvelope, InitialConnection};
use fl_server::services::dispatch::ResponseHandler;
use fl_server::services::store::LocalArtifactStore;
use fl_server::AppState;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResponseHandler for Recorder {
    async fn initial_connection(&self, identity: &str, info: &InitialConnection) {
        self.push(format!("initial {identity} {}", info.map_id));
    }
    async fn navigation_response(&self, identity: &str, command_id: Option<&str>, result: bool) {
        self.push(format!("nav {identity} {} {result}", command_id.unwrap_or("-")));
    }
    async fn params(&self, identity: &str, kind: Option<&str>, params: &Map<String, Value>) {
        self.push(format!("params {identity} {} {}", kind.unwrap_or("-"), params.len()));
    }
    async fn message(&self, identity: &str, text: &str, error: bool) {
        self.push(format!("message {identity} {text} {error}"));
    }
    async fn rosbags(&self, identity: &str, names: &[String]) {
        self.push(format!("rosbags {identity} {}", names.join(",")));
    }
}

struct Harness {
    addr: SocketAddr,
    state: Arc<AppState>,
    recorder: Arc<Recorder>,
    dir: tempfile::TempDir,
}

impl Harness {
    async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = fl_common::AppConfig::default();
        config.storage.dir = dir.path().to_path_buf();

        let recorder = Arc::new(Recorder::default());
        let state = Arc::new(AppState::with_collaborators(
            config,
            recorder.clone(),
            Arc::new(LocalArtifactStore::new(dir.path())),
        ));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = fl_server::router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            recorder,
            dir,
        }
    }

    async fn connect(&self, identity: &str) -> Client {
        let url = format!("ws://{}/sample/{identity}/", self.addr);
        let (client, _) = connect_async(url).await.unwrap();
        let registry_has = || self.state.registry.resolve(identity).is_some();
        eventually(registry_has).await;
        client
    }

    async fn wait_for_event(&self, event: &str) {
        eventually(|| self.recorder.events().iter().any(|e| e == event)).await;
    }

    /// Minimal HTTP/1.1 POST; returns (status code, body).
    async fn post_json(&self, path: &str, body: &Value) -> (u16, Value) {
        let body = body.to_string();
        let mut stream = TcpStream::connect(self.addr).await.unwrap();
        let request = format!(
            "POST {path} HTTP/1.1\r\nHost: {}\r\nContent-Type: application/json\r\n\
             Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
            self.addr,
            body.len()
        );
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut raw = String::new();
        stream.read_to_string(&mut raw).await.unwrap();
        let status = raw
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .unwrap();
        let (_, body) = raw.split_once("\r\n\r\n").unwrap();
        (status, serde_json::from_str(body).unwrap_or(Value::Null))
    }
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}

async fn next_text(client: &mut Client) -> String {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .expect("no frame within 2s")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = msg {
            return text;
        }
    }
}

fn text_frame(envelope: &ControlEnvelope) -> Message {
    Message::Text(encode_envelope(envelope).unwrap())
}

#[tokio::test]
async fn graph_artifact_is_persisted_under_identity() {
    let h = Harness::start().await;
    let mut client = h.connect("robot1").await;

    let frame = BulkFrame::graph(
        "original_graph_node.txt",
        "map_001",
        "floor_0",
        &b"Sample graph data content"[..],
    );
    client
        .send(Message::Binary(frame.encode().unwrap()))
        .await
        .unwrap();

    let expected = h.dir.path().join("robot1_original_graph_node.txt");
    eventually(|| std::fs::read(&expected).ok().as_deref() == Some(&b"Sample graph data content"[..]))
        .await;
}

#[tokio::test]
async fn dropped_connection_only_unregisters_its_own_identity() {
    let h = Harness::start().await;
    let robot1 = h.connect("robot1").await;
    let mut robot2 = h.connect("robot2").await;

    // No close handshake: the coordinator sees the transport go away.
    drop(robot1);
    eventually(|| h.state.registry.resolve("robot1").is_none()).await;

    assert!(h.state.registry.resolve("robot2").is_some());
    h.state
        .registry
        .send_envelope(
            "robot2",
            &ControlEnvelope::message("server", "robot2", "still here", false),
        )
        .unwrap();
    assert!(next_text(&mut robot2).await.contains("still here"));
}

#[tokio::test]
async fn session_survives_unknown_and_malformed_frames() {
    let h = Harness::start().await;
    let mut client = h.connect("robot1").await;

    client
        .send(Message::Text(
            r#"{"message":{"sender":"robot1","msgtype":"FUTURE_TYPE"}}"#.into(),
        ))
        .await
        .unwrap();
    client.send(Message::Text("{not json".into())).await.unwrap();
    client
        .send(Message::Binary(b"graph_data:only\0two".to_vec()))
        .await
        .unwrap();
    client
        .send(text_frame(&ControlEnvelope::message(
            "robot1", "server", "alive", false,
        )))
        .await
        .unwrap();

    h.wait_for_event("message robot1 alive false").await;
    assert_eq!(h.recorder.events(), vec!["message robot1 alive false"]);
    assert!(h.state.registry.resolve("robot1").is_some());
}

#[tokio::test]
async fn handshake_envelopes_reach_their_handlers() {
    let h = Harness::start().await;
    let mut client = h.connect("robot1").await;

    let info = InitialConnection {
        map_id: "map_001".into(),
        ip_address: "10.0.0.7".into(),
        building_number: 1,
        floor_level: 0,
    };
    let params = json!({"map_id": "map_001", "max_speed": 0.8});
    client
        .send(text_frame(&ControlEnvelope::initial_connection("robot1", &info)))
        .await
        .unwrap();
    client
        .send(Message::Binary(
            BulkFrame::params("initial_param", params.as_object().unwrap())
                .unwrap()
                .encode()
                .unwrap(),
        ))
        .await
        .unwrap();

    h.wait_for_event("params robot1 initial_param 2").await;
    assert_eq!(h.recorder.events()[0], "initial robot1 map_001");
}

#[tokio::test]
async fn navigation_command_round_trip_through_http_api() {
    let h = Harness::start().await;
    let mut client = h.connect("robot1").await;

    let (status, body) = h
        .post_json(
            "/api/robots/robot1/commands",
            &json!({
                "command": "navigation",
                "command_id": "42",
                "payload": {"msg_type": "NAVIGATION", "x": 1.0, "y": 2.0, "th": 0.0}
            }),
        )
        .await;
    assert_eq!(status, 202);
    assert_eq!(body["command_id"], "42");
    assert_eq!(h.state.tracker.outstanding("robot1"), 1);

    let command: Value = serde_json::from_str(&next_text(&mut client).await).unwrap();
    assert_eq!(command["message"]["msgtype"], "navigation");
    assert_eq!(command["message"]["msg"]["command_id"], "42");

    client
        .send(text_frame(&ControlEnvelope::navigation_response(
            "robot1", "server", "42", true,
        )))
        .await
        .unwrap();

    h.wait_for_event("nav robot1 42 true").await;
    assert_eq!(h.state.tracker.outstanding("robot1"), 0);
}

#[tokio::test]
async fn command_for_unknown_robot_is_not_found() {
    let h = Harness::start().await;

    let (status, body) = h
        .post_json(
            "/api/robots/ghost/commands",
            &json!({"command": "picture", "payload": {}}),
        )
        .await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["code"], 404);

    let (status, _) = h
        .post_json(
            "/api/robots/ghost/commands",
            &json!({"command": "teleport", "payload": {}}),
        )
        .await;
    assert_eq!(status, 400);
}
