//! Agent sessions against an in-process coordinator stand-in.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use fl_agent::{connect_and_run, CommandDispatcher, Handshake, SimulatedRobot};
use fl_protocol::{decode_bulk, decode_envelope, ControlEnvelope, InitialConnection, MsgType};

/// Accepts one agent connection; records what it receives and sends what
/// the test queues.
struct Peer {
    addr: SocketAddr,
    inbound: mpsc::UnboundedReceiver<Message>,
    outbound: mpsc::UnboundedSender<Message>,
}

impl Peer {
    async fn start() -> Self {
        let (in_tx, inbound) = mpsc::unbounded_channel();
        let (outbound, out_rx) = mpsc::unbounded_channel();
        let out_rx = Arc::new(Mutex::new(Some(out_rx)));

        let app = Router::new().route(
            "/{*path}",
            get(move |ws: WebSocketUpgrade| {
                let in_tx = in_tx.clone();
                let out_rx = out_rx.clone();
                async move {
                    ws.on_upgrade(move |socket| async move {
                        let out_rx = out_rx.lock().await.take();
                        if let Some(out_rx) = out_rx {
                            serve(socket, in_tx, out_rx).await;
                        }
                    })
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            inbound,
            outbound,
        }
    }

    fn url(&self) -> String {
        format!("ws://{}/sample/robot1/", self.addr)
    }

    fn send_text(&self, text: &str) {
        self.outbound.send(Message::Text(text.into())).unwrap();
    }

    /// Next text or binary frame from the agent.
    async fn next(&mut self) -> Message {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(2), self.inbound.recv())
                .await
                .expect("no frame from agent within 2s")
                .expect("agent connection gone");
            if matches!(msg, Message::Text(_) | Message::Binary(_)) {
                return msg;
            }
        }
    }

    async fn next_envelope(&mut self) -> ControlEnvelope {
        match self.next().await {
            Message::Text(text) => decode_envelope(text.as_str()).unwrap(),
            other => panic!("expected a text frame, got {other:?}"),
        }
    }
}

async fn serve(
    socket: WebSocket,
    inbound: mpsc::UnboundedSender<Message>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
) {
    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            Some(msg) = outbound.recv() => {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
            msg = stream.next() => match msg {
                Some(Ok(msg)) => {
                    if inbound.send(msg).is_err() {
                        break;
                    }
                }
                _ => break,
            },
        }
    }
}

fn handshake(artifacts: Vec<fl_protocol::BulkFrame>) -> Handshake {
    let initial = InitialConnection {
        map_id: "map_001".into(),
        ip_address: "192.168.1.2".into(),
        building_number: 0,
        floor_level: 0,
    };
    let params = json!({
        "map_id": "map_001",
        "minimum_height_for_conversion": 0.1,
        "robot_name": "robot1"
    });
    Handshake::new("robot1", &initial, artifacts, params.as_object().cloned().unwrap())
}

fn spawn_agent(
    peer: &Peer,
    handshake: Handshake,
    robot: SimulatedRobot,
) -> JoinHandle<anyhow::Result<()>> {
    let url = peer.url();
    let dispatcher = Arc::new(CommandDispatcher::new("robot1", Arc::new(robot)));
    tokio::spawn(async move { connect_and_run(&url, &handshake, dispatcher).await })
}

fn robot() -> SimulatedRobot {
    SimulatedRobot::new(None, Map::new()).with_navigation_time(Duration::ZERO)
}

/// Connect with an artifact-free handshake and consume it.
async fn connected(peer: &mut Peer, robot: SimulatedRobot) -> JoinHandle<anyhow::Result<()>> {
    let agent = spawn_agent(peer, handshake(Vec::new()), robot);
    assert_eq!(peer.next_envelope().await.kind(), Some(MsgType::InitialConnection));
    assert_eq!(peer.next_envelope().await.kind(), Some(MsgType::Param));
    agent
}

#[tokio::test]
async fn handshake_is_sent_in_order() {
    let mut peer = Peer::start().await;
    let graph = fl_protocol::BulkFrame::graph(
        "original_graph_node.txt",
        "map_001",
        "floor_0",
        &b"Sample graph data content"[..],
    );
    let _agent = spawn_agent(&peer, handshake(vec![graph.clone()]), robot());

    let initial = peer.next_envelope().await;
    assert_eq!(initial.kind(), Some(MsgType::InitialConnection));
    assert_eq!(initial.sender, "robot1");
    assert_eq!(initial.destination.as_deref(), Some("server"));
    assert_eq!(initial.extra["ip_address"], "192.168.1.2");

    match peer.next().await {
        Message::Binary(bytes) => assert_eq!(decode_bulk(bytes).unwrap(), graph),
        other => panic!("expected the graph artifact, got {other:?}"),
    }

    let params = peer.next_envelope().await;
    assert_eq!(params.kind(), Some(MsgType::Param));
    assert_eq!(params.extra["type"], "initial_param");
    assert_eq!(params.msg.as_ref().unwrap()["robot_name"], "robot1");
}

#[tokio::test]
async fn binary_artifact_with_nul_does_not_block_the_session() {
    let mut peer = Peer::start().await;
    let graph = fl_protocol::BulkFrame::graph("graph.txt", "map_001", "floor_0", &b"nodes"[..]);
    let image = fl_protocol::BulkFrame::graph("map.bin", "map_001", "floor_0", &b"\x89PNG\0\0data"[..]);
    let agent = spawn_agent(&peer, handshake(vec![graph.clone(), image]), robot());

    assert_eq!(peer.next_envelope().await.kind(), Some(MsgType::InitialConnection));
    match peer.next().await {
        Message::Binary(bytes) => assert_eq!(decode_bulk(bytes).unwrap(), graph),
        other => panic!("expected the readable artifact, got {other:?}"),
    }
    assert_eq!(peer.next_envelope().await.kind(), Some(MsgType::Param));

    // The session is active: commands are answered.
    peer.send_text(r#"{"picture":{"sender":"server"}}"#);
    assert_eq!(peer.next_envelope().await.kind(), Some(MsgType::Message));
    assert!(!agent.is_finished());
}

#[tokio::test]
async fn navigation_goal_gets_correlated_response() {
    let mut peer = Peer::start().await;
    let _agent = connected(&mut peer, robot()).await;

    peer.send_text(
        r#"{"msgtype":"navigation","x":1.0,"y":2.0,"th":0.0,"sender":"server","command_id":"42","msg_type":"NAVIGATION"}"#,
    );

    let response = peer.next_envelope().await;
    assert_eq!(response.msgtype, "NAVIGATION_RESPONSE");
    assert_eq!(response.command_id.as_deref(), Some("42"));
    assert_eq!(response.destination.as_deref(), Some("server"));
    assert_eq!(response.extra["result"], true);
}

#[tokio::test]
async fn rosbag_listing_answers_and_other_rosbag_requests_do_not() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["rosbag1.bag", "rosbag2.bag"] {
        std::fs::write(dir.path().join(name), b"").unwrap();
    }
    let mut peer = Peer::start().await;
    let robot = SimulatedRobot::new(Some(dir.path().to_path_buf()), Map::new());
    let _agent = connected(&mut peer, robot).await;

    peer.send_text(r#"{"message":{"sender":"server","msgtype":"rosbag","msg":{"type":"get_rosbags"}}}"#);
    let listing = peer.next_envelope().await;
    assert_eq!(listing.kind(), Some(MsgType::Rosbag));
    assert_eq!(listing.msg, Some(json!(["rosbag1.bag", "rosbag2.bag"])));

    // No response to this one; the next frame must answer the picture command.
    peer.send_text(r#"{"rosbag":{"type":"record_start","sender":"server"}}"#);
    peer.send_text(r#"{"picture":{"sender":"server"}}"#);
    let next = peer.next_envelope().await;
    assert_eq!(next.kind(), Some(MsgType::Message));
    assert_eq!(next.msg, Some(Value::from("Received all the patrol pictures")));
}

#[tokio::test]
async fn unknown_commands_do_not_end_the_session() {
    let mut peer = Peer::start().await;
    let _agent = connected(&mut peer, robot()).await;

    peer.send_text(r#"{"teleport":{"to":"moon"}}"#);
    peer.send_text("definitely not json");
    peer.send_text(r#"{"process":{"systemctl":"restart navigation","sender":"server"}}"#);

    let response = peer.next_envelope().await;
    assert_eq!(response.msg, Some(Value::from("Process 'restart navigation' executed")));
    assert_eq!(response.extra["error"], false);
}

#[tokio::test]
async fn param_command_is_echoed() {
    let mut peer = Peer::start().await;
    let _agent = connected(&mut peer, robot()).await;

    peer.send_text(r#"{"param":{"sender":"server","max_speed":0.8}}"#);

    let response = peer.next_envelope().await;
    assert_eq!(response.kind(), Some(MsgType::Param));
    assert_eq!(response.extra["type"], "updated_param");
    assert_eq!(response.command_id.as_deref(), Some("0"));
    assert_eq!(response.msg.as_ref().unwrap()["max_speed"], 0.8);
}

#[tokio::test]
async fn coordinator_close_ends_the_session_cleanly() {
    let mut peer = Peer::start().await;
    let agent = connected(&mut peer, robot()).await;

    peer.outbound.send(Message::Close(None)).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(2), agent)
        .await
        .expect("agent session did not end")
        .unwrap();
    assert!(result.is_ok());
}
