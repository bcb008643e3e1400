//! End-to-end tests against a loopback WebSocket host.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use termlink_client::{
    ConnectionState, EventStream, FsOp, FsPayload, InputMode, LinkError, SessionId,
    SessionOptions, SessionTransport, TransportConfig, TransportEvent,
};

const WAIT: Duration = Duration::from_secs(5);

/// Accepts WebSocket connections and hands them to the test.
struct MockHost {
    url: String,
    conns: mpsc::UnboundedReceiver<WebSocketStream<TcpStream>>,
}

impl MockHost {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (tx, conns) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((stream, _addr)) = listener.accept().await {
                if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                    if tx.send(ws).is_err() {
                        break;
                    }
                }
            }
        });
        Self { url, conns }
    }

    async fn accept(&mut self) -> HostConn {
        let ws = timeout(WAIT, self.conns.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("listener stopped");
        HostConn { ws }
    }
}

struct HostConn {
    ws: WebSocketStream<TcpStream>,
}

impl HostConn {
    async fn send(&mut self, value: Value) {
        self.ws.send(Message::Text(value.to_string())).await.unwrap();
    }

    async fn send_raw(&mut self, text: &str) {
        self.ws.send(Message::Text(text.to_string())).await.unwrap();
    }

    async fn ack(&mut self) {
        self.send(json!({"type": "connected", "serverVersion": "test"})).await;
    }

    async fn recv(&mut self) -> Value {
        loop {
            let msg = timeout(WAIT, self.ws.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("client closed the socket")
                .unwrap();
            if let Message::Text(text) = msg {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    /// Answer the next `session_create` with `session_id`.
    async fn grant_session(&mut self, session_id: &str) {
        let req = self.recv().await;
        assert_eq!(req["type"], "session_create");
        self.send(json!({
            "type": "session_created",
            "sessionId": session_id,
            "requestId": req["requestId"],
        }))
        .await;
    }

    async fn output(&mut self, session_id: &str, data: &str) {
        self.send(json!({"type": "pty_output", "sessionId": session_id, "data": data}))
            .await;
    }
}

fn config(url: &str) -> TransportConfig {
    let mut config = TransportConfig::new(url);
    config.ping_interval_secs = 0;
    config.reconnect.base_delay_ms = 20;
    config.reconnect.jitter = 0.0;
    config
}

async fn next_event(events: &mut EventStream) -> TransportEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event stream closed")
}

async fn wait_for(
    events: &mut EventStream,
    pred: impl Fn(&TransportEvent) -> bool,
) -> TransportEvent {
    loop {
        let event = next_event(events).await;
        if pred(&event) {
            return event;
        }
    }
}

/// Names of the lifecycle events queued so far, skipping `message`.
fn drain_names(events: &mut EventStream) -> Vec<&'static str> {
    let mut names = Vec::new();
    while let Some(event) = events.try_recv() {
        if event.name() != "message" {
            names.push(event.name());
        }
    }
    names
}

async fn connected(host: &mut MockHost) -> (SessionTransport, EventStream, HostConn) {
    let (transport, events) = SessionTransport::new(config(&host.url)).unwrap();
    let (result, conn) = tokio::join!(transport.connect(), async {
        let mut conn = host.accept().await;
        conn.ack().await;
        conn
    });
    result.unwrap();
    (transport, events, conn)
}

async fn create(transport: &SessionTransport, conn: &mut HostConn, session_id: &str) -> SessionId {
    let (result, ()) = tokio::join!(
        transport.create_session(SessionOptions::default()),
        conn.grant_session(session_id)
    );
    let id = result.unwrap();
    assert_eq!(id.as_str(), session_id);
    id
}

#[tokio::test]
async fn connect_waits_for_acknowledgment() {
    let mut host = MockHost::start().await;
    let (transport, mut events, _conn) = connected(&mut host).await;

    assert_eq!(transport.state().await.unwrap(), ConnectionState::Open);
    assert_eq!(drain_names(&mut events), vec!["connecting", "connected"]);
}

#[tokio::test]
async fn detached_output_replays_in_order_before_live_output() {
    let mut host = MockHost::start().await;
    let (transport, mut events, mut conn) = connected(&mut host).await;
    let a = create(&transport, &mut conn, "A").await;
    let b = create(&transport, &mut conn, "B").await;
    transport.attach(&a).await.unwrap();

    for i in 0..10 {
        conn.output("B", &format!("b{i}")).await;
    }
    conn.output("A", "a-live").await;

    // A's output arrives live; B's was held back.
    let event = wait_for(&mut events, |e| matches!(e, TransportEvent::PtyOutput { .. })).await;
    assert_eq!(
        event,
        TransportEvent::PtyOutput {
            session_id: a.clone(),
            data: "a-live".into()
        }
    );

    transport.attach(&b).await.unwrap();
    conn.output("B", "b-live").await;

    let mut received = Vec::new();
    while received.last().map(String::as_str) != Some("b-live") {
        if let TransportEvent::PtyOutput { session_id, data } = next_event(&mut events).await {
            assert_eq!(session_id, b);
            received.push(data);
        }
    }
    let mut expected: Vec<String> = (0..10).map(|i| format!("b{i}")).collect();
    expected.push("b-live".into());
    assert_eq!(received, expected);

    // A is detached now, so its output waits.
    conn.output("A", "a-later").await;
    conn.output("B", "b-fence").await;
    wait_for(&mut events, |e| {
        matches!(e, TransportEvent::PtyOutput { data, .. } if data == "b-fence")
    })
    .await;
    let sessions = transport.sessions().await.unwrap();
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0].session_id, a);
    assert_eq!(sessions[0].buffered_chunks, 1);
    assert!(sessions[1].attached);
}

#[tokio::test]
async fn creation_acks_match_by_request_id() {
    let mut host = MockHost::start().await;
    let (transport, _events, mut conn) = connected(&mut host).await;

    let narrow = SessionOptions {
        cols: 100,
        ..Default::default()
    };
    let wide = SessionOptions {
        cols: 200,
        ..Default::default()
    };
    let (first, second, ()) = tokio::join!(
        transport.create_session(narrow),
        transport.create_session(wide),
        async {
            let r1 = conn.recv().await;
            let r2 = conn.recv().await;
            // Answer out of order.
            for req in [r2, r1] {
                conn.send(json!({
                    "type": "session_created",
                    "sessionId": format!("s-{}", req["cols"]),
                    "requestId": req["requestId"],
                }))
                .await;
            }
        }
    );
    assert_eq!(first.unwrap().as_str(), "s-100");
    assert_eq!(second.unwrap().as_str(), "s-200");
}

#[tokio::test]
async fn input_is_sanitized_before_it_reaches_the_wire() {
    let mut host = MockHost::start().await;
    let (transport, _events, mut conn) = connected(&mut host).await;
    let a = create(&transport, &mut conn, "A").await;

    transport
        .send_input(&a, "ls -la; whoami\n", InputMode::Sanitized)
        .await
        .unwrap();
    let frame = conn.recv().await;
    assert_eq!(
        frame,
        json!({"type": "pty_input", "sessionId": "A", "data": "ls -la whoami\n"})
    );

    let err = transport
        .send_input(&a, "rm -rf /\n", InputMode::Sanitized)
        .await
        .unwrap_err();
    assert!(err.is_security());

    transport.execute(&a, "pwd").await.unwrap();
    let frame = conn.recv().await;
    assert_eq!(frame, json!({"type": "command", "sessionId": "A", "command": "pwd"}));

    transport
        .send_input(&a, "\u{3}", InputMode::Raw)
        .await
        .unwrap();
    let frame = conn.recv().await;
    assert_eq!(frame["data"], "\u{3}");

    let audit = transport.audit_log();
    assert_eq!(audit.len(), 3);
    assert!(audit[1].blocked);
}

#[tokio::test]
async fn resizes_sent_together_are_coalesced() {
    let mut host = MockHost::start().await;
    let (transport, _events, mut conn) = connected(&mut host).await;
    let a = create(&transport, &mut conn, "A").await;

    let (r1, r2, r3) = tokio::join!(
        transport.resize(&a, 100, 30),
        transport.resize(&a, 110, 35),
        transport.resize(&a, 120, 40),
    );
    r1.unwrap();
    r2.unwrap();
    r3.unwrap();
    transport.ping().await.unwrap();

    let frame = conn.recv().await;
    assert_eq!(
        frame,
        json!({"type": "session_resize", "sessionId": "A", "cols": 120, "rows": 40})
    );
    assert_eq!(conn.recv().await["type"], "ping");
}

#[tokio::test]
async fn reconnects_after_the_socket_drops() {
    let mut host = MockHost::start().await;
    let (transport, mut events, mut conn) = connected(&mut host).await;
    create(&transport, &mut conn, "A").await;

    conn.ws.close(None).await.unwrap();
    let mut second = host.accept().await;
    second.ack().await;

    wait_for(&mut events, |e| matches!(e, TransportEvent::Reconnected { .. })).await;
    assert_eq!(transport.state().await.unwrap(), ConnectionState::Open);
    // Sessions survive a recovered connection.
    assert_eq!(transport.sessions().await.unwrap().len(), 1);

    transport.ping().await.unwrap();
    assert_eq!(second.recv().await["type"], "ping");
}

#[tokio::test]
async fn reconnect_events_follow_the_lifecycle() {
    let mut host = MockHost::start().await;
    let (transport, mut events, mut conn) = connected(&mut host).await;

    conn.ws.close(None).await.unwrap();
    let mut second = host.accept().await;
    second.ack().await;

    let mut names = Vec::new();
    while names.last() != Some(&"reconnected") {
        let event = next_event(&mut events).await;
        if event.name() != "message" {
            names.push(event.name());
        }
    }
    assert_eq!(
        names,
        vec!["connecting", "connected", "disconnected", "reconnecting", "connecting", "reconnected"]
    );

    transport.disconnect().await.unwrap();
    assert_eq!(drain_names(&mut events), vec!["disconnected"]);
}

#[tokio::test]
async fn gives_up_after_the_attempt_ceiling() {
    // Grab a port nobody listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);

    let mut config = config(&url);
    config.reconnect.max_attempts = Some(2);
    config.reconnect.base_delay_ms = 5;
    let (transport, mut events) = SessionTransport::new(config).unwrap();

    let err = timeout(WAIT, transport.connect()).await.unwrap().unwrap_err();
    assert!(matches!(err, LinkError::Transport(_)));
    assert_eq!(transport.state().await.unwrap(), ConnectionState::Closed);

    let names = drain_names(&mut events);
    assert_eq!(
        names,
        vec!["connecting", "reconnecting", "connecting", "reconnecting", "connecting", "error"]
    );
}

#[tokio::test]
async fn double_disconnect_is_quiet() {
    let mut host = MockHost::start().await;
    let (transport, mut events, _conn) = connected(&mut host).await;
    drain_names(&mut events);

    transport.disconnect().await.unwrap();
    transport.disconnect().await.unwrap();

    assert_eq!(drain_names(&mut events), vec!["disconnected"]);
    assert_eq!(transport.state().await.unwrap(), ConnectionState::Closed);
    assert!(matches!(
        transport.ping().await,
        Err(LinkError::NotConnected)
    ));
}

#[tokio::test]
async fn remote_exit_keeps_the_session_until_closed() {
    let mut host = MockHost::start().await;
    let (transport, mut events, mut conn) = connected(&mut host).await;
    let a = create(&transport, &mut conn, "A").await;

    conn.send(json!({"type": "session_closed", "sessionId": "A", "exitCode": 3}))
        .await;
    let event = wait_for(&mut events, |e| e.name() == "session_closed").await;
    assert_eq!(
        event,
        TransportEvent::SessionClosed {
            session_id: a.clone(),
            exit_code: Some(3),
            signal: None
        }
    );

    let err = transport
        .send_input(&a, "ls\n", InputMode::Sanitized)
        .await
        .unwrap_err();
    assert!(matches!(err, LinkError::SessionClosed(_)));
    assert_eq!(transport.sessions().await.unwrap()[0].exit_code, Some(3));

    // Closing an exited session is local: no frame, no event.
    transport.close_session(&a).await.unwrap();
    transport.close_session(&a).await.unwrap();
    assert!(transport.sessions().await.unwrap().is_empty());
    assert!(drain_names(&mut events).is_empty());

    transport.ping().await.unwrap();
    assert_eq!(conn.recv().await["type"], "ping");
}

#[tokio::test]
async fn close_waits_for_the_host() {
    let mut host = MockHost::start().await;
    let (transport, mut events, mut conn) = connected(&mut host).await;
    let b = create(&transport, &mut conn, "B").await;

    let (result, ()) = tokio::join!(transport.close_session(&b), async {
        let req = conn.recv().await;
        assert_eq!(req, json!({"type": "session_close", "sessionId": "B"}));
        conn.send(json!({"type": "session_closed", "sessionId": "B", "exitCode": 0}))
            .await;
    });
    result.unwrap();
    assert!(transport.sessions().await.unwrap().is_empty());

    let closed: Vec<_> = drain_names(&mut events)
        .into_iter()
        .filter(|n| *n == "session_closed")
        .collect();
    assert_eq!(closed.len(), 1);
}

#[tokio::test]
async fn malformed_and_unknown_frames_are_dropped() {
    let mut host = MockHost::start().await;
    let (transport, mut events, mut conn) = connected(&mut host).await;
    let a = create(&transport, &mut conn, "A").await;
    transport.attach(&a).await.unwrap();

    conn.send_raw("not json").await;
    conn.send(json!({"type": "mystery", "sessionId": "A"})).await;
    conn.send(json!({"sessionId": "A"})).await;
    conn.output("A", "still here").await;

    let event = wait_for(&mut events, |e| matches!(e, TransportEvent::PtyOutput { .. })).await;
    assert_eq!(
        event,
        TransportEvent::PtyOutput {
            session_id: a,
            data: "still here".into()
        }
    );
    assert_eq!(transport.state().await.unwrap(), ConnectionState::Open);
}

#[tokio::test]
async fn host_messages_become_session_events() {
    let mut host = MockHost::start().await;
    let (transport, mut events, mut conn) = connected(&mut host).await;
    create(&transport, &mut conn, "A").await;
    drain_names(&mut events);

    conn.send(json!({"type": "command_result", "sessionId": "A", "output": "ok", "exitCode": 0}))
        .await;
    conn.send(json!({"type": "error", "sessionId": "A", "message": "denied"}))
        .await;
    conn.send(json!({"type": "pong", "id": 7})).await;

    let mut names = Vec::new();
    while names.len() < 6 {
        let event = next_event(&mut events).await;
        if matches!(
            event.name(),
            "session:command_result" | "session:error" | "session:pong" | "message"
        ) && event.session_id().map_or(true, |id| id.as_str() == "A")
        {
            names.push(event.name());
        }
    }
    assert_eq!(
        names,
        vec![
            "session:command_result",
            "message",
            "session:error",
            "message",
            "session:pong",
            "message"
        ]
    );
}

#[tokio::test]
async fn fs_requests_pass_their_payload_through() {
    let mut host = MockHost::start().await;
    let (transport, _events, mut conn) = connected(&mut host).await;

    let mut body = serde_json::Map::new();
    body.insert("path".into(), json!("/srv/app.log"));
    body.insert("offset".into(), json!(128));
    transport
        .fs_request(
            FsOp::Read,
            FsPayload {
                session_id: Some(SessionId::new("A")),
                body,
            },
        )
        .await
        .unwrap();

    assert_eq!(
        conn.recv().await,
        json!({"type": "fs_read", "sessionId": "A", "path": "/srv/app.log", "offset": 128})
    );
}
