use super::*;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use std::time::Duration;
use tokio::{net::TcpListener, time::timeout};

const GOOD_TOKEN: &str = "jwt-abc";

#[derive(Clone, Default)]
struct BrokerLog {
    frames: Arc<Mutex<Vec<StompFrame>>>,
}

impl BrokerLog {
    async fn commands(&self) -> Vec<String> {
        self.frames
            .lock()
            .await
            .iter()
            .map(|frame| frame.command.clone())
            .collect()
    }

    async fn find(&self, command: &str) -> Option<StompFrame> {
        self.frames
            .lock()
            .await
            .iter()
            .find(|frame| frame.command == command)
            .cloned()
    }
}

async fn handle_upgrade(ws: WebSocketUpgrade, State(log): State<BrokerLog>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_broker(socket, log))
}

/// Minimal broker: checks the bearer token, then echoes every SEND back to
/// the most recent subscription.
async fn run_broker(mut socket: WebSocket, log: BrokerLog) {
    let mut subscription: Option<(String, String)> = None;
    while let Some(Ok(message)) = socket.recv().await {
        let WsMessage::Text(text) = message else {
            continue;
        };
        let Ok(Some(frame)) = StompFrame::decode(&text) else {
            continue;
        };
        log.frames.lock().await.push(frame.clone());

        let reply = match frame.command.as_str() {
            "CONNECT" => {
                if frame.get("Authorization") == Some(&format!("Bearer {GOOD_TOKEN}")[..]) {
                    Some(StompFrame::new("CONNECTED").header("version", "1.2"))
                } else {
                    let denied = StompFrame::new("ERROR")
                        .header("message", "Access denied: invalid token");
                    let _ = socket.send(WsMessage::Text(denied.encode())).await;
                    return;
                }
            }
            "SUBSCRIBE" => {
                subscription = Some((
                    frame.get("id").unwrap_or_default().to_string(),
                    frame.get("destination").unwrap_or_default().to_string(),
                ));
                None
            }
            "SEND" => subscription.as_ref().map(|(id, destination)| {
                StompFrame::new("MESSAGE")
                    .header("subscription", id.clone())
                    .header("destination", destination.clone())
                    .header("message-id", "m-1")
                    .with_body(frame.body.clone())
            }),
            "DISCONNECT" => {
                let receipt = frame.get("receipt").unwrap_or_default().to_string();
                let _ = socket
                    .send(WsMessage::Text(
                        StompFrame::new("RECEIPT").header("receipt-id", receipt).encode(),
                    ))
                    .await;
                return;
            }
            _ => None,
        };
        if let Some(reply) = reply {
            if socket.send(WsMessage::Text(reply.encode())).await.is_err() {
                return;
            }
        }
    }
}

async fn spawn_broker() -> (ClientSettings, BrokerLog) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let log = BrokerLog::default();
    let app = Router::new()
        .route("/ws/websocket", get(handle_upgrade))
        .with_state(log.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    let settings = ClientSettings {
        server_url: format!("http://{addr}"),
        ..ClientSettings::default()
    };
    (settings, log)
}

async fn next_event(inbound: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
    timeout(Duration::from_secs(2), inbound.recv())
        .await
        .expect("timed out waiting for transport event")
        .expect("transport channel closed")
}

#[test]
fn encodes_send_frame_with_content_length() {
    let frame = StompFrame::new("SEND")
        .header("destination", "/app/chat/7/sendMessage")
        .with_body(r#"{"content":"hi"}"#);

    assert_eq!(
        frame.encode(),
        "SEND\ndestination:/app/chat/7/sendMessage\ncontent-length:16\n\n{\"content\":\"hi\"}\0"
    );
}

#[test]
fn escapes_header_values_except_on_connect() {
    let send = StompFrame::new("SEND").header("note", "a:b\nc\\d");
    assert!(send.encode().contains("note:a\\cb\\nc\\\\d\n"));

    let connect = StompFrame::new("CONNECT").header("host", "localhost:8080");
    assert!(connect.encode().contains("host:localhost:8080\n"));
}

#[test]
fn decodes_message_frame_and_unescapes_headers() {
    let raw = "MESSAGE\r\nsubscription:sub-1\r\ndestination:/topic/rooms/7\r\nnote:x\\cy\r\n\r\n{\"messageId\":1}\0\n";
    let frame = StompFrame::decode(raw).expect("decode").expect("frame");

    assert_eq!(frame.command, "MESSAGE");
    assert_eq!(frame.get("subscription"), Some("sub-1"));
    assert_eq!(frame.get("destination"), Some("/topic/rooms/7"));
    assert_eq!(frame.get("note"), Some("x:y"));
    assert_eq!(frame.body, "{\"messageId\":1}");
}

#[test]
fn content_length_allows_embedded_nul() {
    let raw = "MESSAGE\ncontent-length:3\n\na\0b\0";
    let frame = StompFrame::decode(raw).expect("decode").expect("frame");
    assert_eq!(frame.body, "a\0b");
}

#[test]
fn repeated_header_keeps_first_value() {
    let raw = "MESSAGE\nfoo:first\nfoo:second\n\n\0";
    let frame = StompFrame::decode(raw).expect("decode").expect("frame");
    assert_eq!(frame.get("foo"), Some("first"));
}

#[test]
fn heart_beats_decode_to_nothing() {
    assert_eq!(StompFrame::decode("\n").expect("decode"), None);
    assert_eq!(StompFrame::decode("\r\n\r\n").expect("decode"), None);
}

#[test]
fn rejects_frames_without_header_terminator() {
    let err = StompFrame::decode("MESSAGE\nsubscription:sub-1").expect_err("must fail");
    assert!(matches!(err, ClientError::Transport(_)));
}

#[test]
fn rejects_invalid_header_escape() {
    let err = StompFrame::decode("MESSAGE\nbad:\\t\n\n\0").expect_err("must fail");
    assert!(matches!(err, ClientError::Transport(_)));
}

#[test]
fn joins_prefixes_with_single_slash() {
    assert_eq!(join_destination("/topic", "rooms/7"), "/topic/rooms/7");
    assert_eq!(join_destination("/app/", "/chat/7/sendMessage"), "/app/chat/7/sendMessage");
}

#[tokio::test]
async fn connects_subscribes_and_receives_published_messages() {
    let (settings, log) = spawn_broker().await;
    let connector = StompConnector::new(&settings).expect("connector");

    let ChannelConnection {
        transport,
        mut inbound,
    } = connector.connect(GOOD_TOKEN).await.expect("connect");

    let subscription = transport.subscribe("rooms/7").await.expect("subscribe");
    assert!(subscription.id.starts_with("sub-"));
    assert_eq!(subscription.topic, "rooms/7");

    transport
        .publish("chat/7/sendMessage", r#"{"content":"hello"}"#.to_string())
        .await
        .expect("publish");

    match next_event(&mut inbound).await {
        TransportEvent::Message {
            subscription_id,
            destination,
            body,
        } => {
            assert_eq!(subscription_id, subscription.id);
            assert_eq!(destination, "/topic/rooms/7");
            assert_eq!(body, r#"{"content":"hello"}"#);
        }
        other => panic!("unexpected event {other:?}"),
    }

    let subscribe = log.find("SUBSCRIBE").await.expect("subscribe frame");
    assert_eq!(subscribe.get("destination"), Some("/topic/rooms/7"));
    assert_eq!(subscribe.get("ack"), Some("auto"));
    let send = log.find("SEND").await.expect("send frame");
    assert_eq!(send.get("destination"), Some("/app/chat/7/sendMessage"));
    assert_eq!(send.get("content-type"), Some("application/json"));
    let connect = log.find("CONNECT").await.expect("connect frame");
    assert_eq!(connect.get("accept-version"), Some("1.2"));
}

#[tokio::test]
async fn disconnect_sends_unsubscribe_and_disconnect_frames() {
    let (settings, log) = spawn_broker().await;
    let connector = StompConnector::new(&settings).expect("connector");
    let connection = connector.connect(GOOD_TOKEN).await.expect("connect");

    let subscription = connection.transport.subscribe("rooms/3").await.expect("subscribe");
    connection
        .transport
        .unsubscribe(&subscription)
        .await
        .expect("unsubscribe");
    let _ = connection.transport.disconnect().await;

    timeout(Duration::from_secs(2), async {
        while !log.commands().await.contains(&"DISCONNECT".to_string()) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("broker never saw DISCONNECT");

    let unsubscribe = log.find("UNSUBSCRIBE").await.expect("unsubscribe frame");
    assert_eq!(unsubscribe.get("id"), Some(subscription.id.as_str()));
}

#[tokio::test]
async fn broker_error_with_auth_message_is_auth_rejected() {
    let (settings, _log) = spawn_broker().await;
    let connector = StompConnector::new(&settings).expect("connector");

    let err = connector
        .connect("stale-token")
        .await
        .err()
        .expect("connect must fail");
    assert!(matches!(err, ClientError::AuthRejected(_)), "got {err:?}");
}

#[tokio::test]
async fn unreachable_broker_is_handshake_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let settings = ClientSettings {
        server_url: format!("http://{addr}"),
        ..ClientSettings::default()
    };
    let connector = StompConnector::new(&settings).expect("connector");

    let err = connector
        .connect(GOOD_TOKEN)
        .await
        .err()
        .expect("connect must fail");
    assert!(
        matches!(err, ClientError::ChannelHandshakeFailed(_)),
        "got {err:?}"
    );
}
