//! STOMP 1.2 over WebSocket, the broker protocol the chat backend speaks.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{stream::SplitSink, SinkExt, StreamExt};
use tokio::{
    net::TcpStream,
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::{
    channel_session::{
        ChannelConnection, ChannelConnector, ChannelTransport, SubscriptionHandle, TransportEvent,
    },
    config::ClientSettings,
    error::{is_auth_failure_message, ClientError, ClientResult},
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompFrame {
    pub command: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl StompFrame {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value wins when a header repeats.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn escapes_headers(&self) -> bool {
        self.command != "CONNECT" && self.command != "CONNECTED"
    }

    pub fn encode(&self) -> String {
        let escape = self.escapes_headers();
        let mut out = String::with_capacity(self.command.len() + self.body.len() + 64);
        out.push_str(&self.command);
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        if !self.body.is_empty() && self.get("content-length").is_none() {
            out.push_str(&format!("content-length:{}\n", self.body.len()));
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Returns `Ok(None)` for heart-beat payloads made only of EOLs.
    pub fn decode(raw: &str) -> ClientResult<Option<StompFrame>> {
        let raw = raw.trim_start_matches(['\r', '\n']);
        if raw.is_empty() || raw == "\0" {
            return Ok(None);
        }

        let (head, rest) = split_head(raw)
            .ok_or_else(|| ClientError::Transport("stomp frame missing header terminator".into()))?;
        let mut lines = head.lines();
        let command = lines
            .next()
            .map(|line| line.trim_end_matches('\r').to_string())
            .filter(|command| !command.is_empty())
            .ok_or_else(|| ClientError::Transport("stomp frame missing command".into()))?;

        let mut frame = StompFrame::new(command);
        let unescape = frame.escapes_headers();
        for line in lines {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            let (name, value) = line.split_once(':').ok_or_else(|| {
                ClientError::Transport(format!("malformed stomp header line: {line}"))
            })?;
            if unescape {
                frame
                    .headers
                    .push((unescape_header(name)?, unescape_header(value)?));
            } else {
                frame.headers.push((name.to_string(), value.to_string()));
            }
        }

        let body = match frame
            .get("content-length")
            .and_then(|len| len.trim().parse::<usize>().ok())
        {
            Some(len) => rest.get(..len).ok_or_else(|| {
                ClientError::Transport(format!("stomp body shorter than content-length {len}"))
            })?,
            None => rest.split('\0').next().unwrap_or_default(),
        };
        frame.body = body.to_string();
        Ok(Some(frame))
    }
}

fn split_head(raw: &str) -> Option<(&str, &str)> {
    let lf = raw.find("\n\n").map(|at| (at, 2));
    let crlf = raw.find("\r\n\r\n").map(|at| (at, 4));
    let (at, len) = match (lf, crlf) {
        (Some(a), Some(b)) => {
            if a.0 <= b.0 {
                a
            } else {
                b
            }
        }
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => return None,
    };
    Some((&raw[..at], &raw[at + len..]))
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(raw: &str) -> ClientResult<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(ClientError::Transport(format!(
                    "invalid stomp header escape: \\{}",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}

fn join_destination(prefix: &str, path: &str) -> String {
    format!(
        "{}/{}",
        prefix.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Opens STOMP sessions on the backend's WebSocket endpoint.
pub struct StompConnector {
    ws_url: Url,
    topic_prefix: String,
    app_prefix: String,
}

impl StompConnector {
    pub fn new(settings: &ClientSettings) -> ClientResult<Self> {
        Ok(Self {
            ws_url: settings.ws_url()?,
            topic_prefix: settings.topic_prefix.clone(),
            app_prefix: settings.app_prefix.clone(),
        })
    }

    fn host(&self) -> String {
        self.ws_url.host_str().unwrap_or("localhost").to_string()
    }
}

#[async_trait]
impl ChannelConnector for StompConnector {
    async fn connect(&self, auth_token: &str) -> ClientResult<ChannelConnection> {
        let (ws_stream, _) = connect_async(self.ws_url.as_str())
            .await
            .map_err(|err| map_ws_connect_error(&self.ws_url, err))?;
        let (mut writer, mut reader) = ws_stream.split();

        let connect = StompFrame::new("CONNECT")
            .header("accept-version", "1.2")
            .header("host", self.host())
            .header("heart-beat", "0,0")
            .header("Authorization", format!("Bearer {auth_token}"));
        writer
            .send(Message::Text(connect.encode()))
            .await
            .map_err(|err| ClientError::ChannelHandshakeFailed(err.to_string()))?;

        loop {
            let message = match reader.next().await {
                Some(Ok(message)) => message,
                Some(Err(err)) => return Err(ClientError::ChannelHandshakeFailed(err.to_string())),
                None => {
                    return Err(ClientError::ChannelHandshakeFailed(
                        "broker closed the connection during handshake".into(),
                    ))
                }
            };
            let Some(frame) = frame_from_message(message)? else {
                continue;
            };
            match frame.command.as_str() {
                "CONNECTED" => {
                    debug!(
                        version = frame.get("version").unwrap_or("1.2"),
                        "stomp: connected"
                    );
                    break;
                }
                "ERROR" => {
                    let reason = error_reason(&frame);
                    let _ = writer.close().await;
                    return Err(if is_auth_failure_message(&reason) {
                        ClientError::AuthRejected(reason)
                    } else {
                        ClientError::ChannelHandshakeFailed(reason)
                    });
                }
                other => debug!(command = other, "stomp: ignoring frame before CONNECTED"),
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let reader_task = tokio::spawn(async move {
            while let Some(message) = reader.next().await {
                let message = match message {
                    Ok(message) => message,
                    Err(err) => {
                        let _ = tx.send(TransportEvent::Error(format!(
                            "websocket receive failed: {err}"
                        )));
                        break;
                    }
                };
                if matches!(message, Message::Close(_)) {
                    break;
                }
                let frame = match frame_from_message(message) {
                    Ok(Some(frame)) => frame,
                    Ok(None) => continue,
                    Err(err) => {
                        warn!("stomp: undecodable frame: {err}");
                        continue;
                    }
                };
                let event = match frame.command.as_str() {
                    "MESSAGE" => TransportEvent::Message {
                        subscription_id: frame.get("subscription").unwrap_or_default().to_string(),
                        destination: frame.get("destination").unwrap_or_default().to_string(),
                        body: frame.body,
                    },
                    "ERROR" => TransportEvent::Error(error_reason(&frame)),
                    "RECEIPT" => continue,
                    other => {
                        debug!(command = other, "stomp: unexpected frame");
                        continue;
                    }
                };
                if tx.send(event).is_err() {
                    return;
                }
            }
            let _ = tx.send(TransportEvent::Closed);
        });

        info!(url = %self.ws_url, "stomp: session established");
        Ok(ChannelConnection {
            transport: Arc::new(StompTransport {
                writer: Mutex::new(writer),
                reader_task: Mutex::new(Some(reader_task)),
                topic_prefix: self.topic_prefix.clone(),
                app_prefix: self.app_prefix.clone(),
            }),
            inbound: rx,
        })
    }
}

pub struct StompTransport {
    writer: Mutex<SplitSink<WsStream, Message>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    topic_prefix: String,
    app_prefix: String,
}

impl StompTransport {
    async fn send_frame(&self, frame: StompFrame) -> ClientResult<()> {
        self.writer
            .lock()
            .await
            .send(Message::Text(frame.encode()))
            .await
            .map_err(|err| ClientError::Transport(err.to_string()))
    }
}

#[async_trait]
impl ChannelTransport for StompTransport {
    async fn subscribe(&self, topic: &str) -> ClientResult<SubscriptionHandle> {
        let subscription = SubscriptionHandle {
            id: format!("sub-{}", Uuid::new_v4()),
            topic: topic.to_string(),
        };
        self.send_frame(
            StompFrame::new("SUBSCRIBE")
                .header("id", subscription.id.clone())
                .header("destination", join_destination(&self.topic_prefix, topic))
                .header("ack", "auto"),
        )
        .await?;
        Ok(subscription)
    }

    async fn unsubscribe(&self, subscription: &SubscriptionHandle) -> ClientResult<()> {
        self.send_frame(StompFrame::new("UNSUBSCRIBE").header("id", subscription.id.clone()))
            .await
    }

    async fn publish(&self, destination: &str, body: String) -> ClientResult<()> {
        self.send_frame(
            StompFrame::new("SEND")
                .header("destination", join_destination(&self.app_prefix, destination))
                .header("content-type", "application/json")
                .with_body(body),
        )
        .await
    }

    async fn disconnect(&self) -> ClientResult<()> {
        let result = self
            .send_frame(
                StompFrame::new("DISCONNECT").header("receipt", Uuid::new_v4().to_string()),
            )
            .await;
        let close = self.writer.lock().await.close().await;
        if let Some(task) = self.reader_task.lock().await.take() {
            task.abort();
        }
        result?;
        close.map_err(|err| ClientError::Transport(err.to_string()))
    }
}

fn frame_from_message(message: Message) -> ClientResult<Option<StompFrame>> {
    match message {
        Message::Text(text) => StompFrame::decode(&text),
        Message::Binary(bytes) => {
            let text = String::from_utf8(bytes)
                .map_err(|err| ClientError::Transport(format!("non-utf8 stomp frame: {err}")))?;
            StompFrame::decode(&text)
        }
        _ => Ok(None),
    }
}

fn error_reason(frame: &StompFrame) -> String {
    match (frame.get("message"), frame.body.trim()) {
        (Some(message), "") => message.to_string(),
        (Some(message), body) => format!("{message}: {body}"),
        (None, "") => "broker reported an error".to_string(),
        (None, body) => body.to_string(),
    }
}

fn map_ws_connect_error(url: &Url, err: tungstenite::Error) -> ClientError {
    if let tungstenite::Error::Http(response) = &err {
        let status = response.status().as_u16();
        if status == 401 || status == 403 {
            return ClientError::AuthRejected(format!("websocket upgrade refused with {status}"));
        }
    }
    ClientError::ChannelHandshakeFailed(format!("failed to connect websocket {url}: {err}"))
}

#[cfg(test)]
#[path = "tests/stomp_tests.rs"]
mod tests;
