use crate::application::duplex::{FrameSender, FrameSource};
use crate::domain::entities::Frame;
use crate::domain::errors::ConnectionError;
use crate::domain::socket_io::{
    Packet, SocketIoAction, SocketIoReport, endpoint, format_duration, normalize_namespace,
};
use crate::domain::value_objects::{KeyValuePairs, WsUrl};
use crate::infrastructure::websocket::{WebSocketConnection, WebSocketReader, WebSocketSettings};

use serde_json::{Value, json};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::{Instant, timeout_at};
use tracing::debug;

/// A Socket.IO client joined to one namespace
///
/// Engine.IO pings are answered while the client waits on the server, so
/// a long `listen` keeps the connection alive.
pub struct SocketIoClient {
    connection: WebSocketConnection,
    reader: WebSocketReader,
    namespace: String,
    server: WsUrl,
    connected: bool,
}

impl SocketIoClient {
    /// Opens the WebSocket transport and waits until the server accepts the
    /// namespace join, bounded by the connect timeout
    pub async fn connect(
        server: &WsUrl,
        headers: &KeyValuePairs,
        params: &KeyValuePairs,
        namespace: &str,
        settings: &WebSocketSettings,
    ) -> Result<Self, ConnectionError> {
        let target =
            endpoint(server, params).map_err(|e| ConnectionError::connect(server.as_str(), e))?;
        let mut connection =
            WebSocketConnection::open(&target, headers, &KeyValuePairs::default(), settings).await?;
        let Some(reader) = connection.take_reader() else {
            connection.close().await;
            return Err(ConnectionError::connect(target.as_str(), "reader already taken"));
        };

        let mut client = Self {
            connection,
            reader,
            namespace: normalize_namespace(namespace),
            server: server.clone(),
            connected: false,
        };
        if let Err(err) = client.join(settings.connect_timeout).await {
            client.connection.close().await;
            return Err(err);
        }
        Ok(client)
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    async fn join(&mut self, wait: Duration) -> Result<(), ConnectionError> {
        let namespace = self.namespace.clone();
        self.send(Packet::Connect { namespace: namespace.clone(), payload: None }).await?;

        let deadline = Instant::now() + wait;
        loop {
            let frame = timeout_at(deadline, self.reader.receive())
                .await
                .map_err(|_| {
                    ConnectionError::connect(self.server.as_str(), "no namespace acknowledgement")
                })??;
            match Packet::decode(&frame.into_inner()) {
                Packet::Connect { namespace: joined, .. } if joined == namespace => {
                    debug!(%namespace, "socket.io namespace joined");
                    self.connected = true;
                    return Ok(());
                }
                Packet::ConnectError { message, .. } => {
                    return Err(ConnectionError::connect(self.server.as_str(), message));
                }
                Packet::Ping => self.send(Packet::Pong).await?,
                other => debug!(packet = ?other, "ignored while joining"),
            }
        }
    }

    pub async fn emit(&mut self, event: &str, data: Option<Value>) -> Result<(), ConnectionError> {
        let packet = Packet::event(&self.namespace, event, data);
        self.send(packet).await
    }

    /// Payloads of every `event` received before `duration` elapses or the
    /// server ends the session. An event with one argument yields that
    /// argument; otherwise its arguments as an array.
    pub async fn listen(
        &mut self,
        event: &str,
        duration: Duration,
    ) -> Result<Vec<Value>, ConnectionError> {
        let deadline = Instant::now() + duration;
        let mut received = Vec::new();
        loop {
            let frame = match timeout_at(deadline, self.reader.receive()).await {
                Err(_) => break,
                Ok(Ok(frame)) => frame,
                Ok(Err(err)) if err.is_closed() => {
                    self.connected = false;
                    break;
                }
                Ok(Err(err)) => return Err(err),
            };
            match Packet::decode(&frame.into_inner()) {
                Packet::Event { namespace, name, args }
                    if namespace == self.namespace && name == event =>
                {
                    let value = if args.len() == 1 {
                        args.into_iter().next().unwrap_or_default()
                    } else {
                        Value::Array(args)
                    };
                    received.push(value);
                }
                Packet::Ping => self.send(Packet::Pong).await?,
                Packet::Disconnect { namespace } if namespace == self.namespace => {
                    self.connected = false;
                    break;
                }
                Packet::Close => {
                    self.connected = false;
                    break;
                }
                _ => {}
            }
        }
        Ok(received)
    }

    /// Runs `action` and describes what happened
    pub async fn perform(
        &mut self,
        action: &SocketIoAction,
    ) -> Result<SocketIoReport, ConnectionError> {
        let url = self.server.to_string();
        let timestamp = unix_timestamp();
        let (event, data) = match action {
            SocketIoAction::Connect => (
                "connect".to_string(),
                json!({ "url": url, "timestamp": timestamp }),
            ),
            SocketIoAction::Emit { event, data } => {
                self.emit(event, data.clone()).await?;
                (
                    event.clone(),
                    json!({ "event": event, "data": data, "url": url, "timestamp": timestamp }),
                )
            }
            SocketIoAction::Listen { event, duration } => {
                let messages = self.listen(event, *duration).await?;
                let count = messages.len();
                (
                    event.clone(),
                    json!({
                        "event": event,
                        "messages": messages,
                        "message_count": count,
                        "listen_duration": format_duration(*duration),
                        "url": url,
                        "timestamp": timestamp,
                    }),
                )
            }
        };
        Ok(SocketIoReport { event, connected: self.connected, data })
    }

    /// Leaves the namespace and closes the transport
    pub async fn close(mut self) {
        if self.connected {
            let namespace = self.namespace.clone();
            if let Err(err) = self.send(Packet::Disconnect { namespace }).await {
                debug!(error = %err, "socket.io disconnect not delivered");
            }
        }
        self.connection.close().await;
    }

    async fn send(&mut self, packet: Packet) -> Result<(), ConnectionError> {
        self.connection.send(Frame::new(packet.encode())).await
    }
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
