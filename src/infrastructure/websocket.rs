use crate::application::duplex::{FrameSender, FrameSource};
use crate::domain::entities::Frame;
use crate::domain::errors::ConnectionError;
use crate::domain::value_objects::{KeyValuePairs, WsUrl};

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Timeouts applied by [`WebSocketConnection`]
#[derive(Debug, Clone, Copy)]
pub struct WebSocketSettings {
    pub connect_timeout: Duration,
    pub send_timeout: Duration,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(5),
        }
    }
}

/// One open WebSocket connection
///
/// The handle itself is the writer. The reader half is handed out once
/// through [`take_reader`](Self::take_reader); both observe the same
/// shutdown token, so [`close`](FrameSender::close) wakes a pending read.
pub struct WebSocketConnection {
    target: WsUrl,
    response_headers: Vec<(String, String)>,
    writer: SplitSink<WsStream, Message>,
    reader: Option<WebSocketReader>,
    shutdown: CancellationToken,
    send_timeout: Duration,
    closed: bool,
}

impl WebSocketConnection {
    /// Performs the upgrade handshake with `headers` attached and `params`
    /// appended to the query string
    pub async fn open(
        target: &WsUrl,
        headers: &KeyValuePairs,
        params: &KeyValuePairs,
        settings: &WebSocketSettings,
    ) -> Result<Self, ConnectionError> {
        let target = target.with_query(params);
        let url = target.as_str();

        let mut request = url
            .into_client_request()
            .map_err(|e| ConnectionError::connect(url, e))?;
        for (key, value) in headers.iter() {
            let invalid = |e: &dyn std::fmt::Display| {
                ConnectionError::connect(url, format!("invalid header '{}': {}", key, e))
            };
            let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| invalid(&e))?;
            let value = HeaderValue::from_str(value).map_err(|e| invalid(&e))?;
            request.headers_mut().insert(name, value);
        }

        debug!(%url, "opening websocket");
        let (stream, response) = timeout(settings.connect_timeout, connect_async(request))
            .await
            .map_err(|_| {
                let reason = format!("timed out after {:?}", settings.connect_timeout);
                ConnectionError::connect(url, reason)
            })?
            .map_err(|e| ConnectionError::connect(url, e))?;

        let response_headers = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
            .collect();
        debug!(%url, status = %response.status(), "websocket connected");

        let (writer, stream) = stream.split();
        let shutdown = CancellationToken::new();
        Ok(Self {
            target,
            response_headers,
            writer,
            reader: Some(WebSocketReader { stream, shutdown: shutdown.clone() }),
            shutdown,
            send_timeout: settings.send_timeout,
            closed: false,
        })
    }

    /// The reader half; `None` once it has been taken
    pub fn take_reader(&mut self) -> Option<WebSocketReader> {
        self.reader.take()
    }

    pub fn target(&self) -> &WsUrl {
        &self.target
    }

    /// Headers of the server's upgrade response
    pub fn response_headers(&self) -> &[(String, String)] {
        &self.response_headers
    }
}

#[async_trait]
impl FrameSender for WebSocketConnection {
    async fn send(&mut self, frame: Frame) -> Result<(), ConnectionError> {
        if self.closed {
            return Err(ConnectionError::Closed(None));
        }
        let message = Message::Text(frame.into_inner());
        match timeout(self.send_timeout, self.writer.send(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(write_error(e)),
            Err(_) => Err(ConnectionError::Send(format!(
                "timed out after {:?}",
                self.send_timeout
            ))),
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.shutdown.cancel();

        match timeout(self.send_timeout, self.writer.close()).await {
            Ok(Ok(())) => debug!(url = %self.target, "websocket closed"),
            Ok(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {}
            Ok(Err(e)) => warn!(error = %e, "error while closing websocket"),
            Err(_) => warn!("timed out sending close frame"),
        }
    }
}

/// Reader half of a [`WebSocketConnection`]
pub struct WebSocketReader {
    stream: SplitStream<WsStream>,
    shutdown: CancellationToken,
}

#[async_trait]
impl FrameSource for WebSocketReader {
    async fn receive(&mut self) -> Result<Frame, ConnectionError> {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Err(ConnectionError::Closed(None)),
                next = self.stream.next() => next,
            };

            match next {
                Some(Ok(Message::Text(text))) => return Ok(Frame::new(text)),
                Some(Ok(Message::Binary(bytes))) => {
                    return Ok(Frame::new(String::from_utf8_lossy(&bytes).into_owned()));
                }
                Some(Ok(Message::Close(close))) => {
                    let reason = close
                        .map(|c| c.reason.to_string())
                        .filter(|r| !r.is_empty());
                    return Err(ConnectionError::Closed(reason));
                }
                // ping/pong are answered by the transport
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(read_error(e)),
                None => return Err(ConnectionError::Closed(None)),
            }
        }
    }
}

fn write_error(err: WsError) -> ConnectionError {
    match err {
        WsError::ConnectionClosed | WsError::AlreadyClosed => ConnectionError::Closed(None),
        other => ConnectionError::Send(other.to_string()),
    }
}

fn read_error(err: WsError) -> ConnectionError {
    match err {
        WsError::ConnectionClosed | WsError::AlreadyClosed => ConnectionError::Closed(None),
        other => ConnectionError::Receive(other.to_string()),
    }
}
