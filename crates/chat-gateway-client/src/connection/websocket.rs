//! `tokio-tungstenite` transport

use super::{Connection, ConnectionError};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex as SyncMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport for the real gateway
///
/// Reads and writes go through separate halves so a heartbeat can be written
/// while the reader is parked on the next frame.
pub struct WebSocketConnection {
    sink: Mutex<Option<SplitSink<Socket, Message>>>,
    stream: Mutex<Option<SplitStream<Socket>>>,
    /// Cancelled by `close` to release a parked `receive`
    closing: SyncMutex<CancellationToken>,
    disconnected: AtomicBool,
}

impl WebSocketConnection {
    #[must_use]
    pub fn new() -> Self {
        let closing = CancellationToken::new();
        closing.cancel();
        Self {
            sink: Mutex::new(None),
            stream: Mutex::new(None),
            closing: SyncMutex::new(closing),
            disconnected: AtomicBool::new(true),
        }
    }

    fn mark_disconnected(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }
}

impl Default for WebSocketConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WebSocketConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketConnection")
            .field("disconnected", &self.is_disconnected())
            .finish()
    }
}

#[async_trait]
impl Connection for WebSocketConnection {
    async fn open(
        &self,
        endpoint: &str,
        headers: &[(String, String)],
    ) -> Result<(), ConnectionError> {
        let mut request = endpoint
            .into_client_request()
            .map_err(|e| ConnectionError::Connect(e.to_string()))?;
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ConnectionError::Connect(e.to_string()))?;
            let value =
                HeaderValue::from_str(value).map_err(|e| ConnectionError::Connect(e.to_string()))?;
            request.headers_mut().insert(name, value);
        }

        let (socket, _response) = connect_async(request)
            .await
            .map_err(|e| ConnectionError::Connect(e.to_string()))?;
        let (sink, stream) = socket.split();

        *self.sink.lock().await = Some(sink);
        *self.stream.lock().await = Some(stream);
        *self.closing.lock() = CancellationToken::new();
        self.disconnected.store(false, Ordering::SeqCst);

        tracing::debug!(endpoint, "WebSocket opened");
        Ok(())
    }

    async fn send(&self, frame: String) -> Result<(), ConnectionError> {
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(ConnectionError::Closed { code: None })?;
        sink.send(Message::Text(frame)).await.map_err(|e| {
            self.mark_disconnected();
            ConnectionError::Transport(e.to_string())
        })
    }

    async fn receive(&self) -> Result<Vec<u8>, ConnectionError> {
        let closing = self.closing.lock().clone();
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(ConnectionError::Closed { code: None })?;

        loop {
            let next = tokio::select! {
                () = closing.cancelled() => return Err(ConnectionError::Closed { code: None }),
                next = stream.next() => next,
            };

            match next {
                Some(Ok(Message::Text(text))) => return Ok(text.into_bytes()),
                Some(Ok(Message::Binary(bytes))) => return Ok(bytes),
                Some(Ok(Message::Close(frame))) => {
                    self.mark_disconnected();
                    let code = frame.map(|f| u16::from(f.code));
                    return Err(ConnectionError::Closed { code });
                }
                // Ping/pong are answered by tungstenite
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    self.mark_disconnected();
                    return Err(ConnectionError::Transport(e.to_string()));
                }
                None => {
                    self.mark_disconnected();
                    return Err(ConnectionError::Closed { code: None });
                }
            }
        }
    }

    async fn close(&self) -> Result<(), ConnectionError> {
        self.closing.lock().cancel();
        self.mark_disconnected();

        let sink = self.sink.lock().await.take();
        self.stream.lock().await.take();

        match sink {
            Some(mut sink) => sink
                .close()
                .await
                .map_err(|e| ConnectionError::Transport(e.to_string())),
            None => Ok(()),
        }
    }

    fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}
