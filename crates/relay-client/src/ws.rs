//! WebSocket transport built on tokio-tungstenite.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};
use url::Url;

use crate::config::DEFAULT_CONNECT_TIMEOUT;
use crate::error::Error;
use crate::session::{Fragment, SessionState, Transport, TransportSession};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CONNECTING: u8 = 0;
const OPEN: u8 = 1;
const CLOSING: u8 = 2;
const CLOSED: u8 = 3;

/// Opens relay sessions over ws:// or wss://.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    connect_timeout: Duration,
}

impl WebSocketTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, url: &Url) -> Result<Arc<dyn TransportSession>, Error> {
        info!(relay = %url, "Opening WebSocket");

        let (stream, _response) = timeout(self.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| Error::Timeout(self.connect_timeout))??;

        let (sink, stream) = stream.split();
        Ok(Arc::new(WebSocketSession {
            sink: Arc::new(Mutex::new(sink)),
            stream: Mutex::new(stream),
            state: AtomicU8::new(OPEN),
        }))
    }
}

/// One WebSocket connection.
pub struct WebSocketSession {
    sink: Arc<Mutex<SplitSink<WsStream, Message>>>,
    stream: Mutex<SplitStream<WsStream>>,
    state: AtomicU8,
}

impl WebSocketSession {
    fn set_state(&self, state: u8) {
        self.state.store(state, Ordering::SeqCst);
    }
}

#[async_trait]
impl TransportSession for WebSocketSession {
    fn state(&self) -> SessionState {
        match self.state.load(Ordering::SeqCst) {
            CONNECTING => SessionState::Connecting,
            OPEN => SessionState::Open,
            CLOSING => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }

    async fn send_text(&self, text: &str) -> Result<(), Error> {
        if self.state() != SessionState::Open {
            return Err(Error::Transport("session is not open".to_string()));
        }

        let mut sink = self.sink.lock().await;
        if let Err(err) = sink.send(Message::Text(text.to_string().into())).await {
            self.set_state(CLOSED);
            return Err(err.into());
        }
        Ok(())
    }

    async fn receive(&self) -> Result<Fragment, Error> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok(Fragment::Data {
                        bytes: text.as_bytes().to_vec(),
                        end_of_message: true,
                    });
                }
                Some(Ok(Message::Binary(bytes))) => {
                    return Ok(Fragment::Data {
                        bytes: bytes.to_vec(),
                        end_of_message: true,
                    });
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "Close frame received");
                    self.set_state(CLOSING);
                    return Ok(Fragment::Close);
                }
                // Pings are answered by tungstenite itself.
                Some(Ok(_)) => continue,
                Some(Err(err)) => {
                    self.set_state(CLOSED);
                    return Err(err.into());
                }
                None => {
                    self.set_state(CLOSED);
                    return Ok(Fragment::Close);
                }
            }
        }
    }

    fn abort(&self) {
        if self.state.swap(CLOSED, Ordering::SeqCst) == CLOSED {
            return;
        }

        let sink = self.sink.clone();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                let _ = sink.lock().await.close().await;
            });
        }
    }
}
