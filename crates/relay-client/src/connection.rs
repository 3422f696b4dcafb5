//! Reconnect loop owning the current relay session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::RelayConfig;
use crate::error::Error;
use crate::notify::Notifications;
use crate::queue::FrameQueue;
use crate::session::{Session, SessionSlot, SessionState, Transport};
use crate::stream::RawMessageStream;

/// Connection lifecycle as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// The owning cancellation token fired.
    Closed,
}

/// Keeps exactly one session open for as long as it is not cancelled.
pub struct ConnectionManager {
    url: Url,
    config: RelayConfig,
    transport: Arc<dyn Transport>,
    slot: Arc<SessionSlot>,
    inbound: Arc<FrameQueue<String>>,
    notifications: Arc<Notifications>,
    state: watch::Sender<ConnectionState>,
    next_session_id: AtomicU64,
}

impl ConnectionManager {
    pub fn new(
        config: RelayConfig,
        transport: Arc<dyn Transport>,
        slot: Arc<SessionSlot>,
        inbound: Arc<FrameQueue<String>>,
        notifications: Arc<Notifications>,
    ) -> Result<Self, Error> {
        let url = config.relay_url()?;
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Ok(Self {
            url,
            config,
            transport,
            slot,
            inbound,
            notifications,
            state,
            next_session_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Run sessions back to back until `cancel` fires.
    ///
    /// Each iteration opens a fresh session, listens on it until it stops
    /// being open, then aborts it.
    pub async fn run(&self, cancel: &CancellationToken) {
        info!(relay = %self.url, "Connection loop started");

        while !cancel.is_cancelled() {
            match self.connect_and_wait_until_connected(cancel).await {
                Ok(session) => {
                    let listener = self.spawn_listener(session.clone());
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {}
                        _ = listener => {}
                    }
                    session.abort();
                    debug!(relay = %self.url, session = session.id(), "Session ended");
                }
                Err(Error::Cancelled) => break,
                Err(err) => {
                    warn!(relay = %self.url, error = %err, "Connection attempt failed");
                }
            }

            if cancel.is_cancelled() {
                break;
            }
            self.set_state(ConnectionState::Connecting);

            if self.config.reconnect_delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                }
            }
        }

        if let Some(session) = self.slot.take() {
            session.abort();
        }
        self.set_state(ConnectionState::Closed);
        info!(relay = %self.url, "Connection loop stopped");
    }

    /// Return the current session if it is open, otherwise replace it with
    /// a new one and poll until that one opens.
    pub async fn connect_and_wait_until_connected(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Arc<Session>, Error> {
        if let Some(current) = self.slot.current() {
            if current.is_open() {
                return Ok(current);
            }
        }

        if let Some(previous) = self.slot.take() {
            previous.abort();
        }
        self.set_state(ConnectionState::Connecting);

        let handle = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            opened = self.transport.open(&self.url) => opened?,
        };

        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(Session::new(id, handle, cancel.child_token()));
        self.slot.replace(session.clone());

        loop {
            match session.state() {
                SessionState::Open => break,
                SessionState::Closing | SessionState::Closed => {
                    session.abort();
                    return Err(Error::Transport(
                        "session closed during handshake".to_string(),
                    ));
                }
                SessionState::Connecting => {}
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    session.abort();
                    return Err(Error::Cancelled);
                }
                _ = tokio::time::sleep(self.config.connect_poll_interval) => {}
            }
        }

        info!(relay = %self.url, session = id, "Connected");
        self.set_state(ConnectionState::Connected);
        Ok(session)
    }

    fn spawn_listener(&self, session: Arc<Session>) -> tokio::task::JoinHandle<()> {
        let inbound = self.inbound.clone();
        let notifications = self.notifications.clone();

        tokio::spawn(async move {
            let mut messages = RawMessageStream::new(session);
            while let Some(text) = messages.next().await {
                inbound.push(text.clone());
                notifications.raw_message.emit(&text);
            }
            debug!(session = messages.session_id(), "Listener finished");
        })
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            debug!(from = ?*current, to = ?state, "Connection state changed");
            *current = state;
            true
        });
    }
}
