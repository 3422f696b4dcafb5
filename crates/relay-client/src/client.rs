//! Public client facade.

use std::sync::{Arc, Mutex, MutexGuard};

use nostr_core::{finalize, Event, EventTemplate, Filter, Keys, PayloadCodec};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::RelayConfig;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::error::Error;
use crate::message::ClientMessage;
use crate::notify::Notifications;
use crate::pump::{FramePump, InboundDispatcher, OutboundSender};
use crate::session::{SessionSlot, Transport};
use crate::ws::WebSocketTransport;

/// Client for a single relay.
///
/// Publishing and subscribing only queue frames; they succeed as soon as the
/// frame is queued, whether or not a session is open. Queued frames are
/// delivered in order once [`RelayClient::connect`] has a session up, and
/// survive reconnects.
#[derive(Clone)]
pub struct RelayClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: RelayConfig,
    pump: FramePump,
    slot: Arc<SessionSlot>,
    notifications: Arc<Notifications>,
    connection: ConnectionManager,
    connection_token: Mutex<Option<CancellationToken>>,
}

impl RelayClient {
    /// Create a client that connects over WebSocket.
    pub fn new(config: RelayConfig) -> Result<Self, Error> {
        let transport = Arc::new(WebSocketTransport::new(config.connect_timeout));
        Self::with_transport(config, transport)
    }

    /// Create a client from environment variables.
    pub fn from_env() -> Result<Self, Error> {
        Self::new(RelayConfig::from_env()?)
    }

    /// Create a client over a custom transport.
    pub fn with_transport(config: RelayConfig, transport: Arc<dyn Transport>) -> Result<Self, Error> {
        config.validate()?;

        let pump = FramePump::new();
        let slot = Arc::new(SessionSlot::new());
        let notifications = Arc::new(Notifications::default());
        let connection = ConnectionManager::new(
            config.clone(),
            transport,
            slot.clone(),
            pump.inbound().clone(),
            notifications.clone(),
        )?;

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                pump,
                slot,
                notifications,
                connection,
                connection_token: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.inner.config
    }

    /// Listener registries for relay messages.
    pub fn notifications(&self) -> &Notifications {
        &self.inner.notifications
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.subscribe_state()
    }

    /// Frames waiting to be sent.
    pub fn pending_outbound(&self) -> usize {
        self.inner.pump.outbound().len()
    }

    /// Frames waiting to be dispatched.
    pub fn pending_inbound(&self) -> usize {
        self.inner.pump.inbound().len()
    }

    /// Run the connection loop and both frame consumers until `cancel` fires
    /// or [`RelayClient::disconnect`] is called.
    ///
    /// Returns the inbound consumer's error if it halted on a malformed
    /// frame.
    pub async fn connect(&self, cancel: &CancellationToken) -> Result<(), Error> {
        let token = {
            let mut current = self.lock_token();
            if current.as_ref().is_some_and(|token| !token.is_cancelled()) {
                return Err(Error::AlreadyConnected);
            }
            let token = cancel.child_token();
            *current = Some(token.clone());
            token
        };

        let inner = &self.inner;
        info!(relay = %inner.config.url, "Connecting");

        let outbound = inner.pump.spawn_outbound(
            OutboundSender::new(inner.slot.clone(), inner.config.connect_poll_interval),
            inner.config.outbound_retry.clone(),
            token.clone(),
        );
        let inbound = inner.pump.spawn_inbound(
            InboundDispatcher::new(inner.notifications.clone()),
            inner.config.inbound_retry.clone(),
            token.clone(),
        );

        inner.connection.run(&token).await;
        token.cancel();

        let outbound = outbound.await;
        let inbound = inbound.await;
        info!(
            relay = %inner.config.url,
            pending_outbound = self.pending_outbound(),
            pending_inbound = self.pending_inbound(),
            "Disconnected"
        );

        outbound??;
        inbound??;
        Ok(())
    }

    /// Cancel the running connection. Does not wait for it to wind down.
    pub fn disconnect(&self) {
        if let Some(token) = self.lock_token().as_ref() {
            debug!(relay = %self.inner.config.url, "Disconnect requested");
            token.cancel();
        }
    }

    /// Queue `["EVENT", event]`.
    pub fn publish_event(&self, event: &Event, cancel: &CancellationToken) -> Result<(), Error> {
        self.enqueue(ClientMessage::Event(event.clone()), cancel)
    }

    /// Sign a template with `keys` and queue it. Returns the signed event.
    pub fn sign_and_publish(
        &self,
        template: EventTemplate,
        keys: &Keys,
        codec: Option<&dyn PayloadCodec>,
        cancel: &CancellationToken,
    ) -> Result<Event, Error> {
        let event = finalize(template, keys, codec)?;
        self.publish_event(&event, cancel)?;
        Ok(event)
    }

    /// Queue `["REQ", subscription_id, filters...]`.
    pub fn create_subscription(
        &self,
        subscription_id: impl Into<String>,
        filters: Vec<Filter>,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        self.enqueue(
            ClientMessage::Req {
                subscription_id: subscription_id.into(),
                filters,
            },
            cancel,
        )
    }

    /// Queue `["CLOSE", subscription_id]`.
    pub fn close_subscription(
        &self,
        subscription_id: impl Into<String>,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        self.enqueue(
            ClientMessage::Close {
                subscription_id: subscription_id.into(),
            },
            cancel,
        )
    }

    fn enqueue(&self, message: ClientMessage, cancel: &CancellationToken) -> Result<(), Error> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let frame = message.to_json()?;
        debug!(frame = %frame, "Queueing frame");
        self.inner.pump.enqueue_outbound(frame);
        Ok(())
    }

    fn lock_token(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.inner
            .connection_token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for RelayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayClient")
            .field("url", &self.inner.config.url)
            .field("state", &self.state())
            .field("pending_outbound", &self.pending_outbound())
            .field("pending_inbound", &self.pending_inbound())
            .finish()
    }
}
