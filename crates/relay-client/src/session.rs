//! Transport seam and the owned per-connection session value.

use std::fmt;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;

/// Lifecycle of a transport session as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// One unit received from a transport session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    /// Part of a message. The message is complete once `end_of_message` is set.
    Data { bytes: Vec<u8>, end_of_message: bool },
    /// The peer closed the session.
    Close,
}

impl Fragment {
    /// A whole text message in a single fragment.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Data {
            bytes: text.into().into_bytes(),
            end_of_message: true,
        }
    }
}

/// A single open connection to a relay.
#[async_trait]
pub trait TransportSession: Send + Sync {
    fn state(&self) -> SessionState;

    /// Transmit one text frame.
    async fn send_text(&self, text: &str) -> Result<(), Error>;

    /// Wait for the next fragment.
    async fn receive(&self) -> Result<Fragment, Error>;

    /// Tear the session down without a closing handshake.
    fn abort(&self);
}

/// Opens sessions to a relay.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start a new session. The returned session may still be connecting.
    async fn open(&self, url: &Url) -> Result<Arc<dyn TransportSession>, Error>;
}

/// A transport session together with the token that scopes its listener.
///
/// Sessions are never modified after creation; a reconnect installs a new
/// one in the [`SessionSlot`].
pub struct Session {
    id: u64,
    handle: Arc<dyn TransportSession>,
    token: CancellationToken,
}

impl Session {
    pub fn new(id: u64, handle: Arc<dyn TransportSession>, token: CancellationToken) -> Self {
        Self { id, handle, token }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn handle(&self) -> &Arc<dyn TransportSession> {
        &self.handle
    }

    /// Cancelled when the session is aborted or its connection shuts down.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn state(&self) -> SessionState {
        self.handle.state()
    }

    pub fn is_open(&self) -> bool {
        !self.token.is_cancelled() && self.handle.state() == SessionState::Open
    }

    pub fn abort(&self) {
        self.token.cancel();
        self.handle.abort();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

/// Holder of the current session, swapped whole on reconnect.
#[derive(Debug, Default)]
pub struct SessionSlot {
    current: RwLock<Option<Arc<Session>>>,
}

impl SessionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Arc<Session>> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Install `session`, returning the one it replaced.
    pub fn replace(&self, session: Arc<Session>) -> Option<Arc<Session>> {
        self.current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(session)
    }

    pub fn take(&self) -> Option<Arc<Session>> {
        self.current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}
