//! Resilient client for a single relay.
//!
//! A [`RelayClient`] keeps one transport session open, reconnecting whenever
//! it drops, and moves frames through two FIFO queues:
//!
//! - **outbound**: EVENT, REQ and CLOSE frames, sent in the order they were
//!   queued. A frame stays at the head until a send succeeds.
//! - **inbound**: text received from the relay, decoded and dispatched to
//!   listeners one at a time in arrival order.
//!
//! ```rust,ignore
//! use relay_client::{RelayClient, RelayConfig};
//! use nostr_core::Filter;
//! use tokio_util::sync::CancellationToken;
//!
//! let client = RelayClient::new(RelayConfig::new("wss://relay.example.com"))?;
//! client.notifications().events.add(|batch| {
//!     println!("{}: {} events", batch.subscription_id, batch.events.len());
//! });
//!
//! let cancel = CancellationToken::new();
//! client.create_subscription("notes", vec![Filter::new().kind(1).limit(20)], &cancel)?;
//! client.connect(&cancel).await?;
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod notify;
pub mod pump;
pub mod queue;
pub mod session;
pub mod stream;
pub mod ws;

pub use client::RelayClient;
pub use config::{RelayConfig, RetryPolicy};
pub use connection::{ConnectionManager, ConnectionState};
pub use error::Error;
pub use message::{ClientMessage, RelayMessage};
pub use notify::{EventsReceived, ListenerId, Listeners, Notifications};
pub use pump::{FramePump, InboundDispatcher, OutboundSender};
pub use queue::{AttemptError, FrameHandler, FrameQueue};
pub use session::{Fragment, Session, SessionSlot, SessionState, Transport, TransportSession};
pub use stream::RawMessageStream;
pub use ws::{WebSocketSession, WebSocketTransport};

/// Crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
