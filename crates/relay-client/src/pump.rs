//! Outbound and inbound frame queues and their consumers.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use nostr_core::verify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::RetryPolicy;
use crate::error::Error;
use crate::message::RelayMessage;
use crate::notify::{EventsReceived, Notifications};
use crate::queue::{AttemptError, FrameHandler, FrameQueue};
use crate::session::{Session, SessionSlot};

/// The two frame queues of a client.
#[derive(Debug, Clone)]
pub struct FramePump {
    outbound: Arc<FrameQueue<String>>,
    inbound: Arc<FrameQueue<String>>,
}

impl FramePump {
    pub fn new() -> Self {
        Self {
            outbound: Arc::new(FrameQueue::new("outbound")),
            inbound: Arc::new(FrameQueue::new("inbound")),
        }
    }

    pub fn outbound(&self) -> &Arc<FrameQueue<String>> {
        &self.outbound
    }

    pub fn inbound(&self) -> &Arc<FrameQueue<String>> {
        &self.inbound
    }

    /// Queue a client-to-relay frame.
    pub fn enqueue_outbound(&self, frame: String) {
        self.outbound.push(frame);
    }

    /// Queue a relay-to-client frame.
    pub fn enqueue_inbound(&self, frame: String) {
        self.inbound.push(frame);
    }

    /// Spawn the outbound consumer.
    pub fn spawn_outbound(
        &self,
        sender: OutboundSender,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> JoinHandle<Result<(), Error>> {
        let queue = self.outbound.clone();
        tokio::spawn(async move { queue.consume(&sender, &policy, &cancel).await })
    }

    /// Spawn the inbound consumer. A malformed frame stops it for good.
    pub fn spawn_inbound(
        &self,
        dispatcher: InboundDispatcher,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> JoinHandle<Result<(), Error>> {
        let queue = self.inbound.clone();
        tokio::spawn(async move {
            let result = queue.consume(&dispatcher, &policy, &cancel).await;
            if let Err(err) = &result {
                error!(
                    error = %err,
                    pending = queue.len(),
                    "Inbound consumer halted, no further relay messages will be dispatched"
                );
            }
            result
        })
    }
}

impl Default for FramePump {
    fn default() -> Self {
        Self::new()
    }
}

/// Sends queued frames on whichever session is current.
///
/// Time spent waiting for an open session does not count as a failed
/// attempt. A send that overruns its deadline aborts the session it was
/// written to.
pub struct OutboundSender {
    slot: Arc<SessionSlot>,
    poll_interval: Duration,
    /// Session the current attempt is writing to, if it got that far.
    sending_on: Mutex<Option<Arc<Session>>>,
}

impl OutboundSender {
    pub fn new(slot: Arc<SessionSlot>, poll_interval: Duration) -> Self {
        Self {
            slot,
            poll_interval,
            sending_on: Mutex::new(None),
        }
    }

    fn sending_on(&self) -> MutexGuard<'_, Option<Arc<Session>>> {
        self.sending_on
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl FrameHandler<String> for OutboundSender {
    async fn handle(&self, frame: String, attempt: CancellationToken) -> Result<(), AttemptError> {
        *self.sending_on() = None;

        let session = loop {
            if let Some(session) = self.slot.current().filter(|session| session.is_open()) {
                break session;
            }
            tokio::select! {
                biased;
                _ = attempt.cancelled() => {
                    return Err(AttemptError::Deferred(Error::Cancelled));
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        };

        *self.sending_on() = Some(session.clone());
        let sent = tokio::select! {
            biased;
            _ = attempt.cancelled() => Err(Error::Cancelled),
            sent = session.handle().send_text(&frame) => sent,
        };
        *self.sending_on() = None;

        match sent {
            Ok(()) => {
                debug!(session = session.id(), bytes = frame.len(), "Frame sent");
                Ok(())
            }
            Err(Error::Cancelled) => Err(AttemptError::Retryable(Error::Cancelled)),
            Err(err) => {
                warn!(session = session.id(), error = %err, "Send failed, aborting session");
                session.abort();
                Err(AttemptError::Retryable(err))
            }
        }
    }

    fn timed_out(&self, deadline: Duration) -> AttemptError {
        match self.sending_on().take() {
            Some(session) => {
                warn!(session = session.id(), ?deadline, "Send timed out, aborting session");
                session.abort();
                AttemptError::Retryable(Error::Timeout(deadline))
            }
            None => AttemptError::Deferred(Error::Timeout(deadline)),
        }
    }
}

/// Decodes queued relay frames and raises notifications.
pub struct InboundDispatcher {
    notifications: Arc<Notifications>,
}

impl InboundDispatcher {
    pub fn new(notifications: Arc<Notifications>) -> Self {
        Self { notifications }
    }

    /// Raise the notification for one decoded message.
    pub fn dispatch(&self, message: RelayMessage) {
        match message {
            RelayMessage::Event {
                subscription_id,
                event,
            } => {
                if !verify(&event) {
                    debug!(
                        subscription_id = %subscription_id,
                        event_id = %event.id,
                        "Dropping event that failed verification"
                    );
                    return;
                }
                self.notifications.events.emit(&EventsReceived {
                    subscription_id,
                    events: vec![event],
                });
            }
            RelayMessage::Notice { message } => {
                debug!(notice = %message, "Relay notice");
                self.notifications.notice.emit(&message);
            }
            RelayMessage::Eose { subscription_id } => {
                self.notifications.end_of_stored_events.emit(&subscription_id);
            }
            other => {
                debug!(message = ?other, "Ignoring relay message");
            }
        }
    }
}

#[async_trait]
impl FrameHandler<String> for InboundDispatcher {
    async fn handle(&self, frame: String, _attempt: CancellationToken) -> Result<(), AttemptError> {
        let message = RelayMessage::parse(&frame).map_err(AttemptError::Fatal)?;
        self.dispatch(message);
        Ok(())
    }
}
