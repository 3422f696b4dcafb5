//! Text messages received on one session.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::{self, BoxStream, Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::session::{Fragment, Session};

/// Stream of complete text messages from a single session.
///
/// Fragments are accumulated until an end-of-message marker and decoded as
/// UTF-8. The stream ends when the session leaves the open state, the peer
/// sends a close, a receive fails or the session token is cancelled; the
/// session is aborted at that point. A finished stream never yields again,
/// so every session needs its own stream.
pub struct RawMessageStream {
    session_id: u64,
    inner: BoxStream<'static, String>,
}

impl RawMessageStream {
    pub fn new(session: Arc<Session>) -> Self {
        let session_id = session.id();
        let inner = stream::unfold(session, |session| async move {
            match next_message(&session).await {
                Some(text) => Some((text, session)),
                None => {
                    session.abort();
                    None
                }
            }
        })
        .fuse()
        .boxed();

        Self { session_id, inner }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }
}

impl Stream for RawMessageStream {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

async fn next_message(session: &Session) -> Option<String> {
    let mut buffer = Vec::new();

    loop {
        if !session.is_open() {
            debug!(session = session.id(), state = ?session.state(), "Session no longer open");
            return None;
        }

        let fragment = tokio::select! {
            biased;
            _ = session.token().cancelled() => {
                debug!(session = session.id(), "Listener cancelled");
                return None;
            }
            fragment = session.handle().receive() => fragment,
        };

        match fragment {
            Ok(Fragment::Data {
                bytes,
                end_of_message,
            }) => {
                buffer.extend_from_slice(&bytes);
                if !end_of_message {
                    continue;
                }
                return match String::from_utf8(buffer) {
                    Ok(text) => Some(text),
                    Err(err) => {
                        warn!(session = session.id(), error = %err, "Message is not valid UTF-8");
                        None
                    }
                };
            }
            Ok(Fragment::Close) => {
                info!(session = session.id(), "Relay closed the session");
                return None;
            }
            Err(err) => {
                warn!(session = session.id(), error = %err, "Receive failed");
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::session::{SessionState, TransportSession};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    /// Replays scripted fragments, then waits forever.
    struct Scripted {
        state: Mutex<SessionState>,
        fragments: Mutex<VecDeque<Result<Fragment, Error>>>,
    }

    impl Scripted {
        fn session(fragments: Vec<Result<Fragment, Error>>) -> Arc<Session> {
            let handle = Arc::new(Scripted {
                state: Mutex::new(SessionState::Open),
                fragments: Mutex::new(fragments.into()),
            });
            Arc::new(Session::new(7, handle, CancellationToken::new()))
        }
    }

    #[async_trait]
    impl TransportSession for Scripted {
        fn state(&self) -> SessionState {
            *self.state.lock().unwrap()
        }

        async fn send_text(&self, _text: &str) -> Result<(), Error> {
            Ok(())
        }

        async fn receive(&self) -> Result<Fragment, Error> {
            let next = self.fragments.lock().unwrap().pop_front();
            match next {
                Some(fragment) => fragment,
                None => std::future::pending().await,
            }
        }

        fn abort(&self) {
            *self.state.lock().unwrap() = SessionState::Closed;
        }
    }

    fn part(text: &str, end_of_message: bool) -> Result<Fragment, Error> {
        Ok(Fragment::Data {
            bytes: text.as_bytes().to_vec(),
            end_of_message,
        })
    }

    #[tokio::test]
    async fn test_accumulates_fragments() {
        let session = Scripted::session(vec![
            part(r#"["NOTICE","#, false),
            part(r#""split"]"#, true),
            part(r#"["EOSE","s"]"#, true),
            Ok(Fragment::Close),
        ]);
        let messages: Vec<String> = RawMessageStream::new(session.clone()).collect().await;

        assert_eq!(messages, vec![r#"["NOTICE","split"]"#, r#"["EOSE","s"]"#]);
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn test_multibyte_character_split_across_fragments() {
        let bytes = "🚀".as_bytes();
        let session = Scripted::session(vec![
            Ok(Fragment::Data {
                bytes: bytes[..2].to_vec(),
                end_of_message: false,
            }),
            Ok(Fragment::Data {
                bytes: bytes[2..].to_vec(),
                end_of_message: true,
            }),
            Ok(Fragment::Close),
        ]);
        let messages: Vec<String> = RawMessageStream::new(session).collect().await;
        assert_eq!(messages, vec!["🚀".to_string()]);
    }

    #[tokio::test]
    async fn test_receive_error_ends_stream_and_aborts() {
        let session = Scripted::session(vec![
            part("first", true),
            Err(Error::Transport("reset".into())),
            part("never", true),
        ]);
        let messages: Vec<String> = RawMessageStream::new(session.clone()).collect().await;
        assert_eq!(messages, vec!["first"]);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_cancellation_ends_stream() {
        let session = Scripted::session(vec![part("only", true)]);
        let mut stream = RawMessageStream::new(session.clone());

        assert_eq!(stream.next().await.as_deref(), Some("only"));
        session.token().cancel();
        assert!(stream.next().await.is_none());
        assert!(stream.next().await.is_none());
    }
}
