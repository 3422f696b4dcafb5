//! End-to-end client behaviour over an in-memory transport.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use nostr_core::{finalize, Event, EventTemplate, Filter, Keys, KIND_SHORT_TEXT_NOTE};
use relay_client::{
    ConnectionState, Error, Fragment, Listeners, RelayClient, RelayConfig, SessionState,
    Transport, TransportSession,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

struct MockSession {
    state: Mutex<SessionState>,
    incoming: mpsc::UnboundedSender<Fragment>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<Fragment>>,
    sent: Mutex<Vec<String>>,
    fail_sends: AtomicUsize,
    stall_marker: Mutex<Option<String>>,
}

impl MockSession {
    fn new(open: bool) -> Arc<Self> {
        let (incoming, receiver) = mpsc::unbounded_channel();
        Arc::new(Self {
            state: Mutex::new(if open {
                SessionState::Open
            } else {
                SessionState::Connecting
            }),
            incoming,
            receiver: tokio::sync::Mutex::new(receiver),
            sent: Mutex::new(Vec::new()),
            fail_sends: AtomicUsize::new(0),
            stall_marker: Mutex::new(None),
        })
    }

    fn deliver(&self, text: &str) {
        let _ = self.incoming.send(Fragment::text(text));
    }

    fn close(&self) {
        let _ = self.incoming.send(Fragment::Close);
    }

    fn set_open(&self) {
        *self.state.lock().unwrap() = SessionState::Open;
    }

    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    /// The first send of a frame containing `marker` never completes.
    fn stall_once_on(&self, marker: &str) {
        *self.stall_marker.lock().unwrap() = Some(marker.to_string());
    }
}

#[async_trait]
impl TransportSession for MockSession {
    fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    async fn send_text(&self, text: &str) -> Result<(), Error> {
        if self
            .fail_sends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::Transport("connection reset".into()));
        }

        let stall = {
            let mut marker = self.stall_marker.lock().unwrap();
            let hit = marker.as_deref().is_some_and(|m| text.contains(m));
            if hit {
                marker.take();
            }
            hit
        };
        if stall {
            std::future::pending::<()>().await;
        }

        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn receive(&self) -> Result<Fragment, Error> {
        let mut receiver = self.receiver.lock().await;
        Ok(receiver.recv().await.unwrap_or(Fragment::Close))
    }

    fn abort(&self) {
        *self.state.lock().unwrap() = SessionState::Closed;
    }
}

#[derive(Default)]
struct MockTransport {
    sessions: Mutex<Vec<Arc<MockSession>>>,
    open_attempts: AtomicUsize,
    refuse_opens: AtomicUsize,
    start_connecting: AtomicBool,
}

impl MockTransport {
    fn session(&self, index: usize) -> Option<Arc<MockSession>> {
        self.sessions.lock().unwrap().get(index).cloned()
    }

    fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    async fn wait_for_session(&self, index: usize) -> Arc<MockSession> {
        wait_until(|| self.session(index).is_some()).await;
        self.session(index).unwrap()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, _url: &Url) -> Result<Arc<dyn TransportSession>, Error> {
        self.open_attempts.fetch_add(1, Ordering::SeqCst);
        if self
            .refuse_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::Transport("connection refused".into()));
        }

        let session = MockSession::new(!self.start_connecting.load(Ordering::SeqCst));
        self.sessions.lock().unwrap().push(session.clone());
        Ok(session)
    }
}

fn config() -> RelayConfig {
    let mut config = RelayConfig::new("ws://relay.test");
    config.connect_poll_interval = Duration::from_millis(10);
    config
}

fn client(transport: &Arc<MockTransport>) -> RelayClient {
    RelayClient::with_transport(config(), transport.clone()).unwrap()
}

fn spawn_connect(client: &RelayClient) -> (CancellationToken, JoinHandle<Result<(), Error>>) {
    let cancel = CancellationToken::new();
    let task = {
        let client = client.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { client.connect(&cancel).await })
    };
    (cancel, task)
}

fn collect<T: Clone + Send + 'static>(listeners: &Listeners<T>) -> Arc<Mutex<Vec<T>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    listeners.add(move |value: &T| sink.lock().unwrap().push(value.clone()));
    seen
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..5_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

fn note(keys: &Keys, content: &str) -> Event {
    finalize(EventTemplate::new(KIND_SHORT_TEXT_NOTE, content), keys, None).unwrap()
}

#[tokio::test(start_paused = true)]
async fn relay_messages_raise_notifications() {
    let transport = Arc::new(MockTransport::default());
    let client = client(&transport);
    let events = collect(&client.notifications().events);
    let notices = collect(&client.notifications().notice);
    let eose = collect(&client.notifications().end_of_stored_events);
    let raw = collect(&client.notifications().raw_message);

    let (_cancel, task) = spawn_connect(&client);
    let session = transport.wait_for_session(0).await;

    let keys = Keys::generate();
    let event = note(&keys, "hello relay");
    let mut tampered = event.clone();
    tampered.content = "hello relaz".to_string();

    session.deliver(&serde_json::json!(["EVENT", "sub1", event]).to_string());
    session.deliver(&serde_json::json!(["EVENT", "sub1", tampered]).to_string());
    session.deliver(r#"["NOTICE","rate limited"]"#);
    session.deliver(r#"["EOSE","sub1"]"#);

    wait_until(|| !eose.lock().unwrap().is_empty()).await;

    let delivered = events.lock().unwrap().clone();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].subscription_id, "sub1");
    assert_eq!(delivered[0].events, vec![event]);
    assert_eq!(*notices.lock().unwrap(), vec!["rate limited".to_string()]);
    assert_eq!(*eose.lock().unwrap(), vec!["sub1".to_string()]);
    assert_eq!(raw.lock().unwrap().len(), 4);

    client.disconnect();
    task.await.unwrap().unwrap();
    assert_eq!(client.state(), ConnectionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn frames_queued_before_connect_are_sent_in_order() {
    let transport = Arc::new(MockTransport::default());
    let client = client(&transport);
    let cancel = CancellationToken::new();

    client
        .create_subscription("feed", vec![Filter::new().kind(1).limit(10)], &cancel)
        .unwrap();
    client.close_subscription("feed", &cancel).unwrap();
    assert_eq!(client.pending_outbound(), 2);
    assert_eq!(client.state(), ConnectionState::Disconnected);

    let (_connection, task) = spawn_connect(&client);
    let session = transport.wait_for_session(0).await;
    wait_until(|| session.sent().len() == 2).await;

    assert_eq!(
        session.sent(),
        vec![
            r#"["REQ","feed",{"kinds":[1],"limit":10}]"#.to_string(),
            r#"["CLOSE","feed"]"#.to_string(),
        ]
    );
    assert_eq!(client.pending_outbound(), 0);

    client.disconnect();
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn timed_out_send_reconnects_and_is_retried_before_later_frames() {
    let transport = Arc::new(MockTransport::default());
    let client = client(&transport);
    let (cancel, task) = spawn_connect(&client);
    let first = transport.wait_for_session(0).await;
    first.stall_once_on("\"B\"");

    for id in ["A", "B", "C"] {
        client.close_subscription(id, &cancel).unwrap();
    }

    let second = transport.wait_for_session(1).await;
    wait_until(|| second.sent().len() == 2).await;

    assert_eq!(first.sent(), vec![r#"["CLOSE","A"]"#.to_string()]);
    assert_eq!(first.state(), SessionState::Closed);
    assert_eq!(
        second.sent(),
        vec![
            r#"["CLOSE","B"]"#.to_string(),
            r#"["CLOSE","C"]"#.to_string(),
        ]
    );

    client.disconnect();
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn failed_send_reconnects_and_delivers_on_new_session() {
    let transport = Arc::new(MockTransport::default());
    let client = client(&transport);
    let (cancel, task) = spawn_connect(&client);
    let first = transport.wait_for_session(0).await;
    first.fail_sends.store(1, Ordering::SeqCst);

    let keys = Keys::generate();
    let event = note(&keys, "survives reconnect");
    client.publish_event(&event, &cancel).unwrap();

    let second = transport.wait_for_session(1).await;
    wait_until(|| !second.sent().is_empty()).await;

    assert!(first.sent().is_empty());
    assert_eq!(first.state(), SessionState::Closed);
    assert_eq!(
        second.sent(),
        vec![serde_json::json!(["EVENT", event]).to_string()]
    );

    client.disconnect();
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn relay_close_reconnects_and_keeps_inbound_order() {
    let transport = Arc::new(MockTransport::default());
    let client = client(&transport);
    let notices = collect(&client.notifications().notice);
    let (_cancel, task) = spawn_connect(&client);

    let first = transport.wait_for_session(0).await;
    first.deliver(r#"["NOTICE","one"]"#);
    first.close();

    let second = transport.wait_for_session(1).await;
    second.deliver(r#"["NOTICE","two"]"#);

    wait_until(|| notices.lock().unwrap().len() == 2).await;
    assert_eq!(
        *notices.lock().unwrap(),
        vec!["one".to_string(), "two".to_string()]
    );
    assert_eq!(client.state(), ConnectionState::Connected);

    client.disconnect();
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn malformed_frame_halts_inbound_dispatch() {
    let transport = Arc::new(MockTransport::default());
    let client = client(&transport);
    let notices = collect(&client.notifications().notice);
    let raw = collect(&client.notifications().raw_message);
    let (_cancel, task) = spawn_connect(&client);

    let session = transport.wait_for_session(0).await;
    session.deliver("{not a frame");
    session.deliver(r#"["NOTICE","after"]"#);

    wait_until(|| raw.lock().unwrap().len() == 2).await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(notices.lock().unwrap().is_empty());
    assert_eq!(client.pending_inbound(), 2);

    client.disconnect();
    let result = task.await.unwrap();
    assert!(matches!(result, Err(Error::InvalidFrame(_))));
}

#[tokio::test(start_paused = true)]
async fn waits_for_session_to_open_and_retries_refused_connections() {
    let transport = Arc::new(MockTransport::default());
    transport.refuse_opens.store(2, Ordering::SeqCst);
    transport.start_connecting.store(true, Ordering::SeqCst);
    let client = client(&transport);
    let (_cancel, task) = spawn_connect(&client);

    let session = transport.wait_for_session(0).await;
    assert_eq!(transport.open_attempts.load(Ordering::SeqCst), 3);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(client.state(), ConnectionState::Connecting);

    session.set_open();
    let mut states = client.state_receiver();
    wait_until(|| *states.borrow_and_update() == ConnectionState::Connected).await;
    assert_eq!(transport.session_count(), 1);

    client.disconnect();
    task.await.unwrap().unwrap();
    assert_eq!(client.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn enqueue_and_connect_guard_conditions() {
    let transport = Arc::new(MockTransport::default());
    let client = client(&transport);

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    assert!(matches!(
        client.close_subscription("x", &cancelled),
        Err(Error::Cancelled)
    ));
    assert_eq!(client.pending_outbound(), 0);

    let (_cancel, task) = spawn_connect(&client);
    transport.wait_for_session(0).await;
    assert!(matches!(
        client.connect(&CancellationToken::new()).await,
        Err(Error::AlreadyConnected)
    ));

    client.disconnect();
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn parent_cancellation_stops_connection() {
    let transport = Arc::new(MockTransport::default());
    let client = client(&transport);
    let (cancel, task) = spawn_connect(&client);
    let session = transport.wait_for_session(0).await;

    cancel.cancel();
    task.await.unwrap().unwrap();

    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(client.state(), ConnectionState::Closed);
    assert_eq!(transport.session_count(), 1);
}

#[test]
fn rejects_non_websocket_urls() {
    let transport: Arc<dyn Transport> = Arc::new(MockTransport::default());
    let result = RelayClient::with_transport(RelayConfig::new("http://relay.test"), transport);
    assert!(matches!(result, Err(Error::UnsupportedScheme(_))));
}
