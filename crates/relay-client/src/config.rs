//! Configuration types for relay-client.

use std::env;
use std::time::Duration;

use url::Url;

use crate::error::Error;

/// Relay used when no URL is configured.
pub const DEFAULT_RELAY_URL: &str = "ws://localhost:7777";

/// Per-attempt deadline for processing one queued frame.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

/// How often connection state is polled while waiting for a session to open.
pub const DEFAULT_CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long a WebSocket handshake may take.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Retry strategy applied to the head of a frame queue.
///
/// The head item blocks every later item until it is processed, so with the
/// default (unbounded attempts, no delay) a frame that can never be sent
/// stalls its queue forever.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Deadline for a single processing attempt.
    pub attempt_timeout: Duration,
    /// Pause between a failed attempt and the next one.
    pub retry_delay: Duration,
    /// Attempts before the head item is dropped (None = infinite).
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            retry_delay: Duration::ZERO,
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    /// Retry forever with the given attempt deadline and no pause.
    pub fn retry_forever(attempt_timeout: Duration) -> Self {
        Self {
            attempt_timeout,
            ..Default::default()
        }
    }

    /// Check if another attempt is allowed after `attempts` failures.
    pub fn should_retry(&self, attempts: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempts < max)
    }
}

/// Configuration for a single relay connection.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Relay WebSocket URL (ws:// or wss://).
    pub url: String,

    /// Poll interval while waiting for a session to report open.
    pub connect_poll_interval: Duration,

    /// Deadline for the transport handshake.
    pub connect_timeout: Duration,

    /// Pause before reopening after a session ends. Zero means reconnect
    /// immediately.
    pub reconnect_delay: Duration,

    /// Strategy for client-to-relay frames.
    pub outbound_retry: RetryPolicy,

    /// Strategy for relay-to-client frames.
    pub inbound_retry: RetryPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_RELAY_URL.to_string(),
            connect_poll_interval: DEFAULT_CONNECT_POLL_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect_delay: Duration::ZERO,
            outbound_retry: RetryPolicy::default(),
            inbound_retry: RetryPolicy::default(),
        }
    }
}

impl RelayConfig {
    /// Create a configuration with defaults for the given relay URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Create configuration from environment variables.
    ///
    /// Required environment variables:
    /// - `RELAY_URL` - relay WebSocket URL
    ///
    /// Optional environment variables:
    /// - `RELAY_CONNECT_POLL_MS` - connect poll interval (default: 100)
    /// - `RELAY_CONNECT_TIMEOUT_MS` - handshake deadline (default: 10000)
    /// - `RELAY_RECONNECT_DELAY_MS` - pause between sessions (default: 0)
    /// - `RELAY_ATTEMPT_TIMEOUT_MS` - per-frame attempt deadline (default: 5000)
    /// - `RELAY_RETRY_DELAY_MS` - pause between failed attempts (default: 0)
    /// - `RELAY_MAX_ATTEMPTS` - attempts before dropping a frame (default: unbounded)
    pub fn from_env() -> Result<Self, Error> {
        let url = env::var("RELAY_URL").map_err(|_| Error::MissingEnv("RELAY_URL"))?;
        let mut config = Self::new(url);

        if let Some(ms) = env_millis("RELAY_CONNECT_POLL_MS")? {
            config.connect_poll_interval = ms;
        }
        if let Some(ms) = env_millis("RELAY_CONNECT_TIMEOUT_MS")? {
            config.connect_timeout = ms;
        }
        if let Some(ms) = env_millis("RELAY_RECONNECT_DELAY_MS")? {
            config.reconnect_delay = ms;
        }

        let mut retry = RetryPolicy::default();
        if let Some(ms) = env_millis("RELAY_ATTEMPT_TIMEOUT_MS")? {
            retry.attempt_timeout = ms;
        }
        if let Some(ms) = env_millis("RELAY_RETRY_DELAY_MS")? {
            retry.retry_delay = ms;
        }
        if let Ok(value) = env::var("RELAY_MAX_ATTEMPTS") {
            let max = value
                .parse()
                .map_err(|_| Error::InvalidConfig(format!("RELAY_MAX_ATTEMPTS: {value}")))?;
            retry.max_attempts = Some(max);
        }
        config.outbound_retry = retry.clone();
        config.inbound_retry = retry;

        config.validate()?;
        Ok(config)
    }

    /// Parse the URL and check it is a WebSocket URL.
    pub fn relay_url(&self) -> Result<Url, Error> {
        let url = Url::parse(&self.url)?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(Error::UnsupportedScheme(url.scheme().to_string()));
        }
        Ok(url)
    }

    /// Reject configurations the connection loop cannot run with.
    pub fn validate(&self) -> Result<(), Error> {
        self.relay_url()?;
        if self.connect_poll_interval.is_zero() {
            return Err(Error::InvalidConfig("connect poll interval must be non-zero".to_string()));
        }
        for (name, policy) in [("outbound", &self.outbound_retry), ("inbound", &self.inbound_retry)] {
            if policy.attempt_timeout.is_zero() {
                return Err(Error::InvalidConfig(format!("{name} attempt timeout must be non-zero")));
            }
            if policy.max_attempts == Some(0) {
                return Err(Error::InvalidConfig(format!("{name} max attempts must be at least 1")));
            }
        }
        Ok(())
    }
}

fn env_millis(name: &'static str) -> Result<Option<Duration>, Error> {
    match env::var(name) {
        Ok(value) => value
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|_| Error::InvalidConfig(format!("{name}: {value}"))),
        Err(_) => Ok(None),
    }
}
