//! Unbounded FIFO queues with a peek-and-retry consumer.
//!
//! A consumer only removes the head item after it has been processed
//! successfully. Until then every later item waits behind it, which keeps
//! delivery strictly ordered and turns a stuck head into backpressure.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::error::Error;

/// Outcome of a failed processing attempt.
#[derive(Debug)]
pub enum AttemptError {
    /// Leave the item at the head and try again.
    Retryable(Error),
    /// The item could not be attempted yet. Retried without counting
    /// against `max_attempts`.
    Deferred(Error),
    /// Stop the consumer; the item stays queued.
    Fatal(Error),
}

/// Processes one queued item per call.
#[async_trait]
pub trait FrameHandler<T: Send + 'static>: Send + Sync {
    /// Handle `item`. `attempt` is cancelled when the attempt deadline
    /// passes or the consumer shuts down.
    async fn handle(&self, item: T, attempt: CancellationToken) -> Result<(), AttemptError>;

    /// Outcome of an attempt that overran `deadline`. The attempt's future
    /// has already been dropped when this is called.
    fn timed_out(&self, deadline: Duration) -> AttemptError {
        AttemptError::Retryable(Error::Timeout(deadline))
    }
}

/// Unbounded FIFO queue with a single consumer.
#[derive(Debug)]
pub struct FrameQueue<T> {
    name: &'static str,
    items: Mutex<VecDeque<T>>,
    notify: Notify,
}

impl<T: Clone + Send + 'static> FrameQueue<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Append an item at the tail. Never blocks.
    pub fn push(&self, item: T) {
        self.lock().push_back(item);
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Clone of the head item, if any.
    pub fn peek(&self) -> Option<T> {
        self.lock().front().cloned()
    }

    /// Remove the head item.
    pub fn pop_front(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Wait until the queue is non-empty and return a clone of its head.
    ///
    /// Returns `None` once `cancel` fires.
    pub async fn wait_head(&self, cancel: &CancellationToken) -> Option<T> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            if let Some(head) = self.peek() {
                return Some(head);
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                _ = self.notify.notified() => {}
            }
        }
    }

    /// Run the consumer loop until `cancel` fires or the handler reports a
    /// fatal error.
    pub async fn consume<H>(
        &self,
        handler: &H,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<(), Error>
    where
        H: FrameHandler<T> + ?Sized,
    {
        let mut attempts: u32 = 0;

        while let Some(head) = self.wait_head(cancel).await {
            let attempt = cancel.child_token();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    attempt.cancel();
                    break;
                }
                result = tokio::time::timeout(
                    policy.attempt_timeout,
                    handler.handle(head, attempt.clone()),
                ) => result,
            };
            attempt.cancel();

            let result = match outcome {
                Ok(result) => result,
                Err(_) => Err(handler.timed_out(policy.attempt_timeout)),
            };

            match result {
                Ok(()) => {
                    self.pop_front();
                    attempts = 0;
                    continue;
                }
                Err(AttemptError::Fatal(err)) => return Err(err),
                Err(AttemptError::Deferred(reason)) => {
                    debug!(queue = self.name, reason = %reason, "Head item not ready, retrying");
                }
                Err(AttemptError::Retryable(failure)) => {
                    attempts = attempts.saturating_add(1);
                    if !policy.should_retry(attempts) {
                        warn!(
                            queue = self.name,
                            attempts,
                            error = %failure,
                            "Dropping head item after exhausting attempts"
                        );
                        self.pop_front();
                        attempts = 0;
                        continue;
                    }
                    debug!(queue = self.name, attempts, error = %failure, "Attempt failed, retrying head item");
                }
            }

            if policy.retry_delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(policy.retry_delay) => {}
                }
            }
        }

        debug!(queue = self.name, pending = self.len(), "Consumer stopped");
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    /// Records successful deliveries; items listed in `stall_once` hang on
    /// their first attempt.
    struct Recorder {
        delivered: Mutex<Vec<&'static str>>,
        attempts: Mutex<HashMap<&'static str, u32>>,
        stall_once: Vec<&'static str>,
        always_fail: Vec<&'static str>,
    }

    impl Recorder {
        fn new(stall_once: Vec<&'static str>, always_fail: Vec<&'static str>) -> Self {
            Self {
                delivered: Mutex::new(Vec::new()),
                attempts: Mutex::new(HashMap::new()),
                stall_once,
                always_fail,
            }
        }

        fn delivered(&self) -> Vec<&'static str> {
            self.delivered.lock().unwrap().clone()
        }

        fn attempts(&self, item: &'static str) -> u32 {
            self.attempts.lock().unwrap().get(item).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl FrameHandler<&'static str> for Recorder {
        async fn handle(
            &self,
            item: &'static str,
            attempt: CancellationToken,
        ) -> Result<(), AttemptError> {
            let count = {
                let mut attempts = self.attempts.lock().unwrap();
                let count = attempts.entry(item).or_insert(0);
                *count += 1;
                *count
            };

            if self.always_fail.contains(&item) {
                return Err(AttemptError::Retryable(Error::Transport("refused".into())));
            }
            if count == 1 && self.stall_once.contains(&item) {
                attempt.cancelled().await;
                return Err(AttemptError::Retryable(Error::Cancelled));
            }

            self.delivered.lock().unwrap().push(item);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_head_is_not_overtaken() {
        let queue = Arc::new(FrameQueue::new("outbound"));
        let handler = Arc::new(Recorder::new(vec!["B"], vec![]));
        let cancel = CancellationToken::new();

        for item in ["A", "B", "C"] {
            queue.push(item);
        }

        let task = {
            let queue = queue.clone();
            let handler = handler.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                queue
                    .consume(handler.as_ref(), &RetryPolicy::default(), &cancel)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_secs(12)).await;
        cancel.cancel();
        task.await.unwrap().unwrap();

        assert_eq!(handler.delivered(), vec!["A", "B", "C"]);
        assert_eq!(handler.attempts("B"), 2);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_policy_blocks_later_items() {
        let queue = Arc::new(FrameQueue::new("outbound"));
        let handler = Arc::new(Recorder::new(vec![], vec!["A"]));
        let cancel = CancellationToken::new();
        queue.push("A");
        queue.push("B");

        let policy = RetryPolicy {
            retry_delay: Duration::from_millis(100),
            ..Default::default()
        };
        let task = {
            let queue = queue.clone();
            let handler = handler.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.consume(handler.as_ref(), &policy, &cancel).await })
        };

        tokio::time::sleep(Duration::from_secs(2)).await;
        cancel.cancel();
        task.await.unwrap().unwrap();

        assert!(handler.delivered().is_empty());
        assert!(handler.attempts("A") > 5);
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_policy_drops_head() {
        let queue = Arc::new(FrameQueue::new("outbound"));
        let handler = Arc::new(Recorder::new(vec![], vec!["A"]));
        let cancel = CancellationToken::new();
        queue.push("A");
        queue.push("B");

        let policy = RetryPolicy {
            max_attempts: Some(3),
            ..Default::default()
        };
        let task = {
            let queue = queue.clone();
            let handler = handler.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.consume(handler.as_ref(), &policy, &cancel).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        task.await.unwrap().unwrap();

        assert_eq!(handler.attempts("A"), 3);
        assert_eq!(handler.delivered(), vec!["B"]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_fatal_error_stops_consumer_and_keeps_item() {
        struct Fails;

        #[async_trait]
        impl FrameHandler<&'static str> for Fails {
            async fn handle(&self, _: &'static str, _: CancellationToken) -> Result<(), AttemptError> {
                Err(AttemptError::Fatal(Error::InvalidFrame("garbage".into())))
            }
        }

        let queue = FrameQueue::new("inbound");
        queue.push("garbage");
        let result = queue
            .consume(&Fails, &RetryPolicy::default(), &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(Error::InvalidFrame(_))));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_wait_head_returns_none_when_cancelled() {
        let queue: FrameQueue<String> = FrameQueue::new("inbound");
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(queue.wait_head(&cancel).await.is_none());
    }

    #[tokio::test]
    async fn test_push_wakes_waiting_consumer() {
        let queue = Arc::new(FrameQueue::<String>::new("inbound"));
        let cancel = CancellationToken::new();

        let waiter = {
            let queue = queue.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.wait_head(&cancel).await })
        };

        tokio::task::yield_now().await;
        queue.push("late".to_string());
        assert_eq!(waiter.await.unwrap().as_deref(), Some("late"));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_attempts_are_not_counted() {
        struct NotReadyUntil(tokio::time::Instant);

        #[async_trait]
        impl FrameHandler<&'static str> for NotReadyUntil {
            async fn handle(&self, _: &'static str, _: CancellationToken) -> Result<(), AttemptError> {
                if tokio::time::Instant::now() < self.0 {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    return Err(AttemptError::Deferred(Error::Transport("not ready".into())));
                }
                Ok(())
            }
        }

        let queue = Arc::new(FrameQueue::new("outbound"));
        queue.push("A");
        queue.push("B");
        let handler = Arc::new(NotReadyUntil(
            tokio::time::Instant::now() + Duration::from_secs(3),
        ));
        let cancel = CancellationToken::new();
        let policy = RetryPolicy {
            max_attempts: Some(1),
            ..Default::default()
        };

        let task = {
            let queue = queue.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.consume(handler.as_ref(), &policy, &cancel).await })
        };

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(queue.len(), 2);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(queue.is_empty());
        cancel.cancel();
        task.await.unwrap().unwrap();
    }
}
