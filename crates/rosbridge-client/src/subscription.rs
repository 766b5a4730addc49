//! Topic subscription sessions.
//!
//! Both modes bracket their polling loop with `subscribe` and exactly one
//! `unsubscribe`, whatever ends the loop.

use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::connection::{deadline_after, time_left, Scope};
use crate::error::{ClientError, ClientResult};
use crate::frame::{ImageFrame, Operation};

/// Poll interval while waiting for topic messages.
pub const SUBSCRIBE_TICK: Duration = Duration::from_millis(500);

/// Error message when no message arrives before the deadline.
pub const TIMEOUT_MESSAGE: &str = "Timeout waiting for message from topic";

/// Bridge-side flow control for a subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    queue_length: Option<u32>,
    throttle_rate_ms: Option<u32>,
}

impl SubscribeOptions {
    /// Validate flow-control settings.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Validation`] if `queue_length < 1` or
    /// `throttle_rate_ms < 0`.
    pub fn new(queue_length: Option<i64>, throttle_rate_ms: Option<i64>) -> ClientResult<Self> {
        let queue_length = queue_length
            .map(|q| {
                u32::try_from(q)
                    .ok()
                    .filter(|q| *q >= 1)
                    .ok_or_else(|| ClientError::Validation("queue_length must be an integer ≥ 1".into()))
            })
            .transpose()?;
        let throttle_rate_ms = throttle_rate_ms
            .map(|t| {
                u32::try_from(t).map_err(|_| {
                    ClientError::Validation("throttle_rate_ms must be an integer ≥ 0".into())
                })
            })
            .transpose()?;
        Ok(Self {
            queue_length,
            throttle_rate_ms,
        })
    }

    /// Buffer depth on the bridge.
    #[must_use]
    pub const fn queue_length(&self) -> Option<u32> {
        self.queue_length
    }

    /// Minimum interval between messages, in milliseconds.
    #[must_use]
    pub const fn throttle_rate_ms(&self) -> Option<u32> {
        self.throttle_rate_ms
    }
}

/// One subscription's bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    topic: String,
    msg_type: String,
    options: SubscribeOptions,
    active: bool,
}

impl Subscription {
    /// Describe a subscription.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Validation`] if topic or type is empty.
    pub fn new(
        topic: impl Into<String>,
        msg_type: impl Into<String>,
        options: SubscribeOptions,
    ) -> ClientResult<Self> {
        let topic = topic.into();
        let msg_type = msg_type.into();
        if topic.trim().is_empty() || msg_type.trim().is_empty() {
            return Err(ClientError::Validation(
                "Missing required arguments: topic and msg_type must be provided.".into(),
            ));
        }
        Ok(Self {
            topic,
            msg_type,
            options,
            active: false,
        })
    }

    /// Topic name.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Message type.
    #[must_use]
    pub fn msg_type(&self) -> &str {
        &self.msg_type
    }

    /// True strictly between the subscribe and unsubscribe sends.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    fn subscribe_op(&self) -> Operation {
        Operation::Subscribe {
            topic: self.topic.clone(),
            msg_type: self.msg_type.clone(),
            queue_length: self.options.queue_length,
            throttle_rate: self.options.throttle_rate_ms,
        }
    }

    async fn open(&mut self, scope: &mut Scope<'_>) -> ClientResult<()> {
        scope.send(&self.subscribe_op()).await?;
        self.active = true;
        debug!(topic = %self.topic, msg_type = %self.msg_type, "subscribed");
        Ok(())
    }

    /// Send `unsubscribe`; failures are logged and swallowed.
    async fn close(&mut self, scope: &mut Scope<'_>) {
        if !self.active {
            return;
        }
        self.active = false;
        let op = Operation::Unsubscribe {
            topic: self.topic.clone(),
        };
        match scope.send(&op).await {
            Ok(()) => debug!(topic = %self.topic, "unsubscribed"),
            Err(e) => warn!(topic = %self.topic, error = %e, "unsubscribe failed"),
        }
    }
}

/// The first message received on a topic.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    /// Topic name.
    pub topic: String,
    /// Message payload.
    pub msg: Value,
    /// Decoded image for image message types.
    pub image: Option<ImageFrame>,
}

/// Messages collected over a bounded window.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectedMessages {
    /// Topic name.
    pub topic: String,
    /// Payloads in receive order.
    pub messages: Vec<Value>,
    /// Error statuses seen during collection.
    pub status_errors: Vec<String>,
}

impl CollectedMessages {
    /// Number of messages collected.
    #[must_use]
    pub fn collected_count(&self) -> usize {
        self.messages.len()
    }
}

impl Scope<'_> {
    /// Subscribe and return the first message published on `topic`.
    ///
    /// `wait` defaults to the scope's default timeout.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Validation`] for empty names
    /// - [`ClientError::Connection`] if the subscribe cannot be sent or the
    ///   socket fails mid-wait
    /// - [`ClientError::Protocol`] if the bridge reports an error status
    /// - [`ClientError::Timeout`] if nothing arrives in time
    pub async fn subscribe_once(
        &mut self,
        topic: &str,
        msg_type: &str,
        wait: Option<Duration>,
        options: SubscribeOptions,
    ) -> ClientResult<ReceivedMessage> {
        let mut subscription = Subscription::new(topic, msg_type, options)?;
        subscription.open(self).await?;

        let deadline = deadline_after(wait.unwrap_or_else(|| self.default_timeout()));
        let outcome = self.await_first(&subscription, deadline).await;
        subscription.close(self).await;
        outcome
    }

    async fn await_first(
        &mut self,
        subscription: &Subscription,
        deadline: Instant,
    ) -> ClientResult<ReceivedMessage> {
        while let Some(left) = time_left(deadline) {
            let Some(frame) = self
                .receive_for(left.min(SUBSCRIBE_TICK), Some(subscription.msg_type()))
                .await?
            else {
                continue;
            };

            if let Some(message) = frame.error_message() {
                return Err(ClientError::Protocol(message.to_string()));
            }

            if let Some(event) = frame.into_publish_for(subscription.topic()) {
                return Ok(ReceivedMessage {
                    topic: event.topic,
                    msg: event.msg,
                    image: event.image,
                });
            }
        }
        Err(ClientError::Timeout(TIMEOUT_MESSAGE.into()))
    }

    /// Subscribe and collect messages until `duration` elapses or
    /// `max_messages` have arrived.
    ///
    /// Error statuses are recorded and collection continues.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Validation`] for empty names
    /// - [`ClientError::Connection`] if the subscribe cannot be sent or the
    ///   socket fails mid-collection
    pub async fn subscribe_for_duration(
        &mut self,
        topic: &str,
        msg_type: &str,
        duration: Duration,
        max_messages: usize,
        options: SubscribeOptions,
    ) -> ClientResult<CollectedMessages> {
        let mut subscription = Subscription::new(topic, msg_type, options)?;
        subscription.open(self).await?;

        let mut collected = CollectedMessages {
            topic: topic.to_string(),
            messages: Vec::new(),
            status_errors: Vec::new(),
        };
        let deadline = deadline_after(duration);
        let outcome = self
            .collect(&subscription, deadline, max_messages, &mut collected)
            .await;
        subscription.close(self).await;
        outcome?;

        info!(
            topic = %topic,
            collected = collected.collected_count(),
            status_errors = collected.status_errors.len(),
            "collection finished"
        );
        Ok(collected)
    }

    async fn collect(
        &mut self,
        subscription: &Subscription,
        deadline: Instant,
        max_messages: usize,
        collected: &mut CollectedMessages,
    ) -> ClientResult<()> {
        while collected.messages.len() < max_messages {
            let Some(left) = time_left(deadline) else {
                break;
            };
            let Some(frame) = self.receive(left.min(SUBSCRIBE_TICK)).await? else {
                continue;
            };

            if let Some(message) = frame.error_message() {
                collected.status_errors.push(message.to_string());
                continue;
            }

            if let Some(event) = frame.into_publish_for(subscription.topic()) {
                collected.messages.push(event.msg);
            }
        }
        Ok(())
    }

    /// Send a bare `unsubscribe`. Unknown topics are a no-op on the bridge.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Connection`] if the frame cannot be sent.
    pub async fn unsubscribe(&mut self, topic: &str) -> ClientResult<()> {
        self.send(&Operation::Unsubscribe {
            topic: topic.to_string(),
        })
        .await
    }
}
