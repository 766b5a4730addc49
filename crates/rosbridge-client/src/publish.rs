//! Advertise / publish / unadvertise transactions.
//!
//! Only the advertise step is all-or-nothing. Once the topic is advertised
//! every publish is attempted, failures are recorded per message, and the
//! topic is unadvertised exactly once at the end.

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::connection::{deadline_after, time_left, Scope};
use crate::error::{ClientError, ClientResult};
use crate::frame::Operation;

/// Outcome of a publish transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    /// Topic name.
    pub topic: String,
    /// Message type.
    pub msg_type: String,
    /// Messages attempted.
    pub total: usize,
    /// Messages published without a reported error.
    pub succeeded: usize,
    /// `"Message {n}: {reason}"` for each failed message, 1-based.
    pub errors: Vec<String>,
}

impl PublishReport {
    fn new(topic: &str, msg_type: &str, total: usize) -> Self {
        Self {
            topic: topic.to_string(),
            msg_type: msg_type.to_string(),
            total,
            succeeded: 0,
            errors: Vec::new(),
        }
    }

    /// Whether every message was published.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty() && self.succeeded == self.total
    }
}

fn validate_names(topic: &str, msg_type: &str) -> ClientResult<()> {
    if topic.trim().is_empty() || msg_type.trim().is_empty() {
        return Err(ClientError::Validation(
            "Missing required arguments: topic and msg_type must be provided.".into(),
        ));
    }
    Ok(())
}

impl Scope<'_> {
    /// Advertise, publish one message, unadvertise.
    ///
    /// A publish failure is reported in the returned [`PublishReport`], not
    /// as an error.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Validation`] for empty names
    /// - [`ClientError::Connection`] if the advertise cannot be sent
    /// - [`ClientError::Advertise`] if the bridge rejects the advertisement
    pub async fn publish_once(
        &mut self,
        topic: &str,
        msg_type: &str,
        msg: Value,
    ) -> ClientResult<PublishReport> {
        validate_names(topic, msg_type)?;
        self.advertise(topic, msg_type).await?;

        let mut report = PublishReport::new(topic, msg_type, 1);
        match self.publish_checked(topic, msg).await {
            Ok(()) => report.succeeded += 1,
            Err(reason) => report.errors.push(reason),
        }

        self.unadvertise_quietly(topic).await;
        Ok(report)
    }

    /// Advertise, then publish each message followed by its delay, then
    /// unadvertise.
    ///
    /// Every delay is slept even when its publish failed, so the sequence
    /// always takes at least the sum of `delays`.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Validation`] for empty names, an empty message list,
    ///   or mismatched list lengths; nothing is sent in that case
    /// - [`ClientError::Connection`] if the advertise cannot be sent
    /// - [`ClientError::Advertise`] if the bridge rejects the advertisement
    pub async fn publish_sequence(
        &mut self,
        topic: &str,
        msg_type: &str,
        messages: Vec<Value>,
        delays: Vec<Duration>,
    ) -> ClientResult<PublishReport> {
        validate_names(topic, msg_type)?;
        if messages.is_empty() {
            return Err(ClientError::Validation(
                "Missing required arguments: messages and durations must be provided.".into(),
            ));
        }
        if messages.len() != delays.len() {
            return Err(ClientError::Validation(
                "messages and durations must have the same length".into(),
            ));
        }

        self.advertise(topic, msg_type).await?;

        let mut report = PublishReport::new(topic, msg_type, messages.len());
        for (index, (msg, delay)) in messages.into_iter().zip(delays).enumerate() {
            match self.publish_checked(topic, msg).await {
                Ok(()) => report.succeeded += 1,
                Err(reason) => {
                    debug!(topic = %topic, index, reason = %reason, "publish failed");
                    report.errors.push(format!("Message {}: {reason}", index + 1));
                }
            }
            tokio::time::sleep(delay).await;
        }

        self.unadvertise_quietly(topic).await;
        info!(
            topic = %topic,
            total = report.total,
            succeeded = report.succeeded,
            "publish sequence finished"
        );
        Ok(report)
    }

    async fn advertise(&mut self, topic: &str, msg_type: &str) -> ClientResult<()> {
        self.send(&Operation::Advertise {
            topic: topic.to_string(),
            msg_type: msg_type.to_string(),
        })
        .await?;

        let grace = self.config().status_grace;
        if let Some(message) = self.await_error_status(grace).await? {
            return Err(ClientError::Advertise(message));
        }
        debug!(topic = %topic, "advertised");
        Ok(())
    }

    /// Publish one message; `Err` carries the reason it failed.
    async fn publish_checked(&mut self, topic: &str, msg: Value) -> Result<(), String> {
        let op = Operation::Publish {
            topic: topic.to_string(),
            msg,
        };
        self.send(&op).await.map_err(|e| e.to_string())?;

        let grace = self.config().status_grace;
        match self.await_error_status(grace).await {
            Ok(None) => Ok(()),
            Ok(Some(message)) => Err(message),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn unadvertise_quietly(&mut self, topic: &str) {
        let op = Operation::Unadvertise {
            topic: topic.to_string(),
        };
        match self.send(&op).await {
            Ok(()) => debug!(topic = %topic, "unadvertised"),
            Err(e) => warn!(topic = %topic, error = %e, "unadvertise failed"),
        }
    }

    /// Wait up to `grace` for the first frame; report it if it is an error
    /// status. Any other frame ends the wait.
    async fn await_error_status(&mut self, grace: Duration) -> ClientResult<Option<String>> {
        let deadline = deadline_after(grace);
        while let Some(left) = time_left(deadline) {
            if let Some(frame) = self.receive(left).await? {
                return Ok(frame.error_message().map(str::to_owned));
            }
        }
        Ok(None)
    }

    /// Send a bare `unadvertise`. Unknown topics are a no-op on the bridge.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Connection`] if the frame cannot be sent.
    pub async fn unadvertise(&mut self, topic: &str) -> ClientResult<()> {
        self.send(&Operation::Unadvertise {
            topic: topic.to_string(),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_completeness() {
        let mut report = PublishReport::new("/t", "std_msgs/String", 2);
        assert!(!report.is_complete());
        report.succeeded = 2;
        assert!(report.is_complete());
        report.errors.push("Message 2: boom".into());
        assert!(!report.is_complete());
    }

    #[test]
    fn test_validate_names() {
        assert!(validate_names("/t", "std_msgs/String").is_ok());
        assert!(matches!(
            validate_names("", "std_msgs/String"),
            Err(ClientError::Validation(_))
        ));
    }
}
