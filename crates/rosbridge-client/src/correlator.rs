//! Request/response correlation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, trace};

use crate::connection::{deadline_after, time_left, Scope};
use crate::error::{ClientError, ClientResult};
use crate::frame::{Frame, Operation, ServiceReply};

/// Poll interval while waiting for a correlated reply.
pub const REQUEST_TICK: Duration = Duration::from_millis(100);

static REQUEST_SEQ: AtomicU64 = AtomicU64::new(1);

/// A fresh correlation id for a call to `service`.
#[must_use]
pub fn next_request_id(service: &str) -> String {
    let seq = REQUEST_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("call_service:{service}:{seq}")
}

impl Scope<'_> {
    /// Send `op` and wait for the `service_response` carrying its id.
    ///
    /// Returns `Ok(None)` if no matching reply arrives before `wait`
    /// elapses. Frames with other ids are skipped.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Validation`] if `op` carries no id
    /// - [`ClientError::Connection`] if the send or a read fails
    /// - [`ClientError::Protocol`] if the bridge reports an error status for
    ///   this request
    pub async fn request(
        &mut self,
        op: Operation,
        wait: Duration,
    ) -> ClientResult<Option<ServiceReply>> {
        let Some(id) = op.id().map(str::to_owned) else {
            return Err(ClientError::Validation(format!(
                "{} cannot be correlated without an id",
                op.name()
            )));
        };

        self.send(&op).await?;
        let deadline = deadline_after(wait);

        while let Some(left) = time_left(deadline) {
            let Some(frame) = self.receive(left.min(REQUEST_TICK)).await? else {
                continue;
            };

            if let Some(message) = frame.error_message() {
                if frame.id().is_none_or(|frame_id| frame_id == id) {
                    return Err(ClientError::Protocol(message.to_string()));
                }
                continue;
            }

            match frame {
                Frame::ServiceResponse(reply) if reply.id.as_deref() == Some(id.as_str()) => {
                    trace!(id = %id, "correlated reply");
                    return Ok(Some(reply));
                }
                other => trace!(id = %id, kind = ?other.kind(), "skipping uncorrelated frame"),
            }
        }

        debug!(id = %id, "no response before deadline");
        Ok(None)
    }

    /// Call a service with a generated id and the scope's default timeout.
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request).
    pub async fn call_service(
        &mut self,
        service: &str,
        service_type: &str,
        args: Value,
    ) -> ClientResult<Option<ServiceReply>> {
        let wait = self.default_timeout();
        self.call_service_with_timeout(service, service_type, args, wait)
            .await
    }

    /// Call a service with a generated id.
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request).
    pub async fn call_service_with_timeout(
        &mut self,
        service: &str,
        service_type: &str,
        args: Value,
        wait: Duration,
    ) -> ClientResult<Option<ServiceReply>> {
        let op = Operation::CallService {
            service: service.to_string(),
            service_type: service_type.to_string(),
            args,
            id: next_request_id(service),
        };
        self.request(op, wait).await
    }
}
