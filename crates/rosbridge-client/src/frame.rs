//! rosbridge wire frames.
//!
//! Outbound traffic is modelled as [`Operation`], serialized with an `"op"`
//! tag. Inbound traffic decodes into [`Frame`]; anything the client does not
//! recognise is kept as [`Frame::Unknown`] so callers can skip it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ClientError;

/// Status level the bridge uses to report failures mid-stream.
pub const ERROR_LEVEL: &str = "error";

// ─────────────────────────────────────────────────────────────
// Outbound
// ─────────────────────────────────────────────────────────────

/// A request sent to the bridge.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Call a service and expect a correlated `service_response`.
    CallService {
        /// Service name, e.g. `/rosapi/topics`.
        service: String,
        /// Service type, e.g. `rosapi/Topics`.
        #[serde(rename = "type")]
        service_type: String,
        /// Request payload.
        args: Value,
        /// Correlation id.
        id: String,
    },
    /// Start receiving `publish` events for a topic.
    Subscribe {
        /// Topic name.
        topic: String,
        /// Message type.
        #[serde(rename = "type")]
        msg_type: String,
        /// Bridge-side buffer depth.
        #[serde(skip_serializing_if = "Option::is_none")]
        queue_length: Option<u32>,
        /// Minimum interval between delivered messages, in milliseconds.
        #[serde(skip_serializing_if = "Option::is_none")]
        throttle_rate: Option<u32>,
    },
    /// Stop a subscription.
    Unsubscribe {
        /// Topic name.
        topic: String,
    },
    /// Declare intent to publish on a topic.
    Advertise {
        /// Topic name.
        topic: String,
        /// Message type.
        #[serde(rename = "type")]
        msg_type: String,
    },
    /// Withdraw an advertisement.
    Unadvertise {
        /// Topic name.
        topic: String,
    },
    /// Publish one message.
    Publish {
        /// Topic name.
        topic: String,
        /// Message payload.
        msg: Value,
    },
    /// Submit an action goal.
    SendActionGoal {
        /// Goal id.
        id: String,
        /// Action name.
        action: String,
        /// Action type.
        action_type: String,
        /// Goal payload.
        args: Value,
        /// Whether the bridge should forward feedback.
        feedback: bool,
    },
    /// Request cancellation of a goal.
    CancelActionGoal {
        /// Goal id.
        id: String,
        /// Action name.
        action: String,
    },
}

impl Operation {
    /// The `"op"` string of this operation.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CallService { .. } => "call_service",
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::Advertise { .. } => "advertise",
            Self::Unadvertise { .. } => "unadvertise",
            Self::Publish { .. } => "publish",
            Self::SendActionGoal { .. } => "send_action_goal",
            Self::CancelActionGoal { .. } => "cancel_action_goal",
        }
    }

    /// Correlation id, if the operation carries one.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::CallService { id, .. }
            | Self::SendActionGoal { id, .. }
            | Self::CancelActionGoal { id, .. } => Some(id),
            _ => None,
        }
    }

    /// Serialize to a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be encoded.
    pub fn to_json(&self) -> Result<String, ClientError> {
        serde_json::to_string(self).map_err(ClientError::from)
    }
}

// ─────────────────────────────────────────────────────────────
// Inbound
// ─────────────────────────────────────────────────────────────

/// `status` frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StatusFrame {
    /// Severity (`info`, `warning`, `error`, ...).
    #[serde(default)]
    pub level: String,
    /// Human-readable message.
    #[serde(default)]
    pub msg: String,
    /// Id of the operation this status refers to, if any.
    #[serde(default)]
    pub id: Option<String>,
}

impl StatusFrame {
    /// Whether this status reports a failure.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.level == ERROR_LEVEL
    }
}

/// `service_response` frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServiceReply {
    /// Correlation id echoed from the request.
    #[serde(default)]
    pub id: Option<String>,
    /// Service name.
    #[serde(default)]
    pub service: Option<String>,
    /// `false` when the service call failed.
    #[serde(default)]
    pub result: Option<bool>,
    /// Response payload.
    #[serde(default)]
    pub values: Option<Value>,
}

impl ServiceReply {
    /// Whether the bridge reported the call as failed.
    #[must_use]
    pub fn failed(&self) -> bool {
        self.result == Some(false)
    }

    /// The bridge's failure message, if any.
    #[must_use]
    pub fn failure_message(&self) -> Option<&str> {
        self.values.as_ref()?.get("message")?.as_str()
    }

    /// Look up a field in `values`.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.values.as_ref()?.get(key)
    }

    /// Look up a list of strings in `values`; missing or mistyped -> empty.
    #[must_use]
    pub fn string_list(&self, key: &str) -> Vec<String> {
        self.values
            .as_ref()
            .map(|values| string_list(values, key))
            .unwrap_or_default()
    }
}

/// Strings under `key` in a JSON object; missing or mistyped -> empty.
#[must_use]
pub fn string_list(values: &Value, key: &str) -> Vec<String> {
    values
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_owned))
                .collect()
        })
        .unwrap_or_default()
}

/// Decoded image payload of a `publish` event on an image topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFrame {
    /// Width in pixels (0 for compressed images).
    pub width: u32,
    /// Height in pixels (0 for compressed images).
    pub height: u32,
    /// Pixel encoding or compressed format.
    pub encoding: String,
    /// Row length in bytes.
    pub step: u32,
    /// Raw pixel or compressed bytes.
    pub data: Vec<u8>,
}

impl ImageFrame {
    /// Size of the payload in bytes.
    #[must_use]
    pub fn byte_count(&self) -> usize {
        self.data.len()
    }
}

/// Topic `publish` event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PublishEvent {
    /// Topic the message arrived on.
    pub topic: String,
    /// Message payload.
    #[serde(default)]
    pub msg: Value,
    /// Decoded image, when decoded along the image path.
    #[serde(skip)]
    pub image: Option<ImageFrame>,
}

/// `action_feedback` frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ActionFeedback {
    /// Goal id.
    #[serde(default)]
    pub id: Option<String>,
    /// Action name.
    #[serde(default)]
    pub action: Option<String>,
    /// Feedback payload.
    #[serde(default)]
    pub values: Value,
}

/// `action_result` frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ActionResult {
    /// Goal id.
    #[serde(default)]
    pub id: Option<String>,
    /// Action name.
    #[serde(default)]
    pub action: Option<String>,
    /// Whether the goal succeeded.
    #[serde(default)]
    pub result: bool,
    /// Terminal goal status as reported by the bridge.
    #[serde(default)]
    pub status: Option<Value>,
    /// Result payload.
    #[serde(default)]
    pub values: Value,
}

#[derive(Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub(crate) enum TaggedFrame {
    Status(StatusFrame),
    ServiceResponse(ServiceReply),
    Publish(PublishEvent),
    ActionFeedback(ActionFeedback),
    ActionResult(ActionResult),
}

/// Discriminator of an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// `status`
    Status,
    /// `service_response`
    ServiceResponse,
    /// `publish`
    Publish,
    /// `action_feedback`
    ActionFeedback,
    /// `action_result`
    ActionResult,
    /// Anything else.
    Unknown,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Bridge status report.
    Status(StatusFrame),
    /// Reply to a `call_service`.
    ServiceResponse(ServiceReply),
    /// Message on a subscribed topic.
    Publish(PublishEvent),
    /// Progress report for a goal.
    ActionFeedback(ActionFeedback),
    /// Terminal result of a goal.
    ActionResult(ActionResult),
    /// Valid JSON with an unrecognised or malformed op.
    Unknown {
        /// The `"op"` field, if present.
        op: Option<String>,
        /// The full frame body.
        body: Value,
    },
}

impl From<TaggedFrame> for Frame {
    fn from(tagged: TaggedFrame) -> Self {
        match tagged {
            TaggedFrame::Status(s) => Self::Status(s),
            TaggedFrame::ServiceResponse(r) => Self::ServiceResponse(r),
            TaggedFrame::Publish(p) => Self::Publish(p),
            TaggedFrame::ActionFeedback(f) => Self::ActionFeedback(f),
            TaggedFrame::ActionResult(r) => Self::ActionResult(r),
        }
    }
}

impl Frame {
    /// The frame's discriminator.
    #[must_use]
    pub const fn kind(&self) -> FrameKind {
        match self {
            Self::Status(_) => FrameKind::Status,
            Self::ServiceResponse(_) => FrameKind::ServiceResponse,
            Self::Publish(_) => FrameKind::Publish,
            Self::ActionFeedback(_) => FrameKind::ActionFeedback,
            Self::ActionResult(_) => FrameKind::ActionResult,
            Self::Unknown { .. } => FrameKind::Unknown,
        }
    }

    /// Correlation id carried by the frame.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Status(s) => s.id.as_deref(),
            Self::ServiceResponse(r) => r.id.as_deref(),
            Self::ActionFeedback(f) => f.id.as_deref(),
            Self::ActionResult(r) => r.id.as_deref(),
            Self::Publish(_) => None,
            Self::Unknown { body, .. } => body.get("id").and_then(Value::as_str),
        }
    }

    /// The error message if this is a status frame at level `error`.
    ///
    /// Every receive loop checks this before its own matcher.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Status(s) if s.is_error() => {
                Some(if s.msg.is_empty() { "Unknown error" } else { &s.msg })
            }
            _ => None,
        }
    }

    /// The publish event if this frame carries a message for `topic`.
    #[must_use]
    pub fn into_publish_for(self, topic: &str) -> Option<PublishEvent> {
        match self {
            Self::Publish(event) if event.topic == topic => Some(event),
            _ => None,
        }
    }
}
