//! Inbound frame decoding.
//!
//! A frame is decoded as JSON unless the caller is waiting on an image
//! message type, in which case `publish` events additionally go through the
//! image path and must carry a decodable `msg.data` payload. Anything that
//! cannot be decoded yields `None`: callers treat that as "no usable frame
//! this tick", never as an error.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;
use tracing::trace;

use crate::frame::{Frame, ImageFrame, PublishEvent, TaggedFrame};

/// Substring of a message type that selects the image path.
pub const IMAGE_DISCRIMINATOR: &str = "Image";

/// Whether frames for `msg_type` should be decoded as images.
#[must_use]
pub fn is_image_type(msg_type: &str) -> bool {
    msg_type.contains(IMAGE_DISCRIMINATOR)
}

/// Decode a WebSocket message.
///
/// `expected_type` is the message type the caller is waiting on, if any.
#[must_use]
pub fn decode(message: &Message, expected_type: Option<&str>) -> Option<Frame> {
    let image = expected_type.is_some_and(is_image_type);
    match message {
        Message::Text(text) => decode_text(text.as_str(), image),
        Message::Binary(bytes) => {
            let text = std::str::from_utf8(bytes).ok()?;
            decode_text(text, image)
        }
        _ => None,
    }
}

/// Decode a text frame.
#[must_use]
pub fn decode_text(text: &str, image: bool) -> Option<Frame> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let body: Value = match serde_json::from_str(text) {
        Ok(body) => body,
        Err(e) => {
            trace!(error = %e, "dropping non-JSON frame");
            return None;
        }
    };
    if !body.is_object() {
        return None;
    }

    let frame = match serde_json::from_value::<TaggedFrame>(body.clone()) {
        Ok(tagged) => Frame::from(tagged),
        Err(_) => Frame::Unknown {
            op: body.get("op").and_then(Value::as_str).map(str::to_owned),
            body,
        },
    };

    match frame {
        Frame::Publish(event) if image => decode_image_event(event).map(Frame::Publish),
        other => Some(other),
    }
}

fn decode_image_event(mut event: PublishEvent) -> Option<PublishEvent> {
    let image = decode_image(&event.msg)?;
    event.image = Some(image);
    Some(event)
}

/// Decode a `sensor_msgs/Image` or `sensor_msgs/CompressedImage` payload.
///
/// `data` may be a base64 string (rosbridge's default) or an array of
/// byte values. Returns `None` if the payload is missing or corrupt.
#[must_use]
pub fn decode_image(msg: &Value) -> Option<ImageFrame> {
    let data = match msg.get("data")? {
        Value::String(encoded) => STANDARD.decode(encoded.as_bytes()).ok()?,
        Value::Array(items) => items
            .iter()
            .map(|v| v.as_u64().and_then(|b| u8::try_from(b).ok()))
            .collect::<Option<Vec<u8>>>()?,
        _ => return None,
    };
    if data.is_empty() {
        return None;
    }

    let field = |name: &str| {
        msg.get(name)
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(0)
    };
    let width = field("width");
    let height = field("height");
    let step = field("step");

    // Raw images must carry every row they declare.
    let declared = u64::from(step) * u64::from(height);
    if declared > 0 && (data.len() as u64) < declared {
        trace!(declared, actual = data.len(), "truncated image payload");
        return None;
    }

    let encoding = msg
        .get("encoding")
        .or_else(|| msg.get("format"))
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();

    Some(ImageFrame {
        width,
        height,
        encoding,
        step,
        data,
    })
}
