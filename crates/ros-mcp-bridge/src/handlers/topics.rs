//! Topic handlers: introspection, subscriptions and publishing.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Map, Value};

use rosbridge_client::{ClientError, Scope, SubscribeOptions};

use super::{
    object_schema, parse_params, require, service_values, string_list, tool, typedef_fields,
    BridgeContext, ToolDefinition,
};
use crate::config::secs;
use crate::error::{BridgeError, BridgeResult};

const MISSING_SUBSCRIBE_ARGS: &str =
    "Missing required arguments: topic and msg_type must be provided.";
const MISSING_PUBLISH_ARGS: &str =
    "Missing required arguments: topic, msg_type, and msg must all be provided.";
const MISSING_SEQUENCE_ARGS: &str =
    "Missing required arguments: topic, msg_type, messages, and durations must all be provided.";

// ─────────────────────────────────────────────────────────────
// Request types
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TopicParams {
    #[serde(default)]
    topic: String,
}

#[derive(Debug, Deserialize)]
struct MessageTypeParams {
    #[serde(default)]
    message_type: String,
}

#[derive(Debug, Deserialize)]
struct SubscribeOnceParams {
    #[serde(default)]
    topic: String,
    #[serde(default)]
    msg_type: String,
    #[serde(default)]
    timeout: Option<f64>,
    #[serde(default)]
    queue_length: Option<i64>,
    #[serde(default)]
    throttle_rate_ms: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SubscribeDurationParams {
    #[serde(default)]
    topic: String,
    #[serde(default)]
    msg_type: String,
    #[serde(default = "default_duration")]
    duration: f64,
    #[serde(default = "default_max_messages")]
    max_messages: usize,
    #[serde(default)]
    queue_length: Option<i64>,
    #[serde(default)]
    throttle_rate_ms: Option<i64>,
}

fn default_duration() -> f64 {
    5.0
}

fn default_max_messages() -> usize {
    100
}

#[derive(Debug, Deserialize)]
struct PublishOnceParams {
    #[serde(default)]
    topic: String,
    #[serde(default)]
    msg_type: String,
    #[serde(default)]
    msg: Value,
}

#[derive(Debug, Deserialize)]
struct PublishSequenceParams {
    #[serde(default)]
    topic: String,
    #[serde(default)]
    msg_type: String,
    #[serde(default)]
    messages: Vec<Value>,
    #[serde(default)]
    durations: Vec<f64>,
}

// ─────────────────────────────────────────────────────────────
// Introspection
// ─────────────────────────────────────────────────────────────

/// List topics and their types.
pub async fn get_topics(ctx: &BridgeContext, _params: Value) -> BridgeResult<Value> {
    let reply = ctx.call("/rosapi/topics", "rosapi/Topics", json!({})).await?;
    Ok(service_values(reply)?.unwrap_or_else(|| json!({"warning": "No topics found"})))
}

/// Message type of one topic.
pub async fn get_topic_type(ctx: &BridgeContext, params: Value) -> BridgeResult<Value> {
    let TopicParams { topic } = parse_params(params)?;
    require(&topic, "Topic name")?;

    let reply = ctx
        .call("/rosapi/topic_type", "rosapi/TopicType", json!({"topic": topic}))
        .await?;
    let values = service_values(reply)?
        .ok_or_else(|| BridgeError::tool(format!("Failed to get type for topic {topic}")))?;

    match values.get("type").and_then(Value::as_str) {
        Some(ty) if !ty.is_empty() => Ok(json!({"topic": topic, "type": ty})),
        _ => Err(BridgeError::tool(format!("Topic {topic} does not exist or has no type"))),
    }
}

/// Field structure of a message type.
pub async fn get_message_details(ctx: &BridgeContext, params: Value) -> BridgeResult<Value> {
    let MessageTypeParams { message_type } = parse_params(params)?;
    require(&message_type, "Message type")?;

    let reply = ctx
        .call(
            "/rosapi/message_details",
            "rosapi/MessageDetails",
            json!({"type": message_type}),
        )
        .await?;
    let values = service_values(reply)?.ok_or_else(|| {
        BridgeError::tool(format!("Failed to get details for message type {message_type}"))
    })?;

    let typedefs = typedef_fields(&values);
    if typedefs.is_empty() {
        return Err(BridgeError::tool(format!(
            "Message type {message_type} not found or has no definition"
        )));
    }

    let mut structure = Map::new();
    for (name, fields) in typedefs {
        let name = if name.is_empty() { message_type.clone() } else { name };
        structure.insert(
            name,
            json!({"field_count": fields.len(), "fields": fields}),
        );
    }
    Ok(json!({"message_type": message_type, "structure": structure}))
}

/// Nodes publishing on a topic.
pub async fn get_publishers(ctx: &BridgeContext, params: Value) -> BridgeResult<Value> {
    peers(ctx, params, Peer::Publishers).await
}

/// Nodes subscribed to a topic.
pub async fn get_subscribers(ctx: &BridgeContext, params: Value) -> BridgeResult<Value> {
    peers(ctx, params, Peer::Subscribers).await
}

#[derive(Debug, Clone, Copy)]
enum Peer {
    Publishers,
    Subscribers,
}

impl Peer {
    const fn service(self) -> (&'static str, &'static str) {
        match self {
            Self::Publishers => ("/rosapi/publishers", "rosapi/Publishers"),
            Self::Subscribers => ("/rosapi/subscribers", "rosapi/Subscribers"),
        }
    }

    const fn key(self) -> &'static str {
        match self {
            Self::Publishers => "publishers",
            Self::Subscribers => "subscribers",
        }
    }

    const fn count_key(self) -> &'static str {
        match self {
            Self::Publishers => "publisher_count",
            Self::Subscribers => "subscriber_count",
        }
    }
}

async fn peers(ctx: &BridgeContext, params: Value, peer: Peer) -> BridgeResult<Value> {
    let TopicParams { topic } = parse_params(params)?;
    require(&topic, "Topic name")?;

    let (service, service_type) = peer.service();
    let reply = ctx.call(service, service_type, json!({"topic": topic})).await?;
    let values = service_values(reply)?.ok_or_else(|| {
        BridgeError::tool(format!("Failed to get {} for topic {topic}", peer.key()))
    })?;

    let nodes = string_list(&values, peer.key());
    let mut result = Map::new();
    result.insert("topic".to_string(), Value::String(topic));
    result.insert(peer.count_key().to_string(), json!(nodes.len()));
    result.insert(peer.key().to_string(), json!(nodes));
    Ok(Value::Object(result))
}

/// Peers of one topic within an open scope. Per-topic failures are
/// recorded in `errors`; connection failures abort.
async fn scoped_peers(
    scope: &mut Scope<'_>,
    topic: &str,
    peer: Peer,
    errors: &mut Vec<String>,
) -> BridgeResult<Vec<String>> {
    let (service, service_type) = peer.service();
    let reply = scope
        .call_service(service, service_type, json!({"topic": topic}))
        .await;
    let failure = match reply {
        Ok(reply) => match service_values(reply) {
            Ok(values) => {
                return Ok(values
                    .map(|v| string_list(&v, peer.key()))
                    .unwrap_or_default());
            }
            Err(e) => e.to_string(),
        },
        Err(e) if e.is_connection() => return Err(e.into()),
        Err(e) => e.to_string(),
    };
    errors.push(format!("Topic {topic} {}: {failure}", peer.key()));
    Ok(Vec::new())
}

/// Type, publishers and subscribers of every topic.
pub async fn inspect_all(ctx: &BridgeContext, _params: Value) -> BridgeResult<Value> {
    let mut scope = ctx.scope().await?;
    let outcome = inspect_topics(&mut scope).await;
    scope.release().await;
    outcome
}

async fn inspect_topics(scope: &mut Scope<'_>) -> BridgeResult<Value> {
    let reply = scope.call_service("/rosapi/topics", "rosapi/Topics", json!({})).await?;
    let values = service_values(reply)?
        .ok_or_else(|| BridgeError::tool("Failed to get topics list"))?;

    let topics = string_list(&values, "topics");
    let types = string_list(&values, "types");
    let mut details = Map::new();
    let mut topic_errors = Vec::new();

    for (i, topic) in topics.iter().enumerate() {
        let topic_type = types.get(i).map_or("unknown", String::as_str);

        let publishers = scoped_peers(scope, topic, Peer::Publishers, &mut topic_errors).await?;
        let subscribers = scoped_peers(scope, topic, Peer::Subscribers, &mut topic_errors).await?;

        details.insert(
            topic.clone(),
            json!({
                "type": topic_type,
                "publisher_count": publishers.len(),
                "subscriber_count": subscribers.len(),
                "publishers": publishers,
                "subscribers": subscribers,
            }),
        );
    }

    Ok(json!({
        "total_topics": topics.len(),
        "topics": details,
        "topic_errors": topic_errors,
    }))
}

// ─────────────────────────────────────────────────────────────
// Subscriptions
// ─────────────────────────────────────────────────────────────

fn subscribe_error(err: ClientError) -> BridgeError {
    match err {
        ClientError::Protocol(msg) => BridgeError::tool(format!("Rosbridge error: {msg}")),
        ClientError::Connection(msg) => BridgeError::tool(format!("Failed to subscribe: {msg}")),
        other => other.into(),
    }
}

/// First message on a topic.
pub async fn subscribe_once(ctx: &BridgeContext, params: Value) -> BridgeResult<Value> {
    let p: SubscribeOnceParams = parse_params(params)?;
    if p.topic.trim().is_empty() || p.msg_type.trim().is_empty() {
        return Err(BridgeError::tool(MISSING_SUBSCRIBE_ARGS));
    }
    let options = SubscribeOptions::new(p.queue_length, p.throttle_rate_ms)?;
    let default_wait = ctx.manager().target().default_timeout;
    let wait = p.timeout.map(|t| secs(t, default_wait));

    let mut scope = ctx.scope().await?;
    let outcome = scope.subscribe_once(&p.topic, &p.msg_type, wait, options).await;
    scope.release().await;
    let received = outcome.map_err(subscribe_error)?;

    Ok(match received.image {
        Some(image) => json!({
            "message": "Image received successfully",
            "topic": received.topic,
            "image": {
                "width": image.width,
                "height": image.height,
                "encoding": image.encoding,
                "step": image.step,
                "byte_count": image.byte_count(),
            },
        }),
        None => json!({ "msg": received.msg }),
    })
}

/// Messages on a topic over a window.
pub async fn subscribe_for_duration(ctx: &BridgeContext, params: Value) -> BridgeResult<Value> {
    let p: SubscribeDurationParams = parse_params(params)?;
    if p.topic.trim().is_empty() || p.msg_type.trim().is_empty() {
        return Err(BridgeError::tool(MISSING_SUBSCRIBE_ARGS));
    }
    let options = SubscribeOptions::new(p.queue_length, p.throttle_rate_ms)?;
    let duration = Duration::try_from_secs_f64(p.duration)
        .map_err(|_| BridgeError::tool("duration must be a non-negative number of seconds"))?;

    let mut scope = ctx.scope().await?;
    let outcome = scope
        .subscribe_for_duration(&p.topic, &p.msg_type, duration, p.max_messages, options)
        .await;
    scope.release().await;
    let collected = outcome.map_err(subscribe_error)?;

    Ok(json!({
        "topic": collected.topic,
        "collected_count": collected.collected_count(),
        "messages": collected.messages,
        "status_errors": collected.status_errors,
    }))
}

// ─────────────────────────────────────────────────────────────
// Publishing
// ─────────────────────────────────────────────────────────────

fn is_empty_message(msg: &Value) -> bool {
    match msg {
        Value::Null => true,
        Value::Object(fields) => fields.is_empty(),
        _ => false,
    }
}

/// Advertise, publish one message, unadvertise.
pub async fn publish_once(ctx: &BridgeContext, params: Value) -> BridgeResult<Value> {
    let p: PublishOnceParams = parse_params(params)?;
    if p.topic.trim().is_empty() || p.msg_type.trim().is_empty() || is_empty_message(&p.msg) {
        return Err(BridgeError::tool(MISSING_PUBLISH_ARGS));
    }

    let mut scope = ctx.scope().await?;
    let outcome = scope.publish_once(&p.topic, &p.msg_type, p.msg).await;
    scope.release().await;
    let report = outcome?;

    if let Some(reason) = report.errors.first() {
        return Err(BridgeError::tool(format!("Publish failed: {reason}")));
    }
    Ok(json!({
        "success": true,
        "note": "Message published using advertise → publish → unadvertise pattern",
    }))
}

/// Publish a sequence of messages, each followed by its delay.
pub async fn publish_for_durations(ctx: &BridgeContext, params: Value) -> BridgeResult<Value> {
    let p: PublishSequenceParams = parse_params(params)?;
    if p.topic.trim().is_empty()
        || p.msg_type.trim().is_empty()
        || p.messages.is_empty()
        || p.durations.is_empty()
    {
        return Err(BridgeError::tool(MISSING_SEQUENCE_ARGS));
    }
    let delays = p
        .durations
        .iter()
        .map(|d| Duration::try_from_secs_f64(*d))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| BridgeError::tool("durations must be non-negative numbers of seconds"))?;

    let mut scope = ctx.scope().await?;
    let outcome = scope
        .publish_sequence(&p.topic, &p.msg_type, p.messages, delays)
        .await;
    scope.release().await;
    let report = outcome?;

    Ok(json!({
        "success": true,
        "published_count": report.succeeded,
        "total_messages": report.total,
        "topic": report.topic,
        "msg_type": report.msg_type,
        "errors": report.errors,
    }))
}

// ─────────────────────────────────────────────────────────────
// Catalogue
// ─────────────────────────────────────────────────────────────

pub(crate) fn definitions() -> Vec<ToolDefinition> {
    let topic = json!({"topic": {"type": "string", "description": "Topic name, e.g. /cmd_vel"}});
    let flow_control = json!({
        "queue_length": {"type": "integer", "minimum": 1, "description": "Messages buffered on the bridge before old ones are dropped"},
        "throttle_rate_ms": {"type": "integer", "minimum": 0, "description": "Minimum interval between messages in milliseconds"},
    });
    let with_flow_control = |mut props: Value| {
        if let (Some(target), Some(extra)) = (props.as_object_mut(), flow_control.as_object()) {
            target.extend(extra.clone());
        }
        props
    };

    vec![
        tool(
            "get_topics",
            "Fetch available topics and their message types from the ROS bridge.",
            object_schema(json!({}), &[]),
        ),
        tool(
            "get_topic_type",
            "Get the message type for a specific topic.",
            object_schema(topic.clone(), &["topic"]),
        ),
        tool(
            "get_message_details",
            "Get the complete structure/definition of a message type, e.g. geometry_msgs/Twist.",
            object_schema(
                json!({"message_type": {"type": "string", "description": "Message type, e.g. geometry_msgs/Twist"}}),
                &["message_type"],
            ),
        ),
        tool(
            "get_publishers_for_topic",
            "Get the list of nodes publishing to a specific topic.",
            object_schema(topic.clone(), &["topic"]),
        ),
        tool(
            "get_subscribers_for_topic",
            "Get the list of nodes subscribed to a specific topic.",
            object_schema(topic, &["topic"]),
        ),
        tool(
            "inspect_all_topics",
            "Get types, publishers and subscribers of every ROS topic.",
            object_schema(json!({}), &[]),
        ),
        tool(
            "subscribe_once",
            "Subscribe to a topic and return the first message received. Image topics return image metadata.",
            object_schema(
                with_flow_control(json!({
                    "topic": {"type": "string"},
                    "msg_type": {"type": "string", "description": "Message type, e.g. std_msgs/String"},
                    "timeout": {"type": "number", "description": "Seconds to wait; only set for slow topics"},
                })),
                &["topic", "msg_type"],
            ),
        ),
        tool(
            "subscribe_for_duration",
            "Subscribe to a topic for a duration and collect messages.",
            object_schema(
                with_flow_control(json!({
                    "topic": {"type": "string"},
                    "msg_type": {"type": "string"},
                    "duration": {"type": "number", "description": "Seconds to listen (default 5)"},
                    "max_messages": {"type": "integer", "description": "Stop after this many messages (default 100)"},
                })),
                &["topic", "msg_type"],
            ),
        ),
        tool(
            "publish_once",
            "Publish a single message to a topic using advertise, publish, unadvertise.",
            object_schema(
                json!({
                    "topic": {"type": "string"},
                    "msg_type": {"type": "string"},
                    "msg": {"type": "object", "description": "Message payload"},
                }),
                &["topic", "msg_type", "msg"],
            ),
        ),
        tool(
            "publish_for_durations",
            "Publish a sequence of messages, waiting the matching duration after each one.",
            object_schema(
                json!({
                    "topic": {"type": "string"},
                    "msg_type": {"type": "string"},
                    "messages": {"type": "array", "items": {"type": "object"}},
                    "durations": {"type": "array", "items": {"type": "number"}, "description": "Seconds to wait after each message"},
                }),
                &["topic", "msg_type", "messages", "durations"],
            ),
        ),
    ]
}
