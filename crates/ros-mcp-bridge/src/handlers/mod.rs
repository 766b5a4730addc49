//! Request handlers
//!
//! Dispatches MCP methods and routes `tools/call` to the tool modules.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

pub(crate) use rosbridge_client::frame::string_list;
use rosbridge_client::{ConnectionManager, Scope, ServiceReply};

use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::protocol::{Request, Response, ToolResult, PROTOCOL_VERSION, SERVER_NAME};

pub mod actions;
pub mod connection;
pub mod nodes;
pub mod params;
pub mod robots;
pub mod services;
pub mod topics;

/// Shared state for every tool call.
#[derive(Debug)]
pub struct BridgeContext {
    manager: ConnectionManager,
    config: BridgeConfig,
}

impl BridgeContext {
    /// Build the context; no connection is opened until a tool needs one.
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            manager: ConnectionManager::new(config.client_config()),
            config,
        }
    }

    /// The rosbridge connection manager.
    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Bridge configuration.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Open a connection scope.
    pub(crate) async fn scope(&self) -> BridgeResult<Scope<'_>> {
        Ok(self.manager.acquire().await?)
    }

    /// One rosapi call in its own scope.
    pub(crate) async fn call(
        &self,
        service: &str,
        service_type: &str,
        args: Value,
    ) -> BridgeResult<Option<ServiceReply>> {
        let mut scope = self.scope().await?;
        let reply = scope.call_service(service, service_type, args).await;
        scope.release().await;
        Ok(reply?)
    }
}

/// Handle one input line. Returns `None` for notifications.
pub async fn handle_line(ctx: &BridgeContext, line: &str) -> Option<Response> {
    let request: Request = match serde_json::from_str(line) {
        Ok(req) => req,
        Err(e) => {
            return Some(Response::error(
                Value::Null,
                crate::protocol::PARSE_ERROR,
                e.to_string(),
            ));
        }
    };
    handle_request(ctx, request).await
}

/// Handle a parsed request. Returns `None` for notifications.
pub async fn handle_request(ctx: &BridgeContext, request: Request) -> Option<Response> {
    if request.is_notification() {
        tracing::debug!(method = %request.method, "notification");
        return None;
    }
    let id = request.id.unwrap_or(Value::Null);

    if request.jsonrpc.as_deref().is_some_and(|v| v != "2.0") {
        return Some(Response::error(
            id,
            crate::protocol::INVALID_REQUEST,
            "jsonrpc must be \"2.0\"",
        ));
    }

    let result = dispatch(ctx, &request.method, request.params).await;

    Some(match result {
        Ok(value) => Response::success(id, value),
        Err(e) => Response::error(id, e.code(), e.to_string()),
    })
}

/// Dispatch an MCP method
async fn dispatch(ctx: &BridgeContext, method: &str, params: Value) -> BridgeResult<Value> {
    match method {
        "initialize" => Ok(json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {"tools": {}},
            "serverInfo": {"name": SERVER_NAME, "version": env!("CARGO_PKG_VERSION")},
        })),
        "ping" => Ok(json!({})),
        "tools/list" => Ok(json!({"tools": tool_definitions()})),
        "tools/call" => {
            let call: ToolCall = parse_params(params)?;
            let value = call_tool(ctx, &call.name, call.arguments).await?;
            to_json(ToolResult::from_value(&value))
        }
        _ => Err(BridgeError::MethodNotFound(method.to_string())),
    }
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Run a tool and return its JSON object.
///
/// Tool failures come back as `{"error": ...}`; only unknown tools and
/// malformed arguments are RPC errors.
///
/// # Errors
///
/// Returns [`BridgeError::UnknownTool`] or [`BridgeError::InvalidParams`].
pub async fn call_tool(ctx: &BridgeContext, name: &str, arguments: Value) -> BridgeResult<Value> {
    info!(tool = %name, "tool call");
    let arguments = if arguments.is_null() { json!({}) } else { arguments };

    match route(ctx, name, arguments).await {
        Err(BridgeError::Tool(message)) => Ok(json!({ "error": message })),
        other => other,
    }
}

async fn route(ctx: &BridgeContext, name: &str, args: Value) -> BridgeResult<Value> {
    match name {
        // Connection
        "connect_to_robot" => connection::connect_to_robot(ctx, args).await,
        "ping_robot" => connection::ping_robot(ctx, args).await,

        // Robot specifications
        "get_robot_config" => robots::get_robot_config(ctx, args).await,
        "list_verified_robot_specifications" => robots::list_specifications(ctx, args).await,

        // Topics
        "get_topics" => topics::get_topics(ctx, args).await,
        "get_topic_type" => topics::get_topic_type(ctx, args).await,
        "get_message_details" => topics::get_message_details(ctx, args).await,
        "get_publishers_for_topic" => topics::get_publishers(ctx, args).await,
        "get_subscribers_for_topic" => topics::get_subscribers(ctx, args).await,
        "inspect_all_topics" => topics::inspect_all(ctx, args).await,
        "subscribe_once" => topics::subscribe_once(ctx, args).await,
        "subscribe_for_duration" => topics::subscribe_for_duration(ctx, args).await,
        "publish_once" => topics::publish_once(ctx, args).await,
        "publish_for_durations" => topics::publish_for_durations(ctx, args).await,

        // Services
        "get_services" => services::get_services(ctx, args).await,
        "get_service_type" => services::get_service_type(ctx, args).await,
        "call_service" => services::call_service(ctx, args).await,

        // Nodes
        "get_nodes" => nodes::get_nodes(ctx, args).await,
        "get_node_details" => nodes::get_node_details(ctx, args).await,
        "inspect_all_nodes" => nodes::inspect_all(ctx, args).await,

        // Parameters
        "get_parameters" => params::get_parameters(ctx, args).await,
        "get_param" => params::get_param(ctx, args).await,
        "set_param" => params::set_param(ctx, args).await,
        "has_param" => params::has_param(ctx, args).await,
        "delete_param" => params::delete_param(ctx, args).await,
        "inspect_parameters" => params::inspect_parameters(ctx, args).await,

        // Actions
        "get_actions" => actions::get_actions(ctx, args).await,
        "get_action_type" => actions::get_action_type(ctx, args).await,
        "get_action_details" => actions::get_action_details(ctx, args).await,
        "inspect_all_actions" => actions::inspect_all(ctx, args).await,
        "send_action_goal" => actions::send_action_goal(ctx, args).await,
        "cancel_action_goal" => actions::cancel_action_goal(ctx, args).await,

        _ => Err(BridgeError::UnknownTool(name.to_string())),
    }
}

// ─────────────────────────────────────────────────────────────
// Tool catalogue
// ─────────────────────────────────────────────────────────────

/// Entry in the `tools/list` catalogue.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    /// Tool name
    pub name: &'static str,
    /// Description shown to the agent
    pub description: &'static str,
    /// JSON Schema of the arguments
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Every tool this server exposes.
pub fn tool_definitions() -> Vec<ToolDefinition> {
    let mut tools = Vec::new();
    tools.extend(connection::definitions());
    tools.extend(robots::definitions());
    tools.extend(topics::definitions());
    tools.extend(services::definitions());
    tools.extend(nodes::definitions());
    tools.extend(params::definitions());
    tools.extend(actions::definitions());
    tools
}

pub(crate) fn tool(name: &'static str, description: &'static str, input_schema: Value) -> ToolDefinition {
    ToolDefinition {
        name,
        description,
        input_schema,
    }
}

/// Object schema with the given properties and required keys.
pub(crate) fn object_schema(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

// ─────────────────────────────────────────────────────────────
// Helper functions
// ─────────────────────────────────────────────────────────────

/// Parse params into a typed struct
pub fn parse_params<T: for<'de> Deserialize<'de>>(params: Value) -> BridgeResult<T> {
    serde_json::from_value(params).map_err(|e| BridgeError::InvalidParams(e.to_string()))
}

/// Convert a result to JSON value
pub fn to_json<T: Serialize>(value: T) -> BridgeResult<Value> {
    serde_json::to_value(value).map_err(BridgeError::from)
}

/// Reject blank names with `"{what} cannot be empty"`.
pub(crate) fn require(value: &str, what: &str) -> BridgeResult<()> {
    if value.trim().is_empty() {
        return Err(BridgeError::tool(format!("{what} cannot be empty")));
    }
    Ok(())
}

/// The `values` of a rosapi reply, if any.
///
/// A reply with `result == false` becomes `"Service call failed: ..."`.
pub(crate) fn service_values(reply: Option<ServiceReply>) -> BridgeResult<Option<Value>> {
    match reply {
        Some(reply) if reply.failed() => Err(BridgeError::tool(format!(
            "Service call failed: {}",
            reply.failure_message().unwrap_or("Service call failed")
        ))),
        reply => Ok(reply.and_then(|r| r.values)),
    }
}

/// Field name -> field type for each typedef in a rosapi details reply.
///
/// Returns `(type name, fields)` pairs in reply order.
pub(crate) fn typedef_fields(values: &Value) -> Vec<(String, serde_json::Map<String, Value>)> {
    values
        .get("typedefs")
        .and_then(Value::as_array)
        .map(|typedefs| {
            typedefs
                .iter()
                .map(|typedef| {
                    let name = typedef
                        .get("type")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    let fields = string_list(typedef, "fieldnames")
                        .into_iter()
                        .zip(string_list(typedef, "fieldtypes"))
                        .map(|(field, ty)| (field, Value::String(ty)))
                        .collect();
                    (name, fields)
                })
                .collect()
        })
        .unwrap_or_default()
}
