//! Node handlers.

use serde::Deserialize;
use serde_json::{json, Map, Value};

use rosbridge_client::Scope;

use super::{
    object_schema, parse_params, require, service_values, string_list, tool, BridgeContext,
    ToolDefinition,
};
use crate::error::{BridgeError, BridgeResult};

#[derive(Debug, Deserialize)]
struct NodeParams {
    #[serde(default)]
    node: String,
}

/// Publishers, subscribers and services of one node.
///
/// rosapi names the topic lists `publishing` and `subscribing`.
fn node_summary(values: &Value) -> Value {
    let publishers = string_list(values, "publishing");
    let subscribers = string_list(values, "subscribing");
    let services = string_list(values, "services");
    json!({
        "publisher_count": publishers.len(),
        "subscriber_count": subscribers.len(),
        "service_count": services.len(),
        "publishers": publishers,
        "subscribers": subscribers,
        "services": services,
    })
}

fn is_empty_summary(summary: &Value) -> bool {
    ["publisher_count", "subscriber_count", "service_count"]
        .iter()
        .all(|key| summary[key] == 0)
}

/// List running nodes.
pub async fn get_nodes(ctx: &BridgeContext, _params: Value) -> BridgeResult<Value> {
    let reply = ctx.call("/rosapi/nodes", "rosapi/Nodes", json!({})).await?;
    match service_values(reply)? {
        Some(values) => {
            let nodes = string_list(&values, "nodes");
            Ok(json!({"node_count": nodes.len(), "nodes": nodes}))
        }
        None => Ok(json!({"warning": "No nodes found"})),
    }
}

/// Details of one node.
pub async fn get_node_details(ctx: &BridgeContext, params: Value) -> BridgeResult<Value> {
    let NodeParams { node } = parse_params(params)?;
    require(&node, "Node name")?;

    let reply = ctx
        .call("/rosapi/node_details", "rosapi/NodeDetails", json!({"node": node}))
        .await?;
    let summary = service_values(reply)?
        .map(|values| node_summary(&values))
        .filter(|summary| !is_empty_summary(summary))
        .ok_or_else(|| {
            BridgeError::tool(format!("Node {node} not found or has no details available"))
        })?;

    let mut result = Map::new();
    result.insert("node".to_string(), Value::String(node));
    if let Value::Object(fields) = summary {
        result.extend(fields);
    }
    Ok(Value::Object(result))
}

/// Details of every node.
pub async fn inspect_all(ctx: &BridgeContext, _params: Value) -> BridgeResult<Value> {
    let mut scope = ctx.scope().await?;
    let outcome = inspect_nodes(&mut scope).await;
    scope.release().await;
    outcome
}

async fn inspect_nodes(scope: &mut Scope<'_>) -> BridgeResult<Value> {
    let reply = scope.call_service("/rosapi/nodes", "rosapi/Nodes", json!({})).await?;
    let nodes = service_values(reply)?
        .map(|values| string_list(&values, "nodes"))
        .ok_or_else(|| BridgeError::tool("Failed to get nodes list"))?;

    let mut details = Map::new();
    let mut node_errors = Vec::new();

    for node in &nodes {
        let reply = match scope
            .call_service("/rosapi/node_details", "rosapi/NodeDetails", json!({"node": node}))
            .await
        {
            Ok(reply) => reply,
            Err(e) if e.is_connection() => return Err(e.into()),
            Err(e) => {
                node_errors.push(format!("Node {node}: {e}"));
                continue;
            }
        };

        match reply {
            Some(reply) if reply.failed() => node_errors.push(format!(
                "Node {node}: {}",
                reply.failure_message().unwrap_or("Service call failed")
            )),
            Some(reply) => {
                let values = reply.values.unwrap_or(Value::Null);
                details.insert(node.clone(), node_summary(&values));
            }
            None => node_errors.push(format!("Node {node}: Failed to get node details")),
        }
    }

    Ok(json!({
        "total_nodes": nodes.len(),
        "nodes": details,
        "node_errors": node_errors,
    }))
}

pub(crate) fn definitions() -> Vec<ToolDefinition> {
    vec![
        tool(
            "get_nodes",
            "Get the list of all currently running ROS nodes.",
            object_schema(json!({}), &[]),
        ),
        tool(
            "get_node_details",
            "Get the publishers, subscribers and services of a specific node, e.g. /turtlesim.",
            object_schema(
                json!({"node": {"type": "string", "description": "Node name"}}),
                &["node"],
            ),
        ),
        tool(
            "inspect_all_nodes",
            "Get publishers, subscribers and services of every ROS node.",
            object_schema(json!({}), &[]),
        ),
    ]
}
