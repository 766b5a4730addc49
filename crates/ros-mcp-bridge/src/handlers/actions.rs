//! Action handlers: introspection, goal submission and cancellation.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Map, Value};

use rosbridge_client::action::{validate_cancel, CANCEL_NOTE};
use rosbridge_client::{ClientError, GoalRequest, Scope};

use super::{
    object_schema, parse_params, require, service_values, string_list, tool, typedef_fields,
    BridgeContext, ToolDefinition,
};
use crate::error::{BridgeError, BridgeResult};

/// Action names whose types rosapi cannot be relied on to report.
const KNOWN_ACTION_TYPES: &[(&str, &str)] =
    &[("/turtle1/rotate_absolute", "turtlesim/action/RotateAbsolute")];

#[derive(Debug, Deserialize)]
struct ActionParams {
    #[serde(default)]
    action: String,
}

#[derive(Debug, Deserialize)]
struct ActionTypeParams {
    #[serde(default)]
    action_type: String,
}

#[derive(Debug, Deserialize)]
struct GoalParams {
    #[serde(default)]
    action_name: String,
    #[serde(default)]
    action_type: String,
    #[serde(default)]
    goal: Value,
    #[serde(default)]
    timeout: Option<f64>,
    #[serde(default = "default_blocking")]
    blocking: bool,
}

fn default_blocking() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct CancelParams {
    #[serde(default)]
    action_name: String,
    #[serde(default)]
    goal_id: String,
}

// ─────────────────────────────────────────────────────────────
// Type inference
// ─────────────────────────────────────────────────────────────

fn known_action_type(action: &str) -> Option<&'static str> {
    KNOWN_ACTION_TYPES
        .iter()
        .find(|(name, _)| *name == action)
        .map(|(_, ty)| *ty)
}

fn squash(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Action interfaces out of a `/rosapi/interfaces` reply.
fn action_interfaces(values: &Value) -> Vec<String> {
    string_list(values, "interfaces")
        .into_iter()
        .filter(|iface| iface.contains("/action/"))
        .collect()
}

/// Interface whose type name matches the last segment of `action`.
///
/// `/turtle1/rotate_absolute` matches `turtlesim/action/RotateAbsolute`:
/// both sides are compared lowercased with underscores removed.
fn match_interface<'a>(action: &str, interfaces: &'a [String]) -> Option<&'a str> {
    let needle = squash(action.rsplit('/').next().unwrap_or(action));
    if needle.is_empty() {
        return None;
    }
    let short_name = |iface: &str| squash(iface.rsplit('/').next().unwrap_or(iface));

    interfaces
        .iter()
        .find(|iface| short_name(iface) == needle)
        .or_else(|| interfaces.iter().find(|iface| squash(iface).contains(&needle)))
        .map(String::as_str)
}

/// Interfaces list within an open scope; `None` when rosapi gave nothing.
async fn fetch_action_interfaces(scope: &mut Scope<'_>) -> BridgeResult<Option<Vec<String>>> {
    let reply = scope
        .call_service("/rosapi/interfaces", "rosapi/Interfaces", json!({}))
        .await?;
    Ok(service_values(reply)?.map(|values| action_interfaces(&values)))
}

// ─────────────────────────────────────────────────────────────
// Introspection
// ─────────────────────────────────────────────────────────────

/// List action servers.
pub async fn get_actions(ctx: &BridgeContext, _params: Value) -> BridgeResult<Value> {
    let reply = ctx
        .call("/rosapi/action_servers", "rosapi/ActionServers", json!({}))
        .await?;
    match service_values(reply)? {
        Some(values) => {
            let actions = string_list(&values, "action_servers");
            Ok(json!({"action_count": actions.len(), "actions": actions}))
        }
        None => Ok(json!({
            "warning": "No actions found or /rosapi/action_servers service not available"
        })),
    }
}

/// Type of one action.
pub async fn get_action_type(ctx: &BridgeContext, params: Value) -> BridgeResult<Value> {
    let ActionParams { action } = parse_params(params)?;
    require(&action, "Action name")?;

    if let Some(ty) = known_action_type(&action) {
        return Ok(json!({"action": action, "type": ty}));
    }

    let mut scope = ctx.scope().await?;
    let interfaces = fetch_action_interfaces(&mut scope).await;
    scope.release().await;

    let Some(interfaces) = interfaces? else {
        return Err(BridgeError::tool(format!("Failed to get type for action {action}")));
    };
    if let Some(ty) = match_interface(&action, &interfaces) {
        return Ok(json!({"action": action, "type": ty}));
    }
    Ok(json!({
        "error": format!("Action type for {action} not found"),
        "available_action_types": interfaces,
        "suggestion": "This action might not be available or use a different naming pattern",
    }))
}

/// Goal, result and feedback structure of an action type.
pub async fn get_action_details(ctx: &BridgeContext, params: Value) -> BridgeResult<Value> {
    let ActionTypeParams { action_type } = parse_params(params)?;
    require(&action_type, "Action type")?;

    let mut scope = ctx.scope().await?;
    let outcome = action_details(&mut scope, &action_type).await;
    scope.release().await;
    let details = outcome?;

    if details.iter().all(|(_, section)| section.is_empty()) {
        return Err(BridgeError::tool(format!(
            "Action type {action_type} not found or has no definition"
        )));
    }

    let mut result = Map::new();
    result.insert("action_type".to_string(), Value::String(action_type));
    for (part, section) in details {
        result.insert(part.to_string(), Value::Object(section));
    }
    Ok(Value::Object(result))
}

async fn action_details(
    scope: &mut Scope<'_>,
    action_type: &str,
) -> BridgeResult<Vec<(&'static str, Map<String, Value>)>> {
    let parts = [
        ("goal", "/rosapi/action_goal_details", "rosapi_msgs/srv/ActionGoalDetails"),
        ("result", "/rosapi/action_result_details", "rosapi_msgs/srv/ActionResultDetails"),
        ("feedback", "/rosapi/action_feedback_details", "rosapi_msgs/srv/ActionFeedbackDetails"),
    ];

    let mut details = Vec::with_capacity(parts.len());
    for (part, service, service_type) in parts {
        let reply = match scope
            .call_service(service, service_type, json!({"type": action_type}))
            .await
        {
            Ok(reply) => reply,
            Err(e) if e.is_connection() => return Err(e.into()),
            Err(_) => None,
        };

        // The first typedef is the part's own message; the rest are nested types.
        let mut section = Map::new();
        let root = reply
            .filter(|r| !r.failed())
            .and_then(|r| r.values)
            .and_then(|values| typedef_fields(&values).into_iter().next());
        if let Some((_, fields)) = root {
            section.insert("field_count".to_string(), json!(fields.len()));
            section.insert("fields".to_string(), Value::Object(fields));
        }
        details.push((part, section));
    }
    Ok(details)
}

/// Type and availability of every action server.
pub async fn inspect_all(ctx: &BridgeContext, _params: Value) -> BridgeResult<Value> {
    let mut scope = ctx.scope().await?;
    let outcome = inspect_actions(&mut scope).await;
    scope.release().await;
    outcome
}

async fn inspect_actions(scope: &mut Scope<'_>) -> BridgeResult<Value> {
    let reply = scope.call_service("/rosapi/action_servers", "rosapi/ActionServers", json!({})).await?;
    let actions = service_values(reply)?
        .map(|values| string_list(&values, "action_servers"))
        .ok_or_else(|| BridgeError::tool("Failed to get actions list"))?;

    let mut action_errors = Vec::new();
    let needs_lookup = actions.iter().any(|a| known_action_type(a).is_none());
    let interfaces = if needs_lookup {
        match scope
            .call_service("/rosapi/interfaces", "rosapi/Interfaces", json!({}))
            .await
        {
            Ok(reply) => match service_values(reply) {
                Ok(values) => values.map(|v| action_interfaces(&v)).unwrap_or_default(),
                Err(e) => {
                    action_errors.push(format!("Interfaces: {e}"));
                    Vec::new()
                }
            },
            Err(e) if e.is_connection() => return Err(e.into()),
            Err(e) => {
                action_errors.push(format!("Interfaces: {e}"));
                Vec::new()
            }
        }
    } else {
        Vec::new()
    };

    let mut details = Map::new();
    for action in &actions {
        let ty = known_action_type(action).or_else(|| match_interface(action, &interfaces));
        details.insert(
            action.clone(),
            json!({
                "type": ty.unwrap_or("unknown"),
                "status": if ty.is_some() { "available" } else { "type_unknown" },
            }),
        );
    }

    Ok(json!({
        "total_actions": actions.len(),
        "actions": details,
        "action_errors": action_errors,
    }))
}

// ─────────────────────────────────────────────────────────────
// Goals
// ─────────────────────────────────────────────────────────────

/// Send a goal; blocking by default.
pub async fn send_action_goal(ctx: &BridgeContext, params: Value) -> BridgeResult<Value> {
    let p: GoalParams = parse_params(params)?;
    let request = GoalRequest {
        action: p.action_name.clone(),
        action_type: p.action_type.clone(),
        goal: p.goal,
        timeout: p.timeout.and_then(|t| Duration::try_from_secs_f64(t).ok()),
        blocking: p.blocking,
    };
    request.validate()?;

    let mut scope = ctx.scope().await?;
    let outcome = scope.send_action_goal(request).await;
    scope.release().await;

    let outcome = outcome.map_err(|e| match e {
        ClientError::Protocol(msg) => BridgeError::tool(format!("Action goal failed: {msg}")),
        other => other.into(),
    })?;

    let mut result = json!({
        "action": p.action_name,
        "action_type": p.action_type,
        "success": outcome.success,
        "goal_id": outcome.goal.id,
        "status": outcome.status,
    });
    if let Some(fields) = result.as_object_mut() {
        if let Some(value) = outcome.result {
            fields.insert("result".to_string(), value);
        }
        if let Some(feedback) = outcome.last_feedback {
            fields.insert("feedback".to_string(), feedback);
        }
        if let Some(note) = outcome.note {
            fields.insert("note".to_string(), Value::from(note));
        }
    }
    Ok(result)
}

/// Best-effort cancel of a goal by id.
pub async fn cancel_action_goal(ctx: &BridgeContext, params: Value) -> BridgeResult<Value> {
    let CancelParams {
        action_name,
        goal_id,
    } = parse_params(params)?;
    validate_cancel(&action_name, &goal_id)?;

    let mut scope = ctx.scope().await?;
    let outcome = scope.cancel_action_goal(&action_name, &goal_id).await;
    scope.release().await;
    let goal = outcome?;

    Ok(json!({
        "action": goal.action,
        "goal_id": goal.id,
        "success": true,
        "status": "cancel_sent",
        "note": CANCEL_NOTE,
    }))
}

pub(crate) fn definitions() -> Vec<ToolDefinition> {
    vec![
        tool(
            "get_actions",
            "Get the list of all available ROS action servers.",
            object_schema(json!({}), &[]),
        ),
        tool(
            "get_action_type",
            "Get the action type of an action server, e.g. /turtle1/rotate_absolute.",
            object_schema(
                json!({"action": {"type": "string", "description": "Action name"}}),
                &["action"],
            ),
        ),
        tool(
            "get_action_details",
            "Get the goal, result and feedback structure of an action type, e.g. turtlesim/action/RotateAbsolute.",
            object_schema(
                json!({"action_type": {"type": "string", "description": "Action type"}}),
                &["action_type"],
            ),
        ),
        tool(
            "inspect_all_actions",
            "Get the type and availability of every action server.",
            object_schema(json!({}), &[]),
        ),
        tool(
            "send_action_goal",
            "Send a goal to an action server. Blocking calls wait for the result up to the timeout; a goal still running at the deadline is reported as sent, not failed.",
            object_schema(
                json!({
                    "action_name": {"type": "string", "description": "Action name, e.g. /turtle1/rotate_absolute"},
                    "action_type": {"type": "string", "description": "Action type, e.g. turtlesim/action/RotateAbsolute"},
                    "goal": {"type": "object", "description": "Goal message, e.g. {\"theta\": 1.57}"},
                    "timeout": {"type": "number", "description": "Seconds to wait for the result in blocking mode (default 30)"},
                    "blocking": {"type": "boolean", "description": "Wait for the result (default true)"},
                }),
                &["action_name", "action_type", "goal"],
            ),
        ),
        tool(
            "cancel_action_goal",
            "Request cancellation of a goal by id. Does not wait for confirmation.",
            object_schema(
                json!({
                    "action_name": {"type": "string"},
                    "goal_id": {"type": "string", "description": "Id returned by send_action_goal"},
                }),
                &["action_name", "goal_id"],
            ),
        ),
    ]
}
