//! Parameter handlers.
//!
//! rosapi reports parameter outcomes in the reply values (`successful`,
//! `reason`), so a reply is only a failure when it is missing or carries
//! `result == false`.

use serde::Deserialize;
use serde_json::{json, Map, Value};

use rosbridge_client::{Scope, ServiceReply};

use super::{object_schema, parse_params, require, string_list, tool, BridgeContext, ToolDefinition};
use crate::error::{BridgeError, BridgeResult};

#[derive(Debug, Deserialize)]
struct NameParams {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct SetParams {
    #[serde(default)]
    name: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct InspectParams {
    #[serde(default)]
    names: String,
}

/// Values of a usable reply, or the reason it is unusable.
fn reply_values(reply: Option<ServiceReply>) -> Result<Value, String> {
    match reply {
        Some(reply) if reply.failed() => Err(reply
            .failure_message()
            .unwrap_or("Service call failed")
            .to_string()),
        Some(reply) => Ok(reply.values.unwrap_or_else(|| json!({}))),
        None => Err("No response".to_string()),
    }
}

fn field_str(values: &Value, key: &str) -> String {
    values
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn field_bool(values: &Value, key: &str) -> bool {
    values.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// One rosapi parameter call; `verb` names the operation in the error text.
async fn param_call(
    ctx: &BridgeContext,
    service: &str,
    service_type: &str,
    name: &str,
    args: Value,
    verb: &str,
) -> BridgeResult<Value> {
    let reply = ctx.call(service, service_type, args).await?;
    reply_values(reply)
        .map_err(|e| BridgeError::tool(format!("Failed to {verb} parameter {name}: {e}")))
}

/// List parameter names.
pub async fn get_parameters(ctx: &BridgeContext, _params: Value) -> BridgeResult<Value> {
    let reply = ctx
        .call("/rosapi/get_param_names", "rosapi/GetParamNames", json!({}))
        .await?;
    let values = reply_values(reply)
        .map_err(|e| BridgeError::tool(format!("Failed to get parameter names: {e}")))?;
    let names = string_list(&values, "names");
    Ok(json!({"parameter_count": names.len(), "parameters": names}))
}

/// Value of one parameter.
pub async fn get_param(ctx: &BridgeContext, params: Value) -> BridgeResult<Value> {
    let NameParams { name } = parse_params(params)?;
    require(&name, "Parameter name")?;
    let values = param_call(
        ctx,
        "/rosapi/get_param",
        "rosapi/GetParam",
        &name,
        json!({"name": name}),
        "get",
    )
    .await?;
    Ok(json!({
        "name": name,
        "value": field_str(&values, "value"),
        "successful": field_bool(&values, "successful"),
        "reason": field_str(&values, "reason"),
    }))
}

/// Set one parameter. The value is passed to rosapi as its string form.
pub async fn set_param(ctx: &BridgeContext, params: Value) -> BridgeResult<Value> {
    let SetParams { name, value } = parse_params(params)?;
    require(&name, "Parameter name")?;
    let values = param_call(
        ctx,
        "/rosapi/set_param",
        "rosapi/SetParam",
        &name,
        json!({"name": name, "value": value}),
        "set",
    )
    .await?;
    Ok(json!({
        "name": name,
        "value": value,
        "successful": field_bool(&values, "successful"),
        "reason": field_str(&values, "reason"),
    }))
}

/// Whether a parameter exists.
pub async fn has_param(ctx: &BridgeContext, params: Value) -> BridgeResult<Value> {
    let NameParams { name } = parse_params(params)?;
    require(&name, "Parameter name")?;
    let values = param_call(
        ctx,
        "/rosapi/has_param",
        "rosapi/HasParam",
        &name,
        json!({"name": name}),
        "check",
    )
    .await?;
    Ok(json!({
        "name": name,
        "exists": field_bool(&values, "exists"),
        "successful": field_bool(&values, "successful"),
        "reason": field_str(&values, "reason"),
    }))
}

/// Delete one parameter.
pub async fn delete_param(ctx: &BridgeContext, params: Value) -> BridgeResult<Value> {
    let NameParams { name } = parse_params(params)?;
    require(&name, "Parameter name")?;
    let values = param_call(
        ctx,
        "/rosapi/delete_param",
        "rosapi/DeleteParam",
        &name,
        json!({"name": name}),
        "delete",
    )
    .await?;
    Ok(json!({
        "name": name,
        "successful": field_bool(&values, "successful"),
        "reason": field_str(&values, "reason"),
    }))
}

/// Guess a parameter's type from its string form.
fn infer_param_type(value: &str) -> &'static str {
    let unsigned = value.strip_prefix('-').unwrap_or(value);
    if value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("false") {
        "bool"
    } else if !unsigned.is_empty() && unsigned.bytes().all(|b| b.is_ascii_digit()) {
        "int"
    } else if unsigned.parse::<f64>().is_ok() && unsigned.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
        "float"
    } else if value.starts_with('[') && value.ends_with(']') {
        "list"
    } else if value.starts_with('{') && value.ends_with('}') {
        "dict"
    } else {
        "string"
    }
}

/// Value, inferred type and existence of each comma-separated name.
pub async fn inspect_parameters(ctx: &BridgeContext, params: Value) -> BridgeResult<Value> {
    let InspectParams { names } = parse_params(params)?;
    if names.trim().is_empty() {
        return Err(BridgeError::tool("At least one parameter name must be provided"));
    }
    let names: Vec<&str> = names
        .split(',')
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .collect();
    if names.is_empty() {
        return Err(BridgeError::tool("No valid parameter names provided"));
    }

    let mut scope = ctx.scope().await?;
    let outcome = inspect_names(&mut scope, &names).await;
    scope.release().await;
    outcome
}

async fn inspect_names(scope: &mut Scope<'_>, names: &[&str]) -> BridgeResult<Value> {
    let mut details = Map::new();
    let mut parameter_errors = Vec::new();

    for name in names {
        let reply = match scope
            .call_service("/rosapi/get_param", "rosapi/GetParam", json!({"name": name}))
            .await
        {
            Ok(reply) => reply,
            Err(e) if e.is_connection() => return Err(e.into()),
            Err(e) => {
                parameter_errors.push(format!("Parameter {name}: {e}"));
                continue;
            }
        };
        let values = match reply_values(reply) {
            Ok(values) => values,
            Err(_) => {
                parameter_errors.push(format!("Parameter {name}: Failed to get value"));
                continue;
            }
        };

        let value = field_str(&values, "value");
        let exists = field_bool(&values, "successful");
        let param_type = if exists && !value.is_empty() {
            infer_param_type(&value)
        } else {
            "unknown"
        };
        details.insert(
            (*name).to_string(),
            json!({"value": value, "type": param_type, "exists": exists}),
        );
    }

    Ok(json!({
        "total_parameters": names.len(),
        "parameters": details,
        "parameter_errors": parameter_errors,
    }))
}

pub(crate) fn definitions() -> Vec<ToolDefinition> {
    let name = || {
        json!({"name": {"type": "string", "description": "Parameter name, e.g. /turtlesim:background_b"}})
    };
    vec![
        tool(
            "get_parameters",
            "Get the list of all ROS parameter names.",
            object_schema(json!({}), &[]),
        ),
        tool(
            "get_param",
            "Get a single ROS parameter value by name.",
            object_schema(name(), &["name"]),
        ),
        tool(
            "set_param",
            "Set a single ROS parameter value, e.g. set_param('/turtlesim:background_b', '255').",
            object_schema(
                json!({
                    "name": {"type": "string"},
                    "value": {"type": "string", "description": "New value in string form"},
                }),
                &["name", "value"],
            ),
        ),
        tool(
            "has_param",
            "Check whether a ROS parameter exists.",
            object_schema(name(), &["name"]),
        ),
        tool(
            "delete_param",
            "Delete a ROS parameter.",
            object_schema(name(), &["name"]),
        ),
        tool(
            "inspect_parameters",
            "Get value, inferred type and existence of one or more parameters.",
            object_schema(
                json!({"names": {"type": "string", "description": "Comma-separated parameter names"}}),
                &["names"],
            ),
        ),
    ]
}
