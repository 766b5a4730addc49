//! Service handlers.

use serde::Deserialize;
use serde_json::{json, Value};

use super::{
    object_schema, parse_params, require, service_values, string_list, tool, BridgeContext,
    ToolDefinition,
};
use crate::config::secs;
use crate::error::{BridgeError, BridgeResult};

#[derive(Debug, Deserialize)]
struct ServiceParams {
    #[serde(default)]
    service: String,
}

#[derive(Debug, Deserialize)]
struct CallParams {
    #[serde(default)]
    service: String,
    #[serde(default)]
    service_type: String,
    #[serde(default)]
    request: Option<Value>,
    #[serde(default)]
    timeout: Option<f64>,
}

/// List advertised services.
pub async fn get_services(ctx: &BridgeContext, _params: Value) -> BridgeResult<Value> {
    let reply = ctx.call("/rosapi/services", "rosapi/Services", json!({})).await?;
    match service_values(reply)? {
        Some(values) => {
            let services = string_list(&values, "services");
            Ok(json!({"service_count": services.len(), "services": services}))
        }
        None => Ok(json!({"warning": "No services found"})),
    }
}

/// Type of one service.
pub async fn get_service_type(ctx: &BridgeContext, params: Value) -> BridgeResult<Value> {
    let ServiceParams { service } = parse_params(params)?;
    require(&service, "Service name")?;

    let reply = ctx
        .call("/rosapi/service_type", "rosapi/ServiceType", json!({"service": service}))
        .await?;
    let values = service_values(reply)?
        .ok_or_else(|| BridgeError::tool(format!("Failed to get type for service {service}")))?;

    match values.get("type").and_then(Value::as_str) {
        Some(ty) if !ty.is_empty() => Ok(json!({"service": service, "type": ty})),
        _ => Err(BridgeError::tool(format!(
            "Service {service} does not exist or has no type"
        ))),
    }
}

/// Call an arbitrary service and return its reply.
///
/// A reply with `result == false` is returned as-is with `success: false`
/// so the caller sees the service's own message.
pub async fn call_service(ctx: &BridgeContext, params: Value) -> BridgeResult<Value> {
    let p: CallParams = parse_params(params)?;
    require(&p.service, "Service name")?;
    require(&p.service_type, "Service type")?;

    let default_wait = ctx.manager().target().default_timeout;
    let wait = p.timeout.map_or(default_wait, |t| secs(t, default_wait));
    let args = p.request.filter(|r| !r.is_null()).unwrap_or_else(|| json!({}));

    let mut scope = ctx.scope().await?;
    let outcome = scope
        .call_service_with_timeout(&p.service, &p.service_type, args, wait)
        .await;
    scope.release().await;

    let reply = outcome?
        .ok_or_else(|| BridgeError::tool(format!("No response from service {}", p.service)))?;
    Ok(json!({
        "service": p.service,
        "service_type": p.service_type,
        "success": !reply.failed(),
        "result": reply.values.unwrap_or(Value::Null),
    }))
}

pub(crate) fn definitions() -> Vec<ToolDefinition> {
    vec![
        tool(
            "get_services",
            "Get the list of all available ROS services.",
            object_schema(json!({}), &[]),
        ),
        tool(
            "get_service_type",
            "Get the type of a specific service, e.g. /spawn -> turtlesim/Spawn.",
            object_schema(
                json!({"service": {"type": "string", "description": "Service name"}}),
                &["service"],
            ),
        ),
        tool(
            "call_service",
            "Call a ROS service with the given request and return its response.",
            object_schema(
                json!({
                    "service": {"type": "string", "description": "Service name, e.g. /spawn"},
                    "service_type": {"type": "string", "description": "Service type, e.g. turtlesim/Spawn"},
                    "request": {"type": "object", "description": "Request fields (default empty)"},
                    "timeout": {"type": "number", "description": "Seconds to wait for the reply"},
                }),
                &["service", "service_type"],
            ),
        ),
    ]
}
