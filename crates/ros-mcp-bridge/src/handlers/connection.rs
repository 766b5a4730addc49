//! Connection handlers: target selection and reachability probes.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::{timeout, Instant};
use tracing::info;

use super::{object_schema, parse_params, to_json, tool, BridgeContext, ToolDefinition};
use crate::config::secs;
use crate::error::BridgeResult;

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

// ─────────────────────────────────────────────────────────────
// Request/Response types
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ConnectParams {
    #[serde(default)]
    ip: Option<String>,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    ping_timeout: Option<f64>,
    #[serde(default)]
    port_timeout: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct PingParams {
    ip: String,
    port: u16,
    #[serde(default)]
    ping_timeout: Option<f64>,
    #[serde(default)]
    port_timeout: Option<f64>,
}

/// Result of a reachability probe.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProbeResult {
    /// Probed host
    pub ip: String,
    /// Probed port
    pub port: u16,
    /// Host name resolved to at least one address
    pub host_resolved: bool,
    /// A TCP connection to the port succeeded
    pub port_open: bool,
    /// Connect latency in milliseconds, when the port is open
    pub latency_ms: Option<f64>,
    /// Human-readable summary
    pub message: String,
}

// ─────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────

/// Set the rosbridge target and test connectivity.
pub async fn connect_to_robot(ctx: &BridgeContext, params: Value) -> BridgeResult<Value> {
    let params: ConnectParams = parse_params(params)?;
    let defaults = &ctx.config().rosbridge;

    let ip = normalize_ip(params.ip.as_deref().unwrap_or(&defaults.ip));
    let port = params.port.filter(|p| *p != 0).unwrap_or(defaults.port);

    ctx.manager().set_target(ip.clone(), port);
    info!(ip = %ip, port, "robot target set");

    let probe = probe(
        &ip,
        port,
        probe_timeout(params.ping_timeout),
        probe_timeout(params.port_timeout),
    )
    .await;

    Ok(json!({
        "message": format!("WebSocket IP set to {ip}:{port}"),
        "connectivity_test": to_json(probe)?,
    }))
}

/// Resolve a host and check whether a TCP port accepts connections.
pub async fn ping_robot(_ctx: &BridgeContext, params: Value) -> BridgeResult<Value> {
    let params: PingParams = parse_params(params)?;
    let ip = normalize_ip(&params.ip);
    let result = probe(
        &ip,
        params.port,
        probe_timeout(params.ping_timeout),
        probe_timeout(params.port_timeout),
    )
    .await;
    to_json(result)
}

/// Trim the host and expand the truncated loopback `"127"`.
fn normalize_ip(ip: &str) -> String {
    match ip.trim() {
        "" | "127" => "127.0.0.1".to_string(),
        other => other.to_string(),
    }
}

fn probe_timeout(value: Option<f64>) -> Duration {
    value.map_or(DEFAULT_PROBE_TIMEOUT, |v| secs(v, DEFAULT_PROBE_TIMEOUT))
}

/// Resolve `ip` within `resolve_timeout`, then connect within `connect_timeout`.
pub async fn probe(ip: &str, port: u16, resolve_timeout: Duration, connect_timeout: Duration) -> ProbeResult {
    let mut result = ProbeResult {
        ip: ip.to_string(),
        port,
        host_resolved: false,
        port_open: false,
        latency_ms: None,
        message: String::new(),
    };

    let addrs: Vec<_> = match timeout(resolve_timeout, lookup_host((ip, port))).await {
        Ok(Ok(addrs)) => addrs.collect(),
        _ => Vec::new(),
    };
    let Some(addr) = addrs.first().copied() else {
        result.message = format!("Could not resolve host {ip}");
        return result;
    };
    result.host_resolved = true;

    let start = Instant::now();
    if let Ok(Ok(_stream)) = timeout(connect_timeout, TcpStream::connect(addr)).await {
        result.port_open = true;
        result.latency_ms = Some(start.elapsed().as_secs_f64() * 1000.0);
        result.message = format!("Host {ip} is reachable and port {port} is open");
    } else {
        result.message = format!(
            "Host {ip} resolved but port {port} is not reachable; rosbridge may not be running"
        );
    }
    result
}

// ─────────────────────────────────────────────────────────────
// Catalogue
// ─────────────────────────────────────────────────────────────

pub(crate) fn definitions() -> Vec<ToolDefinition> {
    let timeouts = json!({
        "ping_timeout": {"type": "number", "description": "Host resolution timeout in seconds (default 2)"},
        "port_timeout": {"type": "number", "description": "Port check timeout in seconds (default 2)"},
    });
    let mut connect_props = json!({
        "ip": {"type": "string", "description": "rosbridge host (default from config)"},
        "port": {"type": "integer", "description": "rosbridge port (default from config)"},
    });
    let mut ping_props = json!({
        "ip": {"type": "string", "description": "Host to probe"},
        "port": {"type": "integer", "description": "Port to check, e.g. 9090"},
    });
    for props in [&mut connect_props, &mut ping_props] {
        if let (Some(target), Some(extra)) = (props.as_object_mut(), timeouts.as_object()) {
            target.extend(extra.clone());
        }
    }

    vec![
        tool(
            "connect_to_robot",
            "After getting the robot config, connect to the robot by setting the rosbridge IP/port and testing connectivity.",
            object_schema(connect_props, &[]),
        ),
        tool(
            "ping_robot",
            "Check whether a robot's host resolves and its rosbridge port accepts connections. A resolvable host with a closed port usually means rosbridge is not running.",
            object_schema(ping_props, &["ip", "port"]),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;
    use tokio::net::TcpListener;

    #[test_case("127", "127.0.0.1" ; "truncated loopback")]
    #[test_case("  10.0.0.5 ", "10.0.0.5" ; "trimmed")]
    #[test_case("", "127.0.0.1" ; "empty")]
    #[test_case("robot.local", "robot.local" ; "hostname")]
    fn test_normalize_ip(input: &str, expected: &str) {
        assert_eq!(normalize_ip(input), expected);
    }

    #[tokio::test]
    async fn test_probe_open_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let result = probe("127.0.0.1", port, Duration::from_secs(1), Duration::from_secs(1)).await;
        assert!(result.host_resolved);
        assert!(result.port_open);
        assert!(result.latency_ms.is_some());
    }

    #[tokio::test]
    async fn test_probe_closed_port() {
        let result = probe("127.0.0.1", 1, Duration::from_secs(1), Duration::from_millis(500)).await;
        assert!(result.host_resolved);
        assert!(!result.port_open);
        assert!(result.message.contains("rosbridge may not be running"));
    }

    #[tokio::test]
    async fn test_connect_to_robot_sets_target() {
        let ctx = BridgeContext::new(crate::config::BridgeConfig::default());
        let value = connect_to_robot(&ctx, json!({"ip": "127", "port": 1, "port_timeout": 0.2}))
            .await
            .unwrap();

        assert_eq!(value["message"], "WebSocket IP set to 127.0.0.1:1");
        assert_eq!(value["connectivity_test"]["port_open"], false);
        assert_eq!(ctx.manager().target().url(), "ws://127.0.0.1:1");
    }
}
