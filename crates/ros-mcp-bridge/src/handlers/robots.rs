//! Robot specification handlers.
//!
//! A specification is a `*.toml` file in the configured directory; its file
//! stem is the robot name.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{object_schema, parse_params, tool, BridgeContext, ToolDefinition};
use crate::error::{BridgeError, BridgeResult};

#[derive(Debug, Deserialize)]
struct RobotParams {
    name: String,
}

/// Load the specification whose name contains `name` (case-insensitive).
pub async fn get_robot_config(ctx: &BridgeContext, params: Value) -> BridgeResult<Value> {
    let params: RobotParams = parse_params(params)?;
    let name = params.name.trim();
    super::require(name, "Robot name")?;

    let specs = spec_files(&ctx.config().robot_specs_dir)?;
    let needle = name.to_lowercase();
    let matches: Vec<_> = specs
        .into_iter()
        .filter(|(stem, _)| stem.to_lowercase().contains(&needle))
        .collect();

    match matches.as_slice() {
        [] => Err(BridgeError::tool(format!(
            "No configuration found for robot '{name}'. Please check the name and try again. Or you can set the IP/port manually using the 'connect_to_robot' tool."
        ))),
        [(stem, path)] => {
            let spec = load_spec(path)?;
            let mut config = Map::new();
            config.insert(stem.clone(), spec);
            Ok(json!({ "robot_config": config }))
        }
        _ => Err(BridgeError::tool(format!(
            "Multiple configurations found for robot '{name}'. Please specify a more precise name."
        ))),
    }
}

/// List the available robot specification names.
pub async fn list_specifications(ctx: &BridgeContext, _params: Value) -> BridgeResult<Value> {
    let names: Vec<String> = spec_files(&ctx.config().robot_specs_dir)?
        .into_iter()
        .map(|(stem, _)| stem)
        .collect();
    if names.is_empty() {
        return Ok(json!({ "warning": "No robot specifications found", "robot_specifications": [] }));
    }
    Ok(json!({ "robot_specifications": names, "count": names.len() }))
}

/// `(stem, path)` of every `*.toml` file in `dir`, sorted by stem.
fn spec_files(dir: &Path) -> BridgeResult<Vec<(String, PathBuf)>> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        BridgeError::tool(format!(
            "Robot specifications directory '{}' is not readable: {e}",
            dir.display()
        ))
    })?;

    let mut specs: Vec<(String, PathBuf)> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "toml"))
        .filter_map(|path| {
            let stem = path.file_stem()?.to_str()?.to_string();
            Some((stem, path))
        })
        .collect();
    specs.sort();
    Ok(specs)
}

fn load_spec(path: &Path) -> BridgeResult<Value> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| BridgeError::tool(format!("Failed to read '{}': {e}", path.display())))?;
    let spec: toml::Table = toml::from_str(&content)
        .map_err(|e| BridgeError::tool(format!("Invalid robot specification '{}': {e}", path.display())))?;
    Ok(serde_json::to_value(spec)?)
}

pub(crate) fn definitions() -> Vec<ToolDefinition> {
    vec![
        tool(
            "get_robot_config",
            "Get a robot's specification (connection details and capabilities) by name.",
            object_schema(
                json!({"name": {"type": "string", "description": "Robot name or a unique part of it"}}),
                &["name"],
            ),
        ),
        tool(
            "list_verified_robot_specifications",
            "List all available robot specifications that can be used with get_robot_config.",
            object_schema(json!({}), &[]),
        ),
    ]
}
