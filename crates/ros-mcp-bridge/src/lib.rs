//! ROS MCP Bridge
//!
//! Model Context Protocol server that exposes a ROS robot's topics,
//! services, nodes, parameters and actions as tools. Every tool call talks
//! to the robot through a rosbridge WebSocket via [`rosbridge_client`].
//!
//! ## Protocol
//!
//! Newline-delimited JSON-RPC 2.0 over stdin/stdout:
//!
//! Request:
//! ```json
//! {"jsonrpc": "2.0", "id": 1, "method": "tools/call",
//!  "params": {"name": "get_topics", "arguments": {}}}
//! ```
//!
//! Response:
//! ```json
//! {"jsonrpc": "2.0", "id": 1,
//!  "result": {"content": [{"type": "text", "text": "{...}"}], "isError": false}}
//! ```
//!
//! Tool failures are reported inside the result (`isError: true`, an
//! `"error"` key in the text); JSON-RPC errors are reserved for malformed
//! requests, unknown methods and unknown tools.

pub mod config;
pub mod error;
pub mod handlers;
pub mod protocol;

pub use config::BridgeConfig;
pub use error::{BridgeError, BridgeResult};
pub use handlers::{call_tool, handle_line, handle_request, tool_definitions, BridgeContext};
pub use protocol::{ErrorResponse, Request, Response, ToolResult};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Serve requests from `reader` until end of input, one response line per
/// request.
///
/// # Errors
///
/// Returns an error if reading the input or writing a response fails.
pub async fn serve<R, W>(ctx: &BridgeContext, reader: R, mut writer: W) -> BridgeResult<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let Some(response) = handle_line(ctx, &line).await else {
            continue;
        };

        let mut json = serde_json::to_string(&response)?;
        json.push('\n');
        writer.write_all(json.as_bytes()).await?;
        writer.flush().await?;
        tracing::debug!(id = %response.id, "response sent");
    }

    Ok(())
}
