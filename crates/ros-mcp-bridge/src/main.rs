//! ros-mcp-bridge binary
//!
//! Reads MCP JSON-RPC requests from stdin and writes responses to stdout.
//!
//! ```bash
//! ros-mcp-bridge --rosbridge-ip 192.168.1.50 --rosbridge-port 9090
//! ```

use std::io;
use std::path::PathBuf;

use clap::Parser;
use ros_mcp_bridge::{serve, BridgeConfig, BridgeContext};
use tokio::io::BufReader;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "ros-mcp-bridge")]
#[command(about = "MCP server for ROS robots over rosbridge")]
#[command(version)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// rosbridge host
    #[arg(long, env = "ROSBRIDGE_IP")]
    rosbridge_ip: Option<String>,

    /// rosbridge port
    #[arg(long, env = "ROSBRIDGE_PORT")]
    rosbridge_port: Option<u16>,

    /// Directory of robot specification files
    #[arg(long)]
    robot_specs: Option<PathBuf>,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<BridgeConfig> {
        let mut config = match &self.config {
            Some(path) => BridgeConfig::from_file(path)?,
            None => BridgeConfig::default(),
        };
        if let Some(ip) = &self.rosbridge_ip {
            config.rosbridge.ip.clone_from(ip);
        }
        if let Some(port) = self.rosbridge_port {
            config.rosbridge.port = port;
        }
        if let Some(dir) = &self.robot_specs {
            config.robot_specs_dir.clone_from(dir);
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries JSON-RPC only.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr).with_ansi(false))
        .with(
            EnvFilter::from_default_env()
                .add_directive("ros_mcp_bridge=info".parse()?)
                .add_directive("rosbridge_client=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.load_config()?;
    info!(
        target = %config.client_config().target.url(),
        specs = %config.robot_specs_dir.display(),
        "ros-mcp-bridge starting"
    );

    let ctx = BridgeContext::new(config);
    serve(&ctx, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await?;

    info!("ros-mcp-bridge shutting down");
    Ok(())
}
