//! rosbridge client
//!
//! Client engine for the rosbridge JSON protocol over WebSocket. Every
//! operation runs inside a [`Scope`] obtained from a [`ConnectionManager`];
//! the scope owns the socket for its lifetime and closes it when dropped.
//!
//! ## Operations
//!
//! - Correlated service calls ([`Scope::call_service`], [`Scope::request`])
//! - Topic subscriptions ([`Scope::subscribe_once`], [`Scope::subscribe_for_duration`])
//! - Publish transactions ([`Scope::publish_once`], [`Scope::publish_sequence`])
//! - Action goals ([`Scope::send_action_goal`], [`Scope::cancel_action_goal`])
//!
//! ## Example
//!
//! ```no_run
//! use rosbridge_client::{ClientConfig, ConnectionConfig, ConnectionManager};
//! use serde_json::json;
//!
//! # async fn run() -> rosbridge_client::ClientResult<()> {
//! let manager = ConnectionManager::new(ClientConfig::new(ConnectionConfig::new("127.0.0.1", 9090)));
//! let mut scope = manager.acquire().await?;
//! let reply = scope.call_service("/rosapi/topics", "rosapi/Topics", json!({})).await?;
//! scope.release().await;
//! println!("{reply:?}");
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod codec;
pub mod config;
pub mod connection;
pub mod correlator;
pub mod error;
pub mod frame;
pub mod publish;
pub mod state;
pub mod subscription;

pub use action::{new_goal_id, Goal, GoalOutcome, GoalRequest, GoalState};
pub use config::{ClientConfig, ConnectionConfig};
pub use connection::{ConnectionManager, Scope};
pub use error::{ClientError, ClientResult};
pub use frame::{Frame, FrameKind, ImageFrame, Operation, ServiceReply};
pub use publish::PublishReport;
pub use state::ConnectionState;
pub use subscription::{CollectedMessages, ReceivedMessage, SubscribeOptions};
