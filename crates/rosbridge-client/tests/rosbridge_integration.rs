//! rosbridge client integration tests.
//!
//! Each test runs a scripted mock rosbridge server on a loopback port and
//! checks both what the client returns and which frames reached the server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use rosbridge_client::action::STILL_EXECUTING_NOTE;
use rosbridge_client::subscription::SUBSCRIBE_TICK;
use rosbridge_client::{
    ClientConfig, ClientError, ConnectionConfig, ConnectionManager, ConnectionState, GoalRequest,
    GoalState, SubscribeOptions,
};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

// ============================================================================
// Test Helpers - Mock rosbridge server
// ============================================================================

type ServerSocket = WebSocketStream<TcpStream>;

/// A mock rosbridge server bound to an ephemeral port.
struct MockRosbridge {
    listener: TcpListener,
    addr: SocketAddr,
}

impl MockRosbridge {
    async fn new() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind mock rosbridge");
        let addr = listener.local_addr().expect("no local addr");
        Self { listener, addr }
    }

    fn target(&self) -> ConnectionConfig {
        ConnectionConfig::new("127.0.0.1", self.addr.port())
    }

    /// A client config for this server with a short status grace window.
    fn client_config(&self) -> ClientConfig {
        ClientConfig::new(self.target())
            .with_connect_timeout(Duration::from_secs(2))
            .with_status_grace(Duration::from_millis(200))
    }

    fn manager(&self) -> ConnectionManager {
        ConnectionManager::new(self.client_config())
    }

    async fn accept(&self) -> ServerSocket {
        let (stream, _) = self.listener.accept().await.expect("accept failed");
        accept_async(stream).await.expect("websocket handshake failed")
    }
}

/// Next JSON frame from the client, or `None` once it disconnects.
async fn next_op(ws: &mut ServerSocket) -> Option<Value> {
    loop {
        match ws.next().await? {
            Ok(Message::Text(text)) => {
                return Some(serde_json::from_str(text.as_str()).expect("client sent invalid JSON"));
            }
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

/// Collect every frame until the client disconnects.
async fn drain(ws: &mut ServerSocket) -> Vec<Value> {
    let mut ops = Vec::new();
    while let Some(op) = next_op(ws).await {
        ops.push(op);
    }
    ops
}

async fn send_json(ws: &mut ServerSocket, value: Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .expect("mock send failed");
}

fn op_names(ops: &[Value]) -> Vec<String> {
    ops.iter()
        .map(|op| op["op"].as_str().unwrap_or_default().to_string())
        .collect()
}

fn count_op(ops: &[Value], name: &str) -> usize {
    ops.iter().filter(|op| op["op"] == name).count()
}

// ============================================================================
// Request correlation
// ============================================================================

#[tokio::test]
async fn test_call_service_skips_uncorrelated_frames() {
    let server = MockRosbridge::new().await;
    let manager = server.manager();

    let server_task = tokio::spawn(async move {
        let mut ws = server.accept().await;
        let request = next_op(&mut ws).await.expect("no request");
        let id = request["id"].as_str().expect("request without id").to_string();

        send_json(&mut ws, json!({"op": "service_response", "id": "someone-else", "result": true, "values": {"topics": ["/wrong"]}})).await;
        send_json(&mut ws, json!({"op": "publish", "topic": "/noise", "msg": {}})).await;
        send_json(&mut ws, json!({"op": "status", "level": "info", "msg": "fine"})).await;
        send_json(&mut ws, json!({"op": "service_response", "id": id, "result": true, "values": {"topics": ["/chatter"]}})).await;

        let mut ops = vec![request];
        ops.extend(drain(&mut ws).await);
        ops
    });

    let mut scope = manager.acquire().await.unwrap();
    let reply = scope
        .call_service("/rosapi/topics", "rosapi/Topics", json!({}))
        .await
        .unwrap()
        .expect("expected a correlated reply");
    scope.release().await;

    assert_eq!(reply.string_list("topics"), vec!["/chatter".to_string()]);
    assert!(!reply.failed());

    let ops = timeout(Duration::from_secs(5), server_task).await.unwrap().unwrap();
    assert_eq!(op_names(&ops), vec!["call_service"]);
    assert_eq!(ops[0]["service"], "/rosapi/topics");
    assert_eq!(ops[0]["type"], "rosapi/Topics");
}

#[tokio::test]
async fn test_call_service_without_reply_is_none() {
    let server = MockRosbridge::new().await;
    let manager = server.manager();

    let server_task = tokio::spawn(async move {
        let mut ws = server.accept().await;
        drain(&mut ws).await
    });

    let mut scope = manager.acquire().await.unwrap();
    let start = Instant::now();
    let reply = scope
        .call_service_with_timeout("/rosapi/nodes", "rosapi/Nodes", json!({}), Duration::from_millis(300))
        .await
        .unwrap();
    let elapsed = start.elapsed();
    scope.release().await;

    assert!(reply.is_none());
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_millis(300) + Duration::from_millis(250));
    server_task.await.unwrap();
}

#[tokio::test]
async fn test_call_service_error_status_aborts() {
    let server = MockRosbridge::new().await;
    let manager = server.manager();

    let server_task = tokio::spawn(async move {
        let mut ws = server.accept().await;
        let _request = next_op(&mut ws).await;
        send_json(&mut ws, json!({"op": "status", "level": "error", "msg": "service does not exist"})).await;
        drain(&mut ws).await
    });

    let mut scope = manager.acquire().await.unwrap();
    let err = scope
        .call_service("/missing", "std_srvs/Trigger", json!({}))
        .await
        .unwrap_err();
    drop(scope);

    assert!(matches!(err, ClientError::Protocol(_)));
    assert_eq!(err.to_string(), "service does not exist");
    server_task.await.unwrap();
}

#[tokio::test]
async fn test_failed_service_reply_is_returned() {
    let server = MockRosbridge::new().await;
    let manager = server.manager();

    let server_task = tokio::spawn(async move {
        let mut ws = server.accept().await;
        let request = next_op(&mut ws).await.expect("no request");
        send_json(&mut ws, json!({"op": "service_response", "id": request["id"], "result": false, "values": {"message": "bad args"}})).await;
        drain(&mut ws).await
    });

    let mut scope = manager.acquire().await.unwrap();
    let reply = scope
        .call_service("/set_bool", "std_srvs/SetBool", json!({"data": true}))
        .await
        .unwrap()
        .unwrap();
    scope.release().await;

    assert!(reply.failed());
    assert_eq!(reply.failure_message(), Some("bad args"));
    server_task.await.unwrap();
}

// ============================================================================
// Subscriptions
// ============================================================================

#[tokio::test]
async fn test_subscribe_once_timeout_unsubscribes_once() {
    let server = MockRosbridge::new().await;
    let manager = server.manager();

    let server_task = tokio::spawn(async move {
        let mut ws = server.accept().await;
        drain(&mut ws).await
    });

    let mut scope = manager.acquire().await.unwrap();
    let start = Instant::now();
    let err = scope
        .subscribe_once(
            "/chatter",
            "std_msgs/String",
            Some(Duration::from_secs(1)),
            SubscribeOptions::default(),
        )
        .await
        .unwrap_err();
    let elapsed = start.elapsed();
    scope.release().await;

    assert!(matches!(err, ClientError::Timeout(_)));
    assert_eq!(err.to_string(), "Timeout waiting for message from topic");
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_millis(1600));

    let ops = server_task.await.unwrap();
    assert_eq!(op_names(&ops), vec!["subscribe", "unsubscribe"]);
    assert_eq!(ops[1]["topic"], "/chatter");
}

#[tokio::test]
async fn test_subscribe_once_returns_first_matching_message() {
    let server = MockRosbridge::new().await;
    let manager = server.manager();

    let server_task = tokio::spawn(async move {
        let mut ws = server.accept().await;
        let subscribe = next_op(&mut ws).await.expect("no subscribe");
        send_json(&mut ws, json!({"op": "publish", "topic": "/other", "msg": {"data": "no"}})).await;
        send_json(&mut ws, json!({"op": "publish", "topic": "/chatter", "msg": {"data": "hello"}})).await;
        send_json(&mut ws, json!({"op": "publish", "topic": "/chatter", "msg": {"data": "late"}})).await;
        let mut ops = vec![subscribe];
        ops.extend(drain(&mut ws).await);
        ops
    });

    let options = SubscribeOptions::new(Some(1), Some(50)).unwrap();
    let mut scope = manager.acquire().await.unwrap();
    let received = scope
        .subscribe_once("/chatter", "std_msgs/String", None, options)
        .await
        .unwrap();
    scope.release().await;

    assert_eq!(received.topic, "/chatter");
    assert_eq!(received.msg, json!({"data": "hello"}));
    assert!(received.image.is_none());

    let ops = server_task.await.unwrap();
    assert_eq!(op_names(&ops), vec!["subscribe", "unsubscribe"]);
    assert_eq!(ops[0]["queue_length"], 1);
    assert_eq!(ops[0]["throttle_rate"], 50);
}

#[tokio::test]
async fn test_subscribe_once_image_skips_corrupt_payloads() {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;

    let server = MockRosbridge::new().await;
    let manager = server.manager();

    let server_task = tokio::spawn(async move {
        let mut ws = server.accept().await;
        let _subscribe = next_op(&mut ws).await;
        send_json(&mut ws, json!({"op": "publish", "topic": "/camera", "msg": {"width": 2, "height": 1, "step": 6}})).await;
        send_json(&mut ws, json!({"op": "publish", "topic": "/camera", "msg": {"width": 2, "height": 1, "step": 6, "encoding": "rgb8", "data": STANDARD.encode([9u8; 6])}})).await;
        drain(&mut ws).await
    });

    let mut scope = manager.acquire().await.unwrap();
    let received = scope
        .subscribe_once("/camera", "sensor_msgs/Image", None, SubscribeOptions::default())
        .await
        .unwrap();
    scope.release().await;

    let image = received.image.expect("image metadata");
    assert_eq!((image.width, image.height), (2, 1));
    assert_eq!(image.encoding, "rgb8");
    assert_eq!(image.byte_count(), 6);
    server_task.await.unwrap();
}

#[tokio::test]
async fn test_subscribe_once_error_status_still_unsubscribes() {
    let server = MockRosbridge::new().await;
    let manager = server.manager();

    let server_task = tokio::spawn(async move {
        let mut ws = server.accept().await;
        let subscribe = next_op(&mut ws).await.expect("no subscribe");
        send_json(&mut ws, json!({"op": "status", "level": "error", "msg": "unknown type"})).await;
        let mut ops = vec![subscribe];
        ops.extend(drain(&mut ws).await);
        ops
    });

    let mut scope = manager.acquire().await.unwrap();
    let err = scope
        .subscribe_once("/x", "bogus/Type", None, SubscribeOptions::default())
        .await
        .unwrap_err();
    scope.release().await;

    assert_eq!(err.to_string(), "unknown type");
    let ops = server_task.await.unwrap();
    assert_eq!(count_op(&ops, "unsubscribe"), 1);
}

#[tokio::test]
async fn test_subscribe_for_duration_stops_at_max_messages() {
    let server = MockRosbridge::new().await;
    let manager = server.manager();

    let server_task = tokio::spawn(async move {
        let mut ws = server.accept().await;
        let subscribe = next_op(&mut ws).await.expect("no subscribe");
        for i in 0..5 {
            send_json(&mut ws, json!({"op": "publish", "topic": "/odom", "msg": {"seq": i}})).await;
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        let mut ops = vec![subscribe];
        ops.extend(drain(&mut ws).await);
        ops
    });

    let mut scope = manager.acquire().await.unwrap();
    let start = Instant::now();
    let collected = scope
        .subscribe_for_duration(
            "/odom",
            "nav_msgs/Odometry",
            Duration::from_secs(2),
            3,
            SubscribeOptions::default(),
        )
        .await
        .unwrap();
    let elapsed = start.elapsed();
    scope.release().await;

    assert_eq!(collected.collected_count(), 3);
    assert_eq!(collected.messages[0], json!({"seq": 0}));
    assert_eq!(collected.messages[2], json!({"seq": 2}));
    assert!(elapsed < Duration::from_secs(1));

    let ops = server_task.await.unwrap();
    assert_eq!(count_op(&ops, "subscribe"), 1);
    assert_eq!(count_op(&ops, "unsubscribe"), 1);
}

#[tokio::test]
async fn test_subscribe_for_duration_records_status_errors() {
    let server = MockRosbridge::new().await;
    let manager = server.manager();

    let server_task = tokio::spawn(async move {
        let mut ws = server.accept().await;
        let _subscribe = next_op(&mut ws).await;
        send_json(&mut ws, json!({"op": "publish", "topic": "/scan", "msg": {"n": 1}})).await;
        send_json(&mut ws, json!({"op": "status", "level": "error", "msg": "dropped message"})).await;
        send_json(&mut ws, json!({"op": "publish", "topic": "/scan", "msg": {"n": 2}})).await;
        drain(&mut ws).await
    });

    let mut scope = manager.acquire().await.unwrap();
    let start = Instant::now();
    let collected = scope
        .subscribe_for_duration(
            "/scan",
            "sensor_msgs/LaserScan",
            Duration::from_millis(600),
            100,
            SubscribeOptions::default(),
        )
        .await
        .unwrap();
    let elapsed = start.elapsed();
    scope.release().await;

    assert_eq!(collected.collected_count(), 2);
    assert_eq!(collected.status_errors, vec!["dropped message".to_string()]);
    assert!(elapsed >= Duration::from_millis(600));
    assert!(elapsed < Duration::from_millis(600) + SUBSCRIBE_TICK + Duration::from_millis(100));

    let ops = server_task.await.unwrap();
    assert_eq!(count_op(&ops, "unsubscribe"), 1);
}

#[tokio::test]
async fn test_unknown_names_unsubscribe_and_unadvertise() {
    let server = MockRosbridge::new().await;
    let manager = server.manager();

    let server_task = tokio::spawn(async move {
        let mut ws = server.accept().await;
        drain(&mut ws).await
    });

    let mut scope = manager.acquire().await.unwrap();
    scope.unsubscribe("/never_subscribed").await.unwrap();
    scope.unadvertise("/never_advertised").await.unwrap();
    scope.release().await;

    let ops = server_task.await.unwrap();
    assert_eq!(op_names(&ops), vec!["unsubscribe", "unadvertise"]);
    assert_eq!(ops[1], json!({"op": "unadvertise", "topic": "/never_advertised"}));
}

#[tokio::test]
async fn test_bridge_disconnect_surfaces_connection_error() {
    let server = MockRosbridge::new().await;
    let manager = server.manager();

    let server_task = tokio::spawn(async move {
        let mut ws = server.accept().await;
        let _subscribe = next_op(&mut ws).await;
        ws.close(None).await.ok();
    });

    let mut scope = manager.acquire().await.unwrap();
    let err = scope
        .subscribe_once("/chatter", "std_msgs/String", Some(Duration::from_secs(3)), SubscribeOptions::default())
        .await
        .unwrap_err();

    assert!(err.is_connection());
    assert!(!scope.is_open());
    drop(scope);
    assert_eq!(manager.state(), ConnectionState::Closed);
    server_task.await.unwrap();
}

#[tokio::test]
async fn test_bridge_reset_surfaces_connection_error() {
    let server = MockRosbridge::new().await;
    let manager = server.manager();

    let server_task = tokio::spawn(async move {
        let mut ws = server.accept().await;
        let _subscribe = next_op(&mut ws).await;
        // Drop the socket without a close handshake.
        drop(ws);
    });

    let mut scope = manager.acquire().await.unwrap();
    let err = scope
        .subscribe_once("/chatter", "std_msgs/String", Some(Duration::from_secs(3)), SubscribeOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Connection(_)));
    assert!(!scope.is_open());
    server_task.await.unwrap();
}

// ============================================================================
// Publish transactions
// ============================================================================

#[tokio::test]
async fn test_advertise_rejection_sends_nothing_else() {
    let server = MockRosbridge::new().await;
    let manager = server.manager();

    let server_task = tokio::spawn(async move {
        let mut ws = server.accept().await;
        let advertise = next_op(&mut ws).await.expect("no advertise");
        send_json(&mut ws, json!({"op": "status", "level": "error", "msg": "type mismatch"})).await;
        let mut ops = vec![advertise];
        ops.extend(drain(&mut ws).await);
        ops
    });

    let mut scope = manager.acquire().await.unwrap();
    let err = scope
        .publish_once("/cmd_vel", "geometry_msgs/Twist", json!({"linear": {"x": 0.1}}))
        .await
        .unwrap_err();
    scope.release().await;

    assert!(matches!(err, ClientError::Advertise(_)));
    assert_eq!(err.to_string(), "Advertise failed: type mismatch");

    let ops = server_task.await.unwrap();
    assert_eq!(op_names(&ops), vec!["advertise"]);
}

#[tokio::test]
async fn test_publish_once_brackets_message() {
    let server = MockRosbridge::new().await;
    let manager = server.manager();

    let server_task = tokio::spawn(async move {
        let mut ws = server.accept().await;
        drain(&mut ws).await
    });

    let mut scope = manager.acquire().await.unwrap();
    let report = scope
        .publish_once("/chatter", "std_msgs/String", json!({"data": "hi"}))
        .await
        .unwrap();
    scope.release().await;

    assert!(report.is_complete());
    assert_eq!((report.total, report.succeeded), (1, 1));

    let ops = server_task.await.unwrap();
    assert_eq!(op_names(&ops), vec!["advertise", "publish", "unadvertise"]);
    assert_eq!(ops[0]["type"], "std_msgs/String");
    assert_eq!(ops[1]["msg"], json!({"data": "hi"}));
}

#[tokio::test]
async fn test_publish_sequence_accounts_for_failures() {
    let server = MockRosbridge::new().await;
    let manager = server.manager();

    let server_task = tokio::spawn(async move {
        let mut ws = server.accept().await;
        let mut ops = Vec::new();
        let mut publishes = 0;
        while let Some(op) = next_op(&mut ws).await {
            if op["op"] == "publish" {
                publishes += 1;
                if publishes == 2 {
                    send_json(&mut ws, json!({"op": "status", "level": "error", "msg": "invalid field"})).await;
                }
            }
            ops.push(op);
        }
        ops
    });

    let messages = vec![json!({"data": 1}), json!({"data": 2}), json!({"data": 3})];
    let delays = vec![Duration::from_millis(100); 3];

    let mut scope = manager.acquire().await.unwrap();
    let start = Instant::now();
    let report = scope
        .publish_sequence("/counter", "std_msgs/Int32", messages, delays)
        .await
        .unwrap();
    let elapsed = start.elapsed();
    scope.release().await;

    assert_eq!(report.total, 3);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.errors, vec!["Message 2: invalid field".to_string()]);
    assert_eq!(report.succeeded + report.errors.len(), report.total);
    assert!(elapsed >= Duration::from_millis(300));

    let ops = server_task.await.unwrap();
    assert_eq!(count_op(&ops, "advertise"), 1);
    assert_eq!(count_op(&ops, "publish"), 3);
    assert_eq!(count_op(&ops, "unadvertise"), 1);
    assert_eq!(ops.last().map(|op| op["op"].clone()), Some(json!("unadvertise")));
}

#[tokio::test]
async fn test_publish_sequence_length_mismatch_sends_nothing() {
    let server = MockRosbridge::new().await;
    let manager = server.manager();

    let server_task = tokio::spawn(async move {
        let mut ws = server.accept().await;
        drain(&mut ws).await
    });

    let mut scope = manager.acquire().await.unwrap();
    let err = scope
        .publish_sequence(
            "/cmd_vel",
            "geometry_msgs/Twist",
            vec![json!({}), json!({})],
            vec![Duration::from_secs(1)],
        )
        .await
        .unwrap_err();
    scope.release().await;

    assert!(matches!(err, ClientError::Validation(_)));
    assert_eq!(err.to_string(), "messages and durations must have the same length");
    assert!(server_task.await.unwrap().is_empty());
}

// ============================================================================
// Action goals
// ============================================================================

fn rotate_goal(blocking: bool, wait: Option<Duration>) -> GoalRequest {
    GoalRequest {
        action: "/turtle1/rotate_absolute".into(),
        action_type: "turtlesim/action/RotateAbsolute".into(),
        goal: json!({"theta": 1.57}),
        timeout: wait,
        blocking,
    }
}

#[tokio::test]
async fn test_non_blocking_goal_returns_immediately() {
    let server = MockRosbridge::new().await;
    let manager = server.manager();

    let server_task = tokio::spawn(async move {
        let mut ws = server.accept().await;
        drain(&mut ws).await
    });

    let mut scope = manager.acquire().await.unwrap();
    let start = Instant::now();
    let outcome = scope.send_action_goal(rotate_goal(false, None)).await.unwrap();
    let elapsed = start.elapsed();
    scope.release().await;

    assert!(elapsed < Duration::from_millis(500));
    assert_eq!(outcome.goal.state, GoalState::Sent);
    assert_eq!(outcome.status, json!("sent"));
    assert!(outcome.goal.id.starts_with("goal_"));

    let ops = server_task.await.unwrap();
    assert_eq!(op_names(&ops), vec!["send_action_goal"]);
    assert_eq!(ops[0]["id"], json!(outcome.goal.id));
    assert_eq!(ops[0]["feedback"], true);
    assert_eq!(ops[0]["args"], json!({"theta": 1.57}));
}

#[tokio::test]
async fn test_blocking_goal_waits_for_result() {
    let server = MockRosbridge::new().await;
    let manager = server.manager();

    let server_task = tokio::spawn(async move {
        let mut ws = server.accept().await;
        let goal = next_op(&mut ws).await.expect("no goal");
        let id = goal["id"].clone();

        tokio::time::sleep(Duration::from_millis(200)).await;
        send_json(&mut ws, json!({"op": "action_feedback", "id": "goal_someone_else", "values": {"remaining": 9.0}})).await;
        send_json(&mut ws, json!({"op": "action_feedback", "id": id, "values": {"remaining": 0.5}})).await;
        tokio::time::sleep(Duration::from_millis(1000)).await;
        send_json(&mut ws, json!({"op": "action_result", "id": id, "result": true, "status": 4, "values": {"delta": 1.2}})).await;
        drain(&mut ws).await
    });

    let mut scope = manager.acquire().await.unwrap();
    let start = Instant::now();
    let outcome = scope
        .send_action_goal(rotate_goal(true, Some(Duration::from_secs(10))))
        .await
        .unwrap();
    let elapsed = start.elapsed();
    scope.release().await;

    assert_eq!(outcome.goal.state, GoalState::Completed);
    assert!(outcome.success);
    assert_eq!(outcome.status, json!(4));
    assert_eq!(outcome.result, Some(json!({"delta": 1.2})));
    assert_eq!(outcome.last_feedback, Some(json!({"remaining": 0.5})));
    assert!(elapsed >= Duration::from_millis(1200));
    assert!(elapsed < Duration::from_secs(2));
    server_task.await.unwrap();
}

#[tokio::test]
async fn test_blocking_goal_deadline_is_not_an_error() {
    let server = MockRosbridge::new().await;
    let manager = server.manager();

    let server_task = tokio::spawn(async move {
        let mut ws = server.accept().await;
        drain(&mut ws).await
    });

    let mut scope = manager.acquire().await.unwrap();
    let start = Instant::now();
    let outcome = scope
        .send_action_goal(rotate_goal(true, Some(Duration::from_millis(500))))
        .await
        .unwrap();
    let elapsed = start.elapsed();
    scope.release().await;

    assert_eq!(outcome.goal.state, GoalState::TimedOut);
    assert_eq!(outcome.status, json!("sent"));
    assert_eq!(outcome.note, Some(STILL_EXECUTING_NOTE));
    assert!(elapsed >= Duration::from_millis(500));
    assert!(elapsed < Duration::from_millis(1500));
    server_task.await.unwrap();
}

#[tokio::test]
async fn test_blocking_goal_error_status() {
    let server = MockRosbridge::new().await;
    let manager = server.manager();

    let server_task = tokio::spawn(async move {
        let mut ws = server.accept().await;
        let goal = next_op(&mut ws).await.expect("no goal");
        send_json(&mut ws, json!({"op": "status", "level": "error", "id": goal["id"], "msg": "action server unavailable"})).await;
        drain(&mut ws).await
    });

    let mut scope = manager.acquire().await.unwrap();
    let err = scope
        .send_action_goal(rotate_goal(true, Some(Duration::from_secs(5))))
        .await
        .unwrap_err();
    scope.release().await;

    assert!(matches!(err, ClientError::Protocol(_)));
    assert_eq!(err.to_string(), "action server unavailable");
    server_task.await.unwrap();
}

#[tokio::test]
async fn test_cancel_unknown_goal_is_sent_without_checks() {
    let server = MockRosbridge::new().await;
    let manager = server.manager();

    let server_task = tokio::spawn(async move {
        let mut ws = server.accept().await;
        drain(&mut ws).await
    });

    let mut scope = manager.acquire().await.unwrap();
    let goal = scope
        .cancel_action_goal("/turtle1/rotate_absolute", "goal_does_not_exist")
        .await
        .unwrap();
    scope.release().await;

    assert_eq!(goal.state, GoalState::CancelRequested);
    let ops = server_task.await.unwrap();
    assert_eq!(
        ops,
        vec![json!({"op": "cancel_action_goal", "id": "goal_does_not_exist", "action": "/turtle1/rotate_absolute"})]
    );
}

// ============================================================================
// Connection scoping
// ============================================================================

#[tokio::test]
async fn test_concurrent_scopes_serialize() {
    let server = MockRosbridge::new().await;
    let manager = Arc::new(server.manager());

    let server_task = tokio::spawn(async move {
        let mut sessions = Vec::new();
        for _ in 0..2 {
            let mut ws = server.accept().await;
            sessions.push(tokio::spawn(async move { drain(&mut ws).await }));
        }
        for session in sessions {
            session.await.unwrap();
        }
    });

    let first = Arc::clone(&manager);
    let holder = tokio::spawn(async move {
        let scope = first.acquire().await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        let released_at = Instant::now();
        scope.release().await;
        released_at
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = manager.acquire().await.unwrap();
    let acquired_at = Instant::now();
    second.release().await;

    let released_at = holder.await.unwrap();
    assert!(acquired_at >= released_at);
    timeout(Duration::from_secs(5), server_task).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_keep_alive_reuses_socket() {
    let server = MockRosbridge::new().await;
    let manager = ConnectionManager::new(server.client_config().with_keep_alive(true));

    let server_task = tokio::spawn(async move {
        let mut ws = server.accept().await;
        for _ in 0..2 {
            let request = next_op(&mut ws).await.expect("no request");
            send_json(&mut ws, json!({"op": "service_response", "id": request["id"], "result": true, "values": {}})).await;
        }
        // No second connection is attempted.
        timeout(Duration::from_millis(300), server.listener.accept())
            .await
            .is_err()
    });

    for _ in 0..2 {
        let mut scope = manager.acquire().await.unwrap();
        let reply = scope
            .call_service("/rosapi/topics", "rosapi/Topics", json!({}))
            .await
            .unwrap();
        assert!(reply.is_some());
        scope.release().await;
        assert_eq!(manager.state(), ConnectionState::Parked);
    }

    assert!(server_task.await.unwrap());
}

#[tokio::test]
async fn test_keep_alive_discards_stale_publishes() {
    let server = MockRosbridge::new().await;
    let manager = ConnectionManager::new(server.client_config().with_keep_alive(true));

    let server_task = tokio::spawn(async move {
        let mut ws = server.accept().await;
        let _subscribe = next_op(&mut ws).await.expect("no subscribe");
        send_json(&mut ws, json!({"op": "publish", "topic": "/chatter", "msg": {"data": "first"}})).await;
        send_json(&mut ws, json!({"op": "publish", "topic": "/chatter", "msg": {"data": "late"}})).await;
        loop {
            let op = next_op(&mut ws).await.expect("client went away");
            if op["op"] == "subscribe" {
                break;
            }
        }
        send_json(&mut ws, json!({"op": "publish", "topic": "/chatter", "msg": {"data": "fresh"}})).await;
        drain(&mut ws).await
    });

    let mut scope = manager.acquire().await.unwrap();
    let first = scope
        .subscribe_once("/chatter", "std_msgs/String", None, SubscribeOptions::default())
        .await
        .unwrap();
    scope.release().await;
    assert_eq!(first.msg, json!({"data": "first"}));

    // Let the late publish reach the parked socket.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut scope = manager.acquire().await.unwrap();
    let second = scope
        .subscribe_once("/chatter", "std_msgs/String", None, SubscribeOptions::default())
        .await
        .unwrap();
    scope.release().await;
    assert_eq!(second.msg, json!({"data": "fresh"}));

    drop(manager);
    let ops = timeout(Duration::from_secs(5), server_task).await.unwrap().unwrap();
    assert_eq!(count_op(&ops, "unsubscribe"), 1);
}

#[tokio::test]
async fn test_target_change_drops_parked_socket() {
    let first = MockRosbridge::new().await;
    let second = MockRosbridge::new().await;
    let second_port = second.addr.port();
    let manager = ConnectionManager::new(first.client_config().with_keep_alive(true));

    let first_task = tokio::spawn(async move {
        let mut ws = first.accept().await;
        drain(&mut ws).await
    });
    let second_task = tokio::spawn(async move {
        let mut ws = second.accept().await;
        drain(&mut ws).await
    });

    let mut scope = manager.acquire().await.unwrap();
    scope.unsubscribe("/a").await.unwrap();
    scope.release().await;

    manager.set_target("127.0.0.1", second_port);
    let mut scope = manager.acquire().await.unwrap();
    scope.unsubscribe("/b").await.unwrap();
    drop(scope);

    let first_ops = first_task.await.unwrap();
    let second_ops = second_task.await.unwrap();
    assert_eq!(first_ops, vec![json!({"op": "unsubscribe", "topic": "/a"})]);
    assert_eq!(second_ops, vec![json!({"op": "unsubscribe", "topic": "/b"})]);
}

#[tokio::test]
async fn test_unreachable_bridge_fails_fast() {
    let manager = ConnectionManager::new(
        ClientConfig::new(ConnectionConfig::new("127.0.0.1", 1))
            .with_connect_timeout(Duration::from_millis(500)),
    );
    let start = Instant::now();
    let err = manager.acquire().await.unwrap_err();
    assert!(err.is_connection());
    assert!(start.elapsed() < Duration::from_secs(2));
}
