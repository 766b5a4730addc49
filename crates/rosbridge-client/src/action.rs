//! Action goal submission and cancellation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::connection::{deadline_after, time_left, Scope};
use crate::error::{ClientError, ClientResult};
use crate::frame::{Frame, Operation};

/// Poll interval while a blocking goal is outstanding.
pub const ACTION_TICK: Duration = Duration::from_secs(2);

/// Note attached to goals that were sent but not awaited to completion.
pub const STILL_EXECUTING_NOTE: &str =
    "Goal sent successfully. Action may be executing asynchronously.";

/// Note attached to goals sent in non-blocking mode.
pub const NON_BLOCKING_NOTE: &str =
    "Goal sent successfully in non-blocking mode. Use get_action_result to check completion.";

/// Note attached to cancellation requests.
pub const CANCEL_NOTE: &str = "Cancel request sent successfully. Action may still be executing.";

static GOAL_SEQ: AtomicU64 = AtomicU64::new(0);

/// Generate a goal id unique within this process.
///
/// Wall-clock milliseconds, a process-wide sequence number, and a random
/// suffix.
#[must_use]
pub fn new_goal_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let seq = GOAL_SEQ.fetch_add(1, Ordering::Relaxed);
    let random = uuid::Uuid::new_v4().simple().to_string();
    let suffix = random.get(..8).unwrap_or(&random);
    format!("goal_{millis}_{seq}_{suffix}")
}

/// Lifecycle of a goal as observed by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalState {
    /// Id generated, not yet sent.
    Created,
    /// Sent; no feedback or result observed.
    Sent,
    /// At least one feedback frame observed.
    FeedbackReceived,
    /// Result received.
    Completed,
    /// Deadline passed without a result. Not an error.
    TimedOut,
    /// Cancel sent; the server may still be running the goal.
    CancelRequested,
}

impl GoalState {
    /// Whether the state is terminal from the caller's perspective.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::TimedOut | Self::CancelRequested)
    }
}

/// A goal and its last observed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Goal {
    /// Goal id.
    pub id: String,
    /// Action name.
    pub action: String,
    /// Action type; empty for goals only known by id.
    pub action_type: String,
    /// Last observed state.
    pub state: GoalState,
}

/// Parameters of a goal submission.
#[derive(Debug, Clone, PartialEq)]
pub struct GoalRequest {
    /// Action name, e.g. `/turtle1/rotate_absolute`.
    pub action: String,
    /// Action type, e.g. `turtlesim/action/RotateAbsolute`.
    pub action_type: String,
    /// Goal payload.
    pub goal: Value,
    /// Deadline for blocking mode; defaults to the client's action timeout.
    pub timeout: Option<Duration>,
    /// Wait for the result.
    pub blocking: bool,
}

impl GoalRequest {
    /// Check names and goal without touching the network.
    ///
    /// # Errors
    ///
    /// [`ClientError::Validation`] for an empty action name, action type or
    /// goal.
    pub fn validate(&self) -> ClientResult<()> {
        if self.action.trim().is_empty() {
            return Err(ClientError::Validation("Action name cannot be empty".into()));
        }
        if self.action_type.trim().is_empty() {
            return Err(ClientError::Validation("Action type cannot be empty".into()));
        }
        let empty_goal = match &self.goal {
            Value::Null => true,
            Value::Object(fields) => fields.is_empty(),
            _ => false,
        };
        if empty_goal {
            return Err(ClientError::Validation("Goal cannot be empty".into()));
        }
        Ok(())
    }
}

/// What a goal submission observed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GoalOutcome {
    /// The goal and its final observed state.
    pub goal: Goal,
    /// Result flag from the bridge; `true` for goals not awaited.
    pub success: bool,
    /// Bridge-reported status, or `"sent"`.
    pub status: Value,
    /// Result payload, when a result arrived.
    pub result: Option<Value>,
    /// Last feedback payload seen while waiting.
    pub last_feedback: Option<Value>,
    /// Explanation for non-completed outcomes.
    pub note: Option<&'static str>,
}

impl GoalOutcome {
    fn sent(goal: Goal, note: &'static str) -> Self {
        Self {
            goal,
            success: true,
            status: Value::from("sent"),
            result: None,
            last_feedback: None,
            note: Some(note),
        }
    }
}

/// Check the arguments of a cancellation without touching the network.
///
/// # Errors
///
/// [`ClientError::Validation`] for an empty action name or goal id.
pub fn validate_cancel(action: &str, goal_id: &str) -> ClientResult<()> {
    if action.trim().is_empty() {
        return Err(ClientError::Validation("Action name cannot be empty".into()));
    }
    if goal_id.trim().is_empty() {
        return Err(ClientError::Validation("Goal ID cannot be empty".into()));
    }
    Ok(())
}

fn addressed_to(frame_id: Option<&str>, goal_id: &str) -> bool {
    frame_id.is_none_or(|id| id == goal_id)
}

impl Scope<'_> {
    /// Submit an action goal.
    ///
    /// Non-blocking requests return as soon as the goal is sent. Blocking
    /// requests wait for the result; when the deadline passes first the
    /// outcome is [`GoalState::TimedOut`], which is not an error.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Validation`] for empty names or goal
    /// - [`ClientError::Connection`] if the goal cannot be sent or the socket
    ///   fails while waiting
    /// - [`ClientError::Protocol`] if the bridge reports an error status
    pub async fn send_action_goal(&mut self, request: GoalRequest) -> ClientResult<GoalOutcome> {
        request.validate()?;

        let mut goal = Goal {
            id: new_goal_id(),
            action: request.action,
            action_type: request.action_type,
            state: GoalState::Created,
        };

        self.send(&Operation::SendActionGoal {
            id: goal.id.clone(),
            action: goal.action.clone(),
            action_type: goal.action_type.clone(),
            args: request.goal,
            feedback: true,
        })
        .await?;
        goal.state = GoalState::Sent;
        info!(goal_id = %goal.id, action = %goal.action, blocking = request.blocking, "goal sent");

        if !request.blocking {
            return Ok(GoalOutcome::sent(goal, NON_BLOCKING_NOTE));
        }

        let wait = request.timeout.unwrap_or(self.config().action_timeout);
        self.await_goal(goal, deadline_after(wait)).await
    }

    async fn await_goal(&mut self, mut goal: Goal, deadline: Instant) -> ClientResult<GoalOutcome> {
        let mut last_feedback = None;

        while let Some(left) = time_left(deadline) {
            let Some(frame) = self.receive(left.min(ACTION_TICK)).await? else {
                continue;
            };

            if let Some(message) = frame.error_message() {
                if addressed_to(frame.id(), &goal.id) {
                    return Err(ClientError::Protocol(message.to_string()));
                }
                continue;
            }

            match frame {
                Frame::ActionResult(result) if addressed_to(result.id.as_deref(), &goal.id) => {
                    goal.state = GoalState::Completed;
                    debug!(goal_id = %goal.id, success = result.result, "goal completed");
                    return Ok(GoalOutcome {
                        goal,
                        success: result.result,
                        status: result.status.unwrap_or_else(|| Value::from("unknown")),
                        result: Some(result.values),
                        last_feedback,
                        note: None,
                    });
                }
                Frame::ActionFeedback(feedback)
                    if addressed_to(feedback.id.as_deref(), &goal.id) =>
                {
                    goal.state = GoalState::FeedbackReceived;
                    trace!(goal_id = %goal.id, "goal feedback");
                    last_feedback = Some(feedback.values);
                }
                other => trace!(goal_id = %goal.id, kind = ?other.kind(), "ignoring frame"),
            }
        }

        debug!(goal_id = %goal.id, "goal deadline passed; still executing");
        goal.state = GoalState::TimedOut;
        let mut outcome = GoalOutcome::sent(goal, STILL_EXECUTING_NOTE);
        outcome.last_feedback = last_feedback;
        Ok(outcome)
    }

    /// Request cancellation of a goal. Does not wait for confirmation and
    /// never checks whether the goal exists.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Validation`] for empty names
    /// - [`ClientError::Connection`] if the frame cannot be sent
    pub async fn cancel_action_goal(&mut self, action: &str, goal_id: &str) -> ClientResult<Goal> {
        validate_cancel(action, goal_id)?;

        self.send(&Operation::CancelActionGoal {
            id: goal_id.to_string(),
            action: action.to_string(),
        })
        .await?;
        info!(goal_id = %goal_id, action = %action, "cancel requested");

        Ok(Goal {
            id: goal_id.to_string(),
            action: action.to_string(),
            action_type: String::new(),
            state: GoalState::CancelRequested,
        })
    }
}
