//! Types shared between the call bridge and its owner.

use crate::bridge::timers::TimerKind;
use crate::session::SessionError;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Lifecycle of one bridged call.
///
/// ## State Transitions:
/// Created → AiGreeting → AiSpeaking ⇄ Listening → Ended
/// Any state can transition to Ended, and Ended is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallState {
    /// Bridge exists, AI session not started yet
    Created,
    /// Session started, greeting requested, no AI audio yet
    AiGreeting,
    /// AI audio is being paced out to the caller
    AiSpeaking,
    /// Waiting for (or receiving) the caller's answer
    Listening,
    /// Call torn down
    Ended,
}

impl CallState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Created => "CREATED",
            CallState::AiGreeting => "AI_GREETING",
            CallState::AiSpeaking => "AI_SPEAKING",
            CallState::Listening => "LISTENING",
            CallState::Ended => "ENDED",
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// Carrier sent a `stop` frame
    StopFrame,
    /// The media socket closed
    SocketClosed,
    /// The media socket failed
    SocketError(String),
    /// No traffic from the carrier within the client timeout
    HeartbeatTimeout,
    /// The AI session could not be started
    SessionStartFailed(String),
    /// The AI session reported an error
    SessionError(String),
    /// The AI session closed from the remote side
    SessionClosed,
    /// The workflow finished and the closing turn was played
    ConversationComplete,
    /// Refused because the server is at its call limit
    CapacityExceeded,
    /// Hung up through the monitoring API
    Operator,
}

impl EndReason {
    /// Whether this ending counts as a failed call.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            EndReason::SocketError(_)
                | EndReason::SessionStartFailed(_)
                | EndReason::SessionError(_)
                | EndReason::CapacityExceeded
        )
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndReason::StopFrame => write!(f, "stop frame received"),
            EndReason::SocketClosed => write!(f, "media socket closed"),
            EndReason::SocketError(msg) => write!(f, "media socket error: {}", msg),
            EndReason::HeartbeatTimeout => write!(f, "carrier heartbeat timeout"),
            EndReason::SessionStartFailed(msg) => write!(f, "AI session start failed: {}", msg),
            EndReason::SessionError(msg) => write!(f, "AI session error: {}", msg),
            EndReason::SessionClosed => write!(f, "AI session closed"),
            EndReason::ConversationComplete => write!(f, "conversation complete"),
            EndReason::CapacityExceeded => write!(f, "call limit reached"),
            EndReason::Operator => write!(f, "ended by operator"),
        }
    }
}

/// Side effects the bridge asks its owner to carry out.
///
/// The bridge never schedules anything itself: timers and socket-level
/// actions are requested here and executed on the owning connection's context.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEffect {
    /// (Re)schedule a timer; the firing must be reported with the same generation
    ArmTimer {
        kind: TimerKind,
        generation: u64,
        after: Duration,
    },
    /// Drop a scheduled timer
    CancelTimer(TimerKind),
    /// Tell the carrier to discard audio it has already buffered (barge-in)
    ClearLine,
    /// The call reached Ended; emitted exactly once
    Ended(EndReason),
}

/// Errors returned by bridge operations.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeError {
    SessionStart(SessionError),
    InvalidState(CallState),
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::SessionStart(err) => write!(f, "Failed to start AI session: {}", err),
            BridgeError::InvalidState(state) => write!(f, "Operation not allowed in state {}", state),
        }
    }
}

impl std::error::Error for BridgeError {}

/// Running totals for one call.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BridgeCounters {
    pub inbound_frames: u64,
    pub forwarded_frames: u64,
    pub ai_chunks: u64,
    pub outbound_frames: u64,
    pub barge_ins: u64,
    pub reengagements: u64,
    pub nudges: u64,
    pub instructions: u64,
}

/// Monitoring snapshot of one bridge.
#[derive(Debug, Clone, Serialize)]
pub struct BridgeStatus {
    pub call_sid: String,
    pub stream_sid: String,
    pub state: CallState,
    pub session_active: bool,
    pub session_duration_ms: u64,
    pub outgoing_buffer_chunk_count: usize,
    pub workflow_position: usize,
    pub workflow_len: usize,
    pub counters: BridgeCounters,
}
