//! # Conversational AI Session
//!
//! The bridge talks to the AI audio service only through the narrow types in
//! this module:
//! - **[`ConversationConnector`]**: opens one session per call
//! - **[`SessionHandle`]**: fire-and-forget commands (audio, text, end)
//! - **[`SessionEvent`]**: everything the service sends back, delivered on a channel
//!
//! Commands and events are plain channel messages, so the bridge never touches
//! the session library's socket or callbacks directly, and tests can stand in
//! for the service with nothing more than the two channel ends.

pub mod gemini;

pub use gemini::GeminiLiveConnector;

use async_trait::async_trait;
use std::fmt;
use tokio::sync::mpsc;

/// Receiving side of a session's event channel.
pub type SessionEvents = mpsc::UnboundedReceiver<SessionEvent>;

/// Events emitted by an AI session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A chunk of AI speech, 16-bit PCM at 16kHz
    Audio(Vec<u8>),

    /// The AI stopped the current turn because the caller talked over it
    Interrupted,

    /// The AI finished generating audio for the current turn
    TurnComplete,

    /// The session failed; the call cannot continue
    Error(String),

    /// The session closed from the remote side
    Closed,
}

/// Commands accepted by a running session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    /// Caller audio, 16-bit PCM at 16kHz
    Audio(Vec<u8>),

    /// A text instruction for the AI
    Text(String),

    /// Close the session
    End,
}

/// Errors raised while establishing a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    /// The session endpoint could not be reached or refused the connection
    Connect(String),

    /// The service did not acknowledge the session setup in time
    Timeout,

    /// The service answered with something we could not understand
    Protocol(String),

    /// The connector is missing required configuration (e.g. an API key)
    Configuration(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Connect(msg) => write!(f, "Session connection failed: {}", msg),
            SessionError::Timeout => write!(f, "Session setup timed out"),
            SessionError::Protocol(msg) => write!(f, "Session protocol error: {}", msg),
            SessionError::Configuration(msg) => write!(f, "Session configuration error: {}", msg),
        }
    }
}

impl std::error::Error for SessionError {}

/// Opens AI sessions.
#[async_trait]
pub trait ConversationConnector: Send + Sync {
    /// Start a session primed with `system_prompt`.
    async fn connect(
        &self,
        call_sid: &str,
        system_prompt: &str,
    ) -> Result<(SessionHandle, SessionEvents), SessionError>;
}

/// Handle to a running AI session.
///
/// All methods are non-blocking. Sends after the session has gone away are
/// silently dropped and reported through the return value.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    session_id: String,
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    pub fn new(session_id: impl Into<String>, commands: mpsc::UnboundedSender<SessionCommand>) -> Self {
        Self {
            session_id: session_id.into(),
            commands,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn send_audio_chunk(&self, pcm16: Vec<u8>) -> bool {
        self.commands.send(SessionCommand::Audio(pcm16)).is_ok()
    }

    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.commands.send(SessionCommand::Text(text.into())).is_ok()
    }

    pub fn end_session(&self) -> bool {
        self.commands.send(SessionCommand::End).is_ok()
    }
}
