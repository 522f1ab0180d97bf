//! # Live Audio Session Client
//!
//! WebSocket client for a bidirectional live-audio model endpoint
//! (`BidiGenerateContent`). One connection per call:
//!
//! 1. **Connect**: open the socket (bounded by `connect_timeout_ms`)
//! 2. **Setup**: send model, voice and system instruction, wait for `setupComplete`
//! 3. **Stream**: caller audio goes out as `realtimeInput` chunks, instructions as
//!    `clientContent` turns; model audio comes back inside `serverContent`
//! 4. **Close**: `SessionCommand::End` closes the socket
//!
//! Two background tasks own the socket halves. The bridge only sees the
//! command/event channels.

use crate::audio::transcoder::resample_pcm16;
use crate::config::SessionConfig;
use crate::session::{ConversationConnector, SessionCommand, SessionError, SessionEvent, SessionEvents, SessionHandle};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde_json::{json, Value};
use std::fmt::Display;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite, tungstenite::Message};
use tracing::{debug, info, warn};

/// Sample rate the bridge exchanges with the session.
const SESSION_SAMPLE_RATE: u32 = 16000;

/// Connector for the live-audio endpoint configured under `[session]`.
pub struct GeminiLiveConnector {
    config: SessionConfig,
}

impl GeminiLiveConnector {
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }

    fn session_url(&self) -> String {
        format!("{}?key={}", self.config.endpoint, self.config.api_key)
    }
}

#[async_trait]
impl ConversationConnector for GeminiLiveConnector {
    async fn connect(
        &self,
        call_sid: &str,
        system_prompt: &str,
    ) -> Result<(SessionHandle, SessionEvents), SessionError> {
        if self.config.api_key.is_empty() {
            return Err(SessionError::Configuration("session.api_key is not set".to_string()));
        }

        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        info!(call_sid = %call_sid, model = %self.config.model, "Opening AI session");

        let (stream, _response) = tokio::time::timeout(timeout, connect_async(self.session_url()))
            .await
            .map_err(|_| SessionError::Timeout)?
            .map_err(|e| SessionError::Connect(e.to_string()))?;

        let (mut write, mut read) = stream.split();

        let setup = setup_message(&self.config, system_prompt);
        write
            .send(Message::Text(setup.to_string()))
            .await
            .map_err(|e| SessionError::Connect(e.to_string()))?;

        tokio::time::timeout(timeout, wait_for_setup(&mut read))
            .await
            .map_err(|_| SessionError::Timeout)??;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        tokio::spawn(write_commands(write, command_rx, call_sid.to_string()));
        tokio::spawn(read_events(read, event_tx, call_sid.to_string()));

        let session_id = uuid::Uuid::new_v4().to_string();
        info!(call_sid = %call_sid, session_id = %session_id, "AI session ready");

        Ok((SessionHandle::new(session_id, command_tx), event_rx))
    }
}

/// Messages the service can send, reduced to what the bridge cares about.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ServerMessage {
    SetupComplete,
    Content {
        audio: Vec<Vec<u8>>,
        turn_complete: bool,
        interrupted: bool,
    },
    GoAway,
    Other,
}

pub(crate) fn setup_message(config: &SessionConfig, system_prompt: &str) -> Value {
    json!({
        "setup": {
            "model": config.model,
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": {
                        "prebuiltVoiceConfig": { "voiceName": config.voice_name }
                    }
                }
            },
            "systemInstruction": {
                "parts": [{ "text": system_prompt }]
            }
        }
    })
}

pub(crate) fn audio_message(pcm16: &[u8]) -> Value {
    json!({
        "realtimeInput": {
            "mediaChunks": [{
                "mimeType": format!("audio/pcm;rate={}", SESSION_SAMPLE_RATE),
                "data": BASE64.encode(pcm16)
            }]
        }
    })
}

pub(crate) fn text_message(text: &str) -> Value {
    json!({
        "clientContent": {
            "turns": [{ "role": "user", "parts": [{ "text": text }] }],
            "turnComplete": true
        }
    })
}

/// Parse one server message. Audio is returned already normalised to 16kHz.
pub(crate) fn parse_server_message(text: &str) -> Result<ServerMessage, SessionError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| SessionError::Protocol(format!("invalid JSON from session: {}", e)))?;

    if value.get("setupComplete").is_some() {
        return Ok(ServerMessage::SetupComplete);
    }

    if value.get("goAway").is_some() {
        return Ok(ServerMessage::GoAway);
    }

    let Some(content) = value.get("serverContent") else {
        return Ok(ServerMessage::Other);
    };

    let mut audio = Vec::new();
    let parts = content
        .pointer("/modelTurn/parts")
        .and_then(|p| p.as_array())
        .cloned()
        .unwrap_or_default();

    for part in parts {
        let Some(inline) = part.get("inlineData") else {
            continue;
        };
        let mime = inline.get("mimeType").and_then(|m| m.as_str()).unwrap_or("");
        if !mime.starts_with("audio/pcm") {
            continue;
        }
        let Some(data) = inline.get("data").and_then(|d| d.as_str()) else {
            continue;
        };

        let pcm = BASE64
            .decode(data)
            .map_err(|e| SessionError::Protocol(format!("invalid audio payload: {}", e)))?;
        let rate = sample_rate_from_mime(mime).unwrap_or(SESSION_SAMPLE_RATE);
        let pcm = resample_pcm16(&pcm, rate, SESSION_SAMPLE_RATE);
        if !pcm.is_empty() {
            audio.push(pcm);
        }
    }

    Ok(ServerMessage::Content {
        audio,
        turn_complete: content.get("turnComplete").and_then(|v| v.as_bool()).unwrap_or(false),
        interrupted: content.get("interrupted").and_then(|v| v.as_bool()).unwrap_or(false),
    })
}

/// Extract `rate=N` from a mime type such as `audio/pcm;rate=24000`.
fn sample_rate_from_mime(mime: &str) -> Option<u32> {
    mime.split(';')
        .filter_map(|param| param.trim().strip_prefix("rate="))
        .find_map(|rate| rate.parse().ok())
}

fn message_text(message: Message) -> Option<String> {
    match message {
        Message::Text(text) => Some(text),
        Message::Binary(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        _ => None,
    }
}

async fn wait_for_setup<S>(read: &mut S) -> Result<(), SessionError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(message) = read.next().await {
        match message {
            Ok(Message::Close(frame)) => {
                return Err(SessionError::Connect(format!("closed during setup: {:?}", frame)));
            }
            Ok(message) => {
                if let Some(text) = message_text(message) {
                    if parse_server_message(&text)? == ServerMessage::SetupComplete {
                        return Ok(());
                    }
                }
            }
            Err(e) => return Err(SessionError::Connect(e.to_string())),
        }
    }

    Err(SessionError::Connect("connection closed before setup completed".to_string()))
}

async fn write_commands<S>(mut sink: S, mut commands: mpsc::UnboundedReceiver<SessionCommand>, call_sid: String)
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    while let Some(command) = commands.recv().await {
        let message = match command {
            SessionCommand::Audio(pcm) => audio_message(&pcm),
            SessionCommand::Text(text) => {
                debug!(call_sid = %call_sid, "Sending instruction to AI: {}", text);
                text_message(&text)
            }
            SessionCommand::End => break,
        };

        if let Err(e) = sink.send(Message::Text(message.to_string())).await {
            warn!(call_sid = %call_sid, "AI session write failed: {}", e);
            return;
        }
    }

    let _ = sink.send(Message::Close(None)).await;
    debug!(call_sid = %call_sid, "AI session writer finished");
}

async fn read_events<S>(mut read: S, events: mpsc::UnboundedSender<SessionEvent>, call_sid: String)
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(message) = read.next().await {
        let message = match message {
            Ok(Message::Close(frame)) => {
                debug!(call_sid = %call_sid, "AI session closed by remote: {:?}", frame);
                break;
            }
            Ok(message) => message,
            Err(e) => {
                let _ = events.send(SessionEvent::Error(e.to_string()));
                return;
            }
        };

        let Some(text) = message_text(message) else {
            continue;
        };

        match parse_server_message(&text) {
            Ok(ServerMessage::Content { audio, turn_complete, interrupted }) => {
                for chunk in audio {
                    if events.send(SessionEvent::Audio(chunk)).is_err() {
                        return;
                    }
                }
                if interrupted {
                    debug!(call_sid = %call_sid, "AI reported interruption");
                    if events.send(SessionEvent::Interrupted).is_err() {
                        return;
                    }
                }
                if turn_complete && events.send(SessionEvent::TurnComplete).is_err() {
                    return;
                }
            }
            Ok(ServerMessage::GoAway) => {
                warn!(call_sid = %call_sid, "AI session is about to be terminated by the service");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(call_sid = %call_sid, "Dropping unreadable AI session message: {}", e);
            }
        }
    }

    let _ = events.send(SessionEvent::Closed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn test_setup_message_carries_prompt_and_voice() {
        let config = AppConfig::default().session;
        let setup = setup_message(&config, "Be brief.");
        assert_eq!(setup["setup"]["model"], config.model.as_str());
        assert_eq!(setup["setup"]["systemInstruction"]["parts"][0]["text"], "Be brief.");
        assert_eq!(
            setup["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            config.voice_name.as_str()
        );
    }

    #[test]
    fn test_text_and_audio_messages() {
        let text = text_message("Ask: Q2");
        assert_eq!(text["clientContent"]["turns"][0]["parts"][0]["text"], "Ask: Q2");
        assert_eq!(text["clientContent"]["turnComplete"], true);

        let audio = audio_message(&[1, 0, 2, 0]);
        let chunk = &audio["realtimeInput"]["mediaChunks"][0];
        assert_eq!(chunk["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(chunk["data"], BASE64.encode([1u8, 0, 2, 0]));
    }

    #[test]
    fn test_parse_setup_complete() {
        assert_eq!(parse_server_message(r#"{"setupComplete":{}}"#).unwrap(), ServerMessage::SetupComplete);
    }

    #[test]
    fn test_parse_audio_is_resampled_to_16k() {
        let pcm: Vec<u8> = std::iter::repeat([10u8, 0u8]).take(240).flatten().collect();
        let message = json!({
            "serverContent": {
                "modelTurn": { "parts": [{ "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": BASE64.encode(&pcm) } }] },
                "turnComplete": true
            }
        });

        match parse_server_message(&message.to_string()).unwrap() {
            ServerMessage::Content { audio, turn_complete, interrupted } => {
                assert_eq!(audio.len(), 1);
                assert_eq!(audio[0].len(), 160 * 2);
                assert!(turn_complete);
                assert!(!interrupted);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_bad_json() {
        assert!(matches!(parse_server_message("not json"), Err(SessionError::Protocol(_))));
    }

    #[test]
    fn test_sample_rate_from_mime() {
        assert_eq!(sample_rate_from_mime("audio/pcm;rate=24000"), Some(24000));
        assert_eq!(sample_rate_from_mime("audio/pcm"), None);
    }

    #[tokio::test]
    async fn test_reader_forwards_interruption() {
        let messages = vec![
            Ok(Message::Text(r#"{"serverContent":{"interrupted":true}}"#.to_string())),
            Ok(Message::Text(r#"{"serverContent":{"turnComplete":true}}"#.to_string())),
        ];
        let (tx, mut rx) = mpsc::unbounded_channel();
        read_events(futures_util::stream::iter(messages), tx, "CA1".to_string()).await;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(
            events,
            vec![SessionEvent::Interrupted, SessionEvent::TurnComplete, SessionEvent::Closed]
        );
    }

    #[tokio::test]
    async fn test_connect_without_api_key_fails_fast() {
        let mut config = AppConfig::default().session;
        config.api_key.clear();
        let connector = GeminiLiveConnector::new(config);
        let err = connector.connect("CA1", "prompt").await.unwrap_err();
        assert!(matches!(err, SessionError::Configuration(_)));
    }
}
