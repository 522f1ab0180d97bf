//! Carrier media-stream wire format.
//!
//! ## Client → Server (JSON text frames, tagged by `event`):
//! - `connected`: handshake acknowledgement
//! - `start`: call and stream ids plus custom parameters (`groupId` selects the workflow)
//! - `media`: base64 µ-law 8kHz audio
//! - `stop`: the carrier is ending the stream
//!
//! Other events (`mark`, `dtmf`, ...) parse as [`InboundFrame::Other`].
//!
//! ## Server → Client:
//! - `media`: base64 µ-law 8kHz audio on the outbound track
//! - `clear`: discard audio the carrier has buffered but not yet played

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Custom parameter naming the workflow for a call.
pub const WORKFLOW_PARAMETER: &str = "groupId";

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum InboundFrame {
    Connected {
        #[serde(default)]
        protocol: Option<String>,
        #[serde(default)]
        version: Option<String>,
    },
    Start {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        start: StartPayload,
    },
    Media {
        media: MediaPayload,
    },
    Stop {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPayload {
    pub call_sid: String,
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
}

impl StartPayload {
    /// Workflow selector for this call, falling back to `default` when the
    /// carrier passed none.
    pub fn workflow_selector(&self, default: &str) -> String {
        self.custom_parameters
            .get(WORKFLOW_PARAMETER)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .unwrap_or(default)
            .to_string()
    }
}

#[derive(Debug, Deserialize)]
pub struct MediaPayload {
    pub payload: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundFrame<'a> {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: &'a str,
        media: OutboundMedia,
        track: &'static str,
    },
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: &'a str,
    },
}

#[derive(Debug, Serialize)]
pub struct OutboundMedia {
    pub payload: String,
}

impl<'a> OutboundFrame<'a> {
    pub fn media(stream_sid: &'a str, payload: String) -> Self {
        OutboundFrame::Media {
            stream_sid,
            media: OutboundMedia { payload },
            track: "outbound",
        }
    }

    pub fn clear(stream_sid: &'a str) -> Self {
        OutboundFrame::Clear { stream_sid }
    }
}

pub fn parse_frame(text: &str) -> Result<InboundFrame, serde_json::Error> {
    serde_json::from_str(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_connected() {
        let frame = parse_frame(r#"{"event":"connected","protocol":"Call","version":"1.0.0"}"#).unwrap();
        match frame {
            InboundFrame::Connected { protocol, .. } => assert_eq!(protocol.as_deref(), Some("Call")),
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn test_parse_start_with_group() {
        let text = json!({
            "event": "start",
            "sequenceNumber": "1",
            "streamSid": "MZ123",
            "start": {
                "accountSid": "AC1",
                "callSid": "CA456",
                "tracks": ["inbound"],
                "customParameters": { "groupId": "bus-owners" },
                "mediaFormat": { "encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1 }
            }
        })
        .to_string();

        match parse_frame(&text).unwrap() {
            InboundFrame::Start { stream_sid, start } => {
                assert_eq!(stream_sid, "MZ123");
                assert_eq!(start.call_sid, "CA456");
                assert_eq!(start.workflow_selector("default"), "bus-owners");
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn test_start_without_group_uses_default() {
        let text = r#"{"event":"start","streamSid":"MZ1","start":{"callSid":"CA1"}}"#;
        match parse_frame(text).unwrap() {
            InboundFrame::Start { start, .. } => assert_eq!(start.workflow_selector("default"), "default"),
            other => panic!("unexpected frame {:?}", other),
        }

        let blank = r#"{"event":"start","streamSid":"MZ1","start":{"callSid":"CA1","customParameters":{"groupId":" "}}}"#;
        match parse_frame(blank).unwrap() {
            InboundFrame::Start { start, .. } => assert_eq!(start.workflow_selector("default"), "default"),
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn test_parse_media_and_stop() {
        let media = r#"{"event":"media","streamSid":"MZ1","media":{"track":"inbound","chunk":"2","timestamp":"40","payload":"/38="}}"#;
        match parse_frame(media).unwrap() {
            InboundFrame::Media { media, .. } => {
                assert_eq!(media.payload, "/38=");
            }
            other => panic!("unexpected frame {:?}", other),
        }

        let stop = r#"{"event":"stop","streamSid":"MZ1","stop":{"callSid":"CA1"}}"#;
        assert!(matches!(parse_frame(stop).unwrap(), InboundFrame::Stop { .. }));
    }

    #[test]
    fn test_unknown_and_malformed_frames() {
        let mark = r#"{"event":"mark","streamSid":"MZ1","mark":{"name":"greeting"}}"#;
        assert!(matches!(parse_frame(mark).unwrap(), InboundFrame::Other));

        assert!(parse_frame("not json").is_err());
        assert!(parse_frame(r#"{"event":"media","streamSid":"MZ1"}"#).is_err());
        assert!(parse_frame(r#"{"streamSid":"MZ1"}"#).is_err());
    }

    #[test]
    fn test_outbound_frame_shape() {
        let media = serde_json::to_value(OutboundFrame::media("MZ1", "AAAA".to_string())).unwrap();
        assert_eq!(
            media,
            json!({"event": "media", "streamSid": "MZ1", "media": {"payload": "AAAA"}, "track": "outbound"})
        );

        let clear = serde_json::to_value(OutboundFrame::clear("MZ1")).unwrap();
        assert_eq!(clear, json!({"event": "clear", "streamSid": "MZ1"}));
    }
}
