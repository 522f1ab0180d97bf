//! # Audio Processing Module
//!
//! Signal-level helpers used by the call bridge. Everything in here is pure and
//! synchronous; the bridge calls into it from its own execution context.
//!
//! ## Audio Formats:
//! - **AI session side**: 16kHz, 16-bit PCM, mono, little-endian
//! - **Telephony side**: 8kHz, 8-bit G.711 µ-law, mono

pub mod transcoder; // PCM16@16k <-> µ-law@8k conversion
pub mod vad;        // RMS energy and barge-in detection
