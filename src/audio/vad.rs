//! # Energy-based Voice Activity
//!
//! Frame-level voice activity for caller audio. Every inbound frame is reduced
//! to one RMS value over its 16-bit samples and compared with two thresholds:
//! - **speaking threshold**: the caller is talking (drives turn-taking timers)
//! - **barge-in threshold**: the caller is loud enough to interrupt the AI, but
//!   only after several consecutive loud frames so a single click or spike on the
//!   line does not cut the AI off.

use byteorder::{ByteOrder, LittleEndian};

/// Root-mean-square amplitude of little-endian 16-bit PCM.
///
/// Returned on the raw sample scale (0.0 for silence, ~23170 for a full-scale
/// sine wave). A trailing odd byte is ignored; empty input is silence.
pub fn calculate_rms(pcm: &[u8]) -> f64 {
    let sample_count = pcm.len() / 2;
    if sample_count == 0 {
        return 0.0;
    }

    let sum_squares: f64 = pcm
        .chunks_exact(2)
        .map(|bytes| {
            let sample = LittleEndian::read_i16(bytes) as f64;
            sample * sample
        })
        .sum();

    (sum_squares / sample_count as f64).sqrt()
}

/// Energy classification of a single inbound frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameEnergy {
    pub rms: f64,
    pub is_speaking: bool,
    pub is_loud: bool,
}

impl FrameEnergy {
    pub fn measure(pcm: &[u8], speaking_threshold: f64, barge_in_threshold: f64) -> Self {
        let rms = calculate_rms(pcm);
        Self {
            rms,
            is_speaking: rms >= speaking_threshold,
            is_loud: rms >= barge_in_threshold,
        }
    }
}

/// Counts consecutive loud frames while the AI is speaking.
///
/// Any quiet frame resets the run; reaching `required` reports a barge-in and
/// resets the counter so the next interruption starts from zero.
#[derive(Debug, Clone)]
pub struct LoudFrameCounter {
    consecutive: u32,
    required: u32,
}

impl LoudFrameCounter {
    pub fn new(required: u32) -> Self {
        Self {
            consecutive: 0,
            required: required.max(1),
        }
    }

    /// Feed one frame, returning true when the barge-in condition is met.
    pub fn observe(&mut self, is_loud: bool) -> bool {
        if !is_loud {
            self.consecutive = 0;
            return false;
        }

        self.consecutive += 1;
        if self.consecutive >= self.required {
            self.consecutive = 0;
            return true;
        }
        false
    }

    pub fn reset(&mut self) {
        self.consecutive = 0;
    }

    #[cfg(test)]
    pub fn count(&self) -> u32 {
        self.consecutive
    }
}
