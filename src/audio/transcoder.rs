//! # Telephony Audio Transcoding
//!
//! Converts between the two audio formats that meet inside a bridged call:
//! - **AI side**: 16-bit signed little-endian PCM, 16 kHz, mono
//! - **Carrier side**: 8-bit G.711 µ-law, 8 kHz, mono
//!
//! ## Fixed Algorithms:
//! - **Down (16k PCM → 8k µ-law)**: keep every even-indexed sample (sample 0, 2, 4, ...),
//!   no anti-aliasing filter, then encode with the standard G.711 µ-law table
//!   (BIAS = 0x84, CLIP = 32635, sign / 3-bit exponent / 4-bit mantissa, bit-inverted).
//! - **Up (8k µ-law → 16k PCM)**: decode each byte with the same table and repeat
//!   every decoded sample twice.
//!
//! Both directions are pure functions. Identical input always produces identical
//! output bytes, and bad input (empty, odd-length PCM) produces an empty buffer
//! instead of an error so the pacing loop never has to handle transcoding failures.

use byteorder::{ByteOrder, LittleEndian};

/// Bias added before segment search (G.711).
const MULAW_BIAS: i32 = 0x84;

/// Largest magnitude that can be encoded once the bias is added.
const MULAW_CLIP: i32 = 32635;

/// Convert 16 kHz 16-bit PCM into 8 kHz µ-law.
///
/// Returns an empty buffer for empty input or input whose length is not a
/// whole number of 16-bit samples.
pub fn convert_down(pcm16k: &[u8]) -> Vec<u8> {
    if pcm16k.is_empty() || pcm16k.len() % 2 != 0 {
        return Vec::new();
    }

    pcm16k
        .chunks_exact(2)
        .step_by(2)
        .map(|bytes| linear_to_mulaw(LittleEndian::read_i16(bytes)))
        .collect()
}

/// Convert 8 kHz µ-law into 16 kHz 16-bit PCM.
pub fn convert_up(mulaw8k: &[u8]) -> Vec<u8> {
    let mut pcm = vec![0u8; mulaw8k.len() * 4];

    for (i, &byte) in mulaw8k.iter().enumerate() {
        let sample = mulaw_to_linear(byte);
        let offset = i * 4;
        LittleEndian::write_i16(&mut pcm[offset..offset + 2], sample);
        LittleEndian::write_i16(&mut pcm[offset + 2..offset + 4], sample);
    }

    pcm
}

/// Encode one linear sample as G.711 µ-law.
pub fn linear_to_mulaw(sample: i16) -> u8 {
    let mut pcm = sample as i32;
    let sign: u8 = if pcm < 0 {
        pcm = -pcm;
        0x80
    } else {
        0x00
    };

    if pcm > MULAW_CLIP {
        pcm = MULAW_CLIP;
    }
    pcm += MULAW_BIAS;

    let mut exponent: u8 = 7;
    let mut mask: i32 = 0x4000;
    while exponent > 0 && (pcm & mask) == 0 {
        exponent -= 1;
        mask >>= 1;
    }

    let mantissa = ((pcm >> (exponent + 3)) & 0x0F) as u8;
    !(sign | (exponent << 4) | mantissa)
}

/// Decode one G.711 µ-law byte into a linear sample.
pub fn mulaw_to_linear(byte: u8) -> i16 {
    let mu = !byte;
    let exponent = (mu >> 4) & 0x07;
    let mantissa = (mu & 0x0F) as i32;

    let magnitude = (((mantissa << 3) + MULAW_BIAS) << exponent) - MULAW_BIAS;
    if mu & 0x80 != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Linear-interpolation resampler for 16-bit PCM.
///
/// Only used to normalise AI session output (for example 24 kHz) onto the
/// 16 kHz contract the bridge expects. The telephony path never goes through
/// this function.
pub fn resample_pcm16(pcm: &[u8], from_rate: u32, to_rate: u32) -> Vec<u8> {
    if pcm.len() % 2 != 0 || from_rate == 0 || to_rate == 0 {
        return Vec::new();
    }
    if from_rate == to_rate || pcm.is_empty() {
        return pcm.to_vec();
    }

    let samples: Vec<i16> = pcm.chunks_exact(2).map(LittleEndian::read_i16).collect();
    let out_len = (samples.len() as u64 * to_rate as u64 / from_rate as u64) as usize;
    let step = from_rate as f64 / to_rate as f64;
    let last = samples.len() - 1;

    let mut out = vec![0u8; out_len * 2];
    for i in 0..out_len {
        let position = i as f64 * step;
        let index = (position.floor() as usize).min(last);
        let frac = position - index as f64;
        let s0 = samples[index] as f64;
        let s1 = samples[(index + 1).min(last)] as f64;
        let value = (s0 + (s1 - s0) * frac).round().clamp(i16::MIN as f64, i16::MAX as f64);
        LittleEndian::write_i16(&mut out[i * 2..i * 2 + 2], value as i16);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm_from_samples(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_silence_encodes_to_0xff() {
        assert_eq!(linear_to_mulaw(0), 0xFF);
        assert_eq!(mulaw_to_linear(0xFF), 0);
    }

    #[test]
    fn test_known_table_values() {
        assert_eq!(linear_to_mulaw(1000), 0xCE);
        assert_eq!(mulaw_to_linear(0xCE), 988);
        // Full-scale values clip to the outermost segment
        assert_eq!(linear_to_mulaw(i16::MAX), 0x80);
        assert_eq!(linear_to_mulaw(i16::MIN), 0x00);
        assert_eq!(mulaw_to_linear(0x80), 32124);
        assert_eq!(mulaw_to_linear(0x00), -32124);
    }

    #[test]
    fn test_table_is_self_consistent() {
        // Every code except negative zero (0x7F) survives decode + encode unchanged
        for byte in 0u8..=255 {
            if byte == 0x7F {
                continue;
            }
            assert_eq!(linear_to_mulaw(mulaw_to_linear(byte)), byte, "code {:#04x}", byte);
        }
    }

    #[test]
    fn test_convert_down_decimates_even_samples() {
        let pcm = pcm_from_samples(&[0, 30000, 1000, -30000]);
        let mulaw = convert_down(&pcm);
        assert_eq!(mulaw, vec![0xFF, 0xCE]);
    }

    #[test]
    fn test_convert_up_doubles_sample_count() {
        let pcm = convert_up(&[0xCE, 0xFF]);
        assert_eq!(pcm.len(), 8);
        assert_eq!(LittleEndian::read_i16(&pcm[0..2]), 988);
        assert_eq!(LittleEndian::read_i16(&pcm[2..4]), 988);
        assert_eq!(LittleEndian::read_i16(&pcm[4..6]), 0);
    }

    #[test]
    fn test_malformed_input_yields_empty_buffer() {
        assert!(convert_down(&[]).is_empty());
        assert!(convert_down(&[1, 2, 3]).is_empty());
        assert!(convert_up(&[]).is_empty());
        assert!(resample_pcm16(&[1, 2, 3], 24000, 16000).is_empty());
    }

    #[test]
    fn test_round_trip_is_reproducible() {
        let vector: Vec<u8> = (0u8..=255).collect();
        let first = convert_down(&convert_up(&vector));
        let second = convert_down(&convert_up(&vector));
        assert_eq!(first, second);
        assert_eq!(first.len(), vector.len());
    }

    #[test]
    fn test_resample_24k_to_16k_length() {
        let pcm = pcm_from_samples(&[100; 240]);
        let out = resample_pcm16(&pcm, 24000, 16000);
        assert_eq!(out.len(), 160 * 2);
        assert!(out.chunks_exact(2).all(|b| LittleEndian::read_i16(b) == 100));
    }
}
