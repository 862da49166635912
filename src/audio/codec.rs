//! PCM <-> base64 wire codec.
//!
//! The remote endpoint exchanges raw 16-bit little-endian PCM wrapped in
//! base64; no resampling or compression happens here. Inbound bytes are
//! reinterpreted as S16LE, de-interleaved per channel, and normalized to
//! the [-1.0, 1.0] floating range for the playback scheduler.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;

use crate::error::{Error, Result};

/// Encode i16 samples as base64 over their little-endian byte image.
pub fn encode(samples: &[i16]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    B64.encode(&bytes)
}

/// Decode a base64 payload back to raw bytes.
pub fn decode(data: &str) -> Result<Vec<u8>> {
    B64.decode(data).map_err(|e| Error::Decode(e.to_string()))
}

/// A decoded, de-interleaved, normalized audio buffer.
#[derive(Debug, Clone)]
pub struct PcmBuffer {
    pub sample_rate: u32,
    /// One sample vector per channel, each value in [-1.0, 1.0].
    pub channels: Vec<Vec<f32>>,
}

impl PcmBuffer {
    /// Number of frames (samples per channel).
    pub fn frame_count(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        self.frame_count() as f64 / f64::from(self.sample_rate)
    }
}

/// Reinterpret raw bytes as interleaved S16LE and split them per channel,
/// normalizing each sample by 1/32768.
pub fn to_pcm_buffer(bytes: &[u8], sample_rate: u32, channel_count: usize) -> Result<PcmBuffer> {
    if channel_count == 0 {
        return Err(Error::Format("channel count must be non-zero".to_string()));
    }
    let frame_bytes = channel_count * 2;
    if bytes.len() % frame_bytes != 0 {
        return Err(Error::Format(format!(
            "byte length {} is not a multiple of {} ({} channels x 2 bytes)",
            bytes.len(),
            frame_bytes,
            channel_count,
        )));
    }

    let frames = bytes.len() / frame_bytes;
    let mut channels: Vec<Vec<f32>> = (0..channel_count)
        .map(|_| Vec::with_capacity(frames))
        .collect();

    for (i, chunk) in bytes.chunks_exact(2).enumerate() {
        let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
        channels[i % channel_count].push(f32::from(sample) / 32768.0);
    }

    Ok(PcmBuffer {
        sample_rate,
        channels,
    })
}
