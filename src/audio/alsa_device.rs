//! ALSA PCM device wrappers for audio capture and playback.

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};

use crate::error::{Error, Result};

const EPERM: i32 = 1;
const EACCES: i32 = 13;

/// Parameters negotiated with the ALSA hardware.
#[derive(Debug, Clone)]
pub struct AlsaParams {
    /// Actual sample rate after negotiation
    pub sample_rate: u32,
    /// Actual number of channels
    pub channels: u32,
    /// Period size in frames
    pub period_size: usize,
}

/// Open a PCM device for capture (recording).
///
/// A permission failure from the device layer maps to `Error::Permission`
/// so the session can surface "could not start voice session" distinctly.
pub fn open_capture(device: &str, sample_rate: u32, channels: u32) -> Result<(PCM, AlsaParams)> {
    let pcm = PCM::new(device, Direction::Capture, false).map_err(|e| {
        if matches!(e.errno(), EACCES | EPERM) {
            Error::Permission(format!("cannot open capture device '{}': {}", device, e))
        } else {
            Error::Audio(format!("failed to open capture device '{}': {}", device, e))
        }
    })?;
    configure(pcm, sample_rate, channels, None, "Capture")
}

/// Open a PCM device for playback.
pub fn open_playback(
    device: &str,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
) -> Result<(PCM, AlsaParams)> {
    let pcm = PCM::new(device, Direction::Playback, false).map_err(|e| {
        Error::Audio(format!("failed to open playback device '{}': {}", device, e))
    })?;
    configure(pcm, sample_rate, channels, period_size, "Playback")
}

fn configure(
    pcm: PCM,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
    dir_name: &str,
) -> Result<(PCM, AlsaParams)> {
    // Configure hardware parameters: S16LE interleaved at the requested rate
    {
        let hwp = HwParams::any(&pcm)
            .map_err(|e| Error::Audio(format!("failed to initialize HwParams: {}", e)))?;
        hwp.set_access(Access::RWInterleaved)
            .map_err(|e| Error::Audio(e.to_string()))?;
        hwp.set_format(Format::S16LE)
            .map_err(|e| Error::Audio(e.to_string()))?;
        hwp.set_channels(channels)
            .map_err(|e| Error::Audio(e.to_string()))?;
        hwp.set_rate_near(sample_rate, ValueOr::Nearest)
            .map_err(|e| Error::Audio(e.to_string()))?;
        if let Some(ps) = period_size {
            hwp.set_period_size_near(ps as alsa::pcm::Frames, ValueOr::Nearest)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }
        pcm.hw_params(&hwp)
            .map_err(|e| Error::Audio(format!("{} hw_params failed: {}", dir_name, e)))?;
    }

    // Read back actual negotiated parameters
    let (actual_rate, actual_channels, period_size) = {
        let hwp = pcm
            .hw_params_current()
            .map_err(|e| Error::Audio(e.to_string()))?;
        let rate = hwp.get_rate().map_err(|e| Error::Audio(e.to_string()))?;
        let ch = hwp.get_channels().map_err(|e| Error::Audio(e.to_string()))?;
        let ps = hwp.get_period_size().map_err(|e| Error::Audio(e.to_string()))? as usize;
        (rate, ch, ps)
    };

    let params = AlsaParams {
        sample_rate: actual_rate,
        channels: actual_channels,
        period_size,
    };

    log::info!(
        "ALSA {}: rate={}, channels={}, period_size={}",
        dir_name,
        actual_rate,
        actual_channels,
        period_size,
    );

    Ok((pcm, params))
}
