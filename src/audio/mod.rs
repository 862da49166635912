//! audio - capture, playback scheduling, and the PCM wire codec.
//!
//! Uses ALSA for device I/O on dedicated OS threads; the wire format is raw
//! S16LE PCM carried as base64, so no transcoding or resampling happens on
//! either path (16 kHz mono up, 24 kHz mono down).

mod alsa_device;
pub mod capture;
pub mod codec;
pub mod playback;

pub use capture::CaptureStream;
pub use playback::{AlsaSink, DeviceClock, MonotonicClock, PlaybackScheduler, PlaybackSegment, PlaybackSink};
