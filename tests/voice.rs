//! Voice pipeline integration tests
//!
//! Exercises the codec, playback scheduler, dispatcher, and session state
//! machine through the public API, without requiring audio hardware.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use folio_voice_rs::audio::codec;
use folio_voice_rs::audio::playback::{
    self, DeviceClock, PlaybackScheduler, PlaybackSegment, PlaybackSink,
};
use folio_voice_rs::transcript::TranscriptBuffer;
use folio_voice_rs::{CommandDispatcher, Error, HostCommand, HostHandler, Section, SessionState};

use async_trait::async_trait;
use serde_json::json;

/// Generate sine wave audio samples as i16 PCM
fn generate_sine_samples(frequency: f32, duration_secs: f32, sample_rate: u32) -> Vec<i16> {
    let num_samples = (sample_rate as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            let v = 0.5 * (2.0 * std::f32::consts::PI * frequency * t).sin();
            (v * 32767.0) as i16
        })
        .collect()
}

/// Sink that counts samples and paces writes like a real device.
struct CountingSink {
    written: Arc<Mutex<usize>>,
    realtime: bool,
}

impl PlaybackSink for CountingSink {
    fn write(&mut self, chunk: &[f32]) -> folio_voice_rs::Result<()> {
        *self.written.lock().unwrap() += chunk.len();
        if self.realtime {
            thread::sleep(Duration::from_secs_f64(
                chunk.len() as f64 / f64::from(playback::SAMPLE_RATE),
            ));
        }
        Ok(())
    }
    fn halt(&mut self) {}
}

/// Clock frozen at a settable time.
struct TestClock(Mutex<f64>);

impl TestClock {
    fn new() -> Arc<Self> {
        Arc::new(Self(Mutex::new(0.0)))
    }
    fn set(&self, t: f64) {
        *self.0.lock().unwrap() = t;
    }
}

impl DeviceClock for TestClock {
    fn now(&self) -> f64 {
        *self.0.lock().unwrap()
    }
}

fn segment(duration_secs: f64) -> PlaybackSegment {
    PlaybackSegment {
        samples: vec![0.1f32; (duration_secs * f64::from(playback::SAMPLE_RATE)) as usize],
        sample_rate: playback::SAMPLE_RATE,
    }
}

// ======================== Codec ========================

#[test]
fn test_codec_roundtrip_preserves_audio() {
    let samples = generate_sine_samples(440.0, 0.1, 16_000);
    let encoded = codec::encode(&samples);
    let bytes = codec::decode(&encoded).unwrap();

    let buf = codec::to_pcm_buffer(&bytes, 16_000, 1).unwrap();
    assert_eq!(buf.frame_count(), samples.len());
    for (i, &v) in buf.channels[0].iter().enumerate() {
        let expected = f32::from(samples[i]) / 32768.0;
        assert!((v - expected).abs() < f32::EPSILON);
    }
}

#[test]
fn test_codec_interleaved_channel_split() {
    // n interleaved samples across c channels produce n/c frames per channel
    let n = 480;
    let c = 3;
    let samples: Vec<i16> = (0..n as i16).collect();
    let encoded = codec::encode(&samples);
    let bytes = codec::decode(&encoded).unwrap();

    let buf = codec::to_pcm_buffer(&bytes, 24_000, c).unwrap();
    assert_eq!(buf.channels.len(), c);
    for channel in &buf.channels {
        assert_eq!(channel.len(), n / c);
        for &v in channel {
            assert!((-1.0..=1.0).contains(&v));
        }
    }
}

#[test]
fn test_codec_error_taxonomy() {
    assert!(matches!(
        codec::decode("***").unwrap_err(),
        Error::Decode(_)
    ));
    assert!(matches!(
        codec::to_pcm_buffer(&[0u8; 10], 24_000, 3).unwrap_err(),
        Error::Format(_)
    ));
}

// ======================== Playback scheduling ========================

#[test]
fn test_gapless_scheduling_scenario() {
    // Scenario: a 1.0 s fragment arrives at device clock 0, then a 0.5 s
    // fragment arrives while the first is still playing.
    let clock = TestClock::new();
    let written = Arc::new(Mutex::new(0));
    let sink_written = written.clone();
    let scheduler = PlaybackScheduler::start(
        move || {
            Ok(CountingSink {
                written: sink_written,
                realtime: true,
            })
        },
        clock.clone() as Arc<dyn DeviceClock>,
    )
    .unwrap();

    let start = scheduler.schedule(segment(1.0));
    assert_eq!(start, 0.0);
    assert!((scheduler.cursor() - 1.0).abs() < 1e-9);

    clock.set(0.2);
    let start = scheduler.schedule(segment(0.5));
    assert!((start - 1.0).abs() < 1e-9, "second segment must start at the cursor");
    assert!((scheduler.cursor() - 1.5).abs() < 1e-9);
}

#[test]
fn test_gapless_chain_of_segments() {
    // start(i+1) == end(i) for back-to-back arrivals while the clock lags
    let clock = TestClock::new();
    let written = Arc::new(Mutex::new(0));
    let sink_written = written.clone();
    let scheduler = PlaybackScheduler::start(
        move || {
            Ok(CountingSink {
                written: sink_written,
                realtime: true,
            })
        },
        clock as Arc<dyn DeviceClock>,
    )
    .unwrap();

    let durations = [0.25, 0.5, 0.125, 0.3];
    let mut expected_start = 0.0;
    for d in durations {
        let start = scheduler.schedule(segment(d));
        assert!((start - expected_start).abs() < 1e-9);
        expected_start = start + d;
    }
}

#[test]
fn test_interrupt_mid_playback_scenario() {
    // Scenario: interruption arrives mid-playback of two active segments.
    let clock = TestClock::new();
    let written = Arc::new(Mutex::new(0));
    let sink_written = written.clone();
    let scheduler = PlaybackScheduler::start(
        move || {
            Ok(CountingSink {
                written: sink_written,
                realtime: true,
            })
        },
        clock as Arc<dyn DeviceClock>,
    )
    .unwrap();

    scheduler.schedule(segment(1.0));
    scheduler.schedule(segment(1.0));
    assert_eq!(scheduler.active_count(), 2);

    scheduler.interrupt();
    assert_eq!(scheduler.active_count(), 0);
    assert_eq!(scheduler.cursor(), 0.0);

    // A subsequent fragment schedules at t=0 again
    let start = scheduler.schedule(segment(0.25));
    assert_eq!(start, 0.0);
}

#[test]
fn test_interrupt_discards_queued_audio() {
    // Audio queued behind the playing segment must never reach the device
    // after an interruption.
    let clock = TestClock::new();
    let written = Arc::new(Mutex::new(0));
    let sink_written = written.clone();
    let scheduler = PlaybackScheduler::start(
        move || {
            Ok(CountingSink {
                written: sink_written,
                realtime: true,
            })
        },
        clock as Arc<dyn DeviceClock>,
    )
    .unwrap();

    scheduler.schedule(segment(0.5));
    scheduler.schedule(segment(10.0));
    scheduler.interrupt();

    // Give the writer time to drain whatever it was going to play
    thread::sleep(Duration::from_millis(300));
    let total = *written.lock().unwrap();
    let ten_seconds = 10 * playback::SAMPLE_RATE as usize;
    assert!(
        total < ten_seconds / 2,
        "queued segment should have been discarded, wrote {} samples",
        total
    );
}

#[test]
fn test_segments_drain_naturally() {
    let clock = TestClock::new();
    let written = Arc::new(Mutex::new(0));
    let sink_written = written.clone();
    let scheduler = PlaybackScheduler::start(
        move || {
            Ok(CountingSink {
                written: sink_written,
                realtime: false,
            })
        },
        clock as Arc<dyn DeviceClock>,
    )
    .unwrap();

    let expected: usize = (0.02 * f64::from(playback::SAMPLE_RATE)) as usize * 2;
    scheduler.schedule(segment(0.02));
    scheduler.schedule(segment(0.02));

    let deadline = Instant::now() + Duration::from_secs(2);
    while scheduler.active_count() > 0 {
        assert!(Instant::now() < deadline, "segments never finished");
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(*written.lock().unwrap(), expected);
}

// ======================== Dispatch ========================

struct NullHost;

#[async_trait]
impl HostHandler for NullHost {
    async fn on_command(&self, _command: HostCommand) {}
}

#[test]
fn test_dispatch_validation() {
    let dispatcher = CommandDispatcher::new(Arc::new(NullHost));

    assert_eq!(
        dispatcher
            .resolve("navigateTo", &json!({"section": "home"}))
            .unwrap(),
        Some(HostCommand::Navigate(Section::Home))
    );
    // Invalid section: recognized no-op
    assert_eq!(
        dispatcher
            .resolve("navigateTo", &json!({"section": "garage"}))
            .unwrap(),
        None
    );
    // Unknown command: dispatch error
    assert!(matches!(
        dispatcher.resolve("format_disk", &json!({})).unwrap_err(),
        Error::Dispatch(_)
    ));
}

#[test]
fn test_tool_declarations_match_section_enum() {
    let decls = CommandDispatcher::tool_declarations();
    assert_eq!(decls.len(), 3);
    let sections: Vec<&str> = decls[0]["parameters"]["properties"]["section"]["enum"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|v| v.as_str())
        .collect();
    for s in sections {
        assert!(Section::parse(s).is_some());
    }
}

// ======================== Session state & transcript ========================

#[test]
fn test_state_machine_paths() {
    assert!(SessionState::Idle.can_transition(SessionState::Connecting));
    assert!(SessionState::Connecting.can_transition(SessionState::Active));
    assert!(SessionState::Active.can_transition(SessionState::Idle));
    assert!(!SessionState::Idle.can_transition(SessionState::Active));
}

#[test]
fn test_transcript_turn_lifecycle() {
    let mut transcript = TranscriptBuffer::new();
    transcript.append("toggle ");
    transcript.append("the theme");
    assert_eq!(transcript.snapshot(), "toggle the theme");
    transcript.clear();
    assert!(transcript.is_empty());
}
