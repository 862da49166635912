//! Gapless playback scheduling over an output device.
//!
//! Decoded model audio arrives as discrete segments that must play
//! back-to-back with no audible seams. The scheduler keeps a monotonic
//! cursor on the output timeline: each segment starts at
//! `max(cursor, device clock)` and advances the cursor by its duration, so
//! segments scheduled in arrival order can never overlap or gap even though
//! they arrive asynchronously. An interruption stops everything at once and
//! resets the timeline.
//!
//! The device itself sits behind the `PlaybackSink` trait: production uses
//! the ALSA sink below, tests substitute their own. Writing runs on a
//! dedicated OS thread, like capture.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tokio::sync::mpsc;

use super::alsa_device;
use crate::error::{Error, Result};

/// Playback sample rate of model audio (mono).
pub const SAMPLE_RATE: u32 = 24_000;

/// Samples written per sink call; the epoch is re-checked between chunks so
/// an interruption takes effect within one chunk of audio.
const WRITE_CHUNK: usize = 1024;

/// One decoded audio segment awaiting playback.
#[derive(Debug, Clone)]
pub struct PlaybackSegment {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl PlaybackSegment {
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }
}

/// Clock for the shared output timeline, in seconds.
pub trait DeviceClock: Send + Sync {
    fn now(&self) -> f64;
}

/// Wall-clock timeline starting when the scheduler was created.
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceClock for MonotonicClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Consumes mono f32 audio; the real implementation paces writes at the
/// device rate by blocking.
pub trait PlaybackSink: Send + 'static {
    fn write(&mut self, chunk: &[f32]) -> Result<()>;
    /// Drop whatever the device still has buffered, if possible.
    fn halt(&mut self);
}

struct SchedulerState {
    cursor: f64,
    epoch: u64,
    active: Vec<u64>,
    next_id: u64,
}

struct Queued {
    id: u64,
    epoch: u64,
    samples: Vec<f32>,
}

/// Owns the output device thread and the playback timeline.
pub struct PlaybackScheduler {
    state: Arc<Mutex<SchedulerState>>,
    epoch: Arc<AtomicU64>,
    clock: Arc<dyn DeviceClock>,
    queue_tx: Option<mpsc::UnboundedSender<Queued>>,
    handle: Option<JoinHandle<()>>,
}

impl PlaybackScheduler {
    /// Spawn the writer thread. The sink is constructed inside the thread
    /// (device handles need not be Send); this call blocks until the sink
    /// reports ready or failed.
    pub fn start<S, F>(sink_factory: F, clock: Arc<dyn DeviceClock>) -> Result<Self>
    where
        S: PlaybackSink,
        F: FnOnce() -> Result<S> + Send + 'static,
    {
        let state = Arc::new(Mutex::new(SchedulerState {
            cursor: 0.0,
            epoch: 0,
            active: Vec::new(),
            next_id: 0,
        }));
        let epoch = Arc::new(AtomicU64::new(0));
        let (queue_tx, queue_rx) = mpsc::unbounded_channel::<Queued>();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<()>>();

        let thread_state = state.clone();
        let thread_epoch = epoch.clone();
        let handle = thread::Builder::new()
            .name("voice-playback".into())
            .spawn(move || {
                let sink = match sink_factory() {
                    Ok(s) => {
                        let _ = ready_tx.send(Ok(()));
                        s
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                writer_loop(sink, queue_rx, thread_state, thread_epoch);
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                state,
                epoch,
                clock,
                queue_tx: Some(queue_tx),
                handle: Some(handle),
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(Error::Audio("playback thread exited before ready".to_string()))
            }
        }
    }

    /// Schedule a segment for gapless playback.
    ///
    /// Returns the start offset assigned on the output timeline:
    /// `max(cursor, clock)`. The cursor advances by the segment duration and
    /// the segment joins the active set until it finishes or is interrupted.
    pub fn schedule(&self, segment: PlaybackSegment) -> f64 {
        let mut st = self.state.lock().unwrap();
        let start = st.cursor.max(self.clock.now());
        st.cursor = start + segment.duration();
        let id = st.next_id;
        st.next_id += 1;
        st.active.push(id);
        if let Some(tx) = &self.queue_tx {
            let _ = tx.send(Queued {
                id,
                epoch: st.epoch,
                samples: segment.samples,
            });
        }
        start
    }

    /// Stop every active segment immediately, clear the active set, and
    /// reset the cursor to zero. Safe with nothing playing. Scheduler state
    /// is updated synchronously; the device drains asynchronously.
    pub fn interrupt(&self) {
        let mut st = self.state.lock().unwrap();
        st.epoch += 1;
        self.epoch.store(st.epoch, Ordering::SeqCst);
        st.active.clear();
        st.cursor = 0.0;
    }

    /// `interrupt()` plus releasing the output device.
    pub fn teardown(&mut self) {
        self.interrupt();
        self.queue_tx.take();
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }

    pub fn cursor(&self) -> f64 {
        self.state.lock().unwrap().cursor
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().unwrap().active.len()
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn writer_loop<S: PlaybackSink>(
    mut sink: S,
    mut queue_rx: mpsc::UnboundedReceiver<Queued>,
    state: Arc<Mutex<SchedulerState>>,
    epoch: Arc<AtomicU64>,
) {
    while let Some(item) = queue_rx.blocking_recv() {
        if item.epoch != epoch.load(Ordering::SeqCst) {
            // Interrupted while queued
            continue;
        }

        for chunk in item.samples.chunks(WRITE_CHUNK) {
            if item.epoch != epoch.load(Ordering::SeqCst) {
                sink.halt();
                break;
            }
            if let Err(e) = sink.write(chunk) {
                log::error!("Playback write error: {}", e);
                break;
            }
        }

        // Natural completion: drop the segment from the active set unless an
        // interruption already cleared it.
        let mut st = state.lock().unwrap();
        if st.epoch == item.epoch {
            st.active.retain(|&id| id != item.id);
        }
    }
    log::info!("Playback writer exited");
}

// ======================== ALSA sink ========================

/// Output device sink; mono input is duplicated across the channels the
/// hardware actually negotiated.
pub struct AlsaSink {
    pcm: alsa::pcm::PCM,
    channels: usize,
}

impl AlsaSink {
    pub fn open(device: &str) -> Result<Self> {
        let (pcm, params) = alsa_device::open_playback(device, SAMPLE_RATE, 1, Some(WRITE_CHUNK))?;
        Ok(Self {
            pcm,
            channels: params.channels.max(1) as usize,
        })
    }
}

impl PlaybackSink for AlsaSink {
    fn write(&mut self, chunk: &[f32]) -> Result<()> {
        let io = self.pcm.io_i16().map_err(|e| Error::Audio(e.to_string()))?;

        let mut pcm_data = Vec::with_capacity(chunk.len() * self.channels);
        for &s in chunk {
            let v = (s.clamp(-1.0, 1.0) * 32767.0) as i16;
            for _ in 0..self.channels {
                pcm_data.push(v);
            }
        }

        // Write with retry to handle short writes and XRUN recovery
        let total_frames = chunk.len();
        let mut written = 0;
        let mut retries = 0u32;
        while written < total_frames {
            match io.writei(&pcm_data[written * self.channels..]) {
                Ok(n) => {
                    written += n;
                    retries = 0;
                }
                Err(e) => {
                    log::warn!("ALSA XRUN or error: {}, recovering...", e);
                    retries += 1;
                    if let Err(e2) = self.pcm.prepare() {
                        return Err(Error::Audio(format!(
                            "failed to recover PCM playback: {}",
                            e2
                        )));
                    }
                    if retries >= 3 {
                        return Err(Error::Audio(format!("playback write failed: {}", e)));
                    }
                }
            }
        }
        Ok(())
    }

    fn halt(&mut self) {
        // snd_pcm_drop discards pending frames; prepare() readies the device
        // for the next write.
        let _ = self.pcm.drop();
        let _ = self.pcm.prepare();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Discards audio instantly.
    struct NullSink;

    impl PlaybackSink for NullSink {
        fn write(&mut self, _chunk: &[f32]) -> Result<()> {
            Ok(())
        }
        fn halt(&mut self) {}
    }

    /// Paces writes at the nominal device rate, like real hardware.
    struct RealtimeSink;

    impl PlaybackSink for RealtimeSink {
        fn write(&mut self, chunk: &[f32]) -> Result<()> {
            thread::sleep(Duration::from_secs_f64(
                chunk.len() as f64 / f64::from(SAMPLE_RATE),
            ));
            Ok(())
        }
        fn halt(&mut self) {}
    }

    /// Test clock pinned to a settable instant.
    struct ManualClock(Mutex<f64>);

    impl ManualClock {
        fn new() -> Arc<Self> {
            Arc::new(Self(Mutex::new(0.0)))
        }
        fn set(&self, t: f64) {
            *self.0.lock().unwrap() = t;
        }
    }

    impl DeviceClock for ManualClock {
        fn now(&self) -> f64 {
            *self.0.lock().unwrap()
        }
    }

    fn segment(duration_secs: f64) -> PlaybackSegment {
        let samples = vec![0.0f32; (duration_secs * f64::from(SAMPLE_RATE)) as usize];
        PlaybackSegment {
            samples,
            sample_rate: SAMPLE_RATE,
        }
    }

    #[test]
    fn back_to_back_segments_are_gapless() {
        let clock = ManualClock::new();
        let scheduler =
            PlaybackScheduler::start(|| Ok(RealtimeSink), clock.clone() as Arc<dyn DeviceClock>)
                .unwrap();

        // 1.0 s fragment at device clock 0 starts at 0, cursor 1.0
        let start = scheduler.schedule(segment(1.0));
        assert_eq!(start, 0.0);
        assert!((scheduler.cursor() - 1.0).abs() < 1e-9);

        // 0.5 s fragment while the first is still playing starts at the
        // cursor, not the current clock
        clock.set(0.3);
        let start = scheduler.schedule(segment(0.5));
        assert!((start - 1.0).abs() < 1e-9);
        assert!((scheduler.cursor() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn idle_timeline_schedules_at_device_clock() {
        let clock = ManualClock::new();
        let scheduler =
            PlaybackScheduler::start(|| Ok(NullSink), clock.clone() as Arc<dyn DeviceClock>)
                .unwrap();

        clock.set(5.0);
        let start = scheduler.schedule(segment(0.25));
        assert_eq!(start, 5.0);
        assert!((scheduler.cursor() - 5.25).abs() < 1e-9);
    }

    #[test]
    fn interrupt_clears_active_set_and_resets_cursor() {
        let clock = ManualClock::new();
        let scheduler =
            PlaybackScheduler::start(|| Ok(RealtimeSink), clock.clone() as Arc<dyn DeviceClock>)
                .unwrap();

        scheduler.schedule(segment(1.0));
        scheduler.schedule(segment(1.0));
        assert_eq!(scheduler.active_count(), 2);

        scheduler.interrupt();
        assert_eq!(scheduler.active_count(), 0);
        assert_eq!(scheduler.cursor(), 0.0);

        // A subsequent fragment schedules at t=0 again
        let start = scheduler.schedule(segment(0.5));
        assert_eq!(start, 0.0);
        assert!((scheduler.cursor() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn interrupt_with_nothing_active_is_a_no_op() {
        let clock = ManualClock::new();
        let scheduler =
            PlaybackScheduler::start(|| Ok(NullSink), clock.clone() as Arc<dyn DeviceClock>)
                .unwrap();
        scheduler.interrupt();
        assert_eq!(scheduler.active_count(), 0);
        assert_eq!(scheduler.cursor(), 0.0);
    }

    #[test]
    fn finished_segments_leave_the_active_set() {
        let clock = ManualClock::new();
        let scheduler =
            PlaybackScheduler::start(|| Ok(NullSink), clock.clone() as Arc<dyn DeviceClock>)
                .unwrap();

        scheduler.schedule(segment(0.01));
        let deadline = Instant::now() + Duration::from_secs(2);
        while scheduler.active_count() > 0 {
            assert!(Instant::now() < deadline, "segment never finished");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn teardown_is_idempotent() {
        let clock = ManualClock::new();
        let mut scheduler =
            PlaybackScheduler::start(|| Ok(NullSink), clock as Arc<dyn DeviceClock>).unwrap();
        scheduler.teardown();
        scheduler.teardown();
        assert_eq!(scheduler.active_count(), 0);
    }
}
