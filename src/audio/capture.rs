//! Microphone capture stream.
//!
//! Runs ALSA capture on a dedicated OS thread (NOT a tokio task) so
//! real-time device I/O never contends with the async network loop, and
//! delivers fixed-size frames to an mpsc sink in strict temporal order.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;

use super::alsa_device;
use crate::error::{Error, Result};

/// Capture sample rate expected by the remote endpoint (mono).
pub const SAMPLE_RATE: u32 = 16_000;

/// Samples per delivered frame.
pub const FRAME_SAMPLES: usize = 4096;

/// Accumulates device periods and emits exactly-FRAME_SAMPLES frames.
pub(crate) struct FrameChunker {
    accum: Vec<i16>,
    frame_samples: usize,
}

impl FrameChunker {
    pub(crate) fn new(frame_samples: usize) -> Self {
        Self {
            accum: Vec::with_capacity(frame_samples * 2),
            frame_samples,
        }
    }

    /// Push captured samples; returns every complete frame now available,
    /// oldest first. Leftover samples stay buffered for the next push.
    pub(crate) fn push(&mut self, samples: &[i16]) -> Vec<Vec<i16>> {
        self.accum.extend_from_slice(samples);
        let mut frames = Vec::new();
        while self.accum.len() >= self.frame_samples {
            frames.push(self.accum[..self.frame_samples].to_vec());
            self.accum.drain(..self.frame_samples);
        }
        frames
    }
}

/// Open and immediately release the capture device.
///
/// Used by session setup to surface a permission failure before any
/// connection work happens.
pub fn probe(device: &str) -> Result<()> {
    let (pcm, _params) = alsa_device::open_capture(device, SAMPLE_RATE, 1)?;
    drop(pcm);
    Ok(())
}

/// Owns the microphone device and the capture thread.
pub struct CaptureStream {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CaptureStream {
    /// Open the capture device and start delivering frames to `frame_tx`.
    ///
    /// The device is opened inside the capture thread; this call blocks
    /// until the open has succeeded or failed, so acquisition errors
    /// (including permission) surface synchronously.
    pub fn start(device: &str, frame_tx: mpsc::Sender<Vec<i16>>) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<()>>();

        let device = device.to_string();
        let thread_running = running.clone();
        let handle = thread::Builder::new()
            .name("voice-capture".into())
            .spawn(move || {
                let (pcm, params) = match alsa_device::open_capture(&device, SAMPLE_RATE, 1) {
                    Ok(ok) => {
                        let _ = ready_tx.send(Ok(()));
                        ok
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = capture_loop(pcm, params.period_size, frame_tx, &thread_running) {
                    log::error!("Capture thread error: {}", e);
                }
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                running,
                handle: Some(handle),
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(Error::Audio("capture thread exited before ready".to_string()))
            }
        }
    }

    /// Halt frame delivery and release the device. Idempotent.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_loop(
    pcm: alsa::pcm::PCM,
    period_size: usize,
    frame_tx: mpsc::Sender<Vec<i16>>,
    running: &AtomicBool,
) -> Result<()> {
    let io = pcm.io_i16().map_err(|e| Error::Audio(e.to_string()))?;
    let mut read_buf = vec![0i16; period_size.max(1)];
    let mut chunker = FrameChunker::new(FRAME_SAMPLES);

    log::info!(
        "Capture started: rate={}, frame_samples={}, period={}",
        SAMPLE_RATE,
        FRAME_SAMPLES,
        period_size,
    );

    while running.load(Ordering::Relaxed) {
        match io.readi(&mut read_buf) {
            Ok(frames_read) => {
                for frame in chunker.push(&read_buf[..frames_read]) {
                    if frame_tx.blocking_send(frame).is_err() {
                        log::warn!("Frame sink dropped, stopping capture");
                        return Ok(());
                    }
                }
            }
            Err(e) => {
                log::warn!("ALSA capture error: {}, recovering...", e);
                if let Err(e2) = pcm.prepare() {
                    log::error!("Failed to recover PCM capture: {}", e2);
                    break;
                }
            }
        }
    }

    log::info!("Capture stopped");
    Ok(())
}
