//! Realtime voice session lifecycle and event routing.
//!
//! One `VoiceSession` owns one websocket connection to the remote realtime
//! endpoint plus the capture and playback devices for its lifetime:
//! Idle → Connecting → Active → Closing → Idle, with `open`/`cleanup` as the
//! only public lifecycle transitions. All inbound events are consumed by a
//! single sequential loop, which is what guarantees that transcript
//! fragments apply in arrival order, audio fragments schedule in arrival
//! order, and tool acknowledgements go out in call order.

use std::sync::{Arc, Mutex};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;
use uuid::Uuid;

use crate::audio::capture::{self, CaptureStream};
use crate::audio::playback::{
    AlsaSink, DeviceClock, MonotonicClock, PlaybackScheduler, PlaybackSegment,
};
use crate::audio::{codec, playback};
use crate::config::Config;
use crate::dispatch::{CommandDispatcher, HostHandler};
use crate::error::{Error, Result};
use crate::protocol::{self, ServerMessage};
use crate::state_machine::SessionState;
use crate::transcript::TranscriptBuffer;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Notifications delivered to the embedding application.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The remote accepted the session; audio is flowing.
    Connected,
    /// Accumulated recognized speech for the current turn.
    Transcript(String),
    /// The current turn finished; the transcript was reset.
    TurnComplete,
    /// The session returned to Idle (cleanup, remote close, or error).
    Closed,
}

#[derive(Default)]
struct Inner {
    state: SessionState,
    capture: Option<CaptureStream>,
    scheduler: Option<PlaybackScheduler>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    loop_task: Option<task::JoinHandle<()>>,
    transcript: TranscriptBuffer,
}

impl Inner {
    fn set_state(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        debug_assert!(
            self.state.can_transition(next),
            "illegal session transition {:?} -> {:?}",
            self.state,
            next,
        );
        log::debug!("Session state: {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

/// One voice-assistant session. At most one may be active at a time; `open`
/// on a session that is not Idle is an error.
pub struct VoiceSession {
    config: Config,
    dispatcher: Arc<CommandDispatcher>,
    events_tx: mpsc::Sender<SessionEvent>,
    inner: Arc<Mutex<Inner>>,
}

impl VoiceSession {
    pub fn new(
        config: Config,
        handler: Arc<dyn HostHandler>,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::channel(64);
        (
            Self {
                config,
                dispatcher: Arc::new(CommandDispatcher::new(handler)),
                events_tx,
                inner: Arc::new(Mutex::new(Inner::default())),
            },
            events_rx,
        )
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().unwrap().state
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// Idle → Connecting → Active.
    ///
    /// Acquires the audio devices, connects to the remote endpoint, and
    /// starts streaming once the remote accepts the setup. Any failure rolls
    /// everything back through `cleanup()`; no partial state survives.
    pub async fn open(&self) -> Result<()> {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.state != SessionState::Idle {
                return Err(Error::Connection("session is already open".to_string()));
            }
            inner.set_state(SessionState::Connecting);
        }

        match self.try_open().await {
            Ok(()) => Ok(()),
            Err(e) => {
                log::error!("Session open failed: {}", e);
                self.cleanup().await;
                Err(e)
            }
        }
    }

    async fn try_open(&self) -> Result<()> {
        let session_id = Uuid::new_v4();

        // Microphone permission first: fail before touching the network.
        let capture_device = self.config.capture_device;
        task::spawn_blocking(move || capture::probe(capture_device))
            .await
            .map_err(|e| Error::Audio(format!("probe task failed: {}", e)))??;

        // Output device and playback timeline.
        let playback_device = self.config.playback_device;
        let clock: Arc<dyn DeviceClock> = Arc::new(MonotonicClock::new());
        let scheduler = task::spawn_blocking(move || {
            PlaybackScheduler::start(move || AlsaSink::open(playback_device), clock)
        })
        .await
        .map_err(|e| Error::Audio(format!("playback task failed: {}", e)))??;

        // Remote connection.
        let mut endpoint = Url::parse(self.config.ws_url).map_err(|e| {
            Error::Connection(format!("invalid endpoint '{}': {}", self.config.ws_url, e))
        })?;
        endpoint
            .query_pairs_mut()
            .append_pair("key", &self.config.api_key);

        log::info!("Connecting voice session {}...", session_id);
        let (ws, _) = connect_async(endpoint.as_str()).await?;
        let (mut ws_tx, mut ws_rx) = ws.split();

        let setup = protocol::setup_message(
            self.config.model,
            self.config.voice,
            self.config.system_instruction,
            CommandDispatcher::tool_declarations(),
        );
        ws_tx
            .send(Message::Text(serde_json::to_string(&setup)?.into()))
            .await?;

        // Wait for the remote to accept the session.
        loop {
            match ws_rx.next().await {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(msg) = serde_json::from_str::<ServerMessage>(&text) {
                        if msg.setup_complete.is_some() {
                            break;
                        }
                    }
                    log::debug!("Ignoring pre-setup message");
                }
                Some(Ok(Message::Close(frame))) => {
                    return Err(Error::Connection(format!(
                        "remote rejected session: {:?}",
                        frame
                    )));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => {
                    return Err(Error::Connection(
                        "connection closed during setup".to_string(),
                    ));
                }
            }
        }

        // Remote accepted: start streaming microphone frames.
        let (frame_tx, frame_rx) = mpsc::channel::<Vec<i16>>(16);
        let capture = task::spawn_blocking(move || CaptureStream::start(capture_device, frame_tx))
            .await
            .map_err(|e| Error::Audio(format!("capture task failed: {}", e)))??;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        {
            let mut inner = self.inner.lock().unwrap();
            inner.capture = Some(capture);
            inner.scheduler = Some(scheduler);
            inner.shutdown_tx = Some(shutdown_tx);
            inner.set_state(SessionState::Active);
        }

        let loop_task = tokio::spawn(run_session_loop(
            ws_tx,
            ws_rx,
            frame_rx,
            self.router(),
            shutdown_rx,
        ));
        self.inner.lock().unwrap().loop_task = Some(loop_task);

        log::info!("Voice session {} active", session_id);
        let _ = self.events_tx.send(SessionEvent::Connected).await;
        Ok(())
    }

    /// Any state → Idle. Stops capture, tears down playback, closes the
    /// socket if open, and clears the transcript. Idempotent.
    pub async fn cleanup(&self) {
        let (capture, scheduler, shutdown_tx, loop_task) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.state != SessionState::Idle {
                inner.set_state(SessionState::Closing);
            }
            (
                inner.capture.take(),
                inner.scheduler.take(),
                inner.shutdown_tx.take(),
                inner.loop_task.take(),
            )
        };

        let had_resources = capture.is_some()
            || scheduler.is_some()
            || shutdown_tx.is_some()
            || loop_task.is_some();

        // Device teardown joins OS threads; keep it off the async runtime.
        if capture.is_some() || scheduler.is_some() {
            let _ = task::spawn_blocking(move || {
                if let Some(mut c) = capture {
                    c.stop();
                }
                if let Some(mut s) = scheduler {
                    s.teardown();
                }
            })
            .await;
        }

        if let Some(tx) = shutdown_tx {
            let _ = tx.send(());
        }
        if let Some(t) = loop_task {
            let _ = t.await;
        }

        let was_idle = {
            let mut inner = self.inner.lock().unwrap();
            let was_idle = inner.state == SessionState::Idle;
            inner.transcript.clear();
            inner.set_state(SessionState::Idle);
            was_idle
        };

        if !was_idle || had_resources {
            let _ = self.events_tx.send(SessionEvent::Closed).await;
        }
    }

    fn router(&self) -> EventRouter {
        EventRouter {
            inner: self.inner.clone(),
            dispatcher: self.dispatcher.clone(),
            events_tx: self.events_tx.clone(),
        }
    }
}

/// Routes inbound server events to the scheduler, transcript, dispatcher,
/// and host notification channel. Shared between the event loop and the
/// session's teardown paths through `Inner`.
struct EventRouter {
    inner: Arc<Mutex<Inner>>,
    dispatcher: Arc<CommandDispatcher>,
    events_tx: mpsc::Sender<SessionEvent>,
}

impl EventRouter {
    /// Handle one inbound text frame; returns the replies (tool acks) that
    /// must go back out, in order.
    async fn route_text(&self, text: &str) -> Vec<String> {
        let msg: ServerMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(_) => {
                log::debug!("Ignoring unrecognized server payload");
                return Vec::new();
            }
        };

        let mut replies = Vec::new();

        if let Some(tool_call) = msg.tool_call {
            for call in tool_call.function_calls {
                log::info!("Tool invocation '{}' (id: {})", call.name, call.id);
                self.dispatcher.dispatch(&call.name, &call.args);
                // The ack goes out regardless of the dispatch outcome.
                match serde_json::to_string(&protocol::tool_ack(&call.id, &call.name)) {
                    Ok(ack) => replies.push(ack),
                    Err(e) => log::error!("Failed to encode tool ack: {}", e),
                }
            }
        }

        if let Some(content) = msg.server_content {
            // Interruption outranks any audio carried in the same frame.
            if content.interrupted {
                log::info!("Remote interrupted playback");
                if let Some(scheduler) = self.inner.lock().unwrap().scheduler.as_ref() {
                    scheduler.interrupt();
                }
            }

            if let Some(fragment) = content.input_transcription.and_then(|t| t.text) {
                let snapshot = {
                    let mut inner = self.inner.lock().unwrap();
                    inner.transcript.append(&fragment);
                    inner.transcript.snapshot().to_string()
                };
                let _ = self
                    .events_tx
                    .send(SessionEvent::Transcript(snapshot))
                    .await;
            }

            if let Some(turn) = content.model_turn {
                for part in turn.parts {
                    if let Some(inline) = part.inline_data {
                        self.schedule_audio(&inline.data);
                    }
                }
            }

            if content.turn_complete {
                self.inner.lock().unwrap().transcript.clear();
                let _ = self.events_tx.send(SessionEvent::TurnComplete).await;
            }
        }

        replies
    }

    /// Decode one audio fragment and schedule it. A malformed payload drops
    /// only that fragment; the session stays active.
    fn schedule_audio(&self, data: &str) {
        let buffer = match codec::decode(data)
            .and_then(|bytes| codec::to_pcm_buffer(&bytes, playback::SAMPLE_RATE, 1))
        {
            Ok(b) => b,
            Err(e) => {
                log::warn!("Dropping malformed audio fragment: {}", e);
                return;
            }
        };
        let samples = buffer.channels.into_iter().next().unwrap_or_default();
        if samples.is_empty() {
            return;
        }
        if let Some(scheduler) = self.inner.lock().unwrap().scheduler.as_ref() {
            scheduler.schedule(PlaybackSegment {
                samples,
                sample_rate: playback::SAMPLE_RATE,
            });
        }
    }

    /// Fatal-path teardown run by the event loop itself (remote error or
    /// close). Leaves `loop_task` in place for a later `cleanup()` to reap.
    async fn teardown_after_failure(&self) {
        let (capture, scheduler) = {
            let mut inner = self.inner.lock().unwrap();
            inner.set_state(SessionState::Closing);
            (inner.capture.take(), inner.scheduler.take())
        };

        let _ = task::spawn_blocking(move || {
            if let Some(mut c) = capture {
                c.stop();
            }
            if let Some(mut s) = scheduler {
                s.teardown();
            }
        })
        .await;

        {
            let mut inner = self.inner.lock().unwrap();
            inner.transcript.clear();
            inner.set_state(SessionState::Idle);
        }
        let _ = self.events_tx.send(SessionEvent::Closed).await;
    }
}

async fn send_all(ws_tx: &mut WsSink, replies: Vec<String>) -> Result<()> {
    for reply in replies {
        ws_tx.send(Message::Text(reply.into())).await?;
    }
    Ok(())
}

async fn run_session_loop(
    mut ws_tx: WsSink,
    mut ws_rx: WsSource,
    mut frame_rx: mpsc::Receiver<Vec<i16>>,
    router: EventRouter,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let fatal = loop {
        tokio::select! {
            // Host-driven shutdown: cleanup() already owns device teardown,
            // the loop only has to close the socket.
            _ = &mut shutdown_rx => {
                let _ = ws_tx.close().await;
                break false;
            }

            maybe = ws_rx.next() => match maybe {
                Some(Ok(Message::Text(text))) => {
                    let replies = router.route_text(&text).await;
                    if let Err(e) = send_all(&mut ws_tx, replies).await {
                        log::error!("Failed to send on session socket: {}", e);
                        break true;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    log::info!("Remote closed the session: {:?}", frame);
                    break true;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    log::error!("Session socket error: {}", e);
                    break true;
                }
                None => {
                    log::info!("Session socket closed");
                    break true;
                }
            },

            Some(frame) = frame_rx.recv() => {
                let chunk = protocol::realtime_audio_chunk(codec::encode(&frame));
                let text = match serde_json::to_string(&chunk) {
                    Ok(t) => t,
                    Err(e) => {
                        log::error!("Failed to encode audio chunk: {}", e);
                        continue;
                    }
                };
                if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                    log::error!("Failed to send audio frame: {}", e);
                    break true;
                }
            }
        }
    };

    // Unblock the capture thread before joining it.
    drop(frame_rx);

    if fatal {
        router.teardown_after_failure().await;
    }
}
