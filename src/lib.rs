//! folio_voice_rs - Realtime voice-assistant session engine.
//!
//! Streams microphone audio to a remote realtime endpoint over a websocket,
//! plays the streamed model audio back gaplessly, and routes transcript text
//! and tool invocations to the embedding host application.

pub mod audio;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod session;
pub mod state_machine;
pub mod transcript;

pub use config::Config;
pub use dispatch::{CommandDispatcher, HostCommand, HostHandler, Section};
pub use error::{Error, Result};
pub use session::{SessionEvent, VoiceSession};
pub use state_machine::SessionState;
