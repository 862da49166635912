use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::signal;

use folio_voice_rs::{Config, HostCommand, HostHandler, SessionEvent, VoiceSession};

/// Host shim for running the engine standalone: commands that a web host
/// would turn into navigation/theme/admin actions are just logged here,
/// with the theme kept as a toggle so the behavior is observable.
struct CliHost {
    dark_theme: Mutex<bool>,
}

#[async_trait]
impl HostHandler for CliHost {
    async fn on_command(&self, command: HostCommand) {
        match command {
            HostCommand::Navigate(section) => {
                log::info!("Host: navigate to '{}'", section.as_str());
            }
            HostCommand::ToggleTheme => {
                let mut dark = self.dark_theme.lock().unwrap();
                *dark = !*dark;
                log::info!("Host: theme is now {}", if *dark { "dark" } else { "light" });
            }
            HostCommand::OpenAdmin => {
                log::info!("Host: open admin panel");
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = Config::new().map_err(anyhow::Error::msg)?;

    let host = Arc::new(CliHost {
        dark_theme: Mutex::new(false),
    });
    let (session, mut events) = VoiceSession::new(config, host);

    session.open().await?;
    log::info!("Voice session started. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                log::info!("Received Ctrl+C, shutting down...");
                break;
            }

            Some(event) = events.recv() => match event {
                SessionEvent::Connected => {
                    log::info!("Session connected");
                }
                SessionEvent::Transcript(text) => {
                    log::info!("You: {}", text);
                }
                SessionEvent::TurnComplete => {
                    log::debug!("Turn complete");
                }
                SessionEvent::Closed => {
                    log::warn!("Session closed");
                    break;
                }
            }
        }
    }

    session.cleanup().await;
    Ok(())
}
