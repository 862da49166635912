//! Maps remote tool invocations to host-application actions.
//!
//! The remote model can ask the host to navigate the page, toggle the color
//! theme, or open the admin panel. Dispatch is fire-and-forget: the session
//! event loop never waits on the host, and the acknowledgement back to the
//! remote side is sent regardless of what the host does with the command.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::{Error, Result};

/// Page sections the assistant may navigate to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Home,
    Work,
    Skills,
}

impl Section {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "home" => Some(Section::Home),
            "work" => Some(Section::Work),
            "skills" => Some(Section::Skills),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Section::Home => "home",
            Section::Work => "work",
            Section::Skills => "skills",
        }
    }
}

/// A validated host action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostCommand {
    Navigate(Section),
    ToggleTheme,
    OpenAdmin,
}

/// Implemented by the embedding application; performs the actual
/// navigation/theme/admin behavior.
#[async_trait]
pub trait HostHandler: Send + Sync {
    async fn on_command(&self, command: HostCommand);
}

pub struct CommandDispatcher {
    handler: Arc<dyn HostHandler>,
}

impl CommandDispatcher {
    pub fn new(handler: Arc<dyn HostHandler>) -> Self {
        Self { handler }
    }

    /// Validate a remote invocation.
    ///
    /// `Ok(None)` means the invocation was recognized but is a deliberate
    /// no-op (e.g. `navigateTo` with a section outside the fixed set).
    pub fn resolve(&self, name: &str, args: &Value) -> Result<Option<HostCommand>> {
        match name {
            "navigateTo" => {
                let section = args.get("section").and_then(Value::as_str).unwrap_or("");
                match Section::parse(section) {
                    Some(s) => Ok(Some(HostCommand::Navigate(s))),
                    None => {
                        log::warn!("navigateTo with unknown section '{}', ignoring", section);
                        Ok(None)
                    }
                }
            }
            "toggleTheme" => Ok(Some(HostCommand::ToggleTheme)),
            "openAdmin" => Ok(Some(HostCommand::OpenAdmin)),
            other => Err(Error::Dispatch(format!("unknown command: {}", other))),
        }
    }

    /// Forward an invocation to the host without blocking the caller.
    /// Failures are logged and swallowed; the session acks either way.
    pub fn dispatch(&self, name: &str, args: &Value) {
        match self.resolve(name, args) {
            Ok(Some(command)) => {
                let handler = self.handler.clone();
                tokio::spawn(async move {
                    handler.on_command(command).await;
                });
            }
            Ok(None) => {}
            Err(e) => log::warn!("Tool dispatch failed: {}", e),
        }
    }

    /// Function declarations advertised to the remote model at setup.
    pub fn tool_declarations() -> Vec<Value> {
        vec![
            json!({
                "name": "navigateTo",
                "description": "Scroll the page to one of the main sections.",
                "parameters": {
                    "type": "OBJECT",
                    "properties": {
                        "section": {
                            "type": "STRING",
                            "enum": ["home", "work", "skills"]
                        }
                    },
                    "required": ["section"]
                }
            }),
            json!({
                "name": "toggleTheme",
                "description": "Switch between the light and dark color theme."
            }),
            json!({
                "name": "openAdmin",
                "description": "Open the content admin panel."
            }),
        ]
    }
}
