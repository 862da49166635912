#[derive(Debug, Clone)]
pub struct Config {
    // Remote endpoint, resolved at compile time from config.toml (see build.rs)
    pub ws_url: &'static str,
    pub api_key: String,

    // Session parameters sent in the setup message
    pub model: &'static str,
    pub voice: &'static str,
    pub system_instruction: &'static str,

    // ALSA device names (e.g. "default", "plughw:0,0")
    pub capture_device: &'static str,
    pub playback_device: &'static str,
}

impl Config {
    /// Build the configuration from the compile-time environment variables
    /// emitted by build.rs. The API key may instead be supplied at runtime
    /// via FOLIO_VOICE_API_KEY when config.toml leaves it empty.
    pub fn new() -> Result<Self, &'static str> {
        let api_key = if !env!("API_KEY").is_empty() {
            env!("API_KEY").to_string()
        } else {
            std::env::var("FOLIO_VOICE_API_KEY")
                .map_err(|_| "API key not set in config.toml or FOLIO_VOICE_API_KEY")?
        };

        Ok(Self {
            ws_url: env!("WS_URL"),
            api_key,
            model: env!("MODEL"),
            voice: env!("VOICE_NAME"),
            system_instruction: env!("SYSTEM_INSTRUCTION"),
            capture_device: env!("CAPTURE_DEVICE"),
            playback_device: env!("PLAYBACK_DEVICE"),
        })
    }
}
