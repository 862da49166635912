use std::fs;
use std::path::Path;
use serde::Deserialize;

#[derive(Deserialize)]
struct Config {
    network: Network,
    session: Session,
    audio: Audio,
}

#[derive(Deserialize)]
struct Network {
    ws_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct Session {
    model: String,
    voice: String,
    system_instruction: String,
}

#[derive(Deserialize)]
struct Audio {
    capture_device: String,
    playback_device: String,
}

// Read config.toml at compile time and bake the values in as env vars.
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    println!("cargo:rustc-env=WS_URL={}", config.network.ws_url);
    println!("cargo:rustc-env=API_KEY={}", config.network.api_key);

    println!("cargo:rustc-env=MODEL={}", config.session.model);
    println!("cargo:rustc-env=VOICE_NAME={}", config.session.voice);
    // rustc-env is line-based, so the instruction must be flattened
    println!(
        "cargo:rustc-env=SYSTEM_INSTRUCTION={}",
        config.session.system_instruction.replace('\n', " ").trim()
    );

    println!("cargo:rustc-env=CAPTURE_DEVICE={}", config.audio.capture_device);
    println!("cargo:rustc-env=PLAYBACK_DEVICE={}", config.audio.playback_device);
}
