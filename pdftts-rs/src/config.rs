//! Configuration management for pdftts-rs.
//!
//! Loads config from YAML files in standard locations. Every section has
//! defaults, so a missing or partial file is fine.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Base URL of an OpenAI-compatible speech server.
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub voice: String,
    pub rate: String,
    pub format: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// ISO 639-1 code → voice name.
    pub voices_by_language: HashMap<String, String>,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:5050".into(),
            api_key: String::new(),
            model: "tts-1".into(),
            voice: "en-US-AvaMultilingualNeural".into(),
            rate: "+35%".into(),
            format: "mp3".into(),
            timeout_secs: 30,
            max_retries: 3,
            retry_delay_ms: 1000,
            voices_by_language: HashMap::new(),
        }
    }
}

impl SpeechConfig {
    /// API key from config, falling back to `PDFTTS_API_KEY`.
    pub fn resolved_api_key(&self) -> Option<String> {
        if !self.api_key.is_empty() {
            return Some(self.api_key.clone());
        }
        std::env::var("PDFTTS_API_KEY").ok().filter(|k| !k.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    pub autoplay: bool,
    /// Start preloading the next page this many phrases before the end.
    pub preload_threshold: usize,
    pub strip_headers: bool,
    pub margin_similarity: f64,
    pub max_phrase_chars: usize,
    pub cache_dir: String,
    pub keep_cache: bool,
    pub state_file: String,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            autoplay: false,
            preload_threshold: 3,
            strip_headers: true,
            margin_similarity: 0.8,
            max_phrase_chars: 300,
            cache_dir: String::new(),
            keep_cache: false,
            state_file: String::new(),
        }
    }
}

impl ReaderConfig {
    pub fn cache_path(&self) -> PathBuf {
        if self.cache_dir.is_empty() {
            std::env::temp_dir().join("pdftts")
        } else {
            PathBuf::from(&self.cache_dir)
        }
    }

    pub fn state_path(&self) -> PathBuf {
        if self.state_file.is_empty() {
            config_dir().join("state.json")
        } else {
            PathBuf::from(&self.state_file)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub volume: f32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self { volume: 1.0 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub notifications: bool,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            notifications: true,
        }
    }
}

/// Key combos per command. Each combo is a list of key names, modifiers first.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    pub play_pause: Vec<Vec<String>>,
    pub next_page: Vec<Vec<String>>,
    pub prev_page: Vec<Vec<String>>,
    pub next_phrase: Vec<Vec<String>>,
    pub prev_phrase: Vec<Vec<String>>,
    pub go_to_page: Vec<Vec<String>>,
    pub next_voice: Vec<Vec<String>>,
    pub faster: Vec<Vec<String>>,
    pub slower: Vec<Vec<String>>,
    pub quit: Vec<Vec<String>>,
}

fn combos(list: &[&[&str]]) -> Vec<Vec<String>> {
    list.iter()
        .map(|combo| combo.iter().map(|k| k.to_string()).collect())
        .collect()
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            play_pause: combos(&[&["KEY_SPACE"]]),
            next_page: combos(&[&["KEY_RIGHT"], &["KEY_PAGEDOWN"]]),
            prev_page: combos(&[&["KEY_LEFT"], &["KEY_PAGEUP"]]),
            next_phrase: combos(&[&["KEY_DOWN"]]),
            prev_phrase: combos(&[&["KEY_UP"]]),
            go_to_page: combos(&[&["KEY_G"]]),
            next_voice: combos(&[&["KEY_V"]]),
            faster: combos(&[&["KEY_PLUS"], &["KEY_EQUAL"]]),
            slower: combos(&[&["KEY_MINUS"]]),
            quit: combos(&[&["KEY_Q"], &["KEY_ESC"], &["KEY_LEFTCTRL", "KEY_Q"]]),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub speech: SpeechConfig,
    pub reader: ReaderConfig,
    pub playback: PlaybackConfig,
    pub feedback: FeedbackConfig,
    pub keys: KeysConfig,
}

/// `~/.config/pdftts`, or `./.pdftts` without a home directory.
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".config/pdftts"))
        .unwrap_or_else(|| PathBuf::from(".pdftts"))
}

impl Config {
    /// Load configuration from YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./config.yaml
    /// 2. ~/.config/pdftts/config.yaml
    /// 3. /etc/pdftts/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("config.yaml")),
                Some(config_dir().join("config.yaml")),
                Some(PathBuf::from("/etc/pdftts/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", config_path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", config_path.display());
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, serde_yml::Error> {
        serde_yml::from_str(contents)
    }
}
