//! Speech synthesis: remote TTS client, retries and the on-disk audio cache.
//!
//! Components:
//! - `http`: OpenAI-compatible `/v1/audio/speech` client (reqwest)
//! - `cache`: phrase audio files keyed by voice, rate and text
//! - `rate`: "+35%" style speed adjustments

pub mod cache;
pub mod http;
pub mod rate;

use std::collections::HashMap;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tracing::warn;
use whatlang::Lang;

use crate::error::SpeechError;
use crate::language;

pub use rate::Rate;

/// One phrase to synthesize.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechRequest {
    pub text: String,
    pub voice: String,
    pub rate: Rate,
}

/// A text-to-speech backend returning encoded audio bytes.
pub trait SpeechSynthesizer: Send + Sync {
    fn synthesize<'a>(&'a self, request: &'a SpeechRequest) -> BoxFuture<'a, Result<Vec<u8>, SpeechError>>;

    fn list_voices(&self) -> BoxFuture<'_, Result<Vec<String>, SpeechError>>;
}

/// Voice and rate in effect for a page job.
#[derive(Debug, Clone)]
pub struct VoiceSettings {
    pub voice: String,
    pub rate: Rate,
    pub by_language: HashMap<String, String>,
}

impl VoiceSettings {
    /// Per-language override, else the configured voice.
    pub fn voice_for(&self, lang: Option<Lang>) -> &str {
        lang.and_then(|l| self.by_language.get(language::iso_639_1(l)))
            .map(String::as_str)
            .unwrap_or(&self.voice)
    }

    pub fn request(&self, text: &str, lang: Option<Lang>) -> SpeechRequest {
        SpeechRequest {
            text: text.trim().to_string(),
            voice: self.voice_for(lang).to_string(),
            rate: self.rate,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

/// Call the synthesizer up to `policy.attempts` times, sleeping between tries.
pub async fn synthesize_with_retry(
    synth: &dyn SpeechSynthesizer,
    request: &SpeechRequest,
    policy: RetryPolicy,
) -> Result<Vec<u8>, SpeechError> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match synth.synthesize(request).await {
            Ok(audio) => return Ok(audio),
            Err(e) if attempt < attempts => {
                warn!("Synthesis attempt {attempt}/{attempts} failed: {e}");
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Keep only multilingual voices, sorted, the way the voice picker shows them.
pub fn multilingual_voices(mut voices: Vec<String>) -> Vec<String> {
    voices.retain(|v| v.contains("Multilingual"));
    voices.sort();
    voices
}
