//! On-disk phrase audio cache.
//!
//! Files are named by SHA-256 of (voice, rate, text) so a voice or rate
//! change never replays stale audio. Writes go through a temp file and a
//! rename; the page job and the preload job may race on the same phrase.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::{synthesize_with_retry, RetryPolicy, SpeechRequest, SpeechSynthesizer};
use crate::error::SpeechError;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
pub struct AudioCache {
    dir: PathBuf,
    extension: String,
}

impl AudioCache {
    pub fn new(dir: PathBuf, extension: &str) -> Self {
        Self {
            dir,
            extension: extension.to_string(),
        }
    }

    pub fn path_for(&self, request: &SpeechRequest) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(request.voice.as_bytes());
        hasher.update([0]);
        hasher.update(request.rate.to_string().as_bytes());
        hasher.update([0]);
        hasher.update(request.text.trim().as_bytes());
        self.dir
            .join(format!("{:x}.{}", hasher.finalize(), self.extension))
    }

    /// Return the cached file for `request`, synthesizing it first on a miss.
    pub async fn get_or_synthesize(
        &self,
        synth: &dyn SpeechSynthesizer,
        request: &SpeechRequest,
        policy: RetryPolicy,
    ) -> Result<PathBuf, SpeechError> {
        let path = self.path_for(request);
        if path.exists() {
            debug!("Cache hit: {}", path.display());
            return Ok(path);
        }

        let audio = synthesize_with_retry(synth, request, policy).await?;
        self.store(&path, &audio)?;
        debug!("Cached {} bytes at {}", audio.len(), path.display());
        Ok(path)
    }

    fn store(&self, path: &Path, audio: &[u8]) -> Result<(), SpeechError> {
        fs::create_dir_all(&self.dir)?;
        let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("{}.{}.part", std::process::id(), n));
        fs::write(&tmp, audio)?;
        if let Err(e) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    /// Delete the whole cache directory.
    pub fn clear(&self) {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => info!("Removed audio cache {}", self.dir.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove audio cache {}: {e}", self.dir.display()),
        }
    }
}
