//! Saved reading positions.
//!
//! One JSON object keyed by the canonical path of each document:
//!
//! ```json
//! { "/home/me/paper.pdf": { "page": 3, "phrase": 12, "voice": "...", "rate": "+35%" } }
//! ```
//!
//! Files written by older versions used `tts_voice`/`tts_rate`; both spellings load.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedPosition {
    pub page: usize,
    #[serde(default)]
    pub phrase: usize,
    #[serde(default, alias = "tts_voice", skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(default, alias = "tts_rate", skip_serializing_if = "Option::is_none")]
    pub rate: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub updated_at: String,
}

/// Key under which a document's position is stored.
pub fn document_key(path: &Path) -> String {
    let path = fs::canonicalize(path).unwrap_or_else(|_| {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(path))
                .unwrap_or_else(|_| path.to_path_buf())
        }
    });
    path.to_string_lossy().into_owned()
}

pub struct PositionStore {
    path: PathBuf,
    entries: BTreeMap<String, SavedPosition>,
}

impl PositionStore {
    /// Load the store. A missing or malformed file yields an empty store.
    pub fn load(path: &Path) -> Self {
        let entries = match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Ignoring malformed state file {}: {e}", path.display());
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!("Failed to read state file {}: {e}", path.display());
                BTreeMap::new()
            }
        };
        debug!("Loaded {} saved positions from {}", entries.len(), path.display());

        Self {
            path: path.to_path_buf(),
            entries,
        }
    }

    pub fn get(&self, key: &str) -> Option<&SavedPosition> {
        self.entries.get(key)
    }

    /// Update the page and phrase for `key`, keeping its voice and rate.
    pub fn record(&mut self, key: &str, page: usize, phrase: usize) {
        let updated_at = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| SavedPosition {
                page,
                phrase,
                voice: None,
                rate: None,
                updated_at: String::new(),
            });
        entry.page = page;
        entry.phrase = phrase;
        entry.updated_at = updated_at;
    }

    pub fn set_voice(&mut self, key: &str, voice: Option<String>, rate: Option<String>) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.voice = voice;
            entry.rate = rate;
        }
    }

    pub fn forget(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &SavedPosition)> {
        self.entries.iter()
    }

    /// Write the whole store atomically.
    pub fn save(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(&self.entries)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        debug!("Saved {} positions to {}", self.entries.len(), self.path.display());
        Ok(())
    }
}
