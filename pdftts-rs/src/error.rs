//! Error types.

use std::path::PathBuf;

use thiserror::Error;

/// Failures talking to the speech service.
#[derive(Error, Debug)]
pub enum SpeechError {
    #[error("speech request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("speech service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("speech service returned no audio")]
    EmptyAudio,

    #[error("invalid speech rate '{0}' (expected e.g. +35%)")]
    InvalidRate(String),

    #[error("audio cache error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("failed to open PDF {path}: {source}")]
    Pdf {
        path: PathBuf,
        #[source]
        source: lopdf::Error,
    },

    #[error("failed to extract text from page {page}: {source}")]
    Extract {
        page: usize,
        #[source]
        source: lopdf::Error,
    },

    #[error("PDF {0} has no pages")]
    NoPages(PathBuf),

    #[error("page {page} out of range (document has {count} pages)")]
    PageOutOfRange { page: usize, count: usize },

    #[error(transparent)]
    Speech(#[from] SpeechError),

    #[error("audio output unavailable: {0}")]
    Audio(String),

    #[error("terminal error: {0}")]
    Terminal(String),

    #[error("no PDF file selected")]
    NoFile,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ReaderError>;
