//! pdftts: read PDF documents aloud with page and phrase navigation.

mod config;
mod document;
mod error;
mod keys;
mod language;
mod notifier;
mod pipeline;
mod player;
mod positions;
mod reader;
mod screen;
mod segmenter;
mod session;
mod speech;
mod text;

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::document::PageSource;
use crate::error::ReaderError;
use crate::pipeline::PipelineContext;
use crate::positions::{document_key, PositionStore};
use crate::reader::{Reader, ReaderOptions};
use crate::segmenter::Segmenter;
use crate::speech::cache::AudioCache;
use crate::speech::http::HttpSpeechClient;
use crate::speech::{multilingual_voices, Rate, RetryPolicy, SpeechSynthesizer};

#[derive(Parser, Debug)]
#[command(
    name = "pdftts",
    version,
    about = "Read PDF documents aloud",
    args_conflicts_with_subcommands = true
)]
struct Args {
    /// PDF (or form-feed separated .txt) to read; a file picker opens when omitted
    file: Option<PathBuf>,

    /// Start at this page (1-based) instead of the saved position
    #[arg(short, long)]
    page: Option<usize>,

    /// Voice name, e.g. en-US-AvaMultilingualNeural
    #[arg(long)]
    voice: Option<String>,

    /// Speech rate, e.g. +35% or -10%
    #[arg(short, long, allow_hyphen_values = true)]
    rate: Option<Rate>,

    /// Path to config.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List voices offered by the speech service
    Voices {
        /// Include voices that are not multilingual
        #[arg(long)]
        all: bool,
    },
    /// Show saved reading positions
    Positions,
    /// Forget the saved position of a document
    Forget { file: PathBuf },
}

fn log_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("pdftts")
        .join("pdftts.log")
}

/// Log to a file: the terminal belongs to the reader UI.
fn init_logging(verbose: bool) -> std::io::Result<PathBuf> {
    let path = log_path();
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(&path)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug,hyper=info,reqwest=info,symphonia=warn")
        } else {
            EnvFilter::new("info,hyper=warn,reqwest=warn,symphonia=warn")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(path)
}

#[cfg(feature = "file-dialog")]
fn pick_file() -> Option<PathBuf> {
    rfd::FileDialog::new()
        .set_title("Open a document to read")
        .add_filter("PDF", &["pdf", "PDF"])
        .add_filter("Text", &["txt"])
        .pick_file()
}

#[cfg(not(feature = "file-dialog"))]
fn pick_file() -> Option<PathBuf> {
    tracing::warn!("Built without file-dialog; pass a file on the command line");
    None
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = Args::parse();

    let log = init_logging(args.verbose)?;
    info!("pdftts starting (log: {})", log.display());

    let config = Config::load(args.config.as_deref());

    match args.command.take() {
        Some(Commands::Voices { all }) => list_voices(&config, all).await?,
        Some(Commands::Positions) => list_positions(&config),
        Some(Commands::Forget { file }) => forget(&config, &file)?,
        None => read(args, config).await?,
    }

    Ok(())
}

async fn read(args: Args, config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let path = args.file.or_else(pick_file).ok_or(ReaderError::NoFile)?;

    let source: Arc<dyn PageSource> = Arc::from(
        tokio::task::spawn_blocking({
            let path = path.clone();
            move || document::open_document(&path)
        })
        .await??,
    );

    let synth: Arc<dyn SpeechSynthesizer> = Arc::new(HttpSpeechClient::new(&config.speech)?);
    info!("Speech endpoint: {}", config.speech.endpoint);

    let ctx = Arc::new(PipelineContext {
        source,
        synth,
        cache: AudioCache::new(config.reader.cache_path(), &config.speech.format),
        segmenter: Segmenter::new(config.reader.max_phrase_chars),
        retry: RetryPolicy {
            attempts: config.speech.max_retries,
            delay: std::time::Duration::from_millis(config.speech.retry_delay_ms),
        },
        strip_headers: config.reader.strip_headers,
        margin_similarity: config.reader.margin_similarity,
    });

    let positions = PositionStore::load(&config.reader.state_path());
    let options = ReaderOptions {
        page: args.page,
        voice: args.voice,
        rate: args.rate,
    };

    let mut reader = Reader::new(config, &path, document_key(&path), ctx, positions, options)?;
    reader.run().await?;

    info!("pdftts exiting");
    Ok(())
}

async fn list_voices(config: &Config, all: bool) -> Result<(), Box<dyn std::error::Error>> {
    let client = HttpSpeechClient::new(&config.speech)?;
    let voices = client.list_voices().await?;
    let voices = if all { voices } else { multilingual_voices(voices) };

    for voice in &voices {
        println!("{voice}");
    }
    if voices.is_empty() {
        eprintln!("No voices found (try --all)");
    }
    Ok(())
}

fn list_positions(config: &Config) {
    let store = PositionStore::load(&config.reader.state_path());
    let mut any = false;
    for (doc, pos) in store.entries() {
        any = true;
        println!(
            "{doc}\n    page {} phrase {}  voice {}  rate {}  {}",
            pos.page + 1,
            pos.phrase + 1,
            pos.voice.as_deref().unwrap_or("default"),
            pos.rate.as_deref().unwrap_or("default"),
            pos.updated_at
        );
    }
    if !any {
        println!("No saved positions");
    }
}

fn forget(config: &Config, file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut store = PositionStore::load(&config.reader.state_path());
    let key = document_key(file);
    if store.forget(&key) {
        store.save()?;
        println!("Forgot {key}");
    } else {
        println!("No saved position for {key}");
    }
    Ok(())
}
