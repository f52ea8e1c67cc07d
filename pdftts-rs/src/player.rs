//! Phrase audio playback through rodio.
//!
//! One phrase plays at a time. Each `play` carries a ticket; a blocking
//! watcher polls the sink and reports `Finished(ticket)` when it drains.
//! Stopping or replacing the sink ends the watcher without an event.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rodio::{Decoder, OutputStream, OutputStreamBuilder, Sink};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{ReaderError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    Finished(u64),
}

struct Active {
    ticket: u64,
    sink: Sink,
}

pub struct Player {
    // In rodio 0.21 the stream is the handle; dropping it silences everything.
    stream: OutputStream,
    active: Arc<Mutex<Option<Active>>>,
    volume: f32,
    events: mpsc::UnboundedSender<PlaybackEvent>,
}

impl Player {
    pub fn new(volume: f32, events: mpsc::UnboundedSender<PlaybackEvent>) -> Result<Self> {
        let mut stream = OutputStreamBuilder::open_default_stream()
            .map_err(|e| ReaderError::Audio(format!("failed to open audio output: {e}")))?;
        stream.log_on_drop(false);
        info!("Audio output ready (volume {volume:.2})");

        Ok(Self {
            stream,
            active: Arc::new(Mutex::new(None)),
            volume: volume.clamp(0.0, 2.0),
            events,
        })
    }

    /// Start playing `path`, replacing whatever is playing.
    pub fn play(&self, ticket: u64, path: &Path) -> Result<()> {
        let source = open_source(path)?;

        let sink = Sink::connect_new(self.stream.mixer());
        sink.set_volume(self.volume);
        sink.append(source);

        if let Some(previous) = self.lock().replace(Active { ticket, sink }) {
            previous.sink.stop();
        }
        debug!("Playing {} (ticket {ticket})", path.display());

        let active = Arc::clone(&self.active);
        let events = self.events.clone();
        tokio::task::spawn_blocking(move || watch(active, ticket, events));
        Ok(())
    }

    pub fn pause(&self) {
        if let Some(active) = self.lock().as_ref() {
            active.sink.pause();
        }
    }

    pub fn resume(&self) {
        if let Some(active) = self.lock().as_ref() {
            active.sink.play();
        }
    }

    pub fn stop(&self) {
        if let Some(active) = self.lock().take() {
            active.sink.stop();
            debug!("Stopped ticket {}", active.ticket);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Active>> {
        lock_active(&self.active)
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock_active(active: &Mutex<Option<Active>>) -> std::sync::MutexGuard<'_, Option<Active>> {
    // A panicking watcher leaves nothing half-written behind the lock.
    active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Poll until the sink for `ticket` drains or is replaced.
fn watch(active: Arc<Mutex<Option<Active>>>, ticket: u64, events: mpsc::UnboundedSender<PlaybackEvent>) {
    loop {
        {
            let mut guard = lock_active(&active);
            match guard.as_ref() {
                Some(a) if a.ticket == ticket => {
                    if a.sink.empty() {
                        guard.take();
                        drop(guard);
                        let _ = events.send(PlaybackEvent::Finished(ticket));
                        return;
                    }
                }
                _ => return,
            }
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn open_source(path: &Path) -> Result<Decoder<BufReader<File>>> {
    let file = File::open(path)?;
    Decoder::new(BufReader::new(file)).map_err(|e| {
        warn!("Cannot decode {}: {e}", path.display());
        ReaderError::Audio(format!("cannot decode {}: {e}", path.display()))
    })
}
