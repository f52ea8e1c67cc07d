//! Interactive reading loop.
//!
//! One task owns the session, the player and the screen. Page preparation,
//! next-page preload and voice listing run as spawned tasks that report back
//! over channels; stale reports are filtered by generation or page number.

use std::path::Path;
use std::sync::Arc;

use crossterm::event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{ReaderError, Result};
use crate::keys::{Command, Keymap};
use crate::language;
use crate::notifier::Notifier;
use crate::pipeline::{self, PageEvent, PipelineContext, PreloadEvent};
use crate::player::{PlaybackEvent, Player};
use crate::positions::{PositionStore, SavedPosition};
use crate::screen::{Screen, View};
use crate::session::{Action, PlayState, Session};
use crate::speech::{multilingual_voices, Rate, VoiceSettings};

const RATE_STEP: i32 = 5;

type VoiceList = std::result::Result<Vec<String>, String>;

/// What the command line asked for, on top of config and saved state.
#[derive(Debug, Clone, Default)]
pub struct ReaderOptions {
    /// 1-based page to start at.
    pub page: Option<usize>,
    pub voice: Option<String>,
    pub rate: Option<Rate>,
}

struct PreloadJob {
    id: u64,
    page: usize,
    cancel: CancellationToken,
}

struct Receivers {
    pages: mpsc::UnboundedReceiver<PageEvent>,
    preloads: mpsc::UnboundedReceiver<PreloadEvent>,
    playback: mpsc::UnboundedReceiver<PlaybackEvent>,
    voices: mpsc::UnboundedReceiver<VoiceList>,
}

pub struct Reader {
    config: Config,
    title: String,
    doc_key: String,
    ctx: Arc<PipelineContext>,
    session: Session,
    player: Player,
    positions: PositionStore,
    keymap: Keymap,
    notifier: Notifier,

    voice: VoiceSettings,
    // Voice and rate are saved with the position only once chosen explicitly.
    voice_chosen: bool,
    rate_chosen: bool,
    voices: Option<Vec<String>>,
    voices_pending: bool,

    start: (usize, usize),
    language: Option<&'static str>,
    prompt: Option<String>,
    status: String,
    help: String,
    quit: bool,

    page_tx: mpsc::UnboundedSender<PageEvent>,
    preload_tx: mpsc::UnboundedSender<PreloadEvent>,
    voices_tx: mpsc::UnboundedSender<VoiceList>,
    page_job: Option<CancellationToken>,
    preload_job: Option<PreloadJob>,
    preload_runs: u64,
    receivers: Option<Receivers>,
}

impl Reader {
    pub fn new(
        config: Config,
        path: &Path,
        doc_key: String,
        ctx: Arc<PipelineContext>,
        positions: PositionStore,
        options: ReaderOptions,
    ) -> Result<Self> {
        let page_count = ctx.source.page_count();
        let saved = positions.get(&doc_key).cloned();
        let start = resolve_start(saved.as_ref(), options.page, page_count)?;

        let saved_voice = saved.as_ref().and_then(|s| s.voice.clone());
        let saved_rate = saved
            .as_ref()
            .and_then(|s| s.rate.as_deref())
            .and_then(|r| r.parse::<Rate>().ok());
        let config_rate: Rate = config.speech.rate.parse()?;

        let voice_chosen = options.voice.is_some() || saved_voice.is_some();
        let rate_chosen = options.rate.is_some() || saved_rate.is_some();
        let mut voice = VoiceSettings {
            voice: options
                .voice
                .or(saved_voice)
                .unwrap_or_else(|| config.speech.voice.clone()),
            rate: options.rate.or(saved_rate).unwrap_or(config_rate),
            by_language: config.speech.voices_by_language.clone(),
        };
        if voice_chosen {
            voice.by_language.clear();
        }

        let (page_tx, pages) = mpsc::unbounded_channel();
        let (preload_tx, preloads) = mpsc::unbounded_channel();
        let (playback_tx, playback) = mpsc::unbounded_channel();
        let (voices_tx, voices) = mpsc::unbounded_channel();

        let player = Player::new(config.playback.volume, playback_tx)?;
        let keymap = Keymap::new(&config.keys);
        let help = keymap
            .help()
            .iter()
            .map(|(command, key)| format!("{key} {}", command.label()))
            .collect::<Vec<_>>()
            .join("  ");
        let title = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Ok(Self {
            session: Session::new(page_count, config.reader.preload_threshold),
            notifier: Notifier::new(config.feedback.notifications),
            config,
            title,
            doc_key,
            ctx,
            player,
            positions,
            keymap,
            voice,
            voice_chosen,
            rate_chosen,
            voices: None,
            voices_pending: false,
            start,
            language: None,
            prompt: None,
            status: String::new(),
            help,
            quit: false,
            page_tx,
            preload_tx,
            voices_tx,
            page_job: None,
            preload_job: None,
            preload_runs: 0,
            receivers: Some(Receivers {
                pages,
                preloads,
                playback,
                voices,
            }),
        })
    }

    /// Read until the user quits. The position is saved however the loop ends.
    pub async fn run(&mut self) -> Result<()> {
        let result = self.event_loop().await;
        self.shutdown();
        result
    }

    async fn event_loop(&mut self) -> Result<()> {
        let Some(mut rx) = self.receivers.take() else {
            return Err(ReaderError::Terminal("reader already ran".into()));
        };
        let mut screen = Screen::enter()?;
        let mut terminal = EventStream::new();

        let (page, phrase) = self.start;
        info!(
            "Reading {} from page {} phrase {} with {} ({})",
            self.title,
            page + 1,
            phrase + 1,
            self.voice.voice,
            self.voice.rate
        );
        let actions = self.session.open(page, phrase, self.config.reader.autoplay);
        self.execute(actions);
        self.draw(&mut screen)?;

        while !self.quit {
            tokio::select! {
                event = terminal.next() => match event {
                    Some(Ok(Event::Key(key))) => self.on_key(key),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(ReaderError::Terminal(e.to_string())),
                    None => {
                        warn!("Terminal event stream closed");
                        break;
                    }
                },
                Some(event) = rx.pages.recv() => self.on_page_event(event),
                Some(event) = rx.preloads.recv() => self.on_preload_event(event),
                Some(event) = rx.playback.recv() => {
                    let PlaybackEvent::Finished(ticket) = event;
                    let actions = self.session.on_playback_finished(ticket);
                    self.execute(actions);
                }
                Some(result) = rx.voices.recv() => self.on_voices(result),
            }
            self.draw(&mut screen)?;
        }
        Ok(())
    }

    fn on_key(&mut self, key: KeyEvent) {
        if key.kind == KeyEventKind::Release {
            return;
        }
        if self.prompt.is_some() {
            self.on_prompt_key(key);
            return;
        }
        let Some(command) = self.keymap.lookup(&key) else {
            return;
        };
        debug!("Command: {command:?}");

        let actions = match command {
            Command::PlayPause => self.session.toggle_play(),
            Command::NextPage => self.session.next_page(),
            Command::PrevPage => self.session.prev_page(),
            Command::NextPhrase => self.session.next_phrase(),
            Command::PrevPhrase => self.session.prev_phrase(),
            Command::GoToPage => {
                self.prompt = Some(String::new());
                Vec::new()
            }
            Command::NextVoice => {
                self.next_voice();
                Vec::new()
            }
            Command::Faster => {
                self.change_rate(RATE_STEP);
                Vec::new()
            }
            Command::Slower => {
                self.change_rate(-RATE_STEP);
                Vec::new()
            }
            Command::Quit => {
                self.quit = true;
                Vec::new()
            }
        };
        self.execute(actions);
    }

    fn on_prompt_key(&mut self, key: KeyEvent) {
        let Some(prompt) = self.prompt.as_mut() else {
            return;
        };
        match key.code {
            KeyCode::Char(c) if c.is_ascii_digit() && prompt.len() < 9 => prompt.push(c),
            KeyCode::Backspace => {
                prompt.pop();
            }
            KeyCode::Esc => self.prompt = None,
            KeyCode::Enter => {
                let input = self.prompt.take().unwrap_or_default();
                let Ok(number) = input.parse::<usize>() else {
                    self.status = "Enter a page number".into();
                    return;
                };
                match self.session.go_to_page(number) {
                    Ok(actions) => self.execute(actions),
                    Err(e) => self.status = format!("Cannot go to page: {e}"),
                }
            }
            _ => {}
        }
    }

    fn on_page_event(&mut self, event: PageEvent) {
        let current = self.session.generation();
        let actions = match event {
            PageEvent::Segmented {
                generation,
                total,
                language: lang,
            } => {
                if generation == current {
                    self.language = lang.map(language::iso_639_1);
                }
                self.session.on_segmented(generation, total)
            }
            PageEvent::PhraseReady { generation, phrase } => {
                self.session.on_phrase_ready(generation, phrase)
            }
            PageEvent::PhraseFailed {
                generation,
                index,
                error,
            } => {
                if generation == current {
                    self.status = format!("Skipped phrase {}: {error}", index + 1);
                }
                Vec::new()
            }
            PageEvent::Failed { generation, error } => {
                if generation == current {
                    let page = self.session.page() + 1;
                    self.status = format!("Page {page} failed: {error}");
                    self.notifier.page_failed(page, &error);
                    self.page_job = None;
                }
                self.session.on_page_failed(generation)
            }
            PageEvent::Done { generation } => {
                if generation == current {
                    self.page_job = None;
                }
                self.session.on_page_done(generation)
            }
        };
        self.execute(actions);
    }

    fn on_preload_event(&mut self, event: PreloadEvent) {
        if !finish_preload(&mut self.preload_job, &event) {
            debug!("Ignoring report from superseded preload run {}", event.job());
            return;
        }
        match event {
            PreloadEvent::Ready { page, phrases, .. } => {
                info!("Page {} preloaded ({phrases} phrases)", page + 1);
            }
            PreloadEvent::Failed { page, error, .. } => {
                warn!("Preloading page {} failed: {error}", page + 1);
            }
            PreloadEvent::Cancelled { page, .. } => {
                debug!("Preload of page {} stopped", page + 1);
            }
        }
    }

    fn execute(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::PreparePage { page, generation } => self.start_page_job(page, generation),
                Action::Preload { page } => self.start_preload(page),
                Action::Play { ticket, audio } => {
                    if let Err(e) = self.player.play(ticket, &audio) {
                        warn!("Playback failed: {e}");
                        self.status = format!("Playback failed: {e}");
                        self.session.on_playback_error();
                    }
                }
                Action::Pause => self.player.pause(),
                Action::Resume => self.player.resume(),
                Action::StopAudio => self.player.stop(),
                Action::SavePosition => self.save_position(),
                Action::EndOfDocument => {
                    self.status = "End of document".into();
                    self.notifier.finished(&self.title);
                }
            }
        }
    }

    fn start_page_job(&mut self, page: usize, generation: u64) {
        if let Some(job) = self.page_job.take() {
            job.cancel();
        }
        if self
            .preload_job
            .as_ref()
            .is_some_and(|job| job.page != page + 1 && job.page != page)
        {
            self.cancel_preload();
        }
        self.language = None;

        let cancel = CancellationToken::new();
        self.page_job = Some(cancel.clone());
        tokio::spawn(pipeline::prepare_page(
            Arc::clone(&self.ctx),
            page,
            generation,
            self.voice.clone(),
            self.page_tx.clone(),
            cancel,
        ));
    }

    fn start_preload(&mut self, page: usize) {
        if self.preload_job.as_ref().is_some_and(|job| job.page == page) {
            return;
        }
        self.cancel_preload();

        self.preload_runs += 1;
        let id = self.preload_runs;
        debug!("Preloading page {} (run {id})", page + 1);
        let cancel = CancellationToken::new();
        self.preload_job = Some(PreloadJob {
            id,
            page,
            cancel: cancel.clone(),
        });
        let ctx = Arc::clone(&self.ctx);
        let voice = self.voice.clone();
        let tx = self.preload_tx.clone();
        tokio::spawn(async move {
            let event = pipeline::preload_page(ctx, id, page, voice, cancel).await;
            let _ = tx.send(event);
        });
    }

    fn cancel_preload(&mut self) {
        if let Some(job) = self.preload_job.take() {
            job.cancel.cancel();
        }
    }

    fn next_voice(&mut self) {
        let next = self.voices.as_deref().map(|v| next_in(v, &self.voice.voice));
        match next {
            Some(Some(voice)) => self.set_voice(voice),
            Some(None) => self.status = "No voices available".into(),
            None if self.voices_pending => {}
            None => {
                self.voices_pending = true;
                self.status = "Loading voices...".into();
                let synth = Arc::clone(&self.ctx.synth);
                let tx = self.voices_tx.clone();
                tokio::spawn(async move {
                    let result = synth.list_voices().await.map_err(|e| e.to_string());
                    let _ = tx.send(result);
                });
            }
        }
    }

    fn on_voices(&mut self, result: VoiceList) {
        self.voices_pending = false;
        match result {
            Ok(all) => {
                let multilingual = multilingual_voices(all.clone());
                let voices = if multilingual.is_empty() { all } else { multilingual };
                info!("{} voices available", voices.len());
                self.voices = Some(voices);
                self.status.clear();
                self.next_voice();
            }
            Err(e) => {
                warn!("Listing voices failed: {e}");
                self.status = format!("Cannot list voices: {e}");
            }
        }
    }

    fn set_voice(&mut self, voice: String) {
        info!("Voice: {} → {voice}", self.voice.voice);
        self.voice.voice = voice;
        self.voice.by_language.clear();
        self.voice_chosen = true;
        self.status = format!("Voice {}", self.voice.voice);
        self.settings_changed();
    }

    fn change_rate(&mut self, delta: i32) {
        let rate = self.voice.rate.adjusted(delta);
        if rate == self.voice.rate {
            return;
        }
        info!("Rate: {} → {rate}", self.voice.rate);
        self.voice.rate = rate;
        self.rate_chosen = true;
        self.status = format!("Rate {rate}");
        self.settings_changed();
    }

    /// Voice or rate changed: drop preloaded work and re-prepare the page.
    fn settings_changed(&mut self) {
        self.cancel_preload();
        let actions = self.session.reload();
        self.execute(actions);
    }

    fn save_position(&mut self) {
        let voice = self.voice_chosen.then(|| self.voice.voice.clone());
        let rate = self.rate_chosen.then(|| self.voice.rate.to_string());
        match store_position(
            &mut self.positions,
            &self.doc_key,
            self.session.position(),
            voice,
            rate,
        ) {
            Ok(true) => {}
            Ok(false) => debug!("Session not opened, position left untouched"),
            Err(e) => {
                warn!("Failed to save position: {e}");
                self.status = format!("Cannot save position: {e}");
            }
        }
    }

    fn draw(&self, screen: &mut Screen) -> Result<()> {
        let waiting = self.session.state() == PlayState::Waiting;
        let text = self
            .session
            .current_text()
            .or(waiting.then_some("…"));
        screen.draw(&View {
            title: &self.title,
            page: self.session.page(),
            page_count: self.session.page_count(),
            phrase: self.session.phrase(),
            total: self.session.total(),
            ready: self.session.ready(),
            page_done: self.session.page_done(),
            state: self.session.state(),
            voice: &self.voice.voice,
            rate: self.voice.rate.to_string(),
            language: self.language,
            text,
            prompt: self.prompt.as_deref(),
            status: &self.status,
            help: &self.help,
        })
    }

    fn shutdown(&mut self) {
        info!("Shutting down at page {} phrase {}", self.session.page() + 1, self.session.phrase() + 1);
        if let Some(job) = self.page_job.take() {
            job.cancel();
        }
        self.cancel_preload();
        self.player.stop();
        self.save_position();
        if !self.config.reader.keep_cache {
            self.ctx.cache.clear();
        }
    }
}

/// Starting (page, phrase), both 0-based. An explicit page starts at its
/// first phrase; otherwise the saved position is resumed.
fn resolve_start(
    saved: Option<&SavedPosition>,
    requested: Option<usize>,
    page_count: usize,
) -> Result<(usize, usize)> {
    if let Some(number) = requested {
        if number == 0 || number > page_count {
            return Err(ReaderError::PageOutOfRange {
                page: number,
                count: page_count,
            });
        }
        return Ok((number - 1, 0));
    }
    match saved {
        Some(s) if s.page < page_count => Ok((s.page, s.phrase)),
        Some(s) => {
            warn!("Saved page {} beyond document ({page_count} pages), starting over", s.page + 1);
            Ok((0, 0))
        }
        None => Ok((0, 0)),
    }
}

/// Clear the running preload when `event` reports on it. Reports from runs
/// that were cancelled and replaced return false.
fn finish_preload(current: &mut Option<PreloadJob>, event: &PreloadEvent) -> bool {
    if current.as_ref().is_some_and(|job| job.id == event.job()) {
        *current = None;
        true
    } else {
        false
    }
}

/// Record and write `position`. A session that never opened (e.g. the
/// terminal was unusable) has no position; the saved entry is kept and
/// `Ok(false)` returned.
fn store_position(
    positions: &mut PositionStore,
    key: &str,
    position: Option<(usize, usize)>,
    voice: Option<String>,
    rate: Option<String>,
) -> Result<bool> {
    let Some((page, phrase)) = position else {
        return Ok(false);
    };
    positions.record(key, page, phrase);
    positions.set_voice(key, voice, rate);
    positions.save()?;
    Ok(true)
}

/// The voice after `current`, wrapping around.
fn next_in(voices: &[String], current: &str) -> Option<String> {
    if voices.is_empty() {
        return None;
    }
    let next = match voices.iter().position(|v| v == current) {
        Some(i) => (i + 1) % voices.len(),
        None => 0,
    };
    Some(voices[next].clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn saved(page: usize, phrase: usize) -> SavedPosition {
        SavedPosition {
            page,
            phrase,
            voice: None,
            rate: None,
            updated_at: String::new(),
        }
    }

    #[test]
    fn start_resumes_saved_position() {
        assert_eq!(resolve_start(Some(&saved(3, 8)), None, 10).unwrap(), (3, 8));
        assert_eq!(resolve_start(None, None, 10).unwrap(), (0, 0));
    }

    #[test]
    fn start_page_overrides_saved() {
        assert_eq!(resolve_start(Some(&saved(3, 8)), Some(5), 10).unwrap(), (4, 0));
    }

    #[test]
    fn start_page_out_of_range() {
        assert!(matches!(
            resolve_start(None, Some(11), 10),
            Err(ReaderError::PageOutOfRange { page: 11, count: 10 })
        ));
        assert!(resolve_start(None, Some(0), 10).is_err());
    }

    #[test]
    fn saved_page_beyond_document_starts_over() {
        assert_eq!(resolve_start(Some(&saved(40, 2)), None, 10).unwrap(), (0, 0));
    }

    #[test]
    fn unopened_session_keeps_saved_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut store = PositionStore::load(&path);
        store.record("/docs/a.pdf", 3, 8);
        store.save().unwrap();

        let mut session = Session::new(10, 3);
        let mut store = PositionStore::load(&path);
        let stored = store_position(&mut store, "/docs/a.pdf", session.position(), None, None).unwrap();
        assert!(!stored);
        let kept = PositionStore::load(&path);
        let entry = kept.get("/docs/a.pdf").unwrap();
        assert_eq!((entry.page, entry.phrase), (3, 8));

        session.open(5, 1, false);
        let stored = store_position(
            &mut store,
            "/docs/a.pdf",
            session.position(),
            Some("en-US-AvaMultilingualNeural".into()),
            None,
        )
        .unwrap();
        assert!(stored);
        let updated = PositionStore::load(&path);
        let entry = updated.get("/docs/a.pdf").unwrap();
        assert_eq!((entry.page, entry.phrase), (5, 1));
        assert_eq!(entry.voice.as_deref(), Some("en-US-AvaMultilingualNeural"));
    }

    #[test]
    fn stale_preload_report_keeps_current_run() {
        let mut current = Some(PreloadJob {
            id: 2,
            page: 4,
            cancel: CancellationToken::new(),
        });

        // Run 1 preloaded the same page before a rate change replaced it.
        let stale = PreloadEvent::Cancelled { job: 1, page: 4 };
        assert!(!finish_preload(&mut current, &stale));
        assert_eq!(current.as_ref().map(|job| job.id), Some(2));

        let done = PreloadEvent::Ready { job: 2, page: 4, phrases: 6 };
        assert!(finish_preload(&mut current, &done));
        assert!(current.is_none());
        assert!(!finish_preload(&mut current, &done));
    }

    #[test]
    fn voice_cycle_wraps() {
        let voices: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        assert_eq!(next_in(&voices, "a").as_deref(), Some("b"));
        assert_eq!(next_in(&voices, "c").as_deref(), Some("a"));
        assert_eq!(next_in(&voices, "unknown").as_deref(), Some("a"));
        assert_eq!(next_in(&[], "a"), None);
    }
}
