//! Reading session state machine.
//!
//! STOPPED ⇄ PLAYING ⇄ PAUSED, with WAITING while playback is wanted but
//! the current phrase is not synthesized yet.
//!
//! The session does no I/O. Every operation returns the actions the reader
//! must carry out (start a page job, play a file, save the position...).

use std::path::PathBuf;

use tracing::{debug, info};

use crate::pipeline::PreparedPhrase;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Stopped,
    Playing,
    Paused,
    Waiting,
}

impl std::fmt::Display for PlayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "STOPPED"),
            Self::Playing => write!(f, "PLAYING"),
            Self::Paused => write!(f, "PAUSED"),
            Self::Waiting => write!(f, "WAITING"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Cancel any running page job and prepare `page`.
    PreparePage { page: usize, generation: u64 },
    /// Warm the audio cache for `page`.
    Preload { page: usize },
    Play { ticket: u64, audio: PathBuf },
    Pause,
    Resume,
    StopAudio,
    SavePosition,
    EndOfDocument,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationError {
    PageOutOfRange { page: usize, count: usize },
}

impl std::fmt::Display for NavigationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PageOutOfRange { page, count } => {
                write!(f, "page {page} out of range (1-{count})")
            }
        }
    }
}

pub struct Session {
    page_count: usize,
    page: usize,
    phrase: usize,
    phrases: Vec<PreparedPhrase>,
    total: Option<usize>,
    page_done: bool,
    state: PlayState,
    generation: u64,
    ticket: u64,
    preload_threshold: usize,
    preload_requested: bool,
}

impl Session {
    pub fn new(page_count: usize, preload_threshold: usize) -> Self {
        Self {
            page_count,
            page: 0,
            phrase: 0,
            phrases: Vec::new(),
            total: None,
            page_done: false,
            state: PlayState::Stopped,
            generation: 0,
            ticket: 0,
            preload_threshold,
            preload_requested: false,
        }
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn phrase(&self) -> usize {
        self.phrase
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// (page, phrase) to persist, `None` until the session has been opened.
    pub fn position(&self) -> Option<(usize, usize)> {
        (self.generation > 0).then_some((self.page, self.phrase))
    }

    pub fn state(&self) -> PlayState {
        self.state
    }

    pub fn total(&self) -> Option<usize> {
        self.total
    }

    pub fn ready(&self) -> usize {
        self.phrases.len()
    }

    pub fn page_done(&self) -> bool {
        self.page_done
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn current_text(&self) -> Option<&str> {
        self.current().map(|p| p.text.as_str())
    }

    /// First ready phrase at or after the cursor. Phrases that failed to
    /// synthesize never arrive, so the cursor skips over them.
    fn current(&self) -> Option<&PreparedPhrase> {
        self.phrases.iter().find(|p| p.index >= self.phrase)
    }

    fn wants_playback(&self) -> bool {
        matches!(self.state, PlayState::Playing | PlayState::Waiting)
    }

    /// Open at a saved position (clamped to the document).
    pub fn open(&mut self, page: usize, phrase: usize, autoplay: bool) -> Vec<Action> {
        let page = page.min(self.page_count.saturating_sub(1));
        self.start_page(page, phrase, autoplay)
    }

    /// Restart the current page at the current phrase (voice or rate changed).
    pub fn reload(&mut self) -> Vec<Action> {
        let keep_playing = self.wants_playback();
        self.start_page(self.page, self.phrase, keep_playing)
    }

    fn start_page(&mut self, page: usize, phrase: usize, keep_playing: bool) -> Vec<Action> {
        self.page = page;
        self.phrase = phrase;
        self.phrases.clear();
        self.total = None;
        self.page_done = false;
        self.preload_requested = false;
        self.generation += 1;
        self.ticket += 1;
        self.state = if keep_playing {
            PlayState::Waiting
        } else {
            PlayState::Stopped
        };
        debug!("Page {} (generation {}) state {}", page + 1, self.generation, self.state);

        vec![
            Action::StopAudio,
            Action::PreparePage {
                page,
                generation: self.generation,
            },
            Action::SavePosition,
        ]
    }

    pub fn toggle_play(&mut self) -> Vec<Action> {
        match self.state {
            PlayState::Playing => {
                self.state = PlayState::Paused;
                vec![Action::Pause]
            }
            PlayState::Paused => {
                self.state = PlayState::Playing;
                vec![Action::Resume]
            }
            PlayState::Waiting => {
                self.state = PlayState::Stopped;
                Vec::new()
            }
            PlayState::Stopped => self.play_current(),
        }
    }

    /// Play the phrase under the cursor, wait for it, or move past the page.
    fn play_current(&mut self) -> Vec<Action> {
        if let Some(phrase) = self.current() {
            let (index, audio) = (phrase.index, phrase.audio.clone());
            self.phrase = index;
            self.ticket += 1;
            self.state = PlayState::Playing;
            let mut actions = vec![Action::Play {
                ticket: self.ticket,
                audio,
            }];
            actions.extend(self.maybe_preload());
            return actions;
        }

        if self.page_done {
            return self.advance_page();
        }

        self.state = PlayState::Waiting;
        Vec::new()
    }

    /// Page exhausted while playing: continue on the next page or finish.
    fn advance_page(&mut self) -> Vec<Action> {
        if self.page + 1 < self.page_count {
            info!("Page {} finished, continuing", self.page + 1);
            self.start_page(self.page + 1, 0, true)
        } else {
            info!("End of document");
            self.state = PlayState::Stopped;
            vec![Action::StopAudio, Action::EndOfDocument]
        }
    }

    fn maybe_preload(&mut self) -> Option<Action> {
        let total = self.total?;
        if self.preload_requested || self.page + 1 >= self.page_count {
            return None;
        }
        if self.phrase + self.preload_threshold >= total {
            self.preload_requested = true;
            return Some(Action::Preload {
                page: self.page + 1,
            });
        }
        None
    }

    pub fn next_page(&mut self) -> Vec<Action> {
        if self.page + 1 >= self.page_count {
            return Vec::new();
        }
        let keep_playing = self.wants_playback();
        self.start_page(self.page + 1, 0, keep_playing)
    }

    pub fn prev_page(&mut self) -> Vec<Action> {
        if self.page == 0 {
            return Vec::new();
        }
        let keep_playing = self.wants_playback();
        self.start_page(self.page - 1, 0, keep_playing)
    }

    /// Jump to a 1-based page number.
    pub fn go_to_page(&mut self, number: usize) -> Result<Vec<Action>, NavigationError> {
        if number == 0 || number > self.page_count {
            return Err(NavigationError::PageOutOfRange {
                page: number,
                count: self.page_count,
            });
        }
        let keep_playing = self.wants_playback();
        Ok(self.start_page(number - 1, 0, keep_playing))
    }

    /// Move to the next ready phrase. Does nothing past the last one.
    pub fn next_phrase(&mut self) -> Vec<Action> {
        match self.phrases.iter().find(|p| p.index > self.phrase) {
            Some(next) => {
                self.phrase = next.index;
                self.jump_phrase()
            }
            None => Vec::new(),
        }
    }

    pub fn prev_phrase(&mut self) -> Vec<Action> {
        match self.phrases.iter().rev().find(|p| p.index < self.phrase) {
            Some(prev) => {
                self.phrase = prev.index;
                self.jump_phrase()
            }
            None => Vec::new(),
        }
    }

    fn jump_phrase(&mut self) -> Vec<Action> {
        let mut actions = vec![Action::StopAudio, Action::SavePosition];
        if self.wants_playback() {
            actions.extend(self.play_current());
        } else {
            self.ticket += 1;
            self.state = PlayState::Stopped;
        }
        actions
    }

    pub fn on_segmented(&mut self, generation: u64, total: usize) -> Vec<Action> {
        if generation != self.generation {
            return Vec::new();
        }
        self.total = Some(total);
        if self.phrase >= total && self.phrase > 0 {
            debug!("Saved phrase {} beyond page total {total}, restarting page", self.phrase);
            self.phrase = 0;
            return vec![Action::SavePosition];
        }
        Vec::new()
    }

    pub fn on_phrase_ready(&mut self, generation: u64, phrase: PreparedPhrase) -> Vec<Action> {
        if generation != self.generation {
            return Vec::new();
        }
        let ready = phrase.index >= self.phrase;
        self.phrases.push(phrase);
        if self.state == PlayState::Waiting && ready {
            return self.play_current();
        }
        Vec::new()
    }

    /// Page job finished or gave up; no more phrases will arrive.
    pub fn on_page_done(&mut self, generation: u64) -> Vec<Action> {
        if generation != self.generation {
            return Vec::new();
        }
        self.page_done = true;
        if self.total.is_none() {
            self.total = Some(self.phrases.len());
        }
        if self.state == PlayState::Waiting {
            return self.play_current();
        }
        Vec::new()
    }

    /// Page job failed: stop waiting for audio that will never come.
    pub fn on_page_failed(&mut self, generation: u64) -> Vec<Action> {
        if generation != self.generation {
            return Vec::new();
        }
        self.page_done = true;
        if self.state == PlayState::Waiting && self.current().is_none() {
            self.state = PlayState::Stopped;
        }
        Vec::new()
    }

    pub fn on_playback_finished(&mut self, ticket: u64) -> Vec<Action> {
        if ticket != self.ticket || self.state != PlayState::Playing {
            return Vec::new();
        }
        self.phrase += 1;
        let mut actions = vec![Action::SavePosition];
        actions.extend(self.play_current());
        actions
    }

    /// Playback of the current phrase could not start.
    pub fn on_playback_error(&mut self) {
        self.ticket += 1;
        self.state = PlayState::Stopped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn phrase(index: usize) -> PreparedPhrase {
        PreparedPhrase {
            index,
            text: format!("Phrase {index}."),
            audio: PathBuf::from(format!("/cache/{index}.mp3")),
        }
    }

    /// Session opened on page 0 with `ready` of `total` phrases prepared.
    fn session(pages: usize, total: usize, ready: usize) -> Session {
        let mut s = Session::new(pages, 3);
        s.open(0, 0, false);
        let g = s.generation();
        s.on_segmented(g, total);
        for i in 0..ready {
            s.on_phrase_ready(g, phrase(i));
        }
        s
    }

    fn play_ticket(actions: &[Action]) -> Option<u64> {
        actions.iter().find_map(|a| match a {
            Action::Play { ticket, .. } => Some(*ticket),
            _ => None,
        })
    }

    #[test]
    fn open_prepares_page_and_clamps() {
        let mut s = Session::new(5, 3);
        let actions = s.open(9, 2, false);

        assert_eq!(s.page(), 4);
        assert_eq!(s.phrase(), 2);
        assert_eq!(s.state(), PlayState::Stopped);
        assert_eq!(
            actions,
            vec![
                Action::StopAudio,
                Action::PreparePage { page: 4, generation: 1 },
                Action::SavePosition
            ]
        );
    }

    #[test]
    fn toggle_cycles_play_pause_resume() {
        let mut s = session(3, 4, 2);

        let actions = s.toggle_play();
        assert_eq!(s.state(), PlayState::Playing);
        assert!(matches!(actions[0], Action::Play { ref audio, .. } if audio == &PathBuf::from("/cache/0.mp3")));

        assert_eq!(s.toggle_play(), vec![Action::Pause]);
        assert_eq!(s.state(), PlayState::Paused);

        assert_eq!(s.toggle_play(), vec![Action::Resume]);
        assert_eq!(s.state(), PlayState::Playing);
    }

    #[test]
    fn play_before_audio_waits_then_starts() {
        let mut s = Session::new(2, 3);
        s.open(0, 0, false);
        let g = s.generation();

        assert!(s.toggle_play().is_empty());
        assert_eq!(s.state(), PlayState::Waiting);

        s.on_segmented(g, 2);
        let actions = s.on_phrase_ready(g, phrase(0));
        assert!(play_ticket(&actions).is_some());
        assert_eq!(s.state(), PlayState::Playing);
    }

    #[test]
    fn toggle_while_waiting_cancels() {
        let mut s = Session::new(2, 3);
        s.open(0, 0, true);
        assert_eq!(s.state(), PlayState::Waiting);

        s.toggle_play();
        assert_eq!(s.state(), PlayState::Stopped);
        assert!(s.on_phrase_ready(s.generation(), phrase(0)).is_empty());
    }

    #[test]
    fn finished_phrase_advances_and_saves() {
        let mut s = session(3, 10, 3);
        let ticket = play_ticket(&s.toggle_play()).unwrap();

        let actions = s.on_playback_finished(ticket);
        assert_eq!(s.phrase(), 1);
        assert_eq!(actions[0], Action::SavePosition);
        assert!(play_ticket(&actions).unwrap() > ticket);
    }

    #[test]
    fn stale_playback_events_are_ignored() {
        let mut s = session(3, 10, 3);
        let first = play_ticket(&s.toggle_play()).unwrap();
        s.next_phrase();

        assert!(s.on_playback_finished(first).is_empty());
        assert_eq!(s.phrase(), 1);
    }

    #[test]
    fn stale_page_events_are_ignored() {
        let mut s = session(3, 2, 0);
        let old = s.generation();
        s.next_page();

        assert!(s.on_phrase_ready(old, phrase(0)).is_empty());
        assert_eq!(s.ready(), 0);
        s.on_page_done(old);
        assert!(!s.page_done());
    }

    #[test]
    fn playing_past_last_ready_phrase_waits() {
        let mut s = session(3, 5, 1);
        let ticket = play_ticket(&s.toggle_play()).unwrap();

        let actions = s.on_playback_finished(ticket);
        assert_eq!(actions, vec![Action::SavePosition]);
        assert_eq!(s.state(), PlayState::Waiting);

        let actions = s.on_phrase_ready(s.generation(), phrase(1));
        assert!(play_ticket(&actions).is_some());
    }

    #[test]
    fn end_of_page_moves_to_next_page_while_playing() {
        let mut s = session(3, 1, 1);
        let g = s.generation();
        let ticket = play_ticket(&s.toggle_play()).unwrap();
        s.on_page_done(g);

        let actions = s.on_playback_finished(ticket);
        assert_eq!(s.page(), 1);
        assert_eq!(s.phrase(), 0);
        assert_eq!(s.state(), PlayState::Waiting);
        assert!(actions.contains(&Action::PreparePage { page: 1, generation: g + 1 }));
    }

    #[test]
    fn page_done_while_waiting_advances() {
        let mut s = session(3, 1, 1);
        let g = s.generation();
        let ticket = play_ticket(&s.toggle_play()).unwrap();

        // Finished before the job reported completion.
        s.on_playback_finished(ticket);
        assert_eq!(s.state(), PlayState::Waiting);

        let actions = s.on_page_done(g);
        assert_eq!(s.page(), 1);
        assert!(actions.iter().any(|a| matches!(a, Action::PreparePage { page: 1, .. })));
    }

    #[test]
    fn empty_page_is_skipped_while_playing() {
        let mut s = Session::new(3, 3);
        s.open(0, 0, true);
        let g = s.generation();
        s.on_segmented(g, 0);

        let actions = s.on_page_done(g);
        assert_eq!(s.page(), 1);
        assert!(actions.iter().any(|a| matches!(a, Action::PreparePage { page: 1, .. })));
    }

    #[test]
    fn last_page_ends_document() {
        let mut s = session(1, 1, 1);
        let g = s.generation();
        let ticket = play_ticket(&s.toggle_play()).unwrap();
        s.on_page_done(g);

        let actions = s.on_playback_finished(ticket);
        assert!(actions.contains(&Action::EndOfDocument));
        assert_eq!(s.state(), PlayState::Stopped);
        assert_eq!(s.page(), 0);
    }

    #[test]
    fn page_navigation_bounds() {
        let mut s = session(2, 3, 3);

        assert!(s.prev_page().is_empty());
        assert!(!s.next_page().is_empty());
        assert_eq!(s.page(), 1);
        assert!(s.next_page().is_empty());
        assert!(!s.prev_page().is_empty());
        assert_eq!(s.page(), 0);
    }

    #[test]
    fn page_change_keeps_playing_intent() {
        let mut s = session(3, 3, 3);
        s.toggle_play();
        s.next_page();
        assert_eq!(s.state(), PlayState::Waiting);

        let mut s = session(3, 3, 3);
        s.toggle_play();
        s.toggle_play();
        s.next_page();
        assert_eq!(s.state(), PlayState::Stopped);
    }

    #[test]
    fn go_to_page_validates_range() {
        let mut s = session(5, 3, 3);

        assert_eq!(
            s.go_to_page(0),
            Err(NavigationError::PageOutOfRange { page: 0, count: 5 })
        );
        assert!(s.go_to_page(6).is_err());
        let actions = s.go_to_page(5).unwrap();
        assert_eq!(s.page(), 4);
        assert!(actions.contains(&Action::SavePosition));
    }

    #[test]
    fn phrase_navigation_within_ready_phrases() {
        let mut s = session(2, 5, 2);

        assert!(s.prev_phrase().is_empty());
        let actions = s.next_phrase();
        assert_eq!(s.phrase(), 1);
        assert_eq!(actions, vec![Action::StopAudio, Action::SavePosition]);
        assert!(s.next_phrase().is_empty(), "phrase 2 is not ready yet");
        s.prev_phrase();
        assert_eq!(s.phrase(), 0);
    }

    #[test]
    fn phrase_navigation_while_playing_replays() {
        let mut s = session(2, 5, 3);
        s.toggle_play();

        let actions = s.next_phrase();
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::Play { audio, .. } if audio == &PathBuf::from("/cache/1.mp3"))));
        assert_eq!(s.state(), PlayState::Playing);
    }

    #[test]
    fn phrase_navigation_while_paused_stops() {
        let mut s = session(2, 5, 3);
        s.toggle_play();
        s.toggle_play();

        s.next_phrase();
        assert_eq!(s.state(), PlayState::Stopped);
    }

    #[test]
    fn preload_requested_once_near_page_end() {
        let mut s = session(3, 5, 5);
        let mut preloads = 0;
        let mut actions = s.toggle_play();
        loop {
            preloads += actions
                .iter()
                .filter(|a| matches!(a, Action::Preload { page: 1 }))
                .count();
            let Some(ticket) = play_ticket(&actions) else { break };
            if s.phrase() == 4 {
                break;
            }
            actions = s.on_playback_finished(ticket);
        }
        assert_eq!(preloads, 1);
    }

    #[test]
    fn no_preload_on_last_page() {
        let mut s = session(1, 2, 2);
        let actions = s.toggle_play();
        assert!(!actions.iter().any(|a| matches!(a, Action::Preload { .. })));
    }

    #[test]
    fn failed_phrases_are_skipped() {
        let mut s = Session::new(2, 3);
        s.open(0, 0, false);
        let g = s.generation();
        s.on_segmented(g, 4);
        s.on_phrase_ready(g, phrase(0));
        s.on_phrase_ready(g, phrase(2));

        let ticket = play_ticket(&s.toggle_play()).unwrap();
        let actions = s.on_playback_finished(ticket);
        assert_eq!(s.phrase(), 2);
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::Play { audio, .. } if audio == &PathBuf::from("/cache/2.mp3"))));

        s.prev_phrase();
        assert_eq!(s.phrase(), 0);
    }

    #[test]
    fn resume_beyond_total_restarts_page() {
        let mut s = Session::new(3, 3);
        s.open(1, 12, false);
        let actions = s.on_segmented(s.generation(), 4);

        assert_eq!(s.phrase(), 0);
        assert_eq!(actions, vec![Action::SavePosition]);
    }

    #[test]
    fn failed_page_stops_waiting() {
        let mut s = Session::new(3, 3);
        s.open(0, 0, true);
        s.on_page_failed(s.generation());
        assert_eq!(s.state(), PlayState::Stopped);
    }

    #[test]
    fn reload_keeps_position() {
        let mut s = session(3, 5, 3);
        s.next_phrase();
        s.next_phrase();
        let before = s.generation();

        let actions = s.reload();
        assert_eq!(s.phrase(), 2);
        assert_eq!(s.ready(), 0);
        assert!(actions.contains(&Action::PreparePage { page: 0, generation: before + 1 }));
    }

    #[test]
    fn position_only_after_open() {
        let mut s = Session::new(10, 3);
        assert_eq!(s.position(), None);

        s.open(4, 2, false);
        assert_eq!(s.position(), Some((4, 2)));
    }
}
