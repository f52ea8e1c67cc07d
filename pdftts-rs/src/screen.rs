//! Terminal view: alternate screen, raw mode, full redraw per frame.

use std::io::{self, Stdout, Write};

use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::style::{Attribute, Print, SetAttribute};
use crossterm::terminal::{self, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{execute, queue};
use tracing::warn;

use crate::error::{ReaderError, Result};
use crate::session::PlayState;

/// Everything one frame shows.
pub struct View<'a> {
    pub title: &'a str,
    pub page: usize,
    pub page_count: usize,
    pub phrase: usize,
    pub total: Option<usize>,
    pub ready: usize,
    pub page_done: bool,
    pub state: PlayState,
    pub voice: &'a str,
    pub rate: String,
    pub language: Option<&'a str>,
    pub text: Option<&'a str>,
    pub prompt: Option<&'a str>,
    pub status: &'a str,
    pub help: &'a str,
}

impl View<'_> {
    fn header(&self) -> String {
        format!(
            "Page {}/{}   Phrase {}/{}   {}",
            self.page + 1,
            self.page_count,
            self.phrase + 1,
            self.total.map_or("?".to_string(), |t| t.to_string()),
            self.state
        )
    }

    fn progress(&self) -> String {
        let lang = self.language.unwrap_or("?");
        let prepared = match (self.total, self.page_done) {
            (_, true) => "page ready".to_string(),
            (Some(total), false) => format!("preparing {}/{total}", self.ready),
            (None, false) => "extracting text...".to_string(),
        };
        format!("Voice {} ({})   Lang {lang}   {prepared}", self.voice, self.rate)
    }
}

pub struct Screen {
    out: Stdout,
}

impl Screen {
    pub fn enter() -> Result<Self> {
        terminal::enable_raw_mode().map_err(terminal_error)?;
        let mut out = io::stdout();
        if let Err(e) = execute!(out, EnterAlternateScreen, Hide) {
            let _ = terminal::disable_raw_mode();
            return Err(terminal_error(e));
        }
        Ok(Self { out })
    }

    pub fn draw(&mut self, view: &View<'_>) -> Result<()> {
        let (width, height) = terminal::size().map_err(terminal_error)?;
        let width = usize::from(width.max(20));
        let height = height.max(8);

        let mut row = 0u16;
        queue!(self.out, Clear(ClearType::All)).map_err(terminal_error)?;

        self.line(&mut row, &truncate(view.title, width), true)?;
        self.line(&mut row, &view.header(), false)?;
        self.line(&mut row, &truncate(&view.progress(), width), false)?;
        row += 1;

        let text_rows = height.saturating_sub(row + 4);
        let text = view.text.unwrap_or("");
        for line in wrap(text, width.saturating_sub(2)).iter().take(usize::from(text_rows)) {
            self.line(&mut row, &format!("  {line}"), false)?;
        }

        row = height - 3;
        if let Some(prompt) = view.prompt {
            self.line(&mut row, &format!("Go to page: {prompt}_"), true)?;
        } else {
            row += 1;
        }
        self.line(&mut row, &truncate(view.status, width), false)?;
        self.line(&mut row, &truncate(view.help, width), false)?;

        self.out.flush().map_err(terminal_error)
    }

    fn line(&mut self, row: &mut u16, text: &str, bold: bool) -> Result<()> {
        queue!(self.out, MoveTo(0, *row)).map_err(terminal_error)?;
        let written = if bold {
            queue!(self.out, SetAttribute(Attribute::Bold), Print(text), SetAttribute(Attribute::Reset))
        } else {
            queue!(self.out, Print(text))
        };
        written.map_err(terminal_error)?;
        *row += 1;
        Ok(())
    }
}

impl Drop for Screen {
    fn drop(&mut self) {
        if let Err(e) = execute!(self.out, Show, LeaveAlternateScreen) {
            warn!("Failed to leave alternate screen: {e}");
        }
        if let Err(e) = terminal::disable_raw_mode() {
            warn!("Failed to disable raw mode: {e}");
        }
    }
}

fn terminal_error(e: io::Error) -> ReaderError {
    ReaderError::Terminal(e.to_string())
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut out: String = text.chars().take(width.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// Greedy word wrap. Words longer than `width` are split.
fn wrap(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut len = 0;

    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        while word.len() > width {
            if len > 0 {
                lines.push(std::mem::take(&mut current));
                len = 0;
            }
            let rest = word.split_off(width);
            lines.push(word.into_iter().collect());
            word = rest;
        }
        if word.is_empty() {
            continue;
        }

        let needed = if len == 0 { word.len() } else { len + 1 + word.len() };
        if needed > width {
            lines.push(std::mem::take(&mut current));
            len = 0;
        }
        if len > 0 {
            current.push(' ');
            len += 1;
        }
        current.extend(word.iter());
        len += word.len();
    }
    if len > 0 {
        lines.push(current);
    }
    lines
}
