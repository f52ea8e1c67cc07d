//! Keyboard bindings.
//!
//! Bindings come from `KeysConfig` as combos of `KEY_*` names, modifiers
//! first (`["KEY_LEFTCTRL", "KEY_Q"]`). Each combo resolves to one crossterm
//! key code plus a modifier set.

use std::collections::HashMap;

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use tracing::{debug, warn};

use crate::config::KeysConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    PlayPause,
    NextPage,
    PrevPage,
    NextPhrase,
    PrevPhrase,
    GoToPage,
    NextVoice,
    Faster,
    Slower,
    Quit,
}

impl Command {
    pub const ALL: [Command; 10] = [
        Command::PlayPause,
        Command::PrevPage,
        Command::NextPage,
        Command::PrevPhrase,
        Command::NextPhrase,
        Command::GoToPage,
        Command::NextVoice,
        Command::Faster,
        Command::Slower,
        Command::Quit,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Command::PlayPause => "play/pause",
            Command::NextPage => "next page",
            Command::PrevPage => "prev page",
            Command::NextPhrase => "next phrase",
            Command::PrevPhrase => "prev phrase",
            Command::GoToPage => "go to page",
            Command::NextVoice => "voice",
            Command::Faster => "faster",
            Command::Slower => "slower",
            Command::Quit => "quit",
        }
    }
}

type Binding = (KeyCode, KeyModifiers);

/// Resolve a modifier name like "KEY_LEFTCTRL".
fn resolve_modifier(name: &str) -> Option<KeyModifiers> {
    let modifier = match name {
        "KEY_LEFTCTRL" | "KEY_RIGHTCTRL" => KeyModifiers::CONTROL,
        "KEY_LEFTALT" | "KEY_RIGHTALT" => KeyModifiers::ALT,
        "KEY_LEFTSHIFT" | "KEY_RIGHTSHIFT" => KeyModifiers::SHIFT,
        "KEY_LEFTMETA" | "KEY_RIGHTMETA" => KeyModifiers::SUPER,
        _ => return None,
    };
    Some(modifier)
}

/// Resolve a key name like "KEY_SPACE" or "KEY_Q" to a crossterm key code.
fn resolve_key(name: &str) -> Option<KeyCode> {
    let code = match name {
        "KEY_SPACE" => KeyCode::Char(' '),
        "KEY_ENTER" => KeyCode::Enter,
        "KEY_TAB" => KeyCode::Tab,
        "KEY_ESC" => KeyCode::Esc,
        "KEY_BACKSPACE" => KeyCode::Backspace,
        "KEY_LEFT" => KeyCode::Left,
        "KEY_RIGHT" => KeyCode::Right,
        "KEY_UP" => KeyCode::Up,
        "KEY_DOWN" => KeyCode::Down,
        "KEY_PAGEUP" => KeyCode::PageUp,
        "KEY_PAGEDOWN" => KeyCode::PageDown,
        "KEY_HOME" => KeyCode::Home,
        "KEY_END" => KeyCode::End,
        "KEY_PLUS" | "KEY_KPPLUS" => KeyCode::Char('+'),
        "KEY_MINUS" | "KEY_KPMINUS" => KeyCode::Char('-'),
        "KEY_EQUAL" => KeyCode::Char('='),
        "KEY_COMMA" => KeyCode::Char(','),
        "KEY_DOT" => KeyCode::Char('.'),
        "KEY_SLASH" => KeyCode::Char('/'),
        _ => {
            let rest = name.strip_prefix("KEY_")?;
            if let Some(n) = rest.strip_prefix('F').and_then(|n| n.parse::<u8>().ok()) {
                return (1..=12).contains(&n).then_some(KeyCode::F(n));
            }
            let mut chars = rest.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii_alphanumeric() => KeyCode::Char(c.to_ascii_lowercase()),
                _ => return None,
            }
        }
    };
    Some(code)
}

fn resolve_combo(combo: &[String]) -> Option<Binding> {
    let mut modifiers = KeyModifiers::NONE;
    let mut code = None;
    for name in combo {
        if let Some(m) = resolve_modifier(name) {
            modifiers |= m;
        } else if let Some(c) = resolve_key(name) {
            code = Some(c);
        } else {
            warn!("Unknown key name: {name}");
            return None;
        }
    }
    code.map(|c| (c, modifiers))
}

/// Fold terminal quirks: uppercase letters carry SHIFT, and SHIFT on
/// punctuation is whatever the layout needed to type it.
fn normalize(code: KeyCode, modifiers: KeyModifiers) -> Binding {
    match code {
        KeyCode::Char(c) if c.is_ascii_uppercase() => {
            (KeyCode::Char(c.to_ascii_lowercase()), modifiers | KeyModifiers::SHIFT)
        }
        KeyCode::Char(c) if !c.is_ascii_alphabetic() => (code, modifiers - KeyModifiers::SHIFT),
        _ => (code, modifiers),
    }
}

fn describe(binding: &Binding) -> String {
    let (code, modifiers) = binding;
    let mut parts = Vec::new();
    if modifiers.contains(KeyModifiers::CONTROL) {
        parts.push("Ctrl".to_string());
    }
    if modifiers.contains(KeyModifiers::ALT) {
        parts.push("Alt".to_string());
    }
    if modifiers.contains(KeyModifiers::SHIFT) {
        parts.push("Shift".to_string());
    }
    let key = match code {
        KeyCode::Char(' ') => "Space".to_string(),
        KeyCode::Char(c) => c.to_string(),
        KeyCode::Left => "←".to_string(),
        KeyCode::Right => "→".to_string(),
        KeyCode::Up => "↑".to_string(),
        KeyCode::Down => "↓".to_string(),
        KeyCode::PageUp => "PgUp".to_string(),
        KeyCode::PageDown => "PgDn".to_string(),
        KeyCode::F(n) => format!("F{n}"),
        other => format!("{other:?}"),
    };
    parts.push(key);
    parts.join("+")
}

pub struct Keymap {
    bindings: HashMap<Binding, Command>,
    help: Vec<(Command, String)>,
}

impl Keymap {
    pub fn new(config: &KeysConfig) -> Self {
        let table: [(Command, &Vec<Vec<String>>); 10] = [
            (Command::PlayPause, &config.play_pause),
            (Command::NextPage, &config.next_page),
            (Command::PrevPage, &config.prev_page),
            (Command::NextPhrase, &config.next_phrase),
            (Command::PrevPhrase, &config.prev_phrase),
            (Command::GoToPage, &config.go_to_page),
            (Command::NextVoice, &config.next_voice),
            (Command::Faster, &config.faster),
            (Command::Slower, &config.slower),
            (Command::Quit, &config.quit),
        ];

        let mut bindings = HashMap::new();
        let mut first: HashMap<Command, String> = HashMap::new();
        for (command, combos) in table {
            for combo in combos {
                let Some(binding) = resolve_combo(combo) else {
                    continue;
                };
                if let Some(previous) = bindings.insert(binding, command) {
                    if previous != command {
                        warn!("{} is bound to both {previous:?} and {command:?}", describe(&binding));
                    }
                }
                first.entry(command).or_insert_with(|| describe(&binding));
            }
        }

        bindings.insert((KeyCode::Char('c'), KeyModifiers::CONTROL), Command::Quit);
        debug!("Keymap: {} bindings", bindings.len());

        let help = Command::ALL
            .iter()
            .filter_map(|c| first.remove(c).map(|key| (*c, key)))
            .collect();

        Self { bindings, help }
    }

    /// Command for a key press, ignoring releases.
    pub fn lookup(&self, event: &KeyEvent) -> Option<Command> {
        if event.kind == KeyEventKind::Release {
            return None;
        }
        self.bindings.get(&normalize(event.code, event.modifiers)).copied()
    }

    /// First binding of each bound command, for the help line.
    pub fn help(&self) -> &[(Command, String)] {
        &self.help
    }
}
