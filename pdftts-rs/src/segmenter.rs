//! Phrase segmentation.
//!
//! Text → sentences (split on .!?… unless the word before is a known
//! abbreviation for the page language or a single-letter initial) →
//! phrases no longer than `max_chars` (split at , ; : then at spaces).

use whatlang::Lang;

const SENTENCE_ENDS: [char; 4] = ['.', '!', '?', '…'];
const CLAUSE_BREAKS: [char; 3] = [',', ';', ':'];
/// Closing quotes and brackets that stay with the sentence they end.
const CLOSERS: [char; 8] = ['"', '\'', '”', '’', '»', ')', ']', '}'];

const COMMON_ABBREVIATIONS: &[&str] = &[
    "etc", "vs", "cf", "al", "fig", "vol", "pp", "p", "eds", "e.g", "i.e", "a.m", "p.m",
];

fn abbreviations(lang: Option<Lang>) -> &'static [&'static str] {
    match lang {
        Some(Lang::Eng) => &["mr", "mrs", "ms", "dr", "prof", "sr", "jr", "st", "inc", "ltd", "co", "approx", "dept", "est"],
        Some(Lang::Por) => &["sr", "sra", "srs", "dr", "dra", "prof", "profa", "av", "pág", "cap", "ex", "aprox", "nº"],
        Some(Lang::Spa) => &["sr", "sra", "srta", "dr", "dra", "ud", "uds", "prof", "pág", "cap", "aprox", "núm", "av"],
        Some(Lang::Fra) => &["m", "mme", "mlle", "dr", "pr", "prof", "env", "chap", "av", "bd", "cf"],
        Some(Lang::Deu) => &["hr", "fr", "dr", "prof", "bzw", "ca", "vgl", "usw", "z.b", "d.h", "nr", "str"],
        Some(Lang::Ita) => &["sig", "sigg", "dott", "prof", "ing", "avv", "pag", "cap", "ecc"],
        _ => &[],
    }
}

pub struct Segmenter {
    max_chars: usize,
}

impl Segmenter {
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars: max_chars.max(20),
        }
    }

    /// Split cleaned page text into phrases. Never returns empty phrases.
    pub fn split(&self, text: &str, lang: Option<Lang>) -> Vec<String> {
        split_sentences(text, lang)
            .into_iter()
            .flat_map(|sentence| self.split_long(sentence))
            .collect()
    }

    fn split_long(&self, sentence: &str) -> Vec<String> {
        if sentence.chars().count() <= self.max_chars {
            return vec![sentence.to_string()];
        }

        let mut phrases = Vec::new();
        for clause in split_after(sentence, &CLAUSE_BREAKS) {
            pack_words(clause, self.max_chars, &mut phrases);
        }
        merge_short(phrases, self.max_chars)
    }
}

/// Split text into sentences at .!?… (plus any closing quotes or brackets)
/// followed by whitespace.
fn split_sentences(text: &str, lang: Option<Lang>) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !SENTENCE_ENDS.contains(&c) {
            continue;
        }
        while chars.next_if(|&(_, next)| CLOSERS.contains(&next)).is_some() {}
        let Some(&(next_i, next)) = chars.peek() else {
            break;
        };
        if !next.is_whitespace() {
            continue;
        }
        if c == '.' && is_abbreviation(&text[start..i], lang) {
            continue;
        }

        let s = text[start..next_i].trim();
        if !s.is_empty() {
            sentences.push(s);
        }
        start = next_i;
    }

    let s = text[start..].trim();
    if !s.is_empty() {
        sentences.push(s);
    }

    sentences
}

/// Does the text before a period end with an abbreviation or initial?
fn is_abbreviation(before: &str, lang: Option<Lang>) -> bool {
    let word = before
        .rsplit(|c: char| c.is_whitespace() || c == '(' || c == '"')
        .next()
        .unwrap_or("");
    if word.is_empty() {
        return false;
    }

    // Single-letter initials: "J. R. R. Tolkien". The pronoun "I" is not one.
    let mut letters = word.chars();
    if let (Some(first), None) = (letters.next(), letters.next()) {
        if first.is_alphabetic() && first.is_uppercase() && first != 'I' {
            return true;
        }
    }

    let lower = word.to_lowercase();
    COMMON_ABBREVIATIONS.contains(&lower.as_str()) || abbreviations(lang).contains(&lower.as_str())
}

/// Split after each delimiter, keeping the delimiter with the left part.
fn split_after<'a>(text: &'a str, delimiters: &[char]) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if delimiters.contains(&c) {
            let end = i + c.len_utf8();
            let part = text[start..end].trim();
            if !part.is_empty() {
                parts.push(part);
            }
            start = end;
        }
    }
    let rest = text[start..].trim();
    if !rest.is_empty() {
        parts.push(rest);
    }
    parts
}

/// Greedily pack words into phrases of at most `max` chars. A single word
/// longer than `max` becomes its own phrase.
fn pack_words(text: &str, max: usize, out: &mut Vec<String>) {
    let mut current = String::new();
    for word in text.split_whitespace() {
        let needed = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };
        if needed > max && !current.is_empty() {
            out.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        out.push(current);
    }
}

/// Join adjacent clauses back together while they fit in `max`.
fn merge_short(parts: Vec<String>, max: usize) -> Vec<String> {
    let mut merged: Vec<String> = Vec::new();
    for part in parts {
        match merged.last_mut() {
            Some(last) if last.chars().count() + 1 + part.chars().count() <= max => {
                last.push(' ');
                last.push_str(&part);
            }
            _ => merged.push(part),
        }
    }
    merged
}
