//! Text cleanup between extraction and segmentation.
//!
//! - `clean_text`: drop bracketed asides, rejoin hyphenated words, flatten lines
//! - `strip_running_lines`: drop headers/footers repeated on neighboring pages

use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref BRACKETED: Regex = Regex::new(r"\[.*?\]|\(.*?\)").unwrap();
    static ref HYPHEN_BREAK: Regex = Regex::new(r"(\w)-[ \t]*\r?\n[ \t]*(\w)").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
    static ref WORD: Regex = Regex::new(r"[^\W\d_]+").unwrap();
}

/// Normalize extracted page text into a single speakable paragraph.
pub fn clean_text(raw: &str) -> String {
    let text = BRACKETED.replace_all(raw, " ");
    let text = HYPHEN_BREAK.replace_all(&text, "$1$2");
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

/// Lowercase alphabetic word counts. Digits are ignored so page numbers
/// do not distinguish otherwise identical headers.
fn word_counts(line: &str) -> HashMap<String, f64> {
    let mut counts = HashMap::new();
    for word in WORD.find_iter(line) {
        *counts.entry(word.as_str().to_lowercase()).or_insert(0.0) += 1.0;
    }
    counts
}

/// Cosine similarity of two lines' word counts, 0.0 when either is empty.
pub fn line_similarity(a: &str, b: &str) -> f64 {
    let a = word_counts(a);
    let b = word_counts(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .filter_map(|(word, x)| b.get(word).map(|y| x * y))
        .sum();
    let norm_a = a.values().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.values().map(|x| x * x).sum::<f64>().sqrt();

    dot / (norm_a * norm_b)
}

fn first_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).find(|l| !l.is_empty())
}

fn last_line(text: &str) -> Option<&str> {
    text.lines().rev().map(str::trim).find(|l| !l.is_empty())
}

/// Remove the first and/or last line of `page` when a neighboring page
/// starts/ends with a similar line.
pub fn strip_running_lines(page: &str, neighbors: &[String], threshold: f64) -> String {
    let mut lines: Vec<&str> = page
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    if lines.len() < 2 || neighbors.is_empty() {
        return page.to_string();
    }

    let repeated = |line: &str, pick: fn(&str) -> Option<&str>| {
        neighbors
            .iter()
            .filter_map(|n| pick(n))
            .any(|other| line_similarity(line, other) >= threshold)
    };

    let drop_last = repeated(lines[lines.len() - 1], last_line);
    let drop_first = repeated(lines[0], first_line);

    if drop_last {
        lines.pop();
    }
    if drop_first && !lines.is_empty() {
        lines.remove(0);
    }

    lines.join("\n")
}
