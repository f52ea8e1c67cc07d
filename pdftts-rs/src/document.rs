//! PDF page text access.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use lopdf::{Document, Encoding, Object, ObjectId};
use tracing::{debug, info};

use crate::error::{ReaderError, Result};

/// Anything that yields plain text per page.
pub trait PageSource: Send + Sync {
    fn page_count(&self) -> usize;

    /// Text of the 0-based page `index`.
    fn page_text(&self, index: usize) -> Result<String>;
}

pub struct PdfDocument {
    // lopdf extraction takes &self but the document is not guaranteed Sync.
    doc: Mutex<Document>,
    /// Page object ids in document order.
    page_ids: Vec<ObjectId>,
}

impl PdfDocument {
    /// Load a PDF. Blocking; call from `spawn_blocking` inside async code.
    pub fn open(path: &Path) -> Result<Self> {
        let doc = Document::load(path).map_err(|source| ReaderError::Pdf {
            path: path.to_path_buf(),
            source,
        })?;

        let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();
        if page_ids.is_empty() {
            return Err(ReaderError::NoPages(path.to_path_buf()));
        }

        info!("Opened {} ({} pages)", path.display(), page_ids.len());

        Ok(Self {
            doc: Mutex::new(doc),
            page_ids,
        })
    }
}

impl PageSource for PdfDocument {
    fn page_count(&self) -> usize {
        self.page_ids.len()
    }

    fn page_text(&self, index: usize) -> Result<String> {
        let page_id = *self
            .page_ids
            .get(index)
            .ok_or(ReaderError::PageOutOfRange {
                page: index + 1,
                count: self.page_ids.len(),
            })?;

        let doc = self
            .doc
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let text = page_lines(&doc, page_id).map_err(|source| ReaderError::Extract {
            page: index + 1,
            source,
        })?;

        debug!("Extracted {} chars from page {}", text.len(), index + 1);
        Ok(text)
    }
}

/// `TJ` offsets (thousandths of a text space unit) wider than this are word gaps.
const WORD_GAP: f32 = 200.0;

/// Collects shown text, one output line per text line on the page.
#[derive(Default)]
struct LineWriter {
    text: String,
    /// Baseline of the current line, when known.
    line_y: Option<f32>,
}

impl LineWriter {
    fn push(&mut self, s: &str) {
        self.text.push_str(s);
    }

    fn space(&mut self) {
        if !self.text.is_empty() && !self.text.ends_with(char::is_whitespace) {
            self.text.push(' ');
        }
    }

    fn break_line(&mut self) {
        let end = self.text.trim_end_matches(' ').len();
        self.text.truncate(end);
        if !self.text.is_empty() && !self.text.ends_with('\n') {
            self.text.push('\n');
        }
    }

    /// Relative move (`Td`/`TD`): a vertical component starts a new line.
    fn move_by(&mut self, dy: f32) {
        if dy == 0.0 {
            self.space();
        } else {
            self.line_y = self.line_y.map(|y| y + dy);
            self.break_line();
        }
    }

    /// Absolute move (`Tm`): same baseline continues the line.
    fn move_to(&mut self, y: f32) {
        match self.line_y {
            Some(current) if (current - y).abs() < 0.5 => self.space(),
            _ => self.break_line(),
        }
        self.line_y = Some(y);
    }

    fn show(&mut self, encoding: Option<&Encoding>, operand: &Object) -> lopdf::Result<()> {
        let Some(encoding) = encoding else {
            debug!("Skipping text shown without a known font encoding");
            return Ok(());
        };
        match operand {
            Object::String(bytes, _) => self.push(&Document::decode_text(encoding, bytes)?),
            Object::Array(items) => {
                for item in items {
                    match item {
                        Object::String(bytes, _) => self.push(&Document::decode_text(encoding, bytes)?),
                        other => {
                            if other.as_float().is_ok_and(|gap| -gap > WORD_GAP) {
                                self.space();
                            }
                        }
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Text of one page with its line structure kept.
///
/// lopdf's `extract_text` concatenates every string of a text object, so
/// a running header and the first body line come out as one line.
fn page_lines(doc: &Document, page_id: ObjectId) -> lopdf::Result<String> {
    let encodings: BTreeMap<Vec<u8>, Encoding> = doc
        .get_page_fonts(page_id)?
        .into_iter()
        .filter_map(|(name, font)| match font.get_font_encoding(doc) {
            Ok(encoding) => Some((name, encoding)),
            Err(e) => {
                debug!("Ignoring font {}: {e}", String::from_utf8_lossy(&name));
                None
            }
        })
        .collect();
    let content = doc.get_and_decode_page_content(page_id)?;

    let mut out = LineWriter::default();
    let mut encoding = None;
    for op in &content.operations {
        let operands = &op.operands;
        let number = |i: usize| operands.get(i).and_then(|o| o.as_float().ok());

        match op.operator.as_str() {
            "BT" => out.line_y = Some(0.0),
            "ET" | "T*" => out.break_line(),
            "Tf" => {
                encoding = operands
                    .first()
                    .and_then(|name| name.as_name().ok())
                    .and_then(|name| encodings.get(name));
            }
            "Td" | "TD" => out.move_by(number(1).unwrap_or(0.0)),
            "Tm" => match number(5) {
                Some(y) => out.move_to(y),
                None => out.break_line(),
            },
            "Tj" | "TJ" => {
                if let Some(operand) = operands.first() {
                    out.show(encoding, operand)?;
                }
            }
            // ' and " move to the next line, then show their last operand.
            "'" | "\"" => {
                out.line_y = None;
                out.break_line();
                if let Some(operand) = operands.last() {
                    out.show(encoding, operand)?;
                }
            }
            _ => {}
        }
    }
    out.break_line();

    Ok(out.text)
}

/// In-memory pages, for plain text input.
pub struct TextPages {
    pages: Vec<String>,
}

impl TextPages {
    pub fn new(pages: Vec<String>) -> Self {
        Self { pages }
    }

    /// Split on form feeds, the page separator `pdftotext` emits.
    pub fn from_text(text: &str) -> Self {
        let pages: Vec<String> = text
            .split('\x0c')
            .map(str::to_string)
            .filter(|p| !p.trim().is_empty())
            .collect();
        if pages.is_empty() {
            Self::new(vec![String::new()])
        } else {
            Self::new(pages)
        }
    }
}

/// Open a `.txt` file as form-feed separated pages, anything else as PDF.
pub fn open_document(path: &Path) -> Result<Box<dyn PageSource>> {
    let is_text = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("txt"));

    if is_text {
        let text = std::fs::read_to_string(path)?;
        let pages = TextPages::from_text(&text);
        info!("Opened {} ({} pages)", path.display(), pages.page_count());
        Ok(Box::new(pages))
    } else {
        Ok(Box::new(PdfDocument::open(path)?))
    }
}

impl PageSource for TextPages {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page_text(&self, index: usize) -> Result<String> {
        self.pages
            .get(index)
            .cloned()
            .ok_or(ReaderError::PageOutOfRange {
                page: index + 1,
                count: self.pages.len(),
            })
    }
}
