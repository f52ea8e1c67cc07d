//! Page preparation pipeline.
//!
//! page text → margins stripped → cleaned → language → phrases → audio.
//!
//! `prepare_page` streams each phrase to the reader as soon as its audio is
//! cached, so playback starts after the first phrase instead of the whole
//! page. `preload_page` runs the same steps for the next page but only
//! warms the cache.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use whatlang::Lang;

use crate::document::PageSource;
use crate::error::{ReaderError, Result};
use crate::language;
use crate::segmenter::Segmenter;
use crate::speech::cache::AudioCache;
use crate::speech::{RetryPolicy, SpeechSynthesizer, VoiceSettings};
use crate::text::{clean_text, strip_running_lines};

/// A page is abandoned after this many phrases in a row fail to synthesize.
const MAX_CONSECUTIVE_FAILURES: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct PreparedPhrase {
    /// Position in the page's segmentation.
    pub index: usize,
    pub text: String,
    pub audio: PathBuf,
}

#[derive(Debug)]
pub enum PageEvent {
    Segmented {
        generation: u64,
        total: usize,
        language: Option<Lang>,
    },
    PhraseReady {
        generation: u64,
        phrase: PreparedPhrase,
    },
    PhraseFailed {
        generation: u64,
        index: usize,
        error: String,
    },
    Failed {
        generation: u64,
        error: String,
    },
    Done {
        generation: u64,
    },
}

/// Outcome of a preload job. `job` identifies the run, so a report from a
/// superseded run of the same page is told apart from the current one.
#[derive(Debug)]
pub enum PreloadEvent {
    Ready { job: u64, page: usize, phrases: usize },
    Failed { job: u64, page: usize, error: String },
    Cancelled { job: u64, page: usize },
}

impl PreloadEvent {
    pub fn job(&self) -> u64 {
        match *self {
            PreloadEvent::Ready { job, .. }
            | PreloadEvent::Failed { job, .. }
            | PreloadEvent::Cancelled { job, .. } => job,
        }
    }
}

pub struct PipelineContext {
    pub source: Arc<dyn PageSource>,
    pub synth: Arc<dyn SpeechSynthesizer>,
    pub cache: AudioCache,
    pub segmenter: Segmenter,
    pub retry: RetryPolicy,
    pub strip_headers: bool,
    pub margin_similarity: f64,
}

impl PipelineContext {
    /// Extract and segment one page. Blocking.
    pub fn extract_phrases(&self, page: usize) -> Result<(Option<Lang>, Vec<String>)> {
        let mut raw = self.source.page_text(page)?;

        if self.strip_headers {
            let neighbors: Vec<String> = [page.checked_sub(1), Some(page + 1)]
                .into_iter()
                .flatten()
                .filter(|&n| n < self.source.page_count())
                .filter_map(|n| self.source.page_text(n).ok())
                .collect();
            raw = strip_running_lines(&raw, &neighbors, self.margin_similarity);
        }

        let text = clean_text(&raw);
        if text.is_empty() {
            return Ok((None, Vec::new()));
        }

        let lang = language::detect(&text);
        Ok((lang, self.segmenter.split(&text, lang)))
    }
}

async fn page_phrases(ctx: &Arc<PipelineContext>, page: usize) -> Result<(Option<Lang>, Vec<String>)> {
    let ctx = Arc::clone(ctx);
    tokio::task::spawn_blocking(move || ctx.extract_phrases(page))
        .await
        .map_err(|e| ReaderError::Io(std::io::Error::other(e)))?
}

/// Prepare the current page, reporting progress on `tx`. Every event carries
/// `generation` so the reader can drop events from abandoned pages.
pub async fn prepare_page(
    ctx: Arc<PipelineContext>,
    page: usize,
    generation: u64,
    voice: VoiceSettings,
    tx: mpsc::UnboundedSender<PageEvent>,
    cancel: CancellationToken,
) {
    let (lang, phrases) = match page_phrases(&ctx, page).await {
        Ok(result) => result,
        Err(e) => {
            warn!("Page {} extraction failed: {e}", page + 1);
            let _ = tx.send(PageEvent::Failed {
                generation,
                error: e.to_string(),
            });
            return;
        }
    };

    info!(
        "Page {}: {} phrases, language {}",
        page + 1,
        phrases.len(),
        lang.map(language::iso_639_1).unwrap_or("unknown")
    );
    let _ = tx.send(PageEvent::Segmented {
        generation,
        total: phrases.len(),
        language: lang,
    });

    let mut consecutive_failures = 0;
    for (index, text) in phrases.into_iter().enumerate() {
        if cancel.is_cancelled() {
            debug!("Page {} preparation cancelled at phrase {index}", page + 1);
            return;
        }

        let request = voice.request(&text, lang);
        let result = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Page {} preparation cancelled during phrase {index}", page + 1);
                return;
            }
            r = ctx.cache.get_or_synthesize(ctx.synth.as_ref(), &request, ctx.retry) => r,
        };

        match result {
            Ok(audio) => {
                consecutive_failures = 0;
                let _ = tx.send(PageEvent::PhraseReady {
                    generation,
                    phrase: PreparedPhrase { index, text, audio },
                });
            }
            Err(e) => {
                consecutive_failures += 1;
                warn!("Phrase {} of page {} failed: {e}", index + 1, page + 1);
                let _ = tx.send(PageEvent::PhraseFailed {
                    generation,
                    index,
                    error: e.to_string(),
                });
                if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                    let _ = tx.send(PageEvent::Failed {
                        generation,
                        error: format!("speech synthesis keeps failing: {e}"),
                    });
                    return;
                }
            }
        }
    }

    let _ = tx.send(PageEvent::Done { generation });
}

/// Synthesize every phrase of `page` into the cache ahead of time.
pub async fn preload_page(
    ctx: Arc<PipelineContext>,
    job: u64,
    page: usize,
    voice: VoiceSettings,
    cancel: CancellationToken,
) -> PreloadEvent {
    let (lang, phrases) = match page_phrases(&ctx, page).await {
        Ok(result) => result,
        Err(e) => {
            return PreloadEvent::Failed {
                job,
                page,
                error: e.to_string(),
            }
        }
    };

    let total = phrases.len();
    for text in &phrases {
        if cancel.is_cancelled() {
            debug!("Preload of page {} cancelled", page + 1);
            return PreloadEvent::Cancelled { job, page };
        }
        let request = voice.request(text, lang);
        if let Err(e) = ctx
            .cache
            .get_or_synthesize(ctx.synth.as_ref(), &request, ctx.retry)
            .await
        {
            return PreloadEvent::Failed {
                job,
                page,
                error: e.to_string(),
            };
        }
    }
    if cancel.is_cancelled() {
        return PreloadEvent::Cancelled { job, page };
    }

    debug!("Preloaded page {} ({total} phrases)", page + 1);
    PreloadEvent::Ready {
        job,
        page,
        phrases: total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::TextPages;
    use crate::speech::testing::FakeSynth;
    use crate::speech::Rate;
    use std::collections::HashMap;
    use std::time::Duration;

    fn voice() -> VoiceSettings {
        VoiceSettings {
            voice: "en-US-AvaMultilingualNeural".into(),
            rate: Rate::percent(35),
            by_language: HashMap::new(),
        }
    }

    fn context(pages: Vec<&str>, synth: Arc<FakeSynth>, dir: &std::path::Path) -> Arc<PipelineContext> {
        Arc::new(PipelineContext {
            source: Arc::new(TextPages::new(pages.into_iter().map(String::from).collect())),
            synth,
            cache: AudioCache::new(dir.to_path_buf(), "mp3"),
            segmenter: Segmenter::new(300),
            retry: RetryPolicy {
                attempts: 1,
                delay: Duration::from_millis(1),
            },
            strip_headers: true,
            margin_similarity: 0.8,
        })
    }

    async fn run_page(ctx: Arc<PipelineContext>, page: usize) -> Vec<PageEvent> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        prepare_page(ctx, page, 7, voice(), tx, CancellationToken::new()).await;
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn streams_phrases_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let synth = Arc::new(FakeSynth::default());
        let ctx = context(
            vec!["The first phrase is here. The second follows! And a third one?"],
            synth.clone(),
            dir.path(),
        );

        let events = run_page(ctx, 0).await;
        assert_eq!(events.len(), 5);
        assert!(matches!(events[0], PageEvent::Segmented { generation: 7, total: 3, .. }));

        let texts: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                PageEvent::PhraseReady { phrase, .. } => Some(phrase.text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["The first phrase is here.", "The second follows!", "And a third one?"]);
        assert!(matches!(events[4], PageEvent::Done { generation: 7 }));
        assert_eq!(synth.calls(), 3);

        let seen = synth.seen.lock().unwrap();
        assert!(seen.iter().all(|r| r.voice == "en-US-AvaMultilingualNeural" && r.rate == Rate::percent(35)));
    }

    #[tokio::test]
    async fn empty_page_is_done_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(vec!["   \n  "], Arc::new(FakeSynth::default()), dir.path());

        let events = run_page(ctx, 0).await;
        assert!(matches!(events[0], PageEvent::Segmented { total: 0, language: None, .. }));
        assert!(matches!(events[1], PageEvent::Done { .. }));
    }

    #[tokio::test]
    async fn failed_phrase_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let synth = Arc::new(FakeSynth::poisoned("broken"));
        let ctx = context(vec!["One fine phrase. A broken phrase. Last phrase."], synth, dir.path());

        let events = run_page(ctx, 0).await;
        let ready: Vec<usize> = events
            .iter()
            .filter_map(|e| match e {
                PageEvent::PhraseReady { phrase, .. } => Some(phrase.index),
                _ => None,
            })
            .collect();
        assert_eq!(ready, vec![0, 2]);
        assert!(events.iter().any(|e| matches!(e, PageEvent::PhraseFailed { index: 1, .. })));
        assert!(matches!(events.last(), Some(PageEvent::Done { .. })));
    }

    #[tokio::test]
    async fn repeated_failures_abort_page() {
        let dir = tempfile::tempdir().unwrap();
        let synth = Arc::new(FakeSynth::failing(100));
        let ctx = context(vec!["A. Bb cc. Dd ee. Ff gg. Hh ii."], synth.clone(), dir.path());

        let events = run_page(ctx, 0).await;
        assert!(matches!(events.last(), Some(PageEvent::Failed { .. })));
        assert_eq!(synth.calls(), MAX_CONSECUTIVE_FAILURES);
    }

    #[tokio::test]
    async fn missing_page_fails() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(vec!["Only page."], Arc::new(FakeSynth::default()), dir.path());

        let events = run_page(ctx, 3).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], PageEvent::Failed { generation: 7, .. }));
    }

    #[tokio::test]
    async fn cancelled_job_sends_nothing_after_segmentation() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(vec!["One. Two. Three."], Arc::new(FakeSynth::default()), dir.path());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        cancel.cancel();

        prepare_page(ctx, 0, 1, voice(), tx, cancel).await;
        assert!(matches!(rx.try_recv(), Ok(PageEvent::Segmented { .. })));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn preload_warms_cache_for_page_job() {
        let dir = tempfile::tempdir().unwrap();
        let synth = Arc::new(FakeSynth::default());
        let ctx = context(
            vec!["Current page text.", "Next page one. Next page two."],
            synth.clone(),
            dir.path(),
        );

        let event = preload_page(ctx.clone(), 4, 1, voice(), CancellationToken::new()).await;
        assert!(matches!(event, PreloadEvent::Ready { job: 4, page: 1, phrases: 2 }));
        assert_eq!(synth.calls(), 2);

        let events = run_page(ctx, 1).await;
        assert!(matches!(events.last(), Some(PageEvent::Done { .. })));
        assert_eq!(synth.calls(), 2, "page job should hit the cache");
    }

    #[tokio::test]
    async fn cancelled_preload_is_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let synth = Arc::new(FakeSynth::default());
        let ctx = context(vec!["Current.", "Next one. Next two."], synth.clone(), dir.path());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let event = preload_page(ctx, 9, 1, voice(), cancel).await;
        assert!(matches!(event, PreloadEvent::Cancelled { job: 9, page: 1 }));
        assert_eq!(event.job(), 9);
        assert_eq!(synth.calls(), 0);
    }

    #[test]
    fn extraction_strips_running_headers() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(
            vec![
                "Annual Report 2024\nFirst page body text.\nPage 1",
                "Annual Report 2024\nSecond page body text.\nPage 2",
            ],
            Arc::new(FakeSynth::default()),
            dir.path(),
        );

        let (_, phrases) = ctx.extract_phrases(1).unwrap();
        assert_eq!(phrases, vec!["Second page body text."]);
    }
}
