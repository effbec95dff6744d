//! Sentence segmentation of streamed text
//!
//! Text arrives as arbitrary deltas. After each delta the whole buffer is
//! re-segmented; every fragment except the last is known to be complete and
//! is released at once, while the last fragment waits for more text or a
//! final flush.

use std::sync::Arc;

use unicode_segmentation::UnicodeSegmentation;

/// Splits text into sentence-sized fragments
///
/// Fragments must cover the input exactly: concatenating them gives the
/// input back. The last fragment is treated as possibly incomplete.
pub trait SentenceBoundaryLocator: Send + Sync {
    fn split<'a>(&self, text: &'a str) -> Vec<&'a str>;
}

/// Deterministic splitter for ASCII terminal punctuation
///
/// A sentence ends after `.`, `?` or `!` once the following whitespace has
/// been seen; that whitespace belongs to the sentence it follows. The
/// remainder after the last boundary is always returned as the final
/// fragment, even when it is empty, so `"Hello world. "` yields
/// `["Hello world. ", ""]` while `"How are you?"` yields one fragment.
#[derive(Debug, Default, Clone, Copy)]
pub struct AsciiSentenceLocator;

impl SentenceBoundaryLocator for AsciiSentenceLocator {
    fn split<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let mut fragments = Vec::new();
        let mut start = 0;
        let mut chars = text.char_indices().peekable();

        while let Some((_, c)) = chars.next() {
            if !matches!(c, '.' | '?' | '!') {
                continue;
            }
            // runs like "?!" or "..." stay together
            while let Some(&(_, next)) = chars.peek() {
                if matches!(next, '.' | '?' | '!') {
                    chars.next();
                } else {
                    break;
                }
            }
            let mut end = None;
            while let Some(&(i, next)) = chars.peek() {
                if next.is_whitespace() {
                    chars.next();
                    end = Some(i + next.len_utf8());
                } else {
                    break;
                }
            }
            if let Some(end) = end {
                fragments.push(&text[start..end]);
                start = end;
            }
        }

        fragments.push(&text[start..]);
        fragments
    }
}

/// Unicode (UAX #29) sentence boundaries
///
/// Trailing whitespace stays with the sentence it follows, and a sentence
/// is only released once the next one has started.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnicodeSentenceLocator;

impl SentenceBoundaryLocator for UnicodeSentenceLocator {
    fn split<'a>(&self, text: &'a str) -> Vec<&'a str> {
        text.split_sentence_bounds().collect()
    }
}

/// Turns an ordered delta sequence into complete-sentence emissions
pub struct SentenceSegmenter {
    locator: Arc<dyn SentenceBoundaryLocator>,
    buffer: String,
}

impl SentenceSegmenter {
    #[must_use]
    pub fn new(locator: Arc<dyn SentenceBoundaryLocator>) -> Self {
        Self {
            locator,
            buffer: String::new(),
        }
    }

    /// Text held back until it is known to be complete
    #[must_use]
    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    /// Add a delta; returns every newly completed sentence, concatenated
    pub fn enqueue(&mut self, delta: &str) -> Option<String> {
        if delta.is_empty() {
            return None;
        }
        self.buffer.push_str(delta);

        let fragments = self.locator.split(&self.buffer);
        let Some((last, complete)) = fragments.split_last() else {
            self.buffer.clear();
            return None;
        };
        if complete.is_empty() {
            return None;
        }

        let sentence: String = complete.concat();
        let remainder = (*last).to_string();
        self.buffer = remainder;

        if sentence.trim().is_empty() {
            return None;
        }
        Some(sentence)
    }

    /// Release whatever is still buffered, if it is not blank
    pub fn flush(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        if rest.trim().is_empty() {
            None
        } else {
            Some(rest)
        }
    }
}
