//! Source documents, intervals, and the sealed annotated output.

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::OnceLock;

use crate::types::extraction::Extraction;

/// Half-open byte interval `[start, end)` into a document's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CharInterval {
    pub start: usize,
    pub end: usize,
}

impl CharInterval {
    /// Create an interval. `end` is clamped so it never precedes `start`.
    pub fn new(start: usize, end: usize) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    /// The zero-length interval at the start of the document.
    ///
    /// Used as the interval of an unmatched alignment.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Two intervals overlap iff `max(starts) < min(ends)`.
    pub fn overlaps(&self, other: &CharInterval) -> bool {
        self.start.max(other.start) < self.end.min(other.end)
    }

    /// Smallest interval covering both.
    pub fn union(&self, other: &CharInterval) -> CharInterval {
        CharInterval::new(self.start.min(other.start), self.end.max(other.end))
    }

    /// Slice `text` at this interval, if it lies on char boundaries in range.
    pub fn slice<'a>(&self, text: &'a str) -> Option<&'a str> {
        text.get(self.start..self.end)
    }
}

impl fmt::Display for CharInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Half-open token index interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenInterval {
    pub start: usize,
    pub end: usize,
}

/// A whitespace-delimited token and where it sits in the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub index: usize,
    pub interval: CharInterval,
}

/// Immutable input text with derived identity and tokenization.
///
/// The id and the token list are computed on first access and cached.
#[derive(Clone, Deserialize)]
pub struct Document {
    text: String,
    #[serde(default)]
    additional_context: Option<String>,
    #[serde(skip)]
    id: OnceLock<String>,
    #[serde(skip)]
    tokens: OnceLock<Vec<Token>>,
}

impl Document {
    /// Create a document from raw text.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            additional_context: None,
            id: OnceLock::new(),
            tokens: OnceLock::new(),
        }
    }

    /// Create a document carrying extra context for the model.
    pub fn with_context(text: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            additional_context: Some(context.into()),
            ..Self::new(text)
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn additional_context(&self) -> Option<&str> {
        self.additional_context.as_deref()
    }

    /// Length of the text in bytes.
    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Content hash over text and context.
    pub fn id(&self) -> &str {
        self.id.get_or_init(|| {
            let mut hasher = Sha256::new();
            hasher.update(self.text.as_bytes());
            hasher.update([0u8]);
            if let Some(context) = &self.additional_context {
                hasher.update(context.as_bytes());
            }
            format!("doc_{:x}", hasher.finalize())
        })
    }

    /// Whitespace tokens with their byte intervals.
    pub fn tokens(&self) -> &[Token] {
        self.tokens.get_or_init(|| tokenize(&self.text))
    }

    /// Tokens touched by a char interval, if any.
    pub fn token_interval(&self, interval: &CharInterval) -> Option<TokenInterval> {
        if interval.is_empty() {
            return None;
        }

        let tokens = self.tokens();
        let first = tokens
            .iter()
            .position(|t| t.interval.end > interval.start)?;
        let last = tokens
            .iter()
            .rposition(|t| t.interval.start < interval.end)?;

        if first > last {
            return None;
        }

        Some(TokenInterval {
            start: first,
            end: last + 1,
        })
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("id", &self.id())
            .field("len", &self.text.len())
            .field("has_context", &self.additional_context.is_some())
            .finish()
    }
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text && self.additional_context == other.additional_context
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Document", 3)?;
        state.serialize_field("id", self.id())?;
        state.serialize_field("text", &self.text)?;
        state.serialize_field("additional_context", &self.additional_context)?;
        state.end()
    }
}

fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;

    for (pos, ch) in text.char_indices() {
        match (ch.is_whitespace(), start) {
            (true, Some(s)) => {
                tokens.push(Token {
                    index: tokens.len(),
                    interval: CharInterval::new(s, pos),
                });
                start = None;
            }
            (false, None) => start = Some(pos),
            _ => {}
        }
    }

    if let Some(s) = start {
        tokens.push(Token {
            index: tokens.len(),
            interval: CharInterval::new(s, text.len()),
        });
    }

    tokens
}

/// The sealed output of the pipeline: a document and its grounded extractions.
///
/// Consumers only get shared access; nothing here can be mutated once built.
#[derive(Debug, Clone, Serialize)]
pub struct AnnotatedDocument {
    document: Document,
    extractions: Vec<Extraction>,
}

impl AnnotatedDocument {
    pub fn new(document: Document, extractions: Vec<Extraction>) -> Self {
        Self {
            document,
            extractions,
        }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn text(&self) -> &str {
        self.document.text()
    }

    pub fn extractions(&self) -> &[Extraction] {
        &self.extractions
    }

    /// Extractions anchored to a span of the text.
    pub fn grounded(&self) -> impl Iterator<Item = &Extraction> {
        self.extractions.iter().filter(|e| e.char_interval.is_some())
    }
}
