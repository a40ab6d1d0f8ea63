//! Split long documents into bounded chunks.
//!
//! Chunks are contiguous and non-overlapping: concatenated in order they give
//! back the document. Each chunk remembers its byte offset, which the
//! pipeline uses as the alignment hint for extractions from that chunk.

/// A slice of the document sent as one provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextChunk<'a> {
    pub index: usize,

    /// Byte offset of the chunk in the document
    pub start: usize,

    pub text: &'a str,
}

impl TextChunk<'_> {
    pub fn end(&self) -> usize {
        self.start + self.text.len()
    }
}

/// Split `text` into chunks of at most `max_bytes` bytes.
///
/// Cuts prefer the last newline in the window, then the last whitespace.
/// A window with neither is cut at the nearest char boundary. `None` or a
/// text that already fits yields a single chunk.
pub fn chunk_text(text: &str, max_bytes: Option<usize>) -> Vec<TextChunk<'_>> {
    let max = match max_bytes {
        Some(max) if max > 0 && text.len() > max => max,
        _ => {
            return vec![TextChunk {
                index: 0,
                start: 0,
                text,
            }]
        }
    };

    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < text.len() {
        let end = cut_point(text, start, max);
        chunks.push(TextChunk {
            index: chunks.len(),
            start,
            text: &text[start..end],
        });
        start = end;
    }

    chunks
}

fn cut_point(text: &str, start: usize, max: usize) -> usize {
    let limit = start + max;
    if limit >= text.len() {
        return text.len();
    }

    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }

    if end == start {
        // A single char wider than the budget
        return start + text[start..].chars().next().map_or(1, char::len_utf8);
    }

    let window = &text[start..end];
    let boundary = window
        .rfind('\n')
        .or_else(|| window.rfind(char::is_whitespace))
        .filter(|&pos| pos > 0);

    match boundary {
        Some(pos) => {
            let width = window[pos..].chars().next().map_or(1, char::len_utf8);
            start + pos + width
        }
        None => end,
    }
}
