//! Text normalization that remembers where every byte came from.

use crate::types::document::CharInterval;

/// Which normalizations to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Normalization {
    pub fold_case: bool,
    pub collapse_whitespace: bool,
    pub strip_punctuation: bool,
}

impl Normalization {
    pub const NONE: Normalization = Normalization {
        fold_case: false,
        collapse_whitespace: false,
        strip_punctuation: false,
    };

    pub fn fold_only() -> Self {
        Self {
            fold_case: true,
            ..Self::NONE
        }
    }

    /// Number of normalizations turned on.
    pub fn applied(&self) -> u32 {
        self.fold_case as u32 + self.collapse_whitespace as u32 + self.strip_punctuation as u32
    }
}

/// Normalized text with a byte-level map back into the original.
///
/// `starts[i]..ends[i]` is the original span that produced normalized byte
/// `i`. A collapsed whitespace run maps to the whole run.
#[derive(Debug, Clone)]
pub(crate) struct NormalizedText {
    text: String,
    starts: Vec<usize>,
    ends: Vec<usize>,
}

impl NormalizedText {
    pub fn build(source: &str, norm: Normalization) -> Self {
        let mut text = String::with_capacity(source.len());
        let mut starts = Vec::with_capacity(source.len());
        let mut ends = Vec::with_capacity(source.len());
        let mut in_space = false;

        for (pos, ch) in source.char_indices() {
            let end = pos + ch.len_utf8();

            if norm.collapse_whitespace && ch.is_whitespace() {
                if in_space {
                    if let Some(last) = ends.last_mut() {
                        *last = end;
                    }
                } else {
                    text.push(' ');
                    starts.push(pos);
                    ends.push(end);
                    in_space = true;
                }
                continue;
            }

            if norm.strip_punctuation && is_punctuation(ch) {
                continue;
            }

            in_space = false;

            if norm.fold_case {
                for lower in ch.to_lowercase() {
                    push_char(&mut text, &mut starts, &mut ends, lower, pos, end);
                }
            } else {
                push_char(&mut text, &mut starts, &mut ends, ch, pos, end);
            }
        }

        Self { text, starts, ends }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Map a normalized byte range back to the original text.
    pub fn original_span(&self, start: usize, end: usize) -> Option<CharInterval> {
        if start >= end || end > self.text.len() {
            return None;
        }
        Some(CharInterval::new(self.starts[start], self.ends[end - 1]))
    }

    /// First normalized byte produced at or after an original offset.
    pub fn normalized_position(&self, original: usize) -> usize {
        self.starts.partition_point(|&s| s < original)
    }
}

fn push_char(
    text: &mut String,
    starts: &mut Vec<usize>,
    ends: &mut Vec<usize>,
    ch: char,
    start: usize,
    end: usize,
) {
    text.push(ch);
    for _ in 0..ch.len_utf8() {
        starts.push(start);
        ends.push(end);
    }
}

/// Anything that is neither a letter, a digit, nor whitespace.
pub(crate) fn is_punctuation(ch: char) -> bool {
    !ch.is_alphanumeric() && !ch.is_whitespace()
}

/// Normalize a needle: the same transformation as the haystack, trimmed.
pub(crate) fn normalize_needle(needle: &str, norm: Normalization) -> String {
    let normalized = NormalizedText::build(needle, norm);
    normalized.as_str().trim().to_string()
}

/// Byte offset of the occurrence of `needle` preferred for a hint.
///
/// Without a hint, the first occurrence. With one, the occurrence nearest
/// to it; ties go to the earlier position.
pub(crate) fn find_occurrence(haystack: &str, needle: &str, hint: Option<usize>) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }

    let Some(hint) = hint else {
        return haystack.find(needle);
    };

    let mut best: Option<(usize, usize)> = None;
    let mut from = 0;

    while let Some(offset) = haystack[from..].find(needle) {
        let pos = from + offset;
        let distance = pos.abs_diff(hint);

        match best {
            Some((best_distance, _)) if distance >= best_distance => {
                // Occurrences only move further from the hint from here on
                if pos >= hint {
                    break;
                }
            }
            _ => best = Some((distance, pos)),
        }

        let step = haystack[pos..].chars().next().map_or(1, char::len_utf8);
        from = pos + step;
        if from >= haystack.len() {
            break;
        }
    }

    best.map(|(_, pos)| pos)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all() -> Normalization {
        Normalization {
            fold_case: true,
            collapse_whitespace: true,
            strip_punctuation: true,
        }
    }

    #[test]
    fn test_fold_case_maps_offsets() {
        let normalized = NormalizedText::build("Hello World", Normalization::fold_only());
        assert_eq!(normalized.as_str(), "hello world");

        let pos = normalized.as_str().find("world").unwrap();
        let span = normalized.original_span(pos, pos + 5).unwrap();
        assert_eq!(span, CharInterval::new(6, 11));
    }

    #[test]
    fn test_collapse_whitespace_maps_runs() {
        let source = "John \n\t Smith";
        let normalized = NormalizedText::build(
            source,
            Normalization {
                collapse_whitespace: true,
                ..Normalization::NONE
            },
        );
        assert_eq!(normalized.as_str(), "John Smith");

        let span = normalized.original_span(0, 10).unwrap();
        assert_eq!(span.slice(source), Some(source));
    }

    #[test]
    fn test_strip_punctuation() {
        let normalized = NormalizedText::build("Dr. Smith, M.D.", all());
        assert_eq!(normalized.as_str(), "dr smith md");
    }

    #[test]
    fn test_multibyte_fold() {
        let source = "Straße ÉCOLE";
        let normalized = NormalizedText::build(source, Normalization::fold_only());
        let pos = normalized.as_str().find("école").unwrap();
        let span = normalized
            .original_span(pos, pos + "école".len())
            .unwrap();
        assert_eq!(span.slice(source), Some("ÉCOLE"));
    }

    #[test]
    fn test_normalize_needle_trims() {
        assert_eq!(normalize_needle("  Google   Inc. ", all()), "google inc");
    }

    #[test]
    fn test_find_occurrence_prefers_hint() {
        let haystack = "cat dog cat dog cat";
        assert_eq!(find_occurrence(haystack, "cat", None), Some(0));
        assert_eq!(find_occurrence(haystack, "cat", Some(9)), Some(8));
        assert_eq!(find_occurrence(haystack, "cat", Some(100)), Some(16));
        // Equidistant: earlier wins
        assert_eq!(find_occurrence("ab ab", "ab", Some(1)), Some(0));
        assert_eq!(find_occurrence(haystack, "bird", Some(3)), None);
    }

    #[test]
    fn test_find_occurrence_overlapping() {
        assert_eq!(find_occurrence("aaaa", "aa", Some(2)), Some(2));
    }
}
