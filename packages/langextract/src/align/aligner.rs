//! The text aligner: locate model output in the source document.

use std::ops::Range;
use std::time::Instant;
use tracing::{debug, trace};

use crate::align::approximate::{edit_distance, WindowSearch};
use crate::align::normalize::{find_occurrence, normalize_needle, NormalizedText, Normalization};
use crate::types::{
    config::AlignmentOptions,
    document::CharInterval,
    extraction::{AlignmentResult, AlignmentStatus, Extraction},
};

/// Quality lost per normalization applied.
const QUALITY_STEP: f64 = 15.0;

/// A match produced by one strategy.
type Aligned = (CharInterval, AlignmentResult);

/// Locates extracted text within a source document.
///
/// Alignment never fails: text that cannot be found comes back as
/// [`AlignmentStatus::Unaligned`] with the empty interval.
#[derive(Debug, Clone, Default)]
pub struct TextAligner {
    options: AlignmentOptions,
}

impl TextAligner {
    pub fn new(options: AlignmentOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &AlignmentOptions {
        &self.options
    }

    /// Align one piece of text, taking the first strategy that matches.
    pub fn align(&self, extracted: &str, source: &str) -> Aligned {
        self.align_near(extracted, source, None)
    }

    /// Align with a position hint (a byte offset into `source`).
    ///
    /// Exact and normalized matches prefer the occurrence nearest the hint.
    /// Approximate matching searches around the hint first and the whole
    /// document if nothing turns up nearby.
    pub fn align_near(&self, extracted: &str, source: &str, hint: Option<usize>) -> Aligned {
        let deadline = self.deadline();

        if let Some(found) = self.exact(extracted, source, hint) {
            return found;
        }

        for (norm, status) in self.fuzzy_levels() {
            if let Some(found) = self.normalized(extracted, source, hint, norm, status) {
                return found;
            }
        }

        if self.options.enable_approximate {
            if let Some(found) = self.approximate(extracted, source, hint, deadline) {
                return found;
            }
        }

        trace!(text = %extracted, "No alignment found");
        (CharInterval::empty(), AlignmentResult::unaligned())
    }

    /// Try every strategy and keep the highest-quality match.
    ///
    /// Ties go to the earlier (stricter) strategy.
    pub fn find_best_alignment(&self, extracted: &str, source: &str, hint: Option<usize>) -> Aligned {
        let deadline = self.deadline();
        let mut best: Option<Aligned> = self.exact(extracted, source, hint);

        for (norm, status) in self.fuzzy_levels() {
            let candidate = self.normalized(extracted, source, hint, norm, status);
            best = keep_better(best, candidate);
        }

        if self.options.enable_approximate {
            let candidate = self.approximate(extracted, source, hint, deadline);
            best = keep_better(best, candidate);
        }

        best.unwrap_or_else(|| (CharInterval::empty(), AlignmentResult::unaligned()))
    }

    /// Align extractions in order, each one hinted by the previous match.
    pub fn align_extractions(&self, extractions: &mut [Extraction], source: &str) {
        self.align_extractions_from(extractions, source, None);
    }

    /// Batch alignment starting from an initial hint (e.g. a chunk start).
    pub fn align_extractions_from(
        &self,
        extractions: &mut [Extraction],
        source: &str,
        start_hint: Option<usize>,
    ) {
        let mut hint = start_hint;
        let mut aligned = 0usize;

        for extraction in extractions.iter_mut() {
            let (interval, result) = self.align_near(&extraction.text, source, hint);
            if result.status.is_aligned() {
                hint = Some(interval.end);
                aligned += 1;
            }
            extraction.apply_alignment(interval, result);
        }

        debug!(
            total = extractions.len(),
            aligned = aligned,
            "Aligned extraction batch"
        );
    }

    /// Batch alignment scoped to the byte range a model actually saw.
    ///
    /// Each extraction is searched for inside `window` first; the whole
    /// document is only searched when nothing in the window matches.
    /// Returned intervals are always relative to `source`.
    pub fn align_extractions_within(
        &self,
        extractions: &mut [Extraction],
        source: &str,
        window: Range<usize>,
    ) {
        let Some(scope) = source.get(window.clone()) else {
            return self.align_extractions_from(extractions, source, Some(window.start));
        };

        // Relative to `scope`
        let mut hint: Option<usize> = None;
        let mut outside = 0usize;

        for extraction in extractions.iter_mut() {
            let (local, local_result) = self.align_near(&extraction.text, scope, hint);
            let (interval, result) = if local_result.status.is_aligned() {
                (
                    CharInterval::new(local.start + window.start, local.end + window.start),
                    local_result,
                )
            } else {
                let absolute = hint.map_or(window.start, |h| h + window.start);
                let found = self.align_near(&extraction.text, source, Some(absolute));
                if found.1.status.is_aligned() {
                    outside += 1;
                }
                found
            };

            if result.status.is_aligned() {
                hint = Some(interval.end.saturating_sub(window.start).min(scope.len()));
            }
            extraction.apply_alignment(interval, result);
        }

        debug!(
            total = extractions.len(),
            window_start = window.start,
            window_end = window.end,
            outside_window = outside,
            "Aligned extraction batch within window"
        );
    }

    /// How well `extracted` matches the source text at `interval`, in `[0, 1]`.
    pub fn validate_alignment(&self, extracted: &str, source: &str, interval: &CharInterval) -> f64 {
        let Some(slice) = interval.slice(source) else {
            return 0.0;
        };

        if slice == extracted {
            return 1.0;
        }

        let norm = Normalization {
            fold_case: self.options.fold_case,
            collapse_whitespace: self.options.collapse_whitespace,
            strip_punctuation: false,
        };
        let a: Vec<char> = normalize_needle(extracted, norm).chars().collect();
        let b: Vec<char> = normalize_needle(slice, norm).chars().collect();

        let longest = a.len().max(b.len());
        if longest == 0 {
            return 0.0;
        }

        1.0 - edit_distance(&a, &b) as f64 / longest as f64
    }

    fn exact(&self, extracted: &str, source: &str, hint: Option<usize>) -> Option<Aligned> {
        let needle = extracted.trim();
        if needle.is_empty() {
            return None;
        }

        let interval = if self.options.case_sensitive {
            let pos = find_occurrence(source, needle, hint)?;
            CharInterval::new(pos, pos + needle.len())
        } else {
            search_normalized(needle, source, hint, Normalization::fold_only())?
        };

        Some((interval, AlignmentResult::new(AlignmentStatus::Exact, 100.0)))
    }

    fn normalized(
        &self,
        extracted: &str,
        source: &str,
        hint: Option<usize>,
        norm: Normalization,
        status: AlignmentStatus,
    ) -> Option<Aligned> {
        let interval = search_normalized(extracted, source, hint, norm)?;
        let quality = 100.0 - QUALITY_STEP * f64::from(norm.applied());
        Some((interval, AlignmentResult::new(status, quality)))
    }

    fn approximate(
        &self,
        extracted: &str,
        source: &str,
        hint: Option<usize>,
        deadline: Option<Instant>,
    ) -> Option<Aligned> {
        let norm = Normalization {
            fold_case: self.options.fold_case,
            collapse_whitespace: self.options.collapse_whitespace,
            strip_punctuation: false,
        };

        let needle: Vec<char> = normalize_needle(extracted, norm).chars().collect();
        let m = needle.len();
        let max_edits = (self.options.max_distance.max(0.0) * m as f64).floor() as usize;
        if m == 0 || max_edits == 0 {
            return None;
        }

        let haystack = NormalizedText::build(source, norm);
        let (hay_chars, byte_offsets) = char_table(haystack.as_str());
        let hint_char = hint.map(|h| {
            let byte = haystack.normalized_position(h);
            byte_offsets.partition_point(|&b| b < byte)
        });

        let search = WindowSearch {
            max_edits,
            tolerance: max_edits,
            hint: hint_char,
            deadline,
        };

        let mut outcome = match hint_char {
            Some(h) => {
                let lo = h.saturating_sub(self.options.window_size);
                let hi = h
                    .saturating_add(self.options.window_size)
                    .saturating_add(m + max_edits);
                search.run(&needle, &hay_chars, lo..hi)
            }
            None => search.run(&needle, &hay_chars, 0..hay_chars.len()),
        };

        if outcome.best.is_none() && hint_char.is_some() && !outcome.timed_out {
            outcome = search.run(&needle, &hay_chars, 0..hay_chars.len());
        }

        if outcome.timed_out {
            debug!(
                text = %extracted,
                found = outcome.best.is_some(),
                "Approximate alignment hit its deadline"
            );
        }

        let best = outcome.best?;
        let quality = 100.0 * (1.0 - best.distance as f64 / m.max(1) as f64);
        if quality / 100.0 < self.options.min_confidence {
            return None;
        }

        let start_byte = byte_offsets[best.start];
        let end_byte = byte_offsets[best.end];
        let interval = haystack.original_span(start_byte, end_byte)?;

        let mut result = AlignmentResult::new(AlignmentStatus::FuzzyApproximate, quality);
        result.edit_distance = Some(best.distance);
        Some((interval, result))
    }

    /// When the current attempt must give up; `None` if the timeout is
    /// too large to represent.
    fn deadline(&self) -> Option<Instant> {
        Instant::now().checked_add(self.options.timeout())
    }

    /// Enabled normalization levels, cumulative, least aggressive first.
    fn fuzzy_levels(&self) -> Vec<(Normalization, AlignmentStatus)> {
        let mut levels = Vec::with_capacity(3);
        let mut norm = Normalization::NONE;

        if self.options.fold_case {
            norm.fold_case = true;
            levels.push((norm, AlignmentStatus::FuzzyCase));
        }
        if self.options.collapse_whitespace {
            norm.collapse_whitespace = true;
            levels.push((norm, AlignmentStatus::FuzzyWhitespace));
        }
        if self.options.strip_punctuation {
            norm.strip_punctuation = true;
            levels.push((norm, AlignmentStatus::FuzzyWhitespace));
        }

        levels
    }
}

/// Substring search after normalizing both sides; maps the hit back.
fn search_normalized(
    extracted: &str,
    source: &str,
    hint: Option<usize>,
    norm: Normalization,
) -> Option<CharInterval> {
    let needle = normalize_needle(extracted, norm);
    if needle.is_empty() {
        return None;
    }

    let haystack = NormalizedText::build(source, norm);
    let hint = hint.map(|h| haystack.normalized_position(h));
    let pos = find_occurrence(haystack.as_str(), &needle, hint)?;
    haystack.original_span(pos, pos + needle.len())
}

/// Chars of `text` plus the byte offset of each char; the final entry is
/// `text.len()` so `offsets[end]` is valid for any window end.
fn char_table(text: &str) -> (Vec<char>, Vec<usize>) {
    let mut chars = Vec::with_capacity(text.len());
    let mut offsets = Vec::with_capacity(text.len() + 1);
    for (pos, ch) in text.char_indices() {
        chars.push(ch);
        offsets.push(pos);
    }
    offsets.push(text.len());
    (chars, offsets)
}

fn keep_better(current: Option<Aligned>, candidate: Option<Aligned>) -> Option<Aligned> {
    match (current, candidate) {
        (Some(cur), Some(cand)) if cand.1.quality > cur.1.quality => Some(cand),
        (None, cand) => cand,
        (cur, _) => cur,
    }
}

/// Align one piece of text with the given options.
pub fn align_extraction(
    extracted: &str,
    source: &str,
    options: &AlignmentOptions,
) -> (CharInterval, AlignmentResult) {
    TextAligner::new(options.clone()).align(extracted, source)
}

/// Align a batch of extractions in place with the given options.
pub fn align_extractions(extractions: &mut [Extraction], source: &str, options: &AlignmentOptions) {
    TextAligner::new(options.clone()).align_extractions(extractions, source);
}

/// Best-scoring alignment across all strategies.
pub fn find_best_alignment(
    extracted: &str,
    source: &str,
    options: &AlignmentOptions,
) -> (CharInterval, AlignmentResult) {
    TextAligner::new(options.clone()).find_best_alignment(extracted, source, None)
}

/// Confidence in `[0, 1]` that `interval` of `source` holds `extracted`.
pub fn validate_alignment(extracted: &str, source: &str, interval: &CharInterval) -> f64 {
    TextAligner::default().validate_alignment(extracted, source, interval)
}
