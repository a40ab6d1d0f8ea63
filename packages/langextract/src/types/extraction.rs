//! Core extraction types - the unit the pipeline parses, aligns, and filters.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::document::{CharInterval, TokenInterval};

/// Quality at or above which an alignment counts as well grounded.
pub const WELL_GROUNDED_QUALITY: f64 = 60.0;

/// How an extraction's text was located in the source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlignmentStatus {
    /// Verbatim substring of the source
    Exact,

    /// Matched after case folding
    FuzzyCase,

    /// Matched after whitespace (and possibly punctuation) normalization
    FuzzyWhitespace,

    /// Matched within an edit-distance budget
    FuzzyApproximate,

    /// Not found in the source
    #[serde(rename = "NONE")]
    Unaligned,
}

impl AlignmentStatus {
    /// Nominal quality of the status.
    ///
    /// Approximate matches carry their own score on [`AlignmentResult`];
    /// the value here is the lowest score an approximate match can be
    /// accepted with under default options.
    pub fn quality(&self) -> f64 {
        match self {
            Self::Exact => 100.0,
            Self::FuzzyCase => 85.0,
            Self::FuzzyWhitespace => 70.0,
            Self::FuzzyApproximate => WELL_GROUNDED_QUALITY,
            Self::Unaligned => 0.0,
        }
    }

    pub fn is_aligned(&self) -> bool {
        !matches!(self, Self::Unaligned)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "EXACT",
            Self::FuzzyCase => "FUZZY_CASE",
            Self::FuzzyWhitespace => "FUZZY_WHITESPACE",
            Self::FuzzyApproximate => "FUZZY_APPROXIMATE",
            Self::Unaligned => "NONE",
        }
    }
}

impl fmt::Display for AlignmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of aligning one piece of text.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlignmentResult {
    pub status: AlignmentStatus,

    /// Match quality in `[0, 100]`
    pub quality: f64,

    /// Edit distance of approximate matches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edit_distance: Option<usize>,
}

impl AlignmentResult {
    pub fn new(status: AlignmentStatus, quality: f64) -> Self {
        Self {
            status,
            quality: quality.clamp(0.0, 100.0),
            edit_distance: None,
        }
    }

    pub fn unaligned() -> Self {
        Self::new(AlignmentStatus::Unaligned, 0.0)
    }

    pub fn is_well_grounded(&self) -> bool {
        self.status.is_aligned() && self.quality >= WELL_GROUNDED_QUALITY
    }

    /// Quality as a fraction in `[0, 1]`.
    pub fn confidence(&self) -> f64 {
        self.quality / 100.0
    }
}

/// One candidate entity extracted from a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    /// Entity class, e.g. "PERSON"
    #[serde(rename = "extraction_class")]
    pub class: String,

    /// Text as produced by the model
    #[serde(rename = "extraction_text")]
    pub text: String,

    /// Where the text sits in the source, once aligned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub char_interval: Option<CharInterval>,

    /// Token span matching `char_interval`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_interval: Option<TokenInterval>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alignment_status: Option<AlignmentStatus>,

    /// Quality of the alignment in `[0, 100]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alignment_quality: Option<f64>,

    /// Model-reported confidence in `[0, 1]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,

    /// Position within the response it was parsed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,

    /// Zero-based pass the extraction came from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_index: Option<usize>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub attributes: IndexMap<String, serde_json::Value>,
}

impl Extraction {
    /// Create an unaligned extraction.
    pub fn new(class: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            text: text.into(),
            char_interval: None,
            token_interval: None,
            alignment_status: None,
            alignment_quality: None,
            confidence: None,
            index: None,
            group_index: None,
            attributes: IndexMap::new(),
        }
    }

    /// Set the model-reported confidence.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Set an attribute.
    pub fn with_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Anchor to a span (test and example convenience).
    pub fn with_interval(mut self, start: usize, end: usize) -> Self {
        self.char_interval = Some(CharInterval::new(start, end));
        self
    }

    /// Record an alignment outcome.
    ///
    /// Unaligned results clear the interval so the extraction reads as
    /// unanchored downstream.
    pub fn apply_alignment(&mut self, interval: CharInterval, result: AlignmentResult) {
        self.alignment_status = Some(result.status);
        self.alignment_quality = Some(result.quality);
        self.char_interval = if result.status.is_aligned() {
            Some(interval)
        } else {
            None
        };
        self.token_interval = None;
    }

    /// Whether the extraction is anchored to a span of the source.
    pub fn is_grounded(&self) -> bool {
        self.char_interval.is_some()
    }

    /// Confidence used for comparisons; missing confidence ranks as 0.
    pub fn confidence_or_zero(&self) -> f64 {
        self.confidence.unwrap_or(0.0)
    }

    /// Key under which duplicates collapse.
    pub fn dedup_key(&self) -> (&str, &str) {
        (&self.class, &self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_upper_snake() {
        let json = serde_json::to_string(&AlignmentStatus::FuzzyCase).unwrap();
        assert_eq!(json, "\"FUZZY_CASE\"");

        let json = serde_json::to_string(&AlignmentStatus::Unaligned).unwrap();
        assert_eq!(json, "\"NONE\"");
    }

    #[test]
    fn test_well_grounded_threshold() {
        assert!(AlignmentResult::new(AlignmentStatus::Exact, 100.0).is_well_grounded());
        assert!(AlignmentResult::new(AlignmentStatus::FuzzyWhitespace, 70.0).is_well_grounded());
        assert!(!AlignmentResult::new(AlignmentStatus::FuzzyWhitespace, 55.0).is_well_grounded());
        assert!(!AlignmentResult::unaligned().is_well_grounded());
    }

    #[test]
    fn test_apply_unaligned_clears_interval() {
        let mut extraction = Extraction::new("PERSON", "Nobody").with_interval(0, 6);
        extraction.apply_alignment(CharInterval::empty(), AlignmentResult::unaligned());

        assert!(!extraction.is_grounded());
        assert_eq!(extraction.alignment_status, Some(AlignmentStatus::Unaligned));
    }

    #[test]
    fn test_extraction_json_shape() {
        let extraction = Extraction::new("ORG", "Google Inc.")
            .with_confidence(0.9)
            .with_attribute("kind", "company");

        let value = serde_json::to_value(&extraction).unwrap();
        assert_eq!(value["extraction_class"], "ORG");
        assert_eq!(value["extraction_text"], "Google Inc.");
        assert_eq!(value["attributes"]["kind"], "company");
        assert!(value.get("char_interval").is_none());
    }
}
