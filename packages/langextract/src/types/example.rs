//! Few-shot examples shown to the model.

use serde::{Deserialize, Serialize};

use crate::types::extraction::Extraction;

/// A worked example: input text and the extractions expected from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExampleData {
    pub text: String,
    pub extractions: Vec<Extraction>,
}

impl ExampleData {
    pub fn new(text: impl Into<String>, extractions: Vec<Extraction>) -> Self {
        Self {
            text: text.into(),
            extractions,
        }
    }
}
