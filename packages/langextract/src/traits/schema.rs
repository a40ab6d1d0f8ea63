//! Schema validation boundary.

use indexmap::{IndexMap, IndexSet};

use crate::error::SchemaError;
use crate::types::extraction::Extraction;

/// Validates extractions against an output schema.
///
/// Consumed by the pipeline's validation stage. Rejected extractions are
/// dropped and reported, never fatal.
pub trait SchemaValidator: Send + Sync {
    fn validate_extraction(&self, extraction: &Extraction) -> Result<(), SchemaError>;
}

/// A minimal schema: the allowed classes and their required attributes.
#[derive(Debug, Clone, Default)]
pub struct ClassSchema {
    classes: IndexMap<String, IndexSet<String>>,
}

impl ClassSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow a class with no required attributes.
    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.classes.entry(class.into()).or_default();
        self
    }

    /// Allow a class and require the given attribute keys on it.
    pub fn with_required(
        mut self,
        class: impl Into<String>,
        attributes: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.classes
            .entry(class.into())
            .or_default()
            .extend(attributes.into_iter().map(Into::into));
        self
    }

    /// Allowed class names, in declaration order.
    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }
}

impl SchemaValidator for ClassSchema {
    fn validate_extraction(&self, extraction: &Extraction) -> Result<(), SchemaError> {
        let required = self
            .classes
            .get(&extraction.class)
            .ok_or_else(|| SchemaError::UnknownClass {
                class: extraction.class.clone(),
            })?;

        for attribute in required {
            if !extraction.attributes.contains_key(attribute) {
                return Err(SchemaError::MissingAttribute {
                    class: extraction.class.clone(),
                    attribute: attribute.clone(),
                });
            }
        }

        Ok(())
    }
}
