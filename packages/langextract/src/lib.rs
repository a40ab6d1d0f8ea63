//! Grounded Entity Extraction Library
//!
//! Extracts structured entities from unstructured text with language models
//! and anchors every extracted fragment to its exact location in the source.
//!
//! # Design Philosophy
//!
//! **"Every extraction points back at the text"**
//!
//! - Model output is never trusted blindly: it is aligned against the source
//! - Exact matches first, then normalized, then approximate
//! - Provider failures are retried and failed over, never silently dropped
//! - Partial results survive fatal errors
//! - Library handles mechanics, app handles vendors and rendering
//!
//! # Usage
//!
//! ```rust,ignore
//! use langextract::{ExtractionPipeline, ExtractionRequest, PipelineConfig, ProviderGateway};
//! use langextract::testing::MockProvider;
//!
//! let gateway = ProviderGateway::new(GatewayConfig::default())
//!     .with_provider(ProviderKind::Gemini, Arc::new(MockProvider::new()), ModelConfig::new("gemini-2.5-flash"));
//! let pipeline = ExtractionPipeline::new(Arc::new(gateway), PipelineConfig::default());
//!
//! let request = ExtractionRequest::from_text("John Smith works at Google Inc.", "Extract people and companies.");
//! let response = pipeline.execute(request).await?;
//!
//! for extraction in response.extractions() {
//!     println!("{} {:?} {:?}", extraction.class, extraction.char_interval, extraction.alignment_status);
//! }
//! ```
//!
//! # Modules
//!
//! - [`traits`] - Core trait abstractions (LanguageModel, SchemaValidator)
//! - [`types`] - Documents, extractions, requests, responses and configs
//! - [`align`] - Text alignment engine
//! - [`gateway`] - Provider gateway with retry and failover
//! - [`pipeline`] - Extraction pipeline, engine and batch runner
//! - [`testing`] - Mock implementations for testing

pub mod align;
pub mod error;
pub mod gateway;
pub mod pipeline;
pub mod testing;
pub mod traits;
pub mod types;

// Re-export core types at crate root
pub use error::{
    ExtractionError, GatewayError, PipelineError, ProviderError, Result, SchemaError,
};
pub use traits::{
    provider::{LanguageModel, ModelConfig, ModelOutput, ProviderKind},
    schema::{ClassSchema, SchemaValidator},
};
pub use types::{
    config::{AlignmentOptions, BatchConfig, GatewayConfig, OverlapStrategy, PipelineConfig},
    document::{AnnotatedDocument, CharInterval, Document, Token, TokenInterval},
    example::ExampleData,
    extraction::{AlignmentResult, AlignmentStatus, Extraction, WELL_GROUNDED_QUALITY},
    request::{
        DebugStep, ExecutionMetadata, ExtractionProgress, ExtractionRequest, ExtractionResponse,
        FailoverEvent, ProgressCallback, QualityMetrics, Stage, StepStatus, ValidationIssue,
    },
};

// Re-export alignment
pub use align::{
    align_extraction, align_extractions, find_best_alignment, validate_alignment, TextAligner,
};

// Re-export gateway
pub use gateway::{GatewayRequest, GatewayResponse, ProviderGateway, ProviderHealth, ProviderTarget};

// Re-export pipeline components
pub use pipeline::{
    // Orchestration
    run_batch, ActiveRequest, BatchItem, BatchOutcome, BatchReport, ExtractionEngine,
    ExtractionPipeline,
    // Aggregation
    deduplicate, filter_by_confidence, resolve_overlaps,
    // Prompting and parsing
    chunk_text, format_extract_prompt, parse_extractions, TextChunk,
};

// Re-export testing utilities
pub use testing::{MockCall, MockOutcome, MockProvider};
