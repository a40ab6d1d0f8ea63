//! Extraction pipeline - the core of the library.
//!
//! The pipeline orchestrates:
//! - Request validation and document preparation (chunking)
//! - Multi-pass extraction through the provider gateway
//! - Response parsing and alignment against the source text
//! - Deduplication, overlap resolution and confidence filtering
//! - Schema validation and finalization
//!
//! [`ExtractionEngine`] runs many requests at once with progress reporting;
//! [`run_batch`] fans a list of requests out under a concurrency limit.

pub mod aggregate;
pub mod batch;
pub mod chunking;
pub mod engine;
pub mod executor;
pub mod parse;
pub mod prompts;

pub use aggregate::{deduplicate, filter_by_confidence, resolve_overlaps};
pub use batch::{run_batch, BatchItem, BatchOutcome, BatchReport};
pub use chunking::{chunk_text, TextChunk};
pub use engine::{ActiveRequest, ExtractionEngine, DEFAULT_PROGRESS_INTERVAL};
pub use executor::ExtractionPipeline;
pub use parse::parse_extractions;
pub use prompts::{format_extract_prompt, EXTRACT_PROMPT};
