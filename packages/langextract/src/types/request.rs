//! Request and response types for one pipeline invocation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::traits::provider::ProviderKind;
use crate::traits::schema::SchemaValidator;
use crate::types::{
    document::{AnnotatedDocument, Document},
    example::ExampleData,
    extraction::Extraction,
};

/// Callback receiving periodic progress snapshots.
///
/// Called from a background task; implementations must not block.
pub type ProgressCallback = Arc<dyn Fn(ExtractionProgress) + Send + Sync>;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Initialization,
    Preprocessing,
    Extraction,
    Aggregation,
    Validation,
    Finalization,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialization => "initialization",
            Self::Preprocessing => "preprocessing",
            Self::Extraction => "extraction",
            Self::Aggregation => "aggregation",
            Self::Validation => "validation",
            Self::Finalization => "finalization",
        }
    }

    /// Overall progress fraction at the start of this stage.
    pub fn start_fraction(&self) -> f64 {
        match self {
            Self::Initialization => 0.0,
            Self::Preprocessing => 0.05,
            Self::Extraction => 0.1,
            Self::Aggregation => 0.85,
            Self::Validation => 0.9,
            Self::Finalization => 0.95,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one traced pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Warning,
    Error,
    Skipped,
}

/// One entry in a response's debug trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugStep {
    pub stage: Stage,
    pub status: StepStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
}

/// A switch from one provider to the next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailoverEvent {
    pub original_provider: String,
    pub reason: String,
    pub fallback_provider: String,

    /// Whether the fallback provider went on to succeed
    pub success: bool,

    pub timestamp: DateTime<Utc>,
}

/// A periodic progress snapshot for one request.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionProgress {
    pub request_id: Uuid,
    pub stage: Stage,

    /// Overall progress in `[0, 1]`
    pub progress: f64,

    pub elapsed: Duration,
    pub current_pass: u32,
    pub total_passes: u32,
    pub chunks_processed: usize,
    pub total_chunks: usize,
}

impl ExtractionProgress {
    pub fn new(request_id: Uuid) -> Self {
        Self {
            request_id,
            stage: Stage::Initialization,
            progress: 0.0,
            elapsed: Duration::ZERO,
            current_pass: 0,
            total_passes: 0,
            chunks_processed: 0,
            total_chunks: 0,
        }
    }
}

/// One unit of pipeline work.
///
/// Exactly one of `document` or `text` must be set.
pub struct ExtractionRequest {
    pub id: Uuid,
    pub document: Option<Document>,
    pub text: Option<String>,
    pub task_description: String,
    pub examples: Vec<ExampleData>,
    pub schema: Option<Arc<dyn SchemaValidator>>,
    pub validate_output: bool,
    pub provider: Option<ProviderKind>,
    pub model_id: Option<String>,
    pub retry_count: Option<u32>,
    pub pass_count: Option<u32>,
    pub multi_pass: Option<bool>,
    pub max_char_buffer: Option<usize>,

    /// Overall deadline for the request, measured from when it starts
    pub timeout: Option<Duration>,

    pub cancel: CancellationToken,
    pub progress: Option<ProgressCallback>,
}

impl ExtractionRequest {
    fn empty(task_description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            document: None,
            text: None,
            task_description: task_description.into(),
            examples: Vec::new(),
            schema: None,
            validate_output: false,
            provider: None,
            model_id: None,
            retry_count: None,
            pass_count: None,
            multi_pass: None,
            max_char_buffer: None,
            timeout: None,
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    /// Request extraction from raw text.
    pub fn from_text(text: impl Into<String>, task_description: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::empty(task_description)
        }
    }

    /// Request extraction from an existing document.
    pub fn from_document(document: Document, task_description: impl Into<String>) -> Self {
        Self {
            document: Some(document),
            ..Self::empty(task_description)
        }
    }

    /// Add few-shot examples.
    pub fn with_examples(mut self, examples: impl IntoIterator<Item = ExampleData>) -> Self {
        self.examples.extend(examples);
        self
    }

    /// Validate surviving extractions against a schema.
    pub fn with_schema(mut self, schema: Arc<dyn SchemaValidator>) -> Self {
        self.schema = Some(schema);
        self.validate_output = true;
        self
    }

    /// Prefer a provider (and optionally a model) for this request.
    pub fn with_provider(mut self, provider: ProviderKind, model_id: Option<String>) -> Self {
        self.provider = Some(provider);
        self.model_id = model_id;
        self
    }

    /// Set retries per provider.
    pub fn with_retry_count(mut self, retries: u32) -> Self {
        self.retry_count = Some(retries);
        self
    }

    /// Set the number of passes.
    pub fn with_pass_count(mut self, passes: u32) -> Self {
        self.pass_count = Some(passes);
        self
    }

    /// Override the pipeline's multi-pass setting.
    pub fn with_multi_pass(mut self, enabled: bool) -> Self {
        self.multi_pass = Some(enabled);
        self
    }

    /// Chunk documents longer than `max` bytes.
    pub fn with_max_char_buffer(mut self, max: usize) -> Self {
        self.max_char_buffer = Some(max);
        self
    }

    /// Set the overall deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Use a caller-owned cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Receive progress snapshots while the request runs on an engine.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }
}

impl fmt::Debug for ExtractionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionRequest")
            .field("id", &self.id)
            .field("document", &self.document)
            .field("text_len", &self.text.as_ref().map(|t| t.len()))
            .field("task_description", &self.task_description)
            .field("examples", &self.examples.len())
            .field("has_schema", &self.schema.is_some())
            .field("validate_output", &self.validate_output)
            .field("provider", &self.provider)
            .field("model_id", &self.model_id)
            .field("retry_count", &self.retry_count)
            .field("pass_count", &self.pass_count)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Who ran the request and what it cost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    pub provider_used: Option<String>,
    pub model_used: Option<String>,
    pub tokens_used: u64,
    pub passes_planned: u32,
    pub passes_completed: u32,
    pub chunks_processed: usize,
    pub failover_events: Vec<FailoverEvent>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Summary numbers over the final extraction set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub extraction_count: usize,
    pub grounded_count: usize,

    /// Share of document bytes covered by grounded extractions
    pub text_coverage: f64,

    /// Mean over extractions that carry a confidence
    pub mean_confidence: f64,
}

/// An extraction dropped by schema validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub class: String,
    pub text: String,
    pub error: String,
}

/// Everything a pipeline invocation produced.
///
/// Built only by the pipeline; consumers get read-only access.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionResponse {
    pub(crate) request_id: Uuid,
    pub(crate) extractions: Vec<Extraction>,
    pub(crate) annotated: Option<AnnotatedDocument>,
    pub(crate) metadata: ExecutionMetadata,
    pub(crate) metrics: QualityMetrics,
    pub(crate) validation_errors: Vec<ValidationIssue>,
    pub(crate) warnings: Vec<String>,
    pub(crate) trace: Vec<DebugStep>,
    pub(crate) error: Option<String>,
}

impl ExtractionResponse {
    pub(crate) fn new(request_id: Uuid) -> Self {
        Self {
            request_id,
            extractions: Vec::new(),
            annotated: None,
            metadata: ExecutionMetadata {
                provider_used: None,
                model_used: None,
                tokens_used: 0,
                passes_planned: 0,
                passes_completed: 0,
                chunks_processed: 0,
                failover_events: Vec::new(),
                started_at: Utc::now(),
                finished_at: None,
            },
            metrics: QualityMetrics::default(),
            validation_errors: Vec::new(),
            warnings: Vec::new(),
            trace: Vec::new(),
            error: None,
        }
    }

    pub(crate) fn record(
        &mut self,
        stage: Stage,
        status: StepStatus,
        message: impl Into<String>,
        duration: Duration,
    ) {
        self.trace.push(DebugStep {
            stage,
            status,
            message: message.into(),
            timestamp: Utc::now(),
            duration_ms: duration.as_millis() as u64,
        });
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Extractions accumulated so far (final set on success).
    pub fn extractions(&self) -> &[Extraction] {
        &self.extractions
    }

    /// The sealed output; present only after finalization.
    pub fn annotated_document(&self) -> Option<&AnnotatedDocument> {
        self.annotated.as_ref()
    }

    pub fn metadata(&self) -> &ExecutionMetadata {
        &self.metadata
    }

    pub fn metrics(&self) -> &QualityMetrics {
        &self.metrics
    }

    pub fn validation_errors(&self) -> &[ValidationIssue] {
        &self.validation_errors
    }

    /// Non-fatal problems, such as a failed later pass.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn trace(&self) -> &[DebugStep] {
        &self.trace
    }

    /// The fatal error message, if the pipeline stopped early.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_successful(&self) -> bool {
        self.error.is_none()
    }

    /// Trace entry for a stage, if it ran.
    pub fn step(&self, stage: Stage) -> Option<&DebugStep> {
        self.trace.iter().find(|s| s.stage == stage)
    }
}
