//! The extraction pipeline.
//!
//! Six stages run in strict sequence, each leaving one entry in the
//! response's debug trace:
//!
//! 1. Initialization - validate the request and fill defaults
//! 2. Preprocessing - build the document and split it into chunks
//! 3. Extraction - run passes through the gateway, parse and align
//! 4. Aggregation - deduplicate, resolve overlaps, filter by confidence
//! 5. Validation - check survivors against the request's schema
//! 6. Finalization - order extractions, compute metrics, seal the output
//!
//! A fatal failure returns a [`PipelineError`] that owns the response as it
//! stood, so partial results are never lost.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant as StdInstant};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::align::TextAligner;
use crate::error::{ExtractionError, GatewayError, PipelineError, ProviderError, Result};
use crate::gateway::{GatewayRequest, ProviderGateway};
use crate::pipeline::aggregate::{deduplicate, filter_by_confidence, resolve_overlaps};
use crate::pipeline::chunking::{chunk_text, TextChunk};
use crate::pipeline::parse::parse_extractions;
use crate::pipeline::prompts::format_extract_prompt;
use crate::traits::provider::ProviderKind;
use crate::types::{
    config::PipelineConfig,
    document::{AnnotatedDocument, CharInterval, Document},
    example::ExampleData,
    extraction::Extraction,
    request::{
        ExtractionProgress, ExtractionRequest, ExtractionResponse, QualityMetrics, Stage,
        StepStatus, ValidationIssue,
    },
};

/// Documents shorter than this (in chars) get one pass in multi-pass mode.
const ONE_PASS_BELOW: usize = 5_000;

/// Documents shorter than this (in chars) get two passes in multi-pass mode.
const TWO_PASSES_BELOW: usize = 10_000;

/// Runs extraction requests against a provider gateway.
///
/// # Example
///
/// ```rust,ignore
/// let gateway = Arc::new(
///     ProviderGateway::new(GatewayConfig::default())
///         .with_provider(ProviderKind::Gemini, backend, ModelConfig::new("gemini-2.5-flash")),
/// );
/// let pipeline = ExtractionPipeline::new(gateway, PipelineConfig::default());
///
/// let request = ExtractionRequest::from_text(text, "Extract people and organizations.");
/// match pipeline.execute(request).await {
///     Ok(response) => println!("{} extractions", response.extractions().len()),
///     Err(e) => eprintln!("failed at {}: {} partial", e.stage, e.response().extractions().len()),
/// }
/// ```
pub struct ExtractionPipeline {
    gateway: Arc<ProviderGateway>,
    config: PipelineConfig,
    aligner: TextAligner,
}

/// Where the request's text comes from.
enum Input {
    Document(Document),
    Text(String),
}

/// Per-call settings shared by every chunk of every pass.
struct CallSettings<'a> {
    task: &'a str,
    examples: &'a [ExampleData],
    context: Option<&'a str>,
    source: &'a str,
    provider: Option<ProviderKind>,
    model_id: Option<&'a str>,
    retry_count: u32,
}

/// Mutable state of one run.
struct Run<'a> {
    response: ExtractionResponse,
    progress: Option<&'a watch::Sender<ExtractionProgress>>,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Run<'_> {
    fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(ExtractionError::Canceled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(ExtractionError::DeadlineExceeded);
        }
        Ok(())
    }

    fn report(&self, update: impl FnOnce(&mut ExtractionProgress)) {
        if let Some(progress) = self.progress {
            progress.send_modify(update);
        }
    }

    fn enter(&self, stage: Stage) {
        self.report(|p| {
            p.stage = stage;
            p.progress = stage.start_fraction();
        });
    }

    fn fail(mut self, stage: Stage, error: ExtractionError, elapsed: Duration) -> PipelineError {
        warn!(
            request_id = %self.response.request_id,
            stage = %stage,
            error = %error,
            "Pipeline stage failed"
        );
        self.response
            .record(stage, StepStatus::Error, error.to_string(), elapsed);
        self.response.error = Some(format!("{} stage failed: {}", stage, error));
        self.response.metadata.finished_at = Some(Utc::now());

        PipelineError {
            stage,
            source: error,
            partial: Box::new(self.response),
        }
    }
}

impl ExtractionPipeline {
    pub fn new(gateway: Arc<ProviderGateway>, config: PipelineConfig) -> Self {
        let aligner = TextAligner::new(config.alignment.clone());
        Self {
            gateway,
            config,
            aligner,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn gateway(&self) -> &ProviderGateway {
        &self.gateway
    }

    /// Run one request to completion.
    ///
    /// The request's progress callback is only driven when the request runs
    /// on an [`ExtractionEngine`](crate::ExtractionEngine).
    pub async fn execute(
        &self,
        request: ExtractionRequest,
    ) -> std::result::Result<ExtractionResponse, PipelineError> {
        self.execute_reporting(request, None).await
    }

    /// Run one request, publishing progress snapshots to `progress`.
    pub(crate) async fn execute_reporting(
        &self,
        request: ExtractionRequest,
        progress: Option<&watch::Sender<ExtractionProgress>>,
    ) -> std::result::Result<ExtractionResponse, PipelineError> {
        let ExtractionRequest {
            id,
            document,
            text,
            task_description,
            examples,
            schema,
            validate_output,
            provider,
            model_id,
            retry_count,
            pass_count,
            multi_pass,
            max_char_buffer,
            timeout,
            cancel,
            progress: _,
        } = request;

        let mut run = Run {
            response: ExtractionResponse::new(id),
            progress,
            cancel,
            // A timeout too large to represent means no deadline
            deadline: timeout.and_then(|t| Instant::now().checked_add(t)),
        };

        // 1. Initialization
        let started = StdInstant::now();
        run.enter(Stage::Initialization);

        let input = match (document, text) {
            (Some(document), None) => Input::Document(document),
            (None, Some(text)) => Input::Text(text),
            (None, None) => {
                let error = ExtractionError::invalid("request has neither a document nor text");
                return Err(run.fail(Stage::Initialization, error, started.elapsed()));
            }
            (Some(_), Some(_)) => {
                let error = ExtractionError::invalid("request has both a document and text");
                return Err(run.fail(Stage::Initialization, error, started.elapsed()));
            }
        };
        if task_description.trim().is_empty() {
            let error = ExtractionError::invalid("task description is empty");
            return Err(run.fail(Stage::Initialization, error, started.elapsed()));
        }
        if pass_count == Some(0) {
            let error = ExtractionError::invalid("pass count must be at least 1");
            return Err(run.fail(Stage::Initialization, error, started.elapsed()));
        }

        let retry_count = retry_count.unwrap_or(self.config.default_retry_count);
        let multi_pass = multi_pass.unwrap_or(self.config.multi_pass);
        let max_char_buffer = max_char_buffer.or(self.config.max_char_buffer);

        run.response.record(
            Stage::Initialization,
            StepStatus::Success,
            format!(
                "retry_count={}, pass_count={}, multi_pass={}",
                retry_count,
                pass_count.map_or_else(|| "auto".to_string(), |p| p.to_string()),
                multi_pass
            ),
            started.elapsed(),
        );

        // 2. Preprocessing
        let started = StdInstant::now();
        if let Err(error) = run.check() {
            return Err(run.fail(Stage::Preprocessing, error, Duration::ZERO));
        }
        run.enter(Stage::Preprocessing);

        let document = match input {
            Input::Document(document) => document,
            Input::Text(text) => Document::new(text.trim()),
        };
        if document.text().trim().is_empty() {
            let error = ExtractionError::invalid("document text is empty");
            return Err(run.fail(Stage::Preprocessing, error, started.elapsed()));
        }

        let chunks = chunk_text(document.text(), max_char_buffer);
        let passes = planned_passes(
            pass_count,
            multi_pass,
            self.config.default_pass_count,
            document.text(),
        );
        run.response.metadata.passes_planned = passes;
        run.report(|p| {
            p.total_passes = passes;
            p.total_chunks = chunks.len() * passes as usize;
        });

        run.response.record(
            Stage::Preprocessing,
            StepStatus::Success,
            format!(
                "document {} ({} bytes) in {} chunk(s)",
                document.id(),
                document.len(),
                chunks.len()
            ),
            started.elapsed(),
        );

        info!(
            request_id = %id,
            document_id = %document.id(),
            passes = passes,
            chunks = chunks.len(),
            "Starting extraction"
        );

        // 3. Extraction
        let started = StdInstant::now();
        if let Err(error) = run.check() {
            return Err(run.fail(Stage::Extraction, error, Duration::ZERO));
        }
        run.enter(Stage::Extraction);

        let settings = CallSettings {
            task: &task_description,
            examples: &examples,
            context: document.additional_context(),
            source: document.text(),
            provider,
            model_id: model_id.as_deref(),
            retry_count,
        };

        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut pass_failure: Option<String> = None;
        let mut stopped_early = false;

        for pass in 0..passes {
            run.report(|p| p.current_pass = pass + 1);

            let found = match self.run_pass(&mut run, &settings, &chunks, pass).await {
                Ok(found) => found,
                Err(error) => {
                    let interrupted = matches!(
                        error,
                        ExtractionError::Canceled | ExtractionError::DeadlineExceeded
                    );
                    if pass == 0 || interrupted {
                        return Err(run.fail(Stage::Extraction, error, started.elapsed()));
                    }

                    warn!(request_id = %id, pass = pass + 1, error = %error, "Extraction pass failed");
                    let message = format!("pass {} of {} failed: {}", pass + 1, passes, error);
                    run.response.warnings.push(message.clone());
                    pass_failure = Some(message);
                    break;
                }
            };

            let new_count = found
                .iter()
                .filter(|e| seen.insert((e.class.clone(), e.text.clone())))
                .count();
            run.response.extractions.extend(found);
            run.response.metadata.passes_completed += 1;

            debug!(
                request_id = %id,
                pass = pass + 1,
                new = new_count,
                total = run.response.extractions.len(),
                "Extraction pass complete"
            );

            if pass > 0 && pass + 1 < passes {
                let total = run.response.extractions.len();
                let ratio = if total == 0 {
                    0.0
                } else {
                    new_count as f64 / total as f64
                };
                if ratio < self.config.improvement_threshold {
                    info!(request_id = %id, pass = pass + 1, ratio = ratio, "Stopping passes early");
                    stopped_early = true;
                    break;
                }
            }
        }

        let completed = run.response.metadata.passes_completed;
        let mut message = format!(
            "{} extraction(s) from {} of {} pass(es)",
            run.response.extractions.len(),
            completed,
            passes
        );
        if stopped_early {
            message.push_str(", stopped early");
        }
        match pass_failure {
            Some(failure) => {
                message.push_str("; ");
                message.push_str(&failure);
                run.response
                    .record(Stage::Extraction, StepStatus::Warning, message, started.elapsed());
            }
            None => {
                run.response
                    .record(Stage::Extraction, StepStatus::Success, message, started.elapsed());
            }
        }

        // 4. Aggregation
        let started = StdInstant::now();
        if let Err(error) = run.check() {
            return Err(run.fail(Stage::Aggregation, error, Duration::ZERO));
        }
        run.enter(Stage::Aggregation);

        if !self.config.enable_deduplication || run.response.extractions.is_empty() {
            run.response.record(
                Stage::Aggregation,
                StepStatus::Skipped,
                "deduplication disabled or nothing to aggregate",
                started.elapsed(),
            );
        } else {
            let extractions = std::mem::take(&mut run.response.extractions);
            let before = extractions.len();

            let deduped = deduplicate(extractions);
            let after_dedup = deduped.len();

            let resolved = resolve_overlaps(deduped, self.config.overlap_strategy, document.text());
            let after_overlaps = resolved.len();

            let filtered = filter_by_confidence(resolved, self.config.confidence_threshold);
            let after_filter = filtered.len();

            run.response.extractions = filtered;
            run.response.record(
                Stage::Aggregation,
                StepStatus::Success,
                format!(
                    "{} -> {} after dedup, {} after overlaps, {} after confidence filter",
                    before, after_dedup, after_overlaps, after_filter
                ),
                started.elapsed(),
            );
        }

        // 5. Validation
        let started = StdInstant::now();
        if let Err(error) = run.check() {
            return Err(run.fail(Stage::Validation, error, Duration::ZERO));
        }
        run.enter(Stage::Validation);

        match schema.filter(|_| validate_output) {
            Some(schema) => {
                let extractions = std::mem::take(&mut run.response.extractions);
                let mut kept = Vec::with_capacity(extractions.len());

                for extraction in extractions {
                    match schema.validate_extraction(&extraction) {
                        Ok(()) => kept.push(extraction),
                        Err(e) => {
                            debug!(class = %extraction.class, error = %e, "Extraction failed validation");
                            run.response.validation_errors.push(ValidationIssue {
                                class: extraction.class,
                                text: extraction.text,
                                error: e.to_string(),
                            });
                        }
                    }
                }
                run.response.extractions = kept;

                let rejected = run.response.validation_errors.len();
                let status = if rejected > 0 {
                    StepStatus::Warning
                } else {
                    StepStatus::Success
                };
                run.response.record(
                    Stage::Validation,
                    status,
                    format!("{} extraction(s) rejected by schema", rejected),
                    started.elapsed(),
                );
            }
            None => {
                run.response.record(
                    Stage::Validation,
                    StepStatus::Skipped,
                    "no schema to validate against",
                    started.elapsed(),
                );
            }
        }

        // 6. Finalization
        let started = StdInstant::now();
        if let Err(error) = run.check() {
            return Err(run.fail(Stage::Finalization, error, Duration::ZERO));
        }
        run.enter(Stage::Finalization);

        let mut extractions = std::mem::take(&mut run.response.extractions);
        for extraction in extractions.iter_mut() {
            extraction.token_interval = extraction
                .char_interval
                .and_then(|interval| document.token_interval(&interval));
        }
        // Stable: ungrounded extractions keep their relative order at the end
        extractions.sort_by_key(|e| match e.char_interval {
            Some(interval) => (false, interval.start),
            None => (true, 0),
        });

        run.response.metrics = quality_metrics(&extractions, document.len());
        run.response.extractions = extractions.clone();
        run.response.annotated = Some(AnnotatedDocument::new(document, extractions));
        run.response.metadata.finished_at = Some(Utc::now());
        run.response.record(
            Stage::Finalization,
            StepStatus::Success,
            format!(
                "{} extraction(s), {} grounded, coverage {:.3}",
                run.response.metrics.extraction_count,
                run.response.metrics.grounded_count,
                run.response.metrics.text_coverage
            ),
            started.elapsed(),
        );
        run.report(|p| p.progress = 1.0);

        info!(
            request_id = %id,
            extractions = run.response.metrics.extraction_count,
            grounded = run.response.metrics.grounded_count,
            tokens = run.response.metadata.tokens_used,
            "Extraction complete"
        );

        Ok(run.response)
    }

    /// One pass: a gateway call per chunk, then parse and align.
    ///
    /// Extractions are only returned once every chunk of the pass succeeded.
    async fn run_pass(
        &self,
        run: &mut Run<'_>,
        settings: &CallSettings<'_>,
        chunks: &[TextChunk<'_>],
        pass: u32,
    ) -> Result<Vec<Extraction>> {
        let mut found = Vec::new();

        for chunk in chunks {
            run.check()?;

            let prompt = format_extract_prompt(
                settings.task,
                chunk.text,
                settings.examples,
                settings.context,
                pass,
            );
            let mut request = GatewayRequest::new(prompt).with_retry_count(settings.retry_count);
            request.provider = settings.provider;
            request.model_id = settings.model_id.map(str::to_string);
            request.deadline = run.deadline;

            let response = match self.gateway.execute_with_failover(&request, &run.cancel).await {
                Ok(response) => response,
                Err(error) => {
                    run.response
                        .metadata
                        .failover_events
                        .extend(error.events().iter().cloned());
                    return Err(gateway_failure(error));
                }
            };

            let metadata = &mut run.response.metadata;
            metadata.failover_events.extend(response.failover_events);
            metadata.tokens_used += response.output.tokens_used;
            metadata.provider_used = Some(response.provider.as_str().to_string());
            metadata.model_used = Some(response.model_id);
            metadata.chunks_processed += 1;
            let processed = metadata.chunks_processed;

            let mut extractions = parse_extractions(&response.output.text, pass as usize)?;
            self.aligner.align_extractions_within(
                &mut extractions,
                settings.source,
                chunk.start..chunk.end(),
            );

            debug!(
                chunk = chunk.index,
                pass = pass + 1,
                extractions = extractions.len(),
                "Chunk extracted"
            );
            found.extend(extractions);

            run.report(|p| {
                p.chunks_processed = processed;
                let total = p.total_chunks.max(1) as f64;
                let span = Stage::Aggregation.start_fraction() - Stage::Extraction.start_fraction();
                p.progress = Stage::Extraction.start_fraction()
                    + span * (processed as f64 / total).min(1.0);
            });
        }

        Ok(found)
    }
}

/// Number of passes to run.
///
/// An explicit count wins. Otherwise multi-pass mode picks by length and
/// the configured default applies.
fn planned_passes(explicit: Option<u32>, multi_pass: bool, default: u32, text: &str) -> u32 {
    if let Some(passes) = explicit {
        return passes.max(1);
    }
    if !multi_pass {
        return default.max(1);
    }

    let chars = text.chars().count();
    if chars < ONE_PASS_BELOW {
        1
    } else if chars < TWO_PASSES_BELOW {
        2
    } else {
        3
    }
}

fn gateway_failure(error: GatewayError) -> ExtractionError {
    match error {
        GatewayError::Interrupted {
            reason: ProviderError::Canceled,
            ..
        } => ExtractionError::Canceled,
        GatewayError::Interrupted {
            reason: ProviderError::DeadlineExceeded,
            ..
        } => ExtractionError::DeadlineExceeded,
        other => ExtractionError::Gateway(other),
    }
}

/// Counts, coverage and mean confidence of a final extraction set.
pub(crate) fn quality_metrics(extractions: &[Extraction], document_len: usize) -> QualityMetrics {
    let mut intervals: Vec<CharInterval> =
        extractions.iter().filter_map(|e| e.char_interval).collect();
    intervals.sort_by_key(|i| i.start);

    let mut covered = 0usize;
    let mut current: Option<CharInterval> = None;
    for interval in intervals {
        current = match current {
            Some(c) if interval.start <= c.end => Some(c.union(&interval)),
            Some(c) => {
                covered += c.len();
                Some(interval)
            }
            None => Some(interval),
        };
    }
    covered += current.map_or(0, |c| c.len());

    let confidences: Vec<f64> = extractions.iter().filter_map(|e| e.confidence).collect();
    let mean_confidence = if confidences.is_empty() {
        0.0
    } else {
        confidences.iter().sum::<f64>() / confidences.len() as f64
    };

    QualityMetrics {
        extraction_count: extractions.len(),
        grounded_count: extractions.iter().filter(|e| e.is_grounded()).count(),
        text_coverage: if document_len == 0 {
            0.0
        } else {
            (covered as f64 / document_len as f64).min(1.0)
        },
        mean_confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_planned_passes() {
        let short = "a".repeat(100);
        let medium = "a".repeat(6_000);
        let long = "a".repeat(12_000);

        assert_eq!(planned_passes(Some(4), true, 1, &short), 4);
        assert_eq!(planned_passes(None, false, 1, &long), 1);
        assert_eq!(planned_passes(None, true, 1, &short), 1);
        assert_eq!(planned_passes(None, true, 1, &medium), 2);
        assert_eq!(planned_passes(None, true, 1, &long), 3);
    }

    #[test]
    fn test_quality_metrics_coverage_uses_union() {
        let extractions = vec![
            Extraction::new("A", "x").with_interval(0, 10).with_confidence(0.5),
            Extraction::new("B", "y").with_interval(5, 15),
            Extraction::new("C", "z").with_interval(20, 25).with_confidence(1.0),
            Extraction::new("D", "floating"),
        ];

        let metrics = quality_metrics(&extractions, 50);
        assert_eq!(metrics.extraction_count, 4);
        assert_eq!(metrics.grounded_count, 3);
        assert!((metrics.text_coverage - 0.4).abs() < 1e-9);
        assert!((metrics.mean_confidence - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_gateway_interruptions_map_to_request_errors() {
        let canceled = GatewayError::Interrupted {
            reason: ProviderError::Canceled,
            events: vec![],
        };
        assert!(matches!(gateway_failure(canceled), ExtractionError::Canceled));

        let exhausted = GatewayError::Exhausted {
            attempts: 3,
            last: ProviderError::Timeout,
            events: vec![],
        };
        assert!(matches!(gateway_failure(exhausted), ExtractionError::Gateway(_)));
    }
}
