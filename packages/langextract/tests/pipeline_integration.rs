//! Integration tests for the extraction pipeline.
//!
//! These tests run full requests through the pipeline against scripted mock
//! providers:
//! 1. Grounding and finalization
//! 2. Aggregation across passes
//! 3. Partial results when a later pass fails
//! 4. Failover, cancellation and deadlines
//! 5. Chunking and schema validation

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use langextract::{
    testing::{MockOutcome, MockProvider},
    AlignmentStatus, CharInterval, ClassSchema, ExtractionError, ExtractionPipeline,
    ExtractionRequest, GatewayConfig, ModelConfig, PipelineConfig, ProviderError, ProviderGateway,
    ProviderKind, Stage, StepStatus, TokenInterval,
};

const JOHN: &str = "John Smith works at Google Inc.";

/// Build a model response from `(class, text, confidence)` triples.
fn response(items: &[(&str, &str, Option<f64>)]) -> String {
    let extractions: Vec<_> = items
        .iter()
        .map(|(class, text, confidence)| match confidence {
            Some(c) => json!({"extraction_class": class, "extraction_text": text, "confidence": c}),
            None => json!({"extraction_class": class, "extraction_text": text}),
        })
        .collect();
    json!({ "extractions": extractions }).to_string()
}

fn fast_gateway() -> GatewayConfig {
    GatewayConfig::new().with_backoff(1, 5)
}

/// Pipeline over a single mock provider.
fn pipeline_with(provider: MockProvider, config: PipelineConfig) -> ExtractionPipeline {
    let gateway = ProviderGateway::new(fast_gateway()).with_provider(
        ProviderKind::Gemini,
        Arc::new(provider),
        ModelConfig::new("mock-model"),
    );
    ExtractionPipeline::new(Arc::new(gateway), config)
}

#[tokio::test]
async fn test_end_to_end_grounding() {
    let provider = MockProvider::new().respond(response(&[
        ("ORG", "Google Inc.", Some(0.8)),
        ("PERSON", "John Smith", Some(0.9)),
        ("CITY", "Mountain View", None),
    ]));
    let pipeline = pipeline_with(provider, PipelineConfig::default());

    let request = ExtractionRequest::from_text(JOHN, "Extract people and organizations.");
    let response = pipeline.execute(request).await.unwrap();

    assert!(response.is_successful());
    let extractions = response.extractions();
    assert_eq!(extractions.len(), 3);

    // Ordered by position, unanchored last
    assert_eq!(extractions[0].text, "John Smith");
    assert_eq!(extractions[0].char_interval, Some(CharInterval::new(0, 10)));
    assert_eq!(extractions[1].text, "Google Inc.");
    assert_eq!(extractions[1].char_interval, Some(CharInterval::new(20, 31)));
    assert_eq!(extractions[1].alignment_status, Some(AlignmentStatus::Exact));
    assert_eq!(extractions[1].alignment_quality, Some(100.0));
    assert_eq!(
        extractions[1].token_interval,
        Some(TokenInterval { start: 4, end: 6 })
    );
    assert_eq!(extractions[2].text, "Mountain View");
    assert_eq!(extractions[2].char_interval, None);
    assert_eq!(extractions[2].alignment_status, Some(AlignmentStatus::Unaligned));

    let metrics = response.metrics();
    assert_eq!(metrics.extraction_count, 3);
    assert_eq!(metrics.grounded_count, 2);
    assert!((metrics.text_coverage - 21.0 / 31.0).abs() < 1e-9);
    assert!((metrics.mean_confidence - 0.85).abs() < 1e-9);

    let metadata = response.metadata();
    assert_eq!(metadata.provider_used.as_deref(), Some("gemini"));
    assert_eq!(metadata.model_used.as_deref(), Some("mock-model"));
    assert_eq!(metadata.passes_completed, 1);
    assert_eq!(metadata.chunks_processed, 1);
    assert_eq!(metadata.tokens_used, 10);
    assert!(metadata.finished_at.is_some());

    let stages: Vec<Stage> = response.trace().iter().map(|s| s.stage).collect();
    assert_eq!(
        stages,
        vec![
            Stage::Initialization,
            Stage::Preprocessing,
            Stage::Extraction,
            Stage::Aggregation,
            Stage::Validation,
            Stage::Finalization,
        ]
    );
    assert_eq!(
        response.step(Stage::Validation).map(|s| s.status),
        Some(StepStatus::Skipped)
    );

    let annotated = response.annotated_document().unwrap();
    assert_eq!(annotated.text(), JOHN);
    assert_eq!(annotated.extractions(), extractions);
    assert_eq!(annotated.grounded().count(), 2);
}

#[tokio::test]
async fn test_duplicates_across_passes_keep_highest_confidence() {
    let provider = MockProvider::new()
        .respond(response(&[("PERSON", "John Smith", Some(0.6))]))
        .respond(response(&[("PERSON", "John Smith", Some(0.9))]));
    let pipeline = pipeline_with(provider, PipelineConfig::default());

    let request = ExtractionRequest::from_text(JOHN, "Find people.").with_pass_count(2);
    let response = pipeline.execute(request).await.unwrap();

    assert_eq!(response.metadata().passes_completed, 2);
    assert_eq!(response.extractions().len(), 1);
    assert_eq!(response.extractions()[0].confidence, Some(0.9));
    assert_eq!(response.extractions()[0].group_index, Some(1));
}

#[tokio::test]
async fn test_confidence_filter() {
    let provider = MockProvider::new().respond(response(&[
        ("PERSON", "John Smith", Some(0.3)),
        ("ORG", "Google Inc.", None),
    ]));
    let pipeline = pipeline_with(provider, PipelineConfig::default());

    let response = pipeline
        .execute(ExtractionRequest::from_text(JOHN, "Find entities."))
        .await
        .unwrap();

    assert_eq!(response.extractions().len(), 1);
    assert_eq!(response.extractions()[0].text, "Google Inc.");
}

#[tokio::test]
async fn test_disabled_deduplication_skips_aggregation() {
    let provider = MockProvider::new().respond(response(&[
        ("PERSON", "John Smith", Some(0.3)),
        ("PERSON", "John Smith", Some(0.4)),
    ]));
    let pipeline = pipeline_with(provider, PipelineConfig::new().with_deduplication(false));

    let response = pipeline
        .execute(ExtractionRequest::from_text(JOHN, "Find people."))
        .await
        .unwrap();

    assert_eq!(response.extractions().len(), 2);
    assert_eq!(
        response.step(Stage::Aggregation).map(|s| s.status),
        Some(StepStatus::Skipped)
    );
}

#[tokio::test]
async fn test_later_pass_failure_keeps_earlier_results() {
    let provider = MockProvider::new()
        .respond(response(&[("PERSON", "John Smith", Some(0.9))]))
        .fail(ProviderError::Authentication("key revoked".into()));
    let pipeline = pipeline_with(provider, PipelineConfig::default());

    let request = ExtractionRequest::from_text(JOHN, "Find people.").with_pass_count(3);
    let response = pipeline.execute(request).await.unwrap();

    assert!(response.is_successful());
    assert_eq!(response.metadata().passes_planned, 3);
    assert_eq!(response.metadata().passes_completed, 1);
    assert_eq!(response.extractions().len(), 1);
    assert_eq!(response.extractions()[0].text, "John Smith");
    assert_eq!(response.warnings().len(), 1);
    assert_eq!(
        response.step(Stage::Extraction).map(|s| s.status),
        Some(StepStatus::Warning)
    );
}

#[tokio::test]
async fn test_first_pass_failure_is_fatal() {
    let provider = MockProvider::new().always(MockOutcome::Fail(ProviderError::Authentication(
        "bad key".into(),
    )));
    let pipeline = pipeline_with(provider, PipelineConfig::default());

    let err = pipeline
        .execute(ExtractionRequest::from_text(JOHN, "Find people."))
        .await
        .unwrap_err();

    assert_eq!(err.stage, Stage::Extraction);
    assert!(matches!(err.source, ExtractionError::Gateway(_)));

    let partial = err.response();
    assert!(!partial.is_successful());
    assert!(partial.error().is_some());
    assert_eq!(partial.metadata().passes_completed, 0);
    assert_eq!(
        partial.trace().last().map(|s| (s.stage, s.status)),
        Some((Stage::Extraction, StepStatus::Error))
    );
    assert!(partial.annotated_document().is_none());
}

#[tokio::test]
async fn test_passes_stop_when_nothing_new() {
    let same = response(&[("PERSON", "John Smith", Some(0.9))]);
    let provider = MockProvider::new().always(MockOutcome::Respond(same));
    let pipeline = pipeline_with(provider, PipelineConfig::default());

    let request = ExtractionRequest::from_text(JOHN, "Find people.").with_pass_count(3);
    let response = pipeline.execute(request).await.unwrap();

    assert_eq!(response.metadata().passes_completed, 2);
    let step = response.step(Stage::Extraction).unwrap();
    assert!(step.message.contains("stopped early"));
}

#[tokio::test]
async fn test_failover_to_secondary_provider() {
    let primary = Arc::new(MockProvider::new().always(MockOutcome::Fail(ProviderError::Timeout)));
    let secondary = Arc::new(
        MockProvider::new().respond(response(&[("ORG", "Google Inc.", Some(0.8))])),
    );

    let gateway = ProviderGateway::new(fast_gateway())
        .with_provider(ProviderKind::Gemini, primary.clone(), ModelConfig::new("a"))
        .with_provider(ProviderKind::OpenAi, secondary.clone(), ModelConfig::new("b"));
    let pipeline = ExtractionPipeline::new(Arc::new(gateway), PipelineConfig::default());

    let request = ExtractionRequest::from_text(JOHN, "Find companies.").with_retry_count(2);
    let response = pipeline.execute(request).await.unwrap();

    assert_eq!(primary.call_count(), 3);
    let metadata = response.metadata();
    assert_eq!(metadata.provider_used.as_deref(), Some("openai"));
    assert_eq!(metadata.failover_events.len(), 1);
    assert!(metadata.failover_events[0].success);
    assert_eq!(metadata.failover_events[0].original_provider, "gemini");
    assert_eq!(response.extractions()[0].char_interval, Some(CharInterval::new(20, 31)));
}

#[tokio::test]
async fn test_invalid_requests_fail_early() {
    let pipeline = pipeline_with(MockProvider::new(), PipelineConfig::default());

    let err = pipeline
        .execute(ExtractionRequest::from_text(JOHN, "   "))
        .await
        .unwrap_err();
    assert_eq!(err.stage, Stage::Initialization);
    assert!(matches!(err.source, ExtractionError::InvalidRequest { .. }));

    let err = pipeline
        .execute(ExtractionRequest::from_text(" \n\t ", "Find people."))
        .await
        .unwrap_err();
    assert_eq!(err.stage, Stage::Preprocessing);

    let err = pipeline
        .execute(ExtractionRequest::from_text(JOHN, "Find people.").with_pass_count(0))
        .await
        .unwrap_err();
    assert_eq!(err.stage, Stage::Initialization);
}

#[tokio::test]
async fn test_cancellation_returns_promptly() {
    let pipeline = pipeline_with(
        MockProvider::new().always(MockOutcome::Hang),
        PipelineConfig::default(),
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let request = ExtractionRequest::from_text(JOHN, "Find people.").with_cancellation(cancel);
    let err = tokio::time::timeout(Duration::from_secs(5), pipeline.execute(request))
        .await
        .expect("pipeline should observe cancellation")
        .unwrap_err();

    assert_eq!(err.stage, Stage::Extraction);
    assert!(matches!(err.source, ExtractionError::Canceled));
}

#[tokio::test]
async fn test_deadline_exceeded() {
    let pipeline = pipeline_with(
        MockProvider::new().always(MockOutcome::Hang),
        PipelineConfig::default(),
    );

    let request =
        ExtractionRequest::from_text(JOHN, "Find people.").with_timeout(Duration::from_millis(30));
    let err = pipeline.execute(request).await.unwrap_err();

    assert!(matches!(err.source, ExtractionError::DeadlineExceeded));
}

#[tokio::test]
async fn test_chunks_are_extracted_separately() {
    let text = "Alice lives in Paris today.\nBob works in Berlin now.";
    let provider = Arc::new(
        MockProvider::new()
            .when_prompt_contains(
                "Alice",
                MockOutcome::Respond(response(&[("PERSON", "Alice", Some(0.9))])),
            )
            .when_prompt_contains(
                "Bob",
                MockOutcome::Respond(response(&[("PERSON", "Bob", Some(0.9))])),
            ),
    );
    let gateway = ProviderGateway::new(fast_gateway()).with_provider(
        ProviderKind::Gemini,
        provider.clone(),
        ModelConfig::new("mock"),
    );
    let pipeline = ExtractionPipeline::new(Arc::new(gateway), PipelineConfig::default());

    let request = ExtractionRequest::from_text(text, "Find people.").with_max_char_buffer(30);
    let response = pipeline.execute(request).await.unwrap();

    assert_eq!(provider.call_count(), 2);
    assert_eq!(response.metadata().chunks_processed, 2);

    let found: Vec<_> = response
        .extractions()
        .iter()
        .map(|e| (e.text.as_str(), e.char_interval))
        .collect();
    assert_eq!(
        found,
        vec![
            ("Alice", Some(CharInterval::new(0, 5))),
            ("Bob", Some(CharInterval::new(28, 31))),
        ]
    );
}

#[tokio::test]
async fn test_unbounded_timeout_runs_without_deadline() {
    let provider = MockProvider::new().respond(response(&[("PERSON", "John Smith", Some(0.9))]));
    let pipeline = pipeline_with(provider, PipelineConfig::default());

    let request = ExtractionRequest::from_text(JOHN, "Find people.").with_timeout(Duration::MAX);
    let response = pipeline.execute(request).await.unwrap();

    assert!(response.is_successful());
    assert_eq!(response.extractions().len(), 1);
}

#[tokio::test]
async fn test_chunk_extractions_ground_inside_their_chunk() {
    let text = "Our Bob\nAnn met Bob.";
    let provider = MockProvider::new().when_prompt_contains(
        "Ann met",
        MockOutcome::Respond(response(&[("PERSON", "Bob", Some(0.9))])),
    );
    let pipeline = pipeline_with(provider, PipelineConfig::default());

    let request = ExtractionRequest::from_text(text, "Find people.").with_max_char_buffer(14);
    let response = pipeline.execute(request).await.unwrap();

    assert_eq!(response.metadata().chunks_processed, 2);
    assert_eq!(response.extractions().len(), 1);
    assert_eq!(
        response.extractions()[0].char_interval,
        Some(CharInterval::new(16, 19))
    );
}

#[tokio::test]
async fn test_schema_validation_drops_invalid() {
    let provider = MockProvider::new().respond(response(&[
        ("PERSON", "John Smith", Some(0.9)),
        ("ORG", "Google Inc.", Some(0.9)),
    ]));
    let pipeline = pipeline_with(provider, PipelineConfig::default());

    let schema = Arc::new(ClassSchema::new().with_class("PERSON"));
    let request = ExtractionRequest::from_text(JOHN, "Find people.").with_schema(schema);
    let response = pipeline.execute(request).await.unwrap();

    assert!(response.is_successful());
    assert_eq!(response.extractions().len(), 1);
    assert_eq!(response.extractions()[0].class, "PERSON");
    assert_eq!(response.validation_errors().len(), 1);
    assert_eq!(response.validation_errors()[0].class, "ORG");
    assert_eq!(
        response.step(Stage::Validation).map(|s| s.status),
        Some(StepStatus::Warning)
    );
}
