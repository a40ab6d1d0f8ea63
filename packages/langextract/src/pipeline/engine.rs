//! Multi-request front door for the pipeline.
//!
//! The engine tracks every running request in a registry and, for requests
//! with a progress callback, runs a background reporter that emits the
//! latest progress snapshot on a fixed interval.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::debug;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::pipeline::executor::ExtractionPipeline;
use crate::types::request::{ExtractionProgress, ExtractionRequest, ExtractionResponse, ProgressCallback};

/// Interval between progress callbacks.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

type Registry = Arc<RwLock<HashMap<Uuid, RegistryEntry>>>;

struct RegistryEntry {
    started_at: DateTime<Utc>,
    task_description: String,
    progress: watch::Receiver<ExtractionProgress>,
    clock: Instant,
}

/// Snapshot of a running request.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveRequest {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub task_description: String,
    pub progress: ExtractionProgress,
}

/// Removes a request from the registry when dropped.
struct Registration {
    registry: Registry,
    id: Uuid,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.write().unwrap().remove(&self.id);
    }
}

/// Runs many extraction requests concurrently over one pipeline.
#[derive(Clone)]
pub struct ExtractionEngine {
    pipeline: Arc<ExtractionPipeline>,
    registry: Registry,
    progress_interval: Duration,
}

impl ExtractionEngine {
    pub fn new(pipeline: ExtractionPipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            registry: Arc::new(RwLock::new(HashMap::new())),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    /// Set the interval between progress callbacks.
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn pipeline(&self) -> &ExtractionPipeline {
        &self.pipeline
    }

    /// Requests currently running, oldest first.
    pub fn active_requests(&self) -> Vec<ActiveRequest> {
        let registry = self.registry.read().unwrap();
        let mut active: Vec<ActiveRequest> = registry
            .iter()
            .map(|(id, entry)| {
                let mut progress = entry.progress.borrow().clone();
                progress.elapsed = entry.clock.elapsed();
                ActiveRequest {
                    id: *id,
                    started_at: entry.started_at,
                    task_description: entry.task_description.clone(),
                    progress,
                }
            })
            .collect();
        active.sort_by_key(|r| r.started_at);
        active
    }

    /// Run one request, registered for its whole lifetime.
    pub async fn execute(
        &self,
        request: ExtractionRequest,
    ) -> Result<ExtractionResponse, PipelineError> {
        let id = request.id;
        let clock = Instant::now();
        let (sender, receiver) = watch::channel(ExtractionProgress::new(id));

        self.registry.write().unwrap().insert(
            id,
            RegistryEntry {
                started_at: Utc::now(),
                task_description: request.task_description.clone(),
                progress: receiver.clone(),
                clock,
            },
        );
        let registration = Registration {
            registry: self.registry.clone(),
            id,
        };

        let reporter = request.progress.clone().map(|callback| {
            let token = request.cancel.child_token();
            ProgressReporter::spawn(
                callback,
                receiver,
                self.registry.clone(),
                id,
                token,
                self.progress_interval,
                clock,
            )
        });

        let result = self.pipeline.execute_reporting(request, Some(&sender)).await;

        drop(registration);
        if let Some(reporter) = reporter {
            reporter.stop().await;
        }

        result
    }
}

/// A running progress reporter.
///
/// Dropping it cancels the task; [`ProgressReporter::stop`] also waits for it.
struct ProgressReporter {
    _guard: DropGuard,
    handle: JoinHandle<()>,
}

impl ProgressReporter {
    fn spawn(
        callback: ProgressCallback,
        progress: watch::Receiver<ExtractionProgress>,
        registry: Registry,
        id: Uuid,
        token: CancellationToken,
        interval: Duration,
        clock: Instant,
    ) -> Self {
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = ticker.tick() => {
                        if !registry.read().unwrap().contains_key(&id) {
                            break;
                        }
                        let mut snapshot = progress.borrow().clone();
                        snapshot.elapsed = clock.elapsed();
                        callback(snapshot);
                    }
                }
            }

            debug!(request_id = %id, "Progress reporter stopped");
        });

        Self {
            _guard: token.drop_guard(),
            handle,
        }
    }

    async fn stop(self) {
        let Self { _guard, handle } = self;
        drop(_guard);
        if let Err(e) = handle.await {
            debug!(error = %e, "Progress reporter ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ProviderGateway;
    use crate::testing::MockProvider;
    use crate::traits::provider::{ModelConfig, ProviderKind};
    use crate::types::config::{GatewayConfig, PipelineConfig};
    use std::sync::Mutex;

    const RESPONSE: &str = r#"{"extractions": [
        {"extraction_class": "PERSON", "extraction_text": "John Smith", "confidence": 0.9}
    ]}"#;

    fn engine(provider: MockProvider) -> ExtractionEngine {
        let gateway = ProviderGateway::new(GatewayConfig::default()).with_provider(
            ProviderKind::Gemini,
            Arc::new(provider),
            ModelConfig::new("mock"),
        );
        ExtractionEngine::new(ExtractionPipeline::new(
            Arc::new(gateway),
            PipelineConfig::default(),
        ))
        .with_progress_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_registry_is_empty_after_completion() {
        let engine = engine(MockProvider::new().respond(RESPONSE));
        assert!(engine.active_requests().is_empty());

        let request = ExtractionRequest::from_text("John Smith works here.", "Find people.");
        let response = engine.execute(request).await.unwrap();

        assert_eq!(response.extractions().len(), 1);
        assert!(engine.active_requests().is_empty());
    }

    #[tokio::test]
    async fn test_active_requests_visible_while_running() {
        let engine = engine(
            MockProvider::new()
                .respond(RESPONSE)
                .with_latency(Duration::from_millis(100)),
        );

        let request = ExtractionRequest::from_text("John Smith works here.", "Find people.");
        let id = request.id;

        let runner = engine.clone();
        let handle = tokio::spawn(async move { runner.execute(request).await });

        tokio::time::sleep(Duration::from_millis(30)).await;
        let active = engine.active_requests();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, id);
        assert_eq!(active[0].task_description, "Find people.");

        handle.await.unwrap().unwrap();
        assert!(engine.active_requests().is_empty());
    }

    #[tokio::test]
    async fn test_progress_reporter_stops_with_request() {
        let engine = engine(
            MockProvider::new()
                .respond(RESPONSE)
                .with_latency(Duration::from_millis(80)),
        );

        let snapshots: Arc<Mutex<Vec<ExtractionProgress>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = snapshots.clone();
        let request = ExtractionRequest::from_text("John Smith works here.", "Find people.")
            .with_progress(Arc::new(move |p: ExtractionProgress| sink.lock().unwrap().push(p)));

        engine.execute(request).await.unwrap();

        let emitted = snapshots.lock().unwrap().len();
        assert!(emitted >= 1);
        assert!(snapshots
            .lock()
            .unwrap()
            .iter()
            .all(|p| p.progress >= 0.0 && p.progress <= 1.0));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(snapshots.lock().unwrap().len(), emitted);
    }
}
