//! Bounded concurrent fan-out of independent requests.

use futures::future::join_all;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::pipeline::engine::ExtractionEngine;
use crate::types::{
    config::BatchConfig,
    request::{ExtractionRequest, ExtractionResponse},
};

/// What happened to one request in a batch.
#[derive(Debug)]
pub enum BatchOutcome {
    Completed(ExtractionResponse),
    Failed(PipelineError),

    /// Never submitted because the error budget ran out
    Skipped,
}

impl BatchOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// The response, partial for failed requests.
    pub fn response(&self) -> Option<&ExtractionResponse> {
        match self {
            Self::Completed(response) => Some(response),
            Self::Failed(error) => Some(error.response()),
            Self::Skipped => None,
        }
    }
}

/// One batch item, in submission order.
#[derive(Debug)]
pub struct BatchItem {
    pub request_id: Uuid,
    pub outcome: BatchOutcome,
}

/// Results of a batch run.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub items: Vec<BatchItem>,
}

impl BatchReport {
    pub fn completed(&self) -> usize {
        self.count(|o| matches!(o, BatchOutcome::Completed(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, BatchOutcome::Failed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, BatchOutcome::Skipped))
    }

    fn count(&self, predicate: impl Fn(&BatchOutcome) -> bool) -> usize {
        self.items.iter().filter(|i| predicate(&i.outcome)).count()
    }
}

/// Run requests concurrently, at most `config.concurrency` at a time.
///
/// Items are independent; one failing never blocks its siblings. Once more
/// than `max_errors` requests have failed, nothing further is submitted and
/// the rest are reported as skipped.
pub async fn run_batch(
    engine: &ExtractionEngine,
    requests: Vec<ExtractionRequest>,
    config: &BatchConfig,
) -> BatchReport {
    let total = requests.len();
    let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
    let failures = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::with_capacity(total);
    let mut skipped = Vec::new();

    info!(total, concurrency = config.concurrency, "Starting batch");

    let mut requests = requests.into_iter();
    for request in requests.by_ref() {
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            skipped.push(request.id);
            break;
        };

        if over_budget(&failures, config.max_errors) {
            warn!(
                failures = failures.load(Ordering::SeqCst),
                "Error budget exceeded, skipping remaining requests"
            );
            skipped.push(request.id);
            break;
        }

        let id = request.id;
        let engine = engine.clone();
        let failures = failures.clone();
        handles.push((
            id,
            tokio::spawn(async move {
                let _permit = permit;
                let result = engine.execute(request).await;
                if result.is_err() {
                    failures.fetch_add(1, Ordering::SeqCst);
                }
                result
            }),
        ));
    }
    skipped.extend(requests.map(|r| r.id));

    let (ids, tasks): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
    let results = join_all(tasks).await;

    let mut items: Vec<BatchItem> = Vec::with_capacity(total);
    for (request_id, joined) in ids.into_iter().zip(results) {
        let outcome = match joined {
            Ok(Ok(response)) => BatchOutcome::Completed(response),
            Ok(Err(error)) => BatchOutcome::Failed(error),
            Err(e) => {
                warn!(request_id = %request_id, error = %e, "Batch task did not finish");
                BatchOutcome::Skipped
            }
        };
        items.push(BatchItem {
            request_id,
            outcome,
        });
    }
    items.extend(skipped.into_iter().map(|request_id| BatchItem {
        request_id,
        outcome: BatchOutcome::Skipped,
    }));

    let report = BatchReport { items };
    info!(
        completed = report.completed(),
        failed = report.failed(),
        skipped = report.skipped(),
        "Batch complete"
    );
    report
}

fn over_budget(failures: &AtomicUsize, max_errors: Option<usize>) -> bool {
    max_errors.is_some_and(|max| failures.load(Ordering::SeqCst) > max)
}
