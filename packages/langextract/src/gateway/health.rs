//! Per-provider health counters for external health checks.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::ProviderError;

/// Recent call history of one provider.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    pub provider: String,
    pub successes: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub healthy: bool,
}

impl ProviderHealth {
    fn new(provider: &str) -> Self {
        Self {
            provider: provider.to_string(),
            successes: 0,
            failures: 0,
            consecutive_failures: 0,
            last_success: None,
            last_failure: None,
            last_error: None,
            healthy: true,
        }
    }
}

/// Shared health table, updated on every provider attempt.
pub(crate) struct HealthTracker {
    entries: RwLock<HashMap<String, ProviderHealth>>,
    unhealthy_after: u32,
}

impl HealthTracker {
    pub fn new(unhealthy_after: u32) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            unhealthy_after: unhealthy_after.max(1),
        }
    }

    pub fn record_success(&self, provider: &str) {
        let mut entries = self.entries.write().unwrap();
        let entry = entries
            .entry(provider.to_string())
            .or_insert_with(|| ProviderHealth::new(provider));

        entry.successes += 1;
        entry.consecutive_failures = 0;
        entry.last_success = Some(Utc::now());
        entry.healthy = true;
    }

    pub fn record_failure(&self, provider: &str, error: &ProviderError) {
        let mut entries = self.entries.write().unwrap();
        let entry = entries
            .entry(provider.to_string())
            .or_insert_with(|| ProviderHealth::new(provider));

        entry.failures += 1;
        entry.consecutive_failures += 1;
        entry.last_failure = Some(Utc::now());
        entry.last_error = Some(error.to_string());
        entry.healthy = entry.consecutive_failures < self.unhealthy_after;
    }

    /// Snapshot sorted by provider name.
    pub fn report(&self) -> Vec<ProviderHealth> {
        let mut report: Vec<_> = self.entries.read().unwrap().values().cloned().collect();
        report.sort_by(|a, b| a.provider.cmp(&b.provider));
        report
    }

    /// Providers never called count as healthy.
    pub fn is_healthy(&self, provider: &str) -> bool {
        self.entries
            .read()
            .unwrap()
            .get(provider)
            .map_or(true, |h| h.healthy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consecutive_failures_mark_unhealthy() {
        let tracker = HealthTracker::new(2);

        tracker.record_failure("gemini", &ProviderError::Timeout);
        assert!(tracker.is_healthy("gemini"));

        tracker.record_failure("gemini", &ProviderError::Timeout);
        assert!(!tracker.is_healthy("gemini"));

        tracker.record_success("gemini");
        assert!(tracker.is_healthy("gemini"));

        let report = tracker.report();
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].failures, 2);
        assert_eq!(report[0].successes, 1);
        assert_eq!(report[0].consecutive_failures, 0);
    }

    #[test]
    fn test_unknown_provider_is_healthy() {
        let tracker = HealthTracker::new(3);
        assert!(tracker.is_healthy("ollama"));
        assert!(tracker.report().is_empty());
    }
}
