//! Provider gateway with retry and failover.
//!
//! Tries providers in priority order. Recoverable failures (timeouts, rate
//! limits, server errors) are retried with exponential backoff, then the
//! gateway moves on to the next provider and records a [`FailoverEvent`].
//! Non-recoverable failures end the call immediately.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{GatewayError, GatewayResult, ProviderError};
use crate::gateway::health::{HealthTracker, ProviderHealth};
use crate::traits::provider::{LanguageModel, ModelConfig, ModelOutput, ProviderKind};
use crate::types::{config::GatewayConfig, request::FailoverEvent};

/// A provider and the model to use on it.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderTarget {
    pub provider: ProviderKind,
    pub model: ModelConfig,
}

impl ProviderTarget {
    pub fn new(provider: ProviderKind, model: ModelConfig) -> Self {
        Self { provider, model }
    }

    /// Target using the provider's default model.
    pub fn default_for(provider: ProviderKind) -> Self {
        Self::new(provider, ModelConfig::new(provider.default_model()))
    }
}

/// One call to make through the gateway.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub prompt: String,

    /// Provider to try before the configured priority list
    pub provider: Option<ProviderKind>,

    /// Model for the preferred provider
    pub model_id: Option<String>,

    /// Retries per provider after the first attempt
    pub retry_count: u32,

    /// Hard stop for the whole call, retries included
    pub deadline: Option<Instant>,
}

impl GatewayRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            provider: None,
            model_id: None,
            retry_count: 0,
            deadline: None,
        }
    }

    /// Set retries per provider.
    pub fn with_retry_count(mut self, retries: u32) -> Self {
        self.retry_count = retries;
        self
    }

    /// Prefer a provider.
    pub fn with_provider(mut self, provider: ProviderKind, model_id: Option<String>) -> Self {
        self.provider = Some(provider);
        self.model_id = model_id;
        self
    }

    /// Set the deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// A successful gateway call.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub output: ModelOutput,
    pub provider: ProviderKind,
    pub model_id: String,

    /// Attempts across all providers, the successful one included
    pub attempts: u32,

    pub failover_events: Vec<FailoverEvent>,
}

/// Uniform front over a prioritized set of model backends.
pub struct ProviderGateway {
    backends: HashMap<ProviderKind, Arc<dyn LanguageModel>>,
    targets: Vec<ProviderTarget>,
    config: GatewayConfig,
    health: HealthTracker,
}

impl ProviderGateway {
    /// Create an empty gateway.
    pub fn new(config: GatewayConfig) -> Self {
        let health = HealthTracker::new(config.unhealthy_after);
        Self {
            backends: HashMap::new(),
            targets: Vec::new(),
            config,
            health,
        }
    }

    /// Register the backend serving a provider.
    pub fn with_backend(mut self, provider: ProviderKind, backend: Arc<dyn LanguageModel>) -> Self {
        self.backends.insert(provider, backend);
        self
    }

    /// Append a target to the priority list.
    pub fn with_target(mut self, target: ProviderTarget) -> Self {
        self.targets.push(target);
        self
    }

    /// Register a backend and append it as a target with the given model.
    pub fn with_provider(
        self,
        provider: ProviderKind,
        backend: Arc<dyn LanguageModel>,
        model: ModelConfig,
    ) -> Self {
        self.with_backend(provider, backend)
            .with_target(ProviderTarget::new(provider, model))
    }

    pub fn targets(&self) -> &[ProviderTarget] {
        &self.targets
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Health of every provider called so far.
    pub fn health_report(&self) -> Vec<ProviderHealth> {
        self.health.report()
    }

    pub fn is_healthy(&self, provider: ProviderKind) -> bool {
        self.health.is_healthy(provider.as_str())
    }

    /// Call providers in priority order until one succeeds.
    pub async fn execute_with_failover(
        &self,
        request: &GatewayRequest,
        cancel: &CancellationToken,
    ) -> GatewayResult<GatewayResponse> {
        let plan = self.plan(request);
        if plan.is_empty() {
            return Err(GatewayError::NoProviders);
        }

        let mut events: Vec<FailoverEvent> = Vec::new();
        let mut attempts = 0u32;
        let mut last_error: Option<ProviderError> = None;

        for (idx, target) in plan.iter().enumerate() {
            let name = target.provider.as_str();

            match self.backends.get(&target.provider) {
                Some(backend) => {
                    for attempt in 0..=request.retry_count {
                        attempts += 1;
                        debug!(
                            provider = %name,
                            model = %target.model.model_id,
                            attempt = attempt + 1,
                            "Calling provider"
                        );

                        match self.attempt(backend.as_ref(), target, request, cancel).await {
                            Ok(output) => {
                                self.health.record_success(name);
                                if let Some(event) = events.last_mut() {
                                    event.success = true;
                                }
                                return Ok(GatewayResponse {
                                    output,
                                    provider: target.provider,
                                    model_id: target.model.model_id.clone(),
                                    attempts,
                                    failover_events: events,
                                });
                            }
                            Err(e @ (ProviderError::Canceled | ProviderError::DeadlineExceeded)) => {
                                return Err(GatewayError::Interrupted { reason: e, events });
                            }
                            Err(e) if !e.is_recoverable() => {
                                self.health.record_failure(name, &e);
                                warn!(provider = %name, error = %e, "Provider failed, not retrying");
                                return Err(GatewayError::NonRecoverable {
                                    provider: name.to_string(),
                                    source: e,
                                    events,
                                });
                            }
                            Err(e) => {
                                self.health.record_failure(name, &e);
                                warn!(
                                    provider = %name,
                                    attempt = attempt + 1,
                                    error = %e,
                                    "Provider call failed"
                                );

                                if attempt < request.retry_count {
                                    self.backoff(&e, attempt, request, cancel)
                                        .await
                                        .map_err(|reason| GatewayError::Interrupted {
                                            reason,
                                            events: events.clone(),
                                        })?;
                                }
                                last_error = Some(e);
                            }
                        }
                    }
                }
                None => {
                    warn!(provider = %name, "No backend registered, skipping");
                    last_error = Some(ProviderError::NotRegistered(name.to_string()));
                }
            }

            if let Some(next) = plan.get(idx + 1) {
                let reason = last_error
                    .as_ref()
                    .map_or("unknown", ProviderError::reason)
                    .to_string();
                info!(
                    from = %name,
                    to = %next.provider,
                    reason = %reason,
                    "Failing over to next provider"
                );
                events.push(FailoverEvent {
                    original_provider: name.to_string(),
                    reason,
                    fallback_provider: next.provider.as_str().to_string(),
                    success: false,
                    timestamp: Utc::now(),
                });
            }
        }

        Err(GatewayError::Exhausted {
            attempts,
            last: last_error.unwrap_or_else(|| ProviderError::Unavailable("no attempts made".into())),
            events,
        })
    }

    /// Order of targets for a request: the preferred one first, then the
    /// configured list without repeats.
    fn plan(&self, request: &GatewayRequest) -> Vec<ProviderTarget> {
        let mut plan = Vec::with_capacity(self.targets.len() + 1);

        if let Some(provider) = request.provider {
            let model = match &request.model_id {
                Some(model_id) => ModelConfig::new(model_id.clone()),
                None => self
                    .targets
                    .iter()
                    .find(|t| t.provider == provider)
                    .map(|t| t.model.clone())
                    .unwrap_or_else(|| ModelConfig::new(provider.default_model())),
            };
            plan.push(ProviderTarget::new(provider, model));
        }

        for target in &self.targets {
            if !plan.contains(target) {
                plan.push(target.clone());
            }
        }

        plan
    }

    async fn attempt(
        &self,
        backend: &dyn LanguageModel,
        target: &ProviderTarget,
        request: &GatewayRequest,
        cancel: &CancellationToken,
    ) -> Result<ModelOutput, ProviderError> {
        let mut budget = self.config.call_timeout();
        let mut bounded_by_deadline = false;

        if let Some(deadline) = request.deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ProviderError::DeadlineExceeded);
            }
            if remaining <= budget {
                budget = remaining;
                bounded_by_deadline = true;
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProviderError::Canceled),
            result = tokio::time::timeout(budget, backend.call(&request.prompt, &target.model)) => {
                match result {
                    Ok(outcome) => outcome,
                    Err(_) if bounded_by_deadline => Err(ProviderError::DeadlineExceeded),
                    Err(_) => Err(ProviderError::Timeout),
                }
            }
        }
    }

    /// Sleep before the next retry, honoring cancellation and the deadline.
    async fn backoff(
        &self,
        error: &ProviderError,
        attempt: u32,
        request: &GatewayRequest,
        cancel: &CancellationToken,
    ) -> Result<(), ProviderError> {
        let delay = match error {
            ProviderError::RateLimited {
                retry_after: Some(after),
            } => *after,
            _ => self.config.backoff_for(attempt),
        };

        // A retry-after too large to represent sleeps until the deadline, or
        // takes the regular backoff when there is none.
        let now = Instant::now();
        let wake = match (now.checked_add(delay), request.deadline) {
            (Some(wake), Some(deadline)) => wake.min(deadline),
            (Some(wake), None) => wake,
            (None, Some(deadline)) => deadline,
            (None, None) => now
                .checked_add(self.config.backoff_for(attempt))
                .unwrap_or(now),
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProviderError::Canceled),
            _ = tokio::time::sleep_until(wake) => Ok(()),
        }
    }
}
