//! Testing utilities including mock implementations.
//!
//! These are useful for testing applications that use the extraction library
//! without calling a real model provider.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::error::ProviderError;
use crate::traits::provider::{LanguageModel, ModelConfig, ModelOutput};

/// Default response: a well-formed payload with nothing in it.
pub const EMPTY_RESPONSE: &str = r#"{"extractions": []}"#;

/// What the mock does for one call.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// Return this text
    Respond(String),

    /// Fail with this error
    Fail(ProviderError),

    /// Never complete
    Hang,
}

/// Record of a call made to the mock provider.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub prompt: String,
    pub model_id: String,
}

/// A mock model provider for testing.
///
/// Outcomes are picked in this order: the first rule whose needle appears in
/// the prompt, then the next scripted outcome, then the `always` outcome,
/// then [`EMPTY_RESPONSE`].
#[derive(Default)]
pub struct MockProvider {
    /// Outcomes consumed one per call
    script: Arc<RwLock<VecDeque<MockOutcome>>>,

    /// Prompt-matched outcomes, never consumed
    rules: Arc<RwLock<Vec<(String, MockOutcome)>>>,

    /// Outcome once the script runs dry
    always: Option<MockOutcome>,

    /// Simulated latency per call
    latency: Option<Duration>,

    /// Tokens reported per successful call
    tokens_per_call: u64,

    /// Call tracking for assertions
    calls: Arc<RwLock<Vec<MockCall>>>,
}

impl MockProvider {
    /// Create a new mock provider with default behavior.
    pub fn new() -> Self {
        Self {
            tokens_per_call: 10,
            ..Default::default()
        }
    }

    /// Queue a successful response.
    pub fn respond(self, text: impl Into<String>) -> Self {
        self.script
            .write()
            .unwrap()
            .push_back(MockOutcome::Respond(text.into()));
        self
    }

    /// Queue a failure.
    pub fn fail(self, error: ProviderError) -> Self {
        self.script
            .write()
            .unwrap()
            .push_back(MockOutcome::Fail(error));
        self
    }

    /// Queue any outcome.
    pub fn then(self, outcome: MockOutcome) -> Self {
        self.script.write().unwrap().push_back(outcome);
        self
    }

    /// Outcome for every call once the script is exhausted.
    pub fn always(mut self, outcome: MockOutcome) -> Self {
        self.always = Some(outcome);
        self
    }

    /// Outcome for any prompt containing `needle`.
    pub fn when_prompt_contains(self, needle: impl Into<String>, outcome: MockOutcome) -> Self {
        self.rules.write().unwrap().push((needle.into(), outcome));
        self
    }

    /// Delay every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Tokens reported per successful call.
    pub fn with_tokens_per_call(mut self, tokens: u64) -> Self {
        self.tokens_per_call = tokens;
        self
    }

    /// Get all calls made to this mock.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.read().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().unwrap().len()
    }

    /// Clear call history.
    pub fn clear_calls(&self) {
        self.calls.write().unwrap().clear();
    }

    fn next_outcome(&self, prompt: &str) -> MockOutcome {
        let matched = self
            .rules
            .read()
            .unwrap()
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, outcome)| outcome.clone());
        if let Some(outcome) = matched {
            return outcome;
        }

        if let Some(outcome) = self.script.write().unwrap().pop_front() {
            return outcome;
        }

        self.always
            .clone()
            .unwrap_or_else(|| MockOutcome::Respond(EMPTY_RESPONSE.to_string()))
    }
}

#[async_trait]
impl LanguageModel for MockProvider {
    async fn call(&self, prompt: &str, config: &ModelConfig) -> Result<ModelOutput, ProviderError> {
        self.calls.write().unwrap().push(MockCall {
            prompt: prompt.to_string(),
            model_id: config.model_id.clone(),
        });

        let outcome = self.next_outcome(prompt);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        match outcome {
            MockOutcome::Respond(text) => Ok(ModelOutput::new(text, self.tokens_per_call)),
            MockOutcome::Fail(error) => Err(error),
            MockOutcome::Hang => std::future::pending().await,
        }
    }
}
