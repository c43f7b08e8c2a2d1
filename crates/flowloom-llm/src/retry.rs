use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{info, warn};

use flowloom_core::config::{ModelConfig, RetryConfig};
use flowloom_core::error::{FlowError, Result};
use flowloom_core::traits::LlmClient;
use flowloom_core::types::ChatMessage;

/// LLM client behind every `llm` node: retries transient failures of the
/// primary model, then walks the fallback chain once.
pub struct RetryingClient {
    primary: Box<dyn LlmClient>,
    fallbacks: Vec<(ModelConfig, Box<dyn LlmClient>)>,
    retry_config: RetryConfig,
}

/// What a failed completion calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Recovery {
    /// Same model again after a backoff.
    Retry,
    /// This model will not answer; try the next one.
    Fallback,
    /// The request itself is wrong; no model will do better.
    Abort,
}

/// Status code from a provider error of the form `HTTP 429 ...`.
fn http_status(message: &str) -> Option<u16> {
    message.strip_prefix("HTTP ")?.get(..3)?.parse().ok()
}

fn recovery_for(e: &FlowError) -> Recovery {
    match e {
        FlowError::LlmRequest(msg) => match http_status(msg) {
            Some(408 | 409 | 429) => Recovery::Retry,
            Some(status) if status >= 500 => Recovery::Retry,
            Some(_) => Recovery::Fallback,
            // Transport failure: timeout, refused or reset connection
            None => Recovery::Retry,
        },
        FlowError::LlmParse(_) => Recovery::Retry,
        // Problems with the node's own request follow it to every model
        FlowError::NodeConfig { .. } | FlowError::NodeExecution { .. } => Recovery::Abort,
        _ => Recovery::Fallback,
    }
}

fn backoff_for(attempt: u32, config: &RetryConfig) -> Duration {
    let base = config
        .initial_backoff_ms
        .saturating_mul(1u64 << attempt.min(20))
        .min(config.max_backoff_ms);
    let jitter = rand::random::<f64>() * 0.4 - 0.2;
    Duration::from_millis((base as f64 * (1.0 + jitter)) as u64)
}

impl RetryingClient {
    pub fn new(
        primary: Box<dyn LlmClient>,
        fallbacks: Vec<(ModelConfig, Box<dyn LlmClient>)>,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            primary,
            fallbacks,
            retry_config,
        }
    }

    /// Ask the primary model, retrying within the configured budget.
    async fn ask_primary(
        &self,
        config: &ModelConfig,
        messages: &[ChatMessage],
    ) -> std::result::Result<String, (Recovery, FlowError)> {
        let mut attempt = 0;
        loop {
            let err = match self.primary.complete(config, messages.to_vec()).await {
                Ok(text) => return Ok(text),
                Err(e) => e,
            };
            let recovery = recovery_for(&err);
            if recovery != Recovery::Retry || attempt >= self.retry_config.max_retries {
                let recovery = match recovery {
                    Recovery::Retry => Recovery::Fallback,
                    other => other,
                };
                return Err((recovery, err));
            }
            let backoff = backoff_for(attempt, &self.retry_config);
            attempt += 1;
            warn!(
                model = %config.model_id,
                attempt,
                max_retries = self.retry_config.max_retries,
                backoff_ms = backoff.as_millis() as u64,
                error = %err,
                "Retrying LLM request"
            );
            tokio::time::sleep(backoff).await;
        }
    }
}

impl LlmClient for RetryingClient {
    fn name(&self) -> &str {
        self.primary.name()
    }

    fn complete(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<String>> {
        let config = config.clone();

        Box::pin(async move {
            let primary_err = match self.ask_primary(&config, &messages).await {
                Ok(text) => return Ok(text),
                Err((Recovery::Abort, e)) => return Err(e),
                Err((_, e)) => e,
            };

            if !self.fallbacks.is_empty() {
                info!(
                    model = %config.model_id,
                    error = %primary_err,
                    "Primary model gave up, trying fallbacks"
                );
            }
            for (fb_config, fb_client) in &self.fallbacks {
                match fb_client.complete(fb_config, messages.clone()).await {
                    Ok(text) => {
                        info!(
                            model = %fb_config.model_id,
                            provider = %fb_config.provider,
                            "Answered by fallback model"
                        );
                        return Ok(text);
                    }
                    Err(e) if recovery_for(&e) == Recovery::Abort => return Err(e),
                    Err(e) => {
                        warn!(model = %fb_config.model_id, error = %e, "Fallback model failed");
                    }
                }
            }

            Err(primary_err)
        })
    }
}
