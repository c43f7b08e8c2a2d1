pub mod providers;
pub mod retry;

use std::sync::Arc;

use flowloom_core::config::{AppConfig, ModelConfig};
use flowloom_core::traits::LlmClient;

pub use providers::azure::AzureClient;
pub use providers::offline::OfflineClient;
pub use providers::openai::OpenAiClient;
pub use retry::RetryingClient;

/// Create an LLM client based on the provider name.
///
/// A provider that needs an API key but has none configured degrades to the
/// offline client, so flows stay runnable without credentials.
pub fn create_client(config: &ModelConfig) -> Box<dyn LlmClient> {
    let has_key = config.api_key.as_deref().is_some_and(|k| !k.is_empty());
    match config.provider.as_str() {
        "offline" | "mock" => Box::new(OfflineClient::new()),
        "azure" if has_key => Box::new(AzureClient::new()),
        // Local OpenAI-compatible servers (Ollama, vLLM) usually need no key
        _ if has_key || config.base_url.is_some() => Box::new(OpenAiClient::new()),
        other => {
            tracing::warn!(provider = %other, "No API key configured, using offline LLM client");
            Box::new(OfflineClient::new())
        }
    }
}

/// Build the client used by `llm` nodes: the primary provider, wrapped with
/// retry and fallback handling when either is configured.
pub fn build_client(config: &AppConfig) -> Arc<dyn LlmClient> {
    let primary = create_client(&config.model);
    if config.fallback_models.is_empty() && config.model.retry.is_none() {
        return Arc::from(primary);
    }
    let retry_config = config.model.retry.clone().unwrap_or_default();
    let fallbacks: Vec<_> = config
        .fallback_models
        .iter()
        .map(|mc| (mc.clone(), create_client(mc)))
        .collect();
    Arc::new(RetryingClient::new(primary, fallbacks, retry_config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_client_by_provider() {
        let mut config = ModelConfig::default();
        assert_eq!(create_client(&config).name(), "offline");

        config.provider = "openai".into();
        assert_eq!(create_client(&config).name(), "offline");

        config.api_key = Some("sk-test".into());
        assert_eq!(create_client(&config).name(), "openai");

        config.provider = "azure".into();
        assert_eq!(create_client(&config).name(), "azure");
    }

    #[test]
    fn keyless_base_url_uses_openai_wire_format() {
        let config = ModelConfig {
            provider: "ollama".into(),
            base_url: Some("http://localhost:11434/v1/chat/completions".into()),
            ..ModelConfig::default()
        };
        assert_eq!(create_client(&config).name(), "openai");
    }

    #[test]
    fn build_client_wraps_only_when_needed() {
        let mut config = AppConfig::default();
        assert_eq!(build_client(&config).name(), "offline");

        config.fallback_models.push(ModelConfig::default());
        // RetryingClient reports the primary's name
        assert_eq!(build_client(&config).name(), "offline");
    }
}
