use futures::future::BoxFuture;
use reqwest::Client;
use flowloom_core::config::ModelConfig;
use flowloom_core::error::{FlowError, Result};
use flowloom_core::traits::LlmClient;
use flowloom_core::types::ChatMessage;

/// Azure OpenAI client. Uses the same wire format as OpenAI but different
/// endpoint structure and `api-key` header instead of Bearer token.
pub struct AzureClient {
    http: Client,
}

impl AzureClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }
}

impl Default for AzureClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the deployment URL. `base_url` wins over `azure_resource` so private
/// endpoints can be used.
fn deployment_url(config: &ModelConfig) -> Result<String> {
    let deployment = config
        .azure_deployment
        .as_deref()
        .ok_or_else(|| FlowError::Config("Azure: azure_deployment is required".into()))?;
    let api_version = config
        .azure_api_version
        .as_deref()
        .unwrap_or("2024-02-15-preview");

    let endpoint = match (config.base_url.as_deref(), config.azure_resource.as_deref()) {
        (Some(base), _) => base.trim_end_matches('/').to_string(),
        (None, Some(resource)) => format!("https://{resource}.openai.azure.com"),
        (None, None) => {
            return Err(FlowError::Config(
                "Azure: azure_resource or base_url is required".into(),
            ))
        }
    };

    Ok(format!(
        "{endpoint}/openai/deployments/{deployment}/chat/completions?api-version={api_version}"
    ))
}

impl LlmClient for AzureClient {
    fn name(&self) -> &str {
        "azure"
    }

    fn complete(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<String>> {
        let config = config.clone();

        Box::pin(async move {
            let url = deployment_url(&config)?;
            let api_key = config
                .api_key
                .as_deref()
                .ok_or_else(|| FlowError::Config("Azure: api_key is required".into()))?;

            // Reuse OpenAI message conversion
            let body = serde_json::json!({
                "messages": super::openai::convert_messages(messages),
                "max_tokens": config.max_tokens,
                "temperature": config.temperature,
            });

            let request = self
                .http
                .post(&url)
                .header("api-key", api_key)
                .header("content-type", "application/json")
                .json(&body);

            super::openai::send_chat(request).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_from_resource() {
        let config = ModelConfig {
            azure_resource: Some("contoso".into()),
            azure_deployment: Some("gpt4".into()),
            ..ModelConfig::default()
        };
        assert_eq!(
            deployment_url(&config).unwrap(),
            "https://contoso.openai.azure.com/openai/deployments/gpt4/chat/completions?api-version=2024-02-15-preview"
        );
    }

    #[test]
    fn base_url_overrides_resource() {
        let config = ModelConfig {
            base_url: Some("https://proxy.internal/".into()),
            azure_resource: Some("ignored".into()),
            azure_deployment: Some("d".into()),
            azure_api_version: Some("2024-06-01".into()),
            ..ModelConfig::default()
        };
        assert_eq!(
            deployment_url(&config).unwrap(),
            "https://proxy.internal/openai/deployments/d/chat/completions?api-version=2024-06-01"
        );
    }

    #[test]
    fn missing_deployment_is_config_error() {
        let config = ModelConfig::default();
        assert!(matches!(deployment_url(&config), Err(FlowError::Config(_))));
    }
}
