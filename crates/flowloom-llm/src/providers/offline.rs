use futures::future::BoxFuture;

use flowloom_core::config::ModelConfig;
use flowloom_core::error::Result;
use flowloom_core::traits::LlmClient;
use flowloom_core::types::{truncate_chars, ChatMessage, Role};

/// Deterministic stand-in used when no provider credentials are configured.
///
/// Echoes a short excerpt of the system and user messages so downstream nodes
/// still receive text.
pub struct OfflineClient;

impl OfflineClient {
    pub fn new() -> Self {
        Self
    }
}

impl Default for OfflineClient {
    fn default() -> Self {
        Self::new()
    }
}

fn last_with_role<'a>(messages: &'a [ChatMessage], role: Role) -> &'a str {
    messages
        .iter()
        .rev()
        .find(|m| m.role == role)
        .map(|m| m.content.as_str())
        .unwrap_or("")
}

impl LlmClient for OfflineClient {
    fn name(&self) -> &str {
        "offline"
    }

    fn complete(
        &self,
        _config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let system = last_with_role(&messages, Role::System);
            let user = last_with_role(&messages, Role::User);
            Ok(format!(
                "[mock response] system: \"{}\" input: \"{}\"",
                truncate_chars(system, 50),
                truncate_chars(user, 50)
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echoes_messages() {
        let client = OfflineClient::new();
        let out = client
            .complete(
                &ModelConfig::default(),
                vec![ChatMessage::system("You translate."), ChatMessage::user("hello")],
            )
            .await
            .unwrap();
        assert_eq!(out, "[mock response] system: \"You translate.\" input: \"hello\"");
    }
}
