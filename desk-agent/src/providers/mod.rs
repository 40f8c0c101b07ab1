//! Provider capabilities for LLM access.
//!
//! Two variants exist: an OpenAI-style remote provider and a local inference
//! server (LM-Studio-style endpoint). Both speak the chat-completions wire
//! shape. Adding a provider means adding a variant here, not touching call
//! sites; everything downstream works through [`ChatProvider`].

pub mod local;
pub mod openai;

pub use local::LocalServerProvider;
pub use openai::OpenAiProvider;

use crate::config::{Configuration, LocalSettings, ProviderKind, RemoteSettings};
use desk_agent_sdk::{async_trait, ProviderError, ValidationError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Request body bounds for chat-completion calls
pub(crate) const MAX_TOKENS: u32 = 1500;
pub(crate) const TEMPERATURE: f32 = 0.7;

/// Polymorphic LLM access.
///
/// `validate` is synchronous and side-effect-free, with no network use.
/// `probe` is the explicit "test connection" round trip; callers invoke it
/// only on request and may cancel it by dropping the future.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn validate(&self) -> Result<(), ValidationError>;

    /// One bounded chat-completion call
    async fn query(&self, prompt: &str, system: Option<&str>) -> Result<String, ProviderError>;

    /// Optional connectivity check, bounded by the same timeout
    async fn probe(&self) -> Result<(), ProviderError>;
}

/// Build the active provider from the configuration
pub fn build_provider(config: &Configuration) -> anyhow::Result<Arc<dyn ChatProvider>> {
    let timeout = Duration::from_secs(config.request_timeout_secs);
    let provider: Arc<dyn ChatProvider> = match config.provider {
        ProviderKind::Remote => Arc::new(OpenAiProvider::new(config.remote.clone(), timeout)?),
        ProviderKind::Local => Arc::new(LocalServerProvider::new(config.local.clone(), timeout)?),
    };
    Ok(provider)
}

/// Remote settings check: non-empty credential and model name
pub fn validate_remote(settings: &RemoteSettings) -> Result<(), ValidationError> {
    if settings.api_key.trim().is_empty() {
        return Err(ValidationError::new("api_key", "API key must not be empty"));
    }
    if settings.model.trim().is_empty() {
        return Err(ValidationError::new("model", "model name must not be empty"));
    }
    Ok(())
}

/// Local settings check: well-formed http(s) base URL and a model name
pub fn validate_local(settings: &LocalSettings) -> Result<(), ValidationError> {
    let parsed = url::Url::parse(settings.base_url.trim())
        .map_err(|e| ValidationError::new("base_url", format!("not a valid URL: {e}")))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(ValidationError::new(
            "base_url",
            "URL must use http or https",
        ));
    }
    if settings.model.trim().is_empty() {
        return Err(ValidationError::new("model", "model name must not be empty"));
    }
    Ok(())
}

// ── Chat-completions wire shape ──────────────────────────────────

#[derive(Debug, Serialize)]
pub(crate) struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<ChatMessage<'a>>,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Serialize)]
pub(crate) struct ChatMessage<'a> {
    pub role: &'a str,
    pub content: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatResponse {
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatChoice {
    pub message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatResponseMessage {
    pub content: String,
}

pub(crate) fn build_messages<'a>(
    prompt: &'a str,
    system: Option<&'a str>,
) -> Vec<ChatMessage<'a>> {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = system {
        messages.push(ChatMessage {
            role: "system",
            content: system,
        });
    }
    messages.push(ChatMessage {
        role: "user",
        content: prompt,
    });
    messages
}

pub(crate) fn extract_content(response: ChatResponse) -> Result<String, ProviderError> {
    response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content)
        .ok_or_else(|| ProviderError::Unreachable("response contained no choices".to_string()))
}

/// Map a transport failure (timeout, refused connection, DNS) to the
/// provider taxonomy. Timeouts are never left to hang; they surface as
/// `Unreachable`.
pub(crate) fn transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Unreachable("request timed out".to_string())
    } else {
        ProviderError::Unreachable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_rejects_empty_api_key() {
        let settings = RemoteSettings {
            api_key: String::new(),
            model: "gpt-4".to_string(),
        };
        let err = validate_remote(&settings).unwrap_err();
        assert_eq!(err.field, "api_key");
    }

    #[test]
    fn remote_rejects_blank_model() {
        let settings = RemoteSettings {
            api_key: "sk-x".to_string(),
            model: "   ".to_string(),
        };
        let err = validate_remote(&settings).unwrap_err();
        assert_eq!(err.field, "model");
    }

    #[test]
    fn remote_accepts_complete_settings() {
        let settings = RemoteSettings {
            api_key: "sk-x".to_string(),
            model: "gpt-4".to_string(),
        };
        assert!(validate_remote(&settings).is_ok());
    }

    #[test]
    fn local_rejects_malformed_base_url() {
        let settings = LocalSettings {
            base_url: "not a url".to_string(),
            model: "local-model".to_string(),
        };
        let err = validate_local(&settings).unwrap_err();
        assert_eq!(err.field, "base_url");
    }

    #[test]
    fn local_rejects_non_http_scheme() {
        let settings = LocalSettings {
            base_url: "ftp://localhost:1234".to_string(),
            model: "local-model".to_string(),
        };
        let err = validate_local(&settings).unwrap_err();
        assert_eq!(err.field, "base_url");
    }

    #[test]
    fn local_accepts_default_settings() {
        assert!(validate_local(&LocalSettings::default()).is_ok());
    }

    #[test]
    fn system_message_is_prepended() {
        let messages = build_messages("question", Some("be terse"));
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].role, "user");

        let messages = build_messages("question", None);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, "user");
    }

    #[test]
    fn empty_choices_is_an_error() {
        let response = ChatResponse { choices: vec![] };
        assert!(matches!(
            extract_content(response),
            Err(ProviderError::Unreachable(_))
        ));
    }
}
