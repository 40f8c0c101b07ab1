//! OpenAI-style remote provider.

use super::{
    build_messages, extract_content, transport_error, validate_remote, ChatProvider, ChatRequest,
    ChatResponse, MAX_TOKENS, TEMPERATURE,
};
use crate::config::RemoteSettings;
use desk_agent_sdk::{async_trait, ProviderError, ValidationError};
use reqwest::{Client, StatusCode};
use std::time::Duration;

const API_BASE: &str = "https://api.openai.com/v1";

pub struct OpenAiProvider {
    settings: RemoteSettings,
    base_url: String,
    client: Client,
}

impl OpenAiProvider {
    pub fn new(settings: RemoteSettings, timeout: Duration) -> anyhow::Result<Self> {
        Self::with_base_url(settings, timeout, API_BASE)
    }

    /// Point at a different OpenAI-compatible endpoint (used by tests)
    pub fn with_base_url(
        settings: RemoteSettings,
        timeout: Duration,
        base_url: &str,
    ) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            settings,
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn classify_status(status: StatusCode) -> ProviderError {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::AuthFailed,
            StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited,
            other => ProviderError::Unreachable(format!("unexpected status {other}")),
        }
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    fn validate(&self) -> Result<(), ValidationError> {
        validate_remote(&self.settings)
    }

    async fn query(&self, prompt: &str, system: Option<&str>) -> Result<String, ProviderError> {
        let body = ChatRequest {
            model: &self.settings.model,
            messages: build_messages(prompt, system),
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.settings.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::classify_status(status));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Unreachable(format!("malformed response: {e}")))?;
        extract_content(parsed)
    }

    async fn probe(&self) -> Result<(), ProviderError> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.settings.api_key)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::classify_status(status));
        }
        Ok(())
    }
}
