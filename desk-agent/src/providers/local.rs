//! Local inference server provider (LM-Studio-style endpoint).
//!
//! Local mode has no authentication concept: every failure, including odd
//! HTTP statuses, surfaces as `Unreachable`.

use super::{
    build_messages, extract_content, transport_error, validate_local, ChatProvider, ChatRequest,
    ChatResponse, MAX_TOKENS, TEMPERATURE,
};
use crate::config::LocalSettings;
use desk_agent_sdk::{async_trait, ProviderError, ValidationError};
use reqwest::Client;
use std::time::Duration;

pub struct LocalServerProvider {
    settings: LocalSettings,
    base_url: String,
    client: Client,
}

impl LocalServerProvider {
    pub fn new(settings: LocalSettings, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        let base_url = settings.base_url.trim_end_matches('/').to_string();
        Ok(Self {
            settings,
            base_url,
            client,
        })
    }
}

#[async_trait]
impl ChatProvider for LocalServerProvider {
    fn validate(&self) -> Result<(), ValidationError> {
        validate_local(&self.settings)
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
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Unreachable(format!(
                "local endpoint returned status {status}"
            )));
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
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(ProviderError::Unreachable(format!(
                "local endpoint returned status {}",
                response.status()
            )));
        }
        Ok(())
    }
}
