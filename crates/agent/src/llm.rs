use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use strata_core::config::LlmConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage], temperature: f32) -> Result<String>;
}

/// Client for the `/v1/chat/completions` shape served by OpenAI and Ollama.
pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<SecretString>,
    model: String,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiCompatibleClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let base_url = config
            .endpoint()
            .ok_or_else(|| anyhow!("llm provider `{}` has no endpoint", config.provider.as_str()))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build http client")?;

        Ok(Self {
            http,
            endpoint: format!("{}/v1/chat/completions", base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: 1000,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn chat(&self, messages: &[ChatMessage], temperature: f32) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages,
            temperature,
            max_tokens: self.max_tokens,
            stream: false,
        };

        let mut request = self.http.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request.send().await.context("chat completion request failed")?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(anyhow!("chat completion returned HTTP {status}: {detail}"));
        }

        let parsed: ChatResponse =
            response.json().await.context("chat completion response was not valid JSON")?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("chat completion response contained no message content"))
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;
    use strata_core::config::{LlmConfig, LlmProvider};

    use super::{ChatMessage, ChatRole, OpenAiCompatibleClient};

    fn config(provider: LlmProvider, base_url: Option<&str>) -> LlmConfig {
        LlmConfig {
            provider,
            api_key: Some(SecretString::from("sk-test".to_string())),
            base_url: base_url.map(str::to_string),
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 5,
        }
    }

    #[test]
    fn endpoint_uses_provider_default_or_configured_base() {
        let openai = OpenAiCompatibleClient::from_config(&config(LlmProvider::OpenAi, None));
        assert_eq!(
            openai.as_ref().map(|client| client.endpoint().to_string()).ok(),
            Some("https://api.openai.com/v1/chat/completions".to_string())
        );

        let ollama = OpenAiCompatibleClient::from_config(&config(
            LlmProvider::Ollama,
            Some("http://gpu-box:11434/"),
        ));
        assert_eq!(
            ollama.as_ref().map(|client| client.endpoint().to_string()).ok(),
            Some("http://gpu-box:11434/v1/chat/completions".to_string())
        );
    }

    #[test]
    fn offline_provider_has_no_endpoint() {
        assert!(OpenAiCompatibleClient::from_config(&config(LlmProvider::Offline, None)).is_err());
    }

    #[test]
    fn messages_serialize_with_lowercase_roles() {
        let json = serde_json::to_value(ChatMessage::system("Context:\nlanguage: rust"));
        assert_eq!(json.ok().and_then(|value| value["role"].as_str().map(str::to_string)), Some("system".to_string()));
        assert_eq!(ChatMessage::user("hi").role, ChatRole::User);
    }
}
