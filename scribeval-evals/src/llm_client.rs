// Copyright 2025 Scribeval Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Chat-completion client abstraction.
//!
//! The engine treats the model backend as an opaque capability: ordered
//! system/user messages in, text out, possibly slow, possibly failing. The
//! provider is chosen once at configuration time via [`ProviderConfig`] and
//! injected as an `Arc<dyn ChatClient>`; nothing in the engine branches on a
//! provider name per call.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Message role in a chat exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
}

/// One message of a chat-completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// Errors from chat clients.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("API error: {0}")]
    Api(String),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Trait for chat-completion backends.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Send ordered messages, get the model's text back.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ChatError>;

    /// Identifier of the underlying model, for logging.
    fn model_name(&self) -> &str;
}

/// Provider selection, decided once at configuration time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum ProviderConfig {
    Openai {
        api_key: String,
        model: String,
    },
    AzureOpenai {
        api_key: String,
        base_url: String,
        deployment: String,
        api_version: String,
    },
    Anthropic {
        api_key: String,
        model: String,
    },
}

impl ProviderConfig {
    /// Build the concrete client for this provider.
    pub fn build(self) -> Arc<dyn ChatClient> {
        match self {
            ProviderConfig::Openai { api_key, model } => Arc::new(OpenAIClient::new(api_key, model)),
            ProviderConfig::AzureOpenai {
                api_key,
                base_url,
                deployment,
                api_version,
            } => Arc::new(AzureOpenAIClient::new(api_key, base_url, deployment, api_version)),
            ProviderConfig::Anthropic { api_key, model } => {
                Arc::new(AnthropicClient::new(api_key, model))
            }
        }
    }
}

async fn read_error(response: reqwest::Response) -> ChatError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        ChatError::RateLimited
    } else {
        ChatError::Api(body)
    }
}

/// OpenAI chat-completions client.
pub struct OpenAIClient {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAIClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            api_key,
            model,
            base_url: "https://api.openai.com/v1".to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }
}

#[async_trait]
impl ChatClient for OpenAIClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ChatError> {
        let request = serde_json::json!({
            "model": self.model,
            "messages": messages,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(read_error(response).await);
        }

        let response_data: serde_json::Value = response.json().await?;
        let content = response_data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| ChatError::InvalidResponse("missing content".to_string()))?
            .to_string();

        Ok(content)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Azure OpenAI client: deployment-addressed, api-version pinned.
pub struct AzureOpenAIClient {
    api_key: String,
    base_url: String,
    deployment: String,
    api_version: String,
    client: reqwest::Client,
}

impl AzureOpenAIClient {
    pub fn new(api_key: String, base_url: String, deployment: String, api_version: String) -> Self {
        Self {
            api_key,
            base_url,
            deployment,
            api_version,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ChatClient for AzureOpenAIClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ChatError> {
        // frequency_penalty matches the deployment's tuned generation settings.
        let request = serde_json::json!({
            "messages": messages,
            "frequency_penalty": 1.1,
        });

        let url = format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.base_url, self.deployment, self.api_version
        );

        let response = self
            .client
            .post(url)
            .header("api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(read_error(response).await);
        }

        let response_data: serde_json::Value = response.json().await?;
        let content = response_data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| ChatError::InvalidResponse("missing content".to_string()))?
            .to_string();

        Ok(content)
    }

    fn model_name(&self) -> &str {
        &self.deployment
    }
}

/// Anthropic Messages API client. The system message travels in the
/// top-level `system` field; remaining messages go in the message list.
pub struct AnthropicClient {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl AnthropicClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            api_key,
            model,
            base_url: "https://api.anthropic.com/v1".to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }
}

#[async_trait]
impl ChatClient for AnthropicClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ChatError> {
        let system: String = messages
            .iter()
            .filter(|m| m.role == ChatRole::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let user_messages: Vec<serde_json::Value> = messages
            .iter()
            .filter(|m| m.role != ChatRole::System)
            .map(|m| serde_json::json!({ "role": "user", "content": m.content }))
            .collect();

        let request = serde_json::json!({
            "model": self.model,
            "max_tokens": 256,
            "system": system,
            "messages": user_messages,
        });

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(read_error(response).await);
        }

        let response_data: serde_json::Value = response.json().await?;
        let content = response_data["content"][0]["text"]
            .as_str()
            .ok_or_else(|| ChatError::InvalidResponse("missing content".to_string()))?
            .to_string();

        Ok(content)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_serialization_roles() {
        let json = serde_json::to_string(&ChatMessage::system("s")).unwrap();
        assert_eq!(json, r#"{"role":"system","content":"s"}"#);
        let json = serde_json::to_string(&ChatMessage::user("u")).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"u"}"#);
    }

    #[test]
    fn test_provider_config_builds_named_client() {
        let client = ProviderConfig::Openai {
            api_key: "k".to_string(),
            model: "gpt-4o".to_string(),
        }
        .build();
        assert_eq!(client.model_name(), "gpt-4o");

        let client = ProviderConfig::Anthropic {
            api_key: "k".to_string(),
            model: "claude-3-5-sonnet-20241022".to_string(),
        }
        .build();
        assert_eq!(client.model_name(), "claude-3-5-sonnet-20241022");
    }

    #[test]
    fn test_provider_config_from_json() {
        let config: ProviderConfig = serde_json::from_str(
            r#"{"provider":"azure_openai","api_key":"k","base_url":"https://x","deployment":"gpt4","api_version":"2024-02-01"}"#,
        )
        .unwrap();
        assert_eq!(config.build().model_name(), "gpt4");
    }

    #[tokio::test]
    async fn test_openai_complete_parses_content() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[{"message":{"content":"hello"}}]}"#)
            .create_async()
            .await;

        let client =
            OpenAIClient::new("key".to_string(), "gpt-4o".to_string()).with_base_url(server.url());
        let messages = vec![ChatMessage::system("sys"), ChatMessage::user("hi")];
        let out = client.complete(&messages).await.unwrap();
        assert_eq!(out, "hello");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_openai_rate_limit_maps_to_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_body("slow down")
            .create_async()
            .await;

        let client =
            OpenAIClient::new("key".to_string(), "gpt-4o".to_string()).with_base_url(server.url());
        let err = client
            .complete(&[ChatMessage::user("hi")])
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::RateLimited));
    }

    #[tokio::test]
    async fn test_anthropic_splits_system_message() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/messages")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "system": "be brief",
                "messages": [{ "role": "user", "content": "hi" }],
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"content":[{"text":"ok"}]}"#)
            .create_async()
            .await;

        let client = AnthropicClient::new("key".to_string(), "claude-3-5-haiku-20241022".to_string())
            .with_base_url(server.url());
        let messages = vec![ChatMessage::system("be brief"), ChatMessage::user("hi")];
        let out = client.complete(&messages).await.unwrap();
        assert_eq!(out, "ok");
        mock.assert_async().await;
    }
}
