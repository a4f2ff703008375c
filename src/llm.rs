use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CoachError;

/// The language-model boundary. The core hands over a system prompt and a
/// transcript context and gets opaque text back; it never inspects model
/// internals. Implementations may be slow and may fail — failures surface as
/// `ModelUnavailable`.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, system_prompt: &str, context: &str) -> Result<String, CoachError>;
}

/// OpenAI-compatible chat-completions client (Ollama, LM Studio, vLLM,
/// OpenAI, etc.).
#[derive(Clone)]
pub struct LlmClient {
    api_url: String,
    api_key: Option<String>,
    model: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

impl LlmClient {
    pub fn new(api_url: String, api_key: Option<String>, model: String) -> Self {
        Self {
            api_url,
            api_key,
            model,
            client: reqwest::Client::new(),
        }
    }

    async fn chat(&self, messages: Vec<Message>) -> Result<String, CoachError> {
        let url = format!("{}/chat/completions", self.api_url);

        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: Some(0.7),
            max_tokens: Some(1000),
        };

        let mut req = self.client.post(&url).json(&request);

        // API key header only when configured (local models need none).
        if let Some(key) = self.api_key.as_deref() {
            if !key.is_empty() {
                req = req.header("Authorization", format!("Bearer {}", key));
            }
        }

        let response = req
            .send()
            .await
            .map_err(|e| CoachError::ModelUnavailable(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read body".to_string());
            return Err(CoachError::ModelUnavailable(format!(
                "API returned {}: {}",
                status, body
            )));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| CoachError::ModelUnavailable(format!("bad response body: {}", e)))?;

        completion
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| CoachError::ModelUnavailable("no choices in response".to_string()))
    }
}

#[async_trait]
impl LanguageModel for LlmClient {
    async fn generate(&self, system_prompt: &str, context: &str) -> Result<String, CoachError> {
        let messages = vec![
            Message {
                role: "system".to_string(),
                content: system_prompt.to_string(),
            },
            Message {
                role: "user".to_string(),
                content: context.to_string(),
            },
        ];
        self.chat(messages).await
    }
}
