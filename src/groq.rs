use crate::error::{RagError, Result};
use crate::prompt::Prompt;
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_GROQ_MODEL: &str = "llama-3.3-70b-versatile";
pub const DEFAULT_TEMPERATURE: f32 = 0.3;

/// Produces an answer for an assembled prompt
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &Prompt) -> Result<String>;
}

/// Configuration for the Groq chat-completion API
#[derive(Clone, PartialEq)]
pub struct GroqConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
}

impl fmt::Debug for GroqConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroqConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl GroqConfig {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_key = crate::config::required(&lookup, "GROQ_API_KEY")?;
        let base_url = crate::config::optional(&lookup, "GROQ_BASE_URL")
            .unwrap_or_else(|| DEFAULT_GROQ_BASE_URL.to_string());
        let model = crate::config::optional(&lookup, "GROQ_MODEL")
            .unwrap_or_else(|| DEFAULT_GROQ_MODEL.to_string());

        Ok(GroqConfig {
            api_key,
            base_url,
            model,
            temperature: DEFAULT_TEMPERATURE,
        })
    }
}

/// Client for the Groq OpenAI-compatible API
#[derive(Clone)]
pub struct GroqClient {
    config: GroqConfig,
    client: reqwest::Client,
}

impl GroqClient {
    pub fn new(config: GroqConfig) -> Self {
        let client = reqwest::Client::new();
        GroqClient { config, client }
    }

    pub fn config(&self) -> &GroqConfig {
        &self.config
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl Generator for GroqClient {
    async fn generate(&self, prompt: &Prompt) -> Result<String> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                Message {
                    role: "system",
                    content: &prompt.system,
                },
                Message {
                    role: "user",
                    content: &prompt.question,
                },
            ],
            temperature: self.config.temperature,
        };

        debug!("Requesting completion from {}", self.config.model);
        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| RagError::Generation(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RagError::Generation(format!(
                "API request failed: {} {}",
                status, error_text
            )));
        }

        let response_data: ChatResponse = response
            .json()
            .await
            .map_err(|e| RagError::Generation(format!("malformed response: {}", e)))?;

        response_data
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| RagError::Generation("No response generated".to_string()))
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize, Debug)]
struct ResponseMessage {
    content: Option<String>,
}
