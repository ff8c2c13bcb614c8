//! Follow-up chat with a hosted therapist agent
//!
//! The agent speaks the OpenAI chat-completions dialect under
//! `<endpoint>/api/v1/chat/completions` (DigitalOcean Gradient agents).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ChatConfig;
use crate::models::ChatMessage;

#[async_trait]
pub trait ChatAgent: Send + Sync {
    /// Answer the latest turn of `history`, grounded in the evaluation report.
    async fn reply(&self, report: &str, history: &[ChatMessage]) -> Result<String, ChatError>;

    fn name(&self) -> &str;
}

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Chat agent API error: {code}")]
    Api { code: u16, body: String },

    #[error("Chat agent credentials not configured")]
    NotConfigured,

    #[error("Chat agent returned no reply")]
    MissingReply,
}

/// System prompt that frames the conversation around the evaluation report.
pub fn system_prompt(report: &str, reply_language: &str) -> String {
    format!(
        "You are a professional, empathetic canine therapist. You have completed a behavioral \
evaluation of a dog and are now holding a follow-up session with the owner.

EVALUATION REPORT:
{report}

Your role:
1. Answer questions about the evaluation report
2. Give practical, specific advice grounded in the observed behavior
3. Guide the owner with concrete steps to improve their dog's behavior
4. Stay empathetic, professional and encouraging
5. Ask follow-up questions when it helps you understand the situation

Reply in {reply_language}, conversationally. Keep answers concise but informative \
(usually 2-4 sentences)."
    )
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    messages: Vec<ChatMessage>,
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GradientChatClient {
    client: Client,
    config: ChatConfig,
    endpoint: String,
    api_token: String,
}

impl GradientChatClient {
    pub fn new(config: &ChatConfig) -> Result<Self, ChatError> {
        let (Some(endpoint), Some(api_token)) = (
            config.endpoint.as_deref().filter(|e| !e.is_empty()),
            config.api_token.as_deref().filter(|t| !t.is_empty()),
        ) else {
            return Err(ChatError::NotConfigured);
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            config: config.clone(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_token: api_token.to_string(),
        })
    }

    pub fn completions_url(&self) -> String {
        format!("{}/api/v1/chat/completions", self.endpoint)
    }
}

#[async_trait]
impl ChatAgent for GradientChatClient {
    async fn reply(&self, report: &str, history: &[ChatMessage]) -> Result<String, ChatError> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ChatMessage::system(system_prompt(
            report,
            &self.config.reply_language,
        )));
        messages.extend(history.iter().cloned());

        let url = self.completions_url();
        tracing::info!(url = %url, messages = messages.len(), "Calling chat agent");

        let request = CompletionRequest {
            messages,
            model: &self.config.model,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(code = status.as_u16(), body = %body, "Chat agent API error");
            return Err(ChatError::Api {
                code: status.as_u16(),
                body,
            });
        }

        let completion: CompletionResponse = response.json().await?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(ChatError::MissingReply)
    }

    fn name(&self) -> &str {
        "gradient"
    }
}
