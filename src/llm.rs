use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use tracing::{debug, instrument, warn};

use crate::compose::PromptPair;
use crate::config::Config;

/// Text generation service (composition and translation).
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &PromptPair) -> Result<String>;
}

/// OpenAI-compatible chat-completions client.
#[derive(Clone)]
pub struct OpenAiClient {
    http: Client,
    base_url: Url,
    api_key: String,
    model: String,
}

impl fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl OpenAiClient {
    pub fn new(base_url: &str, api_key: String, model: String) -> Result<Self> {
        let base_url = Url::parse(base_url).context("invalid llm.base_url")?;
        let http = Client::builder()
            .user_agent("farm-digest/0.1")
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            http,
            base_url,
            api_key,
            model,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::new(&cfg.llm.base_url, cfg.llm.api_key.clone(), cfg.llm.model.clone())
    }

    pub fn build_request(&self, prompt: &PromptPair) -> Result<reqwest::Request> {
        let endpoint = self
            .base_url
            .join("v1/chat/completions")
            .context("invalid llm base URL")?;
        self.http
            .post(endpoint)
            .bearer_auth(&self.api_key)
            .json(&build_completion_body(&self.model, prompt))
            .build()
            .context("failed to build chat completion request")
    }
}

#[async_trait]
impl Generator for OpenAiClient {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn generate(&self, prompt: &PromptPair) -> Result<String> {
        let request = self.build_request(prompt)?;
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach generation service")?;
        let status = res.status();
        let body = res
            .text()
            .await
            .context("failed to read generation response")?;
        if !status.is_success() {
            warn!(%status, "generation service error");
            return Err(anyhow!("generation service error {}: {}", status, body));
        }
        debug!(bytes = body.len(), "generation response received");
        parse_completion(&body)
    }
}

pub fn build_completion_body(model: &str, prompt: &PromptPair) -> Value {
    json!({
        "model": model,
        "messages": [
            { "role": "system", "content": prompt.system },
            { "role": "user", "content": prompt.user },
        ],
    })
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Extract `choices[0].message.content`; empty or missing content is malformed.
pub fn parse_completion(body: &str) -> Result<String> {
    let payload: CompletionResponse =
        serde_json::from_str(body).context("invalid chat completion JSON")?;
    payload
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .ok_or_else(|| anyhow!("chat completion carried no content"))
}
