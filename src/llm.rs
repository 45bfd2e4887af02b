//! Language model adapter: one prompt in, one completion out.
//!
//! [`ChatCompletionsClient`] speaks the OpenAI-compatible
//! `POST {base_url}/chat/completions` protocol and uses the same gateway
//! headers as the embedding provider.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use crate::config::LlmConfig;
use crate::http;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

pub struct ChatCompletionsClient {
    model: String,
    base_url: String,
    api_key: String,
    virtual_key: Option<String>,
    client: reqwest::Client,
}

impl ChatCompletionsClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = match http::api_key_from_env(&config.api_key_env) {
            Some(key) => key,
            None => bail!("{} environment variable not set", config.api_key_env),
        };
        Ok(Self {
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            virtual_key: config.virtual_key.clone(),
            client: http::client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl LanguageModel for ChatCompletionsClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
        });
        let req = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        let req = http::with_auth(req, Some(&self.api_key), self.virtual_key.as_deref());
        let json = http::send_json("LLM", req)
            .await
            .context("chat completion request failed")?;
        parse_completion(&json)
    }
}

fn parse_completion(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(|c| c.trim().to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid chat completion response: missing content"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_first_choice_trimmed() {
        let json = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "  Polished text.\n" } }]
        });
        assert_eq!(parse_completion(&json).unwrap(), "Polished text.");
    }

    #[test]
    fn missing_content_is_error() {
        assert!(parse_completion(&serde_json::json!({ "choices": [] })).is_err());
    }

    #[test]
    fn client_requires_key() {
        let config = LlmConfig {
            api_key_env: "FDRAFT_TEST_LLM_KEY_NEVER_SET".into(),
            ..LlmConfig::default()
        };
        assert!(ChatCompletionsClient::new(&config).is_err());
    }
}
