use crate::config::Config;
use crate::logw;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

/// A chat model behind a plain call boundary: prompt in, text out.
#[async_trait]
pub trait TextModel: Send + Sync {
    async fn respond(&self, system: &str, user: &str, temperature: f64) -> Result<String>;
}

/// LM Studio's OpenAI-compatible chat endpoint. The server and the loaded
/// model are managed outside this process.
pub struct LmStudio {
    client: Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl LmStudio {
    pub fn new(client: Client, cfg: &Config) -> Self {
        Self {
            client,
            base_url: cfg.llm_base_url.trim_end_matches('/').to_string(),
            model: cfg.llm_model.clone(),
            timeout: cfg.llm_timeout(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

fn snippet(raw: &str) -> String {
    raw.chars().take(800).collect()
}

fn chat_extract_message_text(resp_json: &str) -> Option<String> {
    let root: serde_json::Value = serde_json::from_str(resp_json).ok()?;

    if let Some(err) = root.get("error") {
        let msg = err
            .get("message")
            .and_then(|v| v.as_str())
            .or_else(|| err.as_str())
            .unwrap_or("unknown error");
        logw(format!("LM Studio error message: {}", msg));
        return None;
    }

    root.get("choices")?
        .as_array()?
        .first()?
        .get("message")?
        .get("content")?
        .as_str()
        .map(str::to_string)
}

#[async_trait]
impl TextModel for LmStudio {
    async fn respond(&self, system: &str, user: &str, temperature: f64) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "temperature": temperature,
            "stream": false,
        });

        let resp = self
            .client
            .post(self.endpoint())
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .context("LM Studio request failed")?;

        let status = resp.status();
        let raw = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            logw(format!("LM Studio HTTP {}", status.as_u16()));
            if !raw.is_empty() {
                logw(format!("LM Studio raw body: {}", snippet(&raw)));
            }
            return Err(anyhow!("LM Studio returned HTTP {}", status.as_u16()));
        }

        chat_extract_message_text(&raw).ok_or_else(|| {
            logw(format!("LM Studio raw body: {}", snippet(&raw)));
            anyhow!("LM Studio response had no message content")
        })
    }
}
