use crate::srt::Word;
use crate::{logi, logw};
use anyhow::{Context, Result, anyhow, bail};
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::fs;

const BASE_URL: &str = "https://api.assemblyai.com/v2";
const POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_POLLS: u32 = 180;

#[derive(Debug, Clone, Deserialize)]
pub struct Transcript {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub words: Option<Vec<Word>>,
}

impl Transcript {
    pub fn is_finished(&self) -> bool {
        matches!(self.status.as_str(), "completed" | "error")
    }
}

#[derive(Deserialize)]
struct UploadResponse {
    upload_url: String,
}

pub struct AssemblyAi {
    client: Client,
    key: String,
}

impl AssemblyAi {
    pub fn new(client: Client, key: impl Into<String>) -> Self {
        Self {
            client,
            key: key.into(),
        }
    }

    pub async fn upload(&self, audio: &Path) -> Result<String> {
        let bytes = fs::read(audio)
            .await
            .with_context(|| format!("read {}", audio.display()))?;
        let resp = self
            .client
            .post(format!("{BASE_URL}/upload"))
            .header("authorization", &self.key)
            .body(bytes)
            .timeout(Duration::from_secs(300))
            .send()
            .await
            .context("AssemblyAI upload failed")?;
        if !resp.status().is_success() {
            bail!("AssemblyAI upload failed HTTP {}", resp.status().as_u16());
        }
        let upload: UploadResponse = resp.json().await.context("AssemblyAI upload response")?;
        Ok(upload.upload_url)
    }

    pub async fn create_transcript(&self, audio_url: &str) -> Result<Transcript> {
        let resp = self
            .client
            .post(format!("{BASE_URL}/transcript"))
            .header("authorization", &self.key)
            .json(&serde_json::json!({ "audio_url": audio_url }))
            .timeout(Duration::from_secs(60))
            .send()
            .await
            .context("AssemblyAI transcript request failed")?;
        if !resp.status().is_success() {
            bail!("AssemblyAI transcript request failed HTTP {}", resp.status().as_u16());
        }
        resp.json().await.context("AssemblyAI transcript response")
    }

    pub async fn get_transcript(&self, id: &str) -> Result<Transcript> {
        let resp = self
            .client
            .get(format!("{BASE_URL}/transcript/{id}"))
            .header("authorization", &self.key)
            .timeout(Duration::from_secs(60))
            .send()
            .await
            .context("AssemblyAI poll failed")?;
        if !resp.status().is_success() {
            bail!("AssemblyAI poll failed HTTP {}", resp.status().as_u16());
        }
        resp.json().await.context("AssemblyAI poll response")
    }

    /// Polls every five seconds until the transcript completes or errors.
    pub async fn wait_for(&self, mut transcript: Transcript) -> Result<Transcript> {
        let mut polls = 0;
        while !transcript.is_finished() {
            if polls >= MAX_POLLS {
                return Err(anyhow!(
                    "transcript {} still '{}' after {} polls",
                    transcript.id,
                    transcript.status,
                    polls
                ));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
            transcript = self.get_transcript(&transcript.id).await?;
            polls += 1;
        }
        Ok(transcript)
    }

    pub async fn export_srt(&self, id: &str) -> Result<String> {
        let resp = self
            .client
            .get(format!("{BASE_URL}/transcript/{id}/srt"))
            .header("authorization", &self.key)
            .timeout(Duration::from_secs(60))
            .send()
            .await
            .context("AssemblyAI srt export failed")?;
        if !resp.status().is_success() {
            bail!("AssemblyAI srt export failed HTTP {}", resp.status().as_u16());
        }
        Ok(resp.text().await.unwrap_or_default())
    }

    /// Upload, transcribe and wait. A transcript that ends in `error` is an error.
    pub async fn transcribe(&self, audio: &Path) -> Result<Transcript> {
        logi("Uploading and transcribing audio with AssemblyAI...");
        let url = self.upload(audio).await?;
        let created = self.create_transcript(&url).await?;
        logi("Waiting for transcription to complete...");
        let done = self.wait_for(created).await?;
        if done.status != "completed" {
            let detail = done.error.clone().unwrap_or_default();
            logw(format!("Transcription failed: {} {}", done.status, detail));
            bail!("transcription ended with status '{}': {}", done.status, detail);
        }
        Ok(done)
    }
}
