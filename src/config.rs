use crate::compose::VideoSettings;
use crate::logi;
use crate::speed::SpeedSettings;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

/// Environment names for the AssemblyAI key, in lookup order.
pub const ASSEMBLYAI_KEY_ENVS: [&str; 2] = ["ASSEMBLY_AI_API_KEY", "ASSEMBLYAI_API_KEY"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(rename = "lmstudio_base_url")]
    pub llm_base_url: String,
    #[serde(rename = "lmstudio_model")]
    pub llm_model: String,
    pub llm_timeout_secs: u64,
    pub title_prompt_path: PathBuf,
    pub story_prompt_path: PathBuf,

    pub output_base: PathBuf,
    pub videos_root: PathBuf,

    pub tts_command: String,
    pub tts_model: String,
    pub ref_audio: PathBuf,
    pub ref_text: PathBuf,
    pub tts_timeout_secs: u64,

    pub hardware_encoder: String,
    pub render_timeout_secs: u64,

    #[serde(rename = "assemblyai_api_key")]
    pub assemblyai_key: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm_base_url: "http://localhost:1234/v1".to_string(),
            llm_model: "google/gemma-3-4b".to_string(),
            llm_timeout_secs: 600,
            title_prompt_path: PathBuf::from("System_Title_Prompt.txt"),
            story_prompt_path: PathBuf::from("System_Story_Prompt.txt"),
            output_base: PathBuf::from("output"),
            videos_root: PathBuf::from("Videos"),
            tts_command: "f5-tts_infer-cli".to_string(),
            tts_model: "F5TTS_v1_Base".to_string(),
            ref_audio: PathBuf::from("ref_audio.mp3"),
            ref_text: PathBuf::from("ref_txt.txt"),
            tts_timeout_secs: 1800,
            hardware_encoder: "h264_nvenc".to_string(),
            render_timeout_secs: 900,
            assemblyai_key: String::new(),
        }
    }
}

impl Config {
    /// Reads `path`; a missing file means all defaults.
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !fs::try_exists(path).await.unwrap_or(false) {
            logi(format!("No config at {}, using defaults", path.display()));
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        Ok(config)
    }

    /// Fills an empty AssemblyAI key from `ASSEMBLY_AI_API_KEY`, then `ASSEMBLYAI_API_KEY`.
    pub fn with_env(self) -> Self {
        self.with_env_from(|name| std::env::var(name).ok())
    }

    pub fn with_env_from(self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let key = ASSEMBLYAI_KEY_ENVS
            .iter()
            .filter_map(|name| lookup(name))
            .find(|k| !k.trim().is_empty());
        self.with_assemblyai_key(key)
    }

    pub fn with_assemblyai_key(mut self, key: Option<String>) -> Self {
        if self.assemblyai_key.trim().is_empty() {
            if let Some(key) = key.filter(|k| !k.trim().is_empty()) {
                self.assemblyai_key = key.trim().to_string();
            }
        }
        self
    }

    pub fn has_assemblyai_key(&self) -> bool {
        !self.assemblyai_key.trim().is_empty()
    }

    pub fn tts_timeout(&self) -> Duration {
        Duration::from_secs(self.tts_timeout_secs)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }

    pub fn video_settings(&self) -> VideoSettings {
        VideoSettings {
            videos_root: self.videos_root.clone(),
            render_timeout: (self.render_timeout_secs > 0).then(|| Duration::from_secs(self.render_timeout_secs)),
            speed: SpeedSettings {
                hardware_encoder: self.hardware_encoder.clone(),
                ..SpeedSettings::default()
            },
            ..VideoSettings::default()
        }
    }
}
