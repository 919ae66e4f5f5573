use crate::api::assemblyai::AssemblyAi;
use crate::compose::FINAL_FILE;
use crate::config::Config;
use crate::ffmpeg::{self, FFMPEG};
use crate::srt::{self, WORDS_PER_CUE, Word};
use crate::tool::{HELPER_TIMEOUT, ToolInvocation, ToolRunner};
use crate::{logi, logok, logw};
use anyhow::{Context, Result};
use reqwest::Client;
use std::path::{Path, PathBuf};

pub const SUBTITLE_FILE: &str = "subtitles.srt";

/// The service's own SRT export when it has content, otherwise cues built
/// from word timings.
pub fn choose_srt(export: Option<String>, words: Option<&[Word]>) -> Option<String> {
    if let Some(text) = export.filter(|t| !t.trim().is_empty()) {
        return Some(text);
    }
    let words = words.filter(|w| !w.is_empty())?;
    logi("Building subtitles from word-level timestamps...");
    Some(srt::srt_from_words(words, WORDS_PER_CUE))
}

/// Writes `subtitles.srt` next to the final video. Returns the path when a
/// file was written; a missing key or video only logs a warning.
pub async fn generate_srt_from_video(
    runner: &dyn ToolRunner,
    client: Client,
    cfg: &Config,
    folder: &Path,
) -> Result<Option<PathBuf>> {
    if !cfg.has_assemblyai_key() {
        logw("ASSEMBLY_AI_API_KEY not set. Skipping SRT generation.");
        return Ok(None);
    }
    let video = folder.join(FINAL_FILE);
    if !video.is_file() {
        logw(format!("Final video not found at {}", video.display()));
        return Ok(None);
    }

    logi("Generating SRT subtitles using AssemblyAI...");
    let temp_audio = tempfile::Builder::new()
        .prefix("temp_for_transcription")
        .suffix(".wav")
        .tempfile_in(folder)
        .context("create temporary audio file")?;

    let extract = ToolInvocation::new(FFMPEG, ffmpeg::extract_audio_args(&video, temp_audio.path()))
        .timeout(HELPER_TIMEOUT);
    runner
        .run(&extract)
        .await
        .context("Error extracting audio for transcription")?;

    let service = AssemblyAi::new(client, cfg.assemblyai_key.clone());
    let transcript = service.transcribe(temp_audio.path()).await?;

    let export = match service.export_srt(&transcript.id).await {
        Ok(text) => Some(text),
        Err(err) => {
            logw(format!("SRT export failed: {:#}", err));
            None
        }
    };

    let Some(content) = choose_srt(export, transcript.words.as_deref()) else {
        logw("AssemblyAI returned neither SRT content nor word timings. No subtitles saved.");
        return Ok(None);
    };

    let srt_path = folder.join(SUBTITLE_FILE);
    srt::write_srt(&srt_path, &content).await?;
    logok(format!("SRT file generated: {}", srt_path.display()));
    Ok(Some(srt_path))
}
