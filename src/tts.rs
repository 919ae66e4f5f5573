use crate::compose::NARRATION_FILE;
use crate::config::Config;
use crate::tool::{ToolInvocation, ToolRunner};
use crate::{logi, logok, logw};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use walkdir::WalkDir;

pub fn tts_args(cfg: &Config, ref_audio: &Path, ref_text: &str, story: &str) -> Vec<String> {
    vec![
        "--model".to_string(),
        cfg.tts_model.clone(),
        "--ref_audio".to_string(),
        ref_audio.display().to_string(),
        "--ref_text".to_string(),
        ref_text.trim().to_string(),
        "--gen_text".to_string(),
        story.to_string(),
        "--output_dir".to_string(),
        ".".to_string(),
    ]
}

/// First `.wav` under `folder` other than the narration itself, in name order.
fn find_stray_wav(folder: &Path) -> Option<PathBuf> {
    let narration = folder.join(NARRATION_FILE);
    WalkDir::new(folder)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .find(|p| {
            p != &narration
                && p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("wav"))
        })
}

/// Synthesises narration into `<folder>/gene_audio.wav`.
///
/// Returns whether the narration exists afterwards. A failing TTS command is
/// logged, not raised; only local filesystem problems are errors.
pub async fn generate_audio_from_story(runner: &dyn ToolRunner, cfg: &Config, story: &str, folder: &Path) -> Result<bool> {
    let ref_audio = std::path::absolute(&cfg.ref_audio)
        .with_context(|| format!("resolve {}", cfg.ref_audio.display()))?;
    let ref_text = fs::read_to_string(&cfg.ref_text)
        .await
        .with_context(|| format!("Failed to read reference text {}", cfg.ref_text.display()))?;

    logi(format!("Synthesising narration with {}...", cfg.tts_command));
    let invocation = ToolInvocation::new(cfg.tts_command.clone(), tts_args(cfg, &ref_audio, &ref_text, story))
        .current_dir(folder)
        .timeout(cfg.tts_timeout());
    if let Err(err) = runner.run(&invocation).await {
        logw(format!("TTS command failed: {}", err));
    }

    let narration = folder.join(NARRATION_FILE);
    if let Some(wav) = find_stray_wav(folder) {
        fs::rename(&wav, &narration)
            .await
            .with_context(|| format!("move {} to {}", wav.display(), narration.display()))?;
    }

    let tests_dir = folder.join("tests");
    if tests_dir.is_dir() {
        fs::remove_dir_all(&tests_dir)
            .await
            .with_context(|| format!("remove {}", tests_dir.display()))?;
    }

    if narration.is_file() {
        logok(format!("Audio generated at normal speed: {}", narration.display()));
        Ok(true)
    } else {
        logw(format!("No narration produced in {}", folder.display()));
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::fake::{self, FakeRunner};
    use tempfile::TempDir;

    fn setup() -> (TempDir, Config, PathBuf) {
        let dir = TempDir::new().unwrap();
        let ref_text = dir.path().join("ref_txt.txt");
        std::fs::write(&ref_text, "reference words\n").unwrap();
        let folder = dir.path().join("run");
        std::fs::create_dir_all(&folder).unwrap();
        let cfg = Config {
            ref_audio: dir.path().join("ref_audio.mp3"),
            ref_text,
            ..Config::default()
        };
        (dir, cfg, folder)
    }

    #[tokio::test]
    async fn output_wav_is_moved_into_place() {
        let (_dir, cfg, folder) = setup();
        let runner = FakeRunner::new(|inv| {
            let cwd = inv.current_dir.clone().unwrap();
            std::fs::create_dir_all(cwd.join("tests")).unwrap();
            std::fs::write(cwd.join("tests/infer_cli_basic.wav"), b"RIFF").unwrap();
            fake::stdout("")
        });

        let ok = generate_audio_from_story(&runner, &cfg, "Once upon a time.", &folder)
            .await
            .unwrap();
        assert!(ok);
        assert!(folder.join(NARRATION_FILE).is_file());
        assert!(!folder.join("tests").exists());

        let calls = runner.calls();
        assert_eq!(calls[0].program, "f5-tts_infer-cli");
        assert_eq!(calls[0].current_dir.as_deref(), Some(folder.as_path()));
        assert_eq!(calls[0].arg_after("--model"), Some("F5TTS_v1_Base"));
        assert_eq!(calls[0].arg_after("--ref_text"), Some("reference words"));
        assert_eq!(calls[0].arg_after("--gen_text"), Some("Once upon a time."));
        assert!(calls[0].arg_after("--ref_audio").unwrap().ends_with("ref_audio.mp3"));
    }

    #[tokio::test]
    async fn failing_command_reports_missing_narration() {
        let (_dir, cfg, folder) = setup();
        let runner = FakeRunner::new(|_| fake::failed("f5-tts_infer-cli"));
        let ok = generate_audio_from_story(&runner, &cfg, "story", &folder).await.unwrap();
        assert!(!ok);
    }

    #[tokio::test]
    async fn existing_narration_is_kept() {
        let (_dir, cfg, folder) = setup();
        std::fs::write(folder.join(NARRATION_FILE), b"RIFF").unwrap();
        let runner = FakeRunner::new(|_| fake::stdout(""));
        assert!(generate_audio_from_story(&runner, &cfg, "story", &folder).await.unwrap());
    }
}
