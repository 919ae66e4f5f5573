use crate::api::lmstudio::{LmStudio, TextModel};
use crate::compose::VideoCreator;
use crate::config::Config;
use crate::story;
use crate::subtitles;
use crate::tool::{SystemRunner, ToolRunner};
use crate::tts;
use crate::{logi, logok, logw};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

const PHASES: usize = 4;
const PAUSE_BETWEEN_RUNS: Duration = Duration::from_secs(3);

fn phase(n: usize, what: &str) {
    logi(format!("[phase {}/{}] {}", n, PHASES, what));
}

/// Everything one run needs, wired once and reused across runs.
pub struct Pipeline {
    cfg: Config,
    client: reqwest::Client,
    runner: Arc<dyn ToolRunner>,
    model: Arc<dyn TextModel>,
    creator: VideoCreator,
    subtitles: bool,
    pause: Duration,
}

impl Pipeline {
    pub fn new(cfg: Config, subtitles: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .context("Failed to build HTTP client")?;
        let runner: Arc<dyn ToolRunner> = Arc::new(SystemRunner);
        let model: Arc<dyn TextModel> = Arc::new(LmStudio::new(client.clone(), &cfg));
        let creator = VideoCreator::new(cfg.video_settings());
        Ok(Self::with_parts(cfg, client, runner, model, creator, subtitles))
    }

    pub fn with_parts(
        cfg: Config,
        client: reqwest::Client,
        runner: Arc<dyn ToolRunner>,
        model: Arc<dyn TextModel>,
        creator: VideoCreator,
        subtitles: bool,
    ) -> Self {
        Self {
            cfg,
            client,
            runner,
            model,
            creator,
            subtitles,
            pause: PAUSE_BETWEEN_RUNS,
        }
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    /// One story from text to video. True when the final video exists.
    pub async fn run_once(&self, custom_title: Option<&str>, run_number: usize) -> bool {
        phase(
            1,
            if custom_title.is_some() {
                "Generating story with custom title"
            } else {
                "Generating title and story with LLM"
            },
        );
        let text = match story::generate_text_content(self.model.as_ref(), &self.cfg, custom_title).await {
            Ok(text) => text,
            Err(err) => {
                logw(format!("Failed to generate text content, aborting run {}: {:#}", run_number, err));
                return false;
            }
        };

        phase(2, "Generating audio narration");
        match tts::generate_audio_from_story(self.runner.as_ref(), &self.cfg, &text.story, &text.folder).await {
            Ok(true) => {}
            Ok(false) => logw("Narration missing; the video phase will abort"),
            Err(err) => logw(format!("Narration step failed: {:#}", err)),
        }

        phase(3, "Creating video with audio and applying random speed");
        if self.creator.create_video_with_audio(&text.folder).await.is_none() {
            logw(format!("Run {} produced no video: {}", run_number, text.folder.display()));
            return false;
        }

        if self.subtitles {
            phase(4, "Generating SRT subtitles");
            if let Err(err) =
                subtitles::generate_srt_from_video(self.runner.as_ref(), self.client.clone(), &self.cfg, &text.folder).await
            {
                logw(format!("Error during SRT generation: {:#}", err));
            }
        } else {
            phase(4, "Subtitles disabled, skipping");
        }

        logok(format!("Run completed successfully! Output saved to: {}", text.folder.display()));
        true
    }

    /// Runs `runs` times, taking custom titles in order. Returns the number of successful runs.
    pub async fn run_many(&self, runs: usize, titles: &[String]) -> usize {
        let mut successful = 0;
        for i in 0..runs {
            logi(format!("=== Run {} of {} ===", i + 1, runs));
            let title = titles.get(i).map(String::as_str);
            if self.run_once(title, i + 1).await {
                successful += 1;
            }
            if i + 1 < runs {
                logi(format!("Completed run {}. Preparing for next run...", i + 1));
                tokio::time::sleep(self.pause).await;
            }
        }
        logi(format!("All runs completed! Successful runs: {}/{}", successful, runs));
        successful
    }
}

/// Process exit code for a batch: 0 only when every run succeeded.
pub async fn run_generation(cfg: Config, runs: usize, titles: &[String], subtitles: bool) -> Result<i32> {
    let pipeline = Pipeline::new(cfg, subtitles)?;
    let successful = pipeline.run_many(runs, titles).await;
    Ok(if successful == runs { 0 } else { 1 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::{FINAL_FILE, NARRATION_FILE, VideoSettings};
    use crate::ffmpeg::{FFMPEG, FFPROBE};
    use crate::speed::{SpeedFactor, SpeedLibrary};
    use crate::tool::fake::{self, FakeRunner};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct EchoModel {
        fail: bool,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl TextModel for EchoModel {
        async fn respond(&self, _system: &str, user: &str, _temperature: f64) -> Result<String> {
            *self.calls.lock().unwrap() += 1;
            if self.fail {
                anyhow::bail!("offline");
            }
            Ok(format!("Story for {}", user.lines().last().unwrap_or_default()))
        }
    }

    struct NoLibrary;

    impl SpeedLibrary for NoLibrary {
        fn rescale(&self, _: &Path, _: &Path, _: SpeedFactor, _: u32) -> Result<()> {
            anyhow::bail!("unavailable")
        }
    }

    /// TTS writes a wav, ffprobe reports fixed durations, ffmpeg writes its output.
    fn studio() -> FakeRunner {
        FakeRunner::new(|inv| match inv.program.as_str() {
            FFPROBE if inv.arg_after("-show_entries") == Some("stream=width,height") => fake::stdout("720x1280"),
            FFPROBE => fake::stdout("9.5"),
            FFMPEG => {
                if let Some(out) = inv.last_arg() {
                    std::fs::write(out, b"video").unwrap();
                }
                fake::stdout("")
            }
            _ => {
                let cwd = inv.current_dir.clone().unwrap();
                std::fs::write(cwd.join("out.wav"), b"RIFF").unwrap();
                fake::stdout("")
            }
        })
    }

    fn pipeline(dir: &TempDir, model: Arc<EchoModel>, runner: Arc<FakeRunner>) -> Pipeline {
        let root = dir.path();
        for cat in ["a", "b"] {
            std::fs::create_dir_all(root.join("Videos").join(cat)).unwrap();
            for i in 0..3 {
                std::fs::write(root.join("Videos").join(cat).join(format!("{i}.mp4")), b"clip").unwrap();
            }
        }
        std::fs::write(root.join("title.txt"), "T").unwrap();
        std::fs::write(root.join("story.txt"), "S").unwrap();
        std::fs::write(root.join("ref.txt"), "ref").unwrap();

        let cfg = Config {
            title_prompt_path: root.join("title.txt"),
            story_prompt_path: root.join("story.txt"),
            ref_text: root.join("ref.txt"),
            ref_audio: root.join("ref.mp3"),
            output_base: root.join("out"),
            videos_root: root.join("Videos"),
            ..Config::default()
        };
        let settings = VideoSettings {
            videos_root: cfg.videos_root.clone(),
            ..VideoSettings::default()
        };
        let creator = VideoCreator::with_backends(runner.clone(), Arc::new(NoLibrary), settings);
        Pipeline::with_parts(cfg, reqwest::Client::new(), runner, model, creator, false).with_pause(Duration::ZERO)
    }

    #[tokio::test]
    async fn full_run_leaves_a_final_video() {
        let dir = TempDir::new().unwrap();
        let model = Arc::new(EchoModel {
            fail: false,
            calls: Mutex::new(0),
        });
        let p = pipeline(&dir, model, Arc::new(studio()));

        assert!(p.run_once(Some("Night Ferry"), 1).await);
        let folder = dir.path().join("out/Night_Ferry");
        assert!(folder.join(NARRATION_FILE).is_file());
        assert!(folder.join(FINAL_FILE).is_file());
    }

    #[tokio::test]
    async fn batch_counts_successes_and_consumes_titles_in_order() {
        let dir = TempDir::new().unwrap();
        let model = Arc::new(EchoModel {
            fail: false,
            calls: Mutex::new(0),
        });
        let p = pipeline(&dir, model, Arc::new(studio()));

        let titles = vec!["First One".to_string(), "Second One".to_string()];
        assert_eq!(p.run_many(2, &titles).await, 2);
        assert!(dir.path().join("out/First_One").is_dir());
        assert!(dir.path().join("out/Second_One").is_dir());
    }

    #[tokio::test]
    async fn missing_narration_fails_the_run() {
        let dir = TempDir::new().unwrap();
        let model = Arc::new(EchoModel {
            fail: true,
            calls: Mutex::new(0),
        });
        let runner = Arc::new(FakeRunner::new(|inv| {
            if inv.program == FFPROBE || inv.program == FFMPEG {
                fake::stdout("1.0")
            } else {
                fake::failed(&inv.program)
            }
        }));
        let p = pipeline(&dir, Arc::clone(&model), Arc::clone(&runner));

        assert!(!p.run_once(None, 1).await);
        assert_eq!(*model.calls.lock().unwrap(), 2);
        assert!(runner.calls().iter().all(|c| c.program != FFPROBE));
    }
}
