use crate::error::{VideoError, VideoResult};
use crate::ffmpeg::{self, CompositionRender, FFMPEG};
use crate::inventory::scan_catalog;
use crate::libav::LibavRescaler;
use crate::probe::probe_duration;
use crate::selector::{SelectionPlan, pick_non_repeating};
use crate::speed::{SpeedFactor, SpeedLibrary, SpeedSettings, SpeedTransform};
use crate::tool::{SystemRunner, ToolInvocation, ToolRunner};
use crate::{logi, logok, logw};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;

pub const NARRATION_FILE: &str = "gene_audio.wav";
pub const NORMAL_SPEED_FILE: &str = "normal_speed.mp4";
pub const FINAL_FILE: &str = "final_output.mp4";

pub const SECONDS_PER_CLIP: f64 = 5.0;

/// Roughly one clip per `seconds_per_clip` of narration, never fewer than one.
pub fn clip_count_for(duration: f64, seconds_per_clip: f64) -> usize {
    (duration / seconds_per_clip).floor().max(0.0) as usize + 1
}

#[derive(Debug, Clone)]
pub struct VideoSettings {
    pub videos_root: PathBuf,
    pub fps: u32,
    pub seconds_per_clip: f64,
    pub render_timeout: Option<Duration>,
    pub speed: SpeedSettings,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            videos_root: PathBuf::from("Videos"),
            fps: 60,
            seconds_per_clip: SECONDS_PER_CLIP,
            render_timeout: Some(Duration::from_secs(900)),
            speed: SpeedSettings::default(),
        }
    }
}

#[derive(Debug, Clone)]
struct LoadedClip {
    path: PathBuf,
    duration: f64,
    dims: (u32, u32),
}

/// Builds `final_output.mp4` for a run folder that already holds its narration.
pub struct VideoCreator {
    runner: Arc<dyn ToolRunner>,
    library: Arc<dyn SpeedLibrary>,
    settings: VideoSettings,
}

impl VideoCreator {
    pub fn new(settings: VideoSettings) -> Self {
        Self::with_backends(Arc::new(SystemRunner), Arc::new(LibavRescaler), settings)
    }

    pub fn with_backends(runner: Arc<dyn ToolRunner>, library: Arc<dyn SpeedLibrary>, settings: VideoSettings) -> Self {
        Self {
            runner,
            library,
            settings,
        }
    }

    /// Runs the whole composition. Every abort is logged here and reported as
    /// `None`; the caller only learns whether a final artifact exists.
    pub async fn create_video_with_audio(&self, output_dir: &Path) -> Option<PathBuf> {
        match self.try_create(output_dir).await {
            Ok(path) => Some(path),
            Err(err) => {
                logw(format!("Video creation aborted: {:#}", anyhow::Error::from(err)));
                None
            }
        }
    }

    pub async fn try_create(&self, output_dir: &Path) -> VideoResult<PathBuf> {
        let narration = output_dir.join(NARRATION_FILE);
        let target = probe_duration(self.runner.as_ref(), &narration).await?;
        logi(format!("Audio duration: {:.2} seconds", target));

        let root = &self.settings.videos_root;
        let catalog = scan_catalog(root)?;
        if catalog.is_empty() {
            return Err(VideoError::EmptyCatalog { root: root.clone() });
        }
        logi(format!(
            "Found {} categories with {} videos",
            catalog.category_count(),
            catalog.distinct_assets()
        ));

        let count = clip_count_for(target, self.settings.seconds_per_clip);
        let plan = pick_non_repeating(&catalog, count)?;
        logi(format!("Selected {} clips for {:.2}s of narration", plan.len(), target));

        let clips = self.load_clips(&plan, target).await?;
        let normal = output_dir.join(NORMAL_SPEED_FILE);
        self.render_normal_speed(&clips, &narration, target, &normal).await?;

        let final_out = output_dir.join(FINAL_FILE);
        let factor = SpeedFactor::draw(&mut rand::thread_rng());
        let transform = SpeedTransform::new(
            Arc::clone(&self.runner),
            Arc::clone(&self.library),
            self.settings.speed.clone(),
        );
        transform.apply(&normal, &final_out, factor).await?;

        if !final_out.is_file() {
            return Err(VideoError::NoArtifact { path: final_out });
        }
        Ok(final_out)
    }

    /// Opens clips in plan order until their running total covers `target`.
    /// A clip that cannot be probed is skipped.
    async fn load_clips(&self, plan: &SelectionPlan, target: f64) -> VideoResult<Vec<LoadedClip>> {
        let mut clips = Vec::new();
        let mut total = 0.0;
        let mut attempted = 0;

        for entry in plan.entries() {
            if total >= target {
                break;
            }
            attempted += 1;
            match self.open_clip(&entry.path).await {
                Ok(clip) => {
                    logi(format!(
                        "Loaded {} [{}] ({:.2}s, {}x{})",
                        clip.path.display(),
                        entry.category,
                        clip.duration,
                        clip.dims.0,
                        clip.dims.1
                    ));
                    total += clip.duration;
                    clips.push(clip);
                }
                Err(err) => logw(format!("Error loading video {}: {:#}", entry.path.display(), err)),
            }
        }

        if clips.is_empty() {
            return Err(VideoError::NoClipsLoaded { attempted });
        }
        if total < target {
            logw(format!(
                "Loaded footage covers {:.2}s of {:.2}s; holding the last frame for the rest",
                total, target
            ));
        }
        Ok(clips)
    }

    async fn open_clip(&self, path: &Path) -> anyhow::Result<LoadedClip> {
        let duration = ffmpeg::ffprobe_duration_seconds(self.runner.as_ref(), path).await?;
        let dims = ffmpeg::ffprobe_video_dimensions(self.runner.as_ref(), path).await?;
        Ok(LoadedClip {
            path: path.to_path_buf(),
            duration,
            dims,
        })
    }

    async fn render_normal_speed(
        &self,
        clips: &[LoadedClip],
        narration: &Path,
        target: f64,
        normal: &Path,
    ) -> VideoResult<()> {
        let total: f64 = clips.iter().map(|c| c.duration).sum();
        let paths: Vec<PathBuf> = clips.iter().map(|c| c.path.clone()).collect();
        let render = CompositionRender {
            clips: &paths,
            canvas: clips[0].dims,
            narration,
            duration: target,
            hold_last_frame: (target - total).max(0.0),
            fps: self.settings.fps,
            output: normal,
        };

        logi(format!("Rendering {} clips to {}...", clips.len(), normal.display()));
        let invocation = ToolInvocation::new(FFMPEG, ffmpeg::composition_args(&render))
            .timeout_opt(self.settings.render_timeout);

        if let Err(source) = self.runner.run(&invocation).await {
            let _ = fs::remove_file(normal).await;
            return Err(VideoError::Render {
                path: normal.to_path_buf(),
                source,
            });
        }
        if !normal.is_file() {
            return Err(VideoError::NoArtifact {
                path: normal.to_path_buf(),
            });
        }
        logok(format!("Normal speed video rendered: {}", normal.display()));
        Ok(())
    }
}
