use crate::error::{VideoError, VideoResult};
use crate::ffmpeg::{self, FFMPEG, VideoEncoder};
use crate::tool::{ToolInvocation, ToolRunner};
use crate::{logi, logok, logw};
use anyhow::{Context, anyhow, ensure};
use rand::Rng;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;

pub const MIN_SPEED: f64 = 1.50;
pub const MAX_SPEED: f64 = 1.75;

fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

/// Uniform playback-rate multiplier, two decimal places, within [1.50, 1.75].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedFactor(f64);

impl SpeedFactor {
    pub fn draw<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self(round_to(rng.gen_range(MIN_SPEED..=MAX_SPEED), 2))
    }

    pub fn new(value: f64) -> Option<Self> {
        (MIN_SPEED..=MAX_SPEED)
            .contains(&value)
            .then_some(Self(round_to(value, 2)))
    }

    pub fn value(self) -> f64 {
        self.0
    }

    /// Multiplier applied to video presentation timestamps.
    pub fn video_pts_multiplier(self) -> f64 {
        round_to(1.0 / self.0, 3)
    }

    pub fn audio_tempo(self) -> f64 {
        self.0
    }

    pub fn video_filter(self) -> String {
        ffmpeg::setpts_filter(self.video_pts_multiplier())
    }

    pub fn audio_filter(self) -> String {
        ffmpeg::atempo_filter(self.audio_tempo())
    }
}

impl fmt::Display for SpeedFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct SpeedSettings {
    pub fps: u32,
    pub hardware_encoder: String,
    pub hardware_timeout: Duration,
    pub software_timeout: Duration,
}

impl Default for SpeedSettings {
    fn default() -> Self {
        Self {
            fps: 60,
            hardware_encoder: "h264_nvenc".to_string(),
            hardware_timeout: Duration::from_secs(120),
            software_timeout: Duration::from_secs(300),
        }
    }
}

/// In-process speed change, used once both ffmpeg tiers have failed.
/// Runs on a blocking thread.
pub trait SpeedLibrary: Send + Sync {
    fn rescale(&self, input: &Path, output: &Path, factor: SpeedFactor, fps: u32) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedTier {
    Hardware,
    Software,
    Library,
    Passthrough,
}

impl fmt::Display for SpeedTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SpeedTier::Hardware => "hardware encode",
            SpeedTier::Software => "software encode",
            SpeedTier::Library => "in-process library",
            SpeedTier::Passthrough => "passthrough (unchanged speed)",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    HardwareAttempt,
    SoftwareAttempt,
    LibraryAttempt,
    Passthrough,
    Done(SpeedTier),
}

impl Stage {
    /// Next stage given whether the current one succeeded. Only failure moves down a tier.
    pub fn after(self, succeeded: bool) -> Stage {
        match (self, succeeded) {
            (Stage::HardwareAttempt, true) => Stage::Done(SpeedTier::Hardware),
            (Stage::HardwareAttempt, false) => Stage::SoftwareAttempt,
            (Stage::SoftwareAttempt, true) => Stage::Done(SpeedTier::Software),
            (Stage::SoftwareAttempt, false) => Stage::LibraryAttempt,
            (Stage::LibraryAttempt, true) => Stage::Done(SpeedTier::Library),
            (Stage::LibraryAttempt, false) => Stage::Passthrough,
            (Stage::Passthrough, _) => Stage::Done(SpeedTier::Passthrough),
            (done @ Stage::Done(_), _) => done,
        }
    }
}

pub struct SpeedTransform {
    runner: Arc<dyn ToolRunner>,
    library: Arc<dyn SpeedLibrary>,
    settings: SpeedSettings,
}

impl SpeedTransform {
    pub fn new(runner: Arc<dyn ToolRunner>, library: Arc<dyn SpeedLibrary>, settings: SpeedSettings) -> Self {
        Self {
            runner,
            library,
            settings,
        }
    }

    /// Produces `final_out` from `normal`, sped up by `factor`.
    ///
    /// Tier failures are absorbed; only a passthrough that cannot move the
    /// normal-speed file into place is an error. The normal-speed file is gone
    /// afterwards either way.
    pub async fn apply(&self, normal: &Path, final_out: &Path, factor: SpeedFactor) -> VideoResult<SpeedTier> {
        logi(format!(
            "Applying {}x speed to video (setpts={}, atempo={})...",
            factor,
            factor.video_pts_multiplier(),
            factor.audio_tempo()
        ));

        let mut stage = Stage::HardwareAttempt;
        let tier = loop {
            stage = match stage {
                Stage::Done(tier) => break tier,
                Stage::Passthrough => {
                    self.passthrough(normal, final_out).await?;
                    stage.after(true)
                }
                attempt => match self.attempt(attempt, normal, final_out, factor).await {
                    Ok(()) => attempt.after(true),
                    Err(err) => {
                        logw(format!("Speed change via {:?} failed: {:#}", attempt, err));
                        let _ = fs::remove_file(final_out).await;
                        attempt.after(false)
                    }
                },
            };
        };

        if tier == SpeedTier::Passthrough {
            logw(format!("Error applying speed change, keeping normal speed video: {}", final_out.display()));
        } else {
            if let Err(err) = fs::remove_file(normal).await {
                logw(format!("Could not remove {}: {}", normal.display(), err));
            }
            logok(format!("Video created with {}x speed via {}: {}", factor, tier, final_out.display()));
        }
        Ok(tier)
    }

    /// Runs a single attempt stage. Passthrough and Done are not attempts.
    pub async fn attempt(&self, stage: Stage, normal: &Path, final_out: &Path, factor: SpeedFactor) -> anyhow::Result<()> {
        match stage {
            Stage::HardwareAttempt => {
                let encoder = VideoEncoder::Hardware {
                    name: self.settings.hardware_encoder.clone(),
                };
                self.external(encoder, self.settings.hardware_timeout, normal, final_out, factor)
                    .await
            }
            Stage::SoftwareAttempt => {
                self.external(VideoEncoder::Software, self.settings.software_timeout, normal, final_out, factor)
                    .await
            }
            Stage::LibraryAttempt => self.in_process(normal, final_out, factor).await,
            other => Err(anyhow!("{:?} is not an encode attempt", other)),
        }
    }

    async fn external(
        &self,
        encoder: VideoEncoder,
        timeout: Duration,
        normal: &Path,
        final_out: &Path,
        factor: SpeedFactor,
    ) -> anyhow::Result<()> {
        let args = ffmpeg::speed_args(
            normal,
            final_out,
            &factor.video_filter(),
            &factor.audio_filter(),
            self.settings.fps,
            &encoder,
        );
        let invocation = ToolInvocation::new(FFMPEG, args).timeout(timeout);
        self.runner.run(&invocation).await?;
        ensure!(final_out.is_file(), "ffmpeg exited cleanly but wrote no {}", final_out.display());
        Ok(())
    }

    async fn in_process(&self, normal: &Path, final_out: &Path, factor: SpeedFactor) -> anyhow::Result<()> {
        logi("Falling back to in-process speed change (slow)...");
        let library = Arc::clone(&self.library);
        let input: PathBuf = normal.to_path_buf();
        let output: PathBuf = final_out.to_path_buf();
        let fps = self.settings.fps;

        tokio::task::spawn_blocking(move || library.rescale(&input, &output, factor, fps))
            .await
            .context("library speed task panicked")??;
        ensure!(final_out.is_file(), "library wrote no {}", final_out.display());
        Ok(())
    }

    async fn passthrough(&self, normal: &Path, final_out: &Path) -> VideoResult<()> {
        if !normal.is_file() {
            return Err(VideoError::NoArtifact {
                path: final_out.to_path_buf(),
            });
        }
        let _ = fs::remove_file(final_out).await;
        if fs::rename(normal, final_out).await.is_err() {
            fs::copy(normal, final_out).await?;
            let _ = fs::remove_file(normal).await;
        }
        Ok(())
    }
}
