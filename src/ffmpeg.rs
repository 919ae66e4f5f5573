use crate::tool::{HELPER_TIMEOUT, ToolInvocation, ToolRunner};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

pub const FFMPEG: &str = "ffmpeg";
pub const FFPROBE: &str = "ffprobe";

/// Parses ffprobe's bare `format=duration` output. Only finite positive values count.
pub fn parse_duration(text: &str) -> Option<f64> {
    let duration = text.trim().parse::<f64>().ok()?;
    (duration.is_finite() && duration > 0.0).then_some(duration)
}

pub fn ffprobe_duration_args(path: &Path) -> Vec<String> {
    vec![
        "-v".to_string(),
        "error".to_string(),
        "-show_entries".to_string(),
        "format=duration".to_string(),
        "-of".to_string(),
        "default=noprint_wrappers=1:nokey=1".to_string(),
        path.display().to_string(),
    ]
}

pub async fn ffprobe_duration_seconds(runner: &dyn ToolRunner, path: &Path) -> Result<f64> {
    let invocation = ToolInvocation::new(FFPROBE, ffprobe_duration_args(path)).timeout(HELPER_TIMEOUT);
    let output = runner
        .run(&invocation)
        .await
        .context("ffprobe duration failed")?;

    parse_duration(&output.stdout)
        .with_context(|| format!("Invalid duration from ffprobe: {:?}", output.stdout.trim()))
}

pub async fn ffprobe_video_dimensions(runner: &dyn ToolRunner, path: &Path) -> Result<(u32, u32)> {
    let args = vec![
        "-v".to_string(),
        "error".to_string(),
        "-select_streams".to_string(),
        "v:0".to_string(),
        "-show_entries".to_string(),
        "stream=width,height".to_string(),
        "-of".to_string(),
        "csv=s=x:p=0".to_string(),
        path.display().to_string(),
    ];
    let invocation = ToolInvocation::new(FFPROBE, args).timeout(HELPER_TIMEOUT);
    let output = runner
        .run(&invocation)
        .await
        .context("ffprobe execution failed")?;

    let text = output.stdout.trim();
    let mut parts = text.split('x');
    let w = parts.next().and_then(|v| v.trim().parse::<u32>().ok()).unwrap_or(0);
    let h = parts.next().and_then(|v| v.trim().parse::<u32>().ok()).unwrap_or(0);

    if w == 0 || h == 0 {
        return Err(anyhow::anyhow!("Invalid dimensions: {:?}", text));
    }
    Ok((w, h))
}

pub fn setpts_filter(multiplier: f64) -> String {
    format!("setpts={}*PTS", multiplier)
}

pub fn atempo_filter(tempo: f64) -> String {
    format!("atempo={}", tempo)
}

/// Everything needed to render the normal-speed composition.
#[derive(Debug, Clone)]
pub struct CompositionRender<'a> {
    pub clips: &'a [PathBuf],
    pub canvas: (u32, u32),
    pub narration: &'a Path,
    pub duration: f64,
    /// Seconds of last-frame hold appended when the clips run short.
    pub hold_last_frame: f64,
    pub fps: u32,
    pub output: &'a Path,
}

pub fn composition_filter(render: &CompositionRender<'_>) -> String {
    let w = render.canvas.0 & !1;
    let h = render.canvas.1 & !1;
    let mut graph = String::new();
    let mut labels = String::new();

    for i in 0..render.clips.len() {
        graph.push_str(&format!(
            "[{i}:v]scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:black,setsar=1,fps={fps},setpts=PTS-STARTPTS[v{i}];",
            fps = render.fps
        ));
        labels.push_str(&format!("[v{i}]"));
    }

    graph.push_str(&format!(
        "{labels}concat=n={}:v=1:a=0[cat];[cat]",
        render.clips.len()
    ));
    if render.hold_last_frame > 0.0 {
        graph.push_str(&format!(
            "tpad=stop_mode=clone:stop_duration={:.3},",
            render.hold_last_frame
        ));
    }
    graph.push_str(&format!(
        "trim=duration={:.3},setpts=PTS-STARTPTS[v]",
        render.duration
    ));
    graph
}

pub fn composition_args(render: &CompositionRender<'_>) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
    ];
    for clip in render.clips {
        args.push("-i".to_string());
        args.push(clip.display().to_string());
    }
    args.push("-i".to_string());
    args.push(render.narration.display().to_string());

    args.extend([
        "-filter_complex".to_string(),
        composition_filter(render),
        "-map".to_string(),
        "[v]".to_string(),
        "-map".to_string(),
        format!("{}:a", render.clips.len()),
        "-t".to_string(),
        format!("{:.3}", render.duration),
        "-r".to_string(),
        render.fps.to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-preset".to_string(),
        "veryfast".to_string(),
        "-crf".to_string(),
        "22".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        "192k".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        render.output.display().to_string(),
    ]);
    args
}

/// Video encoder selection for the speed transform's external tiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoEncoder {
    Hardware { name: String },
    Software,
}

impl VideoEncoder {
    pub fn args(&self) -> Vec<String> {
        match self {
            VideoEncoder::Hardware { name } => vec![
                "-c:v".to_string(),
                name.clone(),
                "-rc".to_string(),
                "vbr".to_string(),
                "-cq".to_string(),
                "23".to_string(),
                "-b:v".to_string(),
                "0".to_string(),
            ],
            VideoEncoder::Software => vec![
                "-c:v".to_string(),
                "libx264".to_string(),
                "-preset".to_string(),
                "veryfast".to_string(),
                "-crf".to_string(),
                "22".to_string(),
            ],
        }
    }
}

pub fn speed_args(
    input: &Path,
    output: &Path,
    video_filter: &str,
    audio_filter: &str,
    fps: u32,
    encoder: &VideoEncoder,
) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-i".to_string(),
        input.display().to_string(),
        "-filter:v".to_string(),
        video_filter.to_string(),
        "-filter:a".to_string(),
        audio_filter.to_string(),
        "-r".to_string(),
        fps.to_string(),
    ];
    args.extend(encoder.args());
    args.extend([
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        "192k".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        output.display().to_string(),
    ]);
    args
}

/// Mono 16 kHz PCM, the shape transcription services handle best.
pub fn extract_audio_args(video: &Path, wav_out: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-i".to_string(),
        video.display().to_string(),
        "-vn".to_string(),
        "-acodec".to_string(),
        "pcm_s16le".to_string(),
        "-ar".to_string(),
        "16000".to_string(),
        "-ac".to_string(),
        "1".to_string(),
        wav_out.display().to_string(),
    ]
}
