//! Audio duration detection: ffprobe first, symphonia as the in-process fallback.

use crate::error::{VideoError, VideoResult};
use crate::ffmpeg;
use crate::tool::ToolRunner;
use crate::{logi, logw};
use anyhow::{Context, Result, anyhow};
use std::fs::File;
use std::path::Path;
use symphonia::core::codecs::CODEC_TYPE_NULL;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Duration of the audio asset at `path` in seconds.
///
/// Fails with [`VideoError::NotFound`] before anything is spawned when the
/// file is absent, and with [`VideoError::Probe`] when neither strategy works.
pub async fn probe_duration(runner: &dyn ToolRunner, path: &Path) -> VideoResult<f64> {
    if !path.is_file() {
        return Err(VideoError::NotFound {
            what: "audio file",
            path: path.to_path_buf(),
        });
    }

    let primary = match ffmpeg::ffprobe_duration_seconds(runner, path).await {
        Ok(duration) => return Ok(duration),
        Err(err) => err,
    };
    logw(format!("ffprobe method failed: {:#}", primary));
    logi("Falling back to symphonia for duration detection...");

    let owned = path.to_path_buf();
    let fallback = tokio::task::spawn_blocking(move || library_duration(&owned))
        .await
        .map_err(|join| anyhow!("duration fallback task failed: {join}"))
        .and_then(|r| r);

    match fallback {
        Ok(duration) => Ok(duration),
        Err(err) => {
            logw(format!("symphonia fallback also failed: {:#}", err));
            let cause = err.context(format!("ffprobe: {:#}", primary));
            Err(VideoError::Probe {
                path: path.to_path_buf(),
                source: cause.into(),
            })
        }
    }
}

/// Reads the duration attribute through symphonia. The file handle is
/// released when the format reader drops at the end of this call.
pub fn library_duration(path: &Path) -> Result<f64> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .context("unrecognised audio container")?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| anyhow!("no decodable audio track"))?;
    let track_id = track.id;
    let params = track.codec_params.clone();

    let seconds = match (params.time_base, params.n_frames, params.sample_rate) {
        (Some(tb), Some(frames), _) => {
            let t = tb.calc_time(frames);
            t.seconds as f64 + t.frac
        }
        (None, Some(frames), Some(rate)) if rate > 0 => frames as f64 / rate as f64,
        (Some(tb), None, _) => {
            // No frame count in the header; walk packet timestamps instead.
            let mut end_ts = 0u64;
            loop {
                match format.next_packet() {
                    Ok(packet) if packet.track_id() == track_id => {
                        end_ts = end_ts.max(packet.ts() + packet.dur());
                    }
                    Ok(_) => {}
                    Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                        break;
                    }
                    Err(e) => return Err(e).context("reading packets"),
                }
            }
            let t = tb.calc_time(end_ts);
            t.seconds as f64 + t.frac
        }
        _ => return Err(anyhow!("track carries no timing information")),
    };

    if seconds.is_finite() && seconds > 0.0 {
        Ok(seconds)
    } else {
        Err(anyhow!("non-positive duration {seconds}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::fake::{self, FakeRunner};
    use tempfile::TempDir;

    fn write_wav(path: &Path, sample_rate: u32, samples: u32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..samples {
            writer.write_sample(((i % 100) as i16) * 100).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[tokio::test]
    async fn missing_file_fails_before_spawning_anything() {
        let runner = FakeRunner::new(|_| fake::stdout("12.0"));
        let err = probe_duration(&runner, Path::new("/no/such/gene_audio.wav"))
            .await
            .unwrap_err();
        assert!(matches!(err, VideoError::NotFound { .. }));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn ffprobe_answer_is_used_directly() {
        let dir = TempDir::new().unwrap();
        let audio = dir.path().join("gene_audio.wav");
        std::fs::write(&audio, b"not really audio").unwrap();

        let runner = FakeRunner::new(|_| fake::stdout("23.000000\n"));
        let duration = probe_duration(&runner, &audio).await.unwrap();
        assert_eq!(duration, 23.0);

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].program, "ffprobe");
        assert_eq!(calls[0].arg_after("-show_entries"), Some("format=duration"));
    }

    #[tokio::test]
    async fn falls_back_to_library_when_ffprobe_fails() {
        let dir = TempDir::new().unwrap();
        let audio = dir.path().join("gene_audio.wav");
        write_wav(&audio, 8000, 16000);

        let runner = FakeRunner::new(|_| fake::failed("ffprobe"));
        let duration = probe_duration(&runner, &audio).await.unwrap();
        assert!((duration - 2.0).abs() < 1e-6, "got {duration}");
    }

    #[tokio::test]
    async fn falls_back_when_ffprobe_output_is_unparsable() {
        let dir = TempDir::new().unwrap();
        let audio = dir.path().join("gene_audio.wav");
        write_wav(&audio, 16000, 8000);

        let runner = FakeRunner::new(|_| fake::stdout("N/A"));
        let duration = probe_duration(&runner, &audio).await.unwrap();
        assert!((duration - 0.5).abs() < 1e-6, "got {duration}");
    }

    #[tokio::test]
    async fn both_strategies_failing_is_a_probe_error() {
        let dir = TempDir::new().unwrap();
        let audio = dir.path().join("gene_audio.wav");
        std::fs::write(&audio, b"definitely not a wav file").unwrap();

        let runner = FakeRunner::new(|_| fake::failed("ffprobe"));
        let err = probe_duration(&runner, &audio).await.unwrap_err();
        assert!(matches!(err, VideoError::Probe { .. }), "{err:?}");
    }
}
