//! Library tier of the speed transform. The default `libav` feature links
//! FFmpeg through `ffmpeg-next` and re-encodes in-process; a build without it
//! reports the tier unavailable so the caller moves on to passthrough.

use crate::speed::{SpeedFactor, SpeedLibrary};
use std::path::Path;

#[derive(Debug, Default, Clone, Copy)]
pub struct LibavRescaler;

impl SpeedLibrary for LibavRescaler {
    fn rescale(&self, input: &Path, output: &Path, factor: SpeedFactor, fps: u32) -> anyhow::Result<()> {
        imp::rescale(input, output, factor, fps)
    }
}

#[cfg(not(feature = "libav"))]
mod imp {
    use super::*;

    pub(super) fn rescale(_input: &Path, _output: &Path, _factor: SpeedFactor, _fps: u32) -> anyhow::Result<()> {
        anyhow::bail!("built without the `libav` feature")
    }
}

#[cfg(feature = "libav")]
mod imp {
    use super::*;
    use anyhow::{Context, anyhow};
    use ffmpeg_next as ffmpeg;
    use ffmpeg::{Rational, codec, decoder, encoder, filter, format, frame, media};

    struct VideoLane {
        in_index: usize,
        out_index: usize,
        decoder: decoder::Video,
        encoder: encoder::Video,
        graph: filter::Graph,
        in_time_base: Rational,
        enc_time_base: Rational,
    }

    struct AudioLane {
        in_index: usize,
        out_index: usize,
        decoder: decoder::Audio,
        encoder: encoder::Audio,
        graph: filter::Graph,
        in_time_base: Rational,
        enc_time_base: Rational,
    }

    pub(super) fn rescale(input: &Path, output: &Path, factor: SpeedFactor, fps: u32) -> anyhow::Result<()> {
        ffmpeg::init().context("initialising libav")?;

        let mut ictx = format::input(&input).with_context(|| format!("open {}", input.display()))?;
        let mut octx = format::output(&output).with_context(|| format!("create {}", output.display()))?;
        let global_header = octx.format().flags().contains(format::Flags::GLOBAL_HEADER);

        let mut video = match ictx.streams().best(media::Type::Video) {
            Some(stream) => Some(open_video(&stream, &mut octx, global_header, factor, fps)?),
            None => None,
        };
        let mut audio = match ictx.streams().best(media::Type::Audio) {
            Some(stream) => Some(open_audio(&stream, &mut octx, global_header, factor)?),
            None => None,
        };
        if video.is_none() && audio.is_none() {
            return Err(anyhow!("{} has no audio or video stream", input.display()));
        }

        octx.set_metadata(ictx.metadata().to_owned());
        octx.write_header().context("writing container header")?;

        for (stream, mut packet) in ictx.packets() {
            let index = stream.index();
            if let Some(lane) = video.as_mut().filter(|l| l.in_index == index) {
                packet.rescale_ts(stream.time_base(), lane.in_time_base);
                lane.decoder.send_packet(&packet)?;
                lane.drain_decoder(&mut octx)?;
            } else if let Some(lane) = audio.as_mut().filter(|l| l.in_index == index) {
                packet.rescale_ts(stream.time_base(), lane.in_time_base);
                lane.decoder.send_packet(&packet)?;
                lane.drain_decoder(&mut octx)?;
            }
        }

        if let Some(lane) = video.as_mut() {
            lane.finish(&mut octx)?;
        }
        if let Some(lane) = audio.as_mut() {
            lane.finish(&mut octx)?;
        }

        octx.write_trailer().context("writing container trailer")?;
        Ok(())
    }

    fn open_video(
        stream: &format::stream::Stream,
        octx: &mut format::context::Output,
        global_header: bool,
        factor: SpeedFactor,
        fps: u32,
    ) -> anyhow::Result<VideoLane> {
        let decoder = codec::context::Context::from_parameters(stream.parameters())?
            .decoder()
            .video()?;

        let codec = encoder::find(codec::Id::H264).ok_or_else(|| anyhow!("no H.264 encoder in this libav build"))?;
        let mut ost = octx.add_stream(codec)?;
        let mut enc = codec::context::Context::new_with_codec(codec).encoder().video()?;
        enc.set_width(decoder.width());
        enc.set_height(decoder.height());
        enc.set_aspect_ratio(decoder.aspect_ratio());
        enc.set_format(decoder.format());
        enc.set_frame_rate(Some(Rational::new(fps as i32, 1)));
        enc.set_time_base(Rational::new(1, fps as i32));
        if global_header {
            enc.set_flags(codec::Flags::GLOBAL_HEADER);
        }
        let encoder = enc.open_as(codec)?;
        ost.set_parameters(&encoder);
        ost.set_time_base(Rational::new(1, fps as i32));

        let in_time_base = stream.time_base();
        let aspect = decoder.aspect_ratio();
        let pixel_aspect = if aspect.numerator() > 0 { aspect } else { Rational::new(1, 1) };
        let pix_fmt: ffmpeg::ffi::AVPixelFormat = decoder.format().into();
        let args = format!(
            "video_size={}x{}:pix_fmt={}:time_base={}/{}:pixel_aspect={}/{}",
            decoder.width(),
            decoder.height(),
            pix_fmt as i32,
            in_time_base.numerator(),
            in_time_base.denominator(),
            pixel_aspect.numerator(),
            pixel_aspect.denominator(),
        );

        let mut graph = filter::Graph::new();
        graph.add(&filter::find("buffer").ok_or_else(|| anyhow!("buffer filter missing"))?, "in", &args)?;
        graph.add(&filter::find("buffersink").ok_or_else(|| anyhow!("buffersink filter missing"))?, "out", "")?;
        graph
            .output("in", 0)?
            .input("out", 0)?
            .parse(&format!("{},fps={}", factor.video_filter(), fps))?;
        graph.validate()?;

        Ok(VideoLane {
            in_index: stream.index(),
            out_index: ost.index(),
            decoder,
            encoder,
            graph,
            in_time_base,
            enc_time_base: Rational::new(1, fps as i32),
        })
    }

    fn open_audio(
        stream: &format::stream::Stream,
        octx: &mut format::context::Output,
        global_header: bool,
        factor: SpeedFactor,
    ) -> anyhow::Result<AudioLane> {
        let decoder = codec::context::Context::from_parameters(stream.parameters())?
            .decoder()
            .audio()?;
        let decoder_rate = decoder.rate();

        let codec = encoder::find(codec::Id::AAC).ok_or_else(|| anyhow!("no AAC encoder in this libav build"))?;
        let mut ost = octx.add_stream(codec)?;
        let mut enc = codec::context::Context::new_with_codec(codec).encoder().audio()?;
        let sample_format = codec
            .audio()?
            .formats()
            .and_then(|mut formats| formats.next())
            .ok_or_else(|| anyhow!("AAC encoder lists no sample formats"))?;
        enc.set_rate(decoder.rate() as i32);
        enc.set_channel_layout(decoder.channel_layout());
        enc.set_format(sample_format);
        enc.set_bit_rate(192_000);
        enc.set_time_base(Rational::new(1, decoder.rate() as i32));
        if global_header {
            enc.set_flags(codec::Flags::GLOBAL_HEADER);
        }
        let encoder = enc.open_as(codec)?;
        ost.set_parameters(&encoder);
        ost.set_time_base(Rational::new(1, decoder.rate() as i32));

        let in_time_base = stream.time_base();
        let args = format!(
            "time_base={}/{}:sample_rate={}:sample_fmt={}:channel_layout=0x{:x}",
            in_time_base.numerator(),
            in_time_base.denominator(),
            decoder.rate(),
            decoder.format().name(),
            decoder.channel_layout().bits(),
        );

        let mut graph = filter::Graph::new();
        graph.add(&filter::find("abuffer").ok_or_else(|| anyhow!("abuffer filter missing"))?, "in", &args)?;
        graph.add(&filter::find("abuffersink").ok_or_else(|| anyhow!("abuffersink filter missing"))?, "out", "")?;
        {
            let mut out = graph.get("out").ok_or_else(|| anyhow!("abuffersink not in graph"))?;
            out.set_sample_format(encoder.format());
            out.set_channel_layout(encoder.channel_layout());
            out.set_sample_rate(encoder.rate());
        }
        graph
            .output("in", 0)?
            .input("out", 0)?
            .parse(&factor.audio_filter())?;
        graph.validate()?;
        if let Some(codec) = encoder.codec() {
            if !codec
                .capabilities()
                .contains(codec::capabilities::Capabilities::VARIABLE_FRAME_SIZE)
            {
                if let Some(mut out) = graph.get("out") {
                    out.sink().set_frame_size(encoder.frame_size());
                }
            }
        }

        Ok(AudioLane {
            in_index: stream.index(),
            out_index: ost.index(),
            decoder,
            encoder,
            graph,
            in_time_base,
            enc_time_base: Rational::new(1, decoder_rate as i32),
        })
    }

    fn write_packets(
        encoder: &mut encoder::Encoder,
        out_index: usize,
        enc_time_base: Rational,
        octx: &mut format::context::Output,
    ) -> anyhow::Result<()> {
        let out_time_base = octx
            .stream(out_index)
            .ok_or_else(|| anyhow!("output stream {out_index} vanished"))?
            .time_base();
        let mut encoded = ffmpeg::Packet::empty();
        while encoder.receive_packet(&mut encoded).is_ok() {
            encoded.set_stream(out_index);
            encoded.rescale_ts(enc_time_base, out_time_base);
            encoded.write_interleaved(octx)?;
        }
        Ok(())
    }

    impl VideoLane {
        fn drain_decoder(&mut self, octx: &mut format::context::Output) -> anyhow::Result<()> {
            let mut decoded = frame::Video::empty();
            while self.decoder.receive_frame(&mut decoded).is_ok() {
                let ts = decoded.timestamp();
                decoded.set_pts(ts);
                self.graph
                    .get("in")
                    .ok_or_else(|| anyhow!("buffer source missing"))?
                    .source()
                    .add(&decoded)?;
                self.drain_graph(octx)?;
            }
            Ok(())
        }

        fn drain_graph(&mut self, octx: &mut format::context::Output) -> anyhow::Result<()> {
            let mut filtered = frame::Video::empty();
            loop {
                let got = match self.graph.get("out") {
                    Some(mut sink) => sink.sink().frame(&mut filtered).is_ok(),
                    None => false,
                };
                if !got {
                    break;
                }
                filtered.set_kind(ffmpeg::picture::Type::None);
                self.encoder.send_frame(&filtered)?;
                write_packets(&mut self.encoder, self.out_index, self.enc_time_base, octx)?;
            }
            Ok(())
        }

        fn finish(&mut self, octx: &mut format::context::Output) -> anyhow::Result<()> {
            self.decoder.send_eof()?;
            self.drain_decoder(octx)?;
            if let Some(mut src) = self.graph.get("in") {
                src.source().flush()?;
            }
            self.drain_graph(octx)?;
            self.encoder.send_eof()?;
            write_packets(&mut self.encoder, self.out_index, self.enc_time_base, octx)
        }
    }

    impl AudioLane {
        fn drain_decoder(&mut self, octx: &mut format::context::Output) -> anyhow::Result<()> {
            let mut decoded = frame::Audio::empty();
            while self.decoder.receive_frame(&mut decoded).is_ok() {
                let ts = decoded.timestamp();
                decoded.set_pts(ts);
                self.graph
                    .get("in")
                    .ok_or_else(|| anyhow!("abuffer source missing"))?
                    .source()
                    .add(&decoded)?;
                self.drain_graph(octx)?;
            }
            Ok(())
        }

        fn drain_graph(&mut self, octx: &mut format::context::Output) -> anyhow::Result<()> {
            let mut filtered = frame::Audio::empty();
            loop {
                let got = match self.graph.get("out") {
                    Some(mut sink) => sink.sink().frame(&mut filtered).is_ok(),
                    None => false,
                };
                if !got {
                    break;
                }
                self.encoder.send_frame(&filtered)?;
                write_packets(&mut self.encoder, self.out_index, self.enc_time_base, octx)?;
            }
            Ok(())
        }

        fn finish(&mut self, octx: &mut format::context::Output) -> anyhow::Result<()> {
            self.decoder.send_eof()?;
            self.drain_decoder(octx)?;
            if let Some(mut src) = self.graph.get("in") {
                src.source().flush()?;
            }
            self.drain_graph(octx)?;
            self.encoder.send_eof()?;
            write_packets(&mut self.encoder, self.out_index, self.enc_time_base, octx)
        }
    }
}


#[cfg(all(test, feature = "libav"))]
mod rescale_tests {
    use super::*;
    use ffmpeg_next as ffmpeg;
    use std::process::Command;
    use tempfile::TempDir;

    fn duration_secs(path: &Path) -> f64 {
        let ctx = ffmpeg::format::input(&path).unwrap();
        ctx.duration() as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE)
    }

    #[test]
    fn rescaled_clip_is_shorter() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.mp4");
        let output = dir.path().join("out.mp4");

        // Fixture comes from the ffmpeg CLI; without it there is nothing to rescale.
        let generated = Command::new("ffmpeg")
            .args(["-y", "-v", "error", "-f", "lavfi", "-i", "testsrc=duration=2:size=160x120:rate=30"])
            .args(["-f", "lavfi", "-i", "sine=frequency=440:duration=2:sample_rate=44100"])
            .args(["-c:v", "libx264", "-pix_fmt", "yuv420p", "-c:a", "aac", "-shortest"])
            .arg(&input)
            .status()
            .is_ok_and(|s| s.success());
        if !generated {
            eprintln!("ffmpeg unavailable, skipping");
            return;
        }

        LibavRescaler
            .rescale(&input, &output, SpeedFactor::new(1.6).unwrap(), 60)
            .unwrap();

        assert!(output.is_file());
        let before = duration_secs(&input);
        let after = duration_secs(&output);
        assert!(after > 0.0 && after < before * 0.8, "{before} -> {after}");
    }
}
