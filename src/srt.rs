use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tokio::fs;

pub const WORDS_PER_CUE: usize = 6;

/// One transcribed word; times are milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Word {
    pub text: String,
    pub start: u64,
    pub end: u64,
}

/// `HH:MM:SS,mmm`.
fn format_ms(total_ms: u64) -> String {
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let secs = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}

/// Groups words into numbered cues of `per_cue` words each.
pub fn srt_from_words(words: &[Word], per_cue: usize) -> String {
    let per_cue = per_cue.max(1);
    let mut lines = Vec::new();

    for (i, group) in words.chunks(per_cue).enumerate() {
        let (Some(first), Some(last)) = (group.first(), group.last()) else {
            continue;
        };
        let text = group.iter().map(|w| w.text.as_str()).collect::<Vec<_>>().join(" ");
        lines.push((i + 1).to_string());
        lines.push(format!("{} --> {}", format_ms(first.start), format_ms(last.end)));
        lines.push(text);
        lines.push(String::new());
    }

    lines.join("\n")
}

pub async fn write_srt(path: &Path, content: &str) -> Result<()> {
    fs::write(path, content)
        .await
        .with_context(|| format!("write srt: {}", path.display()))
}
