pub mod api;
pub mod compose;
pub mod config;
pub mod error;
pub mod ffmpeg;
pub mod generator;
pub mod init;
pub mod inventory;
pub mod libav;
pub mod probe;
pub mod selector;
pub mod speed;
pub mod srt;
pub mod story;
pub mod subtitles;
pub mod tool;
pub mod tts;

pub(crate) fn logv(tag: &str, message: &str) {
    match tag {
        "WARN" => tracing::warn!("[{}] {}", tag, message),
        _ => tracing::info!("[{}] {}", tag, message),
    }
}

pub(crate) fn logi(message: impl AsRef<str>) {
    logv("INFO", message.as_ref());
}

pub(crate) fn logok(message: impl AsRef<str>) {
    logv("OK", message.as_ref());
}

pub(crate) fn logw(message: impl AsRef<str>) {
    logv("WARN", message.as_ref());
}
