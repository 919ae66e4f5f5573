use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single external tool invocation.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("`{program}` was not found on PATH")]
    Missing { program: String },

    #[error("`{program}` timed out after {}s", timeout.as_secs())]
    TimedOut { program: String, timeout: Duration },

    #[error("`{program}` exited with code {code:?}: {stderr}")]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("failed to launch `{program}`: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by the video-assembly core.
#[derive(Debug, Error)]
pub enum VideoError {
    #[error("{what} not found at {}", path.display())]
    NotFound { what: &'static str, path: PathBuf },

    #[error("Cannot select {requested} unique videos. Maximum is {available}.")]
    InsufficientAssets { requested: usize, available: usize },

    #[error("could not determine duration of {}", path.display())]
    Probe {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    #[error("no video files found in {}", root.display())]
    EmptyCatalog { root: PathBuf },

    #[error("none of the {attempted} selected clips could be loaded")]
    NoClipsLoaded { attempted: usize },

    #[error("rendering {} failed", path.display())]
    Render {
        path: PathBuf,
        #[source]
        source: ToolError,
    },

    #[error("speed transform left no artifact at {}", path.display())]
    NoArtifact { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type VideoResult<T> = std::result::Result<T, VideoError>;
