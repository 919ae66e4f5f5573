use crate::config::Config;
use crate::ffmpeg::{FFMPEG, FFPROBE};
use crate::logi;
use crate::tool::{HELPER_TIMEOUT, ToolInvocation, ToolRunner};
use anyhow::{Context, Result};
use tokio::fs;

pub async fn ensure_directories(cfg: &Config) -> Result<()> {
    for dir in [&cfg.output_base, &cfg.videos_root] {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create dir {}", dir.display()))?;
            logi(format!("Created directory: {}", dir.display()));
        }
    }
    Ok(())
}

/// Required media tools that cannot be run, by name.
pub async fn missing_tools(runner: &dyn ToolRunner) -> Vec<&'static str> {
    let mut missing = Vec::new();
    for tool in [FFMPEG, FFPROBE] {
        let invocation = ToolInvocation::new(tool, vec!["-version".to_string()]).timeout(HELPER_TIMEOUT);
        if runner.run(&invocation).await.is_err() {
            missing.push(tool);
        }
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolError;
    use crate::tool::fake::{self, FakeRunner};
    use tempfile::TempDir;

    #[tokio::test]
    async fn creates_output_and_library_roots() {
        let dir = TempDir::new().unwrap();
        let cfg = Config {
            output_base: dir.path().join("out/stories"),
            videos_root: dir.path().join("Videos"),
            ..Config::default()
        };
        ensure_directories(&cfg).await.unwrap();
        assert!(cfg.output_base.is_dir());
        assert!(cfg.videos_root.is_dir());
        ensure_directories(&cfg).await.unwrap();
    }

    #[tokio::test]
    async fn reports_tools_that_fail_to_run() {
        let runner = FakeRunner::new(|inv| {
            if inv.program == FFPROBE {
                Err(ToolError::Missing {
                    program: inv.program.clone(),
                })
            } else {
                fake::stdout("ffmpeg version 7.0")
            }
        });
        assert_eq!(missing_tools(&runner).await, vec![FFPROBE]);
    }
}
