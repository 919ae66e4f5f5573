use crate::error::ToolError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Timeout applied to short helper invocations such as ffprobe calls.
pub const HELPER_TIMEOUT: Duration = Duration::from_secs(30);

const STDERR_TAIL_CHARS: usize = 800;

/// One external program call: what to run, where, and how long to wait.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

impl ToolInvocation {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            current_dir: None,
            timeout: None,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn timeout_opt(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Value following `flag` in the argument list, if any.
    pub fn arg_after(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    pub fn last_arg(&self) -> Option<&str> {
        self.args.last().map(String::as_str)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs external programs. Every subprocess the pipeline spawns goes through here.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput, ToolError>;
}

/// Spawns real processes with tokio. The child is killed if the call is
/// abandoned, so a timeout never leaves an encoder running.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait]
impl ToolRunner for SystemRunner {
    async fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput, ToolError> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &invocation.current_dir {
            cmd.current_dir(dir);
        }

        let result = match invocation.timeout {
            Some(limit) => match tokio::time::timeout(limit, cmd.output()).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(ToolError::TimedOut {
                        program: invocation.program.clone(),
                        timeout: limit,
                    });
                }
            },
            None => cmd.output().await,
        };

        let output = result.map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                ToolError::Missing {
                    program: invocation.program.clone(),
                }
            } else {
                ToolError::Launch {
                    program: invocation.program.clone(),
                    source: err,
                }
            }
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(ToolError::Failed {
                program: invocation.program.clone(),
                code: output.status.code(),
                stderr: tail_chars(stderr.trim(), STDERR_TAIL_CHARS),
            });
        }

        Ok(ToolOutput { stdout, stderr })
    }
}

fn tail_chars(text: &str, max: usize) -> String {
    let count = text.chars().count();
    if count <= max {
        return text.to_string();
    }
    text.chars().skip(count - max).collect()
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::sync::Mutex;

    type Responder = dyn Fn(&ToolInvocation) -> Result<ToolOutput, ToolError> + Send + Sync;

    /// Records every invocation and answers with a scripted closure.
    pub(crate) struct FakeRunner {
        pub calls: Mutex<Vec<ToolInvocation>>,
        respond: Box<Responder>,
    }

    impl FakeRunner {
        pub(crate) fn new(
            respond: impl Fn(&ToolInvocation) -> Result<ToolOutput, ToolError> + Send + Sync + 'static,
        ) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                respond: Box::new(respond),
            }
        }

        pub(crate) fn calls(&self) -> Vec<ToolInvocation> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ToolRunner for FakeRunner {
        async fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput, ToolError> {
            self.calls.lock().unwrap().push(invocation.clone());
            (self.respond)(invocation)
        }
    }

    pub(crate) fn stdout(text: &str) -> Result<ToolOutput, ToolError> {
        Ok(ToolOutput {
            stdout: text.to_string(),
            stderr: String::new(),
        })
    }

    pub(crate) fn failed(program: &str) -> Result<ToolOutput, ToolError> {
        Err(ToolError::Failed {
            program: program.to_string(),
            code: Some(1),
            stderr: "simulated failure".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arg_after_finds_flag_values() {
        let inv = ToolInvocation::new(
            "ffmpeg",
            vec!["-i".into(), "in.mp4".into(), "-r".into(), "60".into(), "out.mp4".into()],
        );
        assert_eq!(inv.arg_after("-r"), Some("60"));
        assert_eq!(inv.arg_after("-x"), None);
        assert_eq!(inv.last_arg(), Some("out.mp4"));
    }

    #[test]
    fn stderr_tail_keeps_the_end() {
        assert_eq!(tail_chars("abcdef", 3), "def");
        assert_eq!(tail_chars("abc", 10), "abc");
    }

    #[tokio::test]
    async fn missing_binary_maps_to_missing() {
        let inv = ToolInvocation::new("definitely-not-a-real-binary-4242", vec![])
            .timeout(Duration::from_secs(5));
        let err = SystemRunner.run(&inv).await.unwrap_err();
        assert!(matches!(err, ToolError::Missing { .. }), "{err:?}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_process_times_out() {
        let inv = ToolInvocation::new("sleep", vec!["5".into()]).timeout(Duration::from_millis(100));
        let started = std::time::Instant::now();
        let err = SystemRunner.run(&inv).await.unwrap_err();
        assert!(
            matches!(&err, ToolError::TimedOut { program, timeout } if program == "sleep" && *timeout == Duration::from_millis(100)),
            "{err:?}"
        );
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
