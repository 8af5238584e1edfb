//! Runs corrected code in a separate interpreter process.
//!
//! Each run gets a fresh temporary working directory, an environment
//! stripped down to `PATH`, a null stdin, a wall-clock timeout and a cap on
//! captured output. Nothing survives between runs.

use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::SandboxConfig;
use crate::error::{PipelineError, StageResult};

pub const TRUNCATION_MARKER: &str = "\n[output truncated]";

pub struct Sandbox {
    config: SandboxConfig,
}

impl Sandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    /// Highlight hint for front-ends, derived from the snippet extension.
    pub fn language(&self) -> &str {
        match self.config.file_extension.as_str() {
            "py" => "python",
            "sh" => "bash",
            "js" => "javascript",
            "rb" => "ruby",
            other => other,
        }
    }

    /// Execute `code` and return its standard output.
    pub async fn run(&self, code: &str) -> StageResult {
        let dir = tempfile::Builder::new()
            .prefix("snapcode-")
            .tempdir()
            .map_err(|e| fault(format!("could not create sandbox directory: {}", e)))?;
        let script = dir
            .path()
            .join(format!("snippet.{}", self.config.file_extension));
        tokio::fs::write(&script, code)
            .await
            .map_err(|e| fault(format!("could not write snippet: {}", e)))?;

        let mut cmd = Command::new(&self.config.interpreter);
        cmd.args(&self.config.args)
            .arg(&script)
            .current_dir(dir.path())
            .env_clear()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Ok(path) = std::env::var("PATH") {
            cmd.env("PATH", path);
        }

        info!(
            "[Sandbox] Running {} chars with {} (timeout {}s)",
            code.len(),
            self.config.interpreter,
            self.config.timeout_secs
        );

        let mut child = cmd
            .spawn()
            .map_err(|e| fault(format!("could not start {}: {}", self.config.interpreter, e)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| fault("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| fault("stderr not captured".to_string()))?;

        let max = self.config.max_output_bytes;
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let collected = tokio::time::timeout(timeout, async {
            tokio::join!(
                read_capped(stdout, max),
                read_capped(stderr, max),
                child.wait()
            )
        })
        .await;

        let (out, err, status) = match collected {
            Ok(parts) => parts,
            Err(_) => {
                warn!("[Sandbox] Timed out after {}s", self.config.timeout_secs);
                // Dropping `child` kills it.
                return Err(fault(format!(
                    "timed out after {}s",
                    self.config.timeout_secs
                )));
            }
        };

        let status = status.map_err(|e| fault(format!("could not wait for process: {}", e)))?;
        let (stdout_bytes, stdout_truncated) =
            out.map_err(|e| fault(format!("could not read stdout: {}", e)))?;
        let (stderr_bytes, _) = err.map_err(|e| fault(format!("could not read stderr: {}", e)))?;

        debug!(
            "[Sandbox] Exit {:?}: {} stdout bytes, {} stderr bytes",
            status.code(),
            stdout_bytes.len(),
            stderr_bytes.len()
        );

        if !status.success() {
            let stderr_text = String::from_utf8_lossy(&stderr_bytes).trim().to_string();
            let detail = if stderr_text.is_empty() {
                format!("process exited with {}", status)
            } else {
                stderr_text
            };
            return Err(fault(detail));
        }

        let mut output = String::from_utf8_lossy(&stdout_bytes).into_owned();
        if stdout_truncated {
            output.push_str(TRUNCATION_MARKER);
        }
        Ok(output)
    }
}

fn fault(detail: String) -> PipelineError {
    PipelineError::ExecutionFault(detail)
}

/// Read a stream to EOF, keeping at most `max` bytes. The rest is drained
/// so the child never blocks on a full pipe.
async fn read_capped<R: AsyncRead + Unpin>(
    mut reader: R,
    max: usize,
) -> std::io::Result<(Vec<u8>, bool)> {
    let mut kept = Vec::new();
    let mut truncated = false;
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let room = max.saturating_sub(kept.len());
        if n > room {
            truncated = true;
        }
        kept.extend_from_slice(&buf[..n.min(room)]);
    }
    Ok((kept, truncated))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::ErrorKind;

    pub(crate) fn sh_config() -> SandboxConfig {
        SandboxConfig {
            interpreter: "sh".to_string(),
            args: Vec::new(),
            file_extension: "sh".to_string(),
            timeout_secs: 5,
            max_output_bytes: 64 * 1024,
        }
    }

    #[tokio::test]
    async fn test_captures_stdout() {
        let sandbox = Sandbox::new(sh_config());
        assert_eq!(sandbox.run("echo hi").await.unwrap(), "hi\n");
    }

    #[tokio::test]
    async fn test_no_output_is_empty_string() {
        let sandbox = Sandbox::new(sh_config());
        assert_eq!(sandbox.run("x=1").await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_failure_reports_stderr() {
        let sandbox = Sandbox::new(sh_config());
        let err = sandbox.run("echo partial; echo boom >&2; exit 3").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExecutionFault);
        let rendered = err.to_string();
        assert!(rendered.starts_with("Error during execution:"));
        assert!(rendered.contains("boom"));
        assert!(!rendered.contains("partial"));
    }

    #[tokio::test]
    async fn test_failure_without_stderr_reports_status() {
        let sandbox = Sandbox::new(sh_config());
        let err = sandbox.run("exit 7").await.unwrap_err();
        assert!(err.to_string().contains("7"));
    }

    #[tokio::test]
    async fn test_timeout_is_execution_fault() {
        let sandbox = Sandbox::new(SandboxConfig {
            timeout_secs: 1,
            ..sh_config()
        });
        let err = sandbox.run("sleep 5").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExecutionFault);
        assert!(err.to_string().contains("timed out after 1s"));
    }

    #[tokio::test]
    async fn test_output_is_capped() {
        let sandbox = Sandbox::new(SandboxConfig {
            max_output_bytes: 4,
            ..sh_config()
        });
        let out = sandbox.run("echo 123456789").await.unwrap();
        assert_eq!(out, format!("1234{}", TRUNCATION_MARKER));
    }

    #[tokio::test]
    async fn test_environment_is_cleared() {
        let sandbox = Sandbox::new(sh_config());
        let out = sandbox.run("echo \"${HOME:-unset}\"").await.unwrap();
        assert_eq!(out, "unset\n");
    }

    #[tokio::test]
    async fn test_runs_do_not_share_state() {
        let sandbox = Sandbox::new(sh_config());
        sandbox.run("export LEAK=1; echo > marker").await.unwrap();
        let out = sandbox
            .run("echo \"${LEAK:-unset}\"; test -e marker && echo present || echo absent")
            .await
            .unwrap();
        assert_eq!(out, "unset\nabsent\n");
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_execution_fault() {
        let sandbox = Sandbox::new(SandboxConfig {
            interpreter: "definitely-not-an-interpreter".to_string(),
            ..sh_config()
        });
        let err = sandbox.run("echo hi").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExecutionFault);
    }

    fn python_available() -> bool {
        std::process::Command::new("python3")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn test_python_print_and_raise() {
        if !python_available() {
            return;
        }
        let sandbox = Sandbox::new(SandboxConfig::default());
        assert_eq!(sandbox.run("print(\"hi\")").await.unwrap(), "hi\n");
        assert_eq!(
            sandbox.run("def f(x):\n    return x + 1").await.unwrap(),
            ""
        );

        let err = sandbox.run("raise ValueError('bad')").await.unwrap_err();
        assert!(err.to_string().starts_with("Error during execution:"));
        assert!(err.to_string().contains("ValueError: bad"));
    }

    #[test]
    fn test_language_hint() {
        assert_eq!(Sandbox::new(SandboxConfig::default()).language(), "python");
        assert_eq!(Sandbox::new(sh_config()).language(), "bash");
    }
}
