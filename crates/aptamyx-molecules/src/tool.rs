//! External process execution and artifact lookup.

use std::ffi::{OsStr, OsString};
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use aptamyx_common::{AptamyxError, Result, ToolFailure};

/// Captured output of a successful tool run.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// A command-line tool invoked with a hard timeout.
///
/// A run that exceeds the timeout is killed and reported as
/// [`ToolFailure::TimedOut`], which callers treat like a missing artifact.
#[derive(Debug, Clone)]
pub struct ExternalTool {
    executable: PathBuf,
    timeout: Duration,
}

impl ExternalTool {
    pub fn new<P: AsRef<Path>>(executable: P, timeout: Duration) -> Self {
        Self {
            executable: executable.as_ref().to_path_buf(),
            timeout,
        }
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    fn display_name(&self) -> String {
        self.executable.display().to_string()
    }

    /// Run to completion. `cwd` defaults to the current process directory.
    pub async fn run<I, S>(&self, args: I, cwd: Option<&Path>) -> Result<ToolOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.execute(collect_args(args), None, cwd).await
    }

    /// Run with `input` written to the child's stdin, which is then closed.
    pub async fn run_with_input<I, S>(
        &self,
        args: I,
        input: &[u8],
        cwd: Option<&Path>,
    ) -> Result<ToolOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.execute(collect_args(args), Some(input), cwd).await
    }

    async fn execute(
        &self,
        args: Vec<OsString>,
        input: Option<&[u8]>,
        cwd: Option<&Path>,
    ) -> Result<ToolOutput> {
        info!(executable = %self.display_name(), ?args, "Running external tool");

        let mut command = Command::new(&self.executable);
        command
            .args(&args)
            .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }

        // the child is owned by this future, so an elapsed timeout kills it
        let exec = async {
            let mut child = command.spawn()?;
            if let (Some(bytes), Some(mut stdin)) = (input, child.stdin.take()) {
                stdin.write_all(bytes).await?;
            }
            child.wait_with_output().await
        };

        let output = match tokio::time::timeout(self.timeout, exec).await {
            Err(_) => {
                return Err(ToolFailure::TimedOut {
                    executable: self.display_name(),
                    seconds: self.timeout.as_secs(),
                }
                .into())
            }
            Ok(Err(e))
                if matches!(e.kind(), IoErrorKind::NotFound | IoErrorKind::PermissionDenied) =>
            {
                return Err(ToolFailure::NotFound {
                    executable: self.display_name(),
                }
                .into())
            }
            Ok(Err(e)) => {
                return Err(ToolFailure::Failed {
                    executable: self.display_name(),
                    status: None,
                    stderr: e.to_string(),
                }
                .into())
            }
            Ok(Ok(output)) => output,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        debug!(executable = %self.display_name(), %stdout, %stderr, "Tool output");

        if !output.status.success() {
            return Err(ToolFailure::Failed {
                executable: self.display_name(),
                status: output.status.code(),
                stderr,
            }
            .into());
        }
        Ok(ToolOutput { stdout, stderr })
    }
}

fn collect_args<I, S>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    args.into_iter().map(|a| a.as_ref().to_os_string()).collect()
}

/// One naming convention under which a tool may have written its output.
#[derive(Debug, Clone)]
pub enum ArtifactPattern {
    Exact(PathBuf),
    /// Any regular file in `dir` whose name ends with `suffix`
    Suffix { dir: PathBuf, suffix: String },
}

impl ArtifactPattern {
    pub fn suffix(dir: impl AsRef<Path>, suffix: impl Into<String>) -> Self {
        ArtifactPattern::Suffix {
            dir: dir.as_ref().to_path_buf(),
            suffix: suffix.into(),
        }
    }

    fn describe(&self) -> String {
        match self {
            ArtifactPattern::Exact(path) => path.display().to_string(),
            ArtifactPattern::Suffix { dir, suffix } => format!("{}/*{}", dir.display(), suffix),
        }
    }

    async fn resolve(&self) -> Option<PathBuf> {
        match self {
            ArtifactPattern::Exact(path) => fs::metadata(path)
                .await
                .ok()
                .filter(|m| m.is_file())
                .map(|_| path.clone()),
            ArtifactPattern::Suffix { dir, suffix } => {
                let mut entries = fs::read_dir(dir).await.ok()?;
                let mut matches = Vec::new();
                while let Ok(Some(entry)) = entries.next_entry().await {
                    let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
                    let name = entry.file_name();
                    if is_file && name.to_string_lossy().ends_with(suffix.as_str()) {
                        matches.push(entry.path());
                    }
                }
                matches.sort();
                matches.into_iter().next()
            }
        }
    }
}

/// Try each pattern in order and return the first existing artifact.
pub async fn find_artifact(phase: &str, patterns: &[ArtifactPattern]) -> Result<PathBuf> {
    for pattern in patterns {
        if let Some(path) = pattern.resolve().await {
            debug!(
                phase,
                artifact = %path.display(),
                pattern = %pattern.describe(),
                "Artifact found"
            );
            return Ok(path);
        }
    }
    Err(AptamyxError::Tool(ToolFailure::MissingArtifact {
        phase: phase.to_string(),
        searched: patterns.iter().map(ArtifactPattern::describe).collect(),
    }))
}
