//! Supervised document builds
//!
//! Runs the external compiler under a wall-clock limit while a background task
//! answers interactive prompts with newlines. A stalled build is killed, the
//! cache files in the document directory are removed and the build is tried
//! exactly once more before giving up.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::BuildConfig;
use crate::error::{MeterError, Result};
use super::notifier::Notifier;

/// Initial attempt plus one corrective retry
const MAX_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Idle,
    Running { attempt: u32 },
    RetryingWithClear,
    Succeeded,
    TimedOut,
    Failed { code: i32 },
}

/// Timing and cleanup settings for a supervised build
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub keepalive_interval: Duration,
    pub cache_extensions: Vec<String>,
    pub show_output: bool,
    pub notification_display: Duration,
}

impl SupervisorOptions {
    pub fn from_config(config: &BuildConfig, notification_display: Duration) -> Self {
        Self {
            timeout: config.timeout(),
            poll_interval: config.poll_interval(),
            keepalive_interval: config.keepalive_interval(),
            cache_extensions: config.cache_extensions.clone(),
            show_output: config.show_output,
            notification_display,
        }
    }
}

/// Summary of a successful build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub attempts: u32,
    pub cache_files_cleared: usize,
    pub elapsed: Duration,
}

enum AttemptOutcome {
    Exited(ExitStatus),
    Stalled,
}

pub struct BuildSupervisor {
    program: String,
    args: Vec<String>,
    options: SupervisorOptions,
    notifier: Arc<dyn Notifier>,
}

impl BuildSupervisor {
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        options: SupervisorOptions,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            options,
            notifier,
        }
    }

    /// Build `document`, retrying once with a cleared cache if the first
    /// attempt stalls.
    pub async fn build(&self, document: &Path) -> Result<BuildReport> {
        let file_name = document.file_name().ok_or_else(|| {
            MeterError::Config(format!("`{}` is not a document path", document.display()))
        })?;
        if !document.is_file() {
            return Err(MeterError::Config(format!(
                "document `{}` not found",
                document.display()
            )));
        }
        let work_dir = match document.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };

        let started = Instant::now();
        let mut cleared = 0;
        let mut state = BuildState::Idle;

        for attempt in 1..=MAX_ATTEMPTS {
            state = self.transition(state, BuildState::Running { attempt });

            match self.run_attempt(Path::new(file_name), work_dir).await? {
                AttemptOutcome::Exited(status) if status.success() => {
                    self.transition(state, BuildState::Succeeded);
                    return Ok(BuildReport {
                        attempts: attempt,
                        cache_files_cleared: cleared,
                        elapsed: started.elapsed(),
                    });
                }
                AttemptOutcome::Exited(status) => {
                    let code = status.code().unwrap_or(-1);
                    self.transition(state, BuildState::Failed { code });
                    let message = format!(
                        "The PDF generation process has finished with a non-zero error code: {}",
                        code
                    );
                    self.notifier
                        .notify("PDF Generation Error", &message, self.options.notification_display)
                        .await;
                    return Err(MeterError::BuildFailed { code });
                }
                AttemptOutcome::Stalled if attempt < MAX_ATTEMPTS => {
                    state = self.transition(state, BuildState::RetryingWithClear);
                    cleared += clear_cache(work_dir, &self.options.cache_extensions)?;
                }
                AttemptOutcome::Stalled => {}
            }
        }

        self.transition(state, BuildState::TimedOut);
        let message = format!(
            "The PDF generation process has been terminated due to taking longer than {:?}.",
            self.options.timeout
        );
        self.notifier
            .notify("PDF Generation Stalled", &message, self.options.notification_display)
            .await;
        Err(MeterError::BuildTimeout {
            attempts: MAX_ATTEMPTS,
            timeout: self.options.timeout,
        })
    }

    fn transition(&self, from: BuildState, to: BuildState) -> BuildState {
        debug!("Build state {:?} -> {:?}", from, to);
        to
    }

    async fn run_attempt(&self, file_name: &Path, work_dir: &Path) -> Result<AttemptOutcome> {
        let output = || {
            if self.options.show_output {
                Stdio::inherit()
            } else {
                Stdio::null()
            }
        };

        info!("Running {} on {}", self.program, file_name.display());
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(file_name)
            .current_dir(work_dir)
            .stdin(Stdio::piped())
            .stdout(output())
            .stderr(output())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MeterError::Tool {
                tool: self.program.clone(),
                message: format!("failed to start: {}", e),
            })?;

        let cancel = CancellationToken::new();
        let keepalive = child.stdin.take().map(|stdin| {
            tokio::spawn(keep_alive(stdin, self.options.keepalive_interval, cancel.clone()))
        });

        let started = Instant::now();
        let outcome = loop {
            if let Some(status) = child.try_wait()? {
                break AttemptOutcome::Exited(status);
            }
            let elapsed = started.elapsed();
            if elapsed >= self.options.timeout {
                break AttemptOutcome::Stalled;
            }
            tokio::time::sleep(self.options.poll_interval.min(self.options.timeout - elapsed)).await;
        };

        cancel.cancel();
        if let AttemptOutcome::Stalled = outcome {
            warn!(
                "{} still running after {:?}, terminating",
                self.program, self.options.timeout
            );
            if let Err(e) = child.kill().await {
                warn!("Failed to terminate {}: {}", self.program, e);
            }
        }
        if let Some(handle) = keepalive {
            if let Err(e) = handle.await {
                warn!("Keepalive task ended abnormally: {}", e);
            }
        }

        Ok(outcome)
    }
}

/// Feed a newline to the compiler on every tick so interactive prompts don't
/// block the build. Stops on cancellation or once the pipe is closed.
async fn keep_alive(mut stdin: ChildStdin, interval: Duration, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        let write = async {
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        };
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = write => {
                if let Err(e) = result {
                    debug!("Keepalive stopped: {}", e);
                    break;
                }
            }
        }
    }
}

/// Remove cache files with the given extensions from `dir` (not recursive)
pub fn clear_cache(dir: &Path, extensions: &[String]) -> Result<usize> {
    let mut removed = 0;

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| MeterError::Io(e.into()))?;
        let path = entry.path();
        if !entry.file_type().is_file() {
            continue;
        }
        let matches = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map_or(false, |ext| extensions.iter().any(|e| e == ext));
        if matches {
            std::fs::remove_file(path)?;
            removed += 1;
        }
    }

    info!("Cleared {} cache file(s) in {}", removed, dir.display());
    Ok(removed)
}
