use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

/// Delivers user-facing notifications. Delivery is best-effort and never fails
/// the caller.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, title: &str, message: &str, display: Duration);

    fn name(&self) -> &str;
}

/// Desktop notifications via `notify-send` (Linux) or `osascript` (macOS)
pub struct DesktopNotifier;

#[async_trait]
impl Notifier for DesktopNotifier {
    async fn notify(&self, title: &str, message: &str, display: Duration) {
        let mut cmd = if cfg!(target_os = "macos") {
            let script = format!(
                "display notification {:?} with title {:?}",
                message, title
            );
            let mut cmd = Command::new("osascript");
            cmd.arg("-e").arg(script);
            cmd
        } else {
            let mut cmd = Command::new("notify-send");
            cmd.arg("--expire-time")
                .arg(display.as_millis().to_string())
                .arg(title)
                .arg(message);
            cmd
        };

        match cmd.output().await {
            Ok(output) if output.status.success() => {
                debug!("Delivered notification: {}", title);
            }
            Ok(output) => {
                warn!(
                    "Notification helper exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
            }
            Err(e) => {
                warn!("Could not deliver notification '{}': {}", title, e);
            }
        }
    }

    fn name(&self) -> &str {
        "desktop"
    }
}

/// Writes notifications to the log only
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, title: &str, message: &str, _display: Duration) {
        warn!("{}: {}", title, message);
    }

    fn name(&self) -> &str {
        "log"
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records every notification it receives
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, title: &str, message: &str, _display: Duration) {
            self.sent
                .lock()
                .unwrap()
                .push((title.to_string(), message.to_string()));
        }

        fn name(&self) -> &str {
            "recording"
        }
    }
}
