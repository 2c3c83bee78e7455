//! Local shell implementation of the command channel

use super::{CommandChannel, CommandOutcome};
use tokio::process::Command;
use tracing::{debug, info};

pub struct ShellChannel {
    dry_run: bool,
}

impl ShellChannel {
    pub fn new() -> Self {
        Self { dry_run: false }
    }

    /// Log commands instead of running them; every command reports success.
    pub fn dry_run() -> Self {
        Self { dry_run: true }
    }
}

impl Default for ShellChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandChannel for ShellChannel {
    async fn run(&self, command: &str) -> CommandOutcome {
        if self.dry_run {
            info!("[dry-run] {}", command);
            return CommandOutcome::ok("");
        }

        debug!("$ {}", command);
        let output = match Command::new("sh").arg("-c").arg(command).output().await {
            Ok(output) => output,
            Err(e) => return CommandOutcome::failed(format!("failed to run sh: {}", e)),
        };

        let success = output.status.success();
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let text = if !success && !stderr.trim().is_empty() {
            stderr
        } else {
            stdout
        };

        if !success {
            debug!("command exited with {}: {}", output.status, text.trim());
        }

        CommandOutcome {
            success,
            output: text.trim_end().to_string(),
        }
    }
}
