//! Persisted route mirror
//!
//! Three artifacts make configured routes survive a reboot:
//!
//! | File | Content |
//! |------|---------|
//! | rules file | banner + one `ip route add ... || true` line per rule |
//! | loader script | sleeps, then replays every non-comment line of the rules file |
//! | boot hook | a line in rc.local that starts the loader in the background |
//!
//! The rules file is always regenerated in full from the current rule set.

use super::directive::RouteDirective;
use crate::config::MirrorConfig;
use crate::platform::{shell_quote, CommandChannel};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("Failed to read {path}: {message}")]
    ReadError { path: String, message: String },
    #[error("Failed to write {path}: {message}")]
    WriteError { path: String, message: String },
    #[error("Failed to install boot hook in {path}: {message}")]
    HookError { path: String, message: String },
}

pub const MIRROR_BANNER: &str =
    "# Generated by gw-routes. Do not edit by hand; rewritten on every route change.";

const HEREDOC_MARKER: &str = "GW_ROUTES_EOF";

pub struct RouteMirror {
    rules_path: PathBuf,
    loader_path: PathBuf,
    hook_path: PathBuf,
    boot_delay_secs: u64,
}

impl RouteMirror {
    pub fn new(config: &MirrorConfig) -> Self {
        Self {
            rules_path: config.rules_path.clone(),
            loader_path: config.loader_path.clone(),
            hook_path: config.hook_path.clone(),
            boot_delay_secs: config.boot_delay_secs,
        }
    }

    pub fn rules_path(&self) -> &Path {
        &self.rules_path
    }

    pub fn render_rules(&self, directives: &[RouteDirective]) -> String {
        let mut content = String::new();
        content.push_str(MIRROR_BANNER);
        content.push('\n');
        for directive in directives {
            content.push_str(&directive.replay_line());
            content.push('\n');
        }
        content
    }

    pub fn render_loader(&self) -> String {
        let rules = shell_quote(&self.rules_path.to_string_lossy());
        format!(
            "#!/bin/sh\n\
             {banner}\n\
             # Replays static routes once interfaces (and VPN tunnels) are up.\n\
             sleep {delay}\n\
             [ -f {rules} ] || exit 0\n\
             grep -v -e '^[[:space:]]*#' -e '^[[:space:]]*$' {rules} | while IFS= read -r line; do\n\
             \x20   sh -c \"$line\" >/dev/null 2>&1 || true\n\
             done\n\
             exit 0\n",
            banner = MIRROR_BANNER,
            delay = self.boot_delay_secs,
            rules = rules,
        )
    }

    pub fn hook_line(&self) -> String {
        format!("sh {} &", shell_quote(&self.loader_path.to_string_lossy()))
    }

    /// `cat` a heredoc into `path`; `then` runs after the write on success.
    fn write_file_command(path: &Path, content: &str, then: Option<&str>) -> String {
        let quoted = shell_quote(&path.to_string_lossy());
        let dir = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(|dir| format!("mkdir -p {} && ", shell_quote(&dir.to_string_lossy())))
            .unwrap_or_default();
        let then = then.map(|cmd| format!(" && {}", cmd)).unwrap_or_default();
        format!(
            "{dir}cat > {quoted} <<'{marker}'{then}\n{content}{marker}",
            dir = dir,
            quoted = quoted,
            marker = HEREDOC_MARKER,
            then = then,
            content = content,
        )
    }

    /// Make sure rc.local exists as an executable script and carries the
    /// hook line once, ahead of its last `exit 0`.
    fn hook_command(&self) -> String {
        let hook = shell_quote(&self.hook_path.to_string_lossy());
        let staged = shell_quote(&format!("{}.gw-routes", self.hook_path.to_string_lossy()));
        let line = shell_quote(&self.hook_line());
        format!(
            "([ -s {hook} ] || printf '#!/bin/sh\\n' > {hook}) && chmod +x {hook} && \
             (grep -qxF {line} {hook} || (awk -v hook={line} \
             'NR == FNR {{ if ($0 ~ /^exit 0/) last = FNR; next }} \
             FNR == last {{ print hook }} {{ print }} END {{ if (!last) print hook }}' \
             {hook} {hook} > {staged} && cat {staged} > {hook} && rm -f {staged}))",
            hook = hook,
            staged = staged,
            line = line,
        )
    }

    /// Rewrite the rules file, loader and boot hook for `directives`.
    pub async fn write<C: CommandChannel>(
        &self,
        channel: &C,
        directives: &[RouteDirective],
    ) -> Result<(), MirrorError> {
        let rules = self.render_rules(directives);
        let outcome = channel
            .run(&Self::write_file_command(&self.rules_path, &rules, None))
            .await;
        if !outcome.success {
            return Err(MirrorError::WriteError {
                path: self.rules_path.display().to_string(),
                message: outcome.output,
            });
        }

        let chmod = format!("chmod 755 {}", shell_quote(&self.loader_path.to_string_lossy()));
        let loader =
            Self::write_file_command(&self.loader_path, &self.render_loader(), Some(&chmod));
        let outcome = channel.run(&loader).await;
        if !outcome.success {
            return Err(MirrorError::WriteError {
                path: self.loader_path.display().to_string(),
                message: outcome.output,
            });
        }

        let outcome = channel.run(&self.hook_command()).await;
        if !outcome.success {
            return Err(MirrorError::HookError {
                path: self.hook_path.display().to_string(),
                message: outcome.output,
            });
        }

        debug!("Boot hook present in {}", self.hook_path.display());
        info!(
            "Persisted {} routes to {}",
            directives.len(),
            self.rules_path.display()
        );
        Ok(())
    }

    /// Current content of the rules file
    pub async fn read<C: CommandChannel>(&self, channel: &C) -> Result<String, MirrorError> {
        let command = format!("cat {}", shell_quote(&self.rules_path.to_string_lossy()));
        let outcome = channel.run(&command).await;
        if !outcome.success {
            return Err(MirrorError::ReadError {
                path: self.rules_path.display().to_string(),
                message: outcome.output,
            });
        }
        Ok(outcome.output)
    }
}

/// Lines the loader replays: everything but comments and blanks
pub fn replay_lines(rules: &str) -> impl Iterator<Item = &str> {
    rules
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
}
