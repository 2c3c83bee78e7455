//! Command execution channel to the appliance
//!
//! Every interface lookup, route query and route mutation is a shell command
//! sent through a [`CommandChannel`]. A non-success outcome is an ordinary
//! value here: deleting a route that does not exist is expected, so each
//! caller decides whether a failure matters for its step.

pub mod linux;

use std::future::Future;
use std::sync::Arc;

/// Result of one command: whether it exited cleanly, and its text output
/// (stdout on success, stderr when the command failed and wrote one)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutcome {
    pub success: bool,
    pub output: String,
}

impl CommandOutcome {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }
}

/// Runs shell command lines against the appliance
pub trait CommandChannel: Send + Sync {
    fn run(&self, command: &str) -> impl Future<Output = CommandOutcome> + Send;
}

impl<T: CommandChannel + ?Sized> CommandChannel for Arc<T> {
    fn run(&self, command: &str) -> impl Future<Output = CommandOutcome> + Send {
        (**self).run(command)
    }
}

impl<T: CommandChannel + ?Sized> CommandChannel for &T {
    fn run(&self, command: &str) -> impl Future<Output = CommandOutcome> + Send {
        (**self).run(command)
    }
}

/// Quote a value for safe interpolation into a POSIX shell command line.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Kernel interface names: 1-15 chars of `[A-Za-z0-9._@-]`.
///
/// Names failing this check never reach a command line.
pub fn is_valid_device_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 15
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '@'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_outcome_constructors() {
        let ok = CommandOutcome::ok("done");
        assert!(ok.success);
        assert_eq!(ok.output, "done");

        let failed = CommandOutcome::failed("RTNETLINK answers: No such process");
        assert!(!failed.success);
        assert!(failed.output.contains("No such process"));
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/etc/rc.local"), "'/etc/rc.local'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_device_name_validation() {
        assert!(is_valid_device_name("eth0"));
        assert!(is_valid_device_name("eth0.5"));
        assert!(is_valid_device_name("vpn_vpn"));
        assert!(!is_valid_device_name(""));
        assert!(!is_valid_device_name("eth0; reboot"));
        assert!(!is_valid_device_name("averyveryverylongname0"));
    }
}
