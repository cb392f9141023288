/*!
 * Privileged mount helpers.
 *
 * Mounting and unmounting run as external processes, normally behind a
 * privilege escalation wrapper such as `pkexec`. Waiting for them is async,
 * so the event loop keeps dispatching while a helper runs.
 */
use std::fmt::Debug;
use std::io;
use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use hotplug_core::config::ActionConfig;

/// What a helper process reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperOutput {
    /// Exit code; `None` when killed by a signal
    pub status: Option<i32>,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

impl HelperOutput {
    /// Exit code 0
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Human readable failure text: stderr, or stdout when stderr is empty
    pub fn message(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// Runs the external mount and unmount commands
#[async_trait]
pub trait PrivilegedHelper: Send + Sync + Debug {
    /// Mount `source` on `target`
    async fn mount(&self, source: &str, target: &Path) -> io::Result<HelperOutput>;

    /// Unmount whatever is mounted on `target`
    async fn unmount(&self, target: &Path) -> io::Result<HelperOutput>;
}

/// [`PrivilegedHelper`] that spawns `mount`/`umount` through a wrapper
#[derive(Debug, Clone)]
pub struct CommandHelper {
    escalation: Vec<String>,
    mount_command: String,
    unmount_command: String,
}

impl CommandHelper {
    /// Build from the `[actions]` configuration section
    pub fn from_config(config: &ActionConfig) -> Self {
        Self {
            escalation: config.escalation.clone(),
            mount_command: config.mount_command.clone(),
            unmount_command: config.unmount_command.clone(),
        }
    }

    /// Program and arguments for running `command` with `args`
    pub fn command_line(&self, command: &str, args: &[&str]) -> Vec<String> {
        self.escalation
            .iter()
            .cloned()
            .chain(std::iter::once(command.to_string()))
            .chain(args.iter().map(|a| a.to_string()))
            .collect()
    }

    async fn run(&self, command: &str, args: &[&str]) -> io::Result<HelperOutput> {
        let argv = self.command_line(command, args);
        let (program, rest) = argv
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty helper command"))?;
        debug!(program = %program, args = ?rest, "spawning privileged helper");

        let output = Command::new(program)
            .args(rest)
            .output()
            .await?;

        Ok(HelperOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[async_trait]
impl PrivilegedHelper for CommandHelper {
    async fn mount(&self, source: &str, target: &Path) -> io::Result<HelperOutput> {
        let target = target.to_string_lossy();
        self.run(&self.mount_command, &[source, &target]).await
    }

    async fn unmount(&self, target: &Path) -> io::Result<HelperOutput> {
        let target = target.to_string_lossy();
        self.run(&self.unmount_command, &[&target]).await
    }
}
