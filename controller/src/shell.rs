use std::{io, process::Stdio};

use octolight_common::CommandConfig;
use thiserror::Error;
use tokio::{process::Command, sync::Mutex};
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to poll '{command}': {source}")]
    Wait {
        command: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    NotConfigured,
    /// Exit code, `None` when the child was killed by a signal.
    Exited(Option<i32>),
    TimedOut,
}

impl CommandOutcome {
    pub fn success(self) -> bool {
        matches!(self, Self::Exited(Some(0)))
    }
}

/// Runs user commands through the shell, one at a time.
pub struct CommandRunner {
    config: CommandConfig,
    lock: Mutex<()>,
}

impl CommandRunner {
    pub fn new(config: CommandConfig) -> Self {
        Self {
            config,
            lock: Mutex::new(()),
        }
    }

    pub async fn run(&self, command: &str) -> Result<CommandOutcome, CommandError> {
        let command = command.trim();
        if command.is_empty() {
            debug!("skipping empty command");
            return Ok(CommandOutcome::NotConfigured);
        }

        let _guard = self.lock.lock().await;

        let mut child = Command::new(&self.config.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|source| CommandError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let poll_interval = self.config.poll_interval();
        for _ in 0..self.config.max_polls {
            if let Some(status) = Self::poll(&mut child, command)? {
                debug!(command, code = ?status.code(), "command finished");
                return Ok(CommandOutcome::Exited(status.code()));
            }
            tokio::time::sleep(poll_interval).await;
        }

        if let Some(status) = Self::poll(&mut child, command)? {
            return Ok(CommandOutcome::Exited(status.code()));
        }

        // The child keeps running; tokio reaps it once it exits.
        warn!(
            command,
            timeout_ms = self.config.timeout().as_millis() as u64,
            "command did not finish in time, giving up"
        );
        Ok(CommandOutcome::TimedOut)
    }

    fn poll(
        child: &mut tokio::process::Child,
        command: &str,
    ) -> Result<Option<std::process::ExitStatus>, CommandError> {
        child.try_wait().map_err(|source| CommandError::Wait {
            command: command.to_string(),
            source,
        })
    }
}
