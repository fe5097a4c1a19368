use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use common::{Error, Result};

use crate::scheduler::Cycle;

/// Discovery hook that runs an external command (e.g. a wallet-mining job
/// that writes descriptors into the store). A non-zero exit is a failed
/// cycle.
pub struct CommandDiscovery {
    command: String,
}

impl CommandDiscovery {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl Cycle for CommandDiscovery {
    fn name(&self) -> &str {
        "discovery"
    }

    async fn run_cycle(&self) -> Result<()> {
        info!(command = %self.command, "Running discovery command");
        let output = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Other(format!(
                "discovery command exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        info!(
            stdout_bytes = output.stdout.len(),
            "Discovery command finished"
        );
        Ok(())
    }
}

/// Discovery hook used when no command is configured.
pub struct NoopDiscovery;

#[async_trait]
impl Cycle for NoopDiscovery {
    fn name(&self) -> &str {
        "discovery"
    }

    async fn run_cycle(&self) -> Result<()> {
        debug!("No discovery command configured");
        Ok(())
    }
}
