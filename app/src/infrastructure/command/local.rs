use std::path::PathBuf;

use domain::{
    error::TransportError,
    service::{CommandOutput, Transport},
};
use tokio::process::Command;

/// Runs commands with `bash -c` on this machine.
#[derive(Debug, Default)]
pub struct LocalTransport {
    cwd: Option<PathBuf>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn cwd(&self) -> Result<&PathBuf, TransportError> {
        self.cwd.as_ref().ok_or(TransportError::NotOpen)
    }
}

#[async_trait::async_trait]
impl Transport for LocalTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        if self.cwd.is_some() {
            tracing::warn!("Local transport is already open");
            return Ok(());
        }
        self.cwd = Some(std::env::current_dir()?);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.cwd = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.cwd.is_some()
    }

    async fn change_directory(&mut self, path: &str) -> Result<(), TransportError> {
        let target = tokio::fs::canonicalize(self.cwd()?.join(path)).await?;
        // Fails for files and for directories we cannot list.
        let _entries = tokio::fs::read_dir(&target).await?;
        self.cwd = Some(target);
        Ok(())
    }

    fn get_current_directory(&self) -> Result<String, TransportError> {
        Ok(self.cwd()?.to_string_lossy().into_owned())
    }

    async fn execute_and_wait(
        &self,
        command: &str,
        stdin: Option<&str>,
    ) -> Result<CommandOutput, TransportError> {
        let mut process = Command::new("bash");
        process.arg("-c").arg(command).current_dir(self.cwd()?);
        tracing::trace!(command, "Running local command");
        super::run(process, stdin, command).await
    }
}
