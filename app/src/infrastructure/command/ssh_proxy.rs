use std::io;

use domain::{
    error::TransportError,
    service::{escape_for_shell, CommandOutput, Transport},
};
use tokio::process::Command;

use crate::config::SshProxyConfig;

/// Runs every command through a fresh `ssh` invocation on the remote host.
///
/// The session state is only the remote working directory; each command is
/// prefixed with a `cd` into it.
#[derive(Debug)]
pub struct SshTransport {
    port: String,
    host: String,
    username_host: String,
    cwd: Option<String>,
}

impl SshTransport {
    pub fn new(config: &SshProxyConfig) -> Self {
        let SshProxyConfig {
            host,
            username,
            port,
        } = config;

        Self {
            port: port.to_string(),
            host: host.clone(),
            username_host: format!("{username}@{host}"),
            cwd: None,
        }
    }

    fn command(&self, remote: &str) -> Command {
        let mut command = Command::new("ssh");
        command.args(["-o", "BatchMode=yes", "-p", &self.port, &self.username_host, remote]);
        command
    }

    async fn remote(&self, remote: &str, stdin: Option<&str>) -> Result<CommandOutput, TransportError> {
        tracing::trace!(host = %self.host, command = remote, "Running remote command");
        let output = super::run(self.command(remote), stdin, remote).await?;
        // 255 is also a valid exit code of the remote command; only ssh prefixes its own errors.
        if output.return_code == 255 && output.stderr.contains("ssh:") {
            return Err(self.connection_error(&output));
        }
        Ok(output)
    }

    fn connection_error(&self, output: &CommandOutput) -> TransportError {
        TransportError::Connection {
            host: self.host.clone(),
            message: output.stderr.trim().to_owned(),
        }
    }

    fn cwd(&self) -> Result<&str, TransportError> {
        self.cwd.as_deref().ok_or(TransportError::NotOpen)
    }
}

#[async_trait::async_trait]
impl Transport for SshTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        if self.cwd.is_some() {
            tracing::warn!(host = %self.host, "SSH transport is already open");
            return Ok(());
        }
        let output = self.remote("pwd", None).await?;
        let home = output.stdout.trim();
        if !output.success() || home.is_empty() {
            return Err(self.connection_error(&output));
        }
        tracing::debug!(host = %self.host, home, "SSH transport opened");
        self.cwd = Some(home.to_owned());
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
        let command = format!(
            "cd {} && cd {} && pwd",
            escape_for_shell(self.cwd()?),
            escape_for_shell(path)
        );
        let output = self.remote(&command, None).await?;
        if !output.success() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{path}: {}", output.stderr.trim()),
            )
            .into());
        }
        self.cwd = Some(output.stdout.trim().to_owned());
        Ok(())
    }

    fn get_current_directory(&self) -> Result<String, TransportError> {
        self.cwd().map(str::to_owned)
    }

    async fn execute_and_wait(
        &self,
        command: &str,
        stdin: Option<&str>,
    ) -> Result<CommandOutput, TransportError> {
        let command = format!("cd {} && {command}", escape_for_shell(self.cwd()?));
        self.remote(&command, stdin).await
    }
}
