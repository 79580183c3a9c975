use crate::error::TransportError;

/// Captured result of one command. A non-zero `return_code` is data, not a failure.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub return_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn new(return_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            return_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    #[inline]
    pub fn success(&self) -> bool {
        self.return_code == 0
    }
}

/// Runs shell commands on a machine, either locally or through a remote session.
///
/// Every operation except `open` fails with [`TransportError::NotOpen`] outside
/// an open session. Timeouts, if any, are the implementation's business and
/// surface as transport errors.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn open(&mut self) -> Result<(), TransportError>;
    async fn close(&mut self) -> Result<(), TransportError>;
    fn is_open(&self) -> bool;

    /// Relative paths resolve against the current directory.
    async fn change_directory(&mut self, path: &str) -> Result<(), TransportError>;
    fn get_current_directory(&self) -> Result<String, TransportError>;

    /// Run `command` in the current directory and wait for it to exit.
    async fn execute_and_wait(
        &self,
        command: &str,
        stdin: Option<&str>,
    ) -> Result<CommandOutput, TransportError>;
}

/// Quote `s` as one single-quoted shell word.
pub fn escape_for_shell(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
