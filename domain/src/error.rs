use std::io;

use thiserror::Error;

/// Failure of the transport itself, never of the command it ran.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport session is not open")]
    NotOpen,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("unable to launch `{command}`: {source}")]
    Launch {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("connection to {host} failed: {message}")]
    Connection { host: String, message: String },
}

/// A job template that is not complete enough to generate a script from.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("job template field `{0}` must be set")]
    MissingField(&'static str),
    #[error("job template field `{0}` must be a positive number")]
    NotPositive(&'static str),
    #[error("job template argv must name at least the program to run")]
    EmptyArgv,
}

/// Raw scheduler output that cannot be interpreted at all.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("malformed scheduler output at line {line_number}: {message} (`{line}`)")]
pub struct ParsingError {
    pub line_number: usize,
    pub line: String,
    pub message: String,
}

impl ParsingError {
    pub fn new(line_number: usize, line: &str, message: impl Into<String>) -> Self {
        Self {
            line_number,
            line: line.to_owned(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler is not bound to a transport")]
    NotBound,
    #[error("`{command}` exited with return code {return_code}\nstdout: {stdout}\nstderr: {stderr}")]
    ReturnCode {
        command: String,
        return_code: i32,
        stdout: String,
        stderr: String,
    },
    #[error("job id {0} appears more than once in the scheduler output")]
    DuplicateJobId(String),
    #[error("unexpected scheduler output: {0}")]
    UnexpectedOutput(String),
    #[error(transparent)]
    Parsing(#[from] ParsingError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl SchedulerError {
    /// True for failures raised by the transport rather than by the batch system.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
